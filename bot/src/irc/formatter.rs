use crate::engine::events::{BotAction, Card};

use super::parser::IrcMessage;

/// Longest text payload per PRIVMSG, leaving room for the prefix the server
/// prepends when relaying (512-byte line limit).
pub const MAX_TEXT_BYTES: usize = 400;

const BOLD: char = '\x02';

/// Helpers that build outgoing client lines. All functions return formatted
/// strings ready to send (caller appends \r\n).
pub fn pass(password: &str) -> String {
    IrcMessage::new("PASS", vec![password.into()]).format()
}

pub fn nick(nick: &str) -> String {
    IrcMessage::new("NICK", vec![nick.into()]).format()
}

/// USER username 0 * :realname
pub fn user(username: &str, realname: &str) -> String {
    IrcMessage::new(
        "USER",
        vec![username.into(), "0".into(), "*".into(), realname.into()],
    )
    .format()
}

pub fn cap_req(capability: &str) -> String {
    IrcMessage::new("CAP", vec!["REQ".into(), capability.into()]).format()
}

pub fn cap_end() -> String {
    IrcMessage::new("CAP", vec!["END".into()]).format()
}

/// JOIN #a,#b
pub fn join(channels: &[String]) -> String {
    IrcMessage::new("JOIN", vec![channels.join(",")]).format()
}

pub fn ping(token: &str) -> String {
    IrcMessage::new("PING", vec![token.into()]).format()
}

pub fn pong(token: &str) -> String {
    IrcMessage::new("PONG", vec![token.into()]).format()
}

pub fn quit(reason: &str) -> String {
    IrcMessage::new("QUIT", vec![reason.into()]).format()
}

/// One PRIVMSG per line of `text`, long lines split to fit.
pub fn privmsg(target: &str, text: &str) -> Vec<String> {
    split_text(&render_markup(text), MAX_TEXT_BYTES)
        .into_iter()
        .map(|line| IrcMessage::new("PRIVMSG", vec![target.into(), line]).format())
        .collect()
}

pub fn notice(target: &str, text: &str) -> Vec<String> {
    split_text(&render_markup(text), MAX_TEXT_BYTES)
        .into_iter()
        .map(|line| IrcMessage::new("NOTICE", vec![target.into(), line]).format())
        .collect()
}

/// `@+draft/react=<emoji>;+draft/reply=<msgid> TAGMSG <channel>`
pub fn react(channel: &str, message_id: &str, emoji: &str) -> String {
    IrcMessage::new("TAGMSG", vec![channel.into()])
        .with_tag("+draft/react", Some(emoji))
        .with_tag("+draft/reply", Some(message_id))
        .format()
}

/// Wire lines for a tracker action. Reactions need the `message-tags`
/// capability and a message id; otherwise the requester gets a NOTICE.
pub fn action_lines(action: &BotAction, tags_enabled: bool) -> Vec<String> {
    match action {
        BotAction::Say { channel, text } => privmsg(channel, text),
        BotAction::React {
            channel,
            nick,
            message_id,
            emoji,
        } => match message_id {
            Some(id) if tags_enabled => vec![react(channel, id, emoji)],
            _ => notice(nick, &format!("{emoji} {channel}")),
        },
        BotAction::Display { channel, card } => render_card(card)
            .iter()
            .flat_map(|line| privmsg(channel, line))
            .collect(),
    }
}

/// Lay a card out as text lines: bold title, description, inline fields
/// joined on one line, then the footer with its timestamp.
pub fn render_card(card: &Card) -> Vec<String> {
    let mut lines = vec![format!("**{}**", card.title)];

    if let Some(description) = &card.description {
        lines.push(description.clone());
    }

    let mut inline_row: Vec<String> = Vec::new();
    for field in &card.fields {
        let rendered = format!("**{}:** {}", field.name, field.value);
        if field.inline {
            inline_row.push(rendered);
        } else {
            if !inline_row.is_empty() {
                lines.push(inline_row.join(" | "));
                inline_row.clear();
            }
            lines.push(rendered);
        }
    }
    if !inline_row.is_empty() {
        lines.push(inline_row.join(" | "));
    }

    let stamp = card
        .timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string());
    match (&card.footer, stamp) {
        (Some(footer), Some(stamp)) => lines.push(format!("{footer} · {stamp}")),
        (Some(footer), None) => lines.push(footer.clone()),
        (None, Some(stamp)) => lines.push(stamp),
        (None, None) => {}
    }

    lines
}

/// Turn `**bold**` markup into IRC bold control codes. An unpaired marker is
/// left as typed.
pub fn render_markup(text: &str) -> String {
    let pieces: Vec<&str> = text.split("**").collect();
    let markers = pieces.len() - 1;
    let paired = markers - markers % 2;

    let mut out = String::with_capacity(text.len());
    for (i, piece) in pieces.iter().enumerate() {
        if i > 0 {
            if i <= paired {
                out.push(BOLD);
            } else {
                out.push_str("**");
            }
        }
        out.push_str(piece);
    }
    out
}

/// Remove mIRC formatting codes (bold, colors, italics, ...) from incoming text.
pub fn strip_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x02' | '\x0f' | '\x11' | '\x16' | '\x1d' | '\x1e' | '\x1f' => {}
            '\x03' => {
                // \x03[fg[,bg]] with one or two digits each
                if skip_digits(&mut chars, 2) > 0 && chars.peek() == Some(&',') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(char::is_ascii_digit) {
                        chars.next();
                        skip_digits(&mut chars, 2);
                    }
                }
            }
            '\x04' => {
                if skip_hex(&mut chars, 6) > 0 && chars.peek() == Some(&',') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(char::is_ascii_hexdigit) {
                        chars.next();
                        skip_hex(&mut chars, 6);
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Consume up to `max` chars matching `accept`; returns how many were consumed.
fn skip_while_max(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    max: usize,
    accept: fn(&char) -> bool,
) -> usize {
    let mut skipped = 0;
    while skipped < max && chars.peek().is_some_and(accept) {
        chars.next();
        skipped += 1;
    }
    skipped
}

fn skip_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, max: usize) -> usize {
    skip_while_max(chars, max, char::is_ascii_digit)
}

fn skip_hex(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, max: usize) -> usize {
    skip_while_max(chars, max, char::is_ascii_hexdigit)
}

/// Split text on newlines, then wrap each line at word boundaries so no
/// piece exceeds `max_bytes`. Empty lines are dropped.
pub fn split_text(text: &str, max_bytes: usize) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut current = String::new();
        for word in line.split(' ') {
            let needed = if current.is_empty() { word.len() } else { current.len() + 1 + word.len() };
            if needed <= max_bytes {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                continue;
            }
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            // A single word longer than the limit is cut on char boundaries.
            for c in word.chars() {
                if current.len() + c.len_utf8() > max_bytes {
                    out.push(std::mem::take(&mut current));
                }
                current.push(c);
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
    out
}
