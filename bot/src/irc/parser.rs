/// An IRC protocol line (RFC 2812 with IRCv3 message tags).
///
/// Wire format: `[@tags] [:prefix] COMMAND [params...] [:trailing]\r\n`
///
/// Examples:
///   `@msgid=abc;bot :Nekotina!neko@host PRIVMSG #babel :Has sacrificado 5 Emperium\r\n`
///   `:irc.example.net 353 BabelBot = #babel :@ops +voiced alice\r\n`
///   `PING :irc.example.net\r\n`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IrcMessage {
    /// Tags in wire order; a tag without `=value` has value None.
    pub tags: Vec<(String, Option<String>)>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Build an outgoing command with no tags or prefix.
    pub fn new(command: &str, params: Vec<String>) -> Self {
        IrcMessage {
            command: command.to_string(),
            params,
            ..Default::default()
        }
    }

    /// Attach a client tag to an outgoing message.
    pub fn with_tag(mut self, key: &str, value: Option<&str>) -> Self {
        self.tags.push((key.to_string(), value.map(str::to_string)));
        self
    }

    /// Parse a single IRC line (without the trailing \r\n).
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut remaining = line;
        let mut tags = Vec::new();
        let mut prefix = None;

        if let Some(rest) = remaining.strip_prefix('@') {
            let Some(idx) = rest.find(' ') else {
                return Err(ParseError::MissingCommand);
            };
            tags = parse_tags(&rest[..idx]);
            remaining = rest[idx..].trim_start();
        }

        if let Some(rest) = remaining.strip_prefix(':') {
            let Some(idx) = rest.find(' ') else {
                return Err(ParseError::MissingCommand);
            };
            prefix = Some(rest[..idx].to_string());
            remaining = rest[idx..].trim_start();
        }

        let (command, mut remaining) = match remaining.find(' ') {
            Some(idx) => (remaining[..idx].to_uppercase(), remaining[idx..].trim_start()),
            None => (remaining.to_uppercase(), ""),
        };

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        while !remaining.is_empty() {
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }

            match remaining.find(' ') {
                Some(idx) => {
                    params.push(remaining[..idx].to_string());
                    remaining = remaining[idx..].trim_start();
                }
                None => {
                    params.push(remaining.to_string());
                    break;
                }
            }
        }

        Ok(IrcMessage {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Format this message to wire format (without trailing \r\n).
    pub fn format(&self) -> String {
        let mut out = String::with_capacity(512);

        if !self.tags.is_empty() {
            out.push('@');
            for (i, (key, value)) in self.tags.iter().enumerate() {
                if i > 0 {
                    out.push(';');
                }
                out.push_str(key);
                if let Some(v) = value {
                    out.push('=');
                    out.push_str(&escape_tag_value(v));
                }
            }
            out.push(' ');
        }

        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        for (i, param) in self.params.iter().enumerate() {
            out.push(' ');
            // Line breaks in content would start a new command.
            let param = param.replace(['\r', '\n'], " ");
            let last = i == self.params.len() - 1;
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                out.push(':');
            }
            out.push_str(&param);
        }

        out
    }

    /// Value of a tag. A present tag without a value yields `Some("")`.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.iter().any(|(k, _)| k == key)
    }

    /// Nick part of a `nick!user@host` prefix.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
        (!nick.is_empty()).then_some(nick)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

fn parse_tags(raw: &str) -> Vec<(String, Option<String>)> {
    raw.split(';')
        .filter(|t| !t.is_empty())
        .map(|t| match t.split_once('=') {
            Some((k, v)) if !v.is_empty() => (k.to_string(), Some(unescape_tag_value(v))),
            Some((k, _)) => (k.to_string(), None),
            None => (t.to_string(), None),
        })
        .collect()
}

fn unescape_tag_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    let mut chars = v.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape_tag_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, PartialEq)]
pub enum ParseError {
    Empty,
    MissingCommand,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty message"),
            ParseError::MissingCommand => write!(f, "missing command"),
        }
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_privmsg() {
        let msg = IrcMessage::parse(":alice!~a@host PRIVMSG #babel :xgift @neko emperium x 5")
            .unwrap();
        assert!(msg.tags.is_empty());
        assert_eq!(msg.source_nick(), Some("alice"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#babel", "xgift @neko emperium x 5"]);
    }

    #[test]
    fn test_parse_tags() {
        let msg = IrcMessage::parse(
            "@msgid=AB12;bot;account=neko;+draft/reply=x :Nekotina!n@h PRIVMSG #babel :hola",
        )
        .unwrap();
        assert_eq!(msg.tag("msgid"), Some("AB12"));
        assert_eq!(msg.tag("account"), Some("neko"));
        assert_eq!(msg.tag("bot"), Some(""));
        assert!(msg.has_tag("bot"));
        assert!(!msg.has_tag("draft/bot"));
        assert_eq!(msg.tag("+draft/reply"), Some("x"));
        assert_eq!(msg.source_nick(), Some("Nekotina"));
    }

    #[test]
    fn test_tag_value_escapes() {
        let msg = IrcMessage::parse(r"@note=a\sb\:c\\d\ne PING x").unwrap();
        assert_eq!(msg.tag("note"), Some("a b;c\\d\ne"));
    }

    #[test]
    fn test_tags_without_command() {
        assert_eq!(
            IrcMessage::parse("@msgid=1"),
            Err(ParseError::MissingCommand)
        );
    }

    #[test]
    fn test_parse_server_ping() {
        let msg = IrcMessage::parse("PING :irc.example.net").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.param(0), Some("irc.example.net"));
        assert_eq!(msg.source_nick(), None);
    }

    #[test]
    fn test_parse_names_reply() {
        let msg =
            IrcMessage::parse(":irc.example.net 353 BabelBot = #babel :@op +voice alice").unwrap();
        assert_eq!(msg.command, "353");
        assert_eq!(msg.params, vec!["BabelBot", "=", "#babel", "@op +voice alice"]);
        assert_eq!(msg.source_nick(), Some("irc.example.net"));
    }

    #[test]
    fn test_parse_mode_with_arguments() {
        let msg = IrcMessage::parse(":chanserv!s@services MODE #babel +ov alice bob").unwrap();
        assert_eq!(msg.params, vec!["#babel", "+ov", "alice", "bob"]);
    }

    #[test]
    fn test_command_uppercased() {
        let msg = IrcMessage::parse("privmsg #babel :hi").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn test_parse_empty_and_prefix_only() {
        assert_eq!(IrcMessage::parse(""), Err(ParseError::Empty));
        assert_eq!(IrcMessage::parse("\r\n"), Err(ParseError::Empty));
        assert_eq!(IrcMessage::parse(":prefix"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn test_parse_empty_trailing() {
        let msg = IrcMessage::parse("PRIVMSG #babel :").unwrap();
        assert_eq!(msg.params, vec!["#babel", ""]);
    }

    #[test]
    fn test_format_outgoing_privmsg() {
        let msg = IrcMessage::new(
            "PRIVMSG",
            vec!["#babel".into(), "💎 alice aportó 5".into()],
        );
        assert_eq!(msg.format(), "PRIVMSG #babel :💎 alice aportó 5");
    }

    #[test]
    fn test_format_strips_line_breaks() {
        let msg = IrcMessage::new("PRIVMSG", vec!["#babel".into(), "a\r\nQUIT".into()]);
        assert_eq!(msg.format(), "PRIVMSG #babel :a  QUIT");
    }

    #[test]
    fn test_format_colon_leading_trailing() {
        let msg = IrcMessage::new("PRIVMSG", vec!["#babel".into(), ":)".into()]);
        assert_eq!(msg.format(), "PRIVMSG #babel ::)");
    }

    #[test]
    fn test_format_tagmsg() {
        let msg = IrcMessage::new("TAGMSG", vec!["#babel".into()])
            .with_tag("+draft/react", Some("⏳"))
            .with_tag("+draft/reply", Some("AB 12"));
        assert_eq!(msg.format(), "@+draft/react=⏳;+draft/reply=AB\\s12 TAGMSG #babel");
    }

    #[test]
    fn test_roundtrip_tagged_line() {
        let original = "@msgid=1;bot :neko!n@h PRIVMSG #babel :Has sacrificado 5";
        assert_eq!(IrcMessage::parse(original).unwrap().format(), original);
    }

    #[test]
    fn test_parse_error_display() {
        assert_eq!(ParseError::Empty.to_string(), "empty message");
        assert_eq!(ParseError::MissingCommand.to_string(), "missing command");
    }
}
