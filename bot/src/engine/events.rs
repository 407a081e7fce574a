use chrono::{DateTime, Utc};

/// A channel message as seen by the tracker, independent of the transport.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub community_id: String,
    pub channel_id: String,
    /// Stable author identifier (account name when known, otherwise nick).
    pub author_id: String,
    /// Name used to mention the author.
    pub author_name: String,
    pub text: String,
    /// Transport message id, used to anchor reactions.
    pub message_id: Option<String>,
    /// Author is an allow-listed companion bot.
    pub from_bot: bool,
    /// Author holds the elevated channel flag.
    pub is_operator: bool,
}

/// Something the tracker wants said or shown on the chat platform.
#[derive(Debug, Clone, PartialEq)]
pub enum BotAction {
    /// Plain text to a channel. `**bold**` markup is rendered by the transport.
    Say { channel: String, text: String },
    /// React to a user's message.
    React {
        channel: String,
        nick: String,
        message_id: Option<String>,
        emoji: String,
    },
    /// Structured display (title, fields, footer).
    Display { channel: String, card: Card },
}

impl BotAction {
    pub fn channel(&self) -> &str {
        match self {
            BotAction::Say { channel, .. }
            | BotAction::React { channel, .. }
            | BotAction::Display { channel, .. } => channel,
        }
    }
}

/// Titled, fielded message block.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<CardField>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardField {
    pub name: String,
    pub value: String,
    /// Inline fields share a line with their inline neighbours.
    pub inline: bool,
}

impl Card {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            fields: Vec::new(),
            footer: None,
            timestamp: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn inline_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(CardField {
            name: name.into(),
            value: value.into(),
            inline: true,
        });
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}
