/// Maximum channel name length accepted by `setchannel`.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 50;

/// Channel name prefixes accepted when the server does not advertise CHANTYPES.
pub const DEFAULT_CHANNEL_TYPES: &str = "#&";

/// A parsed `xbabel` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Status,
    Set(u64),
    Reset,
    SetChannel(String),
    Help,
}

impl AdminCommand {
    /// Whether the issuer needs the elevated channel flag.
    pub fn requires_permission(&self) -> bool {
        matches!(
            self,
            AdminCommand::Set(_) | AdminCommand::Reset | AdminCommand::SetChannel(_)
        )
    }
}

/// Malformed arguments to a privileged subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    SetUsage,
    SetChannelUsage,
}

impl AdminError {
    pub fn usage(&self, prefix: &str) -> String {
        match self {
            AdminError::SetUsage => format!("❓ Usá: `{prefix} set <numero>`"),
            AdminError::SetChannelUsage => format!("📣 Usá: `{prefix} setchannel #canal`"),
        }
    }
}

impl std::fmt::Display for AdminError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminError::SetUsage => write!(f, "set expects a non-negative integer"),
            AdminError::SetChannelUsage => write!(f, "setchannel expects a channel name"),
        }
    }
}

impl std::error::Error for AdminError {}

/// Parse an admin command line.
///
/// Returns None when the first word is not `prefix`, so the message can be
/// considered for other handlers. `channel_types` lists the characters that
/// may start a channel name.
pub fn parse_admin_command(
    prefix: &str,
    channel_types: &str,
    text: &str,
) -> Option<Result<AdminCommand, AdminError>> {
    let mut args = text.split_whitespace();
    if !args.next()?.eq_ignore_ascii_case(prefix) {
        return None;
    }

    let sub = args.next().unwrap_or("").to_lowercase();
    let arg = args.next();

    let parsed = match sub.as_str() {
        "status" => Ok(AdminCommand::Status),
        "reset" => Ok(AdminCommand::Reset),
        "set" => arg
            .and_then(|a| a.parse::<u64>().ok())
            .map(AdminCommand::Set)
            .ok_or(AdminError::SetUsage),
        "setchannel" => arg
            .filter(|a| is_channel_name(a, channel_types))
            .map(|a| AdminCommand::SetChannel(a.to_string()))
            .ok_or(AdminError::SetChannelUsage),
        _ => Ok(AdminCommand::Help),
    };
    Some(parsed)
}

/// A channel reference: starts with one of `channel_types`, 2-50 chars,
/// and contains no control characters or commas.
pub fn is_channel_name(name: &str, channel_types: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    channel_types.contains(first)
        && name.len() >= 2
        && name.len() <= MAX_CHANNEL_NAME_LENGTH
        && !name.chars().any(|c| c.is_control() || c == ',' || c == ' ')
}

/// Reply listing every admin subcommand.
pub fn help_text(prefix: &str) -> String {
    format!(
        "ℹ️ Comandos: `{prefix} status`, `{prefix} set <n>`, `{prefix} reset`, `{prefix} setchannel #canal`"
    )
}
