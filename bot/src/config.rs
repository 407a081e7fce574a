use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::ledger::DEFAULT_GOAL;

/// Top-level bot configuration, loaded from babel.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BotConfig {
    pub irc: IrcSection,
    pub web: WebSection,
    pub ledger: LedgerSection,
    pub donations: DonationsSection,
    pub signals: SignalsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IrcSection {
    pub server: String,
    pub port: u16,
    pub tls: bool,
    /// PEM bundle of trusted CA certificates, used when `tls` is set.
    pub tls_ca_file: String,
    pub nick: String,
    pub username: String,
    pub realname: String,
    /// Server password sent with PASS before registration.
    pub password: Option<String>,
    pub channels: Vec<String>,
    /// Ledger key for everything seen on this network.
    pub community: String,
    /// Upper bound for the reconnect backoff.
    pub max_reconnect_delay_secs: u64,
}

impl Default for IrcSection {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".into(),
            port: 6667,
            tls: false,
            tls_ca_file: "/etc/ssl/certs/ca-certificates.crt".into(),
            nick: "BabelBot".into(),
            username: "babel".into(),
            realname: "Torre de Babel".into(),
            password: None,
            channels: vec!["#babel".into()],
            community: "default".into(),
            max_reconnect_delay_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub address: String,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8000".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub path: String,
    /// Goal given to a community the first time it is seen.
    pub default_goal: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: "data/babel.json".into(),
            default_goal: DEFAULT_GOAL,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DonationsSection {
    pub admin_prefix: String,
    pub gift_prefix: String,
    pub item_aliases: Vec<String>,
    /// How long a gift command waits for the companion bot's answer.
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
    pub liveness_interval_secs: u64,
}

impl Default for DonationsSection {
    fn default() -> Self {
        Self {
            admin_prefix: "xbabel".into(),
            gift_prefix: "xgift".into(),
            item_aliases: vec!["emperium".into(), "emp".into(), "504".into()],
            window_secs: 60,
            sweep_interval_secs: 30,
            liveness_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SignalsSection {
    /// Nicks whose messages are read as confirmations. When empty, any
    /// message carrying the IRCv3 `bot` tag qualifies.
    pub companion_nicks: Vec<String>,
    pub success_phrases: Vec<String>,
    pub failure_phrases: Vec<String>,
}

impl Default for SignalsSection {
    fn default() -> Self {
        Self {
            companion_nicks: Vec::new(),
            success_phrases: vec![
                "sacrificado".into(),
                "emperium".into(),
                "¿has visto aquella torre".into(),
                "torre por las montañas".into(),
            ],
            failure_phrases: vec![
                "supera la que posees".into(),
                "no posees ese item".into(),
            ],
        }
    }
}

impl BotConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::from_toml(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("IRC_SERVER") {
            self.irc.server = v;
        }
        if let Ok(v) = std::env::var("IRC_PORT")
            && let Ok(port) = v.parse()
        {
            self.irc.port = port;
        }
        if let Ok(v) = std::env::var("IRC_TLS") {
            self.irc.tls = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("IRC_NICK") {
            self.irc.nick = v;
        }
        if let Ok(v) = std::env::var("IRC_PASSWORD") {
            self.irc.password = Some(v);
        }
        if let Ok(v) = std::env::var("IRC_CHANNELS") {
            self.irc.channels = split_list(&v);
        }
        if let Ok(v) = std::env::var("WEB_ADDRESS") {
            self.web.address = v;
        } else if let Ok(v) = std::env::var("PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.web.address = format!("0.0.0.0:{port}");
        }
        if let Ok(v) = std::env::var("LEDGER_PATH") {
            self.ledger.path = v;
        }
        if let Ok(v) = std::env::var("COMPANION_NICKS") {
            self.signals.companion_nicks = split_list(&v);
        }
    }

    /// Reject settings the bot cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.irc.nick.trim().is_empty() {
            return Err("irc.nick cannot be empty".into());
        }
        if self.ledger.default_goal == 0 {
            return Err("ledger.default_goal must be greater than zero".into());
        }
        if self.donations.window_secs == 0 || self.donations.window_secs > 86_400 {
            return Err("donations.window_secs must be between 1 and 86400".into());
        }
        if self.donations.sweep_interval_secs == 0 {
            return Err("donations.sweep_interval_secs must be greater than zero".into());
        }
        if self.donations.liveness_interval_secs == 0 {
            return Err("donations.liveness_interval_secs must be greater than zero".into());
        }
        if self.donations.admin_prefix.trim().is_empty()
            || self.donations.gift_prefix.trim().is_empty()
        {
            return Err("command prefixes cannot be empty".into());
        }
        if self.donations.item_aliases.iter().all(|a| a.trim().is_empty()) {
            return Err("donations.item_aliases needs at least one alias".into());
        }
        Ok(())
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.default_goal, 120);
        assert_eq!(config.donations.window_secs, 60);
        assert_eq!(config.donations.sweep_interval_secs, 30);
        assert_eq!(config.donations.admin_prefix, "xbabel");
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = BotConfig::from_toml(
            r##"
            [irc]
            server = "irc.example.net"
            channels = ["#torre", "#anuncios"]
            community = "nekos"

            [signals]
            companion_nicks = ["Nekotina"]
            failure_phrases = ["no alcanza"]
            "##,
        )
        .unwrap();
        assert_eq!(config.irc.server, "irc.example.net");
        assert_eq!(config.irc.port, 6667);
        assert_eq!(config.irc.channels.len(), 2);
        assert_eq!(config.irc.community, "nekos");
        assert_eq!(config.signals.companion_nicks, vec!["Nekotina"]);
        assert_eq!(config.signals.failure_phrases, vec!["no alcanza"]);
        // Untouched list keeps its default.
        assert!(config.signals.success_phrases.contains(&"sacrificado".to_string()));
        assert_eq!(config.web.address, "0.0.0.0:8000");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(BotConfig::from_toml("[irc\nport = 1").is_err());
        assert!(BotConfig::from_toml("[irc]\nport = \"abc\"").is_err());
    }

    #[test]
    fn test_validation_rejects_zero_goal_and_window() {
        let mut config = BotConfig::default();
        config.ledger.default_goal = 0;
        assert!(config.validate().is_err());

        let mut config = BotConfig::default();
        config.donations.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = BotConfig::default();
        config.donations.item_aliases = vec![" ".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" #a, ,#b,"), vec!["#a", "#b"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = BotConfig::load("/nonexistent/babel-bot/babel.toml").unwrap();
        assert!(!config.irc.nick.is_empty());
    }
}
