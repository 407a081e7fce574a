use super::roster::MemberModes;

/// Server features advertised in RPL_ISUPPORT (005) that affect how the bot
/// reads NAMES and MODE lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFeatures {
    /// (mode letter, prefix symbol, privilege) from highest to lowest.
    prefixes: Vec<(char, char, MemberModes)>,
    /// CHANMODES type A (list), always takes a parameter.
    list_modes: String,
    /// CHANMODES type B, always takes a parameter.
    param_modes: String,
    /// CHANMODES type C, takes a parameter only when set.
    set_param_modes: String,
    pub chantypes: String,
}

impl Default for ServerFeatures {
    fn default() -> Self {
        let mut features = Self {
            prefixes: Vec::new(),
            list_modes: "beI".into(),
            param_modes: "k".into(),
            set_param_modes: "l".into(),
            chantypes: "#&".into(),
        };
        features.set_prefix("(qaohv)~&@%+");
        features
    }
}

impl ServerFeatures {
    /// Apply the tokens of one 005 line (`PREFIX=(ov)@+ CHANTYPES=# ...`).
    pub fn apply_isupport<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) {
        for token in tokens {
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            match key {
                "PREFIX" => self.set_prefix(value),
                "CHANTYPES" if !value.is_empty() => self.chantypes = value.to_string(),
                "CHANMODES" => {
                    let mut groups = value.split(',');
                    self.list_modes = groups.next().unwrap_or("").to_string();
                    self.param_modes = groups.next().unwrap_or("").to_string();
                    self.set_param_modes = groups.next().unwrap_or("").to_string();
                }
                _ => {}
            }
        }
    }

    fn set_prefix(&mut self, value: &str) {
        let Some((modes, symbols)) = value
            .strip_prefix('(')
            .and_then(|v| v.split_once(')'))
        else {
            return;
        };
        self.prefixes = modes
            .chars()
            .zip(symbols.chars())
            .map(|(mode, symbol)| (mode, symbol, MemberModes::from_mode_char(mode)))
            .collect();
    }

    /// Privilege granted by a member prefix mode letter (`o`, `v`, ...).
    pub fn privilege_for_mode(&self, mode: char) -> Option<MemberModes> {
        self.prefixes
            .iter()
            .find(|(m, _, _)| *m == mode)
            .map(|(_, _, p)| *p)
    }

    /// Privilege for a NAMES prefix symbol (`@`, `+`, ...).
    pub fn privilege_for_symbol(&self, symbol: char) -> Option<MemberModes> {
        self.prefixes
            .iter()
            .find(|(_, s, _)| *s == symbol)
            .map(|(_, _, p)| *p)
    }

    /// Whether `mode` consumes a MODE argument in the given direction.
    pub fn mode_takes_arg(&self, mode: char, adding: bool) -> bool {
        self.privilege_for_mode(mode).is_some()
            || self.list_modes.contains(mode)
            || self.param_modes.contains(mode)
            || (adding && self.set_param_modes.contains(mode))
    }

    pub fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .is_some_and(|c| self.chantypes.contains(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let f = ServerFeatures::default();
        assert_eq!(f.privilege_for_symbol('@'), Some(MemberModes::OP));
        assert_eq!(f.privilege_for_symbol('~'), Some(MemberModes::OWNER));
        assert_eq!(f.privilege_for_mode('v'), Some(MemberModes::VOICE));
        assert!(f.is_channel("#babel"));
        assert!(f.is_channel("&local"));
        assert!(!f.is_channel("alice"));
    }

    #[test]
    fn test_apply_prefix_and_chantypes() {
        let mut f = ServerFeatures::default();
        f.apply_isupport(["PREFIX=(ov)@+", "CHANTYPES=#", "NETWORK=Example"]);
        assert_eq!(f.privilege_for_symbol('@'), Some(MemberModes::OP));
        assert_eq!(f.privilege_for_symbol('~'), None);
        assert!(!f.is_channel("&local"));
    }

    #[test]
    fn test_mode_argument_rules() {
        let mut f = ServerFeatures::default();
        f.apply_isupport(["CHANMODES=beI,k,lj,imnpst"]);
        assert!(f.mode_takes_arg('o', true));
        assert!(f.mode_takes_arg('o', false));
        assert!(f.mode_takes_arg('b', false));
        assert!(f.mode_takes_arg('k', false));
        assert!(f.mode_takes_arg('l', true));
        assert!(!f.mode_takes_arg('l', false));
        assert!(!f.mode_takes_arg('m', true));
    }

    #[test]
    fn test_malformed_prefix_keeps_previous() {
        let mut f = ServerFeatures::default();
        f.apply_isupport(["PREFIX=garbage"]);
        assert_eq!(f.privilege_for_symbol('@'), Some(MemberModes::OP));
    }
}
