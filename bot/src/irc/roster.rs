use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use dashmap::DashMap;

use super::isupport::ServerFeatures;

bitflags! {
    /// Channel privileges a member holds, from IRC prefix modes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemberModes: u8 {
        const VOICE   = 1 << 0;
        const HALFOP  = 1 << 1;
        const OP      = 1 << 2;
        const ADMIN   = 1 << 3;
        const OWNER   = 1 << 4;
    }
}

/// Privileges allowed to run `set`, `reset` and `setchannel`.
pub const ELEVATED: MemberModes = MemberModes::OP
    .union(MemberModes::ADMIN)
    .union(MemberModes::OWNER);

impl MemberModes {
    /// Conventional meaning of a prefix mode letter. Unknown letters map to
    /// no privilege.
    pub fn from_mode_char(mode: char) -> Self {
        match mode {
            'v' => MemberModes::VOICE,
            'h' => MemberModes::HALFOP,
            'o' => MemberModes::OP,
            'a' => MemberModes::ADMIN,
            'q' => MemberModes::OWNER,
            _ => MemberModes::empty(),
        }
    }

    pub fn is_elevated(self) -> bool {
        self.intersects(ELEVATED)
    }
}

/// Live view of the network: which channels the bot sits in, who is in them
/// and with what privileges. Shared between the IRC task and the status
/// endpoint.
///
/// Channel and nick keys are ASCII-lowercased.
#[derive(Debug, Default)]
pub struct NetworkState {
    channels: DashMap<String, HashMap<String, MemberModes>>,
    connected: AtomicBool,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if !connected {
            self.channels.clear();
        }
    }

    /// Channels the bot has joined, sorted.
    pub fn joined_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    pub fn member_count(&self, channel: &str) -> usize {
        self.channels
            .get(&key(channel))
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub fn modes(&self, channel: &str, nick: &str) -> MemberModes {
        self.channels
            .get(&key(channel))
            .and_then(|c| c.get(&key(nick)).copied())
            .unwrap_or(MemberModes::empty())
    }

    pub fn is_elevated(&self, channel: &str, nick: &str) -> bool {
        self.modes(channel, nick).is_elevated()
    }

    /// Record a JOIN. When the bot itself joins, the channel entry is reset.
    pub fn join(&self, channel: &str, nick: &str, is_self: bool) {
        let mut members = self.channels.entry(key(channel)).or_default();
        if is_self {
            members.clear();
        }
        members.insert(key(nick), MemberModes::empty());
    }

    /// Record a PART or KICK. When the bot leaves, the channel is forgotten.
    pub fn part(&self, channel: &str, nick: &str, is_self: bool) {
        if is_self {
            self.channels.remove(&key(channel));
        } else if let Some(mut members) = self.channels.get_mut(&key(channel)) {
            members.remove(&key(nick));
        }
    }

    pub fn quit(&self, nick: &str) {
        let nick = key(nick);
        for mut members in self.channels.iter_mut() {
            members.remove(&nick);
        }
    }

    pub fn rename(&self, old_nick: &str, new_nick: &str) {
        let (old, new) = (key(old_nick), key(new_nick));
        for mut members in self.channels.iter_mut() {
            if let Some(modes) = members.remove(&old) {
                members.insert(new.clone(), modes);
            }
        }
    }

    /// Apply one RPL_NAMREPLY member list (`@alice +bob carol`). Multiple
    /// prefix symbols per entry are understood (multi-prefix).
    pub fn apply_names(&self, channel: &str, entries: &str, features: &ServerFeatures) {
        let mut members = self.channels.entry(key(channel)).or_default();
        for entry in entries.split_whitespace() {
            let mut modes = MemberModes::empty();
            let mut nick = entry;
            while let Some(c) = nick.chars().next() {
                match features.privilege_for_symbol(c) {
                    Some(p) => {
                        modes |= p;
                        nick = &nick[c.len_utf8()..];
                    }
                    None => break,
                }
            }
            // userhost-in-names entries carry `nick!user@host`
            let nick = nick.split('!').next().unwrap_or(nick);
            if !nick.is_empty() {
                members.insert(key(nick), modes);
            }
        }
    }

    /// Apply a channel MODE change such as `+ov-v alice bob carol`.
    pub fn apply_mode(&self, channel: &str, change: &str, args: &[String], features: &ServerFeatures) {
        let Some(mut members) = self.channels.get_mut(&key(channel)) else {
            return;
        };
        let mut args = args.iter();
        let mut adding = true;

        for c in change.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                mode => {
                    if !features.mode_takes_arg(mode, adding) {
                        continue;
                    }
                    let Some(arg) = args.next() else {
                        break;
                    };
                    let Some(privilege) = features.privilege_for_mode(mode) else {
                        continue;
                    };
                    let entry = members.entry(key(arg)).or_insert(MemberModes::empty());
                    if adding {
                        *entry |= privilege;
                    } else {
                        *entry &= !privilege;
                    }
                }
            }
        }
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_names(names: &str) -> NetworkState {
        let s = NetworkState::new();
        s.join("#babel", "BabelBot", true);
        s.apply_names("#babel", names, &ServerFeatures::default());
        s
    }

    #[test]
    fn test_names_prefixes() {
        let s = state_with_names("@Alice +bob %carol ~dave &erin frank");
        assert!(s.is_elevated("#babel", "alice"));
        assert!(s.is_elevated("#BABEL", "ALICE"));
        assert!(!s.is_elevated("#babel", "bob"));
        assert!(!s.is_elevated("#babel", "carol"));
        assert!(s.is_elevated("#babel", "dave"));
        assert!(s.is_elevated("#babel", "erin"));
        assert!(!s.is_elevated("#babel", "frank"));
        assert_eq!(s.modes("#babel", "bob"), MemberModes::VOICE);
        assert_eq!(s.member_count("#babel"), 7);
    }

    #[test]
    fn test_multi_prefix_and_userhost_names() {
        let s = state_with_names("@+alice!a@host");
        assert_eq!(
            s.modes("#babel", "alice"),
            MemberModes::OP | MemberModes::VOICE
        );
    }

    #[test]
    fn test_mode_changes() {
        let s = state_with_names("alice bob");
        let f = ServerFeatures::default();
        s.apply_mode("#babel", "+o", &["alice".into()], &f);
        assert!(s.is_elevated("#babel", "alice"));

        // `+l 10` consumes an argument before the op change.
        s.apply_mode("#babel", "+lo", &["10".into(), "bob".into()], &f);
        assert!(s.is_elevated("#babel", "bob"));

        s.apply_mode("#babel", "-o+v", &["alice".into(), "alice".into()], &f);
        assert_eq!(s.modes("#babel", "alice"), MemberModes::VOICE);

        // `-l` takes no argument.
        s.apply_mode("#babel", "-lo", &["bob".into()], &f);
        assert!(!s.is_elevated("#babel", "bob"));
    }

    #[test]
    fn test_ban_mask_is_not_a_member() {
        let s = state_with_names("alice");
        s.apply_mode(
            "#babel",
            "+bo",
            &["*!*@spam".into(), "alice".into()],
            &ServerFeatures::default(),
        );
        assert!(s.is_elevated("#babel", "alice"));
        assert_eq!(s.member_count("#babel"), 2);
    }

    #[test]
    fn test_rename_keeps_modes() {
        let s = state_with_names("@alice");
        s.rename("alice", "alicia");
        assert!(s.is_elevated("#babel", "alicia"));
        assert!(!s.is_elevated("#babel", "alice"));
    }

    #[test]
    fn test_part_quit_and_self_part() {
        let s = state_with_names("@alice bob");
        s.part("#babel", "alice", false);
        assert!(!s.is_elevated("#babel", "alice"));
        s.quit("bob");
        assert_eq!(s.member_count("#babel"), 1);
        s.part("#babel", "BabelBot", true);
        assert!(s.joined_channels().is_empty());
    }

    #[test]
    fn test_disconnect_clears_channels() {
        let s = state_with_names("@alice");
        s.set_connected(true);
        assert!(s.is_connected());
        s.set_connected(false);
        assert!(!s.is_connected());
        assert!(s.joined_channels().is_empty());
    }

    #[test]
    fn test_unknown_channel_has_no_privileges() {
        let s = NetworkState::new();
        assert_eq!(s.modes("#nowhere", "alice"), MemberModes::empty());
        s.apply_mode("#nowhere", "+o", &["alice".into()], &ServerFeatures::default());
        assert!(s.joined_channels().is_empty());
    }
}
