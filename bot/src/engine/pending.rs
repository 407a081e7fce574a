use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

/// A gift command seen in a channel, waiting for the companion bot to
/// confirm or reject it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIntent {
    pub channel_id: String,
    pub requester_id: String,
    /// Name used to mention the requester in notices.
    pub requester_name: String,
    pub amount: u64,
    pub created_at: DateTime<Utc>,
    /// Insertion order, breaks ties between intents created in the same instant.
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IntentKey {
    channel_id: String,
    requester_id: String,
}

/// Short-lived gift intents keyed by (channel, requester).
///
/// An intent is live while its age is at most `window`. Older intents are
/// never matched and are dropped either lazily when their channel is
/// resolved or by `sweep`.
#[derive(Debug)]
pub struct PendingIntents {
    intents: HashMap<IntentKey, PendingIntent>,
    window: TimeDelta,
    next_seq: u64,
}

impl PendingIntents {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            intents: HashMap::new(),
            window,
            next_seq: 0,
        }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn get(&self, channel_id: &str, requester_id: &str) -> Option<&PendingIntent> {
        self.intents.get(&IntentKey {
            channel_id: channel_id.to_string(),
            requester_id: requester_id.to_string(),
        })
    }

    /// Store an intent, replacing any earlier one by the same requester in the
    /// same channel. Returns the replaced intent.
    pub fn record(
        &mut self,
        channel_id: &str,
        requester_id: &str,
        requester_name: &str,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Option<PendingIntent> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let key = IntentKey {
            channel_id: channel_id.to_string(),
            requester_id: requester_id.to_string(),
        };
        let intent = PendingIntent {
            channel_id: key.channel_id.clone(),
            requester_id: key.requester_id.clone(),
            requester_name: requester_name.to_string(),
            amount,
            created_at: now,
            seq,
        };
        self.intents.insert(key, intent)
    }

    /// Remove and return the most recent live intent in `channel_id`.
    /// Expired intents in that channel are discarded along the way.
    pub fn take_latest(&mut self, channel_id: &str, now: DateTime<Utc>) -> Option<PendingIntent> {
        let window = self.window;
        self.intents
            .retain(|k, p| k.channel_id != channel_id || is_live(p, now, window));

        let key = self
            .intents
            .iter()
            .filter(|(k, _)| k.channel_id == channel_id)
            .max_by_key(|(_, p)| (p.created_at, p.seq))
            .map(|(k, _)| k.clone())?;

        self.intents.remove(&key)
    }

    /// Drop every intent older than the window. Returns how many were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let window = self.window;
        let before = self.intents.len();
        self.intents.retain(|_, p| is_live(p, now, window));
        before - self.intents.len()
    }
}

/// Intents stamped slightly in the future (clock adjustments) count as live.
fn is_live(intent: &PendingIntent, now: DateTime<Utc>, window: TimeDelta) -> bool {
    now.signed_duration_since(intent.created_at) <= window
}
