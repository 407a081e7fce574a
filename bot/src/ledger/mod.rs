use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub mod store;

/// Goal assigned to a community the first time it is seen.
pub const DEFAULT_GOAL: u64 = 120;

/// Persisted donation progress for one community.
///
/// Files written by the first version of the bot used `meta` for the goal;
/// that name is still accepted on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityState {
    pub total: u64,
    #[serde(alias = "meta", deserialize_with = "deserialize_goal")]
    pub goal: u64,
    #[serde(default)]
    pub announce_channel_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
}

/// A stored goal of zero would make every donation a milestone.
fn deserialize_goal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(u64::deserialize(deserializer)?.max(1))
}

/// Result of applying a confirmed donation to a community.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DonationOutcome {
    /// Total right after the donation was added, before any milestone reset.
    pub reached_total: u64,
    pub goal: u64,
    pub remaining: u64,
    /// The goal was reached and the total has been reset to zero.
    pub milestone: bool,
}

impl CommunityState {
    pub fn new(goal: u64, now: DateTime<Utc>) -> Self {
        Self {
            total: 0,
            goal: goal.max(1),
            announce_channel_id: None,
            last_updated: now,
        }
    }

    /// Emperiums still missing to reach the goal (never negative).
    pub fn remaining(&self) -> u64 {
        self.goal.saturating_sub(self.total)
    }

    pub fn set_total(&mut self, total: u64, now: DateTime<Utc>) {
        self.total = total;
        self.last_updated = now;
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.total = 0;
        self.last_updated = now;
    }

    pub fn set_announce_channel(&mut self, channel_id: String, now: DateTime<Utc>) {
        self.announce_channel_id = Some(channel_id);
        self.last_updated = now;
    }

    /// Add a confirmed donation. Reaching the goal resets the total to zero;
    /// the goal does not accumulate across cycles.
    pub fn add_donation(&mut self, amount: u64, now: DateTime<Utc>) -> DonationOutcome {
        self.total = self.total.saturating_add(amount);
        self.last_updated = now;

        let outcome = DonationOutcome {
            reached_total: self.total,
            goal: self.goal,
            remaining: self.remaining(),
            milestone: self.total >= self.goal,
        };
        if outcome.milestone {
            self.total = 0;
        }
        outcome
    }
}

/// Every community's progress, stored as a single document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default, alias = "guilds")]
    pub communities: BTreeMap<String, CommunityState>,
}

impl Ledger {
    pub fn community(&self, community_id: &str) -> Option<&CommunityState> {
        self.communities.get(community_id)
    }

    /// Fetch a community's state, creating it with `default_goal` on first access.
    pub fn community_mut(
        &mut self,
        community_id: &str,
        default_goal: u64,
        now: DateTime<Utc>,
    ) -> &mut CommunityState {
        self.communities
            .entry(community_id.to_string())
            .or_insert_with(|| CommunityState::new(default_goal, now))
    }
}
