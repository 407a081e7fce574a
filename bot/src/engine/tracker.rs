use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::BotConfig;
use crate::ledger::store::{LedgerError, LedgerStore};
use crate::ledger::{CommunityState, DonationOutcome, Ledger};

use super::admin::{self, AdminCommand, AdminError, DEFAULT_CHANNEL_TYPES};
use super::classifier::{PhraseClassifier, Signal, SignalClassifier};
use super::events::{BotAction, Card, IncomingMessage};
use super::gift::GiftMatcher;
use super::pending::{PendingIntent, PendingIntents};

/// Reaction placed on a gift command while it waits for confirmation.
pub const PENDING_REACTION: &str = "⏳";

/// Tunables for [`DonationTracker`].
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub admin_prefix: String,
    pub default_goal: u64,
    /// How long a gift command stays eligible for confirmation.
    pub window: TimeDelta,
    /// Characters that may start a channel name in `setchannel` until the
    /// server advertises its own CHANTYPES.
    pub channel_types: String,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            admin_prefix: "xbabel".into(),
            default_goal: crate::ledger::DEFAULT_GOAL,
            window: TimeDelta::seconds(60),
            channel_types: DEFAULT_CHANNEL_TYPES.into(),
        }
    }
}

/// Correlates gift commands with the companion bot's answers and keeps the
/// per-community ledger. Transport-agnostic: callers feed it messages and
/// render the returned actions.
///
/// A single lock guards the pending intents and every ledger
/// read-modify-write, so a signal resolves at most one intent even when the
/// sweep timer or the status endpoint run concurrently.
pub struct DonationTracker<S> {
    store: S,
    classifier: Box<dyn SignalClassifier>,
    gifts: GiftMatcher,
    options: TrackerOptions,
    channel_types: RwLock<String>,
    pending: Mutex<PendingIntents>,
}

impl<S: LedgerStore> DonationTracker<S> {
    pub fn new(
        store: S,
        classifier: Box<dyn SignalClassifier>,
        gifts: GiftMatcher,
        options: TrackerOptions,
    ) -> Self {
        Self {
            store,
            classifier,
            gifts,
            pending: Mutex::new(PendingIntents::new(options.window)),
            channel_types: RwLock::new(options.channel_types.clone()),
            options,
        }
    }

    pub fn from_config(store: S, config: &BotConfig) -> Self {
        let classifier = PhraseClassifier::new(
            &config.signals.success_phrases,
            &config.signals.failure_phrases,
        );
        let gifts = GiftMatcher::new(
            &config.donations.gift_prefix,
            &config.donations.item_aliases,
        );
        let options = TrackerOptions {
            admin_prefix: config.donations.admin_prefix.trim().to_string(),
            default_goal: config.ledger.default_goal,
            window: TimeDelta::seconds(config.donations.window_secs as i64),
            channel_types: DEFAULT_CHANNEL_TYPES.into(),
        };
        Self::new(store, Box::new(classifier), gifts, options)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    /// Adopt the channel prefixes the connected server accepts.
    pub fn set_channel_types(&self, types: &str) {
        if types.is_empty() {
            return;
        }
        let mut current = self
            .channel_types
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != types {
            debug!(channel_types = types, "channel prefixes updated");
            *current = types.to_string();
        }
    }

    pub fn channel_types(&self) -> String {
        self.channel_types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Entry points ────────────────────────────────────────────────

    pub async fn handle_message(&self, msg: &IncomingMessage) -> Vec<BotAction> {
        self.handle_message_at(msg, Utc::now()).await
    }

    /// Route one channel message: companion answers resolve intents, admin
    /// commands run, gift commands are recorded, anything else is ignored.
    pub async fn handle_message_at(
        &self,
        msg: &IncomingMessage,
        now: DateTime<Utc>,
    ) -> Vec<BotAction> {
        if msg.from_bot {
            let signal = self.classifier.classify(&msg.text);
            return self
                .resolve(&msg.community_id, &msg.channel_id, signal, now)
                .await;
        }

        let channel_types = self.channel_types();
        if let Some(parsed) =
            admin::parse_admin_command(&self.options.admin_prefix, &channel_types, &msg.text)
        {
            return self.handle_admin(msg, parsed, now).await;
        }

        if let Some(amount) = self.gifts.parse_amount(&msg.text) {
            return self.record(msg, amount, now).await;
        }

        Vec::new()
    }

    /// Remember a gift command and acknowledge it with a reaction.
    pub async fn record(
        &self,
        msg: &IncomingMessage,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Vec<BotAction> {
        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.record(
            &msg.channel_id,
            &msg.author_id,
            &msg.author_name,
            amount,
            now,
        ) {
            debug!(
                channel = %msg.channel_id,
                requester = %msg.author_id,
                previous_amount = previous.amount,
                "replaced pending gift"
            );
        }
        info!(
            channel = %msg.channel_id,
            requester = %msg.author_id,
            amount,
            "gift pending confirmation"
        );

        vec![BotAction::React {
            channel: msg.channel_id.clone(),
            nick: msg.author_name.clone(),
            message_id: msg.message_id.clone(),
            emoji: PENDING_REACTION.into(),
        }]
    }

    /// Apply a companion signal to the most recent live intent in the channel.
    pub async fn resolve(
        &self,
        community_id: &str,
        channel_id: &str,
        signal: Signal,
        now: DateTime<Utc>,
    ) -> Vec<BotAction> {
        if signal == Signal::Unrecognized {
            return Vec::new();
        }

        let mut pending = self.pending.lock().await;
        let Some(intent) = pending.take_latest(channel_id, now) else {
            debug!(channel = %channel_id, ?signal, "signal with no pending gift, ignored");
            return Vec::new();
        };

        match signal {
            Signal::Failure => {
                info!(
                    channel = %channel_id,
                    requester = %intent.requester_id,
                    amount = intent.amount,
                    "gift rejected by companion"
                );
                vec![BotAction::Say {
                    channel: intent.channel_id.clone(),
                    text: format!(
                        "❌ {}: no se pudo donar (error del bot).",
                        intent.requester_name
                    ),
                }]
            }
            Signal::Success => self.confirm(community_id, &intent, now).await,
            Signal::Unrecognized => Vec::new(),
        }
    }

    /// Drop expired intents. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.pending.lock().await.sweep(now);
        if removed > 0 {
            debug!(removed, "swept expired gifts");
        }
        removed
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Current ledger contents, read under the tracker lock.
    pub async fn ledger_snapshot(&self) -> Result<Ledger, LedgerError> {
        let _guard = self.pending.lock().await;
        self.store.load().await
    }

    // ── Confirmation ────────────────────────────────────────────────

    /// Caller holds the pending lock.
    async fn confirm(
        &self,
        community_id: &str,
        intent: &PendingIntent,
        now: DateTime<Utc>,
    ) -> Vec<BotAction> {
        let mut ledger = match self.store.load().await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, requester = %intent.requester_id, amount = intent.amount,
                    "failed to load ledger, confirmed gift not counted");
                return Vec::new();
            }
        };

        let state = ledger.community_mut(community_id, self.options.default_goal, now);
        let outcome = state.add_donation(intent.amount, now);
        let announce = state.announce_channel_id.clone();

        if let Err(e) = self.store.save(&ledger).await {
            error!(error = %e, requester = %intent.requester_id, amount = intent.amount,
                "failed to save ledger, confirmed gift not counted");
            return Vec::new();
        }

        info!(
            community = %community_id,
            requester = %intent.requester_id,
            amount = intent.amount,
            total = outcome.reached_total,
            goal = outcome.goal,
            milestone = outcome.milestone,
            "gift confirmed"
        );

        donation_notices(intent, &outcome, announce.as_deref(), now)
    }

    // ── Admin commands ──────────────────────────────────────────────

    async fn handle_admin(
        &self,
        msg: &IncomingMessage,
        parsed: Result<AdminCommand, AdminError>,
        now: DateTime<Utc>,
    ) -> Vec<BotAction> {
        let prefix = &self.options.admin_prefix;
        let privileged = parsed
            .as_ref()
            .map_or(true, AdminCommand::requires_permission);
        if privileged && !msg.is_operator {
            return vec![reply(msg, "⛔ Necesitás permiso de operador.")];
        }

        let command = match parsed {
            Ok(c) => c,
            Err(e) => return vec![reply(msg, &e.usage(prefix))],
        };

        match command {
            AdminCommand::Help => vec![reply(msg, &admin::help_text(prefix))],
            AdminCommand::Status => {
                let ledger = match self.ledger_snapshot().await {
                    Ok(l) => l,
                    Err(e) => {
                        error!(error = %e, "failed to load ledger for status");
                        return Vec::new();
                    }
                };
                let state = ledger
                    .community(&msg.community_id)
                    .cloned()
                    .unwrap_or_else(|| CommunityState::new(self.options.default_goal, now));
                vec![BotAction::Display {
                    channel: msg.channel_id.clone(),
                    card: status_card(&msg.community_id, &state, now),
                }]
            }
            AdminCommand::Set(total) => {
                match self
                    .update_community(&msg.community_id, now, |s| s.set_total(total, now))
                    .await
                {
                    Ok(s) => {
                        info!(community = %msg.community_id, by = %msg.author_id, total, "total set");
                        vec![reply(
                            msg,
                            &format!(
                                "✅ Total establecido en **{}**. Faltan **{}**.",
                                s.total,
                                s.remaining()
                            ),
                        )]
                    }
                    Err(e) => admin_write_failed(&e),
                }
            }
            AdminCommand::Reset => {
                match self
                    .update_community(&msg.community_id, now, |s| s.reset(now))
                    .await
                {
                    Ok(_) => {
                        info!(community = %msg.community_id, by = %msg.author_id, "progress reset");
                        vec![reply(msg, "🧹 Progreso reiniciado.")]
                    }
                    Err(e) => admin_write_failed(&e),
                }
            }
            AdminCommand::SetChannel(channel) => {
                let target = channel.clone();
                match self
                    .update_community(&msg.community_id, now, move |s| {
                        s.set_announce_channel(target, now)
                    })
                    .await
                {
                    Ok(_) => {
                        info!(community = %msg.community_id, by = %msg.author_id, %channel,
                            "announce channel set");
                        vec![reply(
                            msg,
                            &format!("📌 Canal de anuncios establecido en {channel}."),
                        )]
                    }
                    Err(e) => admin_write_failed(&e),
                }
            }
        }
    }

    /// Load, mutate one community, save. Nothing is written if loading fails.
    async fn update_community<F>(
        &self,
        community_id: &str,
        now: DateTime<Utc>,
        apply: F,
    ) -> Result<CommunityState, LedgerError>
    where
        F: FnOnce(&mut CommunityState) + Send,
    {
        let _guard = self.pending.lock().await;
        let mut ledger = self.store.load().await?;
        let state = ledger.community_mut(community_id, self.options.default_goal, now);
        apply(state);
        let updated = state.clone();
        self.store.save(&ledger).await?;
        Ok(updated)
    }
}

fn admin_write_failed(e: &LedgerError) -> Vec<BotAction> {
    error!(error = %e, "admin command aborted, ledger unchanged");
    Vec::new()
}

fn reply(msg: &IncomingMessage, text: &str) -> BotAction {
    BotAction::Say {
        channel: msg.channel_id.clone(),
        text: format!("{}: {}", msg.author_name, text),
    }
}

fn donation_notices(
    intent: &PendingIntent,
    outcome: &DonationOutcome,
    announce_channel: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<BotAction> {
    let who = &intent.requester_name;
    let mut actions = vec![BotAction::Say {
        channel: intent.channel_id.clone(),
        text: format!(
            "💎 {who} aportó **{}** Emperiums para la Torre de Babel!\n📊 Donados: **{}/{}** | Faltan: **{}**",
            intent.amount, outcome.reached_total, outcome.goal, outcome.remaining
        ),
    }];

    if let Some(announce) = announce_channel {
        actions.push(BotAction::Display {
            channel: announce.to_string(),
            card: Card::new("💠 Nueva Donación")
                .description(format!(
                    "{who} ha contribuido con **{}** Emperiums.",
                    intent.amount
                ))
                .inline_field("Donados", outcome.reached_total.to_string())
                .inline_field("Meta", outcome.goal.to_string())
                .inline_field("Faltan", outcome.remaining.to_string())
                .timestamp(now),
        });
    }

    if outcome.milestone {
        actions.push(BotAction::Say {
            channel: announce_channel.unwrap_or(&intent.channel_id).to_string(),
            text: format!(
                "🏛️ **¡LA TORRE DE BABEL SE ABRIÓ!** 🎉\n🔥 Se alcanzaron los **{} Emperiums** necesarios para su apertura.\n✨ ¡Gracias a todos los Nekitos que aportaron, eso rony!",
                outcome.goal
            ),
        });
    }

    actions
}

/// Progress display for `status`.
pub fn status_card(community_name: &str, state: &CommunityState, now: DateTime<Utc>) -> Card {
    let footer = match &state.announce_channel_id {
        Some(channel) => format!("Anunciando en {channel}"),
        None => "Canal de anuncios no configurado".to_string(),
    };
    Card::new("🏛️ Torre de Babel – Progreso")
        .description(format!("Servidor: **{community_name}**"))
        .inline_field("Donados", format!("{} Emperiums", state.total))
        .inline_field("Meta", format!("{} Emperiums", state.goal))
        .inline_field("Faltan", format!("{} Emperiums", state.remaining()))
        .footer(footer)
        .timestamp(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::MemoryStore;

    fn tracker() -> DonationTracker<MemoryStore> {
        DonationTracker::from_config(MemoryStore::default(), &BotConfig::default())
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000, 0).unwrap()
    }

    fn human(nick: &str, text: &str, op: bool) -> IncomingMessage {
        IncomingMessage {
            community_id: "net".into(),
            channel_id: "#babel".into(),
            author_id: nick.into(),
            author_name: nick.into(),
            text: text.into(),
            message_id: Some("m1".into()),
            from_bot: false,
            is_operator: op,
        }
    }

    fn said(actions: &[BotAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                BotAction::Say { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_gift_command_is_acknowledged() {
        let t = tracker();
        let actions = t
            .handle_message_at(&human("alice", "xgift @neko emperium x 10", false), t0())
            .await;
        assert_eq!(
            actions,
            vec![BotAction::React {
                channel: "#babel".into(),
                nick: "alice".into(),
                message_id: Some("m1".into()),
                emoji: PENDING_REACTION.into(),
            }]
        );
        assert_eq!(t.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_non_command_chatter_ignored() {
        let t = tracker();
        assert!(t.handle_message_at(&human("alice", "hola", false), t0()).await.is_empty());
        assert!(
            t.handle_message_at(&human("alice", "xgift neko emperium", false), t0())
                .await
                .is_empty()
        );
        assert_eq!(t.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_status_does_not_need_permission_or_write() {
        let t = tracker();
        let actions = t
            .handle_message_at(&human("alice", "xbabel status", false), t0())
            .await;
        let BotAction::Display { card, channel } = &actions[0] else {
            panic!("expected display, got {actions:?}");
        };
        assert_eq!(channel, "#babel");
        assert_eq!(card.field("Donados"), Some("0 Emperiums"));
        assert_eq!(card.field("Meta"), Some("120 Emperiums"));
        assert_eq!(card.field("Faltan"), Some("120 Emperiums"));
        assert_eq!(card.footer.as_deref(), Some("Canal de anuncios no configurado"));
        assert_eq!(t.store().writes(), 0);
    }

    #[tokio::test]
    async fn test_privileged_commands_need_operator() {
        let t = tracker();
        for cmd in ["xbabel set 10", "xbabel reset", "xbabel setchannel #a", "xbabel set -5"] {
            let actions = t.handle_message_at(&human("bob", cmd, false), t0()).await;
            assert_eq!(said(&actions), vec!["bob: ⛔ Necesitás permiso de operador."]);
        }
        assert_eq!(t.store().writes(), 0);
    }

    #[tokio::test]
    async fn test_set_updates_total() {
        let t = tracker();
        let actions = t
            .handle_message_at(&human("op", "xbabel set 45", true), t0())
            .await;
        assert_eq!(
            said(&actions),
            vec!["op: ✅ Total establecido en **45**. Faltan **75**."]
        );
        let ledger = t.store().snapshot();
        let s = ledger.community("net").unwrap();
        assert_eq!(s.total, 45);
        assert_eq!(s.last_updated, t0());
    }

    #[tokio::test]
    async fn test_set_negative_is_usage_error() {
        let t = tracker();
        t.handle_message_at(&human("op", "xbabel set 30", true), t0()).await;
        let actions = t
            .handle_message_at(&human("op", "xbabel set -5", true), t0())
            .await;
        assert_eq!(said(&actions), vec!["op: ❓ Usá: `xbabel set <numero>`"]);
        assert_eq!(t.store().snapshot().community("net").unwrap().total, 30);
    }

    #[tokio::test]
    async fn test_reset() {
        let t = tracker();
        t.handle_message_at(&human("op", "xbabel set 30", true), t0()).await;
        let actions = t
            .handle_message_at(&human("op", "xbabel reset", true), t0())
            .await;
        assert_eq!(said(&actions), vec!["op: 🧹 Progreso reiniciado."]);
        assert_eq!(t.store().snapshot().community("net").unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_setchannel_without_channel_keeps_previous() {
        let t = tracker();
        t.handle_message_at(&human("op", "xbabel setchannel #anuncios", true), t0())
            .await;
        let actions = t
            .handle_message_at(&human("op", "xbabel setchannel", true), t0())
            .await;
        assert_eq!(said(&actions), vec!["op: 📣 Usá: `xbabel setchannel #canal`"]);
        assert_eq!(
            t.store()
                .snapshot()
                .community("net")
                .unwrap()
                .announce_channel_id
                .as_deref(),
            Some("#anuncios")
        );
    }

    #[tokio::test]
    async fn test_setchannel_follows_server_channel_types() {
        let t = tracker();
        let cmd = human("op", "xbabel setchannel !anuncios", true);
        let actions = t.handle_message_at(&cmd, t0()).await;
        assert_eq!(said(&actions), vec!["op: 📣 Usá: `xbabel setchannel #canal`"]);

        t.set_channel_types("#!+");
        assert_eq!(t.channel_types(), "#!+");
        let actions = t.handle_message_at(&cmd, t0()).await;
        assert_eq!(
            said(&actions),
            vec!["op: 📌 Canal de anuncios establecido en !anuncios."]
        );
        assert_eq!(
            t.store()
                .snapshot()
                .community("net")
                .unwrap()
                .announce_channel_id
                .as_deref(),
            Some("!anuncios")
        );

        // An empty advertisement keeps the known prefixes.
        t.set_channel_types("");
        assert_eq!(t.channel_types(), "#!+");
    }

    #[tokio::test]
    async fn test_help_for_unknown_subcommand() {
        let t = tracker();
        let actions = t
            .handle_message_at(&human("alice", "xbabel dance", false), t0())
            .await;
        assert!(said(&actions)[0].contains("Comandos"));
    }

    #[tokio::test]
    async fn test_admin_write_failure_leaves_ledger_untouched() {
        let t = tracker();
        t.handle_message_at(&human("op", "xbabel set 30", true), t0()).await;
        t.store().set_fail_writes(true);
        let actions = t
            .handle_message_at(&human("op", "xbabel set 90", true), t0())
            .await;
        assert!(actions.is_empty());
        assert_eq!(t.store().snapshot().community("net").unwrap().total, 30);
    }

    #[tokio::test]
    async fn test_unrecognized_signal_keeps_intent() {
        let t = tracker();
        t.record(&human("alice", "", false), 5, t0()).await;
        let actions = t.resolve("net", "#babel", Signal::Unrecognized, t0()).await;
        assert!(actions.is_empty());
        assert_eq!(t.pending_count().await, 1);
    }

    #[test]
    fn test_status_card_footer_with_channel() {
        let mut state = CommunityState::new(120, t0());
        state.total = 100;
        state.announce_channel_id = Some("#anuncios".into());
        let card = status_card("nekos", &state, t0());
        assert_eq!(card.description.as_deref(), Some("Servidor: **nekos**"));
        assert_eq!(card.field("Faltan"), Some("20 Emperiums"));
        assert_eq!(card.footer.as_deref(), Some("Anunciando en #anuncios"));
    }
}
