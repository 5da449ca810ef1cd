//! Moderation policy.
//!
//! Runs one message through the pipeline:
//!
//! 1. Scope: group chats only, not the bot's own messages, and only where the
//!    bot is admin.
//! 2. Detection on the trimmed body.
//! 3. Admin exemption, before anything is touched. Roles are re-read from
//!    the gateway at this point.
//! 4. Deletion (for everyone, else for the bot).
//! 5. Strike increment and warning.
//! 6. Removal at the threshold, then strike reset.
//!
//! Steps 4-6 are each best-effort: a failed step is logged and the pipeline
//! carries on, nothing is rolled back.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::deletion::{DeletionReport, delete_message};
use super::{AllowReason, KeyedLocks, ModerationConfig, ModerationDecision};
use crate::detector::{DetectorError, LinkDetector};
use crate::gateway::{ChatGateway, GatewayError, IncomingMessage, with_timeout};
use crate::permissions::Permissions;
use crate::store::StrikeStore;
use crate::utils::{fill, mention};

/// Result of running one message through the policy.
#[derive(Debug)]
pub struct ModerationOutcome {
    pub decision: ModerationDecision,
    pub deletion: Option<DeletionReport>,
    /// Strike count after the increment.
    pub strikes: Option<u32>,
    #[allow(dead_code)]
    pub warning: Option<Result<(), GatewayError>>,
    #[allow(dead_code)]
    pub removal: Option<Result<(), GatewayError>>,
}

impl ModerationOutcome {
    fn allow(reason: AllowReason) -> Self {
        Self {
            decision: ModerationDecision::Allow(reason),
            deletion: None,
            strikes: None,
            warning: None,
            removal: None,
        }
    }
}

pub struct ModerationPolicy<G: ChatGateway> {
    config: ModerationConfig,
    detector: LinkDetector,
    gateway: Arc<G>,
    permissions: Arc<Permissions<G>>,
    store: Arc<StrikeStore>,
    /// Serializes the pipeline per sender across groups.
    locks: KeyedLocks,
}

impl<G: ChatGateway> ModerationPolicy<G> {
    /// Build the policy, compiling the configured link pattern.
    pub fn new(
        config: ModerationConfig,
        gateway: Arc<G>,
        permissions: Arc<Permissions<G>>,
        store: Arc<StrikeStore>,
    ) -> Result<Self, DetectorError> {
        let detector = LinkDetector::new(&config.link_pattern, &config.allowlist)?;
        debug!("Link detector ready, {} allowed domains", detector.allowlist().len());

        Ok(Self {
            config,
            detector,
            gateway,
            permissions,
            store,
            locks: KeyedLocks::new(),
        })
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    /// Whether `text` carries a link this policy blocks.
    pub fn blocks(&self, text: &str) -> bool {
        self.detector.is_blocked(Some(text))
    }

    /// Run a message through the pipeline.
    ///
    /// Only an unknown bot identity is an error; gateway failures inside the
    /// pipeline are recorded in the outcome.
    pub async fn handle(&self, msg: &IncomingMessage) -> anyhow::Result<ModerationOutcome> {
        if !msg.chat_id.is_group() {
            return Ok(ModerationOutcome::allow(AllowReason::NotGroup));
        }
        if msg.from_me {
            return Ok(ModerationOutcome::allow(AllowReason::FromSelf));
        }

        let chat = match self.permissions.chat(&msg.chat_id).await {
            Ok(chat) => chat,
            Err(e) => {
                warn!("Could not fetch metadata for {}: {}", msg.chat_id, e);
                return Ok(ModerationOutcome::allow(AllowReason::MetadataUnavailable));
            }
        };
        if !chat.is_group {
            return Ok(ModerationOutcome::allow(AllowReason::NotGroup));
        }

        let me = self.permissions.bot_id().await?;
        if msg.sender.same_user(&me) {
            return Ok(ModerationOutcome::allow(AllowReason::FromSelf));
        }
        if !chat.is_admin(&me) {
            debug!("Bot is not admin in {}, skipping", msg.chat_id);
            return Ok(ModerationOutcome::allow(AllowReason::BotNotAdmin));
        }

        let Some(text) = msg.text() else {
            return Ok(ModerationOutcome::allow(AllowReason::NoText));
        };
        if !self.blocks(text) {
            return Ok(ModerationOutcome::allow(AllowReason::NoLink));
        }

        // Roles decide what happens next; don't act on a stale copy.
        let chat = match self.permissions.refresh(&msg.chat_id).await {
            Ok(chat) => chat,
            Err(e) => {
                warn!("Could not refresh metadata for {}: {}", msg.chat_id, e);
                return Ok(ModerationOutcome::allow(AllowReason::MetadataUnavailable));
            }
        };
        if !chat.is_admin(&me) {
            debug!("Bot is no longer admin in {}, skipping", msg.chat_id);
            return Ok(ModerationOutcome::allow(AllowReason::BotNotAdmin));
        }

        if self.config.admins_exempt && chat.is_admin(&msg.sender) {
            debug!("Admin {} posted a link in {}, exempt", msg.sender, msg.chat_id);
            return Ok(ModerationOutcome::allow(AllowReason::ExemptAdmin));
        }

        let _guard = self.locks.lock(msg.sender.user()).await;
        Ok(self.enforce(msg).await)
    }

    /// Steps 4-6 for a confirmed violation.
    async fn enforce(&self, msg: &IncomingMessage) -> ModerationOutcome {
        info!("Blocked link from {} in {}", msg.sender, msg.chat_id);

        let deletion = delete_message(self.gateway.as_ref(), msg, self.config.gateway_timeout).await;

        let strikes = self.store.increment(msg.sender.user());
        let threshold = self.config.strike_threshold;
        let decision = ModerationDecision::for_strikes(strikes, threshold);
        info!("User {} in {} has {}/{} strikes", msg.sender, msg.chat_id, strikes, threshold);

        let warning = self.send_warning(msg, strikes).await;

        let removal = if decision.removes() {
            Some(self.remove_sender(msg).await)
        } else {
            None
        };

        ModerationOutcome {
            decision,
            deletion: Some(deletion),
            strikes: Some(strikes),
            warning: Some(warning),
            removal,
        }
    }

    async fn send_warning(&self, msg: &IncomingMessage, strikes: u32) -> Result<(), GatewayError> {
        let who = mention(&msg.sender);
        let count = strikes.to_string();
        let threshold = self.config.strike_threshold.to_string();
        let text = fill(
            &self.config.warning_template,
            &[
                ("mention", who.as_str()),
                ("count", count.as_str()),
                ("threshold", threshold.as_str()),
            ],
        );

        let result = with_timeout(
            self.config.gateway_timeout,
            self.gateway
                .send_message(&msg.chat_id, &text, std::slice::from_ref(&msg.sender)),
        )
        .await;

        if let Err(e) = &result {
            warn!("Failed to send warning to {} in {}: {}", msg.sender, msg.chat_id, e);
        }
        result
    }

    /// Remove the sender and clear their strikes.
    ///
    /// Strikes are cleared on any terminal outcome, so a failed removal is
    /// not retried on every later message.
    async fn remove_sender(&self, msg: &IncomingMessage) -> Result<(), GatewayError> {
        let result = with_timeout(
            self.config.gateway_timeout,
            self.gateway
                .remove_participants(&msg.chat_id, std::slice::from_ref(&msg.sender)),
        )
        .await;

        self.store.reset(msg.sender.user());
        self.permissions.invalidate(&msg.chat_id);

        match &result {
            Ok(()) => {
                info!("Removed {} from {} after reaching the strike limit", msg.sender, msg.chat_id);
                self.send_removal_notice(msg).await;
            }
            Err(e) => {
                warn!("Failed to remove {} from {}: {}", msg.sender, msg.chat_id, e);
            }
        }
        result
    }

    async fn send_removal_notice(&self, msg: &IncomingMessage) {
        let who = mention(&msg.sender);
        let text = fill(&self.config.removal_template, &[("mention", who.as_str())]);
        let result = with_timeout(
            self.config.gateway_timeout,
            self.gateway
                .send_message(&msg.chat_id, &text, std::slice::from_ref(&msg.sender)),
        )
        .await;

        if let Err(e) = result {
            warn!("Failed to announce removal in {}: {}", msg.chat_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::gateway::mock::{Call, MockGateway};
    use crate::gateway::{ChatId, MessageId, Role, UserId};
    use crate::moderation::deletion::DeletionTier;
    use crate::store::{JsonFileBackend, MemoryBackend};

    const GROUP: &str = "120363000000000000@g.us";
    const BOT: &str = "5511000000000@c.us";
    const USER: &str = "5511999990000@c.us";
    const ADMIN: &str = "5511888880000@c.us";
    /// Strike keys are the number part of the id.
    const USER_KEY: &str = "5511999990000";
    const ADMIN_KEY: &str = "5511888880000";

    struct Harness {
        gateway: Arc<MockGateway>,
        backend: Arc<MemoryBackend>,
        store: Arc<StrikeStore>,
        policy: ModerationPolicy<MockGateway>,
    }

    fn config(threshold: u32, admins_exempt: bool) -> ModerationConfig {
        ModerationConfig {
            strike_threshold: threshold,
            admins_exempt,
            warning_template: "warn {mention} {count}/{threshold}".into(),
            removal_template: "bye {mention}".into(),
            ..ModerationConfig::for_lang("en")
        }
    }

    fn standard_group(gateway: MockGateway) -> MockGateway {
        gateway.with_group(
            GROUP,
            &[(BOT, Role::Admin), (USER, Role::Member), (ADMIN, Role::SuperAdmin)],
        )
    }

    fn harness(gateway: MockGateway, config: ModerationConfig) -> Harness {
        let backend = Arc::new(MemoryBackend::default());
        let store = Arc::new(StrikeStore::open(backend.clone()));
        harness_with_store(gateway, config, backend, store)
    }

    fn harness_with_store(
        gateway: MockGateway,
        config: ModerationConfig,
        backend: Arc<MemoryBackend>,
        store: Arc<StrikeStore>,
    ) -> Harness {
        let gateway = Arc::new(gateway);
        let timeout = config.gateway_timeout;
        let permissions = Arc::new(Permissions::new(gateway.clone(), timeout));
        let policy =
            ModerationPolicy::new(config, gateway.clone(), permissions, store.clone()).unwrap();
        Harness { gateway, backend, store, policy }
    }

    fn message(id: &str, sender: &str, body: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            id: MessageId::new(id),
            chat_id: ChatId::new(GROUP),
            sender: UserId::new(sender),
            from_me: false,
            body: body.map(str::to_string),
            mentions: Vec::new(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_two_strikes_remove_the_user() {
        let h = harness(standard_group(MockGateway::new(BOT)), config(2, true));

        let first = h
            .policy
            .handle(&message("m1", USER, Some("check this out http://spam.example")))
            .await
            .unwrap();
        assert_eq!(first.decision, ModerationDecision::DeleteAndWarn);
        assert_eq!(first.strikes, Some(1));
        assert_eq!(h.backend.persisted(USER_KEY), Some(1));

        let second = h
            .policy
            .handle(&message("m2", USER, Some("again www.spam.io")))
            .await
            .unwrap();
        assert_eq!(second.decision, ModerationDecision::DeleteWarnAndRemove);
        assert_eq!(second.strikes, Some(2));
        assert!(matches!(second.removal, Some(Ok(()))));
        assert_eq!(h.store.get(USER_KEY), 0);
        assert_eq!(h.backend.persisted(USER_KEY), None);

        let user = UserId::new(USER);
        assert_eq!(
            h.gateway.calls(),
            vec![
                Call::Delete { message: MessageId::new("m1"), for_everyone: true },
                Call::Send {
                    chat: ChatId::new(GROUP),
                    text: "warn @5511999990000 1/2".into(),
                    mentions: vec![user.clone()],
                },
                Call::Delete { message: MessageId::new("m2"), for_everyone: true },
                Call::Send {
                    chat: ChatId::new(GROUP),
                    text: "warn @5511999990000 2/2".into(),
                    mentions: vec![user.clone()],
                },
                Call::Remove { chat: ChatId::new(GROUP), users: vec![user.clone()] },
                Call::Send {
                    chat: ChatId::new(GROUP),
                    text: "bye @5511999990000".into(),
                    mentions: vec![user],
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_exempt_admin_is_left_alone() {
        let h = harness(standard_group(MockGateway::new(BOT)), config(2, true));

        let outcome = h
            .policy
            .handle(&message("m1", ADMIN, Some("https://admin.example/news")))
            .await
            .unwrap();

        assert_eq!(outcome.decision, ModerationDecision::Allow(AllowReason::ExemptAdmin));
        assert!(h.gateway.calls().is_empty());
        assert_eq!(h.store.get(ADMIN_KEY), 0);
    }

    #[tokio::test]
    async fn test_admins_get_strikes_when_not_exempt() {
        let h = harness(standard_group(MockGateway::new(BOT)), config(3, false));

        let outcome = h
            .policy
            .handle(&message("m1", ADMIN, Some("https://admin.example/news")))
            .await
            .unwrap();

        assert_eq!(outcome.decision, ModerationDecision::DeleteAndWarn);
        assert_eq!(h.store.get(ADMIN_KEY), 1);
    }

    #[tokio::test]
    async fn test_bot_without_admin_does_nothing() {
        let gateway = MockGateway::new(BOT)
            .with_group(GROUP, &[(BOT, Role::Member), (USER, Role::Member)]);
        let h = harness(gateway, config(1, true));

        let outcome = h
            .policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();

        assert_eq!(outcome.decision, ModerationDecision::Allow(AllowReason::BotNotAdmin));
        assert!(h.gateway.calls().is_empty());
        assert!(h.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_scope_messages() {
        let h = harness(standard_group(MockGateway::new(BOT)), config(1, true));

        let mut direct = message("m1", USER, Some("http://spam.example"));
        direct.chat_id = ChatId::new(USER);
        let outcome = h.policy.handle(&direct).await.unwrap();
        assert_eq!(outcome.decision, ModerationDecision::Allow(AllowReason::NotGroup));

        let mut own = message("m2", BOT, Some("http://spam.example"));
        own.from_me = true;
        let outcome = h.policy.handle(&own).await.unwrap();
        assert_eq!(outcome.decision, ModerationDecision::Allow(AllowReason::FromSelf));

        let outcome = h.policy.handle(&message("m3", USER, None)).await.unwrap();
        assert_eq!(outcome.decision, ModerationDecision::Allow(AllowReason::NoText));

        let outcome = h.policy.handle(&message("m4", USER, Some("   "))).await.unwrap();
        assert_eq!(outcome.decision, ModerationDecision::Allow(AllowReason::NoText));

        let outcome = h
            .policy
            .handle(&message("m5", USER, Some("no links here")))
            .await
            .unwrap();
        assert_eq!(outcome.decision, ModerationDecision::Allow(AllowReason::NoLink));

        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_chat_is_skipped() {
        let h = harness(MockGateway::new(BOT), config(1, true));

        let outcome = h
            .policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();
        assert_eq!(
            outcome.decision,
            ModerationDecision::Allow(AllowReason::MetadataUnavailable)
        );
    }

    #[tokio::test]
    async fn test_departed_sender_is_not_admin() {
        let h = harness(standard_group(MockGateway::new(BOT)), config(3, true));

        let outcome = h
            .policy
            .handle(&message("m1", "5511777770000@c.us", Some("http://spam.example")))
            .await
            .unwrap();

        assert_eq!(outcome.decision, ModerationDecision::DeleteAndWarn);
        assert_eq!(h.store.get("5511777770000"), 1);
    }

    #[tokio::test]
    async fn test_allowlisted_domain_passes() {
        let config = ModerationConfig {
            allowlist: vec!["meusite.com".into()],
            ..config(2, true)
        };
        let h = harness(standard_group(MockGateway::new(BOT)), config);

        let outcome = h
            .policy
            .handle(&message("m1", USER, Some("docs at https://MEUSITE.com/faq")))
            .await
            .unwrap();
        assert_eq!(outcome.decision, ModerationDecision::Allow(AllowReason::NoLink));
    }

    #[tokio::test]
    async fn test_failed_delete_for_everyone_falls_back_and_continues() {
        let gateway = standard_group(MockGateway {
            reject_delete_for_everyone: true,
            ..MockGateway::new(BOT)
        });
        let h = harness(gateway, config(3, true));

        let outcome = h
            .policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();

        let deletion = outcome.deletion.unwrap();
        assert_eq!(deletion.tiers(), vec![DeletionTier::ForEveryone, DeletionTier::ForMe]);
        assert_eq!(deletion.deleted_by(), Some(DeletionTier::ForMe));
        assert_eq!(outcome.strikes, Some(1));
        assert!(matches!(outcome.warning, Some(Ok(()))));
    }

    #[tokio::test]
    async fn test_failed_warning_still_escalates() {
        let gateway = standard_group(MockGateway {
            reject_send: true,
            ..MockGateway::new(BOT)
        });
        let h = harness(gateway, config(1, true));

        let outcome = h
            .policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();

        assert!(matches!(outcome.warning, Some(Err(_))));
        assert!(matches!(outcome.removal, Some(Ok(()))));
    }

    #[tokio::test]
    async fn test_failed_removal_still_clears_strikes() {
        let gateway = standard_group(MockGateway {
            reject_remove: true,
            ..MockGateway::new(BOT)
        });
        let h = harness(gateway, config(1, true));

        let outcome = h
            .policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();

        assert!(matches!(outcome.removal, Some(Err(GatewayError::Rejected { .. }))));
        assert_eq!(h.store.get(USER_KEY), 0);
        // No removal notice after a failed removal.
        assert_eq!(h.gateway.sent_texts(), vec!["warn @5511999990000 1/1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_removal_times_out() {
        let gateway = standard_group(MockGateway {
            stall_remove: true,
            ..MockGateway::new(BOT)
        });
        let config = ModerationConfig {
            gateway_timeout: Duration::from_secs(5),
            ..config(1, true)
        };
        let h = harness(gateway, config);

        let outcome = h
            .policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();

        assert!(matches!(outcome.removal, Some(Err(GatewayError::Timeout(_)))));
        assert_eq!(h.store.get(USER_KEY), 0);
    }

    #[tokio::test]
    async fn test_corrupt_store_still_moderates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strikes.json");
        std::fs::write(&path, "{\"broken\":").unwrap();

        let store = Arc::new(StrikeStore::open(Arc::new(JsonFileBackend::new(&path))));
        let h = harness_with_store(
            standard_group(MockGateway::new(BOT)),
            config(2, true),
            Arc::new(MemoryBackend::default()),
            store,
        );

        let outcome = h
            .policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();
        assert_eq!(outcome.strikes, Some(1));
        assert_eq!(StrikeStore::open(Arc::new(JsonFileBackend::new(&path))).get(USER_KEY), 1);
    }

    #[tokio::test]
    async fn test_same_user_in_two_groups_does_not_race() {
        const OTHER: &str = "120363111111111111@g.us";
        let gateway = standard_group(MockGateway::new(BOT))
            .with_group(OTHER, &[(BOT, Role::Admin), (USER, Role::Member)]);
        let h = Arc::new(harness(gateway, config(10, true)));

        let mut tasks = Vec::new();
        for i in 0..6 {
            let h = h.clone();
            tasks.push(tokio::spawn(async move {
                let mut msg = message(&format!("m{i}"), USER, Some("http://spam.example"));
                if i % 2 == 1 {
                    msg.chat_id = ChatId::new(OTHER);
                }
                h.policy.handle(&msg).await.unwrap().strikes
            }));
        }

        let mut counts = Vec::new();
        for task in tasks {
            counts.push(task.await.unwrap().unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(h.backend.persisted(USER_KEY), Some(6));
    }

    #[tokio::test]
    async fn test_demoted_bot_stops_moderating() {
        let h = harness(standard_group(MockGateway::new(BOT)), config(3, true));

        let first = h
            .policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();
        assert_eq!(first.decision, ModerationDecision::DeleteAndWarn);

        h.gateway.set_role(GROUP, BOT, Role::Member);
        let calls_before = h.gateway.calls().len();

        let second = h
            .policy
            .handle(&message("m2", USER, Some("http://spam.example")))
            .await
            .unwrap();
        assert_eq!(second.decision, ModerationDecision::Allow(AllowReason::BotNotAdmin));
        assert_eq!(h.gateway.calls().len(), calls_before);
        assert_eq!(h.store.get(USER_KEY), 1);
    }

    #[tokio::test]
    async fn test_promoted_sender_becomes_exempt() {
        let h = harness(standard_group(MockGateway::new(BOT)), config(3, true));

        h.policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();
        h.gateway.set_role(GROUP, USER, Role::Admin);

        let outcome = h
            .policy
            .handle(&message("m2", USER, Some("http://spam.example")))
            .await
            .unwrap();
        assert_eq!(outcome.decision, ModerationDecision::Allow(AllowReason::ExemptAdmin));
        assert_eq!(h.store.get(USER_KEY), 1);
    }

    #[tokio::test]
    async fn test_undeletable_message_still_counts() {
        let gateway = standard_group(MockGateway {
            reject_delete_for_everyone: true,
            reject_delete_for_me: true,
            ..MockGateway::new(BOT)
        });
        let h = harness(gateway, config(3, true));

        let outcome = h
            .policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();

        let deletion = outcome.deletion.unwrap();
        assert_eq!(deletion.deleted_by(), None);
        assert_eq!(deletion.attempts.len(), 2);
        assert_eq!(outcome.strikes, Some(1));
        assert!(matches!(outcome.warning, Some(Ok(()))));
        assert_eq!(h.gateway.sent_texts(), vec!["warn @5511999990000 1/3".to_string()]);
    }

    #[tokio::test]
    async fn test_strikes_follow_the_number_across_servers() {
        let gateway = standard_group(MockGateway::new(BOT));
        let h = harness(gateway, config(3, true));

        h.policy
            .handle(&message("m1", USER, Some("http://spam.example")))
            .await
            .unwrap();
        let outcome = h
            .policy
            .handle(&message("m2", "5511999990000@s.whatsapp.net", Some("http://spam.example")))
            .await
            .unwrap();

        assert_eq!(outcome.strikes, Some(2));
        assert_eq!(h.store.snapshot().len(), 1);
    }

    #[test]
    fn test_invalid_pattern_fails_construction() {
        let gateway = Arc::new(MockGateway::new(BOT));
        let permissions = Arc::new(Permissions::new(gateway.clone(), Duration::from_secs(1)));
        let store = Arc::new(StrikeStore::open(Arc::new(MemoryBackend::default())));
        let config = ModerationConfig {
            link_pattern: "[".into(),
            ..ModerationConfig::for_lang("en")
        };

        assert!(ModerationPolicy::new(config, gateway, permissions, store).is_err());
    }
}
