//! Two-tier message deletion.
//!
//! Deleting for everyone fails on old messages or missing permissions; the
//! fallback deletes the message from the bot's own view. Each tier is tried
//! in order and every attempt is recorded.

use std::time::Duration;

use tracing::warn;

use crate::gateway::{ChatGateway, GatewayError, IncomingMessage, with_timeout};

/// One way of deleting a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionTier {
    ForEveryone,
    ForMe,
}

impl DeletionTier {
    /// Tiers in the order they are tried.
    pub const ORDER: [DeletionTier; 2] = [DeletionTier::ForEveryone, DeletionTier::ForMe];

    fn for_everyone(self) -> bool {
        matches!(self, DeletionTier::ForEveryone)
    }
}

#[derive(Debug)]
pub struct DeletionAttempt {
    pub tier: DeletionTier,
    pub result: Result<(), GatewayError>,
}

/// Every tier tried for one message, in order.
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub attempts: Vec<DeletionAttempt>,
}

impl DeletionReport {
    /// The tier that succeeded, if any.
    pub fn deleted_by(&self) -> Option<DeletionTier> {
        self.attempts
            .iter()
            .find(|a| a.result.is_ok())
            .map(|a| a.tier)
    }

    /// Tiers tried, in order.
    #[allow(dead_code)]
    pub fn tiers(&self) -> Vec<DeletionTier> {
        self.attempts.iter().map(|a| a.tier).collect()
    }
}

/// Try each tier until one succeeds. Never fails: the report says what
/// happened.
pub async fn delete_message<G: ChatGateway>(
    gateway: &G,
    msg: &IncomingMessage,
    timeout: Duration,
) -> DeletionReport {
    let mut report = DeletionReport::default();

    for tier in DeletionTier::ORDER {
        let result = with_timeout(
            timeout,
            gateway.delete_message(&msg.chat_id, &msg.id, tier.for_everyone()),
        )
        .await;

        let done = result.is_ok();
        if let Err(e) = &result {
            let age = msg
                .age()
                .map(|a| format!("{}s", a.num_seconds()))
                .unwrap_or_else(|| "unknown".to_string());
            warn!(
                "Deleting message {} in {} ({:?}) failed, message age {}: {}",
                msg.id, msg.chat_id, tier, age, e
            );
        }

        report.attempts.push(DeletionAttempt { tier, result });
        if done {
            break;
        }
    }

    report
}
