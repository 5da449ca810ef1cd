//! Event dispatcher.
//!
//! Routes bridge events: session events are handled inline, messages go to
//! one worker per group so each group is processed in arrival order.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::detector::DetectorError;
use crate::gateway::{ChatGateway, ChatId, GatewayEvent, IncomingMessage};
use crate::moderation::{ModerationConfig, ModerationPolicy};
use crate::permissions::Permissions;
use crate::plugins;
use crate::store::StrikeStore;

/// Shared application state.
pub struct AppState<G: ChatGateway> {
    /// Messaging client.
    pub gateway: Arc<G>,

    /// Permission checker with chat metadata caching.
    pub permissions: Arc<Permissions<G>>,

    /// Strike counts.
    pub store: Arc<StrikeStore>,

    /// Link moderation pipeline.
    pub policy: Arc<ModerationPolicy<G>>,

    /// Language for built-in texts.
    pub lang: String,

    /// Prefix of admin commands.
    pub command_prefix: String,
}

// Manual Clone implementation that doesn't require G: Clone
impl<G: ChatGateway> Clone for AppState<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            permissions: Arc::clone(&self.permissions),
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
            lang: self.lang.clone(),
            command_prefix: self.command_prefix.clone(),
        }
    }
}

impl<G: ChatGateway> AppState<G> {
    /// Create a new application state.
    pub fn new(
        gateway: Arc<G>,
        store: Arc<StrikeStore>,
        moderation: ModerationConfig,
        lang: String,
        command_prefix: String,
    ) -> Result<Self, DetectorError> {
        let permissions = Arc::new(Permissions::new(gateway.clone(), moderation.gateway_timeout));
        let policy = Arc::new(ModerationPolicy::new(
            moderation,
            gateway.clone(),
            permissions.clone(),
            store.clone(),
        )?);

        Ok(Self {
            gateway,
            permissions,
            store,
            policy,
            lang,
            command_prefix,
        })
    }
}

/// Routes events to per-group workers.
pub struct Dispatcher<G: ChatGateway> {
    state: AppState<G>,
    workers: HashMap<ChatId, mpsc::UnboundedSender<IncomingMessage>>,
    tasks: JoinSet<()>,
}

impl<G: ChatGateway> Dispatcher<G> {
    pub fn new(state: AppState<G>) -> Self {
        Self {
            state,
            workers: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Dispatch events until the stream ends or `shutdown` resolves, then
    /// let the workers drain their queues.
    pub async fn run<S>(mut self, mut events: mpsc::UnboundedReceiver<GatewayEvent>, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, draining workers...");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        info!("Event stream closed");
                        break;
                    }
                },
            }
        }

        // Closing the queues lets each worker finish what it has and exit.
        self.workers.clear();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }
        info!("All workers stopped");
    }

    /// Handle one event.
    pub fn dispatch(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Qr { qr } => {
                info!(
                    "📱 Bridge needs pairing: scan the QR code shown by the bridge ({} bytes)",
                    qr.len()
                );
            }
            GatewayEvent::Ready { me } => {
                info!("✅ Connected as {} and ready to moderate", me);
                self.state.permissions.set_bot_id(me);
            }
            GatewayEvent::Disconnected { reason } => {
                warn!(
                    "Bridge session disconnected: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
            }
            GatewayEvent::Message(msg) => self.route(msg),
        }
    }

    fn route(&mut self, msg: IncomingMessage) {
        // Only groups are moderated
        if !msg.chat_id.is_group() {
            return;
        }

        let chat = msg.chat_id.clone();
        let sender = self
            .workers
            .entry(chat.clone())
            .or_insert_with(|| spawn_worker(&mut self.tasks, self.state.clone(), chat.clone()));

        if let Err(mpsc::error::SendError(msg)) = sender.send(msg) {
            warn!("Worker for {} is gone, restarting it", chat);
            let sender = spawn_worker(&mut self.tasks, self.state.clone(), chat.clone());
            let _ = sender.send(msg);
            self.workers.insert(chat, sender);
        }
    }
}

fn spawn_worker<G: ChatGateway>(
    tasks: &mut JoinSet<()>,
    state: AppState<G>,
    chat: ChatId,
) -> mpsc::UnboundedSender<IncomingMessage> {
    let (tx, mut rx) = mpsc::unbounded_channel::<IncomingMessage>();

    tasks.spawn(async move {
        debug!("Worker started for {}", chat);
        while let Some(msg) = rx.recv().await {
            process_message(&state, msg).await;
        }
        debug!("Worker for {} stopped", chat);
    });

    tx
}

/// Process one message. Errors and panics are logged and contained so the
/// next message is unaffected.
pub async fn process_message<G: ChatGateway>(state: &AppState<G>, msg: IncomingMessage) {
    let result = AssertUnwindSafe(handle_message(state, &msg))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(
                "Error processing message {} from {} in {}: {:#}",
                msg.id, msg.sender, msg.chat_id, e
            );
        }
        Err(panic) => {
            error!(
                "Panic processing message {} from {} in {}: {}",
                msg.id,
                msg.sender,
                msg.chat_id,
                panic_message(&*panic)
            );
        }
    }
}

/// Commands first, then moderation.
async fn handle_message<G: ChatGateway>(
    state: &AppState<G>,
    msg: &IncomingMessage,
) -> anyhow::Result<()> {
    if plugins::handle_command(state, msg).await? {
        return Ok(());
    }

    let outcome = state.policy.handle(msg).await?;
    if let Some(report) = &outcome.deletion
        && report.deleted_by().is_none()
    {
        warn!("Message {} in {} could not be deleted", msg.id, msg.chat_id);
    }

    debug!(
        "Message {} in {}: {:?} (strikes: {:?})",
        msg.id, msg.chat_id, outcome.decision, outcome.strikes
    );
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
