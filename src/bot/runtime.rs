//! Bot runtime - wires the bridge, the store and the dispatcher together.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use super::dispatcher::{AppState, Dispatcher};
use super::webhook;
use crate::config::Config;
use crate::gateway::{BridgeClient, ChatGateway};
use crate::store::{JsonFileBackend, StrikeStore};

/// Run the bot until Ctrl+C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let gateway = Arc::new(BridgeClient::new(
        config.bridge_url.clone(),
        config.bridge_token.clone(),
        config.moderation.gateway_timeout,
    )?);
    info!("Bridge client configured for {}", config.bridge_url);

    let store = Arc::new(StrikeStore::open(Arc::new(JsonFileBackend::new(
        &config.strikes_path,
    ))));

    let state = AppState::new(
        gateway.clone(),
        store,
        config.moderation.clone(),
        config.lang.clone(),
        config.command_prefix.clone(),
    )?;

    // The bridge may still be pairing; a ready event fills this in later.
    match gateway.me().await {
        Ok(me) => {
            info!("Bridge session active as {}", me);
            state.permissions.set_bot_id(me);
        }
        Err(e) => warn!("Bridge not ready yet ({}), waiting for a ready event", e),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, shutting down...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive so the bot keeps running.
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let listener = TcpListener::bind(config.webhook_addr).await?;
    let server = tokio::spawn(webhook::serve(
        listener,
        config.webhook_secret.clone(),
        events_tx,
        wait_for_shutdown(shutdown_rx.clone()),
    ));

    Dispatcher::new(state)
        .run(events_rx, wait_for_shutdown(shutdown_rx))
        .await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Webhook server failed: {:#}", e),
        Err(e) => error!("Webhook server task failed: {}", e),
    }

    info!("Bot stopped");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
