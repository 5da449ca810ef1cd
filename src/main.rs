//! Linkguard - WhatsApp group link moderation bot
//!
//! Deletes messages carrying links in groups where the bot is an admin,
//! warns the sender and removes repeat offenders.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `gateway` - Chat gateway trait and the HTTP bridge client
//! - `detector` - Link detection with a domain allow-list
//! - `store` - Persistent strike counts
//! - `cache` - Typed caches with Moka
//! - `permissions` - Admin checking with caching
//! - `moderation` - Link moderation policy
//! - `bot` - Webhook, dispatcher and runtime
//! - `plugins` - Admin commands
//! - `i18n` - Built-in texts
//! - `utils` - Utility functions

mod bot;
mod cache;
mod config;
mod detector;
mod gateway;
mod i18n;
mod moderation;
mod permissions;
mod plugins;
mod store;
mod utils;

use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("linkguard=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("Starting Linkguard...");

    i18n::init();

    let config = Config::from_env()?;
    info!("Configuration loaded successfully");
    info!("Strike threshold: {}", config.moderation.strike_threshold);
    info!("Admins exempt: {}", config.moderation.admins_exempt);
    if config.moderation.allowlist.is_empty() {
        info!("No allowed domains configured (ALLOWED_DOMAINS is empty)");
    } else {
        info!("Allowed domains: {:?}", config.moderation.allowlist);
    }
    info!("Strikes file: {}", config.strikes_path.display());

    bot::run(config).await
}
