//! Cache module - named Moka caches.
//!
//! Chat metadata (participants and their roles) is kept for a short while so
//! role checks don't hit the bridge on every message.

mod config;
mod typed;

pub use config::CacheConfig;
pub use typed::TypedCache;
