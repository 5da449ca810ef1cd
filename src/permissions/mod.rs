//! Permission system for checking group roles.
//!
//! Resolves whether the bot and a message sender are admins of a group,
//! using cached chat metadata from the gateway.
//!
//! ## Usage
//!
//! ```rust
//! let perms = Permissions::new(gateway.clone(), Duration::from_secs(10));
//!
//! let chat = perms.chat(&chat_id).await?;
//! if chat.is_admin(&perms.bot_id().await?) {
//!     // ...
//! }
//! ```

mod checker;

pub use checker::Permissions;
