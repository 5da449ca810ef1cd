//! Bot module - bridge webhook, per-group dispatch and the runtime that
//! ties them together.

pub mod dispatcher;
mod runtime;
mod webhook;

pub use runtime::run;
