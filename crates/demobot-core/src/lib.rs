//! Core of the democratic moderation bot.
//!
//! The update-dispatch engine (loop, bridge, registry, sandbox) and the poll
//! lifecycle live here. HTTP and the moderation handlers live in
//! `demobot-telegram`, behind the [`api::ApiTransport`] port.

pub mod api;
pub mod bridge;
pub mod chats;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod filters;
pub mod i18n;
pub mod logging;
pub mod polls;
pub mod registry;
pub mod reports;
pub mod sandbox;
pub mod update;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use errors::{Error, Result};
