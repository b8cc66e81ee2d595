#![deny(missing_docs)]
//! Lingo Relay library.
//!
//! Watches Telegram group chats and replies to every message written in a
//! foreign language with its translation into the group's common language.

/// Telegram-facing handlers: pipeline, commands, transport.
pub mod bot;
/// Configuration management.
pub mod config;
/// Telegram runtime entrypoint.
pub mod runner;
/// Persistent per-group membership sets.
pub mod sessions;
/// Language detection and translation.
pub mod translation;
/// Utility functions.
pub mod utils;

/// Crate version shown in `/help`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
