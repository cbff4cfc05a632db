#![deny(missing_docs)]
//! Video Vault bot library.
//!
//! Stores short videos behind shareable deep links, and gives administrators
//! channel broadcasts (immediate and scheduled), moderation and analytics.

/// Telegram-facing bot logic: access gate, conversations, dispatch.
pub mod bot;
/// Configuration management.
pub mod config;
/// Error taxonomy shared by the dispatcher and the scheduler.
pub mod error;
/// Health endpoint and keep-alive pinger.
pub mod health;
/// Domain types persisted by the storage layer.
pub mod models;
/// Background delivery of scheduled broadcasts.
pub mod scheduler;
/// Storage layer (SQLite).
pub mod storage;
/// Supervision of the inbound polling loop.
pub mod supervisor;
/// Chat platform transport abstraction and the Telegram adapter.
pub mod transport;
/// Utility functions.
pub mod utils;

#[cfg(test)]
pub mod testing;
