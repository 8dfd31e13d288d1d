//! Operator alerting for the ingestion scheduler.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable alert channels
//! - Telegram and webhook notifier implementations
//! - Dispatcher that fans an alert out to every configured channel

pub mod alert;
pub mod dispatcher;
pub mod telegram;
pub mod traits;
pub mod webhook;

pub use alert::Alert;
pub use dispatcher::Dispatcher;
pub use traits::{Notifier, NotifyError};
