//! Ingestion scheduling engine.
//!
//! This crate owns the recurring tick cycle: distributed locking so
//! only one instance ingests at a time, account rotation, failure
//! governance, windowed history fetching, and the background runner
//! that drives it all on an interval.

pub mod error;
pub mod fetch;
pub mod governor;
pub mod lock;
pub mod pool;
pub mod runner;
pub mod tick;

pub use error::EngineError;
pub use lock::{build_tick_lock, LocalTickLock, LockError, LockToken, RedisTickLock, TickLock};
pub use runner::{spawn_scheduler_loop, TriggerHandle};
pub use tick::{TickReport, TickScheduler};
