//! Persistence layer: accounts, channels, posts, and tick audit records.
//!
//! All consumers go through the async store traits; `PgStore` is the
//! production backend, `MemStore` backs tests and the `memory` profile.

pub mod db;
pub mod error;
pub mod mem;
pub mod models;
pub mod pg;
pub mod traits;

pub use error::StoreError;
pub use mem::MemStore;
pub use models::*;
pub use pg::PgStore;
pub use traits::{AccountStore, ChannelStore, PostStore, Stores, TickRunStore};
