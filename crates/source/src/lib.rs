//! Message-source capability.
//!
//! The scheduler talks to the messaging provider exclusively through the
//! [`MessageSource`] and [`SourceSession`] traits; failures arrive
//! pre-classified as [`SourceError`]. The crate ships one implementation,
//! [`ScriptedSource`], which replays fixture data for development and tests.
//! Wire-protocol backends live outside this workspace and plug in through
//! the same traits.

pub mod error;
pub mod scripted;
pub mod traits;
pub mod types;

pub use error::SourceError;
pub use scripted::{ChannelScript, Script, ScriptedSource};
pub use traits::{MessageSource, SourceSession};
pub use types::{ChannelTarget, FetchWindow, HistoryPage, SourceCredential, SourceMessage, TargetKind};
