//! Engine error types.

use depesche_store::StoreError;

use crate::lock::LockError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}
