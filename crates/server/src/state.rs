use depesche_engine::TriggerHandle;
use depesche_store::traits::Stores;

/// Shared handles behind every API route.
///
/// Holding the [`TriggerHandle`] here keeps the scheduler loop alive for
/// the lifetime of the server.
pub struct AppState {
    pub stores: Stores,
    pub trigger: TriggerHandle,
    /// Redacted config snapshot served by GET /api/config.
    pub config_summary: serde_json::Value,
}
