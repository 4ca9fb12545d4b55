use storagesync_storage::StorageError;

/// `EngineError` exists only for the genuinely-fatal startup path (KV
/// store corruption). Every other failure mode is handled locally inside
/// the protocol handler or scheduler and never constructs one of these;
/// handlers never throw outward.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("fatal storage error at startup: {0}")]
    Storage(#[from] StorageError),
}
