use storagesync_core::CodecError;

/// Failures surfaced by the three persistent indexes.
///
/// Per the error-handling design, only fatal failures (database corruption
/// at open time) are meant to propagate out of the engine; transient I/O
/// errors on a single `put`/`get` are logged by the caller and left for the
/// next scheduler pass to retry.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] redb::Error),
    #[error("database open/create error: {0}")]
    DatabaseCreation(#[from] redb::DatabaseError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
