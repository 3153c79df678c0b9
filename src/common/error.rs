use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriftError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache is full")]
    CacheFull,

    #[error("dead lock")]
    Deadlock,

    #[error("concurrent update")]
    ConcurrentUpdate,

    #[error("entry has been invalidated")]
    InvalidEntry,

    #[error("WAL Error: {0}")]
    WalError(String),

    #[error("XID Error: {0}")]
    XidError(String),

    #[error("Storage Error: {0}")]
    StorageError(String),

    #[error("Transaction Error: {0}")]
    TransactionError(String),
}
