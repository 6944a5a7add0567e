use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// `Rpc` covers everything the chain client's retry schedule treats as
/// transient (transport faults, bad HTTP status, body decode). `Store` and
/// `Snapshot` are fatal: the process exits so a supervisor can restart it.
/// The remaining variants surface to the tailer's outer loop or, for the
/// query operations, to the read API as 4xx responses.
#[derive(Debug, Error)]
pub enum Error {
    #[error("chain rpc failed: {0}")]
    Rpc(#[from] reqwest::Error),

    #[error("block {block_num}: schedule expects {expected} but block is signed by {actual}")]
    ProducerMismatch {
        block_num: u64,
        expected: String,
        actual: String,
    },

    #[error("store failure: {0}")]
    Store(#[from] rocksdb::Error),

    #[error("snapshot codec failure: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("unparseable timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },

    #[error("snapshot store is empty")]
    EmptyStore,

    #[error("no snapshot at or after {0}")]
    OutOfRange(String),

    #[error("step must be positive")]
    InvalidStep,

    #[error("configuration error: {0}")]
    Config(String),
}
