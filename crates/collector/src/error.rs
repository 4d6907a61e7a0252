use crate::link::LinkId;
use std::time::Duration;
use thiserror::Error;

pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid observation: {0}")]
    InvalidInput(String),
    #[error("unknown link: {0}")]
    UnknownLink(String),
    #[error("failed to open store at {path}: {source}")]
    StoreOpen {
        path: String,
        #[source]
        source: rocksdb::Error,
    },
    #[error("store write failed for {link}: {source}")]
    StoreWrite {
        link: LinkId,
        #[source]
        source: rocksdb::Error,
    },
    #[error("store read failed for {link}: {source}")]
    StoreRead {
        link: LinkId,
        #[source]
        source: rocksdb::Error,
    },
    #[error("store write lock not acquired within {0:?}")]
    LockTimeout(Duration),
    #[error("store is closed")]
    StoreClosed,
    #[error("missing column family: {0}")]
    UnknownNamespace(String),
    #[error("corrupt record in {link} at key {key}: {reason}")]
    Decode {
        link: LinkId,
        key: String,
        reason: String,
    },
    #[error("summary encoding error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
}

#[derive(Debug, Error, PartialEq)]
pub enum AggregationError {
    #[error("no observations to aggregate")]
    Empty,
    #[error("latency {0} is not a finite number of seconds")]
    NonFinite(f64),
}

impl Error {
    /// Input validation failures are reported to the caller and never buffered.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::UnknownLink(_))
    }
}
