//! The replication channel between a worker and storage.
//!
//! Downstream messages describe OR-Set effects plus mail bytes. Each
//! message is stamped with a vector clock, appended to a per-peer send log
//! before transmission, and acknowledged by the receiver only once it sits
//! in the receive log and has been applied. Replay from the send log after
//! reconnection gives at-least-once delivery; OR-Set effect idempotence
//! turns that into at-most-once effective application.

pub mod apply;
pub mod frame;
pub mod msg;
pub mod peer;
pub mod receiver;
pub mod sender;
pub mod vclock;
pub mod wal;

use std::path::PathBuf;
use std::time::Duration;

/// Keepalive probe interval on an idle sender connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
/// How long the sender waits for an acknowledgement before reconnecting.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(30);
/// Inbound connections without traffic for this long are dropped.
pub const MAX_IDLE: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt replication log {path:?}")]
    Corrupt { path: PathBuf },

    #[error("unable to encode replication message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("unable to decode replication message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
