//! Log-backed Observed-Remove Sets.
//!
//! An OR-Set maps each value to the set of unique tags under which it was
//! added. `add` allocates a fresh tag, `remove` erases every tag observed at
//! its invocation, so a concurrent add (with a tag the remove never saw)
//! survives. Every mutation is appended to a per-set log file and fsynced
//! before it becomes visible in memory, which makes a set reconstructible by
//! replaying its log and lets callers emit the returned effect pairs to
//! remote replicas only once they are durable.

mod log;
mod orset;

pub use orset::{gen_tag, OrSet, Pair};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error on CRDT log {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt CRDT log record at {path:?} line {line}")]
    Corrupt { path: PathBuf, line: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
