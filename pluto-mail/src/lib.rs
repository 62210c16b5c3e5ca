//! Per-user mailbox state shared between a worker and storage.
//!
//! A user owns a structure OR-Set of folder names plus, per folder, a
//! content OR-Set of Maildir filenames and the ordered sequence list that
//! gives out IMAP sequence numbers. Everything mutates under one writer
//! lock per user; the operations return the OR-Set effect pairs the command
//! engine turns into replication messages, and the `apply_*` family replays
//! such effects idempotently when they arrive from a peer.

pub mod flags;
pub mod mailbox;
pub mod user;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox {0} already exists")]
    Exists(String),

    #[error("mailbox {0} does not exist")]
    NoSuchFolder(String),

    #[error("INBOX is reserved")]
    Reserved,

    #[error("invalid mailbox name {0:?}")]
    BadName(String),

    #[error("message {0} is missing from the Maildir")]
    NoSuchMail(String),

    #[error(transparent)]
    Crdt(#[from] pluto_crdt::Error),

    #[error("maildir failure: {0}")]
    Maildir(#[from] maildir::MaildirError),

    #[error("i/o failure on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MailboxError>;
