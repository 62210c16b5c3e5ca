use serde::{Deserialize, Serialize};

use pluto_crdt::Pair;

use crate::vclock::VectorClock;
use crate::Result;

/// One downstream message: the effect of a local CRDT mutation, to be
/// applied idempotently on remote replicas. `sender` is the identity whose
/// vector-clock slot was incremented — the node's own name, or the owning
/// worker's name when storage stands in for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub sender: String,
    pub clock: VectorClock,
    pub user: String,
    pub folder: String,
    pub op: SyncOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncOp {
    /// Folder created: one structure add.
    Create { tag: String },
    /// Folder deleted: every observed structure pair, plus the mail files
    /// the deleting replica saw (erased even if a concurrent add keeps the
    /// folder itself alive).
    Delete { pairs: Vec<Pair>, mails: Vec<String> },
    /// Mail delivered: content add plus the file bytes.
    Append {
        file: String,
        tag: String,
        content: Vec<u8>,
    },
    /// Mail erased: the observed content pairs, plus a fresh structure
    /// add-pair (absent for INBOX) declaring continued interest in the
    /// parent so a racing DELETE does not evaporate it.
    Expunge {
        file: String,
        pairs: Vec<Pair>,
        folder_tag: Option<String>,
    },
    /// Flag edit: the old name's observed pairs paired with the new name's
    /// add, plus the bytes so a replica missing the file can materialize it.
    Store {
        old: String,
        new: String,
        pairs: Vec<Pair>,
        tag: String,
        content: Vec<u8>,
    },
}

impl SyncMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_read_ref(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_preserves_binary_content() {
        let mut clock = VectorClock::default();
        clock.incr("w1");
        let msg = SyncMessage {
            sender: "w1".into(),
            clock,
            user: "alice".into(),
            folder: "INBOX".into(),
            op: SyncOp::Append {
                file: "1.a:2,".into(),
                tag: "t1".into(),
                content: vec![0, 159, 146, 150, b'\r', b'\n', 0xff],
            },
        };

        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }
}
