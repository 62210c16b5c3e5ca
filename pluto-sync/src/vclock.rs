use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, SyncError};

/// Per-replica monotonic counters keyed by replica name. One clock per
/// peer link orders both directions of that link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<String, u64>);

/// What to do with an incoming message, judged against the local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Monotonic advance: hand to the applicator now.
    Deliver,
    /// A gap: hold until the missing entry arrives.
    Buffer,
    /// Already seen: drop, but still acknowledge.
    Duplicate,
}

impl VectorClock {
    pub fn incr(&mut self, name: &str) {
        *self.0.entry(name.to_owned()).or_insert(0) += 1;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    /// Elementwise maximum, taken after a delivery.
    pub fn merge(&mut self, other: &VectorClock) {
        for (name, count) in &other.0 {
            let slot = self.0.entry(name.clone()).or_insert(0);
            *slot = (*slot).max(*count);
        }
    }

    /// The causal delivery rule: the stamp must be exactly-next in the
    /// sender's slot and not ahead anywhere else.
    pub fn delivery(&self, sender: &str, stamp: &VectorClock) -> Delivery {
        let slot = stamp.get(sender);
        if slot <= self.get(sender) {
            return Delivery::Duplicate;
        }
        if slot != self.get(sender) + 1 {
            return Delivery::Buffer;
        }
        for (name, count) in &stamp.0 {
            if name != sender && *count > self.get(name) {
                return Delivery::Buffer;
            }
        }
        Delivery::Deliver
    }

    /// Reads a checkpoint file; a missing file is a zero clock.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SyncError::Io {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        let mut clock = BTreeMap::new();
        for line in text.lines() {
            let (name, count) = line.split_once('\t').ok_or(SyncError::Corrupt {
                path: path.to_owned(),
            })?;
            let count: u64 = count.parse().map_err(|_| SyncError::Corrupt {
                path: path.to_owned(),
            })?;
            clock.insert(name.to_owned(), count);
        }
        Ok(Self(clock))
    }

    /// Checkpoints through a temp file and rename, fsynced, so a crash
    /// leaves either the old or the new clock, never a torn one.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = String::new();
        for (name, count) in &self.0 {
            text.push_str(name);
            text.push('\t');
            text.push_str(&count.to_string());
            text.push('\n');
        }

        let tmp = path.with_extension("tmp");
        let io_err = |source| SyncError::Io {
            path: path.to_owned(),
            source,
        };
        let file = fs::File::create(&tmp).map_err(io_err)?;
        {
            use std::io::Write;
            let mut file = file;
            file.write_all(text.as_bytes()).map_err(io_err)?;
            file.sync_data().map_err(io_err)?;
        }
        fs::rename(&tmp, path).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(entries: &[(&str, u64)]) -> VectorClock {
        VectorClock(
            entries
                .iter()
                .map(|(n, c)| (n.to_string(), *c))
                .collect(),
        )
    }

    #[test]
    fn delivery_rules() {
        let local = stamp(&[("w1", 2), ("storage", 1)]);

        assert_eq!(
            local.delivery("w1", &stamp(&[("w1", 3), ("storage", 1)])),
            Delivery::Deliver
        );
        assert_eq!(
            local.delivery("w1", &stamp(&[("w1", 2)])),
            Delivery::Duplicate
        );
        assert_eq!(
            local.delivery("w1", &stamp(&[("w1", 5)])),
            Delivery::Buffer
        );
        // Next in the sender slot but ahead elsewhere: still a gap.
        assert_eq!(
            local.delivery("w1", &stamp(&[("w1", 3), ("storage", 2)])),
            Delivery::Buffer
        );
    }

    #[test]
    fn merge_takes_elementwise_max() {
        let mut a = stamp(&[("w1", 2), ("storage", 1)]);
        a.merge(&stamp(&[("w1", 1), ("storage", 4), ("w2", 1)]));
        assert_eq!(a, stamp(&[("w1", 2), ("storage", 4), ("w2", 1)]));
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vclock-storage.log");

        assert_eq!(VectorClock::load(&path).unwrap(), VectorClock::default());

        let clock = stamp(&[("w1", 7), ("storage", 3)]);
        clock.save(&path).unwrap();
        assert_eq!(VectorClock::load(&path).unwrap(), clock);
    }
}
