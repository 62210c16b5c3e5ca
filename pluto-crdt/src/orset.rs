use std::collections::{HashMap, HashSet};
use std::path::Path;

use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::log::{LogFile, LogOp, LogRecord};
use crate::Result;

/// A `(value, tag)` pair, the unit of OR-Set effect propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub value: String,
    pub tag: String,
}

/// Allocates a fresh tag: 128 random bits, URL-safe base64. Unique within
/// the process lifetime and across restarts with overwhelming probability.
pub fn gen_tag() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// An Observed-Remove Set bound to its on-disk log.
///
/// `values()` iterates in insertion order, the order of `add` records in the
/// log; per-folder sequence lists are seeded from it at open time.
pub struct OrSet {
    log: LogFile,
    order: Vec<String>,
    entries: HashMap<String, HashSet<String>>,
}

impl OrSet {
    /// Opens the set, replaying the log at `path` (created when missing).
    pub fn open(path: &Path) -> Result<Self> {
        let (log, records) = LogFile::open(path)?;
        let mut set = Self {
            log,
            order: Vec::new(),
            entries: HashMap::new(),
        };
        for rec in records {
            match rec.op {
                LogOp::Add => {
                    set.apply_add(&rec.value, &rec.tag);
                }
                LogOp::Rm => {
                    set.apply_rm(&rec.value, &rec.tag);
                }
            }
        }
        Ok(set)
    }

    /// Adds `value` under a fresh tag. The record is durable before the
    /// in-memory state changes and before the pair is handed back for
    /// downstream emission.
    pub fn add(&mut self, value: &str) -> Result<Pair> {
        let tag = gen_tag();
        self.log.append(&[LogRecord {
            op: LogOp::Add,
            value: value.to_owned(),
            tag: tag.clone(),
        }])?;
        self.apply_add(value, &tag);
        Ok(Pair {
            value: value.to_owned(),
            tag,
        })
    }

    /// Removes every currently observed `(value, tag)` pair and returns
    /// them. Returns an empty vector when the value is absent; one log write
    /// and fsync covers all retracted pairs.
    pub fn remove(&mut self, value: &str) -> Result<Vec<Pair>> {
        let observed: Vec<String> = match self.entries.get(value) {
            Some(tags) => tags.iter().cloned().collect(),
            None => return Ok(Vec::new()),
        };

        let records: Vec<LogRecord> = observed
            .iter()
            .map(|tag| LogRecord {
                op: LogOp::Rm,
                value: value.to_owned(),
                tag: tag.clone(),
            })
            .collect();
        self.log.append(&records)?;

        for tag in &observed {
            self.apply_rm(value, tag);
        }
        Ok(observed
            .into_iter()
            .map(|tag| Pair {
                value: value.to_owned(),
                tag,
            })
            .collect())
    }

    /// Replays a remote add. A tag already seen is a no-op and touches
    /// neither memory nor the log. Returns whether the effect applied.
    pub fn add_effect(&mut self, value: &str, tag: &str) -> Result<bool> {
        if self
            .entries
            .get(value)
            .map_or(false, |tags| tags.contains(tag))
        {
            return Ok(false);
        }
        self.log.append(&[LogRecord {
            op: LogOp::Add,
            value: value.to_owned(),
            tag: tag.to_owned(),
        }])?;
        self.apply_add(value, tag);
        Ok(true)
    }

    /// Replays a remote remove. Pairs already gone are skipped; only the
    /// pairs actually retracted are logged.
    pub fn remove_effect(&mut self, pairs: &[Pair]) -> Result<()> {
        let present: Vec<&Pair> = pairs
            .iter()
            .filter(|p| {
                self.entries
                    .get(&p.value)
                    .map_or(false, |tags| tags.contains(&p.tag))
            })
            .collect();
        if present.is_empty() {
            return Ok(());
        }

        let records: Vec<LogRecord> = present
            .iter()
            .map(|p| LogRecord {
                op: LogOp::Rm,
                value: p.value.clone(),
                tag: p.tag.clone(),
            })
            .collect();
        self.log.append(&records)?;

        for p in present {
            self.apply_rm(&p.value, &p.tag);
        }
        Ok(())
    }

    /// True iff any tag for `value` remains.
    pub fn lookup(&self, value: &str) -> bool {
        self.entries.contains_key(value)
    }

    /// Distinct live values, in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|v| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // In-memory transitions, shared by local ops and log replay. An entry
    // with no tags left is dropped entirely so a re-add restarts its
    // insertion order.

    fn apply_add(&mut self, value: &str, tag: &str) -> bool {
        let tags = self.entries.entry(value.to_owned()).or_default();
        if !tags.insert(tag.to_owned()) {
            return false;
        }
        if tags.len() == 1 {
            self.order.push(value.to_owned());
        }
        true
    }

    fn apply_rm(&mut self, value: &str, tag: &str) -> bool {
        let tags = match self.entries.get_mut(value) {
            Some(tags) => tags,
            None => return false,
        };
        if !tags.remove(tag) {
            return false;
        }
        if tags.is_empty() {
            self.entries.remove(value);
            self.order.retain(|v| v != value);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.log");
        (dir, path)
    }

    #[test]
    fn add_then_lookup_and_order() {
        let (_dir, path) = scratch();
        let mut set = OrSet::open(&path).unwrap();

        set.add("a").unwrap();
        set.add("b").unwrap();
        set.add("a").unwrap();

        assert!(set.lookup("a"));
        assert!(set.lookup("b"));
        assert!(!set.lookup("c"));
        assert_eq!(set.values().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn remove_erases_all_observed_pairs() {
        let (_dir, path) = scratch();
        let mut set = OrSet::open(&path).unwrap();

        let p1 = set.add("a").unwrap();
        let p2 = set.add("a").unwrap();

        let mut removed = set.remove("a").unwrap();
        removed.sort_by(|x, y| x.tag.cmp(&y.tag));
        let mut expected = vec![p1, p2];
        expected.sort_by(|x, y| x.tag.cmp(&y.tag));
        assert_eq!(removed, expected);
        assert!(!set.lookup("a"));
        assert!(set.remove("a").unwrap().is_empty());
    }

    #[test]
    fn concurrent_add_wins_over_remove() {
        let (_dir, path) = scratch();
        let mut set = OrSet::open(&path).unwrap();

        // A remote replica observed only t1; a newer local add must survive
        // the arriving remove-effect.
        let observed = set.add("a").unwrap();
        let fresh = set.add("a").unwrap();

        set.remove_effect(&[observed]).unwrap();
        assert!(set.lookup("a"));

        set.remove_effect(std::slice::from_ref(&fresh)).unwrap();
        assert!(!set.lookup("a"));
    }

    #[test]
    fn effects_are_idempotent() {
        let (_dir, path) = scratch();
        let mut set = OrSet::open(&path).unwrap();

        assert!(set.add_effect("a", "t1").unwrap());
        assert!(!set.add_effect("a", "t1").unwrap());
        assert!(set.lookup("a"));

        let pair = Pair {
            value: "a".into(),
            tag: "t1".into(),
        };
        set.remove_effect(std::slice::from_ref(&pair)).unwrap();
        set.remove_effect(std::slice::from_ref(&pair)).unwrap();
        assert!(!set.lookup("a"));
    }

    #[test]
    fn replay_reconstructs_state() {
        let (_dir, path) = scratch();
        {
            let mut set = OrSet::open(&path).unwrap();
            set.add("keep\tme").unwrap();
            set.add("drop\nme").unwrap();
            set.add("also kept").unwrap();
            set.remove("drop\nme").unwrap();
        }

        let set = OrSet::open(&path).unwrap();
        assert_eq!(
            set.values().collect::<Vec<_>>(),
            vec!["keep\tme", "also kept"]
        );
    }

    #[test]
    fn truncated_trailing_record_is_dropped() {
        let (_dir, path) = scratch();
        {
            let mut set = OrSet::open(&path).unwrap();
            set.add("a").unwrap();
        }
        {
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            f.write_all(b"add\tpartial").unwrap();
        }

        let mut set = OrSet::open(&path).unwrap();
        assert_eq!(set.values().collect::<Vec<_>>(), vec!["a"]);
        assert!(!set.lookup("partial"));

        // The file was cut back; further appends still replay cleanly.
        set.add("b").unwrap();
        drop(set);
        let set = OrSet::open(&path).unwrap();
        assert_eq!(set.values().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
