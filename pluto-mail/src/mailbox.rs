use std::fs;
use std::path::{Path, PathBuf};

use maildir::Maildir;
use pluto_crdt::{OrSet, Pair};

use crate::flags;
use crate::{MailboxError, Result};

/// The three STORE data items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Replace,
    Add,
    Remove,
}

/// One message erased by EXPUNGE. `seq` is the pre-compaction 1-based
/// sequence number.
#[derive(Debug)]
pub struct Expunged {
    pub seq: usize,
    pub file: String,
    pub pairs: Vec<Pair>,
}

/// Per-message STORE result. `change` is `None` when the requested flags
/// were already in place and nothing moved.
#[derive(Debug)]
pub struct StoreOutcome {
    pub seq: usize,
    pub letters: String,
    pub change: Option<StoreChange>,
}

#[derive(Debug)]
pub struct StoreChange {
    pub old: String,
    pub new: String,
    pub pairs: Vec<Pair>,
    pub tag: String,
    pub content: Vec<u8>,
}

/// One folder of one user: content OR-Set, sequence list and the Maildir
/// directory. All mutation happens under the owning user's writer lock.
pub struct Folder {
    name: String,
    maildir_path: PathBuf,
    content: OrSet,
    seq: Vec<String>,
    maildir: Maildir,
}

impl Folder {
    /// Opens (or creates) the folder. The sequence list is reseeded from
    /// the content log's insertion order.
    pub fn open(name: &str, log_path: &Path, maildir_path: &Path) -> Result<Self> {
        let maildir = Maildir::from(maildir_path.to_path_buf());
        maildir.create_dirs().map_err(|source| MailboxError::Io {
            path: maildir_path.to_owned(),
            source,
        })?;
        let content = OrSet::open(log_path)?;
        let seq = content.values().map(String::from).collect();
        Ok(Self {
            name: name.to_owned(),
            maildir_path: maildir_path.to_owned(),
            content,
            seq,
            maildir,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// EXISTS count.
    pub fn exists(&self) -> usize {
        self.seq.len()
    }

    /// RECENT count: messages not yet marked `\Seen`.
    pub fn recent(&self) -> usize {
        self.seq
            .iter()
            .filter(|file| !flags::split_filename(file).1.contains('S'))
            .count()
    }

    pub fn seq_list(&self) -> &[String] {
        &self.seq
    }

    pub fn file_at(&self, seq: usize) -> Option<&str> {
        self.seq.get(seq.checked_sub(1)?).map(|s| s.as_str())
    }

    /// Distinct mail filenames currently in the content set.
    pub fn mails(&self) -> Vec<String> {
        self.content.values().map(String::from).collect()
    }

    pub fn contains(&self, file: &str) -> bool {
        self.content.lookup(file)
    }

    // ---- Local mutations (command engine) ----

    /// Maildir delivery sequence: store under tmp/new, rename into cur
    /// unseen, then register the filename. Returns the filename and the
    /// add-pair to replicate.
    pub fn append(&mut self, content: &[u8]) -> Result<(String, Pair)> {
        let id = self.maildir.store_new(content)?;
        self.maildir
            .move_new_to_cur(&id)
            .map_err(|source| MailboxError::Io {
                path: self.maildir_path.clone(),
                source,
            })?;
        let file = flags::filename(&id, "");
        let pair = self.content.add(&file)?;
        self.seq.push(file.clone());
        Ok((file, pair))
    }

    /// Erases every message flagged `\Deleted`, compacting the sequence
    /// list in reverse order so reports carry pre-compaction numbers.
    pub fn expunge(&mut self) -> Result<Vec<Expunged>> {
        let mut expunged = Vec::new();
        for idx in (0..self.seq.len()).rev() {
            let file = self.seq[idx].clone();
            let (id, letters) = flags::split_filename(&file);
            if !letters.contains('T') {
                continue;
            }
            let pairs = self.content.remove(&file)?;
            self.maildir
                .delete(id)
                .map_err(|source| MailboxError::Io {
                    path: self.maildir_path.clone(),
                    source,
                })?;
            self.seq.remove(idx);
            expunged.push(Expunged {
                seq: idx + 1,
                file,
                pairs,
            });
        }
        Ok(expunged)
    }

    /// Applies a flag edit to each targeted message. A changed flag string
    /// renames the Maildir file (new key) and swaps the filename in place,
    /// pairing the observed remove with the fresh add so remote replicas
    /// replay the exact same effect.
    pub fn store(
        &mut self,
        positions: &[usize],
        mode: StoreMode,
        letters: &str,
    ) -> Result<Vec<StoreOutcome>> {
        let mut outcomes = Vec::new();
        for &seq in positions {
            let old = self
                .seq
                .get(seq - 1)
                .cloned()
                .ok_or_else(|| MailboxError::NoSuchMail(format!("sequence number {}", seq)))?;
            let (id, current) = flags::split_filename(&old);
            let new_letters = match mode {
                StoreMode::Replace => flags::normalize(letters),
                StoreMode::Add => flags::union(current, letters),
                StoreMode::Remove => flags::difference(current, letters),
            };
            if new_letters == current {
                outcomes.push(StoreOutcome {
                    seq,
                    letters: new_letters,
                    change: None,
                });
                continue;
            }

            let entry = self
                .maildir
                .find(id)
                .ok_or_else(|| MailboxError::NoSuchMail(old.clone()))?;
            let content = fs::read(entry.path()).map_err(|source| MailboxError::Io {
                path: entry.path().clone(),
                source,
            })?;
            self.maildir
                .set_flags(id, &new_letters)
                .map_err(|source| MailboxError::Io {
                    path: self.maildir_path.clone(),
                    source,
                })?;

            let new = flags::filename(id, &new_letters);
            let pairs = self.content.remove(&old)?;
            let pair = self.content.add(&new)?;
            self.seq[seq - 1] = new.clone();
            outcomes.push(StoreOutcome {
                seq,
                letters: new_letters,
                change: Some(StoreChange {
                    old,
                    new,
                    pairs,
                    tag: pair.tag,
                    content,
                }),
            });
        }
        Ok(outcomes)
    }

    /// Local observed removal of specific mails, used when a replicated
    /// folder DELETE loses against a concurrent add: only the carried
    /// files go, the folder survives.
    pub fn drop_mails(&mut self, files: &[String]) -> Result<()> {
        for file in files {
            self.content.remove(file)?;
            self.unlink(file)?;
            self.seq.retain(|f| f != file);
        }
        Ok(())
    }

    // ---- Downstream effects (applicator) ----

    pub fn apply_append(&mut self, file: &str, tag: &str, content: &[u8]) -> Result<()> {
        self.content.add_effect(file, tag)?;
        let (id, _) = flags::split_filename(file);
        if self.maildir.find(id).is_none() {
            self.materialize(file, content)?;
            self.seq.push(file.to_owned());
        }
        Ok(())
    }

    pub fn apply_expunge(&mut self, file: &str, pairs: &[Pair]) -> Result<()> {
        self.content.remove_effect(pairs)?;
        if !self.content.lookup(file) {
            self.unlink(file)?;
            self.seq.retain(|f| f != file);
        }
        Ok(())
    }

    pub fn apply_store(
        &mut self,
        old: &str,
        new: &str,
        pairs: &[Pair],
        tag: &str,
        content: &[u8],
    ) -> Result<()> {
        self.content.remove_effect(pairs)?;
        if !self.content.lookup(old) {
            self.unlink(old)?;
        }
        if !self.maildir_path.join("cur").join(new).exists() {
            self.materialize(new, content)?;
        }
        self.content.add_effect(new, tag)?;
        match self.seq.iter().position(|f| f == old) {
            Some(pos) => self.seq[pos] = new.to_owned(),
            None => {
                if self.content.lookup(new) && !self.seq.iter().any(|f| f == new) {
                    self.seq.push(new.to_owned());
                }
            }
        }
        Ok(())
    }

    /// Writes a replicated mail file under its exact replicated name,
    /// through tmp/ per the Maildir convention.
    fn materialize(&self, file: &str, content: &[u8]) -> Result<()> {
        let tmp = self.maildir_path.join("tmp").join(file);
        fs::write(&tmp, content).map_err(|source| MailboxError::Io {
            path: tmp.clone(),
            source,
        })?;
        let dst = self.maildir_path.join("cur").join(file);
        fs::rename(&tmp, &dst).map_err(|source| MailboxError::Io {
            path: dst.clone(),
            source,
        })
    }

    /// Unlinks by exact filename. The Maildir id alone is ambiguous here: a
    /// concurrently renamed twin shares it.
    fn unlink(&self, file: &str) -> Result<()> {
        let path = self.maildir_path.join("cur").join(file);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(MailboxError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(dir: &Path) -> Folder {
        Folder::open("scratch", &dir.join("scratch.log"), &dir.join("scratch")).unwrap()
    }

    #[test]
    fn append_delivers_unseen_into_cur() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = folder(dir.path());

        let (file, pair) = f.append(b"Hello world!").unwrap();
        assert!(file.ends_with(":2,"));
        assert_eq!(pair.value, file);
        assert_eq!(f.exists(), 1);
        assert_eq!(f.recent(), 1);
        assert!(dir.path().join("scratch/cur").join(&file).exists());
    }

    #[test]
    fn store_renames_and_keeps_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = folder(dir.path());
        f.append(b"one").unwrap();
        f.append(b"two").unwrap();

        let outcomes = f.store(&[1], StoreMode::Add, "T").unwrap();
        assert_eq!(outcomes.len(), 1);
        let change = outcomes[0].change.as_ref().unwrap();
        assert!(change.new.ends_with(":2,T"));
        assert_eq!(f.seq_list()[0], change.new);
        assert_eq!(change.content, b"one");
        assert!(!f.contains(&change.old));
        assert!(f.contains(&change.new));

        // Same flags again: no rename, no effect.
        let outcomes = f.store(&[1], StoreMode::Add, "T").unwrap();
        assert!(outcomes[0].change.is_none());
    }

    #[test]
    fn expunge_reports_precompaction_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = folder(dir.path());
        f.append(b"one").unwrap();
        f.append(b"two").unwrap();
        f.append(b"three").unwrap();

        f.store(&[1, 3], StoreMode::Add, "T").unwrap();
        let expunged = f.expunge().unwrap();

        let seqs: Vec<usize> = expunged.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 1]);
        assert_eq!(f.exists(), 1);
        assert_eq!(f.seq_list().len(), 1);
    }

    #[test]
    fn apply_append_twice_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = folder(dir.path());

        f.apply_append("99.remote:2,", "tag-1", b"payload").unwrap();
        f.apply_append("99.remote:2,", "tag-1", b"payload").unwrap();

        assert_eq!(f.exists(), 1);
        assert_eq!(f.mails(), vec!["99.remote:2,".to_string()]);
        assert!(dir.path().join("scratch/cur/99.remote:2,").exists());
    }

    #[test]
    fn apply_store_substitutes_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = folder(dir.path());
        f.apply_append("99.remote:2,", "tag-1", b"payload").unwrap();

        let pairs = vec![Pair {
            value: "99.remote:2,".into(),
            tag: "tag-1".into(),
        }];
        f.apply_store("99.remote:2,", "99.remote:2,S", &pairs, "tag-2", b"payload")
            .unwrap();
        f.apply_store("99.remote:2,", "99.remote:2,S", &pairs, "tag-2", b"payload")
            .unwrap();

        assert_eq!(f.seq_list(), &["99.remote:2,S".to_string()]);
        assert!(!f.contains("99.remote:2,"));
        assert!(f.contains("99.remote:2,S"));
        assert!(!dir.path().join("scratch/cur/99.remote:2,").exists());
        assert!(dir.path().join("scratch/cur/99.remote:2,S").exists());
    }

    #[test]
    fn apply_expunge_respects_unseen_tags() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = folder(dir.path());
        f.apply_append("99.remote:2,", "tag-1", b"payload").unwrap();
        // A second add the remote remove never observed.
        f.apply_append("99.remote:2,", "tag-2", b"payload").unwrap();

        let pairs = vec![Pair {
            value: "99.remote:2,".into(),
            tag: "tag-1".into(),
        }];
        f.apply_expunge("99.remote:2,", &pairs).unwrap();
        assert!(f.contains("99.remote:2,"));
        assert_eq!(f.exists(), 1);

        let pairs = vec![Pair {
            value: "99.remote:2,".into(),
            tag: "tag-2".into(),
        }];
        f.apply_expunge("99.remote:2,", &pairs).unwrap();
        assert!(!f.contains("99.remote:2,"));
        assert_eq!(f.exists(), 0);
        assert!(!dir.path().join("scratch/cur/99.remote:2,").exists());
    }
}
