use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::{Result, SyncError};

/// Append-only log of encoded replication messages, one per record,
/// `u32`-BE length-prefixed. The send log holds exactly the unacknowledged
/// suffix: an acknowledgement truncates the head record, so replay after a
/// reconnect is simply "send everything in the log". The receive log only
/// ever appends.
pub struct MessageLog {
    path: PathBuf,
    file: File,
    records: VecDeque<Vec<u8>>,
}

impl MessageLog {
    pub fn open(path: &Path) -> Result<Self> {
        let io_err = |source| SyncError::Io {
            path: path.to_owned(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(io_err)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw).map_err(io_err)?;

        let mut records = VecDeque::new();
        let mut offset = 0usize;
        while raw.len() - offset >= 4 {
            let len = u32::from_be_bytes(raw[offset..offset + 4].try_into().unwrap()) as usize;
            if raw.len() - offset - 4 < len {
                break;
            }
            records.push_back(raw[offset + 4..offset + 4 + len].to_vec());
            offset += 4 + len;
        }
        if offset < raw.len() {
            tracing::warn!(
                path = %path.display(),
                dropped = raw.len() - offset,
                "dropping truncated trailing replication record"
            );
            file.set_len(offset as u64).map_err(io_err)?;
        }

        Ok(Self {
            path: path.to_owned(),
            file,
            records,
        })
    }

    /// Appends one record and fsyncs before returning.
    pub fn append(&mut self, record: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(4 + record.len());
        buf.extend_from_slice(&(record.len() as u32).to_be_bytes());
        buf.extend_from_slice(record);

        self.file
            .write_all(&buf)
            .and_then(|_| self.file.sync_data())
            .map_err(|source| SyncError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.records.push_back(record.to_vec());
        Ok(())
    }

    pub fn first(&self) -> Option<&[u8]> {
        self.records.front().map(|r| r.as_slice())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &[u8]> {
        self.records.iter().map(|r| r.as_slice())
    }

    /// Drops the `n` oldest records, rewriting the file through a temp
    /// sibling so a crash keeps either view intact.
    pub fn truncate_head(&mut self, n: usize) -> Result<()> {
        let io_err = |source| SyncError::Io {
            path: self.path.clone(),
            source,
        };

        let keep: Vec<&Vec<u8>> = self.records.iter().skip(n).collect();
        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(io_err)?;
        for record in &keep {
            file.write_all(&(record.len() as u32).to_be_bytes())
                .map_err(io_err)?;
            file.write_all(record).map_err(io_err)?;
        }
        file.sync_data().map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;

        self.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        for _ in 0..n.min(self.records.len()) {
            self.records.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sending-storage.log");

        {
            let mut log = MessageLog::open(&path).unwrap();
            log.append(b"one").unwrap();
            log.append(b"two").unwrap();
            log.append(&[0u8, 255, 10, 13]).unwrap();
        }

        let log = MessageLog::open(&path).unwrap();
        let records: Vec<&[u8]> = log.records().collect();
        assert_eq!(records, vec![&b"one"[..], &b"two"[..], &[0u8, 255, 10, 13][..]]);
    }

    #[test]
    fn truncate_head_advances_committed_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sending-storage.log");

        let mut log = MessageLog::open(&path).unwrap();
        log.append(b"one").unwrap();
        log.append(b"two").unwrap();
        assert_eq!(log.first(), Some(&b"one"[..]));

        log.truncate_head(1).unwrap();
        assert_eq!(log.first(), Some(&b"two"[..]));
        log.append(b"three").unwrap();
        drop(log);

        let log = MessageLog::open(&path).unwrap();
        let records: Vec<&[u8]> = log.records().collect();
        assert_eq!(records, vec![&b"two"[..], &b"three"[..]]);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receiving-w1.log");

        {
            let mut log = MessageLog::open(&path).unwrap();
            log.append(b"whole").unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            // Length prefix promising more bytes than were written.
            f.write_all(&20u32.to_be_bytes()).unwrap();
            f.write_all(b"tor").unwrap();
        }

        let mut log = MessageLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
        log.append(b"next").unwrap();
        drop(log);

        let log = MessageLog::open(&path).unwrap();
        let records: Vec<&[u8]> = log.records().collect();
        assert_eq!(records, vec![&b"whole"[..], &b"next"[..]]);
    }
}
