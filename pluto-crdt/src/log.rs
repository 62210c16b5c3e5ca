use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::Error;

/// One effect as it sits on disk. `add` registers a `(value, tag)` pair,
/// `rm` retracts one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogOp {
    Add,
    Rm,
}

#[derive(Debug)]
pub(crate) struct LogRecord {
    pub op: LogOp,
    pub value: String,
    pub tag: String,
}

/// Append-only, fsynced, line-oriented log backing one OR-Set.
///
/// Record format: `op\tvalue\ttag\n`, with `\\`, `\t` and `\n` escaped
/// inside fields. A truncated trailing record (crash mid-append) is dropped
/// at open time and the file is cut back to the last complete record.
pub(crate) struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    pub fn open(path: &Path) -> Result<(Self, Vec<LogRecord>), Error> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|source| Error::Io {
                path: path.to_owned(),
                source,
            })?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;

        let valid_len = match raw.iter().rposition(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None => 0,
        };
        if valid_len < raw.len() {
            tracing::warn!(
                path = %path.display(),
                dropped = raw.len() - valid_len,
                "dropping truncated trailing CRDT log record"
            );
            file.set_len(valid_len as u64).map_err(|source| Error::Io {
                path: path.to_owned(),
                source,
            })?;
        }

        let mut records = Vec::new();
        for (lineno, line) in raw[..valid_len].split(|b| *b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let text = std::str::from_utf8(line).map_err(|_| Error::Corrupt {
                path: path.to_owned(),
                line: lineno + 1,
            })?;
            records.push(parse_record(text).ok_or_else(|| Error::Corrupt {
                path: path.to_owned(),
                line: lineno + 1,
            })?);
        }

        Ok((
            Self {
                path: path.to_owned(),
                file,
            },
            records,
        ))
    }

    /// Appends the given records as one write and fsyncs before returning.
    pub fn append(&mut self, records: &[LogRecord]) -> Result<(), Error> {
        let mut buf = String::new();
        for rec in records {
            let op = match rec.op {
                LogOp::Add => "add",
                LogOp::Rm => "rm",
            };
            buf.push_str(op);
            buf.push('\t');
            buf.push_str(&escape(&rec.value));
            buf.push('\t');
            buf.push_str(&escape(&rec.tag));
            buf.push('\n');
        }

        self.file
            .write_all(buf.as_bytes())
            .and_then(|_| self.file.sync_data())
            .map_err(|source| Error::Io {
                path: self.path.clone(),
                source,
            })
    }
}

fn parse_record(line: &str) -> Option<LogRecord> {
    let mut fields = split_fields(line);
    if fields.len() != 3 {
        return None;
    }
    let tag = fields.pop().unwrap();
    let value = fields.pop().unwrap();
    let op = match fields.pop().unwrap().as_str() {
        "add" => LogOp::Add,
        "rm" => LogOp::Rm,
        _ => return None,
    };
    Some(LogRecord { op, value, tag })
}

/// Splits on unescaped tabs and unescapes each field in one pass.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\t' => fields.push(String::new()),
            '\\' => {
                let field = fields.last_mut().unwrap();
                match chars.next() {
                    Some('t') => field.push('\t'),
                    Some('n') => field.push('\n'),
                    Some('\\') => field.push('\\'),
                    Some(other) => field.push(other),
                    None => field.push('\\'),
                }
            }
            _ => fields.last_mut().unwrap().push(c),
        }
    }
    fields
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trip() {
        for v in ["plain", "with\ttab", "with\nnewline", "back\\slash", ""] {
            let line = format!("add\t{}\t{}", escape(v), escape("tag"));
            let rec = parse_record(&line).unwrap();
            assert_eq!(rec.value, v);
            assert_eq!(rec.tag, "tag");
        }
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(parse_record("add\tonly-two-fields").is_none());
        assert!(parse_record("bogus\tv\tt").is_none());
    }
}
