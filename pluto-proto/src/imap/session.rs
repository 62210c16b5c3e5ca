use std::sync::Arc;

use anyhow::Result;
use tokio::sync::OwnedRwLockWriteGuard;

use pluto_mail::flags;
use pluto_mail::user::UserInner;
use pluto_mail::MailboxError;
use pluto_sync::msg::SyncOp;

use crate::engine::Engine;
use crate::imap::command::{anonymous, authenticated, selected};
use crate::imap::flow;
use crate::imap::request::{self, Request};
use crate::imap::response::Reply;

/// The first APPEND phase parked on the session: the parsed header and the
/// user writer guard, held until the literal arrives (AppendEnd) or the
/// session dies (AppendAbort by drop).
pub struct AppendInProgress {
    tag: String,
    folder: String,
    size: usize,
    guard: OwnedRwLockWriteGuard<UserInner>,
}

/// One IMAP session: owns nothing beyond its state, its client id, the
/// identity it emits under, and an in-progress APPEND.
pub struct Instance {
    engine: Arc<Engine>,
    pub state: flow::State,
    client_id: Option<String>,
    emit_identity: Option<String>,
    append: Option<AppendInProgress>,
}

impl Instance {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            state: flow::State::NotAuthenticated,
            client_id: None,
            emit_identity: None,
            append: None,
        }
    }

    /// Size of the literal the connection must read next, when an APPEND
    /// is in progress.
    pub fn append_size(&self) -> Option<usize> {
        self.append.as_ref().map(|a| a.size)
    }

    pub fn is_logout(&self) -> bool {
        matches!(self.state, flow::State::Logout)
    }

    /// Entry for sessions handed over by the distributor: the proxy has
    /// already authenticated the client. The worker field of the hello
    /// names the identity to emit under when we are storage standing in.
    pub async fn preauthenticate(&mut self, client: &str, worker: Option<String>) -> Result<()> {
        let username = client.rsplit_once(':').map(|(u, _)| u).unwrap_or(client);
        let user = self.engine.users().open(username).await?;
        tracing::debug!(user=%username, client=%client, "proxied session attached");
        self.client_id = Some(client.to_owned());
        self.emit_identity = worker;
        self.state = flow::State::Authenticated(user);
        Ok(())
    }

    /// Handles one request line. Internal failures become the fatal reply;
    /// everything else is an ordinary tagged answer.
    pub async fn request(&mut self, line: &str) -> Reply {
        let req = match request::parse(line) {
            Some(req) => req,
            None => return Reply::invalid(),
        };
        if !request::is_known_command(&req.command) {
            return Reply::bad(&req.tag, "Received invalid IMAP command");
        }

        match self.dispatch(&req).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error=%e, command=%req.command, "internal error while handling command");
                Reply::internal_error()
            }
        }
    }

    /// Handles the literal of an in-progress APPEND.
    pub async fn literal(&mut self, bytes: &[u8]) -> Reply {
        let append = match self.append.take() {
            Some(append) => append,
            None => return Reply::invalid(),
        };
        match self.append_end(append, bytes).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error=%e, "internal error while finishing APPEND");
                Reply::internal_error()
            }
        }
    }

    async fn dispatch(&mut self, req: &Request) -> Result<Reply> {
        // APPEND is two-phase; the session drives it so the writer guard
        // can outlive a single dispatch.
        if req.command == "APPEND"
            && !matches!(
                self.state,
                flow::State::NotAuthenticated | flow::State::Logout
            )
        {
            return self.append_begin(req).await;
        }

        let (reply, transition) = match &self.state {
            flow::State::NotAuthenticated => {
                anonymous::dispatch(anonymous::AnonymousContext {
                    req,
                    engine: &self.engine,
                })
                .await?
            }
            flow::State::Authenticated(user) => {
                authenticated::dispatch(authenticated::AuthenticatedContext {
                    req,
                    engine: &self.engine,
                    user,
                    emit_identity: self.emit_identity.as_deref(),
                })
                .await?
            }
            flow::State::Mailbox(user, folder) => {
                selected::dispatch(selected::SelectedContext {
                    req,
                    engine: &self.engine,
                    user,
                    folder,
                    emit_identity: self.emit_identity.as_deref(),
                })
                .await?
            }
            flow::State::Logout => (
                Reply::bad(&req.tag, "No commands are allowed in the LOGOUT state"),
                flow::Transition::None,
            ),
        };

        if let flow::Transition::Authenticate(user) = &transition {
            if self.client_id.is_none() {
                self.client_id = Some(self.engine.next_client_id(&user.username));
            }
        }
        let state = std::mem::replace(&mut self.state, flow::State::Logout);
        self.state = state.apply(transition)?;
        Ok(reply)
    }

    /// AppendBegin: parse the header, check the target folder, take the
    /// writer lock, answer with the continuation.
    async fn append_begin(&mut self, req: &Request) -> Result<Reply> {
        let user = match &self.state {
            flow::State::Authenticated(user) | flow::State::Mailbox(user, _) => user.clone(),
            _ => unreachable!("append_begin is only called in authenticated states"),
        };

        let Some(args) = parse_append(&req.payload) else {
            return Ok(Reply::bad(
                &req.tag,
                "Command APPEND was sent with invalid arguments",
            ));
        };

        let guard = user.write_owned().await;
        if !guard.has_folder(&args.folder) {
            return Ok(Reply::no(
                &req.tag,
                "[TRYCREATE] Mailbox to append to does not exist",
            ));
        }
        let folder = guard.canonical_name(&args.folder);

        self.append = Some(AppendInProgress {
            tag: req.tag.clone(),
            folder,
            size: args.size,
            guard,
        });
        Ok(Reply::continuation("Ready for literal data"))
    }

    /// AppendEnd: deliver to the Maildir, register the filename, emit, and
    /// release the writer lock held since AppendBegin.
    async fn append_end(&self, mut append: AppendInProgress, bytes: &[u8]) -> Result<Reply> {
        match append.guard.append(&append.folder, bytes) {
            Ok((file, pair)) => {
                self.engine
                    .emit(
                        self.emit_identity.as_deref(),
                        append.guard.username(),
                        &append.folder,
                        SyncOp::Append {
                            file,
                            tag: pair.tag,
                            content: bytes.to_vec(),
                        },
                    )
                    .await?;
                Ok(Reply::ok(&append.tag, "APPEND completed"))
            }
            Err(MailboxError::NoSuchFolder(_)) => Ok(Reply::no(
                &append.tag,
                "Mailbox to append to does not exist",
            )),
            Err(e) => Err(e.into()),
        }
    }
}

struct AppendArgs {
    folder: String,
    size: usize,
}

/// `APPEND <folder> [(<flags>)] ["<datetime>"] {<n>}`. Flags and datetime
/// are validated and then discarded: delivery always goes through the
/// unseen path, flags arrive later via STORE.
fn parse_append(payload: &str) -> Option<AppendArgs> {
    let payload = payload.trim();
    let literal_at = payload.rfind('{')?;
    let size: usize = payload[literal_at..]
        .strip_prefix('{')?
        .strip_suffix('}')?
        .parse()
        .ok()?;

    let head = payload[..literal_at].trim();
    let (folder, rest) = take_token(head)?;
    if folder.is_empty() {
        return None;
    }

    let mut rest = rest.trim_start();
    if rest.starts_with('(') {
        let close = rest.find(')')?;
        flags::parse_flag_list(&rest[..=close])?;
        rest = rest[close + 1..].trim_start();
    }
    if !rest.is_empty() {
        let datetime = rest.strip_prefix('"')?.strip_suffix('"')?;
        chrono::DateTime::parse_from_str(datetime, "%d-%b-%Y %H:%M:%S %z").ok()?;
    }

    Some(AppendArgs { folder, size })
}

fn take_token(s: &str) -> Option<(String, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    if let Some(rest) = s.strip_prefix('"') {
        let end = rest.find('"')?;
        Some((rest[..end].to_owned(), &rest[end + 1..]))
    } else {
        let end = s.find(char::is_whitespace).unwrap_or(s.len());
        Some((s[..end].to_owned(), &s[end..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_header_variants() {
        let args = parse_append("INBOX {12}").unwrap();
        assert_eq!(args.folder, "INBOX");
        assert_eq!(args.size, 12);

        let args = parse_append("\"My Folder\" (\\Seen) {3}").unwrap();
        assert_eq!(args.folder, "My Folder");
        assert_eq!(args.size, 3);

        let args =
            parse_append("work (\\Flagged) \"23-Jul-2024 08:15:00 +0000\" {1024}").unwrap();
        assert_eq!(args.folder, "work");
        assert_eq!(args.size, 1024);
    }

    #[test]
    fn append_header_rejects_garbage() {
        assert!(parse_append("INBOX").is_none());
        assert!(parse_append("{12}").is_none());
        assert!(parse_append("INBOX {nope}").is_none());
        assert!(parse_append("INBOX (\\Bogus) {12}").is_none());
        assert!(parse_append("INBOX \"not a date\" {12}").is_none());
    }
}
