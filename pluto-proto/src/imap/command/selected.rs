use std::sync::Arc;

use anyhow::Result;

use pluto_mail::flags;
use pluto_mail::mailbox::StoreMode;
use pluto_mail::user::UserState;
use pluto_mail::MailboxError;
use pluto_sync::msg::SyncOp;

use crate::engine::Engine;
use crate::imap::command::authenticated::{self, AuthenticatedContext};
use crate::imap::flow::Transition;
use crate::imap::request::Request;
use crate::imap::response::Reply;
use crate::imap::sequence::parse_sequence_set;

pub struct SelectedContext<'a> {
    pub req: &'a Request,
    pub engine: &'a Arc<Engine>,
    pub user: &'a Arc<UserState>,
    pub folder: &'a str,
    pub emit_identity: Option<&'a str>,
}

pub async fn dispatch(ctx: SelectedContext<'_>) -> Result<(Reply, Transition)> {
    match ctx.req.command.as_str() {
        "EXPUNGE" => ctx.expunge().await,
        "STORE" => ctx.store().await,
        // Everything an authenticated session may do stays available with
        // a folder selected.
        _ => {
            authenticated::dispatch(AuthenticatedContext {
                req: ctx.req,
                engine: ctx.engine,
                user: ctx.user,
                emit_identity: ctx.emit_identity,
            })
            .await
        }
    }
}

impl<'a> SelectedContext<'a> {
    async fn expunge(self) -> Result<(Reply, Transition)> {
        let tag = self.req.tag.as_str();
        if !self.req.payload.is_empty() {
            return Ok((Reply::extra_parameters(tag, "EXPUNGE"), Transition::None));
        }

        let mut state = self.user.write().await;
        let records = match state.expunge(self.folder) {
            Ok(records) => records,
            Err(MailboxError::NoSuchFolder(_)) => {
                return Ok((
                    Reply::no(tag, "Selected mailbox does not exist anymore"),
                    Transition::None,
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let mut reply = Reply::ok(tag, "EXPUNGE completed");
        for record in &records {
            reply = reply.data(format!("* {} EXPUNGE", record.seq));
        }
        for record in records {
            self.engine
                .emit(
                    self.emit_identity,
                    state.username(),
                    self.folder,
                    SyncOp::Expunge {
                        file: record.file,
                        pairs: record.pairs,
                        folder_tag: record.folder_pair.map(|p| p.tag),
                    },
                )
                .await?;
        }
        Ok((reply, Transition::None))
    }

    async fn store(self) -> Result<(Reply, Transition)> {
        let tag = self.req.tag.as_str();

        let payload = self.req.payload.trim();
        let Some((seqset, rest)) = payload.split_once(char::is_whitespace) else {
            return Ok((Reply::missing_parameters(tag, "STORE"), Transition::None));
        };
        let rest = rest.trim_start();
        let Some((mode_token, list)) = rest.split_once(char::is_whitespace) else {
            return Ok((Reply::missing_parameters(tag, "STORE"), Transition::None));
        };
        let Some((mode, silent)) = parse_store_mode(mode_token) else {
            return Ok((
                Reply::bad(tag, "Command STORE was sent with an invalid data item"),
                Transition::None,
            ));
        };
        let Some(letters) = flags::parse_flag_list(list.trim()) else {
            return Ok((
                Reply::bad(tag, "Command STORE was sent with an invalid list of flags"),
                Transition::None,
            ));
        };

        let mut state = self.user.write().await;
        let total = match state.folder(self.folder) {
            Ok(folder) => folder.exists(),
            Err(MailboxError::NoSuchFolder(_)) => {
                return Ok((
                    Reply::no(tag, "Selected mailbox does not exist anymore"),
                    Transition::None,
                ))
            }
            Err(e) => return Err(e.into()),
        };
        let Some(positions) = parse_sequence_set(seqset, total) else {
            return Ok((
                Reply::bad(
                    tag,
                    "Command STORE was sent with an invalid sequence number set",
                ),
                Transition::None,
            ));
        };

        let outcomes = state.store(self.folder, &positions, mode, &letters)?;

        let mut reply = Reply::ok(tag, "STORE completed");
        if !silent {
            for outcome in &outcomes {
                reply = reply.data(format!(
                    "* {} FETCH (FLAGS ({}))",
                    outcome.seq,
                    flags::imap_flags(&outcome.letters)
                ));
            }
        }
        for outcome in outcomes {
            if let Some(change) = outcome.change {
                self.engine
                    .emit(
                        self.emit_identity,
                        state.username(),
                        self.folder,
                        SyncOp::Store {
                            old: change.old,
                            new: change.new,
                            pairs: change.pairs,
                            tag: change.tag,
                            content: change.content,
                        },
                    )
                    .await?;
            }
        }
        Ok((reply, Transition::None))
    }
}

fn parse_store_mode(token: &str) -> Option<(StoreMode, bool)> {
    let upper = token.to_ascii_uppercase();
    let (base, silent) = match upper.strip_suffix(".SILENT") {
        Some(base) => (base, true),
        None => (upper.as_str(), false),
    };
    let mode = match base {
        "FLAGS" => StoreMode::Replace,
        "+FLAGS" => StoreMode::Add,
        "-FLAGS" => StoreMode::Remove,
        _ => return None,
    };
    Some((mode, silent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_modes() {
        assert_eq!(parse_store_mode("FLAGS"), Some((StoreMode::Replace, false)));
        assert_eq!(parse_store_mode("+flags"), Some((StoreMode::Add, false)));
        assert_eq!(
            parse_store_mode("-FLAGS.SILENT"),
            Some((StoreMode::Remove, true))
        );
        assert_eq!(parse_store_mode("FLAG"), None);
    }
}
