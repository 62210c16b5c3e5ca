use std::sync::Arc;

use anyhow::Result;

use pluto_mail::flags;
use pluto_mail::user::UserState;
use pluto_mail::MailboxError;
use pluto_sync::msg::SyncOp;

use crate::engine::Engine;
use crate::imap::command::anystate;
use crate::imap::flow::Transition;
use crate::imap::request::{self, Request};
use crate::imap::response::Reply;

pub struct AuthenticatedContext<'a> {
    pub req: &'a Request,
    pub engine: &'a Arc<Engine>,
    pub user: &'a Arc<UserState>,
    pub emit_identity: Option<&'a str>,
}

pub async fn dispatch(ctx: AuthenticatedContext<'_>) -> Result<(Reply, Transition)> {
    let tag = ctx.req.tag.as_str();
    match ctx.req.command.as_str() {
        "CAPABILITY" => {
            Ok(anystate::reject_extra(ctx.req).unwrap_or_else(|| anystate::capability(tag)))
        }
        "NOOP" => Ok(anystate::reject_extra(ctx.req).unwrap_or_else(|| anystate::noop(tag))),
        "LOGOUT" => Ok(anystate::reject_extra(ctx.req).unwrap_or_else(|| anystate::logout(tag))),
        "STARTTLS" => {
            Ok(anystate::reject_extra(ctx.req).unwrap_or_else(|| anystate::starttls(tag)))
        }

        "SELECT" => ctx.select().await,
        "CREATE" => ctx.create().await,
        "DELETE" => ctx.delete().await,
        "LIST" => ctx.list().await,

        // APPEND is driven by the session itself (two-phase, the writer
        // guard outlives this dispatch); everything else is out of place.
        other => Ok(anystate::wrong_state(tag, other)),
    }
}

impl<'a> AuthenticatedContext<'a> {
    async fn select(self) -> Result<(Reply, Transition)> {
        let tag = self.req.tag.as_str();
        let args = request::split_args(&self.req.payload);
        if args.len() > 1 {
            return Ok((Reply::extra_parameters(tag, "SELECT"), Transition::None));
        }
        if args.is_empty() {
            return Ok((Reply::missing_parameters(tag, "SELECT"), Transition::None));
        }

        let state = self.user.read().await;
        match state.select(&args[0]) {
            Ok(summary) => {
                let flag_list = flags::supported_list();
                let reply = Reply::ok(tag, "[READ-WRITE] SELECT completed")
                    .data(format!("* {} EXISTS", summary.exists))
                    .data(format!("* {} RECENT", summary.recent))
                    .data(format!("* FLAGS ({})", flag_list))
                    .data(format!("* OK [PERMANENTFLAGS ({})]", flag_list));
                Ok((reply, Transition::Select(summary.folder)))
            }
            Err(MailboxError::NoSuchFolder(_)) => Ok((
                Reply::no(tag, "SELECT failure, not a valid mailbox"),
                Transition::None,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(self) -> Result<(Reply, Transition)> {
        let tag = self.req.tag.as_str();
        let args = request::split_args(&self.req.payload);
        if args.len() > 1 {
            return Ok((Reply::extra_parameters(tag, "CREATE"), Transition::None));
        }
        if args.is_empty() {
            return Ok((Reply::missing_parameters(tag, "CREATE"), Transition::None));
        }

        let sep = self.engine.hierarchy_separator();
        let name = args[0].strip_suffix(sep).unwrap_or(args[0].as_str());

        let mut state = self.user.write().await;
        match state.create(name) {
            Ok(pair) => {
                self.engine
                    .emit(
                        self.emit_identity,
                        state.username(),
                        name,
                        SyncOp::Create { tag: pair.tag },
                    )
                    .await?;
                Ok((Reply::ok(tag, "CREATE completed"), Transition::None))
            }
            Err(MailboxError::Reserved) => Ok((
                Reply::no(tag, "New mailbox cannot be named INBOX"),
                Transition::None,
            )),
            Err(MailboxError::Exists(_)) => Ok((
                Reply::no(
                    tag,
                    "New mailbox cannot be named after already existing mailbox",
                ),
                Transition::None,
            )),
            Err(MailboxError::BadName(_)) => Ok((
                Reply::no(tag, "New mailbox name is not valid"),
                Transition::None,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(self) -> Result<(Reply, Transition)> {
        let tag = self.req.tag.as_str();
        let args = request::split_args(&self.req.payload);
        if args.len() > 1 {
            return Ok((Reply::extra_parameters(tag, "DELETE"), Transition::None));
        }
        if args.is_empty() {
            return Ok((Reply::missing_parameters(tag, "DELETE"), Transition::None));
        }

        let mut state = self.user.write().await;
        match state.delete(&args[0]) {
            Ok((pairs, mails)) => {
                self.engine
                    .emit(
                        self.emit_identity,
                        state.username(),
                        &args[0],
                        SyncOp::Delete { pairs, mails },
                    )
                    .await?;
                Ok((Reply::ok(tag, "DELETE completed"), Transition::None))
            }
            Err(MailboxError::Reserved) => Ok((
                Reply::no(tag, "Forbidden to delete INBOX"),
                Transition::None,
            )),
            Err(MailboxError::NoSuchFolder(_)) => Ok((
                Reply::no(tag, "Cannot delete mailbox that does not exist"),
                Transition::None,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(self) -> Result<(Reply, Transition)> {
        let tag = self.req.tag.as_str();
        let args = request::split_args(&self.req.payload);
        if args.len() > 2 {
            return Ok((Reply::extra_parameters(tag, "LIST"), Transition::None));
        }
        if args.len() < 2 {
            return Ok((Reply::missing_parameters(tag, "LIST"), Transition::None));
        }
        let pattern = format!("{}{}", args[0], args[1]);

        let sep = self.engine.hierarchy_separator();
        let state = self.user.read().await;
        let mut reply = Reply::ok(tag, "LIST completed");
        for folder in state.list(&pattern) {
            reply = reply.data(format!("* LIST () \"{}\" {}", sep, folder));
        }
        Ok((reply, Transition::None))
    }
}
