use std::sync::Arc;

use anyhow::Result;

use pluto_mail::MailboxError;

use crate::engine::Engine;
use crate::imap::command::anystate;
use crate::imap::flow::Transition;
use crate::imap::request::{self, Request};
use crate::imap::response::Reply;

pub struct AnonymousContext<'a> {
    pub req: &'a Request,
    pub engine: &'a Arc<Engine>,
}

pub async fn dispatch(ctx: AnonymousContext<'_>) -> Result<(Reply, Transition)> {
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
        "LOGIN" => ctx.login().await,
        other => Ok(anystate::wrong_state(tag, other)),
    }
}

impl<'a> AnonymousContext<'a> {
    async fn login(self) -> Result<(Reply, Transition)> {
        let tag = self.req.tag.as_str();
        let args = request::split_args(&self.req.payload);
        if args.len() > 2 {
            return Ok((Reply::extra_parameters(tag, "LOGIN"), Transition::None));
        }
        if args.len() < 2 {
            return Ok((Reply::missing_parameters(tag, "LOGIN"), Transition::None));
        }

        if let Err(e) = self
            .engine
            .login_provider()
            .login(&args[0], &args[1])
            .await
        {
            tracing::debug!(user=%args[0], error=%e, "rejected login");
            return Ok((
                Reply::no(tag, "Name and / or password wrong"),
                Transition::None,
            ));
        }

        match self.engine.users().open(&args[0]).await {
            Ok(user) => Ok((
                Reply::ok(tag, "LOGIN completed"),
                Transition::Authenticate(user),
            )),
            Err(MailboxError::BadName(_)) => Ok((
                Reply::no(tag, "Name and / or password wrong"),
                Transition::None,
            )),
            Err(e) => Err(e.into()),
        }
    }
}
