use crate::imap::flow::Transition;
use crate::imap::request::Request;
use crate::imap::response::Reply;

/// Commands taking no payload reject anything after their name.
pub fn reject_extra(req: &Request) -> Option<(Reply, Transition)> {
    if req.payload.is_empty() {
        None
    } else {
        Some((
            Reply::extra_parameters(&req.tag, &req.command),
            Transition::None,
        ))
    }
}

pub fn capability(tag: &str) -> (Reply, Transition) {
    (
        Reply::ok(tag, "CAPABILITY completed").data("* CAPABILITY IMAP4rev1 AUTH=PLAIN"),
        Transition::None,
    )
}

pub fn noop(tag: &str) -> (Reply, Transition) {
    (Reply::ok(tag, "NOOP completed"), Transition::None)
}

pub fn logout(tag: &str) -> (Reply, Transition) {
    (
        Reply::ok(tag, "LOGOUT completed").data("* BYE Terminating connection"),
        Transition::Logout,
    )
}

/// The listener wraps every session in TLS before the first byte, so
/// STARTTLS has nothing left to do.
pub fn starttls(tag: &str) -> (Reply, Transition) {
    (Reply::bad(tag, "TLS is already active"), Transition::None)
}

pub fn wrong_state(tag: &str, command: &str) -> (Reply, Transition) {
    (
        Reply::bad(
            tag,
            &format!("Command {} cannot be executed in the current state", command),
        ),
        Transition::None,
    )
}
