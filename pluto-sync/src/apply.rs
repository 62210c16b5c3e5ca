use anyhow::{Context, Result};

use pluto_mail::user::Users;

use crate::msg::{SyncMessage, SyncOp};

/// Applies one downstream message to the local replica, idempotently:
/// effects with seen tags are no-ops, files are only written when missing,
/// sequence entries only added for newly created files. Runs under the
/// target user's writer lock; the caller acknowledges only after this
/// returns.
pub async fn apply(users: &Users, msg: &SyncMessage) -> Result<()> {
    let user = users
        .open(&msg.user)
        .await
        .with_context(|| format!("resolving state for user {}", msg.user))?;
    let mut state = user.write().await;

    tracing::debug!(user=%msg.user, folder=%msg.folder, sender=%msg.sender, "applying downstream message");

    match &msg.op {
        SyncOp::Create { tag } => state.apply_create(&msg.folder, tag),
        SyncOp::Delete { pairs, mails } => state.apply_delete(&msg.folder, pairs, mails),
        SyncOp::Append { file, tag, content } => {
            state.apply_append(&msg.folder, file, tag, content)
        }
        SyncOp::Expunge {
            file,
            pairs,
            folder_tag,
        } => state.apply_expunge(&msg.folder, file, pairs, folder_tag.as_deref()),
        SyncOp::Store {
            old,
            new,
            pairs,
            tag,
            content,
        } => state.apply_store(&msg.folder, old, new, pairs, tag, content),
    }
    .with_context(|| {
        format!(
            "applying downstream message from {} for {}/{}",
            msg.sender, msg.user, msg.folder
        )
    })
}
