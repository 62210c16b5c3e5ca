//! Replication laws, exercised in-process across two state roots: the
//! worker's emitted history, run through a send-log round trip, converges
//! a fresh storage replica onto the worker's state, and applying the same
//! history twice changes nothing.

use std::path::Path;

use pluto_mail::mailbox::StoreMode;
use pluto_mail::user::Users;
use pluto_sync::apply;
use pluto_sync::msg::{SyncMessage, SyncOp};
use pluto_sync::vclock::VectorClock;
use pluto_sync::wal::MessageLog;

/// Drives a worker-side session (create, two appends, store, expunge) and
/// returns the downstream messages it would emit, stamped in order.
async fn drive_worker(root: &Path) -> (Users, Vec<SyncMessage>) {
    let users = Users::new(root.join("crdt"), root.join("maildir"), '.');
    let user = users.open("alice").await.unwrap();

    let mut clock = VectorClock::default();
    let mut messages: Vec<SyncMessage> = Vec::new();
    let mut stamp = |op: SyncOp, folder: &str| {
        clock.incr("worker-1");
        SyncMessage {
            sender: "worker-1".to_string(),
            clock: clock.clone(),
            user: "alice".to_string(),
            folder: folder.to_string(),
            op,
        }
    };

    let mut state = user.write().await;

    let pair = state.create("work").unwrap();
    messages.push(stamp(SyncOp::Create { tag: pair.tag }, "work"));

    let (file, pair) = state.append("work", b"first mail").unwrap();
    messages.push(stamp(
        SyncOp::Append {
            file,
            tag: pair.tag,
            content: b"first mail".to_vec(),
        },
        "work",
    ));

    let (file, pair) = state.append("work", b"second mail").unwrap();
    messages.push(stamp(
        SyncOp::Append {
            file,
            tag: pair.tag,
            content: b"second mail".to_vec(),
        },
        "work",
    ));

    for outcome in state.store("work", &[1], StoreMode::Add, "T").unwrap() {
        let change = outcome.change.unwrap();
        messages.push(stamp(
            SyncOp::Store {
                old: change.old,
                new: change.new,
                pairs: change.pairs,
                tag: change.tag,
                content: change.content,
            },
            "work",
        ));
    }

    for record in state.expunge("work").unwrap() {
        messages.push(stamp(
            SyncOp::Expunge {
                file: record.file,
                pairs: record.pairs,
                folder_tag: record.folder_pair.map(|p| p.tag),
            },
            "work",
        ));
    }

    drop(state);
    (users, messages)
}

/// Send-log round trip: everything goes through encode + fsync + replay,
/// the path a reconnecting peer exercises.
fn through_send_log(root: &Path, messages: &[SyncMessage]) -> Vec<SyncMessage> {
    let path = root.join("sending-storage.log");
    {
        let mut log = MessageLog::open(&path).unwrap();
        for msg in messages {
            log.append(&msg.encode().unwrap()).unwrap();
        }
    }
    let log = MessageLog::open(&path).unwrap();
    log.records()
        .map(|r| SyncMessage::decode(r).unwrap())
        .collect()
}

async fn folder_view(users: &Users, folder: &str) -> (Vec<String>, Vec<String>) {
    let user = users.open("alice").await.unwrap();
    let state = user.read().await;
    let folder = state.folder(folder).unwrap();
    let mut mails = folder.mails();
    mails.sort();
    (folder.seq_list().to_vec(), mails)
}

#[tokio::test]
async fn send_log_replay_converges_a_fresh_replica() {
    let worker_dir = tempfile::tempdir().unwrap();
    let storage_dir = tempfile::tempdir().unwrap();

    let (worker_users, messages) = drive_worker(worker_dir.path()).await;
    let replayed = through_send_log(worker_dir.path(), &messages);
    assert_eq!(replayed, messages);

    let storage_users = Users::new(
        storage_dir.path().join("crdt"),
        storage_dir.path().join("maildir"),
        '.',
    );
    for msg in &replayed {
        apply::apply(&storage_users, msg).await.unwrap();
    }

    let (worker_seq, worker_mails) = folder_view(&worker_users, "work").await;
    let (storage_seq, storage_mails) = folder_view(&storage_users, "work").await;
    assert_eq!(worker_seq, storage_seq);
    assert_eq!(worker_mails, storage_mails);
    // The flagged first mail is gone, the second remains.
    assert_eq!(worker_seq.len(), 1);

    let file = &storage_seq[0];
    let worker_body =
        std::fs::read(worker_dir.path().join("maildir/alice/work/cur").join(file)).unwrap();
    let storage_body =
        std::fs::read(storage_dir.path().join("maildir/alice/work/cur").join(file)).unwrap();
    assert_eq!(worker_body, storage_body);
    assert_eq!(worker_body, b"second mail");
}

#[tokio::test]
async fn applying_history_twice_is_idempotent() {
    let worker_dir = tempfile::tempdir().unwrap();
    let storage_dir = tempfile::tempdir().unwrap();

    let (_worker_users, messages) = drive_worker(worker_dir.path()).await;
    let storage_users = Users::new(
        storage_dir.path().join("crdt"),
        storage_dir.path().join("maildir"),
        '.',
    );

    for msg in &messages {
        apply::apply(&storage_users, msg).await.unwrap();
    }
    let (first_seq, first_mails) = folder_view(&storage_users, "work").await;

    for msg in &messages {
        apply::apply(&storage_users, msg).await.unwrap();
    }
    let (second_seq, second_mails) = folder_view(&storage_users, "work").await;

    assert_eq!(first_seq, second_seq);
    assert_eq!(first_mails, second_mails);
}

#[tokio::test]
async fn partitioned_suffix_replays_after_reconnect() {
    let worker_dir = tempfile::tempdir().unwrap();
    let storage_dir = tempfile::tempdir().unwrap();

    let (_worker_users, messages) = drive_worker(worker_dir.path()).await;
    let storage_users = Users::new(
        storage_dir.path().join("crdt"),
        storage_dir.path().join("maildir"),
        '.',
    );

    // The link drops before the expunge reaches storage.
    let (before, after) = messages.split_at(messages.len() - 1);
    for msg in before {
        apply::apply(&storage_users, msg).await.unwrap();
    }
    let (seq, _) = folder_view(&storage_users, "work").await;
    assert_eq!(seq.len(), 2);

    // Reconnect: the sender replays the unacknowledged suffix of its log.
    for msg in after {
        apply::apply(&storage_users, msg).await.unwrap();
    }
    let (seq, mails) = folder_view(&storage_users, "work").await;
    assert_eq!(seq.len(), 1);
    assert_eq!(mails.len(), 1);
}
