use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::msg::{SyncMessage, SyncOp};
use crate::vclock::{Delivery, VectorClock};
use crate::wal::MessageLog;
use crate::Result;

/// Capacity of the outbound nudge queue; a full queue backpressures the
/// emitting command handler.
pub const OUTBOUND_QUEUE: usize = 128;

/// Everything one node keeps about one peer: the link's vector clock, the
/// send and receive logs, and the handle that wakes the sender task.
pub struct PeerChannel {
    name: String,
    addr: SocketAddr,
    clock_path: PathBuf,
    pub(crate) clock: Mutex<VectorClock>,
    pub(crate) send_log: Mutex<MessageLog>,
    recv_log: Mutex<MessageLog>,
    queue: mpsc::Sender<()>,
}

impl PeerChannel {
    /// Opens (or creates) the per-peer state under the CRDT root:
    /// `sending-<peer>.log`, `receiving-<peer>.log`, `vclock-<peer>.log`.
    /// The returned receiver end of the nudge queue goes to the sender task.
    pub fn open(
        crdt_root: &Path,
        name: &str,
        addr: SocketAddr,
    ) -> Result<(Arc<Self>, mpsc::Receiver<()>)> {
        let clock_path = crdt_root.join(format!("vclock-{}.log", name));
        let clock = VectorClock::load(&clock_path)?;
        let send_log = MessageLog::open(&crdt_root.join(format!("sending-{}.log", name)))?;
        let recv_log = MessageLog::open(&crdt_root.join(format!("receiving-{}.log", name)))?;

        let (queue, rx) = mpsc::channel(OUTBOUND_QUEUE);
        Ok((
            Arc::new(Self {
                name: name.to_owned(),
                addr,
                clock_path,
                clock: Mutex::new(clock),
                send_log: Mutex::new(send_log),
                recv_log: Mutex::new(recv_log),
                queue,
            }),
            rx,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Emits a downstream message: increment `identity`'s clock slot,
    /// checkpoint the clock, append + fsync the send log, then nudge the
    /// sender. Called under the user writer lock, after the OR-Set fsync,
    /// so disk and send log agree on the linearization.
    pub async fn record(&self, identity: &str, user: &str, folder: &str, op: SyncOp) -> Result<()> {
        {
            let mut clock = self.clock.lock().await;
            clock.incr(identity);
            clock.save(&self.clock_path)?;
            let msg = SyncMessage {
                sender: identity.to_owned(),
                clock: clock.clone(),
                user: user.to_owned(),
                folder: folder.to_owned(),
                op,
            };
            self.send_log.lock().await.append(&msg.encode()?)?;
        }
        // The sender task may be gone during shutdown; the record is in the
        // log either way.
        let _ = self.queue.send(()).await;
        Ok(())
    }

    /// Appends a raw inbound frame to the receive log (fsynced) before the
    /// message is classified, applied or acknowledged.
    pub(crate) async fn note_received(&self, raw: &[u8]) -> Result<()> {
        self.recv_log.lock().await.append(raw)
    }

    pub(crate) async fn delivery(&self, msg: &SyncMessage) -> Delivery {
        self.clock.lock().await.delivery(&msg.sender, &msg.clock)
    }

    /// After a delivery: fold the stamp into the link clock and checkpoint.
    pub(crate) async fn advance(&self, msg: &SyncMessage) -> Result<()> {
        let mut clock = self.clock.lock().await;
        clock.merge(&msg.clock);
        clock.save(&self.clock_path)
    }
}
