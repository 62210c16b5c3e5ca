use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use futures::stream::FuturesUnordered;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use pluto_mail::user::Users;

use crate::frame::Control;
use crate::msg::SyncMessage;
use crate::peer::PeerChannel;
use crate::vclock::Delivery;
use crate::{apply, MAX_IDLE};

/// Messages held back because their stamp has a gap, per sender identity,
/// keyed by the sender-slot value.
type OrderBuffer = HashMap<String, BTreeMap<u64, SyncMessage>>;

/// Inbound side of the replication channel: one listener on the sync port,
/// one task per peer connection. A data frame is logged, ordered against
/// the link clock, applied, and only then acknowledged.
pub struct Receiver {
    users: Arc<Users>,
    channels: HashMap<String, Arc<PeerChannel>>,
}

impl Receiver {
    pub fn new(users: Arc<Users>, channels: HashMap<String, Arc<PeerChannel>>) -> Self {
        Self { users, channels }
    }

    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        acceptor: TlsAcceptor,
        mut must_exit: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut connections = FuturesUnordered::new();

        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };
            let (socket, remote_addr) = tokio::select! {
                a = listener.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::info!("sync: accepted connection from {}", remote_addr);

            let this = self.clone();
            let acceptor = acceptor.clone();
            connections.push(tokio::spawn(async move {
                match this.handle(socket, acceptor).await {
                    Ok(()) => tracing::debug!("sync connection closed"),
                    Err(e) => tracing::warn!(error=%e, "sync connection failed"),
                }
            }));
        }
        drop(listener);

        tracing::info!("sync listener shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }

    async fn handle(&self, socket: TcpStream, acceptor: TlsAcceptor) -> Result<()> {
        let tls = acceptor.accept(socket).await.context("TLS accept failed")?;
        let mut framed = Framed::new(tls, LengthDelimitedCodec::new());

        let hello = timeout(MAX_IDLE, framed.next())
            .await
            .context("idle timeout before hello")?
            .ok_or_else(|| anyhow!("connection closed before hello"))??;
        let channel = match Control::parse(&hello) {
            Some(Control::Id { client, .. }) => self
                .channels
                .get(&client)
                .cloned()
                .ok_or_else(|| anyhow!("unknown peer {}", client))?,
            _ => bail!("expected an id hello frame"),
        };
        tracing::info!(peer=%channel.name(), "replication link accepted");

        let mut buffer = OrderBuffer::new();
        loop {
            let frame = match timeout(MAX_IDLE, framed.next()).await {
                Err(_) => bail!("idle timeout"),
                Ok(None) => return Ok(()),
                Ok(Some(frame)) => frame?,
            };
            match Control::parse(&frame) {
                Some(Control::Ping) => continue,
                Some(Control::Error) => bail!("peer reported an error"),
                Some(_) => bail!("unexpected control frame"),
                None => (),
            }

            // Durable in the receive log before anything becomes visible.
            channel.note_received(&frame).await?;
            let msg = SyncMessage::decode(&frame)?;

            match channel.delivery(&msg).await {
                Delivery::Duplicate => {
                    tracing::debug!(sender=%msg.sender, "dropping duplicate replication message");
                    framed.send(Bytes::from(Control::Done.encode())).await?;
                }
                Delivery::Deliver => {
                    self.deliver(&channel, &msg).await?;
                    framed.send(Bytes::from(Control::Done.encode())).await?;

                    while let Some(next) = pop_ready(&channel, &mut buffer).await {
                        self.deliver(&channel, &next).await?;
                        framed.send(Bytes::from(Control::Done.encode())).await?;
                    }
                }
                Delivery::Buffer => {
                    tracing::debug!(sender=%msg.sender, "buffering out-of-order replication message");
                    let slot = msg.clock.get(&msg.sender);
                    buffer.entry(msg.sender.clone()).or_default().insert(slot, msg);
                }
            }
        }
    }

    async fn deliver(&self, channel: &PeerChannel, msg: &SyncMessage) -> Result<()> {
        if let Err(e) = apply::apply(&self.users, msg).await {
            // The local state has drifted and cannot be reconciled in
            // place; crash-stop beats divergence.
            tracing::error!(error=%e, user=%msg.user, "downstream application failed, aborting node");
            std::process::abort();
        }
        channel.advance(msg).await?;
        Ok(())
    }
}

/// Pops one buffered message that has become deliverable, if any.
async fn pop_ready(channel: &PeerChannel, buffer: &mut OrderBuffer) -> Option<SyncMessage> {
    let clock = channel.clock.lock().await;
    let mut hit: Option<(String, u64)> = None;
    for (sender, slots) in buffer.iter() {
        let next = clock.get(sender) + 1;
        if let Some(msg) = slots.get(&next) {
            if clock.delivery(sender, &msg.clock) == Delivery::Deliver {
                hit = Some((sender.clone(), next));
                break;
            }
        }
    }
    let (sender, slot) = hit?;
    let slots = buffer.get_mut(&sender)?;
    let msg = slots.remove(&slot);
    if slots.is_empty() {
        buffer.remove(&sender);
    }
    msg
}
