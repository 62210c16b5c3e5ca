use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_rustls::TlsConnector;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use pluto_user::tls;

use crate::frame::Control;
use crate::peer::PeerChannel;
use crate::{ACK_TIMEOUT, KEEPALIVE_INTERVAL};

/// Per-peer sender: drains the send log in order over a mutually
/// authenticated connection, one message in flight, advancing the
/// committed offset on each `> done <`. Reconnection replays whatever is
/// still in the log; exhausting the retry budget aborts the node rather
/// than let the replicas drift apart silently.
pub struct Sender {
    channel: Arc<PeerChannel>,
    local_name: String,
    connector: TlsConnector,
    dial_timeout: Duration,
    max_retry: u32,
    queue: mpsc::Receiver<()>,
}

impl Sender {
    pub fn new(
        channel: Arc<PeerChannel>,
        local_name: String,
        connector: TlsConnector,
        dial_timeout: Duration,
        max_retry: u32,
        queue: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            channel,
            local_name,
            connector,
            dial_timeout,
            max_retry,
            queue,
        }
    }

    pub async fn run(mut self) {
        let mut attempts: u32 = 0;
        loop {
            match self.connection(&mut attempts).await {
                Ok(()) => {
                    tracing::info!(peer=%self.channel.name(), "sender task exiting");
                    return;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts > self.max_retry {
                        tracing::error!(
                            peer=%self.channel.name(), error=%e,
                            "replication retry budget exhausted, aborting node"
                        );
                        std::process::abort();
                    }
                    let backoff = Duration::from_secs(1 << attempts.min(6));
                    tracing::warn!(
                        peer=%self.channel.name(), error=%e, attempt=attempts,
                        "replication link failed, reconnecting"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    /// One connection's lifetime. `Ok(())` only on orderly shutdown (the
    /// nudge queue closed with nothing left to send).
    async fn connection(&mut self, attempts: &mut u32) -> Result<()> {
        let stream = timeout(self.dial_timeout, TcpStream::connect(self.channel.addr()))
            .await
            .context("dial timed out")?
            .context("dial failed")?;
        let tls = self
            .connector
            .connect(tls::peer_name(&self.channel.addr()), stream)
            .await
            .context("TLS handshake failed")?;
        let mut framed = Framed::new(tls, LengthDelimitedCodec::new());

        framed
            .send(Bytes::from(
                Control::Id {
                    client: self.local_name.clone(),
                    worker: None,
                }
                .encode(),
            ))
            .await?;
        *attempts = 0;
        tracing::info!(peer=%self.channel.name(), "replication link established");

        loop {
            let pending = {
                let log = self.channel.send_log.lock().await;
                log.first().map(|r| r.to_vec())
            };
            match pending {
                Some(record) => {
                    framed.send(Bytes::from(record)).await?;
                    await_ack(&mut framed).await?;
                    self.channel.send_log.lock().await.truncate_head(1)?;
                }
                None => {
                    tokio::select! {
                        nudge = self.queue.recv() => {
                            if nudge.is_none() {
                                return Ok(());
                            }
                        }
                        _ = sleep(KEEPALIVE_INTERVAL) => {
                            framed.send(Bytes::from(Control::Ping.encode())).await?;
                        }
                    }
                }
            }
        }
    }
}

async fn await_ack<S>(framed: &mut Framed<S, LengthDelimitedCodec>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = timeout(ACK_TIMEOUT, framed.next())
            .await
            .context("timed out waiting for acknowledgement")?
            .ok_or_else(|| anyhow!("peer closed the connection"))?
            .context("read failed while waiting for acknowledgement")?;
        match Control::parse(&frame) {
            Some(Control::Done) => return Ok(()),
            Some(Control::Ping) => continue,
            Some(Control::Error) => bail!("peer reported an error"),
            _ => bail!("unexpected frame while waiting for acknowledgement"),
        }
    }
}
