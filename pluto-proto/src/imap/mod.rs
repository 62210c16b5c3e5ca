pub mod command;
pub mod flow;
pub mod request;
pub mod response;
pub mod sequence;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use pluto_sync::frame::Control;

use crate::engine::Engine;
use crate::imap::response::Reply;
use crate::imap::session::Instance;

const GREETING: &[u8] = b"* OK Pluto ready.\r\n";

/// The mail-port listener. `acceptor` is absent only in `--dev` mode.
pub struct Server {
    bind_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    engine: Arc<Engine>,
}

pub fn new(bind_addr: SocketAddr, acceptor: Option<TlsAcceptor>, engine: Arc<Engine>) -> Server {
    Server {
        bind_addr,
        acceptor,
        engine,
    }
}

impl Server {
    pub async fn run(self, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        tracing::info!("IMAP server listening on {:#}", self.bind_addr);

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
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::info!("IMAP: accepted connection from {}", remote_addr);

            let engine = self.engine.clone();
            let acceptor = self.acceptor.clone();
            connections.push(tokio::spawn(handle_client(engine, acceptor, socket)));
        }
        drop(tcp);

        tracing::info!("IMAP server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }
}

async fn handle_client(engine: Arc<Engine>, acceptor: Option<TlsAcceptor>, socket: TcpStream) {
    let result = match acceptor {
        Some(acceptor) => match acceptor.accept(socket).await {
            Ok(tls) => serve(engine, tls).await,
            Err(e) => {
                tracing::warn!(error=%e, "TLS handshake failed");
                return;
            }
        },
        None => serve(engine, socket).await,
    };
    match result {
        Ok(()) => tracing::debug!("session closed"),
        Err(e) => tracing::debug!(error=%e, "session ended with error"),
    }
}

/// One session: read lines (or an APPEND literal), hand them to the
/// session instance, write the replies. A fatal reply tears the
/// connection down and aborts the node. A disconnect simply drops the
/// session, which releases any held writer lock and any in-progress
/// APPEND.
async fn serve<S>(engine: Arc<Engine>, stream: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    writer.write_all(GREETING).await?;
    writer.flush().await?;

    let mut session = Instance::new(engine);
    loop {
        if let Some(size) = session.append_size() {
            let mut literal = vec![0u8; size];
            reader.read_exact(&mut literal).await?;
            // The CRLF that terminates the APPEND command follows the
            // literal octets.
            let mut terminator = Vec::new();
            reader.read_until(b'\n', &mut terminator).await?;

            let reply = session.literal(&literal).await;
            send(&mut writer, &reply).await?;
            continue;
        }

        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line).into_owned();

        // A session handed over by the distributor announces itself with
        // an id control line instead of LOGIN.
        if let Some(Control::Id { client, worker }) = Control::parse(text.trim_end().as_bytes()) {
            session.preauthenticate(&client, worker).await?;
            continue;
        }

        let reply = session.request(&text).await;
        send(&mut writer, &reply).await?;
        if session.is_logout() {
            return Ok(());
        }
    }
}

async fn send<W>(writer: &mut W, reply: &Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(reply.to_wire().as_bytes()).await?;
    writer.flush().await?;
    if reply.fatal {
        // The local state can no longer be trusted; crash-stop rather
        // than keep serving from a diverged replica.
        tracing::error!("internal server error, aborting node");
        std::process::abort();
    }
    Ok(())
}
