use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use pluto_sync::frame::Control;
use pluto_user::config::Config;
use pluto_user::login::ArcLoginProvider;
use pluto_user::tls;

use crate::imap::request;
use crate::imap::response::Reply;

const GREETING: &[u8] = b"* OK Pluto ready.\r\n";

/// The distributor front-end: authenticates the client, then hands the
/// whole session to the owning worker — or to storage, under the worker's
/// identity, when the worker is unreachable — and pipes bytes until one
/// side hangs up.
pub struct Proxy {
    config: Arc<Config>,
    login: ArcLoginProvider,
    connector: TlsConnector,
    dial_timeout: Duration,
    counter: AtomicU64,
}

impl Proxy {
    pub fn new(config: Arc<Config>, login: ArcLoginProvider, connector: TlsConnector) -> Self {
        let dial_timeout = Duration::from_secs(config.internal.conn_timeout);
        Self {
            config,
            login,
            connector,
            dial_timeout,
            counter: AtomicU64::new(0),
        }
    }

    pub async fn run(
        self: Arc<Self>,
        bind_addr: SocketAddr,
        acceptor: Option<TlsAcceptor>,
        mut must_exit: watch::Receiver<bool>,
    ) -> Result<()> {
        let tcp = TcpListener::bind(bind_addr).await?;
        tracing::info!("distributor listening on {:#}", bind_addr);

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
            tracing::info!("distributor: accepted connection from {}", remote_addr);

            let this = self.clone();
            let acceptor = acceptor.clone();
            connections.push(tokio::spawn(async move {
                let result = match acceptor {
                    Some(acceptor) => match acceptor.accept(socket).await {
                        Ok(stream) => this.handle(stream).await,
                        Err(e) => {
                            tracing::warn!(error=%e, "TLS handshake failed");
                            return;
                        }
                    },
                    None => this.handle(socket).await,
                };
                if let Err(e) = result {
                    tracing::debug!(error=%e, "proxied session ended with error");
                }
            }));
        }
        drop(tcp);

        while connections.next().await.is_some() {}
        Ok(())
    }

    /// Pre-login dialogue, then the byte pipe.
    async fn handle<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        writer.write_all(GREETING).await?;
        writer.flush().await?;

        loop {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return Ok(());
            }
            let text = String::from_utf8_lossy(&line).into_owned();
            let Some(req) = request::parse(&text) else {
                writer.write_all(Reply::invalid().to_wire().as_bytes()).await?;
                writer.flush().await?;
                continue;
            };

            let reply = match req.command.as_str() {
                "CAPABILITY" => Reply::ok(&req.tag, "CAPABILITY completed")
                    .data("* CAPABILITY IMAP4rev1 AUTH=PLAIN"),
                "NOOP" => Reply::ok(&req.tag, "NOOP completed"),
                "STARTTLS" => Reply::bad(&req.tag, "TLS is already active"),
                "LOGOUT" => {
                    let reply = Reply::ok(&req.tag, "LOGOUT completed")
                        .data("* BYE Terminating connection");
                    writer.write_all(reply.to_wire().as_bytes()).await?;
                    writer.flush().await?;
                    return Ok(());
                }
                "LOGIN" => {
                    let args = request::split_args(&req.payload);
                    if args.len() != 2 {
                        writer
                            .write_all(
                                Reply::missing_parameters(&req.tag, "LOGIN")
                                    .to_wire()
                                    .as_bytes(),
                            )
                            .await?;
                        writer.flush().await?;
                        continue;
                    }
                    if self.login.login(&args[0], &args[1]).await.is_err() {
                        writer
                            .write_all(
                                Reply::no(&req.tag, "Name and / or password wrong")
                                    .to_wire()
                                    .as_bytes(),
                            )
                            .await?;
                        writer.flush().await?;
                        continue;
                    }

                    let mut backend = self.attach(&args[0]).await?;
                    writer
                        .write_all(Reply::ok(&req.tag, "LOGIN completed").to_wire().as_bytes())
                        .await?;
                    writer.flush().await?;

                    // Pipelined bytes already buffered client-side belong
                    // to the backend now.
                    let pending = reader.buffer().to_vec();
                    if !pending.is_empty() {
                        backend.write_all(&pending).await?;
                        backend.flush().await?;
                    }
                    let mut client = reader.into_inner().unsplit(writer);
                    tokio::io::copy_bidirectional(&mut client, &mut backend).await?;
                    return Ok(());
                }
                _ => Reply::bad(
                    &req.tag,
                    &format!(
                        "Command {} cannot be executed in the current state",
                        req.command
                    ),
                ),
            };
            writer.write_all(reply.to_wire().as_bytes()).await?;
            writer.flush().await?;
        }
    }

    /// Dials the owning worker's mail port; falls back to storage with the
    /// worker's name in the hello so storage emits under that identity.
    async fn attach(&self, user: &str) -> Result<TlsStream<TcpStream>> {
        let worker = self
            .config
            .worker_for(user)
            .ok_or_else(|| anyhow!("no workers configured"))?;
        let client_id = format!("{}:{}", user, self.counter.fetch_add(1, Ordering::Relaxed));

        let hello = |worker_marker: Option<String>| {
            let mut line = Control::Id {
                client: client_id.clone(),
                worker: worker_marker,
            }
            .encode();
            line.extend_from_slice(b"\r\n");
            line
        };

        match timeout(self.dial_timeout, TcpStream::connect(worker.bind_addr)).await {
            Ok(Ok(socket)) => {
                let mut stream = self
                    .connector
                    .connect(tls::peer_name(&worker.bind_addr), socket)
                    .await
                    .context("TLS handshake with worker failed")?;
                stream.write_all(&hello(None)).await?;
                stream.flush().await?;
                drain_greeting(&mut stream).await?;
                Ok(stream)
            }
            _ => {
                tracing::warn!(user=%user, worker=%worker.name, "worker unreachable, routing session to storage");
                let storage = self
                    .config
                    .storage
                    .as_ref()
                    .ok_or_else(|| anyhow!("no storage fallback configured"))?;
                let socket = timeout(self.dial_timeout, TcpStream::connect(storage.bind_addr))
                    .await
                    .context("dial to storage timed out")?
                    .context("dial to storage failed")?;
                let mut stream = self
                    .connector
                    .connect(tls::peer_name(&storage.bind_addr), socket)
                    .await
                    .context("TLS handshake with storage failed")?;
                stream.write_all(&hello(Some(worker.name.clone()))).await?;
                stream.flush().await?;
                drain_greeting(&mut stream).await?;
                Ok(stream)
            }
        }
    }
}

/// The backend greets every connection; the client already got ours, so
/// its copy must not leak into the piped session.
async fn drain_greeting<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    loop {
        if stream.read_u8().await? == b'\n' {
            return Ok(());
        }
    }
}
