use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;

use pluto_mail::user::Users;
use pluto_proto::engine::{Engine, Route};
use pluto_proto::imap;
use pluto_proto::proxy::Proxy;
use pluto_sync::peer::PeerChannel;
use pluto_sync::receiver::Receiver;
use pluto_sync::sender::Sender;
use pluto_user::config::*;
use pluto_user::login::demo_provider::DemoLoginProvider;
use pluto_user::login::static_provider::StaticLoginProvider;
use pluto_user::login::ArcLoginProvider;
use pluto_user::tls;

/// Loopback single-worker deployment on a plaintext port, with temporary
/// state roots and the demo account. Exists for the test harness.
pub fn dev_config() -> Config {
    let root = std::env::temp_dir().join(format!("pluto-dev-{}", std::process::id()));
    Config {
        hierarchy_separator: '.',
        internal: InternalConfig::default(),
        users: LoginStaticConfig {
            user_list: root.join("users.toml"),
        },
        distributor: None,
        workers: vec![WorkerConfig {
            name: "worker-1".to_string(),
            bind_addr: "[::1]:1143".parse().unwrap(),
            sync_addr: "[::1]:2143".parse().unwrap(),
            crdt_layer_root: root.join("crdt"),
            maildir_root: root.join("maildir"),
            tls: None,
        }],
        storage: None,
    }
}

async fn login_provider(config: &Config, dev: bool) -> Result<ArcLoginProvider> {
    if dev {
        Ok(Arc::new(DemoLoginProvider))
    } else {
        Ok(Arc::new(StaticLoginProvider::new(config.users.clone()).await?))
    }
}

/// A ctrl-c flips the exit flag; listeners drain their connections.
fn must_exit() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("received interrupt, shutting down");
        let _ = tx.send(true);
    });
    rx
}

pub async fn run_worker(config: Config, name: &str, dev: bool) -> Result<()> {
    let wconf = config
        .worker(name)
        .cloned()
        .ok_or_else(|| anyhow!("worker {} is not in the configuration", name))?;
    std::fs::create_dir_all(&wconf.crdt_layer_root)?;

    let users = Arc::new(Users::new(
        wconf.crdt_layer_root.clone(),
        wconf.maildir_root.clone(),
        config.hierarchy_separator,
    ));
    let login = login_provider(&config, dev).await?;
    let exit = must_exit();

    let mut peers = HashMap::new();
    if let Some(storage) = &config.storage {
        let tls_conf = wconf
            .tls
            .as_ref()
            .ok_or_else(|| anyhow!("worker {} needs TLS material to replicate", name))?;

        let (channel, queue) = PeerChannel::open(&wconf.crdt_layer_root, &storage.name, storage.sync_addr)?;
        peers.insert(storage.name.clone(), channel.clone());

        let sender = Sender::new(
            channel,
            name.to_owned(),
            tls::mutual_connector(tls_conf)?,
            Duration::from_secs(config.internal.conn_timeout),
            config.internal.conn_retry,
            queue,
        );
        tokio::spawn(sender.run());

        let listener = TcpListener::bind(wconf.sync_addr).await?;
        let acceptor = tls::mutual_acceptor(tls_conf)?;
        let receiver = Arc::new(Receiver::new(users.clone(), peers.clone()));
        let receiver_exit = exit.clone();
        tokio::spawn(async move {
            if let Err(e) = receiver.run(listener, acceptor, receiver_exit).await {
                tracing::error!(error=%e, "sync listener failed");
            }
        });
    }

    let engine = Arc::new(Engine::new(
        users,
        login,
        peers,
        Route::Local {
            identity: name.to_owned(),
        },
    ));
    // Only the distributor dials a worker's mail port, so it demands the
    // internal client certificate like the sync port does.
    let acceptor = if dev {
        None
    } else {
        let tls_conf = wconf
            .tls
            .as_ref()
            .ok_or_else(|| anyhow!("worker {} has no TLS configuration", name))?;
        Some(tls::mutual_acceptor(tls_conf)?)
    };
    imap::new(wconf.bind_addr, acceptor, engine).run(exit).await
}

pub async fn run_storage(config: Config, dev: bool) -> Result<()> {
    let sconf = config
        .storage
        .clone()
        .ok_or_else(|| anyhow!("no storage section in the configuration"))?;
    if dev {
        bail!("storage has no dev mode");
    }
    std::fs::create_dir_all(&sconf.crdt_layer_root)?;

    let users = Arc::new(Users::new(
        sconf.crdt_layer_root.clone(),
        sconf.maildir_root.clone(),
        config.hierarchy_separator,
    ));
    let login = login_provider(&config, dev).await?;
    let exit = must_exit();

    let tls_conf = sconf
        .tls
        .as_ref()
        .ok_or_else(|| anyhow!("storage needs TLS material"))?;

    let mut peers = HashMap::new();
    for worker in &config.workers {
        let (channel, queue) =
            PeerChannel::open(&sconf.crdt_layer_root, &worker.name, worker.sync_addr)?;
        peers.insert(worker.name.clone(), channel.clone());

        let sender = Sender::new(
            channel,
            sconf.name.clone(),
            tls::mutual_connector(tls_conf)?,
            Duration::from_secs(config.internal.conn_timeout),
            config.internal.conn_retry,
            queue,
        );
        tokio::spawn(sender.run());
    }

    let listener = TcpListener::bind(sconf.sync_addr).await?;
    let acceptor = tls::mutual_acceptor(tls_conf)?;
    let receiver = Arc::new(Receiver::new(users.clone(), peers.clone()));
    let receiver_exit = exit.clone();
    tokio::spawn(async move {
        if let Err(e) = receiver.run(listener, acceptor, receiver_exit).await {
            tracing::error!(error=%e, "sync listener failed");
        }
    });

    let worker_names: Vec<String> = config.workers.iter().map(|w| w.name.clone()).collect();
    let engine = Arc::new(Engine::new(
        users,
        login,
        peers,
        Route::Standby {
            workers: worker_names,
        },
    ));
    imap::new(sconf.bind_addr, Some(tls::mutual_acceptor(tls_conf)?), engine)
        .run(exit)
        .await
}

pub async fn run_distributor(config: Config) -> Result<()> {
    let dconf = config
        .distributor
        .clone()
        .ok_or_else(|| anyhow!("no distributor section in the configuration"))?;
    let tls_conf = dconf
        .tls
        .as_ref()
        .ok_or_else(|| anyhow!("distributor needs TLS material"))?;

    let login = login_provider(&config, false).await?;
    let acceptor = tls::acceptor(tls_conf)?;
    let connector = tls::mutual_connector(tls_conf)?;
    let exit = must_exit();

    let proxy = Arc::new(Proxy::new(Arc::new(config), login, connector));
    proxy.run(dconf.bind_addr, Some(acceptor), exit).await
}
