use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use pluto_mail::user::Users;
use pluto_sync::msg::SyncOp;
use pluto_sync::peer::PeerChannel;
use pluto_user::config::stable_assign;
use pluto_user::login::ArcLoginProvider;

/// How a node stamps and routes its downstream emissions.
pub enum Route {
    /// A worker: every mutation goes to every peer (storage), under the
    /// worker's own identity.
    Local { identity: String },
    /// Storage standing in for failed workers: a mutation goes only to the
    /// channel of the user's owning worker, under that worker's identity,
    /// so the worker replays its own history when it rejoins.
    Standby { workers: Vec<String> },
}

/// The per-node service object: user registry, login provider, peer
/// channels and emission routing. Worker and storage both run one; the
/// distributor runs none.
pub struct Engine {
    users: Arc<Users>,
    login: ArcLoginProvider,
    peers: HashMap<String, Arc<PeerChannel>>,
    route: Route,
    conn_counter: AtomicU64,
}

impl Engine {
    pub fn new(
        users: Arc<Users>,
        login: ArcLoginProvider,
        peers: HashMap<String, Arc<PeerChannel>>,
        route: Route,
    ) -> Self {
        Self {
            users,
            login,
            peers,
            route,
            conn_counter: AtomicU64::new(0),
        }
    }

    pub fn users(&self) -> &Arc<Users> {
        &self.users
    }

    pub fn login_provider(&self) -> &ArcLoginProvider {
        &self.login
    }

    pub fn hierarchy_separator(&self) -> char {
        self.users.hierarchy_separator()
    }

    pub fn next_client_id(&self, user: &str) -> String {
        format!("{}:{}", user, self.conn_counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Emits one downstream message. Callers hold the user writer lock and
    /// have already fsynced the OR-Set effect; a failure here is a failed
    /// log write and therefore fatal to the node.
    pub async fn emit(
        &self,
        identity: Option<&str>,
        user: &str,
        folder: &str,
        op: SyncOp,
    ) -> Result<()> {
        match &self.route {
            Route::Local { identity: me } => {
                for channel in self.peers.values() {
                    channel
                        .record(me, user, folder, op.clone())
                        .await
                        .with_context(|| format!("recording downstream message for {}", channel.name()))?;
                }
            }
            Route::Standby { workers } => {
                let identity = match identity {
                    Some(identity) => Some(identity.to_owned()),
                    None => stable_assign(user, workers).cloned(),
                };
                let Some(identity) = identity else {
                    tracing::warn!(user=%user, "no worker identity to emit under, dropping message");
                    return Ok(());
                };
                match self.peers.get(&identity) {
                    Some(channel) => {
                        channel
                            .record(&identity, user, folder, op)
                            .await
                            .with_context(|| format!("recording downstream message for {}", identity))?;
                    }
                    None => {
                        tracing::warn!(user=%user, worker=%identity, "no channel for owning worker, dropping message");
                    }
                }
            }
        }
        Ok(())
    }
}
