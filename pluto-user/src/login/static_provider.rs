use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use crate::config::*;
use crate::login::*;

#[derive(Default, Debug)]
pub struct UserDatabase {
    users: UserList,
}

/// Account database loaded from the `user_list` TOML file, reloaded on
/// SIGUSR1 without interrupting live sessions.
pub struct StaticLoginProvider {
    user_db: watch::Receiver<UserDatabase>,
}

pub async fn update_user_list(config: PathBuf, up: watch::Sender<UserDatabase>) -> Result<()> {
    let mut stream = signal(SignalKind::user_defined1())
        .expect("failed to install SIGUSR1 signal handler for reload");

    loop {
        let users: UserList = match read_config(config.clone()) {
            Ok(x) => x,
            Err(e) => {
                tracing::warn!(path=%config.as_path().to_string_lossy(), error=%e, "Unable to load user list");
                stream.recv().await;
                continue;
            }
        };

        tracing::info!("{} users loaded", users.len());
        up.send(UserDatabase { users })
            .context("update user db config")?;
        stream.recv().await;
        tracing::info!("Received SIGUSR1, reloading");
    }
}

impl StaticLoginProvider {
    pub async fn new(config: LoginStaticConfig) -> Result<Self> {
        let (tx, mut rx) = watch::channel(UserDatabase::default());

        tokio::spawn(update_user_list(config.user_list, tx));
        rx.changed().await?;

        Ok(Self { user_db: rx })
    }
}

#[async_trait]
impl LoginProvider for StaticLoginProvider {
    async fn login(&self, username: &str, password: &str) -> Result<()> {
        tracing::debug!(user=%username, "login");
        let hash = {
            let user_db = self.user_db.borrow();
            match user_db.users.get(username) {
                None => bail!("User {} does not exist", username),
                Some(u) => u.password.clone(),
            }
        };

        if !verify_password(password, &hash)? {
            bail!("Wrong password");
        }
        Ok(())
    }
}
