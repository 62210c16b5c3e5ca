use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Top-level `pluto.toml`. One file describes the whole deployment; each
/// node picks the section matching its role and name.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_separator")]
    pub hierarchy_separator: char,

    #[serde(default)]
    pub internal: InternalConfig,

    pub users: LoginStaticConfig,

    pub distributor: Option<DistributorConfig>,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    pub storage: Option<StorageConfig>,
}

/// Inter-node connection policy.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InternalConfig {
    /// Per-dial deadline, in seconds.
    #[serde(default = "default_conn_timeout")]
    pub conn_timeout: u64,
    /// Reconnection attempts before the node aborts rather than diverge.
    #[serde(default = "default_conn_retry")]
    pub conn_retry: u32,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            conn_timeout: default_conn_timeout(),
            conn_retry: default_conn_retry(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Internal PKI root; peers must present a certificate chaining to it.
    pub root_ca_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DistributorConfig {
    pub bind_addr: SocketAddr,
    pub tls: Option<TlsConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    /// Mail port (IMAP sessions).
    pub bind_addr: SocketAddr,
    /// Sync port (replication channel).
    pub sync_addr: SocketAddr,
    pub crdt_layer_root: PathBuf,
    pub maildir_root: PathBuf,
    pub tls: Option<TlsConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_name")]
    pub name: String,
    pub bind_addr: SocketAddr,
    pub sync_addr: SocketAddr,
    pub crdt_layer_root: PathBuf,
    pub maildir_root: PathBuf,
    pub tls: Option<TlsConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginStaticConfig {
    pub user_list: PathBuf,
}

/// The static account database: login name to entry.
pub type UserList = HashMap<String, UserEntry>;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserEntry {
    #[serde(default)]
    pub email_addresses: Vec<String>,
    /// argon2 hash, as produced by `pluto tools password-hash`.
    pub password: String,
}

impl Config {
    pub fn worker(&self, name: &str) -> Option<&WorkerConfig> {
        self.workers.iter().find(|w| w.name == name)
    }

    /// The worker owning `user`: a stable hash over the static worker list.
    pub fn worker_for(&self, user: &str) -> Option<&WorkerConfig> {
        stable_assign(user, &self.workers)
    }
}

/// Stable FNV-1a assignment of a user to one of the configured items.
/// Worker-set membership never changes online, so the mapping is fixed for
/// the deployment's lifetime.
pub fn stable_assign<'a, T>(user: &str, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    let mut h: u64 = 0xcbf29ce484222325;
    for b in user.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x100000001b3);
    }
    items.get((h % items.len() as u64) as usize)
}

// ---

pub fn read_config<T: DeserializeOwned>(config_file: PathBuf) -> Result<T> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_file.as_path())?;

    let mut config = String::new();
    file.read_to_string(&mut config)?;

    Ok(toml::from_str(&config)?)
}

pub fn write_config<T: Serialize>(config_file: PathBuf, config: &T) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(config_file.as_path())?;

    file.write_all(toml::to_string(config)?.as_bytes())?;

    Ok(())
}

fn default_separator() -> char {
    '.'
}

fn default_conn_timeout() -> u64 {
    20
}

fn default_conn_retry() -> u32 {
    10
}

fn default_storage_name() -> String {
    "storage".to_string()
}
