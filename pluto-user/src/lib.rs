//! Node-level plumbing shared by every Pluto role: the TOML configuration
//! surface, the static account database behind LOGIN, and loading of the
//! TLS material for both the client-facing listener and the mutually
//! authenticated inter-node channel.

pub mod config;
pub mod login;
pub mod tls;
