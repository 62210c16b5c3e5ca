use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::login::*;

/// Fixed demo account, used by `--dev` mode and the test harness only.
pub struct DemoLoginProvider;

#[async_trait]
impl LoginProvider for DemoLoginProvider {
    async fn login(&self, username: &str, password: &str) -> Result<()> {
        tracing::debug!(user=%username, "login");

        if username != "alice" {
            bail!("user not found");
        }
        if password != "hunter2" {
            bail!("wrong password");
        }
        Ok(())
    }
}
