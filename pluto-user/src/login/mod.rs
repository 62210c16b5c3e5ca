pub mod demo_provider;
pub mod static_provider;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Verifies a LOGIN attempt. The file-backed provider is the only one
/// shipped; SQL and LDAP adapters plug in behind the same trait.
#[async_trait]
pub trait LoginProvider {
    async fn login(&self, username: &str, password: &str) -> Result<()>;
}

pub type ArcLoginProvider = Arc<dyn LoginProvider + Send + Sync>;

pub fn hash_password(password: &str) -> Result<String> {
    use argon2::{
        password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
        Argon2,
    };
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    Ok(argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("unable to hash password: {}", e))?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    use argon2::{
        password_hash::{PasswordHash, PasswordVerifier},
        Argon2,
    };
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow!("invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
