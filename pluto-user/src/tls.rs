use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("unable to open certificate file {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("unable to parse certificates in {}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificate found in {}", path.display()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("unable to open key file {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("unable to parse key file {}", path.display()))?
        .ok_or_else(|| anyhow!("no private key found in {}", path.display()))
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .with_context(|| format!("invalid root certificate in {}", path.display()))?;
    }
    Ok(roots)
}

/// Acceptor for the client-facing listener (the distributor's port):
/// server certificate only.
pub fn acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(load_certs(&tls.cert_path)?, load_key(&tls.key_path)?)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Acceptor for internal listeners (sync ports, and the worker/storage
/// mail ports only the distributor dials): peers must present a
/// certificate issued by the internal PKI root.
pub fn mutual_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let roots = load_roots(&tls.root_ca_path)?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| anyhow!("unable to build client verifier: {}", e))?;
    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(&tls.cert_path)?, load_key(&tls.key_path)?)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Connector used when dialing a peer's sync port, presenting our own
/// certificate for mutual authentication.
pub fn mutual_connector(tls: &TlsConfig) -> Result<TlsConnector> {
    let roots = load_roots(&tls.root_ca_path)?;
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(load_certs(&tls.cert_path)?, load_key(&tls.key_path)?)?;
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Name presented during the TLS handshake when dialing `addr`. The
/// internal PKI issues IP-address SANs, so the peer's IP is the name.
pub fn peer_name(addr: &std::net::SocketAddr) -> ServerName<'static> {
    ServerName::IpAddress(addr.ip().into())
}
