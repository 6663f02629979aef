//! rustls server configuration from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

/// Builds the acceptor used to upgrade accepted sockets.
///
/// With a root CA configured, client certificates are verified against it;
/// they are mandatory only when `require_client_cert` is set.
pub fn build_acceptor(cfg: &TlsConfig) -> Result<TlsAcceptor> {
    if cfg.require_client_cert && cfg.root_ca_path.is_none() {
        anyhow::bail!("tls.require_client_cert needs tls.root_ca_path");
    }

    let certs = load_certs(&cfg.cert_path)?;
    let key = load_private_key(&cfg.key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .context("TLS protocol versions not supported by the crypto provider")?;

    let builder = match &cfg.root_ca_path {
        Some(root_ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(root_ca_path)? {
                roots
                    .add(cert)
                    .with_context(|| format!("Invalid root CA in {}", root_ca_path.display()))?;
            }

            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if cfg.require_client_cert {
                verifier
            } else {
                verifier.allow_unauthenticated()
            };
            builder.with_client_cert_verifier(
                verifier
                    .build()
                    .context("Failed to build client certificate verifier")?,
            )
        }
        None => builder.with_no_client_auth(),
    };

    let config = builder
        .with_single_cert(certs, key)
        .context("Invalid server certificate or private key")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read certificates from {}", path.display()))?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path.display());
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("Failed to read private key from {}", path.display()))?
        .with_context(|| format!("No private key found in {}", path.display()))
}
