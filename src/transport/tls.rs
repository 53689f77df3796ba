//! Opaque TLS handle.
//!
//! The transport treats TLS as an external library behind this one struct:
//! an acceptor and a connector built from PEM paths at enable time, torn
//! down as a unit at disable time. Certificate policy beyond "load what
//! the config points at" is out of scope.

use crate::error::{Result, TransportError};
use crate::transport::conn::BoxedIo;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

/// TLS acceptor + connector pair built from configured PEM material.
pub(crate) struct TlsContext {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
}

impl TlsContext {
    /// Build the context from cert/key (required) and CA bundle
    /// (optional) paths.
    ///
    /// # Errors
    /// `InitializationFailed` when material is missing or unparseable; the
    /// caller leaves TLS disabled in that case.
    pub fn initialize(
        cert_path: Option<&str>,
        key_path: Option<&str>,
        ca_path: Option<&str>,
    ) -> Result<Self> {
        let cert_path = cert_path.ok_or_else(|| {
            TransportError::InitializationFailed("TLS enabled without a certificate path".into())
        })?;
        let key_path = key_path.ok_or_else(|| {
            TransportError::InitializationFailed("TLS enabled without a key path".into())
        })?;

        let cert_chain = load_certs(cert_path)?;
        let private_key = load_key(key_path)?;

        let server_config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| {
                TransportError::InitializationFailed(format!("TLS server config rejected: {e}"))
            })?;

        let mut roots = RootCertStore::empty();
        if let Some(ca_path) = ca_path {
            for cert in load_certs(ca_path)? {
                roots.add(&cert).map_err(|e| {
                    TransportError::InitializationFailed(format!("bad CA certificate: {e}"))
                })?;
            }
        }
        let client_config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        debug!(cert_path, key_path, "TLS context initialized");
        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
            connector: TlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Server-side handshake over an accepted stream
    pub async fn accept(&self, stream: TcpStream) -> Result<BoxedIo> {
        let tls = self
            .acceptor
            .accept(stream)
            .await
            .map_err(TransportError::Io)?;
        Ok(Box::new(tls))
    }

    /// Client-side handshake against `server_name`
    pub async fn connect(&self, server_name: &str, stream: TcpStream) -> Result<BoxedIo> {
        let name = rustls::ServerName::try_from(server_name).map_err(|_| {
            TransportError::InvalidParameters(format!("invalid TLS server name: {server_name}"))
        })?;
        let tls = self
            .connector
            .connect(name, stream)
            .await
            .map_err(TransportError::Io)?;
        Ok(Box::new(tls))
    }
}

fn load_certs(path: &str) -> Result<Vec<Certificate>> {
    let file = File::open(path).map_err(|e| {
        TransportError::InitializationFailed(format!("failed to open cert file {path}: {e}"))
    })?;
    let mut reader = BufReader::new(file);
    let raw = certs(&mut reader).map_err(|_| {
        TransportError::InitializationFailed(format!("failed to parse certificates in {path}"))
    })?;
    if raw.is_empty() {
        return Err(TransportError::InitializationFailed(format!(
            "no certificates found in {path}"
        )));
    }
    Ok(raw.into_iter().map(Certificate).collect())
}

fn load_key(path: &str) -> Result<PrivateKey> {
    let file = File::open(path).map_err(|e| {
        TransportError::InitializationFailed(format!("failed to open key file {path}: {e}"))
    })?;
    let mut reader = BufReader::new(file);
    let mut keys = pkcs8_private_keys(&mut reader).map_err(|_| {
        TransportError::InitializationFailed(format!("failed to parse private key in {path}"))
    })?;
    if keys.is_empty() {
        return Err(TransportError::InitializationFailed(format!(
            "no private keys found in {path}"
        )));
    }
    Ok(PrivateKey(keys.remove(0)))
}
