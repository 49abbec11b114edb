use crate::{CoreResult, SessionError};

use std::{panic::Location, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use error_location::ErrorLocation;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, pem::PemObject};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{
    client::TlsStream,
    rustls::{ClientConfig, RootCertStore, crypto::ring},
};
use tracing::{debug, info, instrument};

/// Produces the raw byte transport a [`ServerStream`](super::ServerStream)
/// authenticates over.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connected transport.
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Connects to `host:port` and completes any transport-level handshake.
    async fn connect(&self, host: &str, port: u16) -> CoreResult<Self::Io>;
}

/// Plain TCP transport, for servers running without the security layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Io = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> CoreResult<TcpStream> {
        let stream =
            TcpStream::connect((host, port))
                .await
                .map_err(|e| SessionError::Connect {
                    reason: format!("TCP connect to {}:{} failed: {}", host, port, e),
                    location: ErrorLocation::from(Location::caller()),
                })?;
        stream.set_nodelay(true)?;
        debug!(host, port, "TCP connected");
        Ok(stream)
    }
}

/// Certificate and key material for the TLS transport.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// PEM bundle of CA certificates trusted for the server.
    pub ca_cert: PathBuf,
    /// PEM client certificate chain for mutual TLS.
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`.
    pub client_key: Option<PathBuf>,
    /// Name to verify the server certificate against (defaults to the host).
    pub server_name: Option<String>,
}

/// TLS over TCP, backed by rustls.
#[derive(Clone)]
pub struct TlsConnector {
    connector: tokio_rustls::TlsConnector,
    server_name: Option<ServerName<'static>>,
}

impl TlsConnector {
    /// Loads certificates and builds the client configuration.
    ///
    /// # Errors
    ///
    /// Returns `Tls` if a PEM file cannot be read or parsed, if only one of
    /// client cert/key is given, or if rustls rejects the material.
    #[track_caller]
    #[instrument(skip(settings), fields(ca_cert = ?settings.ca_cert))]
    pub fn from_settings(settings: &TlsSettings) -> CoreResult<Self> {
        let tls_error = |reason: String| SessionError::Tls {
            reason,
            location: ErrorLocation::from(Location::caller()),
        };

        let mut roots = RootCertStore::empty();
        let ca_certs = CertificateDer::pem_file_iter(&settings.ca_cert)
            .map_err(|e| tls_error(format!("Failed to read CA bundle: {}", e)))?;
        for cert in ca_certs {
            let cert = cert.map_err(|e| tls_error(format!("Invalid CA certificate: {}", e)))?;
            roots
                .add(cert)
                .map_err(|e| tls_error(format!("Rejected CA certificate: {}", e)))?;
        }

        let builder = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_error(format!("Unsupported protocol versions: {}", e)))?
            .with_root_certificates(roots);

        let config = match (&settings.client_cert, &settings.client_key) {
            (Some(cert_path), Some(key_path)) => {
                let chain = CertificateDer::pem_file_iter(cert_path)
                    .map_err(|e| tls_error(format!("Failed to read client certificate: {}", e)))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| tls_error(format!("Invalid client certificate: {}", e)))?;
                let key = PrivateKeyDer::from_pem_file(key_path)
                    .map_err(|e| tls_error(format!("Failed to read client key: {}", e)))?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| tls_error(format!("Rejected client identity: {}", e)))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(tls_error(
                    "client_cert and client_key must be configured together".to_string(),
                ));
            }
        };

        let server_name = settings
            .server_name
            .clone()
            .map(|name| {
                ServerName::try_from(name)
                    .map_err(|e| tls_error(format!("Invalid server name: {}", e)))
            })
            .transpose()?;

        info!(mutual = settings.client_cert.is_some(), "TLS client configured");

        Ok(Self {
            connector: tokio_rustls::TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Io = TlsStream<TcpStream>;

    async fn connect(&self, host: &str, port: u16) -> CoreResult<Self::Io> {
        let tcp = TcpConnector.connect(host, port).await?;

        let server_name = match &self.server_name {
            Some(name) => name.clone(),
            None => ServerName::try_from(host.to_string()).map_err(|e| SessionError::Connect {
                reason: format!("Host '{}' is not a valid server name: {}", host, e),
                location: ErrorLocation::from(Location::caller()),
            })?,
        };

        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| SessionError::Connect {
                reason: format!("TLS handshake with {}:{} failed: {}", host, port, e),
                location: ErrorLocation::from(Location::caller()),
            })?;

        debug!(host, port, "TLS session established");
        Ok(tls)
    }
}
