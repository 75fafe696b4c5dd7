//! TLS towards the server, trusting either the usual CA roots or a pinned certificate.
//!
//! Pinning is trust-on-first-use: the first successful handshake stores SHA-256 of the server's
//! leaf certificate in `<tls_dir>/pin`, every later handshake must present the same certificate.
//! The comparison happens right after the handshake, before any credential is sent.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use sha2::{Digest, Sha256};
use shared::{
    constants::{TLS_CA_FILE, TLS_PIN_FILE},
    kdf::constant_time_eq,
};
use tokio::{fs, io::AsyncWriteExt, net::TcpStream};
use tokio_rustls::{client::TlsStream, TlsConnector};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Server certificate differs from pinned certificate")]
    PinMismatch,
    #[error("Pin file {0} is corrupt")]
    CorruptPin(PathBuf),
    #[error("Server didn't present a certificate")]
    NoPeerCertificate,
    #[error("Invalid server name {0:?}")]
    InvalidServerName(String),
    #[error("Couldn't access {path}: {source}")]
    File { path: PathBuf, source: std::io::Error },
    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),
    #[error("{0}")]
    Rustls(#[from] rustls::Error),
}

/// How the server certificate is trusted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TrustMode {
    /// Trust on first use, then require the same certificate
    #[default]
    Pin,
    /// Verify against CA roots plus `cacert.pem`, including the host name
    Ca,
}

#[derive(Clone, Debug)]
pub struct TlsOptions {
    pub dir: PathBuf,
    pub trust: TrustMode,
    /// Name to verify the certificate against, the server address if unset.
    pub server_name: Option<String>,
}

/// Verifies handshake signatures but accepts any certificate, the identity is checked against
/// the pin once the handshake is done.
#[derive(Debug)]
struct PinnedCertVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

fn load_ca_roots(dir: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let path = dir.join(TLS_CA_FILE);
    match std::fs::read(&path) {
        Ok(pem) => {
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                let cert = cert.map_err(|source| TlsError::File { path: path.clone(), source })?;
                roots.add(cert)?;
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(source) => return Err(TlsError::File { path, source }),
    }

    Ok(roots)
}

pub struct TlsConnection {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    pin_path: Option<PathBuf>,
}

impl TlsConnection {
    pub fn new(options: &TlsOptions, address: &str) -> Result<Self, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider)).with_safe_default_protocol_versions()?;

        let (config, pin_path) = match options.trust {
            TrustMode::Ca => (
                builder
                    .with_root_certificates(load_ca_roots(&options.dir)?)
                    .with_no_client_auth(),
                None,
            ),
            TrustMode::Pin => (
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(PinnedCertVerifier {
                        algorithms: provider.signature_verification_algorithms,
                    }))
                    .with_no_client_auth(),
                Some(options.dir.join(TLS_PIN_FILE)),
            ),
        };

        let name = options.server_name.clone().unwrap_or_else(|| address.to_string());
        let server_name = ServerName::try_from(name.clone()).map_err(|_| TlsError::InvalidServerName(name))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            pin_path,
        })
    }

    pub async fn connect(&self, tcp: TcpStream) -> Result<TlsStream<TcpStream>, TlsError> {
        let stream = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(TlsError::Handshake)?;

        if let Some(pin_path) = &self.pin_path {
            let leaf = stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(<[_]>::first)
                .ok_or(TlsError::NoPeerCertificate)?;
            check_pin(pin_path, leaf).await?;
        }

        Ok(stream)
    }
}

/// Compares the certificate with the stored pin, storing it if there is none yet.
pub async fn check_pin(path: &Path, cert: &CertificateDer<'_>) -> Result<(), TlsError> {
    let digest = Sha256::digest(cert.as_ref());
    let file_err = |source: std::io::Error| TlsError::File { path: path.to_owned(), source };

    match fs::read(path).await {
        Ok(pinned) if pinned.len() == digest.len() => {
            if constant_time_eq(&pinned, &digest) {
                Ok(())
            } else {
                tracing::warn!(path = %path.display(), "server certificate doesn't match the pin");
                Err(TlsError::PinMismatch)
            }
        }
        Ok(_) => Err(TlsError::CorruptPin(path.to_owned())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).await.map_err(file_err)?;
            }

            // create_new: a pin is never silently overwritten
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
                .map_err(file_err)?;
            file.write_all(&digest).await.map_err(file_err)?;
            file.sync_all().await.map_err(file_err)?;

            tracing::info!(path = %path.display(), pin = %hex::encode(digest), "pinned server certificate");
            Ok(())
        }
        Err(source) => Err(file_err(source)),
    }
}
