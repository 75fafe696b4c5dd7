use std::{
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    ServerConfig, SupportedProtocolVersion,
};
use shared::constants::{TLS_CERT_FILE, TLS_KEY_FILE};
use tokio_rustls::TlsAcceptor;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Couldn't read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("No certificate found in {0}")]
    NoCertificate(PathBuf),
    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("{0}")]
    Rustls(#[from] rustls::Error),
}

/// Oldest protocol version the server accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum MinTlsVersion {
    #[default]
    #[value(name = "1.2")]
    Tls12,
    #[value(name = "1.3")]
    Tls13,
}

impl MinTlsVersion {
    fn versions(self) -> &'static [&'static SupportedProtocolVersion] {
        static FROM_TLS12: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13, &rustls::version::TLS12];
        static FROM_TLS13: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

        match self {
            Self::Tls12 => FROM_TLS12,
            Self::Tls13 => FROM_TLS13,
        }
    }
}

fn open(path: &Path) -> Result<BufReader<std::fs::File>, TlsError> {
    std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read { path: path.to_owned(), source })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read { path: path.to_owned(), source })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificate(path.to_owned()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read { path: path.to_owned(), source })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_owned()))
}

/// Builds an acceptor from `servercert.pem` and `serverkey.pem` in `dir`.
pub fn load_acceptor(dir: &Path, min_version: MinTlsVersion) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(&dir.join(TLS_CERT_FILE))?;
    let key = load_key(&dir.join(TLS_KEY_FILE))?;

    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_protocol_versions(min_version.versions())?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    tracing::debug!(dir = %dir.display(), ?min_version, "loaded TLS certificate");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_identity(dir: &Path) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        std::fs::write(dir.join(TLS_CERT_FILE), cert.pem()).unwrap();
        std::fs::write(dir.join(TLS_KEY_FILE), key_pair.serialize_pem()).unwrap();
    }

    #[test]
    fn loads_generated_identity() {
        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path());

        assert!(load_acceptor(dir.path(), MinTlsVersion::Tls12).is_ok());
        assert!(load_acceptor(dir.path(), MinTlsVersion::Tls13).is_ok());
    }

    #[test]
    fn missing_material() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_acceptor(dir.path(), MinTlsVersion::Tls12),
            Err(TlsError::Read { .. })
        ));

        write_identity(dir.path());
        std::fs::write(dir.path().join(TLS_KEY_FILE), "not a key").unwrap();
        assert!(matches!(
            load_acceptor(dir.path(), MinTlsVersion::Tls12),
            Err(TlsError::NoPrivateKey(_))
        ));
    }
}
