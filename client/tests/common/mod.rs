#![allow(dead_code)]

use std::{net::SocketAddr, path::Path, sync::Arc};

use chrono::NaiveDate;
use server::{config::ServeConfig, vault::store::VaultStore, Server};
use shared::{
    constants::{TLS_CERT_FILE, TLS_KEY_FILE},
    kdf::Credential,
    shutdown::{self, ShutdownTrigger},
};
use tempfile::TempDir;

pub struct TestServer {
    pub dir: TempDir,
    pub local: SocketAddr,
    pub tls: Option<SocketAddr>,
    _trigger: ShutdownTrigger,
}

impl TestServer {
    pub async fn start(config: ServeConfig, dir: TempDir) -> Self {
        let now = NaiveDate::from_ymd_opt(2013, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let store = VaultStore::create(dir.path().join("db.kpc"), credential("pw"), 100, "Work".into(), now)
            .await
            .unwrap();

        let server = Server::bind(&config, Arc::new(store)).await.unwrap();
        let local = server.addr("local").unwrap();
        let tls = server.addr("tls");

        let (trigger, shutdown) = shutdown::channel();
        tokio::spawn(server.run(shutdown));

        Self { dir, local, tls, _trigger: trigger }
    }

    pub async fn local() -> Self {
        Self::start(ServeConfig::local_only(), tempfile::tempdir().unwrap()).await
    }

    /// A server with a fresh self-signed certificate and its TLS socket open.
    pub async fn with_tls() -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_certificate(dir.path());

        let config = ServeConfig {
            tls: true,
            tls_dir: Some(dir.path().to_owned()),
            ..ServeConfig::local_only()
        };
        Self::start(config, dir).await
    }

    pub fn database(&self) -> Vec<u8> {
        std::fs::read(self.dir.path().join("db.kpc")).unwrap()
    }
}

pub fn credential(password: &str) -> Credential {
    Credential::new(Some(password.into()), None).unwrap()
}

fn write_certificate(dir: &Path) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    std::fs::write(dir.join(TLS_CERT_FILE), cert.pem()).unwrap();
    std::fs::write(dir.join(TLS_KEY_FILE), key_pair.serialize_pem()).unwrap();
}
