mod common;

use client::net::{
    tls::{TlsError, TlsOptions, TrustMode},
    Client, ClientError, Endpoint,
};
use common::{credential, TestServer};
use shared::constants::TLS_PIN_FILE;

fn pinned_client(server: &TestServer, pin_dir: &std::path::Path, password: &str) -> Client {
    let addr = server.tls.unwrap();
    let endpoint = Endpoint {
        address: addr.ip().to_string(),
        port: addr.port(),
        tls: Some(TlsOptions {
            dir: pin_dir.to_owned(),
            trust: TrustMode::Pin,
            server_name: None,
        }),
    };
    Client::new(credential(password), endpoint).unwrap()
}

#[tokio::test]
async fn first_connection_pins_the_certificate() {
    let server = TestServer::with_tls().await;
    let pins = tempfile::tempdir().unwrap();
    let client = pinned_client(&server, pins.path(), "pw");

    assert_eq!(client.get_db().await.unwrap(), server.database());
    let pin = std::fs::read(pins.path().join(TLS_PIN_FILE)).unwrap();
    assert_eq!(pin.len(), 32);

    // same certificate, same pin
    client.get_db().await.unwrap();
    assert_eq!(std::fs::read(pins.path().join(TLS_PIN_FILE)).unwrap(), pin);
}

#[tokio::test]
async fn different_certificate_is_rejected() {
    let first = TestServer::with_tls().await;
    let pins = tempfile::tempdir().unwrap();
    pinned_client(&first, pins.path(), "pw").get_db().await.unwrap();
    let pin = std::fs::read(pins.path().join(TLS_PIN_FILE)).unwrap();

    let second = TestServer::with_tls().await;
    let err = pinned_client(&second, pins.path(), "pw").get_db().await.unwrap_err();

    assert!(matches!(err, ClientError::Tls(TlsError::PinMismatch)));
    assert_eq!(err.to_string(), "Server certificate differs from pinned certificate");
    assert_eq!(std::fs::read(pins.path().join(TLS_PIN_FILE)).unwrap(), pin);
}

#[tokio::test]
async fn server_failures_surface_as_server_errors() {
    let server = TestServer::with_tls().await;
    let pins = tempfile::tempdir().unwrap();

    let err = pinned_client(&server, pins.path(), "guess").get_db().await.unwrap_err();
    assert!(matches!(err, ClientError::Server(ref reason) if reason == "Wrong password"));
}
