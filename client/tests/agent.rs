mod common;

use std::{net::SocketAddr, time::Duration};

use client::{
    agent::{client::AgentClient, Agent},
    net::{tls::TrustMode, Client, ClientError, Endpoint},
};
use common::{credential, TestServer};
use shared::{
    server_message::Reply,
    shutdown::{self, ShutdownTrigger},
    wire::{self, read_message, write_message},
};
use tokio::{io::AsyncWriteExt, net::TcpStream};

async fn start_agent(client: Client) -> (SocketAddr, ShutdownTrigger) {
    let agent = Agent::bind(client, 0).await.unwrap();
    let addr = agent.local_addr().unwrap();

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(agent.run(shutdown));
    (addr, trigger)
}

fn plain_client(server: &TestServer, password: &str) -> Client {
    let endpoint = Endpoint {
        address: server.local.ip().to_string(),
        port: server.local.port(),
        tls: None,
    };
    Client::new(credential(password), endpoint).unwrap()
}

async fn raw_request(addr: SocketAddr, body: &[u8]) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_message(&mut stream, body).await.unwrap();
    Reply::from_body(read_message(&mut stream).await.unwrap())
}

#[tokio::test]
async fn getc_returns_cached_session_without_server() {
    // nothing listens on "h", GETC must not care
    let endpoint = Endpoint { address: "h".into(), port: 50000, tls: None };
    let (addr, _trigger) = start_agent(Client::new(credential("p"), endpoint).unwrap()).await;

    let Reply::Success(body) = raw_request(addr, b"GETC").await else {
        panic!("GETC failed");
    };
    assert_eq!(
        wire::split_fields(&body),
        vec![b"p".to_vec(), Vec::new(), b"h".to_vec(), b"50000".to_vec(), b"False".to_vec(), Vec::new()]
    );

    let session = AgentClient::new(addr).get_credentials().await.unwrap();
    assert_eq!(session.credential.password(), Some("p"));
    assert_eq!(session.credential.keyfile(), None);
    assert_eq!(session.server_address, "h");
    assert_eq!(session.server_port, 50000);
    assert!(!session.tls);
}

#[tokio::test]
async fn find_and_get_are_relayed() {
    let server = TestServer::local().await;
    let direct = plain_client(&server, "pw");
    direct
        .create_entry(shared::client_message::NewEntry {
            title: "Bank".into(),
            url: "https://bank".into(),
            username: "me".into(),
            password: "secret".into(),
            comment: String::new(),
            expire: chrono::NaiveDate::from_ymd_opt(2999, 12, 28).unwrap(),
            group: 1,
        })
        .await
        .unwrap();

    let (addr, _trigger) = start_agent(plain_client(&server, "pw")).await;
    let agent = AgentClient::new(addr);

    assert_eq!(agent.find("bank").await.unwrap(), direct.find("bank").await.unwrap());
    assert_eq!(agent.get_db().await.unwrap(), server.database());
}

#[tokio::test]
async fn server_failures_pass_through() {
    let server = TestServer::local().await;
    let (addr, _trigger) = start_agent(plain_client(&server, "guess")).await;

    assert_eq!(raw_request(addr, b"GET").await, Reply::Fail("Wrong password".into()));
    let err = AgentClient::new(addr).find("x").await.unwrap_err();
    assert!(matches!(err, ClientError::Server(ref reason) if reason == "Wrong password"));
}

#[tokio::test]
async fn unreachable_server_is_a_fail_reply() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let endpoint = Endpoint { address: closed.ip().to_string(), port: closed.port(), tls: None };
    let (addr, _trigger) = start_agent(Client::new(credential("pw"), endpoint).unwrap()).await;

    assert!(raw_request(addr, b"GET").await.is_fail());

    // the agent keeps serving afterwards
    assert!(!raw_request(addr, b"GETC").await.is_fail());
}

#[tokio::test]
async fn unknown_agent_command() {
    let endpoint = Endpoint { address: "h".into(), port: 50000, tls: None };
    let (addr, _trigger) = start_agent(Client::new(credential("p"), endpoint).unwrap()).await;

    assert_eq!(
        raw_request(addr, b"NEWG").await,
        Reply::Fail("Command isn't available".into())
    );
}

#[tokio::test]
async fn agent_session_opens_a_direct_client() {
    let server = TestServer::local().await;
    let (addr, _trigger) = start_agent(plain_client(&server, "pw")).await;

    let session = AgentClient::new(addr).get_credentials().await.unwrap();
    let client = Client::from_agent(session, TrustMode::Pin).unwrap();
    assert_eq!(client.get_db().await.unwrap(), server.database());
}

#[tokio::test]
async fn agent_shutdown_answers_requests_in_flight() {
    let endpoint = Endpoint { address: "h".into(), port: 50000, tls: None };
    let agent = Agent::bind(Client::new(credential("p"), endpoint).unwrap(), 0).await.unwrap();
    let addr = agent.local_addr().unwrap();
    let (trigger, shutdown) = shutdown::channel();
    let task = tokio::spawn(agent.run(shutdown));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GE").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    trigger.trigger();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished());

    write_message(&mut stream, b"TC").await.unwrap();
    assert!(!Reply::from_body(read_message(&mut stream).await.unwrap()).is_fail());

    task.await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}
