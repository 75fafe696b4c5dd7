//! Talks to the server. Every request opens a fresh connection: connect, send one envelope, read
//! one reply, close.

pub mod tls;

use std::path::PathBuf;

use chrono::NaiveDate;
use shared::{
    agent_message::AgentCredentials,
    client_message::{
        ChangeSecret, Command, CommandParseError, DeleteEntry, DeleteGroup, EntryField, Envelope, MoveEntry,
        MoveGroup, NewEntry, NewGroup, SetEntryExpiry, SetEntryField, SetGroupTitle,
    },
    constants::IDLE_TIMEOUT,
    kdf::Credential,
    server_message::Reply,
    types::{EntryId, GroupId, Timestamp},
    wire::{read_message_idle, write_message, WireError},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

use self::tls::{TlsConnection, TlsError, TlsOptions, TrustMode};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with `FAIL`.
    #[error("{0}")]
    Server(String),
    #[error("{0}")]
    Tls(#[from] TlsError),
    #[error("{0}")]
    Wire(WireError),
    #[error("Unable to connect to the server: {0}")]
    Connect(std::io::Error),
    #[error("Timed out waiting for the server")]
    Timeout,
    #[error("{0}")]
    Parse(#[from] CommandParseError),
    #[error("No TLS directory configured and no default config directory available")]
    NoTlsDir,
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Idle(_) => Self::Timeout,
            err => Self::Wire(err),
        }
    }
}

/// Where the server is and how to reach it.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub tls: Option<TlsOptions>,
}

pub struct Client {
    credential: Credential,
    endpoint: Endpoint,
    tls: Option<TlsConnection>,
}

impl Client {
    pub fn new(credential: Credential, endpoint: Endpoint) -> Result<Self, ClientError> {
        let tls = endpoint
            .tls
            .as_ref()
            .map(|options| TlsConnection::new(options, &endpoint.address))
            .transpose()?;

        Ok(Self { credential, endpoint, tls })
    }

    /// Opens a session with what an agent handed out on `GETC`. The reply doesn't say how the
    /// server certificate is trusted, so the caller picks `trust`; it only matters when TLS is on.
    pub fn from_agent(session: AgentCredentials, trust: TrustMode) -> Result<Self, ClientError> {
        let tls = if session.tls {
            let dir = session
                .tls_dir
                .or_else(default_tls_dir)
                .ok_or(ClientError::NoTlsDir)?;
            Some(TlsOptions { dir, trust, server_name: None })
        } else {
            None
        };

        let endpoint = Endpoint {
            address: session.server_address,
            port: session.server_port,
            tls,
        };
        Self::new(session.credential, endpoint)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// What the agent hands out on `GETC`.
    pub fn session(&self) -> AgentCredentials {
        AgentCredentials {
            credential: self.credential.clone(),
            server_address: self.endpoint.address.clone(),
            server_port: self.endpoint.port,
            tls: self.endpoint.tls.is_some(),
            tls_dir: self.endpoint.tls.as_ref().map(|options| options.dir.clone()),
        }
    }

    /// Sends one command and returns the reply as is, `FAIL` included.
    pub async fn request(&self, command: Command) -> Result<Reply, ClientError> {
        let body = Envelope::new(self.credential.clone(), command).encode();

        let tcp = tokio::time::timeout(
            IDLE_TIMEOUT,
            TcpStream::connect((self.endpoint.address.as_str(), self.endpoint.port)),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::Connect)?;

        let reply = match &self.tls {
            Some(tls) => exchange(tls.connect(tcp).await?, &body).await?,
            None => exchange(tcp, &body).await?,
        };

        Ok(Reply::from_body(reply))
    }

    /// Sends one command, turning a `FAIL` reply into [`ClientError::Server`].
    pub async fn send_cmd(&self, command: Command) -> Result<Vec<u8>, ClientError> {
        let token = command.token();

        match self.request(command).await? {
            Reply::Success(body) => Ok(body),
            Reply::Fail(reason) => {
                tracing::debug!(command = token, %reason, "server refused command");
                Err(ClientError::Server(reason))
            }
        }
    }

    /// Finds entries by title and returns the server's text digest.
    pub async fn find(&self, title: &str) -> Result<String, ClientError> {
        let body = self.send_cmd(Command::Find { title: title.to_owned() }).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Downloads the whole encrypted database.
    pub async fn get_db(&self) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::Get).await
    }

    /// Changes the master credential. Only accepted over a loopback connection.
    pub async fn change_secret(&self, password: Option<String>, keyfile: Option<Vec<u8>>) -> Result<(), ClientError> {
        self.send_cmd(Command::ChangeSecret(ChangeSecret { password, keyfile }))
            .await
            .map(|_| ())
    }

    /// Creates a group, `parent` 0 means top level. Returns the refreshed database.
    pub async fn create_group(&self, title: &str, parent: GroupId) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::NewGroup(NewGroup { title: title.to_owned(), parent }))
            .await
    }

    /// Creates an entry. Returns the refreshed database.
    pub async fn create_entry(&self, entry: NewEntry) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::NewEntry(entry)).await
    }

    pub async fn delete_group(&self, group: GroupId, last_mod: Timestamp) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::DeleteGroup(DeleteGroup { group, last_mod })).await
    }

    pub async fn delete_entry(&self, entry: EntryId, last_mod: Timestamp) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::DeleteEntry(DeleteEntry { entry, last_mod })).await
    }

    pub async fn move_group(&self, group: GroupId, parent: GroupId) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::MoveGroup(MoveGroup { group, parent })).await
    }

    pub async fn move_entry(&self, entry: EntryId, group: GroupId) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::MoveEntry(MoveEntry { entry, group })).await
    }

    pub async fn set_group_title(&self, group: GroupId, title: &str, last_mod: Timestamp) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::SetGroupTitle(SetGroupTitle {
            title: title.to_owned(),
            group,
            last_mod,
        }))
        .await
    }

    pub async fn set_entry_field(
        &self,
        entry: EntryId,
        field: EntryField,
        value: &str,
        last_mod: Timestamp,
    ) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::SetEntryField(SetEntryField {
            field,
            value: value.to_owned(),
            entry,
            last_mod,
        }))
        .await
    }

    pub async fn set_entry_expiry(
        &self,
        entry: EntryId,
        expire: NaiveDate,
        last_mod: Timestamp,
    ) -> Result<Vec<u8>, ClientError> {
        self.send_cmd(Command::SetEntryExpiry(SetEntryExpiry { expire, entry, last_mod }))
            .await
    }
}

/// Writes the request and reads the reply on an established stream, then shuts it down.
async fn exchange<S>(mut stream: S, body: &[u8]) -> Result<Vec<u8>, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_message(&mut stream, body).await?;

    let reply = read_message_idle(&mut stream, IDLE_TIMEOUT).await?;

    // the server closes its side after replying anyway
    if let Err(err) = stream.shutdown().await {
        tracing::debug!(error = %err, "unable to shut down the connection");
    }
    Ok(reply)
}

/// Default location of TLS material: `<config dir>/keepassc/tls`.
pub fn default_tls_dir() -> Option<PathBuf> {
    let mut dir = dirs::config_dir()?;
    dir.push(crate::defaults::APP_FOLDER_NAME);
    dir.push(crate::defaults::TLS_FOLDER_NAME);
    Some(dir)
}
