//! Requests from a local program to a running agent.

use std::net::SocketAddr;

use shared::{
    agent_message::{AgentCommand, AgentCredentials},
    constants::IDLE_TIMEOUT,
    server_message::Reply,
};
use tokio::net::TcpStream;

use crate::net::ClientError;

pub struct AgentClient {
    addr: SocketAddr,
}

impl AgentClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn request(&self, command: &AgentCommand) -> Result<Vec<u8>, ClientError> {
        let mut stream = tokio::time::timeout(IDLE_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(ClientError::Connect)?;

        shared::wire::write_message(&mut stream, &command.encode()).await?;
        let body = shared::wire::read_message_idle(&mut stream, IDLE_TIMEOUT).await?;

        match Reply::from_body(body) {
            Reply::Success(body) => Ok(body),
            Reply::Fail(reason) => Err(ClientError::Server(reason)),
        }
    }

    /// Finds entries by title through the agent.
    pub async fn find(&self, title: &str) -> Result<String, ClientError> {
        let body = self.request(&AgentCommand::Find { title: title.to_owned() }).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Downloads the encrypted database through the agent.
    pub async fn get_db(&self) -> Result<Vec<u8>, ClientError> {
        self.request(&AgentCommand::Get).await
    }

    /// Fetches the credential and server settings the agent was started with.
    pub async fn get_credentials(&self) -> Result<AgentCredentials, ClientError> {
        let body = self.request(&AgentCommand::GetCredentials).await?;
        Ok(AgentCredentials::decode(&body)?)
    }
}
