//! The agent keeps the credential and the server address in memory and answers local requests
//! on a loopback socket, so the interactive client only needs the master password once.

pub mod client;

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use shared::{
    agent_message::AgentCommand,
    client_message::Command,
    constants::IDLE_TIMEOUT,
    server_message::Reply,
    shutdown::Shutdown,
    wire::{read_message_idle, write_message, WireError},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    task::JoinSet,
};

use crate::net::Client;

pub struct Agent {
    client: Arc<Client>,
    socket: TcpListener,
}

impl Agent {
    /// Binds the agent socket. It only ever listens on loopback since `GETC` hands out the
    /// credential.
    pub async fn bind(client: Client, port: u16) -> std::io::Result<Self> {
        let socket = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
        tracing::info!(addr = %socket.local_addr()?, "agent listening");

        Ok(Self {
            client: Arc::new(client),
            socket,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Answers requests until shutdown. The session is dropped (and wiped) once the last
    /// in-flight request is done with it.
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                () = shutdown.wait() => break,
                Some(_) = connections.join_next() => continue,
                accepted = self.socket.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let client = Arc::clone(&self.client);
                    connections.spawn(async move { serve(&client, stream, peer).await });
                }
                Err(err) => tracing::warn!(error = %err, "failed to accept connection"),
            }
        }

        // stop accepting, but let requests already read finish
        drop(self.socket);
        tracing::debug!(in_flight = connections.len(), "waiting for open connections");
        while connections.join_next().await.is_some() {}

        tracing::info!("agent stopped");
    }
}

/// Produces the reply for one agent command.
pub async fn handle(client: &Client, command: AgentCommand) -> Reply {
    let relayed = match command {
        AgentCommand::GetCredentials => return Reply::Success(client.session().encode()),
        AgentCommand::Find { title } => Command::Find { title },
        AgentCommand::Get => Command::Get,
    };

    match client.request(relayed).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::warn!(error = %err, "unable to reach the server");
            Reply::fail(err)
        }
    }
}

async fn serve<S>(client: &Client, mut stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let body = match read_message_idle(&mut stream, IDLE_TIMEOUT).await {
        Ok(body) => body,
        Err(WireError::UnexpectedEof) => return,
        Err(WireError::Idle(_)) => {
            tracing::debug!(%peer, "connection timed out");
            return;
        }
        Err(err) => {
            tracing::warn!(%peer, error = %err, "unable to read request");
            return;
        }
    };

    let reply = match AgentCommand::decode(&body) {
        Ok(command) => {
            tracing::debug!(%peer, command = command.token(), "handling agent command");
            handle(client, command).await
        }
        Err(err) => {
            tracing::warn!(%peer, error = %err, "received a wrong command");
            Reply::fail("Command isn't available")
        }
    };

    if let Err(err) = write_message(&mut stream, &reply.into_body()).await {
        tracing::warn!(%peer, error = %err, "unable to send reply");
    }
    if let Err(err) = stream.shutdown().await {
        tracing::debug!(%peer, error = %err, "unable to shut down connection");
    }
}
