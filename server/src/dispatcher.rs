//! One request per connection: read the envelope, authenticate, run the command, reply, close.

use std::{net::SocketAddr, sync::Arc};

use chrono::Local;
use shared::{
    client_message::RawEnvelope,
    constants::IDLE_TIMEOUT,
    server_message::Reply,
    types::truncate_to_seconds,
    wire::{read_message_idle, write_message, WireError},
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    handlers::{self, Error},
    vault::store::VaultStore,
};

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<VaultStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    /// Handles one request body and produces the reply to send back.
    pub async fn handle(&self, body: &[u8], peer: SocketAddr) -> Reply {
        match self.process(body, peer).await {
            Ok(reply) => reply,
            Err(err) => {
                if let Error::Storage(source) = &err {
                    tracing::error!(%peer, error = %source, "database error");
                }
                Reply::fail(err)
            }
        }
    }

    async fn process(&self, body: &[u8], peer: SocketAddr) -> Result<Reply, Error> {
        let raw = RawEnvelope::split(body).map_err(|err| {
            tracing::warn!(%peer, error = %err, "malformed envelope");
            Error::Unavailable
        })?;

        // an envelope without any credential can never match
        let credential = raw.credential().map_err(|_| Error::WrongPassword)?;
        let snapshot = self.store.snapshot();
        let authenticated = tokio::task::spawn_blocking(move || snapshot.vault.authenticate(&credential))
            .await
            .map_err(|_| Error::Internal)?
            .unwrap_or(false);

        if !authenticated {
            tracing::warn!(%peer, "wrong password");
            return Err(Error::WrongPassword);
        }

        let command = raw.command().map_err(|err| {
            tracing::warn!(%peer, command = raw.token(), error = %err, "received a wrong command");
            Error::Unavailable
        })?;

        tracing::info!(%peer, command = command.token(), "handling command");
        let now = truncate_to_seconds(Local::now().naive_local());

        handlers::dispatch(&self.store, command, peer, now).await
    }

    /// Serves a single connection: one request, one reply, then the stream is shut down.
    pub async fn serve<S>(&self, mut stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let body = match read_message_idle(&mut stream, IDLE_TIMEOUT).await {
            Ok(body) => body,
            Err(WireError::UnexpectedEof) => {
                tracing::debug!(%peer, "connection closed before a full message");
                return;
            }
            Err(WireError::Idle(_)) => {
                tracing::warn!(%peer, "timed out waiting for request");
                return;
            }
            Err(err) => {
                tracing::warn!(%peer, error = %err, "failed to read request");
                return;
            }
        };

        let reply = self.handle(&body, peer).await;

        if let Err(err) = write_message(&mut stream, &reply.into_body()).await {
            tracing::warn!(%peer, error = %err, "failed to send reply");
        }
        if let Err(err) = stream.shutdown().await {
            tracing::debug!(%peer, error = %err, "failed to shut down connection");
        }
    }
}
