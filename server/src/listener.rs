//! Accept loops. Each listening socket runs in its own task and spawns one task per connection.

use std::net::SocketAddr;

use shared::{constants::IDLE_TIMEOUT, shutdown::Shutdown};
use tokio::{net::TcpListener, task::JoinSet};
use tokio_rustls::TlsAcceptor;

use crate::dispatcher::Dispatcher;

pub enum Transport {
    Plain,
    Tls(TlsAcceptor),
}

pub struct Listener {
    name: &'static str,
    socket: TcpListener,
    transport: Transport,
}

impl Listener {
    pub async fn bind(name: &'static str, addr: SocketAddr, transport: Transport) -> std::io::Result<Self> {
        let socket = TcpListener::bind(addr).await?;
        tracing::info!(listener = name, addr = %socket.local_addr()?, "listening");

        Ok(Self { name, socket, transport })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Accepts connections until shutdown, then drops the socket and waits for the connections
    /// already accepted to send their reply.
    pub async fn run(self, dispatcher: Dispatcher, mut shutdown: Shutdown) {
        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                () = shutdown.wait() => break,
                Some(joined) = connections.join_next() => {
                    if let Err(err) = joined {
                        tracing::error!(listener = self.name, error = %err, "connection task failed");
                    }
                    continue;
                }
                accepted = self.socket.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(listener = self.name, error = %err, "failed to accept connection");
                    continue;
                }
            };
            tracing::debug!(listener = self.name, %peer, "accepted connection");

            let dispatcher = dispatcher.clone();
            match &self.transport {
                Transport::Plain => {
                    connections.spawn(async move { dispatcher.serve(stream, peer).await });
                }
                Transport::Tls(acceptor) => {
                    let acceptor = acceptor.clone();
                    connections.spawn(async move {
                        match tokio::time::timeout(IDLE_TIMEOUT, acceptor.accept(stream)).await {
                            Ok(Ok(stream)) => dispatcher.serve(stream, peer).await,
                            Ok(Err(err)) => tracing::warn!(%peer, error = %err, "TLS handshake failed"),
                            Err(_) => tracing::warn!(%peer, "TLS handshake timed out"),
                        }
                    });
                }
            }
        }

        drop(self.socket);
        tracing::info!(listener = self.name, in_flight = connections.len(), "stopped listening");

        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                tracing::error!(listener = self.name, error = %err, "connection task failed");
            }
        }
        tracing::debug!(listener = self.name, "all connections closed");
    }
}
