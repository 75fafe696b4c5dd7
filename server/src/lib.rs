#![deny(unused_must_use, deprecated)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

//! The KeePassC database server: holds one encrypted database and answers authenticated
//! requests on up to three sockets (local plaintext, network plaintext, network TLS).

pub mod config;
pub mod defaults;
pub mod dispatcher;
pub mod handlers;
pub mod listener;
pub mod tls;
pub mod vault;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use shared::shutdown::Shutdown;
use tokio::task::JoinSet;

use crate::{
    config::ServeConfig,
    dispatcher::Dispatcher,
    listener::{Listener, Transport},
    vault::store::VaultStore,
};

pub struct Server {
    dispatcher: Dispatcher,
    listeners: Vec<Listener>,
}

impl Server {
    /// Opens every socket the configuration asks for.
    pub async fn bind(config: &ServeConfig, store: Arc<VaultStore>) -> anyhow::Result<Self> {
        let mut listeners = vec![Listener::bind("local", config.local_addr(), Transport::Plain)
            .await
            .context("Unable to bind the local socket")?];

        if let Some(addr) = config.network_addr() {
            listeners.push(
                Listener::bind("network", addr, Transport::Plain)
                    .await
                    .with_context(|| format!("Unable to bind the network socket on {addr}"))?,
            );
        }

        if let Some(addr) = config.tls_addr() {
            let dir = config.tls_dir()?;
            let acceptor = tls::load_acceptor(&dir, config.tls_min_version)
                .with_context(|| format!("Unable to load TLS material from {}", dir.display()))?;
            listeners.push(
                Listener::bind("tls", addr, Transport::Tls(acceptor))
                    .await
                    .with_context(|| format!("Unable to bind the TLS socket on {addr}"))?,
            );
        }

        Ok(Self {
            dispatcher: Dispatcher::new(store),
            listeners,
        })
    }

    /// Bound address of the named listener (`local`, `network` or `tls`).
    pub fn addr(&self, name: &str) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.name() == name)
            .and_then(|l| l.local_addr().ok())
    }

    /// Serves until `shutdown` fires, every accept loop has stopped and every accepted
    /// connection has been answered.
    pub async fn run(self, shutdown: Shutdown) {
        let mut listeners = JoinSet::new();
        for listener in self.listeners {
            listeners.spawn(listener.run(self.dispatcher.clone(), shutdown.clone()));
        }

        while let Some(joined) = listeners.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "listener task failed");
            }
        }
    }
}
