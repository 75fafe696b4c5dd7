use std::net::SocketAddr;

use shared::{
    client_message::ChangeSecret,
    kdf::{derive_key, Credential},
    server_message::Reply,
};

use super::Error;
use crate::vault::store::VaultStore;

/// Replaces the master credential. Only callers on the same machine may do this: knowing the old
/// key over the network is not enough.
pub async fn change_secret(store: &VaultStore, cmd: ChangeSecret, peer: SocketAddr) -> Result<Reply, Error> {
    if !peer.ip().is_loopback() {
        tracing::warn!(%peer, "rejected remote password change");
        return Err(Error::RemoteSecretChange);
    }

    let credential = Credential::new(cmd.password, cmd.keyfile)?;
    let params = store.snapshot().vault.params().clone();

    // the seeds never change, so the new key can be derived before taking the write gate
    let key = tokio::task::spawn_blocking(move || derive_key(&credential, &params))
        .await
        .map_err(|_| Error::Internal)??;

    store
        .mutate(|vault| {
            vault.set_key(key);
            Ok::<_, Error>(())
        })
        .await?;

    tracing::info!(%peer, "master password changed");
    Ok(Reply::Success(b"Password changed".to_vec()))
}
