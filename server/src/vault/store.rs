//! Shared handle to the open database.
//!
//! Readers get a cheap snapshot and never wait for writers. Writers are serialized through a
//! single gate: each one works on a private copy, persists it and only then publishes it, so a
//! failed write leaves both the file and the in-memory state untouched.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use shared::{kdf::Credential, types::Timestamp};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use super::{Vault, VaultError};

/// A committed database state together with its sealed form, which is what `GET` and every
/// mutation reply with.
#[derive(Debug)]
pub struct Snapshot {
    pub vault: Vault,
    pub blob: Vec<u8>,
}

pub struct VaultStore {
    path: PathBuf,
    current: RwLock<Arc<Snapshot>>,
    write_gate: Mutex<()>,
}

impl VaultStore {
    /// Creates a new database file. Fails if the file already exists.
    pub async fn create(
        path: impl Into<PathBuf>,
        credential: Credential,
        rounds: u32,
        first_group: String,
        now: Timestamp,
    ) -> Result<Self, VaultError> {
        let path = path.into();
        if fs::try_exists(&path).await? {
            return Err(VaultError::IoError(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }

        let vault = tokio::task::spawn_blocking(move || Vault::create(&credential, rounds, &first_group, now))
            .await
            .map_err(std::io::Error::other)??;

        let blob = vault.seal()?;
        persist(&path, &blob).await?;
        tracing::info!(path = %path.display(), rounds, "created database");

        Ok(Self::new(path, Snapshot { vault, blob }))
    }

    /// Opens and decrypts an existing database file.
    pub async fn open(path: impl Into<PathBuf>, credential: Credential) -> Result<Self, VaultError> {
        let path = path.into();
        let data = fs::read(&path).await?;

        let (vault, blob) = tokio::task::spawn_blocking(move || Vault::open(&data, &credential).map(|v| (v, data)))
            .await
            .map_err(std::io::Error::other)??;

        tracing::info!(
            path = %path.display(),
            groups = vault.tree().groups().count(),
            entries = vault.tree().entries().count(),
            "opened database"
        );

        Ok(Self::new(path, Snapshot { vault, blob }))
    }

    fn new(path: PathBuf, snapshot: Snapshot) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(snapshot)),
            write_gate: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The latest committed state.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read())
    }

    /// Applies `change` to a copy of the latest state and commits it to disk, then publishes it.
    ///
    /// Only one mutation runs at a time; `change` sees every earlier commit. If `change` or the
    /// write fails nothing is published.
    pub async fn mutate<T, E, F>(&self, change: F) -> Result<(T, Arc<Snapshot>), E>
    where
        F: FnOnce(&mut Vault) -> Result<T, E>,
        E: From<VaultError>,
    {
        let _gate = self.write_gate.lock().await;

        let mut draft = self.snapshot().vault.clone();
        let result = change(&mut draft)?;

        let blob = draft.seal()?;
        persist(&self.path, &blob).await?;

        let committed = Arc::new(Snapshot { vault: draft, blob });
        *self.current.write() = Arc::clone(&committed);

        Ok((result, committed))
    }
}

/// Writes to a temporary file next to `path` first, so a crash never leaves a torn database.
async fn persist(path: &Path, data: &[u8]) -> Result<(), VaultError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await?;
    Ok(())
}
