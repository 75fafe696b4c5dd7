//! A minimal password database: a tree of groups and entries, kept as an arena keyed by id,
//! plus the key material needed to seal it.

pub mod file;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use shared::{
    client_message::EntryField,
    constants::RESULTS_GROUP_ID,
    kdf::{derive_key, Credential, FinalKey, KdfError, KdfParams},
    types::{truncate_to_seconds, EntryId, GroupId, Timestamp},
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Group {0} not found")]
    GroupNotFound(GroupId),
    #[error("Entry {0} not found")]
    EntryNotFound(EntryId),
    #[error("A group can't be moved into itself or one of its subgroups")]
    InvalidMove,
    #[error("Wrong password or keyfile")]
    WrongCredential,
    #[error("Database file is corrupt: {0}")]
    Corrupt(&'static str),
    #[error("Unsupported database version {0}")]
    UnsupportedVersion(u32),
    #[error("{0}")]
    Kdf(#[from] KdfError),
    #[error("{0}")]
    IoError(#[from] std::io::Error),
    #[error("{0}")]
    SerializationError(#[from] bincode::Error),
    #[error("Data decryption/encryption error")]
    CryptoError(#[from] aes_gcm::Error),
    #[error("{0}")]
    GetrandomError(#[from] getrandom::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub title: String,
    /// `None` for top-level groups.
    pub parent: Option<GroupId>,
    pub creation: Timestamp,
    pub last_mod: Timestamp,
    pub last_access: Timestamp,
    pub expire: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub group: GroupId,
    pub title: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub comment: String,
    pub creation: Timestamp,
    pub last_mod: Timestamp,
    pub last_access: Timestamp,
    pub expire: Timestamp,
}

/// Entity fields of a new entry.
#[derive(Clone, Debug, Default)]
pub struct EntryData {
    pub title: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub comment: String,
}

/// "Never expires" in KeePass 1.x terms.
pub fn never_expires() -> Timestamp {
    NaiveDate::from_ymd_opt(2999, 12, 28)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .unwrap_or_default()
}

/// The next modification time of an entity: now, but always strictly after the previous one so
/// that every write is observable through `last_mod`.
fn next_last_mod(previous: Timestamp, now: Timestamp) -> Timestamp {
    let now = truncate_to_seconds(now);
    if now > previous {
        now
    } else {
        previous + Duration::seconds(1)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    groups: BTreeMap<GroupId, Group>,
    entries: BTreeMap<EntryId, Entry>,
}

impl Tree {
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn children(&self, parent: Option<GroupId>) -> impl Iterator<Item = &Group> {
        self.groups.values().filter(move |g| g.parent == parent)
    }

    /// Entries whose title contains `title`, ignoring case.
    pub fn find_entries(&self, title: &str) -> Vec<&Entry> {
        let needle = title.to_lowercase();
        self.entries
            .values()
            .filter(|e| e.title.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn create_group(&mut self, title: &str, parent: Option<GroupId>, now: Timestamp) -> Result<GroupId, VaultError> {
        if let Some(parent) = parent {
            self.require_group(parent)?;
        }

        // ids start at 1, the results group id is never handed out
        let id = self
            .groups
            .keys()
            .next_back()
            .map_or(RESULTS_GROUP_ID + 1, |last| last + 1);
        let now = truncate_to_seconds(now);

        self.groups.insert(
            id,
            Group {
                id,
                title: title.to_owned(),
                parent,
                creation: now,
                last_mod: now,
                last_access: now,
                expire: never_expires(),
            },
        );

        Ok(id)
    }

    pub fn create_entry(
        &mut self,
        group: GroupId,
        data: EntryData,
        expire: NaiveDate,
        now: Timestamp,
    ) -> Result<EntryId, VaultError> {
        self.require_group(group)?;

        let id = loop {
            let candidate = Uuid::new_v4();
            if !self.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        let now = truncate_to_seconds(now);

        self.entries.insert(
            id,
            Entry {
                id,
                group,
                title: data.title,
                url: data.url,
                username: data.username,
                password: data.password,
                comment: data.comment,
                creation: now,
                last_mod: now,
                last_access: now,
                expire: expire.and_hms_opt(0, 0, 0).unwrap_or_default(),
            },
        );

        Ok(id)
    }

    /// Removes a group together with all its subgroups and their entries.
    pub fn remove_group(&mut self, id: GroupId) -> Result<(), VaultError> {
        self.require_group(id)?;

        let mut doomed = self.descendants(id);
        doomed.insert(id);

        self.groups.retain(|gid, _| !doomed.contains(gid));
        self.entries.retain(|_, e| !doomed.contains(&e.group));

        Ok(())
    }

    pub fn remove_entry(&mut self, id: EntryId) -> Result<(), VaultError> {
        self.entries
            .remove(&id)
            .map(|_| ())
            .ok_or(VaultError::EntryNotFound(id))
    }

    pub fn move_group(&mut self, id: GroupId, parent: Option<GroupId>, now: Timestamp) -> Result<(), VaultError> {
        self.require_group(id)?;

        if let Some(parent) = parent {
            self.require_group(parent)?;
            if parent == id || self.descendants(id).contains(&parent) {
                return Err(VaultError::InvalidMove);
            }
        }

        let group = self.group_mut(id)?;
        group.parent = parent;
        group.last_mod = next_last_mod(group.last_mod, now);

        Ok(())
    }

    pub fn move_entry(&mut self, id: EntryId, group: GroupId, now: Timestamp) -> Result<(), VaultError> {
        self.require_group(group)?;

        let entry = self.entry_mut(id)?;
        entry.group = group;
        entry.last_mod = next_last_mod(entry.last_mod, now);

        Ok(())
    }

    pub fn set_group_title(&mut self, id: GroupId, title: &str, now: Timestamp) -> Result<(), VaultError> {
        let group = self.group_mut(id)?;
        group.title = title.to_owned();
        group.last_mod = next_last_mod(group.last_mod, now);

        Ok(())
    }

    pub fn set_entry_field(
        &mut self,
        id: EntryId,
        field: EntryField,
        value: &str,
        now: Timestamp,
    ) -> Result<(), VaultError> {
        let entry = self.entry_mut(id)?;

        let target = match field {
            EntryField::Title => &mut entry.title,
            EntryField::Username => &mut entry.username,
            EntryField::Url => &mut entry.url,
            EntryField::Comment => &mut entry.comment,
            EntryField::Password => &mut entry.password,
        };
        *target = value.to_owned();
        entry.last_mod = next_last_mod(entry.last_mod, now);

        Ok(())
    }

    pub fn set_entry_expiry(&mut self, id: EntryId, expire: NaiveDate, now: Timestamp) -> Result<(), VaultError> {
        let entry = self.entry_mut(id)?;
        entry.expire = expire.and_hms_opt(0, 0, 0).unwrap_or_default();
        entry.last_mod = next_last_mod(entry.last_mod, now);

        Ok(())
    }

    /// Drops anything that must never be persisted: the results group and entries without a
    /// group.
    pub(crate) fn sanitize(&mut self) {
        self.groups.remove(&RESULTS_GROUP_ID);

        let orphaned: Vec<GroupId> = self
            .groups
            .values()
            .filter(|g| g.parent.is_some_and(|p| !self.groups.contains_key(&p)))
            .map(|g| g.id)
            .collect();
        for id in orphaned {
            if let Some(group) = self.groups.get_mut(&id) {
                group.parent = None;
            }
        }

        let groups = &self.groups;
        self.entries.retain(|_, e| groups.contains_key(&e.group));
    }

    fn descendants(&self, id: GroupId) -> BTreeSet<GroupId> {
        let mut found = BTreeSet::new();
        let mut pending = vec![id];

        while let Some(current) = pending.pop() {
            for child in self.children(Some(current)) {
                if found.insert(child.id) {
                    pending.push(child.id);
                }
            }
        }

        found
    }

    fn require_group(&self, id: GroupId) -> Result<(), VaultError> {
        if self.groups.contains_key(&id) {
            Ok(())
        } else {
            Err(VaultError::GroupNotFound(id))
        }
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut Group, VaultError> {
        self.groups.get_mut(&id).ok_or(VaultError::GroupNotFound(id))
    }

    fn entry_mut(&mut self, id: EntryId) -> Result<&mut Entry, VaultError> {
        self.entries.get_mut(&id).ok_or(VaultError::EntryNotFound(id))
    }
}

/// An unlocked database: its tree plus the key it is sealed with.
#[derive(Clone, Debug)]
pub struct Vault {
    params: KdfParams,
    key: FinalKey,
    tree: Tree,
}

impl Vault {
    /// Creates a new database with fresh random seeds and a single top-level group.
    pub fn create(credential: &Credential, rounds: u32, first_group: &str, now: Timestamp) -> Result<Self, VaultError> {
        let mut params = KdfParams {
            seed1: [0; 32],
            seed2: [0; 16],
            rounds,
        };
        getrandom::getrandom(&mut params.seed1)?;
        getrandom::getrandom(&mut params.seed2)?;

        let key = derive_key(credential, &params)?;
        let mut tree = Tree::default();
        tree.create_group(first_group, None, now)?;

        Ok(Self { params, key, tree })
    }

    pub(crate) fn from_parts(params: KdfParams, key: FinalKey, tree: Tree) -> Self {
        Self { params, key, tree }
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    pub(crate) fn key(&self) -> &FinalKey {
        &self.key
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// Whether `credential` derives the same final key as the one this database is sealed with.
    ///
    /// Runs the full key transformation; call it off the async executor.
    pub fn authenticate(&self, credential: &Credential) -> Result<bool, KdfError> {
        Ok(derive_key(credential, &self.params)?.matches(&self.key))
    }

    /// Replaces the key with one derived for a new credential, keeping the seeds.
    pub fn set_key(&mut self, key: FinalKey) {
        self.key = key;
    }
}
