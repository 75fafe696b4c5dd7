pub(crate) mod entry;
pub(crate) mod group;
pub(crate) mod query;
pub(crate) mod secret;

use std::net::SocketAddr;

use shared::{
    client_message::Command, kdf::KdfError, server_message::Reply, types::Timestamp,
};

use crate::vault::{store::VaultStore, VaultError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    Group,
    Entry,
}

impl Entity {
    fn name(self) -> &'static str {
        match self {
            Self::Group => "Group",
            Self::Entry => "Entry",
        }
    }

    fn noun(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Entry => "entry",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Delete,
    Edit,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Edit => "edit",
        }
    }
}

/// A failed request. The `Display` text is what follows `FAIL: ` in the reply.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Wrong password")]
    WrongPassword,
    #[error("Command isn't available")]
    Unavailable,
    #[error(
        "{} was modified. You should refresh and if you're sure you want to {} this {} try it again.",
        .0.name(), .1.verb(), .0.noun()
    )]
    Modified(Entity, Action),
    #[error("{} doesn't exist anymore. You should refresh", .0.name())]
    Gone(Entity),
    #[error("Parent doesn't exist anymore. You should refresh")]
    ParentGone,
    #[error("Group for entry doesn't exist anymore. You should refresh")]
    EntryGroupGone,
    #[error("New parent doesn't exist anymore. You should refresh")]
    NewParentGone,
    #[error("Group can't be moved into itself or one of its subgroups")]
    InvalidMove,
    #[error("Password change from remote is not allowed")]
    RemoteSecretChange,
    #[error("{0}")]
    Credential(#[from] KdfError),
    #[error("Database couldn't be saved")]
    Storage(#[from] VaultError),
    #[error("Internal server error")]
    Internal,
}

/// Rejects a change if the entity was modified after the client's copy of it.
pub(crate) fn check_last_mod(
    current: Timestamp,
    client: Timestamp,
    entity: Entity,
    action: Action,
) -> Result<(), Error> {
    if current > client {
        Err(Error::Modified(entity, action))
    } else {
        Ok(())
    }
}

/// Runs an authenticated command against the database.
pub async fn dispatch(store: &VaultStore, command: Command, peer: SocketAddr, now: Timestamp) -> Result<Reply, Error> {
    match command {
        Command::Find { title } => Ok(query::find(store, &title)),
        Command::Get => Ok(query::get(store)),
        Command::ChangeSecret(cmd) => secret::change_secret(store, cmd, peer).await,
        Command::NewGroup(cmd) => group::new_group(store, cmd, now).await,
        Command::DeleteGroup(cmd) => group::delete_group(store, cmd).await,
        Command::MoveGroup(cmd) => group::move_group(store, cmd, now).await,
        Command::SetGroupTitle(cmd) => group::set_group_title(store, cmd, now).await,
        Command::NewEntry(cmd) => entry::new_entry(store, cmd, now).await,
        Command::DeleteEntry(cmd) => entry::delete_entry(store, cmd).await,
        Command::MoveEntry(cmd) => entry::move_entry(store, cmd, now).await,
        Command::SetEntryField(cmd) => entry::set_entry_field(store, cmd, now).await,
        Command::SetEntryExpiry(cmd) => entry::set_entry_expiry(store, cmd, now).await,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::NaiveDate;
    use shared::kdf::Credential;
    use tempfile::TempDir;

    use super::*;

    pub fn at(h: u32, m: u32, s: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2013, 1, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    /// A fresh database with a single top-level group (id 1) created at midnight.
    pub async fn store() -> (TempDir, VaultStore) {
        let dir = tempfile::tempdir().unwrap();
        let credential = Credential::new(Some("pw".into()), None).unwrap();
        let store = VaultStore::create(dir.path().join("db.kpc"), credential, 10, "Root".into(), at(0, 0, 0))
            .await
            .unwrap();
        (dir, store)
    }

    pub fn fail_text(result: Result<Reply, Error>) -> String {
        match result {
            Err(err) => err.to_string(),
            Ok(reply) => panic!("expected a failure, got {reply:?}"),
        }
    }

    #[test]
    fn failure_texts() {
        assert_eq!(
            Error::Modified(Entity::Group, Action::Delete).to_string(),
            "Group was modified. You should refresh and if you're sure you want to delete this group try it again."
        );
        assert_eq!(
            Error::Modified(Entity::Entry, Action::Edit).to_string(),
            "Entry was modified. You should refresh and if you're sure you want to edit this entry try it again."
        );
        assert_eq!(
            Error::Gone(Entity::Entry).to_string(),
            "Entry doesn't exist anymore. You should refresh"
        );
        assert_eq!(Error::Unavailable.to_string(), "Command isn't available");
    }

    #[test]
    fn conflict_only_when_newer() {
        assert!(check_last_mod(at(1, 0, 0), at(1, 0, 0), Entity::Group, Action::Edit).is_ok());
        assert!(check_last_mod(at(1, 0, 0), at(2, 0, 0), Entity::Group, Action::Edit).is_ok());
        assert!(matches!(
            check_last_mod(at(1, 0, 1), at(1, 0, 0), Entity::Entry, Action::Delete),
            Err(Error::Modified(Entity::Entry, Action::Delete))
        ));
    }
}
