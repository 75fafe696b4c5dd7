use shared::{
    client_message::{DeleteEntry, MoveEntry, NewEntry, SetEntryExpiry, SetEntryField},
    server_message::Reply,
    types::{EntryId, Timestamp},
};

use super::{check_last_mod, Action, Entity, Error};
use crate::vault::{store::VaultStore, EntryData, Vault, VaultError};

fn current_last_mod(vault: &Vault, id: EntryId) -> Result<Timestamp, Error> {
    vault
        .tree()
        .entry(id)
        .map(|e| e.last_mod)
        .ok_or(Error::Gone(Entity::Entry))
}

pub async fn new_entry(store: &VaultStore, cmd: NewEntry, now: Timestamp) -> Result<Reply, Error> {
    let data = EntryData {
        title: cmd.title,
        url: cmd.url,
        username: cmd.username,
        password: cmd.password,
        comment: cmd.comment,
    };

    let (id, committed) = store
        .mutate(|vault| {
            vault
                .tree_mut()
                .create_entry(cmd.group, data, cmd.expire, now)
                .map_err(|err| match err {
                    VaultError::GroupNotFound(_) => Error::EntryGroupGone,
                    other => other.into(),
                })
        })
        .await?;

    tracing::debug!(entry = %id, group = cmd.group, "created entry");
    Ok(Reply::Success(committed.blob.clone()))
}

pub async fn delete_entry(store: &VaultStore, cmd: DeleteEntry) -> Result<Reply, Error> {
    let (_, committed) = store
        .mutate(|vault| {
            check_last_mod(current_last_mod(vault, cmd.entry)?, cmd.last_mod, Entity::Entry, Action::Delete)?;
            vault.tree_mut().remove_entry(cmd.entry)?;
            Ok::<_, Error>(())
        })
        .await?;

    Ok(Reply::Success(committed.blob.clone()))
}

pub async fn move_entry(store: &VaultStore, cmd: MoveEntry, now: Timestamp) -> Result<Reply, Error> {
    let (_, committed) = store
        .mutate(|vault| {
            current_last_mod(vault, cmd.entry)?;
            if vault.tree().group(cmd.group).is_none() {
                return Err(Error::NewParentGone);
            }

            vault.tree_mut().move_entry(cmd.entry, cmd.group, now)?;
            Ok(())
        })
        .await?;

    Ok(Reply::Success(committed.blob.clone()))
}

pub async fn set_entry_field(store: &VaultStore, cmd: SetEntryField, now: Timestamp) -> Result<Reply, Error> {
    let (_, committed) = store
        .mutate(|vault| {
            check_last_mod(current_last_mod(vault, cmd.entry)?, cmd.last_mod, Entity::Entry, Action::Edit)?;
            vault.tree_mut().set_entry_field(cmd.entry, cmd.field, &cmd.value, now)?;
            Ok::<_, Error>(())
        })
        .await?;

    Ok(Reply::Success(committed.blob.clone()))
}

pub async fn set_entry_expiry(store: &VaultStore, cmd: SetEntryExpiry, now: Timestamp) -> Result<Reply, Error> {
    let (_, committed) = store
        .mutate(|vault| {
            check_last_mod(current_last_mod(vault, cmd.entry)?, cmd.last_mod, Entity::Entry, Action::Edit)?;
            vault.tree_mut().set_entry_expiry(cmd.entry, cmd.expire, now)?;
            Ok::<_, Error>(())
        })
        .await?;

    Ok(Reply::Success(committed.blob.clone()))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use shared::client_message::EntryField;
    use uuid::Uuid;

    use super::*;
    use crate::handlers::tests::{at, fail_text, store};

    fn mail_entry(group: u32) -> NewEntry {
        NewEntry {
            title: "mail".into(),
            url: "https://mail.example".into(),
            username: "me".into(),
            password: "hunter2".into(),
            comment: String::new(),
            expire: NaiveDate::from_ymd_opt(2999, 12, 28).unwrap(),
            group,
        }
    }

    async fn with_entry() -> (tempfile::TempDir, VaultStore, EntryId) {
        let (dir, store) = store().await;
        new_entry(&store, mail_entry(1), at(1, 0, 0)).await.unwrap();
        let id = store.snapshot().vault.tree().entries().next().unwrap().id;
        (dir, store, id)
    }

    #[tokio::test]
    async fn new_entry_needs_its_group() {
        let (_dir, store) = store().await;
        assert_eq!(
            fail_text(new_entry(&store, mail_entry(5), at(1, 0, 0)).await),
            "Group for entry doesn't exist anymore. You should refresh"
        );
        assert_eq!(store.snapshot().vault.tree().entries().count(), 0);
    }

    #[tokio::test]
    async fn field_edit_and_conflict() {
        let (_dir, store, id) = with_entry().await;

        set_entry_field(
            &store,
            SetEntryField { field: EntryField::Password, value: "new".into(), entry: id, last_mod: at(1, 0, 0) },
            at(3, 0, 0),
        )
        .await
        .unwrap();
        assert_eq!(store.snapshot().vault.tree().entry(id).unwrap().password, "new");

        let stale = SetEntryField { field: EntryField::Title, value: "x".into(), entry: id, last_mod: at(1, 0, 0) };
        assert_eq!(
            fail_text(set_entry_field(&store, stale, at(4, 0, 0)).await),
            "Entry was modified. You should refresh and if you're sure you want to edit this entry try it again."
        );
        assert_eq!(store.snapshot().vault.tree().entry(id).unwrap().title, "mail");
    }

    #[tokio::test]
    async fn expiry_is_set() {
        let (_dir, store, id) = with_entry().await;
        let expire = NaiveDate::from_ymd_opt(2020, 6, 1).unwrap();

        set_entry_expiry(&store, SetEntryExpiry { expire, entry: id, last_mod: at(1, 0, 0) }, at(2, 0, 0))
            .await
            .unwrap();
        assert_eq!(store.snapshot().vault.tree().entry(id).unwrap().expire.date(), expire);
    }

    #[tokio::test]
    async fn move_and_delete() {
        let (_dir, store, id) = with_entry().await;

        assert_eq!(
            fail_text(move_entry(&store, MoveEntry { entry: id, group: 9 }, at(2, 0, 0)).await),
            "New parent doesn't exist anymore. You should refresh"
        );
        assert_eq!(
            fail_text(move_entry(&store, MoveEntry { entry: Uuid::nil(), group: 1 }, at(2, 0, 0)).await),
            "Entry doesn't exist anymore. You should refresh"
        );

        let text = fail_text(delete_entry(&store, DeleteEntry { entry: id, last_mod: at(0, 30, 0) }).await);
        assert!(text.contains("want to delete this entry"));

        delete_entry(&store, DeleteEntry { entry: id, last_mod: at(1, 0, 0) }).await.unwrap();
        assert_eq!(
            fail_text(delete_entry(&store, DeleteEntry { entry: id, last_mod: at(1, 0, 0) }).await),
            "Entry doesn't exist anymore. You should refresh"
        );
    }
}
