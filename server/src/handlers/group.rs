use shared::{
    client_message::{DeleteGroup, MoveGroup, NewGroup, SetGroupTitle},
    constants::RESULTS_GROUP_ID,
    server_message::Reply,
    types::{GroupId, Timestamp},
};

use super::{check_last_mod, Action, Entity, Error};
use crate::vault::{store::VaultStore, Vault, VaultError};

/// Group id `0` on the wire stands for "no parent".
fn parent_ref(id: GroupId) -> Option<GroupId> {
    (id != RESULTS_GROUP_ID).then_some(id)
}

fn current_last_mod(vault: &Vault, id: GroupId) -> Result<Timestamp, Error> {
    vault
        .tree()
        .group(id)
        .map(|g| g.last_mod)
        .ok_or(Error::Gone(Entity::Group))
}

pub async fn new_group(store: &VaultStore, cmd: NewGroup, now: Timestamp) -> Result<Reply, Error> {
    let (_, committed) = store
        .mutate(|vault| {
            vault
                .tree_mut()
                .create_group(&cmd.title, parent_ref(cmd.parent), now)
                .map_err(|err| match err {
                    VaultError::GroupNotFound(_) => Error::ParentGone,
                    other => other.into(),
                })
        })
        .await?;

    Ok(Reply::Success(committed.blob.clone()))
}

pub async fn delete_group(store: &VaultStore, cmd: DeleteGroup) -> Result<Reply, Error> {
    let (_, committed) = store
        .mutate(|vault| {
            check_last_mod(current_last_mod(vault, cmd.group)?, cmd.last_mod, Entity::Group, Action::Delete)?;
            vault.tree_mut().remove_group(cmd.group)?;
            Ok::<_, Error>(())
        })
        .await?;

    Ok(Reply::Success(committed.blob.clone()))
}

pub async fn move_group(store: &VaultStore, cmd: MoveGroup, now: Timestamp) -> Result<Reply, Error> {
    let (_, committed) = store
        .mutate(|vault| {
            current_last_mod(vault, cmd.group)?;

            let parent = parent_ref(cmd.parent);
            if parent.is_some_and(|p| vault.tree().group(p).is_none()) {
                return Err(Error::NewParentGone);
            }

            vault
                .tree_mut()
                .move_group(cmd.group, parent, now)
                .map_err(|err| match err {
                    VaultError::InvalidMove => Error::InvalidMove,
                    other => other.into(),
                })
        })
        .await?;

    Ok(Reply::Success(committed.blob.clone()))
}

pub async fn set_group_title(store: &VaultStore, cmd: SetGroupTitle, now: Timestamp) -> Result<Reply, Error> {
    let (_, committed) = store
        .mutate(|vault| {
            check_last_mod(current_last_mod(vault, cmd.group)?, cmd.last_mod, Entity::Group, Action::Edit)?;
            vault.tree_mut().set_group_title(cmd.group, &cmd.title, now)?;
            Ok::<_, Error>(())
        })
        .await?;

    Ok(Reply::Success(committed.blob.clone()))
}
