use std::fmt::Write;

use shared::{server_message::Reply, types::Timestamp};

use crate::vault::{store::VaultStore, Entry};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn digest(out: &mut String, entry: &Entry) {
    let date = |ts: &Timestamp| ts.format(DATE_FORMAT).to_string();

    // writing into a String can't fail
    let _ = writeln!(out, "Title: {}", entry.title);
    let _ = writeln!(out, "URL: {}", entry.url);
    let _ = writeln!(out, "Username: {}", entry.username);
    let _ = writeln!(out, "Password: {}", entry.password);
    let _ = writeln!(out, "Creation: {}", date(&entry.creation));
    let _ = writeln!(out, "Access: {}", date(&entry.last_access));
    let _ = writeln!(out, "Modification: {}", date(&entry.last_mod));
    let _ = writeln!(out, "Expiration: {}", date(&entry.expire));
    let _ = writeln!(out, "Comment: {}", entry.comment);
    out.push('\n');
}

/// Text digest of every entry whose title contains `title`, ignoring case. No match is an empty
/// reply, not a failure.
pub fn find(store: &VaultStore, title: &str) -> Reply {
    let snapshot = store.snapshot();

    let mut out = String::new();
    for entry in snapshot.vault.tree().find_entries(title) {
        digest(&mut out, entry);
    }

    Reply::Success(out.into_bytes())
}

/// The whole sealed database.
pub fn get(store: &VaultStore) -> Reply {
    Reply::Success(store.snapshot().blob.clone())
}
