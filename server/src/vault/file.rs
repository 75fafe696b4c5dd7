//! On-disk container of a [`Vault`].
//!
//! Layout:
//! - magic `KPCV`
//! - format version (u32 LE)
//! - key transformation rounds (u32 LE)
//! - seed1 (32 B), seed2 (16 B)
//! - nonce (12 B)
//! - AES-256-GCM encrypted tree (encoded with bincode), authenticated together with all of the
//!   above

use aes_gcm::{AeadInPlace, Aes256Gcm, Key, KeyInit, Nonce};
use bincode::Options;
use shared::kdf::{derive_key, Credential, KdfParams};

use super::{Tree, Vault, VaultError};

const MAGIC: &[u8; 4] = b"KPCV";
const VERSION: u32 = 1;
const NONCE_SIZE: usize = 12;
const HEADER_SIZE: usize = MAGIC.len() + 4 + 4 + 32 + 16;

fn header(params: &KdfParams) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&VERSION.to_le_bytes());
    header.extend_from_slice(&params.rounds.to_le_bytes());
    header.extend_from_slice(&params.seed1);
    header.extend_from_slice(&params.seed2);
    header
}

/// Reads the key transformation parameters from a sealed database.
pub fn read_params(data: &[u8]) -> Result<KdfParams, VaultError> {
    if data.len() < HEADER_SIZE + NONCE_SIZE {
        return Err(VaultError::Corrupt("file is too short"));
    }
    if data[..4] != MAGIC[..] {
        return Err(VaultError::Corrupt("not a database file"));
    }

    let le_u32 = |at: usize| {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&data[at..at + 4]);
        u32::from_le_bytes(bytes)
    };

    let version = le_u32(4);
    if version != VERSION {
        return Err(VaultError::UnsupportedVersion(version));
    }

    let mut params = KdfParams {
        seed1: [0; 32],
        seed2: [0; 16],
        rounds: le_u32(8),
    };
    params.seed1.copy_from_slice(&data[12..44]);
    params.seed2.copy_from_slice(&data[44..HEADER_SIZE]);

    Ok(params)
}

impl Vault {
    /// Serializes and encrypts the database with a fresh nonce.
    pub fn seal(&self) -> Result<Vec<u8>, VaultError> {
        let mut tree = self.tree.clone();
        tree.sanitize();

        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce)?;

        let mut buffer = header(&self.params);
        let mut body = bincode::options().with_varint_encoding().serialize(&tree)?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()));
        cipher.encrypt_in_place(Nonce::from_slice(&nonce), &buffer, &mut body)?;

        buffer.extend_from_slice(&nonce);
        buffer.append(&mut body);

        Ok(buffer)
    }

    /// Decrypts a sealed database. A credential that derives a different key is reported as
    /// [`VaultError::WrongCredential`].
    pub fn open(data: &[u8], credential: &Credential) -> Result<Self, VaultError> {
        let params = read_params(data)?;
        let key = derive_key(credential, &params)?;

        let (aad, rest) = data.split_at(HEADER_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let mut body = ciphertext.to_vec();
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        cipher
            .decrypt_in_place(Nonce::from_slice(nonce), aad, &mut body)
            .map_err(|_| VaultError::WrongCredential)?;

        let mut tree: Tree = bincode::options().with_varint_encoding().deserialize(&body)?;
        tree.sanitize();

        Ok(Vault::from_parts(params, key, tree))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::vault::EntryData;

    fn credential(password: &str) -> Credential {
        Credential::new(Some(password.into()), None).unwrap()
    }

    fn now() -> shared::types::Timestamp {
        NaiveDate::from_ymd_opt(2013, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn sealed_vault_reopens() {
        let mut vault = Vault::create(&credential("pw"), 50, "Root", now()).unwrap();
        let data = EntryData {
            title: "mail".into(),
            password: "hunter2".into(),
            ..Default::default()
        };
        let id = vault
            .tree_mut()
            .create_entry(1, data, NaiveDate::from_ymd_opt(2999, 12, 28).unwrap(), now())
            .unwrap();

        let sealed = vault.seal().unwrap();
        let reopened = Vault::open(&sealed, &credential("pw")).unwrap();

        assert_eq!(reopened.tree(), vault.tree());
        assert_eq!(reopened.params(), vault.params());
        assert_eq!(reopened.tree().entry(id).unwrap().password, "hunter2");
    }

    #[test]
    fn wrong_credential_is_detected() {
        let vault = Vault::create(&credential("pw"), 50, "Root", now()).unwrap();
        let sealed = vault.seal().unwrap();

        assert!(matches!(
            Vault::open(&sealed, &credential("nope")),
            Err(VaultError::WrongCredential)
        ));
    }

    #[test]
    fn tampered_header_is_rejected() {
        let vault = Vault::create(&credential("pw"), 50, "Root", now()).unwrap();
        let mut sealed = vault.seal().unwrap();

        // seed2 is authenticated, flipping it changes the key and the AAD
        sealed[50] ^= 1;
        assert!(Vault::open(&sealed, &credential("pw")).is_err());

        assert!(matches!(
            Vault::open(b"KPCV", &credential("pw")),
            Err(VaultError::Corrupt(_))
        ));
        assert!(matches!(
            Vault::open(&[0u8; 80], &credential("pw")),
            Err(VaultError::Corrupt(_))
        ));
    }

    #[test]
    fn every_seal_uses_a_fresh_nonce() {
        let vault = Vault::create(&credential("pw"), 50, "Root", now()).unwrap();
        assert_ne!(vault.seal().unwrap(), vault.seal().unwrap());
    }
}
