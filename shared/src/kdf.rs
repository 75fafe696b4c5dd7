//! Key derivation compatible with the KeePass 1.x key schedule.
//!
//! `MasterKey = SHA256(SHA256(password) || keyfile_key)` (or either part alone), and
//! `FinalKey = SHA256(seed2 || SHA256(AES-ECB^rounds(seed1, MasterKey)))`.

use aes::{
    cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit},
    Aes256,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::constants::MAX_KEY_ROUNDS;

pub type Seed1 = [u8; 32];
pub type Seed2 = [u8; 16];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KdfError {
    #[error("Neither a password nor a keyfile was given")]
    EmptyCredential,
    #[error("{0} key transformation rounds exceed the limit of {MAX_KEY_ROUNDS}")]
    TooManyRounds(u32),
    #[error("The password is not valid UTF-8")]
    InvalidPassword,
}

/// A password and/or keyfile content. At least one of them is present.
#[derive(Clone)]
pub struct Credential {
    password: Option<Zeroizing<String>>,
    keyfile: Option<Zeroizing<Vec<u8>>>,
}

impl Credential {
    pub fn new(password: Option<String>, keyfile: Option<Vec<u8>>) -> Result<Self, KdfError> {
        if password.is_none() && keyfile.is_none() {
            return Err(KdfError::EmptyCredential);
        }

        Ok(Self {
            password: password.map(Zeroizing::new),
            keyfile: keyfile.map(Zeroizing::new),
        })
    }

    /// Builds a credential from the two envelope fields, where an empty field means "absent".
    ///
    /// A password that isn't UTF-8 is refused instead of being repaired, so two different byte
    /// strings never end up as the same credential.
    pub fn from_envelope(password: &[u8], keyfile: &[u8]) -> Result<Self, KdfError> {
        let password = match password {
            [] => None,
            bytes => Some(String::from_utf8(bytes.to_vec()).map_err(|_| KdfError::InvalidPassword)?),
        };
        let keyfile = (!keyfile.is_empty()).then(|| keyfile.to_vec());

        Self::new(password, keyfile)
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().map(String::as_str)
    }

    pub fn keyfile(&self) -> Option<&[u8]> {
        self.keyfile.as_deref().map(Vec::as_slice)
    }

    /// The two leading envelope fields.
    pub fn envelope_fields(&self) -> [&[u8]; 2] {
        [
            self.password().map_or(&[][..], str::as_bytes),
            self.keyfile().unwrap_or(&[]),
        ]
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keyfile", &self.keyfile.as_ref().map(|k| k.len()))
            .finish()
    }
}

#[derive(Clone)]
pub struct MasterKey(Zeroizing<[u8; 32]>);

#[derive(Clone)]
pub struct FinalKey(Zeroizing<[u8; 32]>);

impl FinalKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Constant-time comparison.
    pub fn matches(&self, other: &FinalKey) -> bool {
        constant_time_eq(self.0.as_slice(), other.0.as_slice())
    }
}

impl std::fmt::Debug for FinalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FinalKey(<redacted>)")
    }
}

/// Per-database parameters of the key transformation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub seed1: Seed1,
    pub seed2: Seed2,
    pub rounds: u32,
}

pub fn derive_master_key(credential: &Credential) -> MasterKey {
    let password_hash = credential.password().map(|p| Sha256::digest(p.as_bytes()));
    let keyfile_hash = credential.keyfile().map(keyfile_key);

    let key: [u8; 32] = match (password_hash, keyfile_hash) {
        (Some(p), Some(k)) => {
            let mut hasher = Sha256::new();
            hasher.update(p);
            hasher.update(k.as_slice());
            hasher.finalize().into()
        }
        (Some(p), None) => p.into(),
        (None, Some(k)) => *k,
        // unreachable through Credential::new, hash nothing to stay total
        (None, None) => Sha256::digest(b"").into(),
    };

    MasterKey(Zeroizing::new(key))
}

pub fn derive_final_key(master: &MasterKey, params: &KdfParams) -> Result<FinalKey, KdfError> {
    if params.rounds > MAX_KEY_ROUNDS {
        return Err(KdfError::TooManyRounds(params.rounds));
    }

    let cipher = Aes256::new(GenericArray::from_slice(&params.seed1));
    let mut key = Zeroizing::new(*master.0);

    // two independent 16 byte blocks, encrypted in place `rounds` times
    for _ in 0..params.rounds {
        let (left, right) = key.split_at_mut(16);
        cipher.encrypt_block(GenericArray::from_mut_slice(left));
        cipher.encrypt_block(GenericArray::from_mut_slice(right));
    }

    let transformed = Zeroizing::new(<[u8; 32]>::from(Sha256::digest(key.as_slice())));

    let mut hasher = Sha256::new();
    hasher.update(params.seed2);
    hasher.update(transformed.as_slice());

    Ok(FinalKey(Zeroizing::new(hasher.finalize().into())))
}

/// Convenience wrapper over both derivation steps.
pub fn derive_key(credential: &Credential, params: &KdfParams) -> Result<FinalKey, KdfError> {
    derive_final_key(&derive_master_key(credential), params)
}

/// KeePass 1.x keyfile handling: 32 raw bytes are the key, 64 hex digits are decoded, anything
/// else is hashed.
fn keyfile_key(content: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);

    match content.len() {
        32 => key.copy_from_slice(content),
        64 if hex::decode_to_slice(content, key.as_mut_slice()).is_ok() => {}
        _ => key.copy_from_slice(&Sha256::digest(content)),
    }

    key
}

/// Compares two byte slices in constant time.
///
/// The running time depends only on the lengths, not on the content.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
