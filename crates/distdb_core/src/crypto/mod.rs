//! Password-keyed encryption for stores and backup files.
//!
//! Keys are derived from a [`CipherPassword`] and a random per-store (or
//! per-backup) salt with HKDF-SHA256, and used with AES-256-GCM.

mod cipher;
mod password;

pub use cipher::{CryptoManager, EncryptionKey, KeyPurpose, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use password::CipherPassword;

use rand::RngCore;

/// Salt length stored in manifests and backup headers.
pub const SALT_SIZE: usize = 16;

/// Draws a fresh random salt.
#[must_use]
pub fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
