use crate::crypto::CipherPassword;
use crate::error::{CoreError, CoreResult};
use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;
/// GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;
/// GCM tag size in bytes.
pub const TAG_SIZE: usize = 16;

const KEY_CHECK_PLAINTEXT: &[u8] = b"distdb-key-check";

/// What a derived key protects. Keys for different purposes never coincide
/// even for the same password and salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Records and WAL entries of a store.
    Store,
    /// The body of a backup file.
    Backup,
}

impl KeyPurpose {
    fn info(self) -> &'static [u8] {
        match self {
            Self::Store => b"distdb-store-key-v1",
            Self::Backup => b"distdb-backup-key-v1",
        }
    }
}

/// A 256-bit key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Derives a key from a password and salt.
    pub fn derive(password: &CipherPassword, salt: &[u8], purpose: KeyPurpose) -> CoreResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(salt), password.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(purpose.info(), &mut bytes)
            .map_err(|_| CoreError::encryption_failed("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// AES-256-GCM sealing with random nonces.
///
/// Sealed output is `nonce || ciphertext || tag`.
pub struct CryptoManager {
    cipher: Aes256Gcm,
}

impl CryptoManager {
    /// Builds a cipher from a key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(key.as_bytes())),
        }
    }

    /// Derives a key and builds a cipher in one step.
    pub fn from_password(
        password: &CipherPassword,
        salt: &[u8],
        purpose: KeyPurpose,
    ) -> CoreResult<Self> {
        let key = EncryptionKey::derive(password, salt, purpose)?;
        Ok(Self::new(&key))
    }

    /// Seals `plaintext`, binding `aad` into the tag.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CoreError::encryption_failed("AES-GCM seal failed"))?;
        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Opens output of [`seal`](Self::seal). Any tampering, a different key or
    /// a different `aad` yields `Corrupted`.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::corrupted("sealed data shorter than nonce and tag"));
        }
        let (nonce, body) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
            .map_err(|_| CoreError::corrupted("AES-GCM authentication failed"))
    }

    /// Produces the canary stored in a manifest so a wrong password is caught
    /// before any record is read.
    pub fn key_check(&self) -> CoreResult<Vec<u8>> {
        self.seal(KEY_CHECK_PLAINTEXT, b"key-check")
    }

    /// Returns true when `check` was produced by this key.
    #[must_use]
    pub fn verify_key_check(&self, check: &[u8]) -> bool {
        matches!(self.open(check, b"key-check"), Ok(plain) if plain == KEY_CHECK_PLAINTEXT)
    }
}

impl std::fmt::Debug for CryptoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoManager")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(password: &[u8], salt: &[u8]) -> CryptoManager {
        let pwd = CipherPassword::new(password.to_vec()).unwrap();
        CryptoManager::from_password(&pwd, salt, KeyPurpose::Store).unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let m = manager(b"pwd", b"salt-salt-salt-1");
        let sealed = m.seal(b"payload", b"hdr").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 7 + TAG_SIZE);
        assert_eq!(m.open(&sealed, b"hdr").unwrap(), b"payload");
    }

    #[test]
    fn wrong_aad_or_key_fails() {
        let m = manager(b"pwd", b"salt-salt-salt-1");
        let sealed = m.seal(b"payload", b"hdr").unwrap();
        assert!(matches!(m.open(&sealed, b"other"), Err(CoreError::Corrupted { .. })));
        let other = manager(b"pwd2", b"salt-salt-salt-1");
        assert!(other.open(&sealed, b"hdr").is_err());
        assert!(m.open(&sealed[..10], b"hdr").is_err());
    }

    #[test]
    fn purposes_yield_distinct_keys() {
        let pwd = CipherPassword::new(b"pwd".to_vec()).unwrap();
        let store = EncryptionKey::derive(&pwd, b"s", KeyPurpose::Store).unwrap();
        let backup = EncryptionKey::derive(&pwd, b"s", KeyPurpose::Backup).unwrap();
        assert_ne!(store.as_bytes(), backup.as_bytes());
    }

    #[test]
    fn key_check_detects_wrong_password() {
        let right = manager(b"right", b"0123456789abcdef");
        let check = right.key_check().unwrap();
        assert!(right.verify_key_check(&check));
        assert!(!manager(b"wrong", b"0123456789abcdef").verify_key_check(&check));
        assert!(!manager(b"right", b"fedcba9876543210").verify_key_check(&check));
    }
}
