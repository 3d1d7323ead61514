use crate::error::{CoreError, CoreResult};
use crate::types::MAX_PASSWORD_SIZE;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A store or backup password.
///
/// Length 0 means "no password". Lengths above 128 bytes are rejected at
/// construction, so every `CipherPassword` in circulation is valid.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CipherPassword {
    bytes: Vec<u8>,
}

impl CipherPassword {
    /// The empty password.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Wraps `bytes`, failing with `InvalidArgs` past 128 bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> CoreResult<Self> {
        let mut bytes = bytes.into();
        if bytes.len() > MAX_PASSWORD_SIZE {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CoreError::invalid_args(format!(
                "password is {len} bytes, limit is {MAX_PASSWORD_SIZE}"
            )));
        }
        Ok(Self { bytes })
    }

    /// True for the empty password.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Password length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Raw password bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for CipherPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherPassword")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_limits() {
        assert!(CipherPassword::new(Vec::new()).unwrap().is_empty());
        assert_eq!(CipherPassword::new(vec![b'p'; 128]).unwrap().len(), 128);
        let err = CipherPassword::new(vec![b'p'; 129]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgs { .. }));
    }

    #[test]
    fn debug_hides_bytes() {
        let pwd = CipherPassword::new(b"secret".to_vec()).unwrap();
        let shown = format!("{pwd:?}");
        assert!(!shown.contains("secret"));
        assert!(shown.contains("len: 6"));
    }
}
