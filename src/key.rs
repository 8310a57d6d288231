//! Caller-supplied keys.
//!
//! A [`Key`] is an opaque byte string, 1..=512 bytes, unique process-wide.
//! The empty key is invalid and rejected at the coordinator boundary.

use std::fmt;

/// Maximum length, in bytes, of a [`Key`].
pub const MAX_KEY_LEN: usize = 512;

/// A caller-supplied key identifying a record.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Key(Box<[u8]>);

impl Key {
    /// Build a key from raw bytes, validating length per spec §3.
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Result<Self, InvalidKey> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(InvalidKey::Empty);
        }
        if bytes.len() > MAX_KEY_LEN {
            return Err(InvalidKey::TooLong(bytes.len()));
        }
        Ok(Key(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Render as UTF-8 when possible, falling back to hex; keys are opaque
        // bytes and are not guaranteed to be text.
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Key({s:?})"),
            Err(_) => {
                write!(f, "Key(0x")?;
                for b in self.0.iter() {
                    write!(f, "{b:02x}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Reason a [`Key`] failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidKey {
    #[error("key must not be empty")]
    Empty,
    #[error("key length {0} exceeds maximum of {MAX_KEY_LEN}")]
    TooLong(usize),
}
