//! BLAKE3 content fingerprints and transfer ids.
//!
//! A fingerprint is a pure function of the bytes it covers. Avatar transfers
//! use the fingerprint of the image as their transfer id so the receiver can
//! treat it as a cache key; data transfers usually carry a random id that the
//! receiver remembers to recognize an interrupted transfer when the sender
//! announces it again.

use std::fmt;
use std::io::Read;

use crate::{HASH_LENGTH, TRANSFER_ID_LENGTH};
use crate::error::Result;

/// Fixed-length content digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; HASH_LENGTH]);

impl Fingerprint {
    /// Wrap raw digest bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash a buffer
pub fn hash(data: &[u8]) -> Fingerprint {
    Fingerprint(*blake3::hash(data).as_bytes())
}

/// Hash everything a reader yields
///
/// Produces the same fingerprint as [`hash`] over the concatenated bytes.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<Fingerprint> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Fingerprint(*hasher.finalize().as_bytes()))
}

/// Wire-level transfer identifier (32 bytes)
///
/// Messages between the two peers are correlated by this id, so it must stay
/// the same if the sender re-announces an interrupted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId([u8; TRANSFER_ID_LENGTH]);

impl TransferId {
    /// Wrap raw id bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TRANSFER_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Generate a random transfer id
    pub fn random() -> Result<Self> {
        let mut id = [0u8; TRANSFER_ID_LENGTH];
        getrandom::getrandom(&mut id)
            .map_err(|e| crate::error::TransferError::Io(format!("entropy source: {e}")))?;
        Ok(Self(id))
    }

    /// Raw id bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TRANSFER_ID_LENGTH] {
        &self.0
    }

    /// Shortened hex form used in log lines
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl From<Fingerprint> for TransferId {
    fn from(fingerprint: Fingerprint) -> Self {
        Self(fingerprint.0)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
