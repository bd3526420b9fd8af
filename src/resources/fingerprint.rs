//! Configuration fingerprint
//!
//! The fingerprint annotation changes whenever the content of any injected
//! sidecar configuration changes, which rolls the pods. It only has to be
//! deterministic, so the SHA-256 digest is truncated to 32 bits.

use std::fmt;

use sha2::{Digest, Sha256};

/// Incremental fingerprint over configuration bytes
#[derive(Clone, Default)]
pub struct ConfigFingerprint {
    hasher: Sha256,
}

impl ConfigFingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Full digest of the bytes written so far
    pub fn digest(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.hasher.clone().finalize());
        out
    }

    /// Digest truncated to its first four bytes, big-endian
    pub fn sum32(&self) -> u32 {
        let digest = self.digest();
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    pub fn annotation_value(&self) -> String {
        self.sum32().to_string()
    }
}

impl fmt::Debug for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConfigFingerprint")
            .field(&self.sum32())
            .finish()
    }
}
