//! Per-layer header framing
//!
//! Each layer starts with a fixed 41-byte header:
//! - marker: 1 byte, 1-based index of the layer in encryption order
//! - nonce: 24 bytes
//! - salt: 16 bytes
//!
//! The outermost layer carries the highest marker, so the first byte of an
//! encrypted file is its total layer count.

use crate::error::{LayercryptError, Result};
use crate::kdf::{NONCE_LEN, Nonce, SALT_LEN, Salt};
use crate::stream::read_full;
use std::io::Read;

/// Total header length in bytes
pub const HEADER_LEN: usize = 1 + NONCE_LEN + SALT_LEN;

/// Maximum number of layers a single file may carry
pub const MAX_LAYERS: u8 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerHeader {
    pub marker: u8,
    pub nonce: Nonce,
    pub salt: Salt,
}

impl LayerHeader {
    pub fn new(marker: u8, nonce: Nonce, salt: Salt) -> Self {
        Self {
            marker,
            nonce,
            salt,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.marker;
        out[1..1 + NONCE_LEN].copy_from_slice(&self.nonce);
        out[1 + NONCE_LEN..].copy_from_slice(&self.salt);
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        let marker = bytes[0];
        if marker == 0 || marker > MAX_LAYERS {
            return Err(LayercryptError::malformed_header(format!(
                "implausible layer marker {} (expected 1..={})",
                marker, MAX_LAYERS
            )));
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[1..1 + NONCE_LEN]);
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[1 + NONCE_LEN..]);

        Ok(Self::new(marker, nonce, salt))
    }

    /// Read exactly one header from the front of `reader`.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; HEADER_LEN];
        let n = read_full(reader, &mut bytes)
            .map_err(|e| e.with_context("failed to read layer header"))?;
        if n < HEADER_LEN {
            return Err(LayercryptError::malformed_header(format!(
                "input likely truncated while reading layer header ({} of {} bytes)",
                n, HEADER_LEN
            )));
        }
        Self::from_bytes(&bytes)
    }
}
