//! Password-based key derivation and per-layer randomness
//!
//! Every layer gets its own salt, and therefore its own key, so that key
//! material recovered for one layer says nothing about any other layer.

use crate::error::{ErrorCategory, ErrorKind, LayercryptError, Result};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// Length of the XChaCha20-Poly1305 nonce in bytes
pub const NONCE_LEN: usize = 24;

/// PBKDF2-HMAC-SHA256 iteration count
pub const PBKDF2_ROUNDS: u32 = 4096;

pub type Salt = [u8; SALT_LEN];
pub type Nonce = [u8; NONCE_LEN];

/// Symmetric key for one layer. Wiped from memory on drop.
pub type DerivedKey = Zeroizing<[u8; KEY_LEN]>;

/// Derive a 32-byte key from a password and salt using PBKDF2-HMAC-SHA256
pub fn derive_key(password: &[u8], salt: &Salt) -> DerivedKey {
    derive_key_with_rounds(password, salt, PBKDF2_ROUNDS)
}

fn derive_key_with_rounds(password: &[u8], salt: &[u8], rounds: u32) -> DerivedKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password, salt, rounds, key.as_mut_slice());
    key
}

/// Generate a fresh random salt from the operating system's CSPRNG
pub fn generate_salt() -> Result<Salt> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt, "salt")?;
    Ok(salt)
}

/// Generate a fresh random nonce from the operating system's CSPRNG
pub fn generate_nonce() -> Result<Nonce> {
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce, "nonce")?;
    Ok(nonce)
}

// OsRng holds no state and is safe to call from any number of threads.
fn fill_random(buf: &mut [u8], what: &str) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        LayercryptError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::EntropyUnavailable,
            format!("secure random source failed while generating {}", what),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_derive_key_deterministic() {
        let salt = [7u8; SALT_LEN];
        let k1 = derive_key(b"testpassword", &salt);
        let k2 = derive_key(b"testpassword", &salt);
        assert_eq!(*k1, *k2);
    }

    #[test]
    fn test_different_salts_different_keys() {
        let k1 = derive_key(b"testpassword", &[1u8; SALT_LEN]);
        let k2 = derive_key(b"testpassword", &[2u8; SALT_LEN]);
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn test_different_passwords_different_keys() {
        let salt = [3u8; SALT_LEN];
        let k1 = derive_key(b"testpassword", &salt);
        let k2 = derive_key(b"wrongpassword", &salt);
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn test_empty_password_still_derives() {
        let key = derive_key(b"", &[0u8; SALT_LEN]);
        assert_eq!(key.len(), KEY_LEN);
        assert_ne!(*key, [0u8; KEY_LEN]);
    }

    /// Published PBKDF2-HMAC-SHA256 vector: P="password", S="salt",
    /// c=4096, dkLen=32.
    #[test]
    fn test_known_answer_vector() {
        let key = derive_key_with_rounds(b"password", b"salt", PBKDF2_ROUNDS);

        #[rustfmt::skip]
        let expected: [u8; KEY_LEN] = [
            0xc5, 0xe4, 0x78, 0xd5, 0x92, 0x88, 0xc8, 0x41,
            0xaa, 0x53, 0x0d, 0xb6, 0x84, 0x5c, 0x4c, 0x8d,
            0x96, 0x28, 0x93, 0xa0, 0x01, 0xce, 0x4e, 0x11,
            0xa4, 0x96, 0x38, 0x73, 0xaa, 0x98, 0x13, 0x4a,
        ];
        assert_eq!(*key, expected);
    }

    #[test]
    fn test_salts_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generate_salt().unwrap()), "duplicate salt");
        }
    }

    #[test]
    fn test_nonces_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generate_nonce().unwrap()), "duplicate nonce");
        }
    }
}
