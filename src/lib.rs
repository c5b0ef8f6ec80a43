//! Layercrypt - Password-based multi-layer file encryption
//!
//! A file is wrapped in one or more independently keyed
//! XChaCha20-Poly1305 layers. Every layer carries its own salt and nonce,
//! and the password is stretched with PBKDF2-HMAC-SHA256 per layer.

#![forbid(unsafe_code)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod file_ops;
pub mod header;
pub mod kdf;
pub mod layer;
pub mod passphrase;
pub mod pipeline;
pub mod stream;
