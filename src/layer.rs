//! Single-layer encryption/decryption
//!
//! One layer is a header followed by a sequence of sealed chunks:
//!
//! ```text
//! [41 bytes: header][chunk 0][chunk 1]...[final chunk]
//! chunk   = XChaCha20-Poly1305(plaintext <= 32 KiB) || 16-byte tag
//! nonce_i = header.nonce with big-endian i XORed into its last 8 bytes
//! aad_i   = header bytes || final flag (1 byte)
//! ```
//!
//! Every chunk but the last holds exactly `CHUNK_SIZE` plaintext bytes.
//! The last one holds fewer, possibly zero, and is flagged in its AAD, so
//! dropping, reordering or appending chunks fails authentication.

use crate::cancel::CancelToken;
use crate::error::{ErrorCategory, ErrorKind, LayercryptError, Result};
use crate::header::{HEADER_LEN, LayerHeader};
use crate::kdf::{self, NONCE_LEN, Nonce};
use crate::stream::read_full;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use std::io::{Read, Write};
use tracing::trace;

/// Plaintext bytes per sealed chunk
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Poly1305 tag length appended to every chunk
pub const TAG_LEN: usize = 16;

/// On-disk length of every non-final chunk
pub const SEALED_CHUNK_LEN: usize = CHUNK_SIZE + TAG_LEN;

/// What a finished layer pass processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSummary {
    pub marker: u8,
    pub chunks: u64,
    pub plaintext_len: u64,
}

/// Encrypt everything `input` yields as one layer with the given marker,
/// writing header and sealed chunks to `output`.
pub fn encode_layer<R, W>(
    password: &[u8],
    marker: u8,
    input: &mut R,
    output: &mut W,
    cancel: &CancelToken,
) -> Result<LayerSummary>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let salt = kdf::generate_salt()?;
    let nonce = kdf::generate_nonce()?;
    let header = LayerHeader::new(marker, nonce, salt);
    let header_bytes = header.to_bytes();

    let key = kdf::derive_key(password, &header.salt);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

    output.write_all(&header_bytes).map_err(write_error)?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut summary = LayerSummary {
        marker,
        chunks: 0,
        plaintext_len: 0,
    };

    loop {
        cancel.check()?;

        let n = read_full(&mut *input, &mut buf)?;
        let last = n < CHUNK_SIZE;

        let sealed = cipher
            .encrypt(
                &chunk_nonce(&header.nonce, summary.chunks),
                Payload {
                    msg: &buf[..n],
                    aad: &chunk_aad(&header_bytes, last),
                },
            )
            .map_err(|_| {
                LayercryptError::with_kind(
                    ErrorCategory::Internal,
                    ErrorKind::InternalInvariant,
                    "AEAD seal failed",
                )
            })?;
        output.write_all(&sealed).map_err(write_error)?;

        summary.chunks += 1;
        summary.plaintext_len += n as u64;

        if last {
            break;
        }
    }

    output.flush().map_err(write_error)?;
    trace!(
        marker,
        chunks = summary.chunks,
        bytes = summary.plaintext_len,
        "layer sealed"
    );
    Ok(summary)
}

/// Decrypt the body of one layer whose header has already been read from
/// `input`, writing the recovered plaintext to `output`.
///
/// Stops at the first chunk that fails authentication. Whatever was
/// written to `output` before that point is unverified as a whole and
/// must be discarded by the caller.
pub fn decode_layer<R, W>(
    password: &[u8],
    header: &LayerHeader,
    input: &mut R,
    output: &mut W,
    cancel: &CancelToken,
) -> Result<LayerSummary>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let header_bytes = header.to_bytes();
    let key = kdf::derive_key(password, &header.salt);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

    let mut buf = vec![0u8; SEALED_CHUNK_LEN];
    let mut summary = LayerSummary {
        marker: header.marker,
        chunks: 0,
        plaintext_len: 0,
    };

    loop {
        cancel.check()?;

        let n = read_full(&mut *input, &mut buf)?;
        if n < TAG_LEN {
            // Either the stream ended on a full chunk, so the final chunk is
            // missing, or the trailing chunk is too short to hold a tag.
            return Err(LayercryptError::tampered(format!(
                "layer {} truncated after {} chunks",
                header.marker, summary.chunks
            )));
        }
        let last = n < SEALED_CHUNK_LEN;

        let plaintext = cipher
            .decrypt(
                &chunk_nonce(&header.nonce, summary.chunks),
                Payload {
                    msg: &buf[..n],
                    aad: &chunk_aad(&header_bytes, last),
                },
            )
            .map_err(|_| {
                LayercryptError::tampered(format!(
                    "layer {} chunk {} failed authentication: wrong password or corrupted data",
                    header.marker, summary.chunks
                ))
            })?;
        output.write_all(&plaintext).map_err(write_error)?;

        summary.chunks += 1;
        summary.plaintext_len += plaintext.len() as u64;

        if last {
            break;
        }
    }

    output.flush().map_err(write_error)?;
    trace!(
        marker = header.marker,
        chunks = summary.chunks,
        bytes = summary.plaintext_len,
        "layer opened"
    );
    Ok(summary)
}

/// Exact encoded size of one layer over `plaintext_len` bytes.
pub fn encoded_len(plaintext_len: u64) -> u64 {
    let full_chunks = plaintext_len / CHUNK_SIZE as u64;
    HEADER_LEN as u64 + plaintext_len + (full_chunks + 1) * TAG_LEN as u64
}

fn chunk_nonce(base: &Nonce, index: u64) -> XNonce {
    let mut nonce = *base;
    for (b, i) in nonce[NONCE_LEN - 8..].iter_mut().zip(index.to_be_bytes()) {
        *b ^= i;
    }
    *XNonce::from_slice(&nonce)
}

fn chunk_aad(header_bytes: &[u8; HEADER_LEN], last: bool) -> [u8; HEADER_LEN + 1] {
    let mut aad = [0u8; HEADER_LEN + 1];
    aad[..HEADER_LEN].copy_from_slice(header_bytes);
    aad[HEADER_LEN] = u8::from(last);
    aad
}

fn write_error(e: std::io::Error) -> LayercryptError {
    LayercryptError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::Io,
        format!("write failed: {}", e),
        e,
    )
}
