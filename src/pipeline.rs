//! Multi-layer composition and decomposition
//!
//! Encryption applies layers 1..=N in order, each over the previous
//! layer's complete output, so layer N ends up outermost and its header
//! is the first thing in the file. Decryption reads the marker of that
//! first header as the number of layers to peel and then requires every
//! following header to count down by exactly one until layer 1.
//!
//! Each pass writes into its own `IntermediateStore`. The previous store
//! is dropped (and deleted) as soon as the next one is complete, and only
//! the last store is ever published to the output path.

use crate::cancel::CancelToken;
use crate::error::{ErrorCategory, ErrorKind, LayercryptError, Result};
use crate::header::{LayerHeader, MAX_LAYERS};
use crate::layer::{decode_layer, encode_layer};
use crate::stream::{IntermediateStore, scratch_dir_for};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Lifecycle of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Working on the layer with this marker.
    LayerInProgress(u8),
    Committing,
    Done,
    Failed,
}

/// Receives state transitions of a pipeline run, e.g. to drive a progress
/// display. Called on the thread running the pipeline.
pub trait PipelineObserver: Send + Sync {
    fn on_state(&self, _direction: Direction, _state: PipelineState) {}
}

#[derive(Clone, Default)]
pub struct PipelineOptions {
    pub cancel: CancelToken,
    pub observer: Option<Arc<dyn PipelineObserver>>,
    /// Where intermediate stores are created. Defaults to the output's
    /// directory so the final rename stays on one filesystem.
    pub scratch_dir: Option<PathBuf>,
}

impl PipelineOptions {
    fn scratch_dir(&self, output: &Path) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| scratch_dir_for(output))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub layers: u8,
    pub output: PathBuf,
    pub output_len: u64,
}

/// Check a requested layer count against `1..=MAX_LAYERS`.
pub fn validate_layer_count(count: u32) -> Result<u8> {
    match u8::try_from(count) {
        Ok(n) if (1..=MAX_LAYERS).contains(&n) => Ok(n),
        _ => Err(LayercryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidLayerCount,
            format!("layer count {} outside 1..={}", count, MAX_LAYERS),
        )),
    }
}

/// Encrypt `source` with `layer_count` layers and atomically publish the
/// result at `output`.
///
/// Nothing is written to `output` unless every layer succeeds; the source
/// is only read, never modified or removed.
pub fn layered_encrypt<R: Read + ?Sized>(
    source: &mut R,
    output: &Path,
    password: &[u8],
    layer_count: u32,
    opts: &PipelineOptions,
) -> Result<PipelineReport> {
    let total = validate_layer_count(layer_count)?;
    let dir = opts.scratch_dir(output);

    let span = info_span!("layered_encrypt", output = %output.display(), layers = total);
    let _guard = span.enter();

    let mut run = Run::new(Direction::Encrypt, opts);
    encrypt_layers(source, password, total, &dir, opts, &mut run)
        .and_then(|store| run.commit(store, output))
        .map(|output_len| {
            info!(bytes = output_len, "encrypted {} layers", total);
            PipelineReport {
                layers: total,
                output: output.to_path_buf(),
                output_len,
            }
        })
        .map_err(|e| run.fail(e.with_context("encryption failed")))
}

/// Peel every layer of `source` and atomically publish the recovered
/// plaintext at `output`. The layer count is read from the stream.
///
/// Any authentication failure aborts the whole run with
/// `TamperedOrWrongPassword` and leaves `output` untouched.
pub fn layered_decrypt<R: Read + ?Sized>(
    source: &mut R,
    output: &Path,
    password: &[u8],
    opts: &PipelineOptions,
) -> Result<PipelineReport> {
    let dir = opts.scratch_dir(output);

    let span = info_span!("layered_decrypt", output = %output.display());
    let _guard = span.enter();

    let mut run = Run::new(Direction::Decrypt, opts);
    decrypt_layers(source, password, &dir, opts, &mut run)
        .and_then(|(layers, store)| Ok((layers, run.commit(store, output)?)))
        .map(|(layers, output_len)| {
            info!(bytes = output_len, "decrypted {} layers", layers);
            PipelineReport {
                layers,
                output: output.to_path_buf(),
                output_len,
            }
        })
        .map_err(|e| run.fail(e.with_context("decryption failed")))
}

fn encrypt_layers<R: Read + ?Sized>(
    source: &mut R,
    password: &[u8],
    total: u8,
    dir: &Path,
    opts: &PipelineOptions,
    run: &mut Run<'_>,
) -> Result<IntermediateStore> {
    let mut current: Option<IntermediateStore> = None;

    for marker in 1..=total {
        run.enter(PipelineState::LayerInProgress(marker));
        opts.cancel.check()?;

        let mut next = IntermediateStore::create_in(dir)?;
        {
            let mut writer = next.writer();
            let sealed = match current.as_mut() {
                None => encode_layer(password, marker, &mut *source, &mut writer, &opts.cancel),
                Some(prev) => {
                    let mut reader = prev.reader()?;
                    encode_layer(password, marker, &mut reader, &mut writer, &opts.cancel)
                }
            };
            sealed.map_err(|e| e.with_context(format!("layer {} of {}", marker, total)))?;
            writer
                .flush()
                .map_err(|e| LayercryptError::io(writer.path(), "flush", e))?;
        }
        debug!(marker, scratch = %next.path().display(), "layer written");

        // Replacing `current` drops, and thereby deletes, the superseded store.
        current = Some(next);
    }

    current.ok_or_else(|| {
        LayercryptError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "no layers were produced",
        )
    })
}

fn decrypt_layers<R: Read + ?Sized>(
    source: &mut R,
    password: &[u8],
    dir: &Path,
    opts: &PipelineOptions,
    run: &mut Run<'_>,
) -> Result<(u8, IntermediateStore)> {
    let mut current: Option<IntermediateStore> = None;
    let mut expected: Option<u8> = None;
    let mut total = 0;

    loop {
        opts.cancel.check()?;

        let mut next = IntermediateStore::create_in(dir)?;
        let marker = {
            let mut writer = next.writer();
            let marker = match current.as_mut() {
                None => peel(password, &mut *source, &mut writer, expected, opts, run)?,
                Some(prev) => {
                    let mut reader = prev.reader()?;
                    peel(password, &mut reader, &mut writer, expected, opts, run)?
                }
            };
            writer
                .flush()
                .map_err(|e| LayercryptError::io(writer.path(), "flush", e))?;
            marker
        };
        debug!(marker, scratch = %next.path().display(), "layer peeled");

        current = Some(next);
        if expected.is_none() {
            total = marker;
        }
        if marker == 1 {
            break;
        }
        expected = Some(marker - 1);
    }

    match current {
        Some(store) => Ok((total, store)),
        None => Err(LayercryptError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "no layers were peeled",
        )),
    }
}

/// Read one header from `input`, check its marker and decode the layer body.
fn peel<R, W>(
    password: &[u8],
    input: &mut R,
    output: &mut W,
    expected: Option<u8>,
    opts: &PipelineOptions,
    run: &mut Run<'_>,
) -> Result<u8>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let header = LayerHeader::read_from(&mut *input)?;
    if let Some(expected) = expected {
        if header.marker != expected {
            return Err(LayercryptError::malformed_header(format!(
                "layer marker {} out of sequence (expected {})",
                header.marker, expected
            )));
        }
    }

    run.enter(PipelineState::LayerInProgress(header.marker));
    decode_layer(password, &header, input, output, &opts.cancel)
        .map_err(|e| e.with_context(format!("layer {}", header.marker)))?;
    Ok(header.marker)
}

struct Run<'a> {
    direction: Direction,
    state: PipelineState,
    observer: Option<&'a dyn PipelineObserver>,
}

impl<'a> Run<'a> {
    fn new(direction: Direction, opts: &'a PipelineOptions) -> Self {
        Self {
            direction,
            state: PipelineState::Idle,
            observer: opts.observer.as_deref(),
        }
    }

    fn enter(&mut self, next: PipelineState) {
        debug!(direction = ?self.direction, from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
        if let Some(observer) = self.observer {
            observer.on_state(self.direction, next);
        }
    }

    fn commit(&mut self, store: IntermediateStore, output: &Path) -> Result<u64> {
        self.enter(PipelineState::Committing);
        let len = store.len()?;
        store.publish(output)?;
        self.enter(PipelineState::Done);
        Ok(len)
    }

    fn fail(&mut self, err: LayercryptError) -> LayercryptError {
        self.enter(PipelineState::Failed);
        warn!(direction = ?self.direction, error = %err, kind = ?err.kind, "pipeline failed");
        err
    }
}
