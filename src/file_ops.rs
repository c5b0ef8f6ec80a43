//! File encryption/decryption operations
//!
//! This module wraps the layer pipeline with everything a file-level
//! caller needs: output naming, input checks, password handling, the
//! optional removal of originals, and concurrent processing of many files.

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::{ErrorCategory, ErrorKind, LayercryptError, Result};
use crate::passphrase::PassphraseReader;
use crate::pipeline::{self, Direction, PipelineOptions, PipelineReport};
use crate::stream::PathLabeled;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Extension appended to encrypted files
pub const ENCRYPTED_EXTENSION: &str = "enc";

/// Extension appended to decrypted files whose name does not end in `.enc`
pub const DECRYPTED_EXTENSION: &str = "dec";

/// One file to process and where its result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub layers: u8,
    pub output_len: u64,
    /// Whether the original input was removed after commit.
    pub original_removed: bool,
}

/// Per-file results of a batch, in submission order.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<(FileJob, Result<FileOutcome>)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// `<input>.enc`, placed in `output_dir` when one is given.
pub fn encrypted_output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let mut name = file_name(input);
    name.push(".");
    name.push(ENCRYPTED_EXTENSION);
    place(input, output_dir, name)
}

/// `<input>` without its `.enc` extension, or `<input>.dec` if it has none.
pub fn decrypted_output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let name = match input.extension() {
        Some(ext) if ext == ENCRYPTED_EXTENSION && input.file_stem().is_some() => input
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default(),
        _ => {
            let mut name = file_name(input);
            name.push(".");
            name.push(DECRYPTED_EXTENSION);
            name
        }
    };
    place(input, output_dir, name)
}

/// Build jobs for `inputs` using the default output naming.
pub fn plan_jobs(direction: Direction, inputs: &[PathBuf], settings: &Settings) -> Vec<FileJob> {
    let output_dir = settings.output_dir.as_deref();
    inputs
        .iter()
        .map(|input| FileJob {
            input: input.clone(),
            output: match direction {
                Direction::Encrypt => encrypted_output_path(input, output_dir),
                Direction::Decrypt => decrypted_output_path(input, output_dir),
            },
        })
        .collect()
}

/// Encrypt a file with a password
///
/// Reads plaintext from `input_path`, encrypts it with `settings.layers`
/// layers using a password from `passphrase_reader`, and atomically
/// publishes the result at `output_path`.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn encrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
    settings: &Settings,
) -> Result<FileOutcome> {
    settings.validate()?;
    let passphrase = read_passphrase(Direction::Encrypt, passphrase_reader)?;
    let job = FileJob {
        input: input_path.to_path_buf(),
        output: output_path.to_path_buf(),
    };
    process_file(
        Direction::Encrypt,
        &job,
        &passphrase,
        settings,
        &PipelineOptions::default(),
    )
}

/// Decrypt a file with a password
///
/// The number of layers is read from the file itself. Fails with
/// `TamperedOrWrongPassword` or `MalformedHeader` without creating
/// `output_path` when the password is wrong or the file was modified.
pub fn decrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
    settings: &Settings,
) -> Result<FileOutcome> {
    settings.validate()?;
    let passphrase = read_passphrase(Direction::Decrypt, passphrase_reader)?;
    let job = FileJob {
        input: input_path.to_path_buf(),
        output: output_path.to_path_buf(),
    };
    process_file(
        Direction::Decrypt,
        &job,
        &passphrase,
        settings,
        &PipelineOptions::default(),
    )
}

/// Process every job on a pool of `settings.jobs` workers.
///
/// The password is read once, before anything is dispatched. Each file
/// runs its own independent pipeline; a failure only affects that file's
/// entry in the report. Errors returned from this function itself mean
/// nothing was attempted.
pub fn run_batch(
    direction: Direction,
    jobs: &[FileJob],
    passphrase_reader: &mut dyn PassphraseReader,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<BatchReport> {
    settings.validate()?;
    check_overlaps(jobs)?;
    let passphrase = read_passphrase(direction, passphrase_reader)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.jobs)
        .thread_name(|i| format!("layercrypt-worker-{}", i))
        .build()
        .map_err(|e| {
            LayercryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "failed to start worker pool",
                e,
            )
        })?;

    let opts = PipelineOptions {
        cancel: cancel.clone(),
        ..Default::default()
    };

    let outcomes: Vec<(FileJob, Result<FileOutcome>)> = pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                let result = process_file(direction, job, &passphrase, settings, &opts);
                (job.clone(), result)
            })
            .collect()
    });

    let report = BatchReport { outcomes };
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "batch finished"
    );
    Ok(report)
}

fn read_passphrase(
    direction: Direction,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<zeroize::Zeroizing<Vec<u8>>> {
    let passphrase = passphrase_reader.read_passphrase()?;
    if direction == Direction::Encrypt && passphrase.is_empty() {
        return Err(LayercryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::PassphraseRejected,
            "passphrase cannot be empty",
        ));
    }
    Ok(passphrase)
}

fn process_file(
    direction: Direction,
    job: &FileJob,
    passphrase: &[u8],
    settings: &Settings,
    opts: &PipelineOptions,
) -> Result<FileOutcome> {
    check_paths(job)?;

    let file = File::open(&job.input).map_err(|e| LayercryptError::io(&job.input, "open", e))?;
    let mut source = PathLabeled::new(BufReader::new(file), &job.input);

    let report: PipelineReport = match direction {
        Direction::Encrypt => {
            pipeline::layered_encrypt(&mut source, &job.output, passphrase, settings.layers, opts)
        }
        Direction::Decrypt => pipeline::layered_decrypt(&mut source, &job.output, passphrase, opts),
    }
    .map_err(|e| e.with_context(format!("failed to process {}", job.input.display())))?;
    drop(source);

    let original_removed = settings.delete_original && remove_original(&job.input);

    Ok(FileOutcome {
        input: job.input.clone(),
        output: report.output,
        layers: report.layers,
        output_len: report.output_len,
        original_removed,
    })
}

/// Reject a batch in which two jobs would publish to the same path, or one
/// job's output would replace another job's input.
fn check_overlaps(jobs: &[FileJob]) -> Result<()> {
    let inputs: HashSet<PathBuf> = jobs.iter().map(|j| resolve(&j.input)).collect();
    let mut outputs: HashMap<PathBuf, &FileJob> = HashMap::with_capacity(jobs.len());

    for job in jobs {
        let output = resolve(&job.output);
        if output != resolve(&job.input) && inputs.contains(&output) {
            return Err(LayercryptError::new(
                ErrorCategory::User,
                format!(
                    "output {} of {} would replace another input of this batch",
                    job.output.display(),
                    job.input.display()
                ),
            ));
        }
        if let Some(other) = outputs.insert(output, job) {
            return Err(LayercryptError::new(
                ErrorCategory::User,
                format!(
                    "{} and {} would both be written to {}",
                    other.input.display(),
                    job.input.display(),
                    job.output.display()
                ),
            ));
        }
    }
    Ok(())
}

/// Canonical form of `path` for comparisons. Outputs usually do not exist
/// yet, so fall back to the canonical parent joined with the file name.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(p) = fs::canonicalize(path) {
        return p;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

fn check_paths(job: &FileJob) -> Result<()> {
    let meta = fs::metadata(&job.input).map_err(|e| LayercryptError::io(&job.input, "stat", e))?;
    if meta.is_dir() {
        return Err(LayercryptError::new(
            ErrorCategory::User,
            format!(
                "{} is a directory; archive it before encrypting",
                job.input.display()
            ),
        ));
    }

    let same = job.input == job.output
        || matches!(
            (fs::canonicalize(&job.input), fs::canonicalize(&job.output)),
            (Ok(a), Ok(b)) if a == b
        );
    if same {
        return Err(LayercryptError::new(
            ErrorCategory::User,
            format!(
                "refusing to overwrite input {} with its own output",
                job.input.display()
            ),
        ));
    }
    Ok(())
}

/// Removal happens after the output is committed, so a failure here is
/// reported but never undoes the operation.
fn remove_original(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "original file deleted");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to delete original file");
            false
        }
    }
}

fn file_name(path: &Path) -> OsString {
    path.file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("output"))
}

fn place(input: &Path, output_dir: Option<&Path>, name: OsString) -> PathBuf {
    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}
