//! Intermediate stores and atomic publish
//!
//! Every layer pass writes into its own scratch file created next to the
//! final output, so the last one can be renamed into place on the same
//! filesystem. A store is deleted when dropped unless it was published,
//! which means any failure path (error, cancellation, panic unwinding)
//! leaves nothing behind.

use crate::error::{ErrorCategory, ErrorKind, LayercryptError, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const SCRATCH_PREFIX: &str = ".layercrypt-";
const SCRATCH_SUFFIX: &str = ".tmp";

/// Read until `buf` is full or the reader hits EOF. Returns the number of
/// bytes read, which is less than `buf.len()` only at EOF.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(LayercryptError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("read failed: {}", e),
                    e,
                ));
            }
        }
    }
    Ok(filled)
}

/// Reader or writer whose I/O errors name the file they happened on.
///
/// Layer codecs only see `Read`/`Write`, so the path has to travel inside
/// the `io::Error` itself.
#[derive(Debug)]
pub struct PathLabeled<T> {
    inner: T,
    path: PathBuf,
}

impl<T> PathLabeled<T> {
    pub fn new(inner: T, path: &Path) -> Self {
        Self {
            inner,
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn label(&self, e: io::Error) -> io::Error {
        io::Error::new(e.kind(), format!("{}: {}", self.path.display(), e))
    }
}

impl<T: Read> Read for PathLabeled<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| self.label(e))
    }
}

impl<T: Write> Write for PathLabeled<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).map_err(|e| self.label(e))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(|e| self.label(e))
    }
}

/// Scratch storage holding one layer's output until it is consumed by the
/// next layer or published.
#[derive(Debug)]
pub struct IntermediateStore {
    file: NamedTempFile,
}

impl IntermediateStore {
    /// Create an empty store inside `dir`.
    pub fn create_in(dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(SCRATCH_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| LayercryptError::io(dir, "create scratch file in", e))?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Buffered writer appending to the store.
    pub fn writer(&mut self) -> PathLabeled<BufWriter<&mut File>> {
        let path = self.file.path().to_path_buf();
        PathLabeled {
            inner: BufWriter::new(self.file.as_file_mut()),
            path,
        }
    }

    /// Rewind and return a buffered reader over the full contents.
    pub fn reader(&mut self) -> Result<PathLabeled<BufReader<&mut File>>> {
        let path = self.file.path().to_path_buf();
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(0))
            .map_err(|e| LayercryptError::io(&path, "rewind", e))?;
        Ok(PathLabeled {
            inner: BufReader::new(file),
            path,
        })
    }

    pub fn len(&self) -> Result<u64> {
        self.file
            .as_file()
            .metadata()
            .map(|m| m.len())
            .map_err(|e| LayercryptError::io(self.file.path(), "stat", e))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Atomically move the store to `target`.
    ///
    /// Data is flushed and fsync()ed before the rename so that, if the
    /// rename succeeds, `target` always names a complete file. On Unix the
    /// published file is readable and writable by the owner only.
    pub fn publish(mut self, target: &Path) -> Result<PathBuf> {
        let scratch = self.file.path().to_path_buf();
        self.file
            .flush()
            .map_err(|e| LayercryptError::io(&scratch, "flush", e))?;
        self.file
            .as_file()
            .sync_all()
            .map_err(|e| LayercryptError::io(&scratch, "sync", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = self
                .file
                .as_file()
                .metadata()
                .map_err(|e| LayercryptError::io(&scratch, "stat", e))?
                .permissions();
            perms.set_mode(0o600);
            self.file
                .as_file()
                .set_permissions(perms)
                .map_err(|e| LayercryptError::io(&scratch, "set permissions on", e))?;
        }

        self.file.persist(target).map_err(|e| {
            LayercryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to rename to target file {}", target.display()),
                e.error,
            )
        })?;
        Ok(target.to_path_buf())
    }
}

/// Directory in which scratch stores for `output` are created.
pub fn scratch_dir_for(output: &Path) -> PathBuf {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
