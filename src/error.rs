use std::error::Error as StdError;
use std::io;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The user provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The operating system's secure random source failed.
    EntropyUnavailable,
    /// Requested layer count is zero or above the supported maximum.
    InvalidLayerCount,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
    /// AEAD authentication failed on some chunk of some layer. Caused by
    /// an incorrect password, tampering, truncation or corruption.
    TamperedOrWrongPassword,
    /// A layer header was truncated or carried an implausible or
    /// out-of-sequence marker.
    MalformedHeader,
    /// The operation was cancelled before it could be committed.
    Cancelled,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Passphrase was obtained but is unusable (empty, or confirmation mismatch).
    PassphraseRejected,
    /// Unexpected state reached within layercrypt logic.
    InternalInvariant,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct LayercryptError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl LayercryptError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// I/O failure on a specific path.
    pub fn io(path: &Path, action: &str, err: io::Error) -> Self {
        let category = if err.kind() == io::ErrorKind::NotFound {
            ErrorCategory::User
        } else {
            ErrorCategory::Internal
        };
        Self::with_kind_and_source(
            category,
            ErrorKind::Io,
            format!("failed to {} {}", action, path.display()),
            err,
        )
    }

    /// Authentication failure. Deliberately does not distinguish between a
    /// wrong password and modified ciphertext.
    pub fn tampered(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::User, ErrorKind::TamperedOrWrongPassword, msg)
    }

    pub fn malformed_header(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::User, ErrorKind::MalformedHeader, msg)
    }

    pub fn cancelled() -> Self {
        Self::with_kind(
            ErrorCategory::User,
            ErrorKind::Cancelled,
            "operation cancelled",
        )
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// True when the input stream cannot be trusted: a wrong password,
    /// tampering, truncation or a malformed header. Callers present all of
    /// these as "wrong password or corrupted file".
    pub fn is_untrusted_input(&self) -> bool {
        matches!(
            self.kind,
            Some(ErrorKind::TamperedOrWrongPassword) | Some(ErrorKind::MalformedHeader)
        )
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, LayercryptError>;
