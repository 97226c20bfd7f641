//! Crate-wide error type
//!
//! Every module defines its own narrow error enum (`StorageError`,
//! `SearchError`, `LibrarianError`, ...) following the teacher's per-module
//! convention; this module aggregates them behind one `LibraryError` so a
//! caller on the primary path (`Library::add`, `Library::search`, ...) can
//! match on a single machine-readable `ErrorKind` as required by spec §7
//! without needing to know which submodule raised it.

use std::fmt;

/// Machine-readable error classification (spec.md §7).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigValidation,
    EmbeddingFailure,
    ProviderUnavailable,
    ProviderTimeout,
    ProviderHttp,
    MemoryNotInitialized,
    MemoryEmptyText,
    MemoryNoTextGenerator,
    MemorySummarizeTooFew,
    MemoryEntryNotFound,
    MemoryLearningDisabled,
    /// Not one of spec §7's enumerated kinds: added to resolve the
    /// `duplicateBehavior = "error"` open question (spec.md §9) for
    /// callers that configure strict duplicate rejection.
    MemoryDuplicate,
    StorageIo,
    StorageCorruption,
    TopicUnknown,
    TemplateMissingVariable,
    RetryExhausted,
    RetryAborted,
    OperationTimeout,
    CircuitBreakerOpen,
    InvalidPattern,
    LibraryDisposed,
}

impl ErrorKind {
    /// Stable string code, e.g. for logging or wire serialization.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ConfigValidation => "config-validation",
            ErrorKind::EmbeddingFailure => "embedding-failure",
            ErrorKind::ProviderUnavailable => "provider-unavailable",
            ErrorKind::ProviderTimeout => "provider-timeout",
            ErrorKind::ProviderHttp => "provider-http",
            ErrorKind::MemoryNotInitialized => "memory-not-initialized",
            ErrorKind::MemoryEmptyText => "memory-empty-text",
            ErrorKind::MemoryNoTextGenerator => "memory-no-text-generator",
            ErrorKind::MemorySummarizeTooFew => "memory-summarize-too-few",
            ErrorKind::MemoryEntryNotFound => "memory-entry-not-found",
            ErrorKind::MemoryLearningDisabled => "memory-learning-disabled",
            ErrorKind::MemoryDuplicate => "memory-duplicate",
            ErrorKind::StorageIo => "storage-io",
            ErrorKind::StorageCorruption => "storage-corruption",
            ErrorKind::TopicUnknown => "topic-unknown",
            ErrorKind::TemplateMissingVariable => "template-missing-variable",
            ErrorKind::RetryExhausted => "retry-exhausted",
            ErrorKind::RetryAborted => "retry-aborted",
            ErrorKind::OperationTimeout => "operation-timeout",
            ErrorKind::CircuitBreakerOpen => "circuit-breaker-open",
            ErrorKind::InvalidPattern => "invalid-pattern",
            ErrorKind::LibraryDisposed => "library-disposed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Top-level crate error.
///
/// Carries the machine-readable [`ErrorKind`], a human message, and an
/// optional cause chain (spec §7: "every error carries a machine-readable
/// code and an optional cause chain").
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct LibraryError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl LibraryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), cause: None }
    }

    pub fn with_cause(
        kind: ErrorKind,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self { kind, message: message.into(), cause: Some(Box::new(cause)) }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Batch-validation failures (spec §8) carry the offending index.
    pub fn with_batch_index(mut self, index: usize) -> Self {
        self.message = format!("{} (batchIndex={})", self.message, index);
        self
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

macro_rules! from_submodule_error {
    ($from:ty, $kind:expr) => {
        impl From<$from> for LibraryError {
            fn from(e: $from) -> Self {
                LibraryError::with_cause($kind, e.to_string(), e)
            }
        }
    };
}

from_submodule_error!(crate::storage::StorageError, ErrorKind::StorageIo);
from_submodule_error!(crate::resilience::RetryError, ErrorKind::RetryExhausted);
from_submodule_error!(crate::librarian::LibrarianError, ErrorKind::ProviderUnavailable);
from_submodule_error!(crate::library::EmbeddingError, ErrorKind::EmbeddingFailure);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_code_round_trips_through_display() {
        let e = LibraryError::new(ErrorKind::MemoryEmptyText, "text must not be empty");
        assert_eq!(e.kind().code(), "memory-empty-text");
        assert!(format!("{e}").contains("memory-empty-text"));
    }

    #[test]
    fn batch_index_is_appended_to_message() {
        let e = LibraryError::new(ErrorKind::MemoryEmptyText, "empty text").with_batch_index(3);
        assert!(format!("{e}").contains("batchIndex=3"));
    }
}
