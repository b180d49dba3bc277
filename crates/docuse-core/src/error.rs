//! Error taxonomy for the docuse pipeline.
//!
//! Every failure in the pipeline is classified into one of a small set of
//! kinds. Errors are recovered locally inside the smallest component that can
//! give a sensible default; only `RewriteUnsafe` and `Cancelled` affect the
//! overall exit status.
//!
//! ## Design
//!
//! - **Kinds, not types**: `ErrorKind` is the classification shared across
//!   subsystems and surfaced in logs and summaries.
//! - **Bridging**: each subsystem has its own `thiserror` enum; `kind()`
//!   methods map into the taxonomy.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Kinds
// ============================================================================

/// Classification of every recoverable failure in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A file could not be read or written. The file is skipped.
    SourceIo,
    /// A file could not be parsed enough to emit even a module construct.
    ParseHard,
    /// Recoverable syntax errors; partial constructs are used.
    ParseSoft,
    /// An individual backend errored; treated as an empty result.
    BackendFailure,
    /// Per-construct analysis timeout; the construct gets an empty set.
    AnalysisTimeout,
    /// Rewritten bytes failed the safety gate; the file is rolled back.
    RewriteUnsafe,
    /// A cache entry failed to deserialize; treated as a miss.
    CacheCorrupt,
    /// Pipeline-level cancellation; no writes are emitted.
    Cancelled,
}

impl ErrorKind {
    /// Whether this kind forces a non-zero exit status for the embedding
    /// command. All other kinds are recovered silently apart from logging.
    pub fn affects_exit_status(&self) -> bool {
        matches!(self, ErrorKind::RewriteUnsafe | ErrorKind::Cancelled)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::SourceIo => "source-io",
            ErrorKind::ParseHard => "parse-hard",
            ErrorKind::ParseSoft => "parse-soft",
            ErrorKind::BackendFailure => "backend-failure",
            ErrorKind::AnalysisTimeout => "analysis-timeout",
            ErrorKind::RewriteUnsafe => "rewrite-unsafe",
            ErrorKind::CacheCorrupt => "cache-corrupt",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

// ============================================================================
// Source Store Errors
// ============================================================================

/// Errors from the source store.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Reading a file failed.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing a file failed. The original content is preserved.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File content is not valid UTF-8.
    #[error("{} is not valid UTF-8", path.display())]
    NotUtf8 { path: PathBuf },
}

impl SourceError {
    /// The path this error applies to.
    pub fn path(&self) -> &PathBuf {
        match self {
            SourceError::Read { path, .. }
            | SourceError::Write { path, .. }
            | SourceError::NotUtf8 { path } => path,
        }
    }

    /// Taxonomy classification.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SourceIo
    }
}

// ============================================================================
// Cache Store Errors
// ============================================================================

/// Errors from the persistent key/value store.
///
/// Read-side corruption is not an error: a bad entry is a transparent miss.
/// These variants cover the write path only.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Cache directory could not be created or written.
    #[error("cache store IO at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A value failed to serialize.
    #[error("cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// Taxonomy classification.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::CacheCorrupt
    }
}

// ============================================================================
// Tests
// ============================================================================
