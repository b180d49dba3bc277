//! Source store: file reading with content identity, atomic writes, and the
//! reference corpus.
//!
//! Reads report a SHA-256 content hash and the modification time in
//! nanoseconds; both feed the cache keys. Writes go through a sibling
//! temporary file and an atomic rename, so no partial write is ever
//! observable on rename-capable filesystems.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::SourceError;

// ============================================================================
// Content Hash
// ============================================================================

/// SHA-256 content hash, hex-encoded for serialization and key building.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Compute the hash of the given bytes.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex::encode(hasher.finalize()))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Source Files
// ============================================================================

/// A file read from disk together with its content identity.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// The path the file was read from.
    pub path: PathBuf,
    /// Raw file bytes.
    pub bytes: Vec<u8>,
    /// SHA-256 of the bytes.
    pub content_hash: ContentHash,
    /// Modification time in nanoseconds since the epoch (0 if unavailable).
    pub mtime_ns: u128,
}

/// Read a file and compute its content identity.
pub fn read(path: &Path) -> Result<SourceFile, SourceError> {
    let bytes = fs::read(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mtime_ns = fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let content_hash = ContentHash::compute(&bytes);
    Ok(SourceFile {
        path: path.to_path_buf(),
        bytes,
        content_hash,
        mtime_ns,
    })
}

/// Write file content atomically: a sibling temporary file is written and
/// renamed over the target. On failure the original file is preserved.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SourceError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let write_err = |source| SourceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".docuse-")
        .tempfile_in(dir)
        .map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Write a `.bak` sibling holding the original bytes. Returns the backup
/// path.
pub fn write_backup(path: &Path, bytes: &[u8]) -> Result<PathBuf, SourceError> {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    let backup = PathBuf::from(backup);
    fs::write(&backup, bytes).map_err(|source| SourceError::Write {
        path: backup.clone(),
        source,
    })?;
    Ok(backup)
}

// ============================================================================
// Path Normalization
// ============================================================================

/// A path rendered relative to `root`, with forward slashes.
///
/// Falls back to the path itself (forward-slashed) when it is not under the
/// root.
pub fn relative_posix(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut out = String::new();
    for component in relative.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}

// ============================================================================
// Corpus
// ============================================================================

/// One reference file held in memory for the duration of a run.
#[derive(Debug, Clone)]
pub struct CorpusFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Decoded text (lossy for the rare non-UTF-8 reference file).
    pub text: String,
    /// Content hash of the raw bytes.
    pub content_hash: ContentHash,
    /// Modification time in nanoseconds.
    pub mtime_ns: u128,
}

/// The loaded reference file set plus its fingerprint.
///
/// The fingerprint hashes the path-sorted multiset of
/// `(path, content_hash, mtime_ns)`, so it is independent of input order and
/// changes whenever any reference file is added, removed, or modified. It is
/// computed once per pipeline run and keys the analysis cache.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    files: Vec<CorpusFile>,
    fingerprint: String,
}

impl Corpus {
    /// Load the given reference files. Unreadable files are skipped with a
    /// warning; duplicates are read once.
    pub fn load(paths: &[PathBuf]) -> Corpus {
        let mut files: Vec<CorpusFile> = Vec::new();
        let mut sorted: Vec<&PathBuf> = paths.iter().collect();
        sorted.sort();
        sorted.dedup();

        for path in sorted {
            match read(path) {
                Ok(source) => {
                    let text = String::from_utf8_lossy(&source.bytes).into_owned();
                    files.push(CorpusFile {
                        path: source.path,
                        text,
                        content_hash: source.content_hash,
                        mtime_ns: source.mtime_ns,
                    });
                }
                Err(err) => {
                    warn!(kind = %err.kind(), "skipping reference file: {}", err);
                }
            }
        }

        let fingerprint = Self::fingerprint_of(&files);
        Corpus { files, fingerprint }
    }

    fn fingerprint_of(files: &[CorpusFile]) -> String {
        let mut hasher = Sha256::new();
        for file in files {
            hasher.update(file.path.to_string_lossy().as_bytes());
            hasher.update([0]);
            hasher.update(file.content_hash.0.as_bytes());
            hasher.update([0]);
            hasher.update(file.mtime_ns.to_le_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    /// The loaded files, sorted by path.
    pub fn files(&self) -> &[CorpusFile] {
        &self.files
    }

    /// The corpus fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod content_hash_tests {
        use super::*;

        #[test]
        fn hash_is_hex_sha256() {
            let hash = ContentHash::compute(b"hello");
            assert_eq!(hash.0.len(), 64);
            assert!(hash.0.chars().all(|c| c.is_ascii_hexdigit()));
        }

        #[test]
        fn hash_depends_on_content() {
            assert_ne!(ContentHash::compute(b"a"), ContentHash::compute(b"b"));
            assert_eq!(ContentHash::compute(b"a"), ContentHash::compute(b"a"));
        }
    }

    mod io_tests {
        use super::*;

        #[test]
        fn read_reports_identity() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("a.py");
            fs::write(&path, b"x = 1\n").unwrap();

            let source = read(&path).unwrap();
            assert_eq!(source.bytes, b"x = 1\n");
            assert_eq!(source.content_hash, ContentHash::compute(b"x = 1\n"));
            assert!(source.mtime_ns > 0);
        }

        #[test]
        fn read_missing_file_is_source_error() {
            let dir = tempfile::tempdir().unwrap();
            let err = read(&dir.path().join("missing.py")).unwrap_err();
            assert!(err.to_string().contains("missing.py"));
        }

        #[test]
        fn write_atomic_replaces_content() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("a.py");
            fs::write(&path, b"old").unwrap();

            write_atomic(&path, b"new contents\n").unwrap();
            assert_eq!(fs::read(&path).unwrap(), b"new contents\n");
            // No stray temporary files left behind.
            let leftovers: Vec<_> = fs::read_dir(dir.path())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name() != "a.py")
                .collect();
            assert!(leftovers.is_empty());
        }

        #[test]
        fn write_backup_creates_bak_sibling() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("a.py");
            let backup = write_backup(&path, b"original\n").unwrap();
            assert_eq!(backup, dir.path().join("a.py.bak"));
            assert_eq!(fs::read(&backup).unwrap(), b"original\n");
        }
    }

    mod path_tests {
        use super::*;

        #[test]
        fn relative_posix_uses_forward_slashes() {
            let root = Path::new("/p");
            assert_eq!(relative_posix(Path::new("/p/src/util.py"), root), "src/util.py");
            assert_eq!(relative_posix(Path::new("/p/a.py"), root), "a.py");
        }

        #[test]
        fn relative_posix_outside_root_keeps_path() {
            let out = relative_posix(Path::new("/elsewhere/a.py"), Path::new("/p"));
            assert!(out.ends_with("elsewhere/a.py"));
        }
    }

    mod corpus_tests {
        use super::*;

        fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, content).unwrap();
            path
        }

        #[test]
        fn fingerprint_is_order_independent() {
            let dir = tempfile::tempdir().unwrap();
            let a = write(dir.path(), "a.py", "import b\n");
            let b = write(dir.path(), "b.py", "x = 1\n");

            let forward = Corpus::load(&[a.clone(), b.clone()]);
            let reverse = Corpus::load(&[b, a]);
            assert_eq!(forward.fingerprint(), reverse.fingerprint());
        }

        #[test]
        fn fingerprint_changes_with_content() {
            let dir = tempfile::tempdir().unwrap();
            let a = write(dir.path(), "a.py", "x = 1\n");
            let before = Corpus::load(&[a.clone()]).fingerprint().to_string();

            fs::write(&a, "x = 2\n").unwrap();
            let after = Corpus::load(&[a]).fingerprint().to_string();
            assert_ne!(before, after);
        }

        #[test]
        fn unreadable_files_are_skipped() {
            let dir = tempfile::tempdir().unwrap();
            let a = write(dir.path(), "a.py", "x = 1\n");
            let corpus = Corpus::load(&[a, dir.path().join("gone.py")]);
            assert_eq!(corpus.files().len(), 1);
        }

        #[test]
        fn duplicate_paths_are_loaded_once() {
            let dir = tempfile::tempdir().unwrap();
            let a = write(dir.path(), "a.py", "x = 1\n");
            let corpus = Corpus::load(&[a.clone(), a]);
            assert_eq!(corpus.files().len(), 1);
        }
    }
}
