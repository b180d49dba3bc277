//! Content-addressed memoization of parse and analysis results.
//!
//! Both caches are wrappers: `ParseCache` around the parser, `AnalysisCache`
//! around the hybrid analyzer (never around individual backends). A cache
//! hit is indistinguishable from a miss followed by a store, modulo log
//! output; with no store configured both degrade to plain computation.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use docuse_core::source::{self, ContentHash, Corpus, SourceFile};
use docuse_core::store::{KvStore, StoreStats};
use docuse_core::types::{Construct, ReferenceSet};

use crate::hybrid::HybridAnalyzer;
use crate::parser;

/// Namespace and version tag for parse entries.
const PARSE_SPACE: &str = "parse-v1";
/// Namespace and version tag for reference entries.
const REF_SPACE: &str = "ref-v1";

// ============================================================================
// Parse Cache
// ============================================================================

/// A file's identity plus its extracted constructs.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub source: SourceFile,
    pub constructs: Vec<Construct>,
}

/// Memoizes construct extraction keyed by content identity.
///
/// Key: `(content_hash, mtime_ns, grammar_version)` under the `parse-v1`
/// namespace. The mtime is redundant safety; the content hash is
/// authoritative.
pub struct ParseCache {
    store: Option<Arc<KvStore>>,
}

impl ParseCache {
    pub fn new(store: Option<Arc<KvStore>>) -> ParseCache {
        ParseCache { store }
    }

    fn key(source: &SourceFile) -> String {
        // The path joins the content identity because the cached constructs
        // embed it (module names derive from the stem); two identical files
        // at different paths must not share an entry.
        format!(
            "{}:{}:{}:{}",
            source.path.display(),
            source.content_hash,
            source.mtime_ns,
            parser::GRAMMAR_VERSION
        )
    }

    /// Read a file and return its constructs, from cache when the content
    /// identity matches.
    pub fn get_or_parse(&self, path: &Path) -> Result<ParsedFile, docuse_core::error::SourceError> {
        let source = source::read(path)?;
        let key = Self::key(&source);

        if let Some(store) = &self.store {
            if let Some(constructs) = store.get::<Vec<Construct>>(PARSE_SPACE, &key, PARSE_SPACE) {
                debug!("parse cache hit for {}", path.display());
                return Ok(ParsedFile { source, constructs });
            }
        }

        let constructs = parser::parse_constructs(path, &source.bytes);
        if let Some(store) = &self.store {
            if let Err(err) = store.put(PARSE_SPACE, &key, PARSE_SPACE, &constructs) {
                warn!("parse cache write failed for {}: {}", path.display(), err);
            }
        }
        Ok(ParsedFile { source, constructs })
    }

    /// Drop every parse entry.
    pub fn clear(&self) -> usize {
        self.store
            .as_ref()
            .and_then(|store| store.clear(PARSE_SPACE).ok())
            .unwrap_or(0)
    }

    /// Entry count and disk usage.
    pub fn stats(&self) -> Option<StoreStats> {
        self.store.as_ref().map(|store| store.stats(PARSE_SPACE))
    }
}

// ============================================================================
// Analysis Cache
// ============================================================================

/// Memoizes per-construct reference sets keyed by construct identity plus
/// the corpus fingerprint, wrapping the hybrid analyzer.
///
/// Key: `(defining-file content hash, kind, fully qualified name, line,
/// corpus fingerprint)` under the `ref-v1` namespace. Any change to any
/// reference file rotates the fingerprint and invalidates every entry at
/// once.
pub struct AnalysisCache {
    analyzer: HybridAnalyzer,
    store: Option<Arc<KvStore>>,
}

impl AnalysisCache {
    pub fn new(analyzer: HybridAnalyzer, store: Option<Arc<KvStore>>) -> AnalysisCache {
        AnalysisCache { analyzer, store }
    }

    fn key(construct: &Construct, file_hash: &ContentHash, corpus: &Corpus) -> String {
        // The defining path rides along with the content hash: backends
        // match imports against the module stem, so identical content under
        // different names can produce different reference sets.
        format!(
            "{}:{}:{}:{}:{}:{}",
            construct.file.display(),
            file_hash,
            construct.kind,
            construct.fully_qualified_name,
            construct.line,
            corpus.fingerprint()
        )
    }

    /// Find references for one construct, memoized.
    pub fn find_references(
        &self,
        construct: &Construct,
        file_hash: &ContentHash,
        corpus: &Corpus,
    ) -> ReferenceSet {
        let key = Self::key(construct, file_hash, corpus);

        if let Some(store) = &self.store {
            if let Some(references) = store.get::<ReferenceSet>(REF_SPACE, &key, REF_SPACE) {
                debug!(
                    "analysis cache hit for {}",
                    construct.fully_qualified_name
                );
                return references;
            }
        }

        let references = self.analyzer.find_references(construct, corpus);
        if let Some(store) = &self.store {
            if let Err(err) = store.put(REF_SPACE, &key, REF_SPACE, &references) {
                warn!(
                    "analysis cache write failed for {}: {}",
                    construct.fully_qualified_name, err
                );
            }
        }
        references
    }

    /// Drop every analysis entry.
    pub fn clear(&self) -> usize {
        self.store
            .as_ref()
            .and_then(|store| store.clear(REF_SPACE).ok())
            .unwrap_or(0)
    }

    /// Entry count and disk usage.
    pub fn stats(&self) -> Option<StoreStats> {
        self.store.as_ref().map(|store| store.stats(REF_SPACE))
    }
}

// ============================================================================
// Tests
// ============================================================================
