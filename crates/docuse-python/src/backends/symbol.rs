//! Fast symbol backend: word-boundary identifier search.
//!
//! The primary backend for large corpora. A compiled word-boundary pattern
//! over each reference file catches imports, calls, and bare name mentions
//! with one scan per line; comment-only lines are skipped. Precision is
//! traded for latency, which the hybrid merge accounts for.

use regex::Regex;
use tracing::warn;

use docuse_core::error::ErrorKind;
use docuse_core::source::Corpus;
use docuse_core::types::{Construct, Reference};

/// Word-boundary identifier scanner.
#[derive(Debug, Default)]
pub struct FastSymbol;

impl FastSymbol {
    pub fn new() -> FastSymbol {
        FastSymbol
    }

    /// One reference per line containing the construct's name as a whole
    /// word.
    pub fn find_references(&self, construct: &Construct, corpus: &Corpus) -> Vec<Reference> {
        let pattern = match Regex::new(&format!(r"\b{}\b", regex::escape(&construct.name))) {
            Ok(pattern) => pattern,
            Err(err) => {
                warn!(
                    kind = %ErrorKind::BackendFailure,
                    "fast-symbol pattern for {:?} failed to compile: {}",
                    construct.name,
                    err
                );
                return Vec::new();
            }
        };

        let mut references = Vec::new();
        for file in corpus.files() {
            for (index, line) in file.text.lines().enumerate() {
                if line.trim_start().starts_with('#') {
                    continue;
                }
                if let Some(found) = pattern.find(line) {
                    references.push(Reference {
                        file: file.path.clone(),
                        line: index as u32 + 1,
                        column: Some(found.start() as u32 + 1),
                        context_line: Some(line.trim_end().to_string()),
                    });
                }
            }
        }
        references
    }
}

// ============================================================================
// Tests
// ============================================================================
