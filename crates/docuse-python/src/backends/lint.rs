//! Lint-driven backend: containment pruning.
//!
//! The cheapest possible pass: a file is a candidate iff it contains the
//! construct's name as a substring anywhere. At most one coarse reference
//! per file is reported, pointing at the first occurrence. Recall is low by
//! design; tiers use this to prune before heavier backends run.

use docuse_core::source::Corpus;
use docuse_core::text::byte_offset_to_position;
use docuse_core::types::{Construct, Reference};

/// Substring containment scanner.
#[derive(Debug, Default)]
pub struct LintDriven;

impl LintDriven {
    pub fn new() -> LintDriven {
        LintDriven
    }

    /// At most one reference per file containing the name.
    pub fn find_references(&self, construct: &Construct, corpus: &Corpus) -> Vec<Reference> {
        if construct.name.is_empty() {
            return Vec::new();
        }
        let mut references = Vec::new();
        for file in corpus.files() {
            if let Some(position) = file.text.find(&construct.name) {
                let (line, _) = byte_offset_to_position(file.text.as_bytes(), position);
                references.push(Reference::new(file.path.clone(), line));
            }
        }
        references
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testutil::{construct, corpus};
    use docuse_core::types::ConstructKind;

    #[test]
    fn one_coarse_reference_per_containing_file() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus(
            dir.path(),
            &[
                ("uses.py", "x = 1\nhelper()\nhelper()\n"),
                ("clean.py", "nothing here\n"),
            ],
        );
        let target = construct(
            ConstructKind::Function,
            &dir.path().join("util.py"),
            "helper",
            1,
        );
        let refs = LintDriven::new().find_references(&target, &corpus);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].line, 2);
        assert!(refs[0].column.is_none());
    }

    #[test]
    fn substring_containment_is_deliberately_coarse() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus(dir.path(), &[("b.py", "helpers = 1\n")]);
        let target = construct(
            ConstructKind::Function,
            &dir.path().join("util.py"),
            "helper",
            1,
        );
        // Prune-only semantics: a superstring still counts as containment.
        let refs = LintDriven::new().find_references(&target, &corpus);
        assert_eq!(refs.len(), 1);
    }
}
