//! Reference-finding backends.
//!
//! Each backend is one strategy for locating usages of a construct in the
//! reference corpus. They share a closed contract:
//!
//! - never mutate files
//! - never raise: internal failures log a warning and yield an empty list
//! - self-references (the construct's own defining file) are returned;
//!   filtering them is the pipeline's business
//!
//! The set of backends is a closed tagged union dispatched by `match`; the
//! hybrid analyzer owns ordering and merging.

mod lint;
mod pattern;
mod semantic;
mod symbol;

pub use lint::LintDriven;
pub use pattern::StructuralPattern;
pub use semantic::DeepSemantic;
pub use symbol::FastSymbol;

use docuse_core::config::BackendKind;
use docuse_core::source::Corpus;
use docuse_core::types::{Construct, Reference};

/// A concrete reference-finding backend.
#[derive(Debug)]
pub enum Backend {
    /// Low latency; covers most static imports and calls.
    FastSymbol(FastSymbol),
    /// Accurate across dynamic patterns and inheritance; higher cost.
    DeepSemantic(DeepSemantic),
    /// Matches call/import syntactic shapes via tree queries.
    StructuralPattern(StructuralPattern),
    /// Very fast first-pass filtering only; low recall.
    LintDriven(LintDriven),
}

impl Backend {
    /// Construct the backend for a configured kind.
    pub fn from_kind(kind: BackendKind) -> Backend {
        match kind {
            BackendKind::FastSymbol => Backend::FastSymbol(FastSymbol::new()),
            BackendKind::DeepSemantic => Backend::DeepSemantic(DeepSemantic::new()),
            BackendKind::StructuralPattern => Backend::StructuralPattern(StructuralPattern::new()),
            BackendKind::LintDriven => Backend::LintDriven(LintDriven::new()),
        }
    }

    /// The configured kind of this backend.
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::FastSymbol(_) => BackendKind::FastSymbol,
            Backend::DeepSemantic(_) => BackendKind::DeepSemantic,
            Backend::StructuralPattern(_) => BackendKind::StructuralPattern,
            Backend::LintDriven(_) => BackendKind::LintDriven,
        }
    }

    /// Find candidate references for one construct across the corpus.
    pub fn find_references(&self, construct: &Construct, corpus: &Corpus) -> Vec<Reference> {
        match self {
            Backend::FastSymbol(backend) => backend.find_references(construct, corpus),
            Backend::DeepSemantic(backend) => backend.find_references(construct, corpus),
            Backend::StructuralPattern(backend) => backend.find_references(construct, corpus),
            Backend::LintDriven(backend) => backend.find_references(construct, corpus),
        }
    }
}

/// File stem of a construct's defining file, used to recognize imports of
/// its module.
pub(crate) fn defining_module_stem(construct: &Construct) -> String {
    construct
        .file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The source line at a 1-based line number, trimmed on the right.
pub(crate) fn context_line(text: &str, line: u32) -> Option<String> {
    docuse_core::text::line_at(text, line).map(|l| l.trim_end().to_string())
}

/// Shared test fixtures for the backend submodules.
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use docuse_core::text::Span;
    use docuse_core::types::ConstructKind;
    use std::path::{Path, PathBuf};

    pub fn corpus(dir: &Path, files: &[(&str, &str)]) -> Corpus {
        let mut paths = Vec::new();
        for (name, content) in files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
            paths.push(path);
        }
        Corpus::load(&paths)
    }

    pub fn construct(kind: ConstructKind, file: &Path, fqn: &str, line: u32) -> Construct {
        Construct {
            name: fqn.rsplit('.').next().unwrap().to_string(),
            kind,
            file: PathBuf::from(file),
            line,
            fully_qualified_name: fqn.to_string(),
            docstring: None,
            span: Span::new(0, 0),
        }
    }

    pub fn lines_for<'a>(refs: &'a [Reference], file_name: &str) -> Vec<u32> {
        refs.iter()
            .filter(|r| r.file.file_name().is_some_and(|n| n == file_name))
            .map(|r| r.line)
            .collect()
    }
}
