//! Structural pattern backend: tree queries over call/import shapes.
//!
//! Complements the semantic backend by matching the syntactic shapes a usage
//! can take (calls, method calls, decorators, imports, inheritance) without
//! requiring an import link. Captures are extracted once per file per run
//! and cached inside the backend value.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::warn;
use tree_sitter::{Query, QueryCursor};

use docuse_core::error::ErrorKind;
use docuse_core::source::{Corpus, CorpusFile};
use docuse_core::types::{Construct, ConstructKind, Reference};

use crate::backends::{context_line, defining_module_stem};
use crate::parser;

/// Usage shapes, one query per line of interest.
const QUERY_SOURCE: &str = r#"
(call function: (identifier) @call)
(call function: (attribute attribute: (identifier) @method_call))
(decorator (identifier) @call)
(decorator (attribute attribute: (identifier) @method_call))
(class_definition superclasses: (argument_list (identifier) @base))
(import_statement name: (dotted_name (identifier) @module))
(import_statement name: (aliased_import name: (dotted_name (identifier) @module)))
(import_from_statement module_name: (dotted_name (identifier) @module))
(import_from_statement module_name: (relative_import (dotted_name (identifier) @module)))
(import_from_statement name: (dotted_name (identifier) @imported))
(import_from_statement name: (aliased_import name: (dotted_name (identifier) @imported)))
"#;

fn query() -> Option<&'static Query> {
    static QUERY: OnceLock<Option<Query>> = OnceLock::new();
    QUERY
        .get_or_init(|| match Query::new(&tree_sitter_python::language(), QUERY_SOURCE) {
            Ok(query) => Some(query),
            Err(err) => {
                warn!(kind = %ErrorKind::BackendFailure, "structural query failed to compile: {}", err);
                None
            }
        })
        .as_ref()
}

// ============================================================================
// Capture Index
// ============================================================================

#[derive(Debug)]
struct Capture {
    group: &'static str,
    name: String,
    line: u32,
    column: u32,
}

fn captures_of(text: &str) -> Vec<Capture> {
    let Some(query) = query() else {
        return Vec::new();
    };
    let Some(tree) = parser::parse_text(text) else {
        warn!(kind = %ErrorKind::BackendFailure, "structural-pattern parse produced no tree");
        return Vec::new();
    };

    let names = query.capture_names();
    let mut out = Vec::new();
    let mut cursor = QueryCursor::new();
    for matched in cursor.matches(query, tree.root_node(), text.as_bytes()) {
        for capture in matched.captures {
            let group = match names[capture.index as usize] {
                "call" => "call",
                "method_call" => "method_call",
                "base" => "base",
                "module" => "module",
                "imported" => "imported",
                _ => continue,
            };
            let node = capture.node;
            out.push(Capture {
                group,
                name: text[node.byte_range()].to_string(),
                line: node.start_position().row as u32 + 1,
                column: node.start_position().column as u32 + 1,
            });
        }
    }
    out
}

// ============================================================================
// Backend
// ============================================================================

/// Syntactic shape matcher with a per-run capture cache.
#[derive(Debug, Default)]
pub struct StructuralPattern {
    captures: RwLock<HashMap<PathBuf, Arc<Vec<Capture>>>>,
}

impl StructuralPattern {
    pub fn new() -> StructuralPattern {
        StructuralPattern::default()
    }

    fn captures_for(&self, file: &CorpusFile) -> Arc<Vec<Capture>> {
        if let Some(captures) = self.captures.read().expect("capture lock").get(&file.path) {
            return Arc::clone(captures);
        }
        let built = Arc::new(captures_of(&file.text));
        self.captures
            .write()
            .expect("capture lock")
            .entry(file.path.clone())
            .or_insert(built)
            .clone()
    }

    /// References whose captured shape and identifier match the construct.
    pub fn find_references(&self, construct: &Construct, corpus: &Corpus) -> Vec<Reference> {
        let name = construct.name.as_str();
        let stem = defining_module_stem(construct);

        let mut references = Vec::new();
        for file in corpus.files() {
            for capture in self.captures_for(file).iter() {
                let matched = match construct.kind {
                    ConstructKind::Module => capture.group == "module" && capture.name == stem,
                    ConstructKind::Function => {
                        (capture.group == "call" || capture.group == "imported")
                            && capture.name == name
                    }
                    ConstructKind::Class => {
                        (capture.group == "call"
                            || capture.group == "imported"
                            || capture.group == "base")
                            && capture.name == name
                    }
                    ConstructKind::Method => {
                        capture.group == "method_call" && capture.name == name
                    }
                };
                if matched {
                    references.push(Reference {
                        file: file.path.clone(),
                        line: capture.line,
                        column: Some(capture.column),
                        context_line: context_line(&file.text, capture.line),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testutil::{construct, corpus, lines_for};

    #[test]
    fn calls_and_imports_match_functions() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus(
            dir.path(),
            &[("b.py", "from util import helper\n\nhelper()\nvalue = helper\n")],
        );
        let target = construct(
            ConstructKind::Function,
            &dir.path().join("util.py"),
            "helper",
            1,
        );
        let refs = StructuralPattern::new().find_references(&target, &corpus);
        // The bare-name assignment on line 4 is not a call/import shape.
        assert_eq!(lines_for(&refs, "b.py"), vec![1, 3]);
    }

    #[test]
    fn method_calls_match_methods_only() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus(
            dir.path(),
            &[("b.py", "w.render()\nrender()\n")],
        );
        let method = construct(
            ConstructKind::Method,
            &dir.path().join("widgets.py"),
            "Widget.render",
            3,
        );
        let refs = StructuralPattern::new().find_references(&method, &corpus);
        assert_eq!(lines_for(&refs, "b.py"), vec![1]);
    }

    #[test]
    fn decorators_match_function_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus(
            dir.path(),
            &[("b.py", "@helper\ndef thing():\n    pass\n")],
        );
        let target = construct(
            ConstructKind::Function,
            &dir.path().join("util.py"),
            "helper",
            1,
        );
        let refs = StructuralPattern::new().find_references(&target, &corpus);
        assert_eq!(lines_for(&refs, "b.py"), vec![1]);
    }

    #[test]
    fn inheritance_matches_classes() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus(
            dir.path(),
            &[("b.py", "class Fancy(Widget):\n    pass\n")],
        );
        let target = construct(
            ConstructKind::Class,
            &dir.path().join("widgets.py"),
            "Widget",
            1,
        );
        let refs = StructuralPattern::new().find_references(&target, &corpus);
        assert_eq!(lines_for(&refs, "b.py"), vec![1]);
    }

    #[test]
    fn module_imports_match_the_stem() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = corpus(
            dir.path(),
            &[("b.py", "import util\nfrom util import helper\n")],
        );
        let target = construct(ConstructKind::Module, &dir.path().join("util.py"), "util", 1);
        let refs = StructuralPattern::new().find_references(&target, &corpus);
        assert_eq!(lines_for(&refs, "b.py"), vec![1, 2]);
    }
}
