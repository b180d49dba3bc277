//! Deep semantic backend: import-aware reference resolution.
//!
//! Parses each reference file once per run and extracts an occurrence index
//! (imports, calls, attribute accesses, base classes). A construct only
//! matches in files that actually import its name, its class, or its
//! defining module, which keeps common names from flooding the results;
//! method lookups additionally match attribute accesses, covering dynamic
//! receiver patterns the symbol scan cannot rank.
//!
//! The index lives inside the backend value and is released with it at
//! pipeline end; there is no global project state.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::warn;
use tree_sitter::Node;

use docuse_core::error::ErrorKind;
use docuse_core::source::{Corpus, CorpusFile};
use docuse_core::types::{Construct, ConstructKind, Reference};

use crate::backends::{context_line, defining_module_stem};
use crate::parser;

// ============================================================================
// Occurrence Index
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Import,
    Call,
    Attribute,
    Base,
}

#[derive(Debug)]
struct Occurrence {
    name: String,
    role: Role,
    line: u32,
    column: u32,
}

#[derive(Debug, Default)]
struct FileIndex {
    /// Names bound or mentioned by import statements.
    imported: HashSet<String>,
    occurrences: Vec<Occurrence>,
}

fn record(index: &mut FileIndex, node: Node<'_>, text: &str, role: Role) {
    let name = text[node.byte_range()].to_string();
    if role == Role::Import {
        index.imported.insert(name.clone());
    }
    index.occurrences.push(Occurrence {
        name,
        role,
        line: node.start_position().row as u32 + 1,
        column: node.start_position().column as u32 + 1,
    });
}

fn record_dotted(index: &mut FileIndex, node: Node<'_>, text: &str) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "identifier" {
            record(index, child, text, Role::Import);
        } else if child.kind() == "dotted_name" {
            record_dotted(index, child, text);
        }
    }
    if node.kind() == "identifier" {
        record(index, node, text, Role::Import);
    }
}

fn index_imports(index: &mut FileIndex, node: Node<'_>, text: &str) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "dotted_name" | "relative_import" => record_dotted(index, child, text),
            "aliased_import" => {
                if let Some(name) = child.child_by_field_name("name") {
                    record_dotted(index, name, text);
                }
            }
            _ => {}
        }
    }
}

fn walk(index: &mut FileIndex, node: Node<'_>, text: &str) {
    match node.kind() {
        "import_statement" | "import_from_statement" => {
            index_imports(index, node, text);
            return;
        }
        "call" => {
            if let Some(function) = node.child_by_field_name("function") {
                match function.kind() {
                    "identifier" => record(index, function, text, Role::Call),
                    "attribute" => {
                        if let Some(attr) = function.child_by_field_name("attribute") {
                            record(index, attr, text, Role::Call);
                        }
                    }
                    _ => {}
                }
            }
        }
        "attribute" => {
            // The function part of a call was already recorded as a call.
            let is_call_function = node.parent().is_some_and(|parent| {
                parent.kind() == "call"
                    && parent
                        .child_by_field_name("function")
                        .is_some_and(|f| f.id() == node.id())
            });
            if !is_call_function {
                if let Some(attr) = node.child_by_field_name("attribute") {
                    record(index, attr, text, Role::Attribute);
                }
            }
        }
        "class_definition" => {
            if let Some(superclasses) = node.child_by_field_name("superclasses") {
                let mut cursor = superclasses.walk();
                for base in superclasses.named_children(&mut cursor) {
                    if base.kind() == "identifier" {
                        record(index, base, text, Role::Base);
                    }
                }
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        walk(index, child, text);
    }
}

fn build_index(text: &str) -> FileIndex {
    let mut index = FileIndex::default();
    match parser::parse_text(text) {
        Some(tree) => walk(&mut index, tree.root_node(), text),
        None => warn!(kind = %ErrorKind::BackendFailure, "deep-semantic parse produced no tree"),
    }
    index
}

// ============================================================================
// Backend
// ============================================================================

/// Import-aware semantic matcher with a per-run occurrence index.
#[derive(Debug, Default)]
pub struct DeepSemantic {
    index: RwLock<HashMap<PathBuf, Arc<FileIndex>>>,
}

impl DeepSemantic {
    pub fn new() -> DeepSemantic {
        DeepSemantic::default()
    }

    fn index_for(&self, file: &CorpusFile) -> Arc<FileIndex> {
        if let Some(index) = self.index.read().expect("index lock").get(&file.path) {
            return Arc::clone(index);
        }
        let built = Arc::new(build_index(&file.text));
        self.index
            .write()
            .expect("index lock")
            .entry(file.path.clone())
            .or_insert(built)
            .clone()
    }

    /// References matching the construct's kind-specific usage shapes in
    /// files linked to it by imports.
    pub fn find_references(&self, construct: &Construct, corpus: &Corpus) -> Vec<Reference> {
        let name = construct.name.as_str();
        let stem = defining_module_stem(construct);
        let class = construct.fully_qualified_name.split('.').next().unwrap_or(name);

        let mut references = Vec::new();
        for file in corpus.files() {
            let index = self.index_for(file);
            let is_self = file.path == construct.file;

            let linked = match construct.kind {
                ConstructKind::Module => true,
                ConstructKind::Method => {
                    is_self || index.imported.contains(class) || index.imported.contains(&stem)
                }
                _ => is_self || index.imported.contains(name) || index.imported.contains(&stem),
            };
            if !linked {
                continue;
            }

            for occurrence in &index.occurrences {
                let matched = match construct.kind {
                    ConstructKind::Module => {
                        occurrence.role == Role::Import && occurrence.name == stem
                    }
                    ConstructKind::Function => {
                        occurrence.name == name
                            && matches!(occurrence.role, Role::Import | Role::Call | Role::Attribute)
                    }
                    ConstructKind::Class => {
                        occurrence.name == name
                            && matches!(
                                occurrence.role,
                                Role::Import | Role::Call | Role::Base | Role::Attribute
                            )
                    }
                    ConstructKind::Method => {
                        occurrence.name == name
                            && matches!(occurrence.role, Role::Call | Role::Attribute)
                    }
                };
                if matched {
                    references.push(Reference {
                        file: file.path.clone(),
                        line: occurrence.line,
                        column: Some(occurrence.column),
                        context_line: context_line(&file.text, occurrence.line),
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
