//! Construct extraction from Python source via tree-sitter.
//!
//! The grammar is error-recovering: a file with syntax errors still yields
//! whatever constructs can be identified, and every file yields at least its
//! `Module` construct. Nothing here ever raises up the stack; hard failures
//! degrade to a module-only result with a warning.
//!
//! Line numbers are 1-based; byte offsets index the BOM-stripped file bytes.

use std::path::Path;

use tracing::{debug, warn};
use tree_sitter::{Node, Parser, Tree};

use docuse_core::error::ErrorKind;
use docuse_core::text::{leading_whitespace, line_start_offset, split_bom, Span};
use docuse_core::types::{Construct, ConstructKind, DocstringLiteral};

use crate::docstring;

/// Cache key component: bump when the grammar or extraction rules change.
pub const GRAMMAR_VERSION: &str = "tree-sitter-python-0.21";

// ============================================================================
// Parser Construction
// ============================================================================

/// A parser configured for the Python grammar.
pub fn new_parser() -> Parser {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::language())
        .expect("python grammar is compatible with the linked tree-sitter");
    parser
}

/// Parse text to a concrete syntax tree.
pub fn parse_text(text: &str) -> Option<Tree> {
    new_parser().parse(text, None)
}

// ============================================================================
// Definition Sites
// ============================================================================

/// Where a new docstring statement may be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InsertPoint {
    /// Byte offset of the start of the line holding the first statement.
    pub offset: usize,
    /// Indentation for the inserted statement.
    pub indent: String,
}

/// One `def`/`class` found in a file, with everything the rewriter needs.
#[derive(Debug, Clone)]
pub(crate) struct DefSite {
    pub kind: ConstructKind,
    pub name: String,
    pub fqn: String,
    pub line: u32,
    pub span: Span,
    /// Byte range of the docstring string literal, if present.
    pub doc_span: Option<Span>,
    /// Insertion point for a new docstring; `None` when the body shares a
    /// line with the header (one-liners are left alone).
    pub insert: Option<InsertPoint>,
}

/// All targeting information for one file.
#[derive(Debug, Clone, Default)]
pub(crate) struct FileSites {
    pub defs: Vec<DefSite>,
    pub module_doc: Option<Span>,
}

fn first_statement<'t>(body: Node<'t>) -> Option<Node<'t>> {
    let mut cursor = body.walk();
    let found = body
        .named_children(&mut cursor)
        .find(|child| child.kind() != "comment");
    found
}

fn docstring_of(body: Node<'_>) -> Option<Span> {
    let stmt = first_statement(body)?;
    if stmt.kind() != "expression_statement" || stmt.named_child_count() != 1 {
        return None;
    }
    let expr = stmt.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    Some(Span::new(expr.start_byte(), expr.end_byte()))
}

/// Insertion point before the first statement of a body. `None` when the
/// statement shares its line with anything else (a one-liner body).
fn insert_point(body: Node<'_>, text: &str) -> Option<InsertPoint> {
    let stmt = first_statement(body)?;
    let start = stmt.start_byte();
    let line_start = line_start_offset(text.as_bytes(), start);
    let lead = &text[line_start..start];
    if !lead.chars().all(|c| c == ' ' || c == '\t') {
        return None;
    }
    Some(InsertPoint {
        offset: line_start,
        indent: lead.to_string(),
    })
}

fn walk_defs(node: Node<'_>, text: &str, scopes: &mut Vec<(String, bool)>, out: &mut Vec<DefSite>) {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        let is_class = match child.kind() {
            "function_definition" => false,
            "class_definition" => true,
            _ => {
                walk_defs(child, text, scopes, out);
                continue;
            }
        };

        let Some(name_node) = child.child_by_field_name("name") else {
            // Error recovery left a headless definition; skip it but keep
            // scanning its body for well-formed nested defs.
            walk_defs(child, text, scopes, out);
            continue;
        };
        let name = text[name_node.byte_range()].to_string();
        let kind = if is_class {
            ConstructKind::Class
        } else if scopes.last().is_some_and(|(_, class)| *class) {
            ConstructKind::Method
        } else {
            ConstructKind::Function
        };
        let fqn = scopes
            .iter()
            .map(|(scope, _)| scope.as_str())
            .chain(std::iter::once(name.as_str()))
            .collect::<Vec<_>>()
            .join(".");

        let body = child.child_by_field_name("body");
        out.push(DefSite {
            kind,
            name: name.clone(),
            fqn,
            line: child.start_position().row as u32 + 1,
            span: Span::new(child.start_byte(), child.end_byte()),
            doc_span: body.and_then(docstring_of),
            insert: body.and_then(|b| insert_point(b, text)),
        });

        scopes.push((name, is_class));
        walk_defs(child, text, scopes, out);
        scopes.pop();
    }
}

/// Collect every definition site plus module-level targeting info.
pub(crate) fn collect_sites(tree: &Tree, text: &str) -> FileSites {
    let root = tree.root_node();
    let mut sites = FileSites::default();
    if root.kind() != "module" {
        return sites;
    }

    sites.module_doc = docstring_of(root);

    let mut scopes = Vec::new();
    walk_defs(root, text, &mut scopes, &mut sites.defs);
    sites
}

// ============================================================================
// Construct Extraction
// ============================================================================

fn literal_at(text: &str, span: Span) -> Option<DocstringLiteral> {
    let raw = text.get(span.start..span.end)?;
    let literal = docstring::split_literal(raw)?;
    let line_start = line_start_offset(text.as_bytes(), span.start);
    let indent = leading_whitespace(&text[line_start..span.start.min(text.len())]).to_string();
    Some(DocstringLiteral {
        text: docstring::normalize(literal.body),
        quote: literal.quote,
        raw: literal.raw,
        indent,
        span,
    })
}

fn module_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string())
}

fn module_only(path: &Path) -> Vec<Construct> {
    let stem = module_stem(path);
    vec![Construct {
        name: stem.clone(),
        kind: ConstructKind::Module,
        file: path.to_path_buf(),
        line: 1,
        fully_qualified_name: stem,
        docstring: None,
        span: Span::new(0, 0),
    }]
}

/// Parse one file's bytes and return all constructs in source order, the
/// module construct first. Never fails: unrecoverable input degrades to the
/// bare module construct with a warning.
pub fn parse_constructs(path: &Path, bytes: &[u8]) -> Vec<Construct> {
    let (_bom, stripped) = split_bom(bytes);
    let Ok(text) = std::str::from_utf8(stripped) else {
        warn!(kind = %ErrorKind::ParseHard, "{} is not valid UTF-8; emitting module construct only", path.display());
        return module_only(path);
    };

    let Some(tree) = parse_text(text) else {
        warn!(kind = %ErrorKind::ParseHard, "parser produced no tree for {}", path.display());
        return module_only(path);
    };
    if tree.root_node().kind() != "module" {
        warn!(kind = %ErrorKind::ParseHard, "no top-level statements recoverable in {}", path.display());
        return module_only(path);
    }
    if tree.root_node().has_error() {
        warn!(kind = %ErrorKind::ParseSoft, "syntax errors in {}; continuing with partial parse", path.display());
    }

    let sites = collect_sites(&tree, text);
    let stem = module_stem(path);
    let mut constructs = vec![Construct {
        name: stem.clone(),
        kind: ConstructKind::Module,
        file: path.to_path_buf(),
        line: 1,
        fully_qualified_name: stem,
        docstring: sites.module_doc.and_then(|span| literal_at(text, span)),
        span: Span::new(0, text.len()),
    }];

    for site in sites.defs {
        constructs.push(Construct {
            name: site.name,
            kind: site.kind,
            file: path.to_path_buf(),
            line: site.line,
            fully_qualified_name: site.fqn,
            docstring: site.doc_span.and_then(|span| literal_at(text, span)),
            span: site.span,
        });
    }

    debug!("found {} constructs in {}", constructs.len(), path.display());
    constructs
}

// ============================================================================
// Statistics
// ============================================================================

/// Parsing statistics for a construct list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ParseStats {
    pub total: usize,
    pub modules: usize,
    pub classes: usize,
    pub functions: usize,
    pub methods: usize,
    pub with_docstrings: usize,
    pub without_docstrings: usize,
}

/// Tally construct counts by kind and docstring presence.
pub fn parse_stats(constructs: &[Construct]) -> ParseStats {
    let mut stats = ParseStats {
        total: constructs.len(),
        ..ParseStats::default()
    };
    for construct in constructs {
        match construct.kind {
            ConstructKind::Module => stats.modules += 1,
            ConstructKind::Class => stats.classes += 1,
            ConstructKind::Function => stats.functions += 1,
            ConstructKind::Method => stats.methods += 1,
        }
        if construct.docstring.is_some() {
            stats.with_docstrings += 1;
        } else {
            stats.without_docstrings += 1;
        }
    }
    stats
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use docuse_core::types::QuoteKind;
    use std::path::PathBuf;

    fn parse(source: &str) -> Vec<Construct> {
        parse_constructs(&PathBuf::from("/p/sample.py"), source.as_bytes())
    }

    fn find<'a>(constructs: &'a [Construct], fqn: &str) -> &'a Construct {
        constructs
            .iter()
            .find(|c| c.fully_qualified_name == fqn)
            .unwrap_or_else(|| panic!("no construct named {}", fqn))
    }

    mod extraction {
        use super::*;

        #[test]
        fn empty_file_yields_only_module() {
            let constructs = parse("");
            assert_eq!(constructs.len(), 1);
            assert_eq!(constructs[0].kind, ConstructKind::Module);
            assert_eq!(constructs[0].name, "sample");
            assert_eq!(constructs[0].line, 1);
            assert!(constructs[0].docstring.is_none());
        }

        #[test]
        fn module_construct_comes_first_with_stem_name() {
            let constructs = parse("def f():\n    pass\n");
            assert_eq!(constructs[0].kind, ConstructKind::Module);
            assert_eq!(constructs[0].fully_qualified_name, "sample");
            assert_eq!(constructs[1].name, "f");
        }

        #[test]
        fn functions_classes_and_methods_are_classified() {
            let source = "\
def top():
    pass

class Widget:
    def render(self):
        pass

    def _hidden(self):
        pass
";
            let constructs = parse(source);
            assert_eq!(find(&constructs, "top").kind, ConstructKind::Function);
            assert_eq!(find(&constructs, "Widget").kind, ConstructKind::Class);
            assert_eq!(find(&constructs, "Widget.render").kind, ConstructKind::Method);
            assert_eq!(find(&constructs, "Widget._hidden").kind, ConstructKind::Method);
        }

        #[test]
        fn nested_function_in_method_is_function() {
            let source = "\
class Widget:
    def render(self):
        def helper():
            pass
        return helper
";
            let constructs = parse(source);
            let helper = find(&constructs, "Widget.render.helper");
            assert_eq!(helper.kind, ConstructKind::Function);
        }

        #[test]
        fn nested_class_methods_qualify_fully() {
            let source = "\
class Outer:
    class Inner:
        def act(self):
            pass
";
            let constructs = parse(source);
            assert_eq!(find(&constructs, "Outer.Inner").kind, ConstructKind::Class);
            assert_eq!(find(&constructs, "Outer.Inner.act").kind, ConstructKind::Method);
        }

        #[test]
        fn line_numbers_point_at_def_keyword() {
            let source = "x = 1\n\n\ndef late():\n    pass\n";
            let constructs = parse(source);
            assert_eq!(find(&constructs, "late").line, 4);
        }

        #[test]
        fn decorated_function_line_is_the_def_line() {
            let source = "@wraps\n@cached\ndef wrapped():\n    pass\n";
            let constructs = parse(source);
            assert_eq!(find(&constructs, "wrapped").line, 3);
        }

        #[test]
        fn defs_inside_conditionals_are_found() {
            let source = "\
if True:
    def conditional():
        pass
";
            let constructs = parse(source);
            assert_eq!(find(&constructs, "conditional").kind, ConstructKind::Function);
        }

        #[test]
        fn source_order_is_preserved() {
            let source = "def a():\n    pass\n\nclass B:\n    def c(self):\n        pass\n\ndef d():\n    pass\n";
            let names: Vec<String> = parse(source).iter().map(|c| c.name.clone()).collect();
            assert_eq!(names, vec!["sample", "a", "B", "c", "d"]);
        }
    }

    mod docstrings {
        use super::*;

        #[test]
        fn module_docstring_is_captured() {
            let constructs = parse("\"\"\"Module summary.\"\"\"\n\nx = 1\n");
            let doc = constructs[0].docstring.as_ref().unwrap();
            assert_eq!(doc.text, "Module summary.");
            assert_eq!(doc.quote, QuoteKind::TripleDouble);
            assert_eq!(doc.indent, "");
        }

        #[test]
        fn function_docstring_is_normalized() {
            let source = "\
def f():
    \"\"\"Summary line.

    Indented detail.
    \"\"\"
    pass
";
            let constructs = parse(source);
            let doc = find(&constructs, "f").docstring.as_ref().unwrap();
            assert_eq!(doc.text, "Summary line.\n\nIndented detail.");
            assert_eq!(doc.indent, "    ");
        }

        #[test]
        fn comment_before_docstring_is_still_a_docstring() {
            let source = "\
def f():
    # note
    '''doc'''
    pass
";
            let constructs = parse(source);
            let doc = find(&constructs, "f").docstring.as_ref().unwrap();
            assert_eq!(doc.text, "doc");
            assert_eq!(doc.quote, QuoteKind::TripleSingle);
        }

        #[test]
        fn non_first_string_is_not_a_docstring() {
            let source = "\
def f():
    x = 1
    \"\"\"not a docstring\"\"\"
";
            let constructs = parse(source);
            assert!(find(&constructs, "f").docstring.is_none());
        }

        #[test]
        fn raw_docstring_keeps_prefix_flag() {
            let source = "def f():\n    r\"\"\"match \\d\"\"\"\n";
            let constructs = parse(source);
            let doc = find(&constructs, "f").docstring.as_ref().unwrap();
            assert!(doc.raw);
            assert_eq!(doc.text, "match \\d");
        }

        #[test]
        fn docstring_span_slices_the_literal() {
            let source = "def f():\n    \"\"\"doc\"\"\"\n";
            let constructs = parse(source);
            let doc = find(&constructs, "f").docstring.as_ref().unwrap();
            assert_eq!(&source[doc.span.start..doc.span.end], "\"\"\"doc\"\"\"");
        }
    }

    mod error_recovery {
        use super::*;

        #[test]
        fn syntax_errors_still_yield_constructs() {
            let source = "\
def good():
    pass

def broken(:
    pass

def also_good():
    pass
";
            let constructs = parse(source);
            assert!(constructs.iter().any(|c| c.name == "good"));
            assert!(constructs.iter().any(|c| c.name == "also_good"));
        }

        #[test]
        fn invalid_utf8_degrades_to_module_only() {
            let constructs =
                parse_constructs(&PathBuf::from("/p/bad.py"), &[0x64, 0x65, 0x66, 0xff, 0xfe]);
            assert_eq!(constructs.len(), 1);
            assert_eq!(constructs[0].kind, ConstructKind::Module);
        }

        #[test]
        fn bom_is_transparent_to_extraction() {
            let mut bytes = b"\xef\xbb\xbf".to_vec();
            bytes.extend_from_slice(b"def f():\n    pass\n");
            let constructs = parse_constructs(&PathBuf::from("/p/sample.py"), &bytes);
            assert!(constructs.iter().any(|c| c.name == "f"));
        }
    }

    mod stats {
        use super::*;

        #[test]
        fn counts_by_kind_and_docstring() {
            let source = "\
\"\"\"Mod.\"\"\"

class C:
    def m(self):
        \"\"\"doc\"\"\"

def f():
    pass
";
            let stats = parse_stats(&parse(source));
            assert_eq!(stats.total, 4);
            assert_eq!(stats.modules, 1);
            assert_eq!(stats.classes, 1);
            assert_eq!(stats.methods, 1);
            assert_eq!(stats.functions, 1);
            assert_eq!(stats.with_docstrings, 2);
            assert_eq!(stats.without_docstrings, 2);
        }
    }
}
