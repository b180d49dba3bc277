//! Data model: constructs, references, and reference sets.
//!
//! A `Construct` is the unit of analysis: a named definition discovered by
//! the parser (module, class, function, or method). A `Reference` is a site
//! in the reference corpus that uses a construct. Both are plain serializable
//! data; cached values never carry parser tree handles.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::text::Span;

// ============================================================================
// Construct Kind
// ============================================================================

/// The kinds of named constructs the parser extracts.
///
/// A `Method` is any function whose innermost enclosing named scope is a
/// class; all other defs are `Function`. Nested functions inside a function
/// inside a class are `Function`, not `Method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstructKind {
    Module,
    Class,
    Function,
    Method,
}

impl std::fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConstructKind::Module => "module",
            ConstructKind::Class => "class",
            ConstructKind::Function => "function",
            ConstructKind::Method => "method",
        };
        write!(f, "{}", label)
    }
}

// ============================================================================
// Docstring Literal
// ============================================================================

/// The opening quote kind of a string literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteKind {
    TripleDouble,
    TripleSingle,
    Double,
    Single,
}

impl QuoteKind {
    /// The quote character sequence.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteKind::TripleDouble => "\"\"\"",
            QuoteKind::TripleSingle => "'''",
            QuoteKind::Double => "\"",
            QuoteKind::Single => "'",
        }
    }

    /// Whether this is a triple-quoted style.
    pub fn is_triple(&self) -> bool {
        matches!(self, QuoteKind::TripleDouble | QuoteKind::TripleSingle)
    }

    /// The other triple-quote style (upgrading single-character styles).
    pub fn alternate_triple(&self) -> QuoteKind {
        match self {
            QuoteKind::TripleDouble | QuoteKind::Double => QuoteKind::TripleSingle,
            QuoteKind::TripleSingle | QuoteKind::Single => QuoteKind::TripleDouble,
        }
    }
}

/// A construct's docstring: the normalized text plus everything needed to
/// re-emit the literal without disturbing the rest of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocstringLiteral {
    /// Canonical text: dequoted, dedented, trailing whitespace trimmed.
    pub text: String,
    /// Opening quote kind as written.
    pub quote: QuoteKind,
    /// Whether the literal carried a raw-string prefix.
    pub raw: bool,
    /// Leading whitespace of the line on which the literal starts.
    pub indent: String,
    /// Byte range of the string literal token (BOM-stripped coordinates).
    pub span: Span,
}

// ============================================================================
// Construct
// ============================================================================

/// A named definition discovered by the parser.
///
/// Identity (equality and hashing) is `(file, kind, fully_qualified_name,
/// line)`; two constructs from the same file are distinct iff that triple
/// differs. The analysis result map relies on this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Construct {
    /// Identifier as written.
    pub name: String,
    /// Construct kind.
    pub kind: ConstructKind,
    /// Absolute path of the defining file.
    pub file: PathBuf,
    /// 1-based line of the `def`/`class` keyword; 1 for modules.
    pub line: u32,
    /// Dotted path of enclosing named scopes, outermost to innermost.
    /// For modules, the file stem.
    pub fully_qualified_name: String,
    /// The existing docstring, if any.
    pub docstring: Option<DocstringLiteral>,
    /// Byte range of header + body, used by the rewriter for targeting.
    pub span: Span,
}

impl PartialEq for Construct {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file
            && self.kind == other.kind
            && self.fully_qualified_name == other.fully_qualified_name
            && self.line == other.line
    }
}

impl Eq for Construct {}

impl Hash for Construct {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file.hash(state);
        self.kind.hash(state);
        self.fully_qualified_name.hash(state);
        self.line.hash(state);
    }
}

impl std::fmt::Display for Construct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({}:{})",
            self.kind,
            self.fully_qualified_name,
            self.file.display(),
            self.line
        )
    }
}

// ============================================================================
// Reference
// ============================================================================

/// A site in the reference corpus that uses a construct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// File containing the reference.
    pub file: PathBuf,
    /// 1-based line of the reference.
    pub line: u32,
    /// 1-based byte column, when the backend knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// The referencing source line, when the backend captured it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_line: Option<String>,
}

impl Reference {
    /// Create a bare reference with only file and line.
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Reference {
            file: file.into(),
            line,
            column: None,
            context_line: None,
        }
    }

    /// Deduplication key: references are equal when `(file, line)` match.
    pub fn key(&self) -> (&Path, u32) {
        (self.file.as_path(), self.line)
    }
}

// ============================================================================
// Reference Set
// ============================================================================

/// An ordered, duplicate-free sequence of references.
///
/// Ordering is insertion order from the merge policy; duplicates are decided
/// by `(file, line)`. No alphabetization happens here; presentation sorting
/// is the rewriter's business.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Reference>", into = "Vec<Reference>")]
pub struct ReferenceSet {
    refs: Vec<Reference>,
    seen: HashSet<(PathBuf, u32)>,
}

impl ReferenceSet {
    /// Create an empty set.
    pub fn new() -> Self {
        ReferenceSet::default()
    }

    /// Insert a reference, keeping the first occurrence of each
    /// `(file, line)`. Returns whether the reference was new.
    pub fn insert(&mut self, reference: Reference) -> bool {
        let key = (reference.file.clone(), reference.line);
        if self.seen.insert(key) {
            self.refs.push(reference);
            true
        } else {
            false
        }
    }

    /// Insert every reference from an iterator, in order.
    pub fn extend<I: IntoIterator<Item = Reference>>(&mut self, iter: I) {
        for reference in iter {
            self.insert(reference);
        }
    }

    /// Whether a `(file, line)` key is already present.
    pub fn contains(&self, file: &Path, line: u32) -> bool {
        self.seen.contains(&(file.to_path_buf(), line))
    }

    /// Number of references.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Reference> {
        self.refs.iter()
    }

    /// Drop references whose file equals `file` (self-reference removal).
    pub fn without_file(&self, file: &Path) -> ReferenceSet {
        let mut out = ReferenceSet::new();
        out.extend(self.refs.iter().filter(|r| r.file != file).cloned());
        out
    }
}

impl From<Vec<Reference>> for ReferenceSet {
    fn from(refs: Vec<Reference>) -> Self {
        let mut set = ReferenceSet::new();
        set.extend(refs);
        set
    }
}

impl From<ReferenceSet> for Vec<Reference> {
    fn from(set: ReferenceSet) -> Self {
        set.refs
    }
}

impl FromIterator<Reference> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = Reference>>(iter: I) -> Self {
        let mut set = ReferenceSet::new();
        set.extend(iter);
        set
    }
}

impl<'a> IntoIterator for &'a ReferenceSet {
    type Item = &'a Reference;
    type IntoIter = std::slice::Iter<'a, Reference>;

    fn into_iter(self) -> Self::IntoIter {
        self.refs.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn construct(kind: ConstructKind, fqn: &str, line: u32) -> Construct {
        Construct {
            name: fqn.rsplit('.').next().unwrap().to_string(),
            kind,
            file: PathBuf::from("/p/a.py"),
            line,
            fully_qualified_name: fqn.to_string(),
            docstring: None,
            span: Span::new(0, 10),
        }
    }

    mod construct_identity {
        use super::*;
        use std::collections::HashMap;

        #[test]
        fn identity_ignores_docstring_and_span() {
            let mut a = construct(ConstructKind::Function, "f", 3);
            let mut b = construct(ConstructKind::Function, "f", 3);
            a.span = Span::new(0, 5);
            b.span = Span::new(0, 99);
            assert_eq!(a, b);

            let mut map = HashMap::new();
            map.insert(a, 1);
            assert!(map.contains_key(&b));
        }

        #[test]
        fn kind_name_line_distinguish() {
            let f = construct(ConstructKind::Function, "f", 3);
            assert_ne!(f, construct(ConstructKind::Method, "f", 3));
            assert_ne!(f, construct(ConstructKind::Function, "g", 3));
            assert_ne!(f, construct(ConstructKind::Function, "f", 4));
        }

        #[test]
        fn file_distinguishes() {
            let a = construct(ConstructKind::Function, "f", 3);
            let mut b = construct(ConstructKind::Function, "f", 3);
            b.file = PathBuf::from("/p/b.py");
            assert_ne!(a, b);
        }
    }

    mod quote_kind_tests {
        use super::*;

        #[test]
        fn alternates_are_triple() {
            assert_eq!(QuoteKind::TripleDouble.alternate_triple(), QuoteKind::TripleSingle);
            assert_eq!(QuoteKind::Single.alternate_triple(), QuoteKind::TripleDouble);
            assert!(QuoteKind::Double.alternate_triple().is_triple());
        }
    }

    mod reference_set_tests {
        use super::*;

        #[test]
        fn dedupes_on_file_and_line() {
            let mut set = ReferenceSet::new();
            assert!(set.insert(Reference::new("/p/b.py", 1)));
            assert!(!set.insert(Reference::new("/p/b.py", 1)));
            assert!(set.insert(Reference::new("/p/b.py", 2)));
            assert_eq!(set.len(), 2);
        }

        #[test]
        fn keeps_first_occurrence_details() {
            let mut set = ReferenceSet::new();
            let mut first = Reference::new("/p/b.py", 1);
            first.column = Some(5);
            set.insert(first);
            set.insert(Reference::new("/p/b.py", 1));
            assert_eq!(set.iter().next().unwrap().column, Some(5));
        }

        #[test]
        fn preserves_insertion_order() {
            let set: ReferenceSet = vec![
                Reference::new("/p/z.py", 9),
                Reference::new("/p/a.py", 1),
                Reference::new("/p/m.py", 4),
            ]
            .into();
            let files: Vec<_> = set.iter().map(|r| r.file.clone()).collect();
            assert_eq!(
                files,
                vec![
                    PathBuf::from("/p/z.py"),
                    PathBuf::from("/p/a.py"),
                    PathBuf::from("/p/m.py")
                ]
            );
        }

        #[test]
        fn without_file_removes_self_references() {
            let set: ReferenceSet = vec![
                Reference::new("/p/a.py", 1),
                Reference::new("/p/b.py", 2),
                Reference::new("/p/a.py", 7),
            ]
            .into();
            let filtered = set.without_file(Path::new("/p/a.py"));
            assert_eq!(filtered.len(), 1);
            assert_eq!(filtered.iter().next().unwrap().file, PathBuf::from("/p/b.py"));
        }

        #[test]
        fn serde_round_trip_preserves_order_and_dedup() {
            let set: ReferenceSet = vec![
                Reference::new("/p/b.py", 2),
                Reference::new("/p/a.py", 1),
            ]
            .into();
            let json = serde_json::to_string(&set).unwrap();
            let back: ReferenceSet = serde_json::from_str(&json).unwrap();
            assert_eq!(set, back);
        }
    }
}
