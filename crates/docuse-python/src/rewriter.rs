//! Lossless docstring rewriting.
//!
//! One pass per file: locate each affected construct in a fresh syntax tree,
//! compute a replacement (or insertion) for its docstring literal, splice the
//! edits in reverse offset order, and re-parse the result. A rewrite that
//! fails the re-parse gate is discarded and the caller keeps the original
//! bytes. When no edit is warranted the output equals the input
//! byte-for-byte.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use docuse_core::error::ErrorKind;
use docuse_core::source::relative_posix;
use docuse_core::text::{
    detect_line_ending, leading_whitespace, line_start_offset, split_bom, Span,
};
use docuse_core::types::{Construct, ConstructKind, QuoteKind, ReferenceSet};

use crate::docstring::{
    self, clean_body, emit_literal, merge_body, new_docstring_body, CleanOutcome, EmitStyle,
    MergeContext, PathEntries,
};
use crate::parser::{self, DefSite, FileSites, InsertPoint};

// ============================================================================
// Errors and Results
// ============================================================================

/// Rewriter failures. `Unsafe` means the edited bytes failed the safety gate
/// and the file must be rolled back.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// The edited bytes did not re-parse (or could not be assembled safely).
    #[error("unsafe rewrite of {}: {reason}", path.display())]
    Unsafe { path: PathBuf, reason: String },

    /// The file is not valid UTF-8 and cannot be rewritten.
    #[error("{} is not valid UTF-8", path.display())]
    NotUtf8 { path: PathBuf },
}

impl RewriteError {
    /// Taxonomy classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RewriteError::Unsafe { .. } => ErrorKind::RewriteUnsafe,
            RewriteError::NotUtf8 { .. } => ErrorKind::SourceIo,
        }
    }
}

/// Result of rewriting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// No edit was warranted; output equals input.
    Unchanged,
    /// The new file bytes.
    Modified(Vec<u8>),
}

/// Options shared by update and clean passes.
#[derive(Debug, Clone, Copy)]
pub struct RewriteOptions<'a> {
    /// Ancestor directory for relative path computation.
    pub project_root: &'a Path,
    /// Render `(Line: N)` suffixes in usage bullets.
    pub include_line_numbers: bool,
}

// ============================================================================
// Edits
// ============================================================================

#[derive(Debug, Clone)]
struct Edit {
    span: Span,
    text: String,
}

fn apply_edits(text: &str, mut edits: Vec<Edit>, path: &Path) -> Result<String, RewriteError> {
    edits.sort_by_key(|e| e.span.start);
    for pair in edits.windows(2) {
        if pair[0].span.overlaps(&pair[1].span) {
            return Err(RewriteError::Unsafe {
                path: path.to_path_buf(),
                reason: format!("overlapping edits at {} and {}", pair[0].span, pair[1].span),
            });
        }
    }

    let mut out = text.to_string();
    for edit in edits.iter().rev() {
        if edit.span.end > out.len() {
            return Err(RewriteError::Unsafe {
                path: path.to_path_buf(),
                reason: format!("edit {} out of bounds", edit.span),
            });
        }
        out.replace_range(edit.span.start..edit.span.end, &edit.text);
    }
    Ok(out)
}

/// Re-parse gate: the rewritten text must not introduce syntax errors the
/// original did not have.
fn safety_gate(path: &Path, new_text: &str, original_had_error: bool) -> Result<(), RewriteError> {
    let Some(tree) = parser::parse_text(new_text) else {
        return Err(RewriteError::Unsafe {
            path: path.to_path_buf(),
            reason: "re-parse produced no tree".to_string(),
        });
    };
    if tree.root_node().has_error() && !original_had_error {
        return Err(RewriteError::Unsafe {
            path: path.to_path_buf(),
            reason: "re-parse reported syntax errors".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Targeting
// ============================================================================

/// Locate the definition site for a construct by `(kind, name, line)`.
/// Among multiple candidates the tightest span wins.
fn target_site<'s>(sites: &'s FileSites, construct: &Construct) -> Option<&'s DefSite> {
    sites
        .defs
        .iter()
        .filter(|site| {
            site.kind == construct.kind
                && site.name == construct.name
                && site.line == construct.line
        })
        .min_by_key(|site| site.span.len())
}

fn literal_indent(text: &str, span: Span) -> String {
    let line_start = line_start_offset(text.as_bytes(), span.start);
    leading_whitespace(&text[line_start..span.start]).to_string()
}

// ============================================================================
// Update Pass
// ============================================================================

fn path_entries(refs: &ReferenceSet, project_root: &Path) -> PathEntries {
    let mut entries = PathEntries::new();
    for reference in refs {
        let path = relative_posix(&reference.file, project_root);
        entries.insert(path, Some(reference.line));
    }
    entries
}

/// Replace an existing docstring literal with the merged form. Returns no
/// edit when the literal is already canonical.
fn merge_edit(
    text: &str,
    doc_span: Span,
    paths: &PathEntries,
    eol: &str,
    opts: &RewriteOptions<'_>,
    path: &Path,
) -> Result<Option<Edit>, RewriteError> {
    let raw = &text[doc_span.start..doc_span.end];
    let Some(literal) = docstring::split_literal(raw) else {
        debug!("skipping unrecognized docstring literal in {}", path.display());
        return Ok(None);
    };
    let indent = literal_indent(text, doc_span);
    let ctx = MergeContext {
        literal_indent: &indent,
        eol,
        include_line_numbers: opts.include_line_numbers,
        project_root: opts.project_root,
    };
    let merged = merge_body(literal.body, paths, &ctx);
    let style = EmitStyle {
        quote: literal.quote,
        raw: literal.raw,
    };
    let emitted = emit_literal(&merged, style).ok_or_else(|| RewriteError::Unsafe {
        path: path.to_path_buf(),
        reason: "no safe quote style for merged docstring".to_string(),
    })?;
    if emitted == raw {
        return Ok(None);
    }
    Ok(Some(Edit {
        span: doc_span,
        text: emitted,
    }))
}

/// Create a docstring statement holding only the usage block.
fn create_edit(
    insert: &InsertPoint,
    paths: &PathEntries,
    eol: &str,
    opts: &RewriteOptions<'_>,
    path: &Path,
) -> Result<Edit, RewriteError> {
    let ctx = MergeContext {
        literal_indent: &insert.indent,
        eol,
        include_line_numbers: opts.include_line_numbers,
        project_root: opts.project_root,
    };
    let body = new_docstring_body(paths, &ctx);
    let literal = emit_literal(
        &body,
        EmitStyle {
            quote: QuoteKind::TripleDouble,
            raw: false,
        },
    )
    .ok_or_else(|| RewriteError::Unsafe {
        path: path.to_path_buf(),
        reason: "no safe quote style for new docstring".to_string(),
    })?;

    let mut stmt = String::new();
    stmt.push_str(&insert.indent);
    stmt.push_str(&literal);
    stmt.push_str(eol);
    Ok(Edit {
        span: Span::new(insert.offset, insert.offset),
        text: stmt,
    })
}

/// Rewrite one file's docstrings from its analysis results.
///
/// `updates` pairs constructs defined in this file with their de-selfed
/// reference sets; empty sets are skipped, keeping the round-trip property.
pub fn rewrite_file(
    path: &Path,
    bytes: &[u8],
    updates: &[(&Construct, &ReferenceSet)],
    opts: &RewriteOptions<'_>,
) -> Result<Rewrite, RewriteError> {
    let (bom, stripped) = split_bom(bytes);
    let Ok(text) = std::str::from_utf8(stripped) else {
        return Err(RewriteError::NotUtf8 {
            path: path.to_path_buf(),
        });
    };
    let eol = detect_line_ending(stripped).as_str();

    let Some(tree) = parser::parse_text(text) else {
        debug!("{} does not parse; leaving untouched", path.display());
        return Ok(Rewrite::Unchanged);
    };
    if tree.root_node().kind() != "module" {
        return Ok(Rewrite::Unchanged);
    }
    let sites = parser::collect_sites(&tree, text);

    let mut edits = Vec::new();
    let mut targeted: HashSet<(usize, usize)> = HashSet::new();
    for (construct, refs) in updates {
        if refs.is_empty() {
            continue;
        }
        let paths = path_entries(refs, opts.project_root);
        if paths.is_empty() {
            continue;
        }

        // Module docstrings are merged when present but never created; a
        // synthesized header docstring on every importable file would be
        // noise, and the insertion point above shebang/encoding comments is
        // ambiguous.
        let (doc_span, insert) = match construct.kind {
            ConstructKind::Module => (sites.module_doc, None),
            _ => match target_site(&sites, construct) {
                Some(site) => (site.doc_span, site.insert.clone()),
                None => {
                    debug!(
                        "construct {} not found in current parse of {}; skipping",
                        construct.fully_qualified_name,
                        path.display()
                    );
                    continue;
                }
            },
        };

        match (doc_span, insert) {
            (Some(span), _) => {
                if !targeted.insert((span.start, span.end)) {
                    continue;
                }
                if let Some(edit) = merge_edit(text, span, &paths, eol, opts, path)? {
                    edits.push(edit);
                }
            }
            (None, Some(insert)) => {
                if !targeted.insert((insert.offset, insert.offset)) {
                    continue;
                }
                edits.push(create_edit(&insert, &paths, eol, opts, path)?);
            }
            (None, None) => {
                debug!(
                    "no docstring insertion point for {} in {}; skipping",
                    construct.fully_qualified_name,
                    path.display()
                );
            }
        }
    }

    if edits.is_empty() {
        return Ok(Rewrite::Unchanged);
    }

    let original_had_error = tree.root_node().has_error();
    let new_text = apply_edits(text, edits, path)?;
    if new_text == text {
        return Ok(Rewrite::Unchanged);
    }
    safety_gate(path, &new_text, original_had_error)?;

    let mut out = Vec::with_capacity(bom.len() + new_text.len());
    out.extend_from_slice(bom);
    out.extend_from_slice(new_text.as_bytes());
    Ok(Rewrite::Modified(out))
}

// ============================================================================
// Clean Pass
// ============================================================================

/// Delete a docstring statement. When the literal's line holds nothing else,
/// the whole line goes; otherwise only the literal is excised.
fn removal_edit(text: &str, doc_span: Span) -> Edit {
    let line_start = line_start_offset(text.as_bytes(), doc_span.start);
    let rest = &text[doc_span.end..];
    let line_end = match rest.find('\n') {
        Some(pos) => doc_span.end + pos + 1,
        None => text.len(),
    };
    let before = &text[line_start..doc_span.start];
    let after = &text[doc_span.end..line_end];
    if before.trim().is_empty() && after.trim().is_empty() {
        Edit {
            span: Span::new(line_start, line_end),
            text: String::new(),
        }
    } else {
        Edit {
            span: doc_span,
            text: String::new(),
        }
    }
}

fn clean_edit(
    text: &str,
    doc_span: Span,
    eol: &str,
    opts: &RewriteOptions<'_>,
    path: &Path,
) -> Result<Option<Edit>, RewriteError> {
    let raw = &text[doc_span.start..doc_span.end];
    let Some(literal) = docstring::split_literal(raw) else {
        return Ok(None);
    };
    let indent = literal_indent(text, doc_span);
    let ctx = MergeContext {
        literal_indent: &indent,
        eol,
        include_line_numbers: opts.include_line_numbers,
        project_root: opts.project_root,
    };
    match clean_body(literal.body, &ctx) {
        CleanOutcome::Unchanged => Ok(None),
        CleanOutcome::Cleaned(body) => {
            let style = EmitStyle {
                quote: literal.quote,
                raw: literal.raw,
            };
            let emitted = emit_literal(&body, style).ok_or_else(|| RewriteError::Unsafe {
                path: path.to_path_buf(),
                reason: "no safe quote style for cleaned docstring".to_string(),
            })?;
            if emitted == raw {
                Ok(None)
            } else {
                Ok(Some(Edit {
                    span: doc_span,
                    text: emitted,
                }))
            }
        }
        CleanOutcome::RemoveDocstring => Ok(Some(removal_edit(text, doc_span))),
    }
}

/// Remove `Used in:` blocks from every docstring in a file.
pub fn clean_file(
    path: &Path,
    bytes: &[u8],
    opts: &RewriteOptions<'_>,
) -> Result<Rewrite, RewriteError> {
    let (bom, stripped) = split_bom(bytes);
    let Ok(text) = std::str::from_utf8(stripped) else {
        return Err(RewriteError::NotUtf8 {
            path: path.to_path_buf(),
        });
    };
    let eol = detect_line_ending(stripped).as_str();

    let Some(tree) = parser::parse_text(text) else {
        return Ok(Rewrite::Unchanged);
    };
    if tree.root_node().kind() != "module" {
        return Ok(Rewrite::Unchanged);
    }
    let sites = parser::collect_sites(&tree, text);

    let mut doc_spans: Vec<Span> = sites.module_doc.into_iter().collect();
    doc_spans.extend(sites.defs.iter().filter_map(|site| site.doc_span));

    let mut edits = Vec::new();
    let mut targeted: HashSet<(usize, usize)> = HashSet::new();
    for span in doc_spans {
        if !targeted.insert((span.start, span.end)) {
            continue;
        }
        if let Some(edit) = clean_edit(text, span, eol, opts, path)? {
            edits.push(edit);
        }
    }

    if edits.is_empty() {
        return Ok(Rewrite::Unchanged);
    }

    let original_had_error = tree.root_node().has_error();
    let new_text = apply_edits(text, edits, path)?;
    if new_text == text {
        return Ok(Rewrite::Unchanged);
    }
    safety_gate(path, &new_text, original_had_error)?;

    if original_had_error {
        warn!(
            kind = %ErrorKind::ParseSoft,
            "cleaned {} despite pre-existing syntax errors",
            path.display()
        );
    }

    let mut out = Vec::with_capacity(bom.len() + new_text.len());
    out.extend_from_slice(bom);
    out.extend_from_slice(new_text.as_bytes());
    Ok(Rewrite::Modified(out))
}

// ============================================================================
// Tests
// ============================================================================
