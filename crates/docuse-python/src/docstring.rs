//! Docstring literal grammar: normalization, `Used in:` block parsing and
//! merging, and safe literal emission.
//!
//! Everything here operates on the *raw* body of a string literal (the text
//! between the quotes, exactly as written). The rewriter splices whole
//! literals; this module guarantees the spliced literal re-parses to the
//! intended content and that nothing outside the usage block changes.
//!
//! ## Block boundaries
//!
//! A usage block starts at a line that reads `Used in:` (case-sensitive,
//! nothing else on the line after indentation) and extends over bullet lines
//! of the form `- <path>`. It ends at the first non-list line, the end of the
//! docstring, or a blank line followed by non-list content.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use docuse_core::source::relative_posix;
use docuse_core::text::{is_blank, leading_whitespace};
use docuse_core::types::QuoteKind;

/// The section header that introduces a usage block.
pub const USAGE_HEADER: &str = "Used in:";

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*-\s+(.+)$").expect("bullet regex"))
}

fn line_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\(Line:\s*(\d+)\)\s*$").expect("line suffix regex"))
}

// ============================================================================
// Raw Literals
// ============================================================================

/// A string literal split into prefix, quote style, and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLiteral<'a> {
    /// Prefix characters (`r`, `u`, ... ) exactly as written.
    pub prefix: &'a str,
    /// Opening quote kind.
    pub quote: QuoteKind,
    /// Whether the prefix marks a raw string.
    pub raw: bool,
    /// The text between the quotes, exactly as written.
    pub body: &'a str,
}

/// Split a literal into prefix, quotes, and body. Returns `None` for
/// anything that is not a plausible string literal (the caller then leaves
/// the docstring alone).
pub fn split_literal(literal: &str) -> Option<RawLiteral<'_>> {
    let quote_at = literal.find(['"', '\''])?;
    let prefix = &literal[..quote_at];
    if !prefix.chars().all(|c| matches!(c, 'r' | 'R' | 'b' | 'B' | 'u' | 'U' | 'f' | 'F')) {
        return None;
    }
    let raw = prefix.chars().any(|c| matches!(c, 'r' | 'R'));
    let rest = &literal[quote_at..];
    let quote = if rest.starts_with("\"\"\"") {
        QuoteKind::TripleDouble
    } else if rest.starts_with("'''") {
        QuoteKind::TripleSingle
    } else if rest.starts_with('"') {
        QuoteKind::Double
    } else {
        QuoteKind::Single
    };
    let q = quote.as_str();
    let inner = rest.strip_prefix(q)?;
    let body = inner.strip_suffix(q)?;
    Some(RawLiteral {
        prefix,
        quote,
        raw,
        body,
    })
}

// ============================================================================
// Normalization
// ============================================================================

/// Canonical docstring text: lines after the first are dedented by their
/// minimum common indentation, every line loses trailing whitespace, and
/// trailing blank lines are dropped.
pub fn normalize(body: &str) -> String {
    let lines: Vec<&str> = body.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)).collect();

    let min_indent = lines[1..]
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| leading_whitespace(l).len())
        .min()
        .unwrap_or(0);

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let dedented = if i == 0 || line.len() < min_indent {
            (*line).to_string()
        } else {
            line[min_indent..].to_string()
        };
        out.push(dedented.trim_end().to_string());
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

// ============================================================================
// Body Lines
// ============================================================================

/// One line of a literal body with its own line terminator preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BodyLine {
    text: String,
    eol: String,
}

fn split_body(body: &str) -> Vec<BodyLine> {
    let mut lines = Vec::new();
    let mut rest = body;
    loop {
        match rest.find('\n') {
            Some(pos) => {
                let (line, eol) = if pos > 0 && rest.as_bytes()[pos - 1] == b'\r' {
                    (&rest[..pos - 1], "\r\n")
                } else {
                    (&rest[..pos], "\n")
                };
                lines.push(BodyLine {
                    text: line.to_string(),
                    eol: eol.to_string(),
                });
                rest = &rest[pos + 1..];
            }
            None => {
                lines.push(BodyLine {
                    text: rest.to_string(),
                    eol: String::new(),
                });
                break;
            }
        }
    }
    lines
}

fn join_body(lines: &[BodyLine]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.text);
        out.push_str(&line.eol);
    }
    out
}

// ============================================================================
// Block Parsing
// ============================================================================

/// Boundaries of a usage block within a body, as line indices `[header, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BlockBounds {
    header: usize,
    end: usize,
    indent: String,
}

fn find_block(lines: &[BodyLine]) -> Option<BlockBounds> {
    let header = lines.iter().position(|l| l.text.trim() == USAGE_HEADER)?;
    let indent = leading_whitespace(&lines[header].text).to_string();

    let mut end = header + 1;
    while end < lines.len() {
        let text = &lines[end].text;
        if bullet_re().is_match(text) {
            end += 1;
        } else if is_blank(text) {
            // A blank line stays in the block only when list content follows.
            match lines.get(end + 1) {
                Some(next) if bullet_re().is_match(&next.text) => end += 2,
                _ => break,
            }
        } else {
            break;
        }
    }
    Some(BlockBounds { header, end, indent })
}

/// Parse one bullet into `(path, line_hint)`, stripping any `(Line: N)`
/// suffix and normalizing separators.
fn parse_bullet(line: &str) -> Option<(String, Option<u32>)> {
    let captured = bullet_re().captures(line)?;
    let entry = captured.get(1).expect("bullet capture").as_str().trim();
    let (entry, hint) = match line_suffix_re().captures(entry) {
        Some(suffix) => {
            let line_number = suffix.get(1).and_then(|m| m.as_str().parse().ok());
            (entry[..suffix.get(0).unwrap().start()].trim_end(), line_number)
        }
        None => (entry, None),
    };
    if entry.is_empty() {
        return None;
    }
    Some((entry.replace('\\', "/"), hint))
}

/// Normalize a bullet entry against the project root: forward slashes,
/// absolute forms mapped to the same relative path.
fn normalize_entry(entry: &str, project_root: &Path) -> String {
    let slashed = entry.replace('\\', "/");
    let path = Path::new(&slashed);
    if path.is_absolute() {
        relative_posix(path, project_root)
    } else {
        slashed
    }
}

// ============================================================================
// Path Entries
// ============================================================================

/// The sorted, deduplicated set of usage paths, each with an optional first
/// reference line for the `(Line: N)` format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathEntries(pub BTreeMap<String, Option<u32>>);

impl PathEntries {
    pub fn new() -> Self {
        PathEntries::default()
    }

    /// Record a path, keeping the first line hint seen for it.
    pub fn insert(&mut self, path: String, line: Option<u32>) {
        self.0.entry(path).or_insert(line);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// ============================================================================
// Merging
// ============================================================================

/// Context shared by merge and clean operations.
#[derive(Debug, Clone)]
pub struct MergeContext<'a> {
    /// Leading whitespace of the line the literal starts on; aligns the
    /// closing quotes and indents freshly created blocks.
    pub literal_indent: &'a str,
    /// Line ending for inserted lines.
    pub eol: &'a str,
    /// Render `(Line: N)` suffixes.
    pub include_line_numbers: bool,
    /// Project root for normalizing absolute bullet entries.
    pub project_root: &'a Path,
}

fn render_block(paths: &PathEntries, indent: &str, eol: &str, include_lines: bool) -> Vec<BodyLine> {
    let mut out = Vec::with_capacity(paths.0.len() + 1);
    out.push(BodyLine {
        text: format!("{}{}", indent, USAGE_HEADER),
        eol: eol.to_string(),
    });
    for (path, hint) in &paths.0 {
        let text = match (include_lines, hint) {
            (true, Some(line)) => format!("{}- {} (Line: {})", indent, path, line),
            _ => format!("{}- {}", indent, path),
        };
        out.push(BodyLine {
            text,
            eol: eol.to_string(),
        });
    }
    out
}

/// Indent for a fresh block: the existing block's, else the indentation of
/// the first indented continuation line, else the literal's own.
fn block_indent(lines: &[BodyLine], existing: Option<&BlockBounds>, ctx: &MergeContext) -> String {
    if let Some(bounds) = existing {
        return bounds.indent.clone();
    }
    lines[1..]
        .iter()
        .find(|l| !is_blank(&l.text))
        .map(|l| leading_whitespace(&l.text).to_string())
        .unwrap_or_else(|| ctx.literal_indent.to_string())
}

/// Merge new usage paths into a literal body, replacing any existing block
/// in place and leaving every other byte of the docstring untouched.
pub fn merge_body(body: &str, new_paths: &PathEntries, ctx: &MergeContext) -> String {
    let lines = split_body(body);
    let bounds = find_block(&lines);

    let mut merged = new_paths.clone();
    if let Some(bounds) = &bounds {
        for line in &lines[bounds.header + 1..bounds.end] {
            if let Some((entry, hint)) = parse_bullet(&line.text) {
                merged.insert(normalize_entry(&entry, ctx.project_root), hint);
            }
        }
    }
    if merged.is_empty() {
        return body.to_string();
    }

    let indent = block_indent(&lines, bounds.as_ref(), ctx);
    let block = render_block(&merged, &indent, ctx.eol, ctx.include_line_numbers);

    let (mut prefix, suffix): (Vec<BodyLine>, Vec<BodyLine>) = match &bounds {
        Some(bounds) => (
            lines[..bounds.header].to_vec(),
            lines[bounds.end..].to_vec(),
        ),
        None => (lines, Vec::new()),
    };

    // Exactly one blank line between preceding content and the block. The
    // opening segment (line 0) survives even when empty: it is the structure
    // of a `"""\n...`-style docstring, not content.
    let has_content = prefix.iter().any(|l| !is_blank(&l.text));
    while prefix.len() > 1 && is_blank(&prefix.last().unwrap().text) {
        prefix.pop();
    }
    if let Some(last) = prefix.last_mut() {
        if last.eol.is_empty() {
            last.eol = ctx.eol.to_string();
        }
    }
    if has_content {
        prefix.push(BodyLine {
            text: String::new(),
            eol: ctx.eol.to_string(),
        });
    }

    let mut out = prefix;
    out.extend(block);

    let trailing_content = suffix.iter().any(|l| !is_blank(&l.text));
    if trailing_content {
        // One blank line between the block and preserved trailing content.
        let mut suffix = suffix;
        while suffix.first().is_some_and(|l| is_blank(&l.text)) {
            suffix.remove(0);
        }
        out.push(BodyLine {
            text: String::new(),
            eol: ctx.eol.to_string(),
        });
        out.extend(suffix);
    } else {
        // Canonical ending: the closing quotes sit on their own line,
        // aligned with the literal.
        out.push(BodyLine {
            text: ctx.literal_indent.to_string(),
            eol: String::new(),
        });
    }

    join_body(&out)
}

/// The body of a freshly created docstring: just the usage block.
pub fn new_docstring_body(new_paths: &PathEntries, ctx: &MergeContext) -> String {
    let mut out = vec![BodyLine {
        text: String::new(),
        eol: ctx.eol.to_string(),
    }];
    out.extend(render_block(
        new_paths,
        ctx.literal_indent,
        ctx.eol,
        ctx.include_line_numbers,
    ));
    out.push(BodyLine {
        text: ctx.literal_indent.to_string(),
        eol: String::new(),
    });
    join_body(&out)
}

// ============================================================================
// Cleaning
// ============================================================================

/// Result of excising a usage block from a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    /// No block present.
    Unchanged,
    /// Block removed; the new body.
    Cleaned(String),
    /// The docstring was entirely auto-generated and should be removed.
    RemoveDocstring,
}

/// Whether a body consists solely of a generated usage block (plus
/// whitespace).
pub fn is_generated_only(body: &str) -> bool {
    let lines = split_body(body);
    match find_block(&lines) {
        Some(bounds) => lines[..bounds.header]
            .iter()
            .chain(lines[bounds.end..].iter())
            .all(|l| is_blank(&l.text)),
        None => false,
    }
}

/// Remove the usage block from a body using the same boundary rules as the
/// merge.
pub fn clean_body(body: &str, ctx: &MergeContext) -> CleanOutcome {
    let lines = split_body(body);
    let Some(bounds) = find_block(&lines) else {
        return CleanOutcome::Unchanged;
    };
    let generated_only = is_generated_only(body);

    let mut prefix = lines[..bounds.header].to_vec();
    // The blank separator belongs to the block.
    while prefix.len() > 1 && is_blank(&prefix.last().unwrap().text) {
        prefix.pop();
    }
    let mut suffix = lines[bounds.end..].to_vec();
    while suffix.last().is_some_and(|l| is_blank(&l.text)) {
        suffix.pop();
    }

    let mut remainder = prefix;
    remainder.extend(suffix);
    while remainder.last().is_some_and(|l| is_blank(&l.text)) {
        remainder.pop();
    }

    if remainder.iter().all(|l| is_blank(&l.text)) {
        return if generated_only {
            CleanOutcome::RemoveDocstring
        } else {
            CleanOutcome::Cleaned(String::new())
        };
    }

    let multi_line = remainder.len() > 1;
    if let Some(last) = remainder.last_mut() {
        last.eol = String::new();
    }
    let mut cleaned = join_body(&remainder);
    if multi_line {
        cleaned.push_str(ctx.eol);
        cleaned.push_str(ctx.literal_indent);
    }
    CleanOutcome::Cleaned(cleaned)
}

// ============================================================================
// Literal Emission
// ============================================================================

/// The style a literal is emitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitStyle {
    pub quote: QuoteKind,
    pub raw: bool,
}

fn trailing_backslashes(body: &str) -> usize {
    body.chars().rev().take_while(|&c| c == '\\').count()
}

/// Escape collisions with the chosen quote sequence, and double a lone
/// trailing backslash so it cannot escape the closing quotes. The cooked
/// value of the literal is unchanged.
fn escape_quotes(body: &str, quote: QuoteKind) -> String {
    let seq = quote.as_str();
    let escaped_seq: String = seq.chars().map(|c| format!("\\{}", c)).collect();
    let mut out = body.replace(seq, &escaped_seq);
    if trailing_backslashes(&out) % 2 == 1 {
        out.push('\\');
    }
    out
}

/// Structural check: the candidate scans as a single complete literal whose
/// closing quotes are exactly at the end.
fn scans_cleanly(candidate: &str) -> bool {
    let Some(quote_at) = candidate.find(['"', '\'']) else {
        return false;
    };
    let prefix = &candidate[..quote_at];
    let raw = prefix.chars().any(|c| matches!(c, 'r' | 'R'));
    let rest = &candidate[quote_at..];
    let quote = if rest.starts_with("\"\"\"") {
        QuoteKind::TripleDouble
    } else if rest.starts_with("'''") {
        QuoteKind::TripleSingle
    } else if rest.starts_with('"') {
        QuoteKind::Double
    } else {
        QuoteKind::Single
    };
    let seq = quote.as_str();
    let inner = &rest[seq.len()..];

    let bytes = inner.as_bytes();
    let seq_bytes = seq.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if !raw && bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i..].starts_with(seq_bytes) {
            // Must be the closing quotes, and nothing may follow.
            return i + seq_bytes.len() == bytes.len();
        }
        // Bare newlines terminate single-quoted strings.
        if !quote.is_triple() && (bytes[i] == b'\n' || bytes[i] == b'\r') {
            return false;
        }
        i += 1;
    }
    false
}

/// Emit a literal for `body`, choosing the safest quote style:
/// the original style, then the alternate triple style, then escaping inside
/// a triple style. Every candidate is validated by re-scanning; `None` means
/// no safe emission exists (the caller rolls the file back).
pub fn emit_literal(body: &str, original: EmitStyle) -> Option<String> {
    let multi_line = body.contains('\n') || body.contains('\r');

    let quotes: Vec<QuoteKind> = if original.quote.is_triple() {
        vec![original.quote, original.quote.alternate_triple()]
    } else if multi_line {
        vec![QuoteKind::TripleDouble, QuoteKind::TripleSingle]
    } else {
        vec![
            original.quote,
            original.quote.alternate_triple(),
            original.quote.alternate_triple().alternate_triple(),
        ]
    };

    // A raw original keeps its prefix whenever the content fits a raw
    // literal; dropping the prefix would change what the backslashes mean.
    if original.raw {
        for quote in &quotes {
            let seq = quote.as_str();
            if body.contains(seq) || body.ends_with('\\') {
                continue;
            }
            let candidate = format!("r{}{}{}", seq, body, seq);
            if scans_cleanly(&candidate) {
                return Some(candidate);
            }
        }
    }

    for quote in &quotes {
        let seq = quote.as_str();
        if body.contains(seq) {
            continue;
        }
        if trailing_backslashes(body) % 2 == 1 {
            continue;
        }
        let candidate = format!("{}{}{}", seq, body, seq);
        if scans_cleanly(&candidate) {
            return Some(candidate);
        }
    }

    // Escaping fallback inside a triple style.
    let fallback = if original.quote.is_triple() {
        original.quote
    } else {
        QuoteKind::TripleDouble
    };
    for quote in [fallback, fallback.alternate_triple()] {
        let escaped = escape_quotes(body, quote);
        let seq = quote.as_str();
        let candidate = format!("{}{}{}", seq, escaped, seq);
        if scans_cleanly(&candidate) {
            return Some(candidate);
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx<'a>(indent: &'a str, root: &'a Path) -> MergeContext<'a> {
        MergeContext {
            literal_indent: indent,
            eol: "\n",
            include_line_numbers: false,
            project_root: root,
        }
    }

    fn entries(paths: &[&str]) -> PathEntries {
        let mut out = PathEntries::new();
        for p in paths {
            out.insert((*p).to_string(), None);
        }
        out
    }

    mod split_literal_tests {
        use super::*;

        #[test]
        fn triple_double() {
            let lit = split_literal("\"\"\"Summary.\"\"\"").unwrap();
            assert_eq!(lit.quote, QuoteKind::TripleDouble);
            assert_eq!(lit.body, "Summary.");
            assert!(!lit.raw);
        }

        #[test]
        fn raw_prefix() {
            let lit = split_literal("r'''pattern \\d'''").unwrap();
            assert_eq!(lit.quote, QuoteKind::TripleSingle);
            assert!(lit.raw);
            assert_eq!(lit.body, "pattern \\d");
        }

        #[test]
        fn single_quotes() {
            let lit = split_literal("'one line'").unwrap();
            assert_eq!(lit.quote, QuoteKind::Single);
            assert_eq!(lit.body, "one line");
        }

        #[test]
        fn empty_triple() {
            let lit = split_literal("\"\"\"\"\"\"").unwrap();
            assert_eq!(lit.body, "");
        }

        #[test]
        fn not_a_literal() {
            assert!(split_literal("foo(").is_none());
        }
    }

    mod normalize_tests {
        use super::*;

        #[test]
        fn dedents_after_first_line() {
            let body = "Summary.\n\n    Detail one.\n    Detail two.\n    ";
            assert_eq!(normalize(body), "Summary.\n\nDetail one.\nDetail two.");
        }

        #[test]
        fn trims_trailing_whitespace_and_blank_lines() {
            assert_eq!(normalize("line   \n\n\n"), "line");
        }

        #[test]
        fn single_line_passthrough() {
            assert_eq!(normalize("Greeter."), "Greeter.");
        }

        #[test]
        fn uneven_indentation_uses_minimum() {
            let body = "Top\n        deep\n    shallow";
            assert_eq!(normalize(body), "Top\n    deep\nshallow");
        }
    }

    mod block_parsing_tests {
        use super::*;

        fn bounds(body: &str) -> Option<(usize, usize)> {
            let lines = split_body(body);
            find_block(&lines).map(|b| (b.header, b.end))
        }

        #[test]
        fn simple_block() {
            let body = "Summary.\n\nUsed in:\n- a.py\n- b.py\n";
            assert_eq!(bounds(body), Some((2, 5)));
        }

        #[test]
        fn stops_at_non_list_line() {
            let body = "Used in:\n- a.py\nSee also: b\n";
            assert_eq!(bounds(body), Some((0, 2)));
        }

        #[test]
        fn blank_then_non_list_ends_block() {
            let body = "Used in:\n- a.py\n\nTrailing prose.\n";
            assert_eq!(bounds(body), Some((0, 2)));
        }

        #[test]
        fn blank_then_bullet_stays_in_block() {
            let body = "Used in:\n- a.py\n\n- b.py\n";
            assert_eq!(bounds(body), Some((0, 4)));
        }

        #[test]
        fn header_must_be_alone_on_line() {
            assert_eq!(bounds("Also Used in: stuff\n"), None);
            assert_eq!(bounds("used in:\n- a.py\n"), None);
        }

        #[test]
        fn bullets_parse_paths_and_line_hints() {
            assert_eq!(parse_bullet("- src/a.py"), Some(("src/a.py".into(), None)));
            assert_eq!(
                parse_bullet("  - src/a.py (Line: 12)"),
                Some(("src/a.py".into(), Some(12)))
            );
            assert_eq!(parse_bullet("- win\\path.py"), Some(("win/path.py".into(), None)));
            assert_eq!(parse_bullet("no bullet"), None);
        }

        #[test]
        fn absolute_entries_normalize_to_relative() {
            let root = PathBuf::from("/p");
            assert_eq!(normalize_entry("/p/src/a.py", &root), "src/a.py");
            assert_eq!(normalize_entry("src/a.py", &root), "src/a.py");
        }
    }

    mod merge_tests {
        use super::*;

        #[test]
        fn scenario_merge_with_existing_block() {
            let root = PathBuf::from("/p");
            let body = "Greeter.\n\nUsed in:\n- old/x.py\n";
            let merged = merge_body(body, &entries(&["new/y.py"]), &ctx("", &root));
            assert_eq!(merged, "Greeter.\n\nUsed in:\n- new/y.py\n- old/x.py\n");
        }

        #[test]
        fn appends_block_to_plain_docstring() {
            let root = PathBuf::from("/p");
            let merged = merge_body("Greeter.", &entries(&["b.py"]), &ctx("", &root));
            assert_eq!(merged, "Greeter.\n\nUsed in:\n- b.py\n");
        }

        #[test]
        fn indented_docstring_keeps_alignment() {
            let root = PathBuf::from("/p");
            let body = "Do things.\n\n    More detail.\n    ";
            let merged = merge_body(body, &entries(&["b.py"]), &ctx("    ", &root));
            assert_eq!(
                merged,
                "Do things.\n\n    More detail.\n\n    Used in:\n    - b.py\n    "
            );
        }

        #[test]
        fn existing_block_indent_wins() {
            let root = PathBuf::from("/p");
            let body = "\n    Used in:\n    - old.py\n    ";
            let merged = merge_body(body, &entries(&["new.py"]), &ctx("    ", &root));
            assert_eq!(merged, "\n    Used in:\n    - new.py\n    - old.py\n    ");
        }

        #[test]
        fn paths_dedupe_and_sort() {
            let root = PathBuf::from("/p");
            let body = "Used in:\n- z.py\n- a.py\n";
            let merged = merge_body(body, &entries(&["m.py", "a.py"]), &ctx("", &root));
            assert_eq!(merged, "Used in:\n- a.py\n- m.py\n- z.py\n");
        }

        #[test]
        fn absolute_old_entries_merge_with_relative() {
            let root = PathBuf::from("/p");
            let body = "Used in:\n- /p/b.py\n";
            let merged = merge_body(body, &entries(&["b.py"]), &ctx("", &root));
            assert_eq!(merged, "Used in:\n- b.py\n");
        }

        #[test]
        fn trailing_prose_after_block_is_preserved() {
            let root = PathBuf::from("/p");
            let body = "Summary.\n\nUsed in:\n- old.py\n\nSee the manual.\n";
            let merged = merge_body(body, &entries(&["new.py"]), &ctx("", &root));
            assert_eq!(
                merged,
                "Summary.\n\nUsed in:\n- new.py\n- old.py\n\nSee the manual.\n"
            );
        }

        #[test]
        fn idempotent_on_canonical_body() {
            let root = PathBuf::from("/p");
            let body = "Greeter.\n\nUsed in:\n- a.py\n- b.py\n";
            let merged = merge_body(body, &entries(&["a.py", "b.py"]), &ctx("", &root));
            assert_eq!(merged, body);
        }

        #[test]
        fn line_number_format_flag() {
            let root = PathBuf::from("/p");
            let mut paths = PathEntries::new();
            paths.insert("b.py".into(), Some(3));
            let context = MergeContext {
                include_line_numbers: true,
                ..ctx("", &root)
            };
            let merged = merge_body("Summary.", &paths, &context);
            assert_eq!(merged, "Summary.\n\nUsed in:\n- b.py (Line: 3)\n");
        }

        #[test]
        fn stale_line_suffixes_do_not_duplicate_paths() {
            let root = PathBuf::from("/p");
            let body = "Used in:\n- b.py (Line: 9)\n";
            let merged = merge_body(body, &entries(&["b.py"]), &ctx("", &root));
            assert_eq!(merged, "Used in:\n- b.py\n");
        }

        #[test]
        fn new_docstring_body_is_block_only() {
            let root = PathBuf::from("/p");
            let body = new_docstring_body(&entries(&["b.py"]), &ctx("    ", &root));
            assert_eq!(body, "\n    Used in:\n    - b.py\n    ");
        }
    }

    mod clean_tests {
        use super::*;

        #[test]
        fn scenario_clean_restores_summary() {
            let root = PathBuf::from("/p");
            let body = "Greeter.\n\nUsed in:\n- new/y.py\n- old/x.py\n";
            match clean_body(body, &ctx("", &root)) {
                CleanOutcome::Cleaned(cleaned) => assert_eq!(cleaned, "Greeter."),
                other => panic!("expected Cleaned, got {:?}", other),
            }
        }

        #[test]
        fn generated_only_docstring_is_removed() {
            let root = PathBuf::from("/p");
            let body = "\n    Used in:\n    - b.py\n    ";
            assert!(is_generated_only(body));
            assert_eq!(clean_body(body, &ctx("    ", &root)), CleanOutcome::RemoveDocstring);
        }

        #[test]
        fn no_block_is_unchanged() {
            let root = PathBuf::from("/p");
            assert_eq!(
                clean_body("Just a summary.", &ctx("", &root)),
                CleanOutcome::Unchanged
            );
        }

        #[test]
        fn trailing_content_survives_clean() {
            let root = PathBuf::from("/p");
            let body = "Summary.\n\nUsed in:\n- a.py\n\nSee also.\n";
            match clean_body(body, &ctx("", &root)) {
                CleanOutcome::Cleaned(cleaned) => {
                    assert_eq!(cleaned, "Summary.\n\nSee also.\n");
                }
                other => panic!("expected Cleaned, got {:?}", other),
            }
        }

        #[test]
        fn hand_written_docstring_is_not_generated_only() {
            assert!(!is_generated_only("Summary.\n\nUsed in:\n- a.py\n"));
            assert!(!is_generated_only("No block here."));
        }
    }

    mod emit_tests {
        use super::*;

        const TRIPLE_DOUBLE: EmitStyle = EmitStyle {
            quote: QuoteKind::TripleDouble,
            raw: false,
        };

        #[test]
        fn plain_body_keeps_original_style() {
            assert_eq!(
                emit_literal("Summary.", TRIPLE_DOUBLE).unwrap(),
                "\"\"\"Summary.\"\"\""
            );
        }

        #[test]
        fn collision_switches_to_alternate_triple() {
            let body = "Has a \"\"\" sentinel inside";
            let emitted = emit_literal(body, TRIPLE_DOUBLE).unwrap();
            assert_eq!(emitted, format!("'''{}'''", body));
        }

        #[test]
        fn double_collision_escapes() {
            let body = "both \"\"\" and ''' inside";
            let emitted = emit_literal(body, TRIPLE_DOUBLE).unwrap();
            assert!(scans_cleanly(&emitted));
            assert!(emitted.starts_with("\"\"\"") || emitted.starts_with("'''"));
            assert!(emitted.contains("\\\"") || emitted.contains("\\'"));
        }

        #[test]
        fn multi_line_upgrades_single_quotes() {
            let style = EmitStyle {
                quote: QuoteKind::Double,
                raw: false,
            };
            let emitted = emit_literal("line one\nline two", style).unwrap();
            assert!(emitted.starts_with("\"\"\""));
        }

        #[test]
        fn single_line_keeps_single_quote_style() {
            let style = EmitStyle {
                quote: QuoteKind::Single,
                raw: false,
            };
            assert_eq!(emit_literal("short", style).unwrap(), "'short'");
        }

        #[test]
        fn raw_prefix_preserved_without_backslashes() {
            let style = EmitStyle {
                quote: QuoteKind::TripleDouble,
                raw: true,
            };
            assert_eq!(emit_literal("plain", style).unwrap(), "r\"\"\"plain\"\"\"");
        }

        #[test]
        fn raw_prefix_kept_when_backslashes_present() {
            let style = EmitStyle {
                quote: QuoteKind::TripleDouble,
                raw: true,
            };
            let emitted = emit_literal("pattern \\d+", style).unwrap();
            assert_eq!(emitted, "r\"\"\"pattern \\d+\"\"\"");
        }

        #[test]
        fn trailing_backslash_is_handled() {
            let emitted = emit_literal("ends with \\", TRIPLE_DOUBLE).unwrap();
            assert!(scans_cleanly(&emitted));
        }

        #[test]
        fn scan_rejects_embedded_terminator() {
            assert!(!scans_cleanly("\"\"\"a\"\"\"b\"\"\""));
            assert!(scans_cleanly("\"\"\"a'''b\"\"\""));
            assert!(!scans_cleanly("'multi\nline'"));
        }
    }
}
