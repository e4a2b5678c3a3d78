//! Post-processing: deterministic cleanup of generated page text.
//!
//! Grounding-capable OCR models interleave their Markdown with detection
//! spans (`<|ref|>label<|/ref|><|det|>[[x0, y0, x1, y1]]<|/det|>`) that mean
//! nothing to a reader. They also emit LaTeX macros that most renderers lack.
//! The rules below remove both and then apply the usual whitespace hygiene.
//!
//! ## Rule Order
//!
//! Grounding spans go first so the later whitespace rules see the blank lines
//! they leave behind. Fences are stripped before line endings are normalised
//! because the fence regex expects `\n`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to one page of raw backend output.
///
/// 1. Remove grounding/detection spans
/// 2. Replace unsupported LaTeX colon-equals macros
/// 3. Strip outer markdown fences
/// 4. Normalise line endings (CRLF → LF)
/// 5. Trim trailing whitespace per line
/// 6. Collapse 3+ consecutive blank lines down to 2
/// 7. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 8. End with exactly one newline
pub fn clean_page_text(input: &str) -> String {
    let s = strip_grounding_spans(input);
    let s = replace_latex_macros(&s);
    let s = strip_markdown_fences(&s);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Grounding spans ──────────────────────────────────────────────────

static RE_GROUNDING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<\|ref\|>.*?<\|/ref\|>\s*<\|det\|>.*?<\|/det\|>[ \t]*\r?\n?").unwrap()
});

static RE_STRAY_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\|/?(?:ref|det|grounding)\|>").unwrap());

fn strip_grounding_spans(input: &str) -> String {
    let s = RE_GROUNDING.replace_all(input, "");
    RE_STRAY_MARKERS.replace_all(&s, "").into_owned()
}

// ── Rule 2: LaTeX macros ─────────────────────────────────────────────────────

fn replace_latex_macros(input: &str) -> String {
    input.replace("\\coloneqq", ":=").replace("\\eqqcolon", "=:")
}

// ── Rule 3: Outer fences ─────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 4–6: Whitespace ─────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").into_owned()
}

// ── Rule 7: Invisible Unicode ────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 8: Final newline ────────────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grounding_spans_are_removed() {
        let input = "<|ref|>title<|/ref|><|det|>[[10, 20, 300, 60]]<|/det|>\n# Annual Report\n\
                     <|ref|>text<|/ref|><|det|>[[10, 80, 500, 200]]<|/det|>\nRevenue grew.";
        let out = strip_grounding_spans(input);
        assert!(!out.contains("<|"));
        assert!(out.contains("# Annual Report"));
        assert!(out.contains("Revenue grew."));
    }

    #[test]
    fn stray_markers_are_removed() {
        assert_eq!(strip_grounding_spans("<|grounding|>Hello"), "Hello");
    }

    #[test]
    fn latex_macros_replaced() {
        assert_eq!(replace_latex_macros(r"$x \coloneqq y \eqqcolon z$"), "$x := y =: z$");
    }

    #[test]
    fn fences_stripped() {
        assert_eq!(strip_markdown_fences("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_markdown_fences("```\n# Hello\n```"), "# Hello");
        assert_eq!(strip_markdown_fences("# Hello"), "# Hello");
    }

    #[test]
    fn whitespace_rules() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(trim_trailing_whitespace("  a   \nb  "), "  a\nb");
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\n\nb");
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}c"), "abc");
    }

    #[test]
    fn final_newline() {
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn full_pipeline() {
        let input = "```markdown\r\n<|ref|>title<|/ref|><|det|>[[1, 2, 3, 4]]<|/det|>\r\n# Title   \r\n\r\n\r\n\r\n\r\n$a \\coloneqq b$\u{200B}\r\n```";
        let out = clean_page_text(input);
        assert!(out.starts_with("# Title\n"), "got: {out:?}");
        assert!(out.contains("$a := b$"));
        assert!(!out.contains("\n\n\n\n"));
        assert!(out.ends_with("$\n"));
    }
}
