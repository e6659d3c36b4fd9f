//! Lexical `<img>` tag scanning, attribute extraction, and `alt` rewriting.
//!
//! Offsets crossing this module's API are character offsets into the
//! document text. The scanner is a single regular expression over raw text;
//! a `>` inside a quoted attribute value ends the match early.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use crate::error::{AltError, AltResult};

static IMG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img[^>]*>").expect("img tag pattern"));

static SRC_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)src\s*=\s*["']([^"']*)["']"#).expect("src pattern"));

static ALT_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)alt\s*=\s*["']([^"']*)["']"#).expect("alt pattern"));

// Rewrites need the whole quoted value and a real attribute boundary, so
// `alt="A dog's face"` is replaced whole and `data-alt` is left alone.
static ALT_REWRITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)[ \t\r\n\f]alt\s*=\s*(?:"[^"]*"|'[^']*')"#).expect("alt rewrite pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl TagSpan {
    /// Inclusive on both ends: a cursor just past the closing `>` still counts.
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset <= self.end
    }

    pub fn attr(&self, attr: Attr) -> Option<String> {
        extract_attr(&self.text, attr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr {
    Src,
    Alt,
}

impl Attr {
    pub fn name(self) -> &'static str {
        match self {
            Attr::Src => "src",
            Attr::Alt => "alt",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Attr::Src => &*SRC_ATTR_RE,
            Attr::Alt => &*ALT_ATTR_RE,
        }
    }
}

/// Every `<img ...>` span in document order.
pub fn scan(text: &str) -> Vec<TagSpan> {
    let mut counter = CharCounter::new(text);
    IMG_TAG_RE
        .find_iter(text)
        .map(|m| {
            let start = counter.advance_to(m.start());
            TagSpan {
                text: m.as_str().to_string(),
                start,
                end: start + m.as_str().chars().count(),
            }
        })
        .collect()
}

/// The first tag whose span contains `offset`.
pub fn locate(text: &str, offset: usize) -> Option<TagSpan> {
    scan(text).into_iter().find(|span| span.contains(offset))
}

/// `None` when the attribute is absent; `Some("")` for an empty value.
pub fn extract_attr(tag_text: &str, attr: Attr) -> Option<String> {
    attr.pattern()
        .captures(tag_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteResult {
    pub old_tag_text: String,
    pub new_tag_text: String,
    pub range: Range<usize>,
}

impl RewriteResult {
    pub fn is_noop(&self) -> bool {
        self.old_tag_text == self.new_tag_text
    }

    /// Splices the new tag into `text`, which must still hold the old tag at `range`.
    pub fn apply(&self, text: &str) -> AltResult<String> {
        let start = char_to_byte(text, self.range.start).ok_or_else(AltError::tag_vanished)?;
        let end = start + self.old_tag_text.len();
        if text.get(start..end) != Some(self.old_tag_text.as_str()) {
            return Err(AltError::tag_vanished());
        }
        let mut out = String::with_capacity(text.len() + self.new_tag_text.len());
        out.push_str(&text[..start]);
        out.push_str(&self.new_tag_text);
        out.push_str(&text[end..]);
        Ok(out)
    }
}

/// Re-locates `original_tag_text` in `current` by first occurrence and
/// computes its replacement with `alt` set to `new_alt`.
///
/// `new_alt` is inserted verbatim; quotes and angle brackets are not escaped.
pub fn rewrite_alt(current: &str, original_tag_text: &str, new_alt: &str) -> AltResult<RewriteResult> {
    if original_tag_text.is_empty() {
        return Err(AltError::tag_vanished());
    }
    let byte_start = current
        .find(original_tag_text)
        .ok_or_else(AltError::tag_vanished)?;
    let start = current[..byte_start].chars().count();
    Ok(build_result(original_tag_text, start, new_alt))
}

/// Like [`rewrite_alt`], but prefers the span's original offset when the tag
/// text is still there, so an identical tag earlier in the document is not
/// edited by mistake.
pub fn rewrite_alt_at(current: &str, span: &TagSpan, new_alt: &str) -> AltResult<RewriteResult> {
    let anchored = char_to_byte(current, span.start)
        .map(|byte| current[byte..].starts_with(span.text.as_str()))
        .unwrap_or(false);
    if anchored && !span.text.is_empty() {
        return Ok(build_result(&span.text, span.start, new_alt));
    }
    tracing::debug!(start = span.start, "tag moved since it was located; searching by text");
    rewrite_alt(current, &span.text, new_alt)
}

fn build_result(tag_text: &str, start: usize, new_alt: &str) -> RewriteResult {
    RewriteResult {
        old_tag_text: tag_text.to_string(),
        new_tag_text: with_alt(tag_text, new_alt),
        range: start..start + tag_text.chars().count(),
    }
}

/// Replaces the first `alt` attribute in place or inserts one immediately
/// before the closing `>`. Output is double-quoted.
pub fn with_alt(tag_text: &str, new_alt: &str) -> String {
    let attribute = format!("alt=\"{new_alt}\"");

    if let Some(m) = ALT_REWRITE_RE.find(tag_text) {
        // Skip the single ASCII whitespace byte the match starts with.
        let start = m.start() + 1;
        let mut out = String::with_capacity(tag_text.len() + new_alt.len());
        out.push_str(&tag_text[..start]);
        out.push_str(&attribute);
        out.push_str(&tag_text[m.end()..]);
        return out;
    }

    match tag_text.strip_suffix('>') {
        Some(body) => format!("{body} {attribute}>"),
        None => format!("{tag_text} {attribute}"),
    }
}

/// Byte index of the `offset`-th character; `text.len()` for one past the end.
pub fn char_to_byte(text: &str, offset: usize) -> Option<usize> {
    text.char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .nth(offset)
}

struct CharCounter<'a> {
    text: &'a str,
    byte: usize,
    chars: usize,
}

impl<'a> CharCounter<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            byte: 0,
            chars: 0,
        }
    }

    // Byte positions must be non-decreasing across calls.
    fn advance_to(&mut self, byte: usize) -> usize {
        self.chars += self.text[self.byte..byte].chars().count();
        self.byte = byte;
        self.chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_finds_tag_around_offset() {
        let text = r#"<p>intro</p><img src="a.png"><p>outro</p>"#;
        let span = locate(text, 15).unwrap();
        assert_eq!(span.text, r#"<img src="a.png">"#);
        assert_eq!(span.start, 12);
        assert_eq!(span.end, 29);
    }

    #[test]
    fn locate_is_inclusive_at_both_ends() {
        let text = r#"ab<img src="a.png">cd"#;
        let span = locate(text, 2).unwrap();
        assert_eq!(locate(text, span.end), Some(span.clone()));
        assert_eq!(locate(text, 1), None);
        assert_eq!(locate(text, span.end + 1), None);
    }

    #[test]
    fn locate_returns_none_in_gap_between_tags() {
        let text = r#"<img src="a.png"> gap text <img src="b.png">"#;
        let tags = scan(text);
        assert_eq!(tags.len(), 2);
        for offset in tags[0].end + 1..tags[1].start {
            assert_eq!(locate(text, offset), None, "offset {offset}");
        }
        assert_eq!(locate(text, tags[1].start).unwrap().text, tags[1].text);
    }

    #[test]
    fn locate_is_case_insensitive() {
        let text = r#"<IMG SRC="a.png">"#;
        assert!(locate(text, 3).is_some());
    }

    #[test]
    fn locate_past_end_of_document_is_none() {
        assert_eq!(locate(r#"<img src="a.png">"#, 500), None);
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let text = r#"héllo wörld <img src="ü.png">"#;
        let span = locate(text, 14).unwrap();
        assert_eq!(span.start, 12);
        assert_eq!(span.end, 12 + span.text.chars().count());
    }

    #[test]
    fn quoted_gt_truncates_match() {
        let text = r#"<img alt="a > b" src="x.png">"#;
        let span = locate(text, 0).unwrap();
        assert_eq!(span.text, r#"<img alt="a >"#);
    }

    #[test]
    fn extract_attr_handles_quotes_and_absence() {
        assert_eq!(
            extract_attr(r#"<img src="a.png" alt="X">"#, Attr::Alt).as_deref(),
            Some("X")
        );
        assert_eq!(
            extract_attr("<img src='b.png'>", Attr::Src).as_deref(),
            Some("b.png")
        );
        assert_eq!(
            extract_attr(r#"<img SRC = "c.png">"#, Attr::Src).as_deref(),
            Some("c.png")
        );
        assert_eq!(extract_attr(r#"<img src="a.png">"#, Attr::Alt), None);
    }

    #[test]
    fn empty_alt_is_distinct_from_missing() {
        assert_eq!(
            extract_attr(r#"<img src="a.png" alt="">"#, Attr::Alt).as_deref(),
            Some("")
        );
    }

    #[test]
    fn with_alt_inserts_before_closing_bracket() {
        assert_eq!(
            with_alt(r#"<img src="a.png">"#, "A cat"),
            r#"<img src="a.png" alt="A cat">"#
        );
    }

    #[test]
    fn with_alt_inserts_before_final_bracket_of_self_closing_tag() {
        assert_eq!(
            with_alt(r#"<img src="a.png" />"#, "A cat"),
            r#"<img src="a.png" / alt="A cat">"#
        );
    }

    #[test]
    fn with_alt_replaces_value_containing_apostrophe() {
        assert_eq!(
            with_alt(r#"<img alt="Don't panic" src="a.png">"#, "new"),
            r#"<img alt="new" src="a.png">"#
        );
    }

    #[test]
    fn with_alt_ignores_data_alt() {
        assert_eq!(
            with_alt(r#"<img data-alt="real" src="a.png">"#, "x"),
            r#"<img data-alt="real" src="a.png" alt="x">"#
        );
        assert_eq!(
            with_alt(r#"<img data-alt="real" alt="old">"#, "x"),
            r#"<img data-alt="real" alt="x">"#
        );
    }

    #[test]
    fn rewrite_with_apostrophe_is_idempotent() {
        let doc = r#"<p><img src="a.png"></p>"#;
        let first = rewrite_alt(doc, r#"<img src="a.png">"#, "A dog's face").unwrap();
        let doc = first.apply(doc).unwrap();
        assert_eq!(doc, r#"<p><img src="a.png" alt="A dog's face"></p>"#);

        let second = rewrite_alt(&doc, &first.new_tag_text, "A dog's face").unwrap();
        assert!(second.is_noop());
        assert_eq!(second.apply(&doc).unwrap(), doc);
    }

    #[test]
    fn with_alt_replaces_single_quoted_value_with_double_quotes() {
        assert_eq!(
            with_alt(r#"<img alt='old' src="a.png" class="hero">"#, "new"),
            r#"<img alt="new" src="a.png" class="hero">"#
        );
    }

    #[test]
    fn with_alt_inserts_text_verbatim() {
        assert_eq!(
            with_alt(r#"<img src="a.png">"#, r#"say "hi" <b> $1"#),
            r#"<img src="a.png" alt="say "hi" <b> $1">"#
        );
    }

    #[test]
    fn rewrite_reports_range_in_current_text() {
        let text = r#"<div><img src="a.png"></div>"#;
        let result = rewrite_alt(text, r#"<img src="a.png">"#, "A red bicycle.").unwrap();
        assert_eq!(result.range, 5..22);
        assert_eq!(
            result.apply(text).unwrap(),
            r#"<div><img src="a.png" alt="A red bicycle."></div>"#
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        let doc = r#"<p><img src="a.png"></p>"#;
        let first = rewrite_alt(doc, r#"<img src="a.png">"#, "V").unwrap();
        let doc = first.apply(doc).unwrap();
        let second = rewrite_alt(&doc, &first.new_tag_text, "V").unwrap();
        assert!(second.is_noop());
        assert_eq!(second.apply(&doc).unwrap(), doc);
    }

    #[test]
    fn rewrite_fails_when_tag_vanished() {
        let err = rewrite_alt("<p>no images</p>", r#"<img src="a.png">"#, "x").unwrap_err();
        assert_eq!(err.code(), "tag_not_found");
    }

    #[test]
    fn rewrite_at_prefers_original_offset_for_duplicate_tags() {
        let text = r#"<img src="a.png"><br><img src="a.png">"#;
        let second = locate(text, 25).unwrap();
        assert_eq!(second.start, 21);

        let anchored = rewrite_alt_at(text, &second, "two").unwrap();
        assert_eq!(anchored.range, 21..38);
        assert_eq!(
            anchored.apply(text).unwrap(),
            r#"<img src="a.png"><br><img src="a.png" alt="two">"#
        );

        let first_match = rewrite_alt(text, &second.text, "two").unwrap();
        assert_eq!(first_match.range, 0..17);
    }

    #[test]
    fn rewrite_at_follows_tag_shifted_by_earlier_edit() {
        let before = r#"<p>x</p><img src="a.png">"#;
        let span = locate(before, 10).unwrap();
        let after = r#"<h1>title</h1><p>x</p><img src="a.png">"#;
        let result = rewrite_alt_at(after, &span, "moved").unwrap();
        assert_eq!(result.range.start, 22);
        assert_eq!(
            result.apply(after).unwrap(),
            r#"<h1>title</h1><p>x</p><img src="a.png" alt="moved">"#
        );
    }

    #[test]
    fn apply_rejects_text_that_no_longer_matches() {
        let text = r#"<img src="a.png">"#;
        let result = rewrite_alt(text, text, "x").unwrap();
        assert!(result.apply("<p>changed</p>").is_err());
    }

    #[test]
    fn char_to_byte_handles_multibyte_and_end() {
        let text = "aé<";
        assert_eq!(char_to_byte(text, 0), Some(0));
        assert_eq!(char_to_byte(text, 2), Some(3));
        assert_eq!(char_to_byte(text, 3), Some(4));
        assert_eq!(char_to_byte(text, 4), None);
    }
}
