//! PDF text cleaning.
//!
//! Extracted page text arrives full of artifacts: broken UTF-8 from font
//! encodings, replacement characters, zero-width joiners, dotted leader
//! lines from tables of contents, and page-number headers. [`clean`]
//! normalizes a raw byte buffer in place and guarantees the result is
//! valid UTF-8 (possibly empty). After cleaning, pages that look like a
//! bibliography or a back-of-book index are dropped entirely so they
//! never pollute the search corpus.

use regex::Regex;
use std::sync::LazyLock;

/// Pages shorter than this after cleaning are too small to classify.
const CLASSIFY_MIN_BYTES: usize = 100;

/// Cleaned text shorter than this is discarded as noise.
const MIN_MEANINGFUL_BYTES: usize = 3;

/// Dash/dot runs at least this long collapse to a single separator.
const LEADER_RUN_MIN: usize = 10;

/// Citation year: `(1998)` or `2004.`
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((19|20)\d{2}\)|\b(19|20)\d{2}\.").unwrap());

/// DOI reference line: `doi.org/...` or a `DOI:`/`doi:` prefix.
static DOI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)doi\.org/|doi:\s*10\.").unwrap());

/// Cleans extracted PDF text in place, truncating `buf` to the cleaned
/// length. The input need not be valid UTF-8; the output always is.
///
/// When `remove_urls` is set, `http://`/`https://` spans are excised up
/// to the next whitespace or closing `)`, `]`, `>`.
///
/// Reference and index pages are detected after cleaning and replaced
/// with the empty string — see [`is_reference_or_index_page`].
pub fn clean(buf: &mut Vec<u8>, remove_urls: bool) {
    let new_len = clean_in_place(buf.as_mut_slice(), remove_urls);
    buf.truncate(new_len);

    if buf.len() >= CLASSIFY_MIN_BYTES {
        if let Ok(text) = std::str::from_utf8(buf) {
            if is_reference_or_index_page(text) {
                buf.clear();
            }
        }
    }
}

/// Convenience wrapper over [`clean`] for callers holding a `&str`.
pub fn clean_text(text: &str, remove_urls: bool) -> String {
    let mut buf = text.as_bytes().to_vec();
    clean(&mut buf, remove_urls);
    String::from_utf8(buf).unwrap_or_default()
}

fn is_continuation(b: u8) -> bool {
    (0x80..=0xBF).contains(&b)
}

/// Length of the valid UTF-8 sequence starting at `pos`, or `None` if the
/// lead byte opens an invalid sequence (overlong, surrogate, out of range,
/// truncated) or a control character other than `\t`, `\n`, `\r`.
fn utf8_sequence_len(text: &[u8], pos: usize) -> Option<usize> {
    let len = text.len();
    let b = text[pos];

    // ASCII
    if b <= 0x7F {
        if b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r' {
            return None;
        }
        return Some(1);
    }

    // 2-byte (C2-DF; C0/C1 would be overlong)
    if (0xC2..=0xDF).contains(&b) {
        if pos + 1 < len && is_continuation(text[pos + 1]) {
            return Some(2);
        }
        return None;
    }

    // 3-byte (E0-EF)
    if (0xE0..=0xEF).contains(&b) {
        if pos + 2 < len {
            let (b2, b3) = (text[pos + 1], text[pos + 2]);
            let valid = match b {
                0xE0 => (0xA0..=0xBF).contains(&b2) && is_continuation(b3),
                0xED => (0x80..=0x9F).contains(&b2) && is_continuation(b3),
                _ => is_continuation(b2) && is_continuation(b3),
            };
            if valid {
                return Some(3);
            }
        }
        return None;
    }

    // 4-byte (F0-F4; above F4 is past U+10FFFF)
    if (0xF0..=0xF4).contains(&b) {
        if pos + 3 < len {
            let (b2, b3, b4) = (text[pos + 1], text[pos + 2], text[pos + 3]);
            let valid = match b {
                0xF0 => (0x90..=0xBF).contains(&b2) && is_continuation(b3) && is_continuation(b4),
                0xF4 => (0x80..=0x8F).contains(&b2) && is_continuation(b3) && is_continuation(b4),
                _ => is_continuation(b2) && is_continuation(b3) && is_continuation(b4),
            };
            if valid {
                return Some(4);
            }
        }
        return None;
    }

    None
}

/// Byte length of a known extraction artifact at `pos`: U+FFFD, the
/// zero-width space/ZWNJ/ZWJ family, or the word joiner.
fn artifact_len(text: &[u8], pos: usize) -> Option<usize> {
    if pos + 2 >= text.len() {
        return None;
    }
    match (text[pos], text[pos + 1], text[pos + 2]) {
        (0xEF, 0xBF, 0xBD) => Some(3),                // U+FFFD
        (0xE2, 0x80, 0x8B..=0x8D) => Some(3),         // U+200B..U+200D
        (0xE2, 0x81, 0xA0) => Some(3),                // U+2060
        _ => None,
    }
}

/// Scans a run of `-`/`.` marks starting at `pos`, tolerating whitespace
/// between marks. Returns the position just past the last mark and the
/// number of marks seen.
fn leader_run(text: &[u8], pos: usize) -> (usize, usize) {
    let mut i = pos;
    let mut end = pos;
    let mut marks = 0usize;
    while i < text.len() {
        let b = text[i];
        if b == b'-' || b == b'.' {
            marks += 1;
            i += 1;
            end = i;
        } else if b.is_ascii_whitespace() {
            i += 1;
        } else {
            break;
        }
    }
    (end, marks)
}

/// Single left-to-right pass with read/write cursors. The write cursor
/// never overtakes the read cursor, so the rewrite is safely in place.
fn clean_in_place(text: &mut [u8], remove_urls: bool) -> usize {
    let len = text.len();
    let mut read = 0usize;
    let mut write = 0usize;
    let mut prev_was_space = true; // trims leading whitespace
    let mut in_url = false;

    // Leading page-number artifact: up to 10 digit/whitespace characters.
    if len > 0 && text[0].is_ascii_digit() {
        let mut skip = 0;
        while skip < len
            && skip < 10
            && (text[skip].is_ascii_digit() || text[skip].is_ascii_whitespace())
        {
            skip += 1;
        }
        if skip > 0 && skip < 10 {
            read = skip;
        }
    }

    // Leading dash/dot runs.
    while read < len && (text[read] == b'-' || text[read] == b'.') {
        read += 1;
    }

    while read < len {
        let c = text[read];

        if let Some(skip) = artifact_len(text, read) {
            read += skip;
            continue;
        }

        if remove_urls {
            if !in_url
                && c == b'h'
                && (text[read..].starts_with(b"http://") || text[read..].starts_with(b"https://"))
            {
                in_url = true;
            }
            if in_url {
                if c.is_ascii_whitespace() || c == b')' || c == b']' || c == b'>' {
                    in_url = false;
                    if !prev_was_space {
                        text[write] = b' ';
                        write += 1;
                        prev_was_space = true;
                    }
                }
                read += 1;
                continue;
            }
        }

        // Dotted leaders and horizontal rules collapse to one separator.
        if c == b'-' || c == b'.' {
            let (run_end, marks) = leader_run(text, read);
            if marks >= LEADER_RUN_MIN {
                read = run_end;
                if !prev_was_space {
                    text[write] = b' ';
                    write += 1;
                    prev_was_space = true;
                }
                continue;
            }
        }

        match utf8_sequence_len(text, read) {
            Some(n) => {
                if c.is_ascii_whitespace() {
                    // Paragraph break: exactly two adjacent newlines survive.
                    if c == b'\n' && read + 1 < len && text[read + 1] == b'\n' {
                        if write > 0 && text[write - 1] == b' ' {
                            write -= 1;
                        }
                        if write > 0 && text[write - 1] != b'\n' {
                            text[write] = b'\n';
                            text[write + 1] = b'\n';
                            write += 2;
                        }
                        prev_was_space = true;
                        read += 2;
                        continue;
                    }

                    if !prev_was_space {
                        text[write] = if c == b'\n' { b'\n' } else { b' ' };
                        write += 1;
                        prev_was_space = true;
                    } else if c == b'\n' && write > 0 && text[write - 1] == b' ' {
                        // A newline inside a collapsed run keeps the line
                        // structure that the page classifier depends on.
                        text[write - 1] = b'\n';
                    }
                    read += 1;
                    continue;
                }

                // Standalone artifact punctuation between spaces.
                if n == 1 && prev_was_space && matches!(c, b'|' | b'~' | b'^' | b'`') {
                    let next_is_space = read + 1 >= len || text[read + 1].is_ascii_whitespace();
                    if next_is_space {
                        read += 1;
                        continue;
                    }
                }

                for _ in 0..n {
                    text[write] = text[read];
                    write += 1;
                    read += 1;
                }
                prev_was_space = false;
            }
            None => {
                // Invalid sequence: drop the lead byte and resync.
                read += 1;
            }
        }
    }

    // Trailing whitespace and leader marks.
    while write > 0 {
        let b = text[write - 1];
        if b.is_ascii_whitespace() || b == b'-' || b == b'.' {
            write -= 1;
        } else {
            break;
        }
    }

    if write < MIN_MEANINGFUL_BYTES {
        0
    } else {
        write
    }
}

// ---------------------------------------------------------------------------
// Reference / index page detection
// ---------------------------------------------------------------------------

/// Minimum non-empty lines before the reference heuristics apply.
const REFERENCE_MIN_LINES: usize = 3;

/// Minimum non-empty lines before the index heuristics apply.
const INDEX_MIN_LINES: usize = 5;

/// Classifies a cleaned page as a bibliography/citation list or a
/// back-of-book index.
///
/// A hard signal (a telltale first line) decides alone; otherwise two
/// soft signals on the same category must agree. Soft signals are ratios
/// over the page's non-empty lines: URL-bearing lines, DOIs, `et al.`,
/// citation years for references; short capitalized digit-bearing lines
/// and indentation for indexes.
pub fn is_reference_or_index_page(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let total = lines.len();
    if total == 0 {
        return false;
    }

    let first = lines[0].trim();
    let hard_reference =
        matches!(first, "References" | "REFERENCES" | "Bibliography" | "BIBLIOGRAPHY");
    let hard_index = matches!(first, "Index" | "INDEX");

    let mut url_lines = 0usize;
    let mut doi_lines = 0usize;
    let mut etal_lines = 0usize;
    let mut year_lines = 0usize;
    let mut short40_lines = 0usize;
    let mut short20_lines = 0usize;
    let mut capital_lines = 0usize;
    let mut digit_lines = 0usize;
    let mut indented_lines = 0usize;

    for line in &lines {
        let t = line.trim();
        if t.contains("http://") || t.contains("https://") || t.contains("www.") {
            url_lines += 1;
        }
        if DOI_RE.is_match(t) {
            doi_lines += 1;
        }
        if t.contains("et al.") {
            etal_lines += 1;
        }
        if YEAR_RE.is_match(t) {
            year_lines += 1;
        }
        let chars = t.chars().count();
        if chars < 40 {
            short40_lines += 1;
        }
        if chars < 20 {
            short20_lines += 1;
        }
        if t.chars().next().is_some_and(|c| c.is_uppercase()) {
            capital_lines += 1;
        }
        if t.bytes().any(|b| b.is_ascii_digit()) {
            digit_lines += 1;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            indented_lines += 1;
        }
    }

    let ratio = |n: usize| n as f64 / total as f64;

    let mut reference_signals = 0;
    if ratio(url_lines) > 0.30 {
        reference_signals += 1;
    }
    if ratio(doi_lines) > 0.20 {
        reference_signals += 1;
    }
    if ratio(etal_lines) > 0.20 {
        reference_signals += 1;
    }
    if ratio(year_lines) > 0.40 {
        reference_signals += 1;
    }

    let mut index_signals = 0;
    if ratio(short40_lines) > 0.70 && ratio(capital_lines) > 0.60 && ratio(digit_lines) > 0.50 {
        index_signals += 1;
    }
    if ratio(short20_lines) > 0.50 && ratio(capital_lines) > 0.70 && ratio(digit_lines) > 0.40 {
        index_signals += 1;
    }
    if ratio(indented_lines) > 0.20 && ratio(digit_lines) > 0.50 && ratio(capital_lines) > 0.50 {
        index_signals += 1;
    }

    if total >= REFERENCE_MIN_LINES && (hard_reference || reference_signals >= 2) {
        return true;
    }
    if total >= INDEX_MIN_LINES && (hard_index || index_signals >= 2) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_controls_artifacts_urls_and_leaders() {
        let input = b"\x01Hello\xEF\xBF\xBDworld   http://x.y)\n\n\nfoo---------- bar";
        let mut buf = input.to_vec();
        clean(&mut buf, true);
        assert_eq!(buf, b"Hello world\n\nfoo bar");
        assert_eq!(buf.len(), 20);
        assert!(std::str::from_utf8(&buf).is_ok());
    }

    #[test]
    fn control_bytes_are_dropped() {
        let mut buf = b"a\x00b\x07c\x1Fd\te\nf".to_vec();
        clean(&mut buf, false);
        for &b in &buf {
            assert!(b >= 0x20 || b == b'\t' || b == b'\n' || b == b'\r');
        }
        assert_eq!(buf, b"abcd e\nf");
    }

    #[test]
    fn drops_zero_width_characters() {
        let out = clean_text("zero\u{200B}width\u{200C}and\u{200D}joiner\u{2060}gone", false);
        assert_eq!(out, "zerowidthandjoinergone");
    }

    #[test]
    fn rejects_overlong_surrogate_and_out_of_range_sequences() {
        // Overlong "A" (E0 80 80), surrogate half (ED A0 80), lead byte F5.
        let mut buf = b"ok \xE0\x80\x80mid \xED\xA0\x80also \xF5\x8F end".to_vec();
        clean(&mut buf, false);
        let s = std::str::from_utf8(&buf).unwrap();
        assert_eq!(s, "ok mid also end");
    }

    #[test]
    fn keeps_valid_multibyte_text() {
        let out = clean_text("naïve résumé — 読める", false);
        assert_eq!(out, "naïve résumé — 読める");
    }

    #[test]
    fn idempotent_on_cleaned_output() {
        let once = clean_text("  messy\ttext  with\n\n\nbreaks | and ~ junk  ", false);
        let twice = clean_text(&once, false);
        assert_eq!(once, twice);
    }

    #[test]
    fn strips_leading_page_number() {
        let out = clean_text("42 The actual chapter text begins here", false);
        assert_eq!(out, "The actual chapter text begins here");
    }

    #[test]
    fn preserves_paragraph_breaks_only() {
        let out = clean_text("first paragraph\n\nsecond paragraph\n\n\n\nthird", false);
        assert_eq!(out, "first paragraph\n\nsecond paragraph\n\nthird");
    }

    #[test]
    fn drops_lone_punctuation_between_spaces() {
        let out = clean_text("left | right ~ end", false);
        assert_eq!(out, "left right end");
    }

    #[test]
    fn keeps_attached_punctuation() {
        let out = clean_text("a|b and c^2 stay", false);
        assert_eq!(out, "a|b and c^2 stay");
    }

    #[test]
    fn keeps_urls_when_not_removing() {
        let out = clean_text("see https://example.com/page for details", false);
        assert_eq!(out, "see https://example.com/page for details");
    }

    #[test]
    fn too_short_becomes_empty() {
        assert_eq!(clean_text("ab", false), "");
        assert_eq!(clean_text("  .  ", false), "");
    }

    #[test]
    fn tolerates_sheared_trailing_sequence() {
        // A multi-byte character cut by byte truncation loses its tail.
        let mut buf = "truncated text é".as_bytes().to_vec();
        buf.truncate(buf.len() - 1); // shear the é
        clean(&mut buf, false);
        let s = std::str::from_utf8(&buf).unwrap();
        assert_eq!(s, "truncated text");
    }

    #[test]
    fn reference_page_is_zeroed() {
        let mut page = String::from("References\n\n");
        for i in 0..9 {
            page.push_str(&format!(
                "Author{i}, A. et al. (2021). A study of something number {i}.\n\n"
            ));
        }
        let out = clean_text(&page, false);
        assert_eq!(out, "");
    }

    #[test]
    fn soft_reference_signals_require_two() {
        // Years alone (one soft signal) must not zero a page.
        let mut page = String::from("Chapter overview\n\n");
        for i in 0..9 {
            page.push_str(&format!("The war ended in (194{i}) after long negotiation efforts concluded in treaty talks.\n\n"));
        }
        let out = clean_text(&page, false);
        assert!(!out.is_empty());
    }

    #[test]
    fn index_page_is_zeroed() {
        let mut page = String::from("Index\n\n");
        for i in 0..12 {
            page.push_str(&format!("Topic{i}, {i}{i}\n\n"));
        }
        let out = clean_text(&page, false);
        assert_eq!(out, "");
    }

    #[test]
    fn short_pages_skip_classification() {
        // Under 100 bytes the classifier never runs, even for "Index".
        let out = clean_text("Index\n\nApples, 3\n\nBears, 7\n\nCats, 9\n\nDogs, 11", false);
        assert!(!out.is_empty());
    }

    #[test]
    fn prose_page_survives_classification() {
        let page = "A long discussion of the subject matter follows.\n\n".repeat(6);
        let out = clean_text(&page, false);
        assert!(out.len() > 100);
    }
}
