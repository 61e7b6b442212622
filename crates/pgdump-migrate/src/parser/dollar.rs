//! Dollar-quoted string scanning.
//!
//! PostgreSQL dumps wrap function bodies in dollar quotes (`$$...$$`,
//! `$body$...$body$`), and a `;` inside such a region must not end the
//! statement. [`scan`] finds every dollar-quoted region in a piece of text;
//! [`DollarTracker`] maintains the same information incrementally as the
//! parser appends lines.

use serde::{Deserialize, Serialize};

/// A dollar-quoted region located in a piece of SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DollarQuoteBlock {
    /// The delimiter including both dollar signs, e.g. `$$` or `$body$`.
    pub tag: String,

    /// Byte offset of the opening delimiter's first `$`.
    pub start_offset: usize,

    /// Byte offset one past the closing delimiter, `None` while unclosed.
    pub end_offset: Option<usize>,

    /// Whether the closing delimiter was found.
    pub is_complete: bool,
}

impl DollarQuoteBlock {
    /// Whether `offset` falls inside this region, delimiters included.
    /// An unclosed region covers everything from its start onward.
    pub fn covers(&self, offset: usize) -> bool {
        offset >= self.start_offset && self.end_offset.map_or(true, |end| offset < end)
    }
}

/// Try to read a dollar-quote delimiter starting at byte `at`.
///
/// A delimiter is `$` + optional tag + `$` where the tag looks like an
/// identifier: letters, digits, and underscores, not starting with a digit.
/// Returns the delimiter text including both dollar signs.
fn delimiter_at(bytes: &[u8], at: usize) -> Option<&str> {
    if bytes.get(at) != Some(&b'$') {
        return None;
    }
    let mut end = at + 1;
    while let Some(&b) = bytes.get(end) {
        if b == b'$' {
            // Tag must not start with a digit.
            if end > at + 1 && bytes[at + 1].is_ascii_digit() {
                return None;
            }
            // Delimiters contain only ASCII, so this slice is valid UTF-8.
            return std::str::from_utf8(&bytes[at..=end]).ok();
        }
        if b.is_ascii_alphanumeric() || b == b'_' {
            end += 1;
        } else {
            return None;
        }
    }
    None
}

/// Find every dollar-quoted region in `text`, in order of appearance.
///
/// Inside a region only the exact opening delimiter closes it; other
/// dollar sequences are content. At most the final region is unclosed.
pub fn scan(text: &str) -> Vec<DollarQuoteBlock> {
    let bytes = text.as_bytes();
    let mut blocks = Vec::new();
    let mut pos = 0;
    let mut open: Option<(String, usize)> = None;

    while pos < bytes.len() {
        if bytes[pos] != b'$' {
            pos += 1;
            continue;
        }
        match &open {
            None => {
                if let Some(tag) = delimiter_at(bytes, pos) {
                    open = Some((tag.to_string(), pos));
                    pos += tag.len();
                } else {
                    pos += 1;
                }
            }
            Some((tag, start)) => {
                if bytes[pos..].starts_with(tag.as_bytes()) {
                    blocks.push(DollarQuoteBlock {
                        tag: tag.clone(),
                        start_offset: *start,
                        end_offset: Some(pos + tag.len()),
                        is_complete: true,
                    });
                    pos += tag.len();
                    open = None;
                } else {
                    pos += 1;
                }
            }
        }
    }

    if let Some((tag, start)) = open {
        blocks.push(DollarQuoteBlock {
            tag,
            start_offset: start,
            end_offset: None,
            is_complete: false,
        });
    }
    blocks
}

/// Whether `offset` falls inside any of the given regions.
pub fn covered(blocks: &[DollarQuoteBlock], offset: usize) -> bool {
    blocks.iter().any(|b| b.covers(offset))
}

/// The trailing unclosed region, if the text ends inside one.
pub fn open_block(blocks: &[DollarQuoteBlock]) -> Option<&DollarQuoteBlock> {
    blocks.last().filter(|b| b.end_offset.is_none())
}

/// Incremental dollar-quote state for line-at-a-time parsing.
///
/// Delimiters never span lines, so feeding line-sized chunks is lossless.
#[derive(Debug, Default)]
pub struct DollarTracker {
    open_tag: Option<String>,
}

impl DollarTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk of text, updating the open/closed state.
    pub fn feed(&mut self, text: &str) {
        let bytes = text.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            if bytes[pos] != b'$' {
                pos += 1;
                continue;
            }
            match &self.open_tag {
                None => {
                    if let Some(tag) = delimiter_at(bytes, pos) {
                        let len = tag.len();
                        self.open_tag = Some(tag.to_string());
                        pos += len;
                    } else {
                        pos += 1;
                    }
                }
                Some(tag) => {
                    if bytes[pos..].starts_with(tag.as_bytes()) {
                        pos += tag.len();
                        self.open_tag = None;
                    } else {
                        pos += 1;
                    }
                }
            }
        }
    }

    /// Whether the text consumed so far ends inside a dollar-quoted region.
    pub fn in_block(&self) -> bool {
        self.open_tag.is_some()
    }

    /// The delimiter of the currently open region.
    pub fn open_tag(&self) -> Option<&str> {
        self.open_tag.as_deref()
    }

    /// Reset to the initial state.
    pub fn reset(&mut self) {
        self.open_tag = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_anonymous_pair() {
        let blocks = scan("SELECT $$hello; world$$;");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tag, "$$");
        assert_eq!(blocks[0].start_offset, 7);
        assert_eq!(blocks[0].end_offset, Some(23));
    }

    #[test]
    fn test_scan_tagged_pair() {
        let sql = "CREATE FUNCTION f() RETURNS void AS $body$ BEGIN; END; $body$ LANGUAGE plpgsql;";
        let blocks = scan(sql);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tag, "$body$");
        assert!(blocks[0].end_offset.is_some());
    }

    #[test]
    fn test_inner_delimiters_are_content() {
        let sql = "$outer$ $$ not a close $$ $inner$ $outer$";
        let blocks = scan(sql);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tag, "$outer$");
        assert_eq!(blocks[0].end_offset, Some(sql.len()));
    }

    #[test]
    fn test_unclosed_block() {
        let blocks = scan("AS $fn$ BEGIN RETURN 1;");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].end_offset, None);
        assert!(!blocks[0].is_complete);
        assert!(open_block(&blocks).is_some());
    }

    #[test]
    fn test_positional_params_are_not_delimiters() {
        let blocks = scan("SELECT * FROM t WHERE a = $1 AND b = $2;");
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_covered_semicolon() {
        let sql = "AS $$ SELECT 1; $$ LANGUAGE sql;";
        let blocks = scan(sql);
        let inner = sql.find("1;").map(|i| i + 1).unwrap();
        let outer = sql.rfind(';').unwrap();
        assert!(covered(&blocks, inner));
        assert!(!covered(&blocks, outer));
    }

    #[test]
    fn test_unclosed_covers_everything_after_start() {
        let blocks = scan("AS $$ BEGIN");
        assert!(covered(&blocks, 10));
        assert!(covered(&blocks, 1000));
        assert!(!covered(&blocks, 0));
    }

    #[test]
    fn test_tracker_across_lines() {
        let mut tracker = DollarTracker::new();
        tracker.feed("CREATE FUNCTION f() RETURNS void AS $fn$");
        assert!(tracker.in_block());
        assert_eq!(tracker.open_tag(), Some("$fn$"));
        tracker.feed("BEGIN RETURN; END;");
        assert!(tracker.in_block());
        tracker.feed("$fn$ LANGUAGE plpgsql;");
        assert!(!tracker.in_block());
    }

    #[test]
    fn test_adjacent_empty_delimiters() {
        let blocks = scan("$$$$");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].end_offset, Some(4));
    }
}
