//! Maps byte offsets in a source text to 1-based `(line, column)` pairs.
//!
//! Grounded on the teacher's `util::Code`/`util::Position`: line-start offsets
//! are computed once, lazily, and cached in a [`OnceCell`]; lookups binary
//! search that cache. Columns are counted in `char`s rather than bytes so
//! multi-byte UTF-8 source text reports sane positions.

use once_cell::unsync::OnceCell;
use std::fmt::{Display, Formatter};

/// A 1-based source position.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}:C{}", self.line, self.column)
    }
}

/// Precomputes line-start byte offsets for a text and answers position
/// queries against them.
///
/// `find` clamps its argument into `[0, len]` before searching, so an offset
/// produced by a matcher that overshoots end-of-input (as packrat matchers
/// often do while reporting `Unparsed`) never panics.
pub struct PositionFinder<'t> {
    text: &'t str,
    line_starts: OnceCell<Vec<usize>>,
}

impl<'t> PositionFinder<'t> {
    pub fn new(text: &'t str) -> Self {
        Self {
            text,
            line_starts: OnceCell::new(),
        }
    }

    fn line_starts(&self) -> &Vec<usize> {
        self.line_starts.get_or_init(|| {
            let mut starts = vec![0];
            for (i, b) in self.text.bytes().enumerate() {
                if b == b'\n' {
                    starts.push(i + 1);
                }
            }
            starts
        })
    }

    /// Returns the greatest line-start offset `<= offset`, as a 1-based line
    /// index, and the 1-based `char` column within that line.
    pub fn find(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let starts = self.line_starts();
        let line_idx = match starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = starts[line_idx];
        // `offset` may land inside a multi-byte char only if the caller passed
        // a non-char-boundary offset; matcher-produced offsets are always on
        // char boundaries since they advance over `char_indices`.
        let column = self.text[line_start..offset].chars().count() + 1;
        Position::new(line_idx + 1, column)
    }
}

#[cfg(test)]
mod __tests__ {
    use super::*;

    #[test]
    fn finds_first_line() {
        let finder = PositionFinder::new("abc\ndef\n");
        assert_eq!(finder.find(0), Position::new(1, 1));
        assert_eq!(finder.find(2), Position::new(1, 3));
    }

    #[test]
    fn finds_second_line() {
        let finder = PositionFinder::new("abc\ndef\n");
        assert_eq!(finder.find(4), Position::new(2, 1));
        assert_eq!(finder.find(6), Position::new(2, 3));
    }

    #[test]
    fn clamps_overshooting_offsets() {
        let finder = PositionFinder::new("abc");
        assert_eq!(finder.find(1000), finder.find(3));
    }

    #[test]
    fn counts_columns_in_chars_not_bytes() {
        let finder = PositionFinder::new("héllo\nb");
        // 'é' is 2 bytes but 1 char; the 'l' right after it is column 4.
        let byte_offset_of_l = "héllo".find('l').unwrap();
        assert_eq!(finder.find(byte_offset_of_l).column, 4);
    }
}
