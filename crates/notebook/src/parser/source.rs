//! Shared, cheaply clonable source text with line lookups.
//!
//! Every invocation evaluates exactly one synthesized source text. Spans in the
//! AST are byte offsets into it; `SourceCode` turns them back into 1-based
//! line/column pairs for stack traces and for the sentinel search.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Wrapper around source code that can be cheaply cloned.
#[derive(Clone)]
pub struct SourceCode {
    text: Arc<str>,
    /// Byte offset of the first character of every line.
    line_starts: Arc<[usize]>,
}

impl SourceCode {
    pub fn new(code: impl Into<Arc<str>>) -> Self {
        let text: Arc<str> = code.into();
        let line_starts = std::iter::once(0)
            .chain(
                text.char_indices()
                    .filter(|(_, character)| *character == '\n')
                    .map(|(index, _)| index + 1),
            )
            .collect::<Vec<_>>()
            .into();
        Self { text, line_starts }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 0-based line index containing the byte `offset`.
    pub fn line_index(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next_line) => next_line.saturating_sub(1),
        }
    }

    /// 1-based `(line, column)` of the byte `offset`, column counted in chars.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let line = self.line_index(offset);
        let line_start = self.line_starts[line];
        let column = self.text[line_start..offset].chars().count();
        (line + 1, column + 1)
    }

    /// Byte range of the 0-based `line`, without its trailing newline.
    pub fn line_range(&self, line: usize) -> Option<Range<usize>> {
        let start = *self.line_starts.get(line)?;
        let end = self
            .line_starts
            .get(line + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        Some(start..end)
    }

    pub fn lines(&self) -> Vec<&str> {
        self.text.split('\n').collect()
    }
}

impl fmt::Debug for SourceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceCode({} bytes)", self.text.len())
    }
}

impl fmt::Display for SourceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let source = SourceCode::new("let a = 1;\nlet b = 2;\n\nb");
        assert_eq!(source.line_col(0), (1, 1));
        assert_eq!(source.line_col(4), (1, 5));
        assert_eq!(source.line_col(11), (2, 1));
        assert_eq!(source.line_col(22), (3, 1));
        assert_eq!(source.line_col(23), (4, 1));
    }

    #[test]
    fn test_line_range() {
        let source = SourceCode::new("one\ntwo\nthree");
        assert_eq!(source.line_count(), 3);
        assert_eq!(&source.as_str()[source.line_range(1).unwrap()], "two");
        assert_eq!(&source.as_str()[source.line_range(2).unwrap()], "three");
        assert!(source.line_range(3).is_none());
    }

    #[test]
    fn test_source_code_is_send_sync() {
        fn is_send<T: Send>() {}
        fn is_sync<T: Sync>() {}
        is_send::<SourceCode>();
        is_sync::<SourceCode>();
    }
}
