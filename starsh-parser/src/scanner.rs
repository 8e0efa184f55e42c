//! Positioned character source consumed by the parser.

use std::{io::BufRead, sync::Arc};

use utf8_chars::BufReadCharsExt;

use crate::{SourcePosition, SyntaxError, SyntaxErrorKind};

#[derive(Clone, Copy, Debug)]
struct Resume {
    cursor: usize,
    position: SourcePosition,
}

/// A saved scanner location, restorable with [`Scanner::restore`].
#[derive(Clone, Copy, Debug)]
pub struct Mark {
    cursor: usize,
    position: SourcePosition,
    resume: Option<Resume>,
}

/// A character scanner over a complete input text.
///
/// Besides plain character access, the scanner supports reading here-document bodies
/// ahead of the current line: once a body has been read, the next newline consumed by
/// [`Scanner::next`] continues scanning after the body's tag line.
#[derive(Clone, Debug)]
pub struct Scanner {
    origin: Arc<str>,
    chars: Vec<char>,
    cursor: usize,
    position: SourcePosition,
    resume: Option<Resume>,
}

impl Scanner {
    /// Creates a scanner over the given text.
    ///
    /// # Arguments
    ///
    /// * `origin` - Name of the input, reported in syntax errors.
    /// * `text` - The text to scan.
    pub fn new(origin: impl Into<Arc<str>>, text: &str) -> Self {
        Self {
            origin: origin.into(),
            chars: text.chars().collect(),
            cursor: 0,
            position: SourcePosition::default(),
            resume: None,
        }
    }

    /// Creates a scanner by reading the given reader to its end.
    ///
    /// # Arguments
    ///
    /// * `origin` - Name of the input, reported in syntax errors.
    /// * `reader` - The reader to decode UTF-8 text from.
    pub fn from_reader<R: BufRead>(
        origin: impl Into<Arc<str>>,
        mut reader: R,
    ) -> std::io::Result<Self> {
        let chars = reader.chars().collect::<std::io::Result<Vec<char>>>()?;
        Ok(Self {
            origin: origin.into(),
            chars,
            cursor: 0,
            position: SourcePosition::default(),
            resume: None,
        })
    }

    /// Returns the name of the input being scanned.
    pub fn origin(&self) -> &Arc<str> {
        &self.origin
    }

    /// Returns the position of the next character to be consumed.
    pub const fn position(&self) -> SourcePosition {
        self.position
    }

    /// Returns true once every character has been consumed.
    pub fn at_end(&self) -> bool {
        self.cursor >= self.chars.len()
    }

    /// Returns the next character without consuming it.
    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.cursor).copied()
    }

    /// Returns the character `n` places after the next one without consuming anything.
    pub fn peek_nth(&self, n: usize) -> Option<char> {
        self.chars.get(self.cursor + n).copied()
    }

    /// Consumes and returns the next character.
    #[expect(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.cursor += 1;
        self.position = self.position.advance(c);

        if c == '\n' {
            if let Some(resume) = self.resume.take() {
                tracing::trace!(
                    target: "parse",
                    "skipping here-document bodies to {}",
                    resume.position
                );
                self.cursor = resume.cursor;
                self.position = resume.position;
            }
        }

        Some(c)
    }

    /// Saves the current location.
    pub const fn mark(&self) -> Mark {
        Mark {
            cursor: self.cursor,
            position: self.position,
            resume: self.resume,
        }
    }

    /// Returns to a previously saved location.
    pub const fn restore(&mut self, mark: Mark) {
        self.cursor = mark.cursor;
        self.position = mark.position;
        self.resume = mark.resume;
    }

    /// Returns true if the unconsumed input starts with `text`.
    pub fn starts_with(&self, text: &str) -> bool {
        let mut offset = 0;
        for c in text.chars() {
            if self.peek_nth(offset) != Some(c) {
                return false;
            }
            offset += 1;
        }
        true
    }

    /// Consumes `text` if the unconsumed input starts with it.
    pub fn consume(&mut self, text: &str) -> bool {
        if !self.starts_with(text) {
            return false;
        }
        for _ in text.chars() {
            self.next();
        }
        true
    }

    /// Skips spaces, tabs, carriage returns and backslash-newline line continuations.
    pub fn skip_inline_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.next();
                }
                Some('\\') if self.peek_nth(1) == Some('\n') => {
                    self.next();
                    self.next();
                }
                _ => break,
            }
        }
    }

    /// Skips inline whitespace and newlines.
    pub fn skip_whitespace(&mut self) {
        loop {
            self.skip_inline_whitespace();
            if self.peek() == Some('\n') {
                self.next();
            } else {
                break;
            }
        }
    }

    /// Consumes characters up to (not including) the next newline, returning them.
    pub fn read_to_line_end(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.next();
        }
        text
    }

    /// Reads a here-document body from the lines that follow the current line.
    ///
    /// Lines are copied verbatim, terminators included, until a line equal to `tag` is
    /// found. With `strip_tabs`, leading tabs are removed from each body line and from
    /// the candidate tag line. The current location does not move; the body is skipped
    /// when the current line's newline is consumed.
    ///
    /// # Arguments
    ///
    /// * `tag` - The terminating tag.
    /// * `strip_tabs` - Whether leading tabs are stripped (the `<<-` form).
    pub fn read_here_document(&mut self, tag: &str, strip_tabs: bool) -> Option<String> {
        let start = match self.resume {
            Some(resume) => resume.cursor,
            None => {
                let newline = self.chars[self.cursor..].iter().position(|c| *c == '\n')?;
                self.cursor + newline + 1
            }
        };

        let mut body = String::new();
        let mut line_start = start;
        while line_start < self.chars.len() {
            let line_end = self.chars[line_start..]
                .iter()
                .position(|c| *c == '\n')
                .map_or(self.chars.len(), |offset| line_start + offset + 1);

            let line: String = self.chars[line_start..line_end].iter().collect();
            let content = line.trim_end_matches('\n').trim_end_matches('\r');
            let candidate = if strip_tabs {
                content.trim_start_matches('\t')
            } else {
                content
            };

            if candidate == tag {
                self.resume = Some(Resume {
                    cursor: line_end,
                    position: self.position_at(line_end),
                });
                return Some(body);
            }

            if strip_tabs {
                body.push_str(line.trim_start_matches('\t'));
            } else {
                body.push_str(&line);
            }
            line_start = line_end;
        }

        None
    }

    /// Creates a syntax error at the current position.
    ///
    /// # Arguments
    ///
    /// * `kind` - What went wrong.
    /// * `token` - The partial token scanned so far.
    pub fn error(&self, kind: SyntaxErrorKind, token: impl Into<String>) -> SyntaxError {
        self.error_at(self.position, kind, token)
    }

    /// Creates a syntax error at the given position.
    pub fn error_at(
        &self,
        position: SourcePosition,
        kind: SyntaxErrorKind,
        token: impl Into<String>,
    ) -> SyntaxError {
        SyntaxError {
            origin: self.origin.clone(),
            position,
            token: token.into(),
            kind,
        }
    }

    fn position_at(&self, cursor: usize) -> SourcePosition {
        self.chars[self.cursor..cursor]
            .iter()
            .fold(self.position, |position, c| position.advance(*c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mark_and_restore() {
        let mut scanner = Scanner::new("test", "ab\ncd");
        assert_eq!(scanner.next(), Some('a'));
        let mark = scanner.mark();
        assert_eq!(scanner.next(), Some('b'));
        assert_eq!(scanner.next(), Some('\n'));
        assert_eq!(scanner.position().line, 2);
        scanner.restore(mark);
        assert_eq!(scanner.peek(), Some('b'));
        assert_eq!(scanner.position().column, 2);
    }

    #[test]
    fn consume_requires_full_match() {
        let mut scanner = Scanner::new("test", ">>x");
        assert!(!scanner.consume(">>>"));
        assert!(scanner.consume(">>"));
        assert_eq!(scanner.peek(), Some('x'));
    }

    #[test]
    fn here_document_is_skipped_at_newline() {
        let mut scanner = Scanner::new("test", "cat\nbody\nEOF\nnext");
        for _ in 0..3 {
            scanner.next();
        }
        let body = scanner.read_here_document("EOF", false);
        assert_eq!(body.as_deref(), Some("body\n"));
        assert_eq!(scanner.next(), Some('\n'));
        assert_eq!(scanner.read_to_line_end(), "next");
        assert_eq!(scanner.position().line, 4);
    }

    #[test]
    fn reads_from_buffered_reader() -> anyhow::Result<()> {
        let scanner = Scanner::from_reader("stdin", "héllo".as_bytes())?;
        assert_eq!(scanner.peek_nth(1), Some('é'));
        Ok(())
    }
}
