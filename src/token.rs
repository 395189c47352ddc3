//! The token definition for search strings.

/// A token is a single search term, with its location in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

impl<'a> Token<'a> {
    /// The text to look for, without quotes.
    pub fn text(&self) -> &'a str {
        match self.kind {
            TokenKind::Word(s) | TokenKind::Phrase(s) => s,
        }
    }
}

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind<'a> {
    Word(&'a str),   // foo
    Phrase(&'a str), // "foo bar", without the quotes
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
