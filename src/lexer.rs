//! Splits a search string into terms; double quotes group several words
//! into one term.

use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    /// Current byte offset in `input`
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Read until the closing quote, or the end of the input when the quote
    /// is never closed. The opening quote is already consumed.
    fn read_phrase(&mut self, start: usize) -> Token<'a> {
        let content_start = self.position;
        while let Some(c) = self.peek() {
            if c == '"' {
                break;
            }
            self.bump();
        }
        let content_end = self.position;
        self.bump();

        Token {
            kind: TokenKind::Phrase(self.input[content_start..content_end].trim()),
            span: Span::new(start, self.position),
        }
    }

    /// A word ends at whitespace or at an opening quote.
    fn read_word(&mut self, start: usize) -> Token<'a> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '"' {
                break;
            }
            self.bump();
        }
        Token {
            kind: TokenKind::Word(&self.input[start..self.position]),
            span: Span::new(start, self.position),
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.skip_whitespace();
            let start = self.position;

            let token = match self.bump()? {
                '"' => self.read_phrase(start),
                _ => self.read_word(start),
            };
            // `""` searches nothing
            if !token.text().is_empty() {
                return Some(token);
            }
        }
    }
}

/// Distinct terms of a search string, in order of appearance.
pub fn terms(input: &str) -> Vec<&str> {
    let mut terms: Vec<&str> = Vec::new();
    for token in Lexer::new(input) {
        let text = token.text();
        if !terms.contains(&text) {
            terms.push(text);
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words() {
        let kinds: Vec<_> = Lexer::new("  shinji  ikari ").map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Word("shinji"), TokenKind::Word("ikari")]);
    }

    #[test]
    fn test_phrases() {
        let input = r#""Unit 01" pilot"#;
        let tokens: Vec<_> = Lexer::new(input).collect();
        assert_eq!(tokens[0].kind, TokenKind::Phrase("Unit 01"));
        assert_eq!(tokens[0].span, Span::new(0, 9));
        assert_eq!(tokens[1].kind, TokenKind::Word("pilot"));
        assert_eq!(tokens[1].span, Span::new(10, 15));
    }

    #[test]
    fn test_quote_glued_to_a_word() {
        let kinds: Vec<_> = Lexer::new(r#"nerv"tokyo 3""#).map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Word("nerv"), TokenKind::Phrase("tokyo 3")]);
    }

    #[test]
    fn test_unterminated_quote_takes_the_rest() {
        let kinds: Vec<_> = Lexer::new(r#"eva "unit 02"#).map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Word("eva"), TokenKind::Phrase("unit 02")]);
    }

    #[test]
    fn test_empty_phrases_are_skipped() {
        assert_eq!(Lexer::new(r#"  ""  "  " "#).count(), 0);
        assert_eq!(Lexer::new("").count(), 0);
    }

    #[test]
    fn test_terms_are_deduplicated() {
        assert_eq!(terms(r#"eva "eva" unit eva"#), vec!["eva", "unit"]);
    }

    #[test]
    fn test_multibyte_input() {
        assert_eq!(terms("碇 シンジ"), vec!["碇", "シンジ"]);
    }
}
