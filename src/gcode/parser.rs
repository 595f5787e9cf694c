//! Single-line G-code tokenizer with span tracking.
//!
//! Produces letter/value words and comments. Letters are case-insensitive
//! and whitespace is allowed anywhere between a letter and its number.

use std::ops::Range;

/// Span in the original source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCodeSpan {
    pub range: Range<usize>,
}

/// G-code token, with span info
#[derive(Debug, Clone, PartialEq)]
pub enum GCodeCommand<'a> {
    Word { letter: char, value: f64, span: GCodeSpan },
    Comment(&'a str, GCodeSpan),
}

/// Tokenizer error with span info
#[derive(Debug, Clone, PartialEq)]
pub struct TokenError {
    pub message: String,
    pub span: GCodeSpan,
}

/// Parser config options
#[derive(Debug, Clone)]
pub struct GCodeParserConfig {
    pub enable_comments: bool,
    /// Honour a leading `/` by skipping the line.
    pub block_delete: bool,
}

impl Default for GCodeParserConfig {
    fn default() -> Self {
        Self { enable_comments: true, block_delete: true }
    }
}

pub struct GCodeParser<'a> {
    src: &'a str,
    pos: usize,
    config: GCodeParserConfig,
}

impl<'a> GCodeParser<'a> {
    pub fn new(src: &'a str, config: GCodeParserConfig) -> Self {
        let mut parser = Self { src, pos: 0, config };
        if parser.config.block_delete && src.trim_start().starts_with('/') {
            parser.pos = src.len();
        }
        parser
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// Parses the next word or comment.
    pub fn next_command(&mut self) -> Option<Result<GCodeCommand<'a>, TokenError>> {
        let bytes = self.src.as_bytes();
        let len = bytes.len();
        self.skip_whitespace();
        if self.pos >= len {
            return None;
        }
        let start = self.pos;
        let c = bytes[self.pos] as char;

        // Semicolon comment runs to end of line
        if c == ';' {
            let comment = self.src[start + 1..].trim();
            self.pos = len;
            if self.config.enable_comments {
                return Some(Ok(GCodeCommand::Comment(comment, GCodeSpan { range: start..len })));
            }
            return None;
        }

        if c == '(' {
            let Some(close) = self.src[start..].find(')') else {
                self.pos = len;
                return Some(Err(TokenError {
                    message: "Unclosed comment".to_string(),
                    span: GCodeSpan { range: start..len },
                }));
            };
            let end = start + close;
            self.pos = end + 1;
            let comment = self.src[start + 1..end].trim();
            if self.config.enable_comments {
                return Some(Ok(GCodeCommand::Comment(comment, GCodeSpan { range: start..self.pos })));
            }
            return self.next_command();
        }

        if c.is_ascii_alphabetic() {
            let letter = c.to_ascii_uppercase();
            self.pos += 1;
            self.skip_whitespace();
            let value_start = self.pos;
            while self.pos < len && matches!(bytes[self.pos], b'0'..=b'9' | b'.' | b'-' | b'+') {
                self.pos += 1;
            }
            let text = &self.src[value_start..self.pos];
            let span = GCodeSpan { range: start..self.pos };
            return Some(match text.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(GCodeCommand::Word { letter, value, span }),
                _ => Err(TokenError { message: format!("Bad number after '{letter}': '{text}'"), span }),
            });
        }

        // Unknown character: report it and skip to the next whitespace
        let err_span = GCodeSpan { range: self.pos..self.pos + c.len_utf8() };
        self.pos += c.len_utf8();
        while self.pos < len && !bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        Some(Err(TokenError { message: format!("Unexpected character: {c}"), span: err_span }))
    }
}

impl<'a> Iterator for GCodeParser<'a> {
    type Item = Result<GCodeCommand<'a>, TokenError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_command()
    }
}

/// Words of one line, comments dropped.
pub fn parse_words(line: &str) -> Result<Vec<(char, f64)>, TokenError> {
    let config = GCodeParserConfig { enable_comments: false, ..Default::default() };
    GCodeParser::new(line, config)
        .filter_map(|token| match token {
            Ok(GCodeCommand::Word { letter, value, .. }) => Some(Ok((letter, value))),
            Ok(GCodeCommand::Comment(..)) => None,
            Err(e) => Some(Err(e)),
        })
        .collect()
}
