//! Cursor over a command line.

use crate::error::{SyntaxError, SyntaxErrorKind};

/// Character that separates arguments.
pub const SEPARATOR: char = ' ';

const QUOTE: char = '"';
const ESCAPE: char = '\\';

/// Reads words, quoted phrases and numbers off a command line.
///
/// The cursor is a byte offset and always sits on a character boundary.
#[derive(Debug, Clone)]
pub struct StringReader<'a> {
    input: &'a str,
    cursor: usize,
}

impl<'a> StringReader<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, cursor: 0 }
    }

    /// Start reading at `cursor`, clamped to the nearest preceding boundary.
    pub fn at(input: &'a str, cursor: usize) -> Self {
        Self {
            input,
            cursor: floor_boundary(input, cursor),
        }
    }

    pub fn input(&self) -> &'a str {
        self.input
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = floor_boundary(self.input, cursor);
    }

    pub fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    pub fn can_read(&self) -> bool {
        self.cursor < self.input.len()
    }

    /// Whether at least `bytes` more bytes remain.
    pub fn can_read_n(&self, bytes: usize) -> bool {
        self.cursor + bytes <= self.input.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    /// Advance past one character.
    pub fn skip(&mut self) {
        if let Some(c) = self.peek() {
            self.cursor += c.len_utf8();
        }
    }

    pub fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.skip();
        }
    }

    /// Whether the reader sits at a separator followed by more input.
    pub fn at_separator(&self) -> bool {
        self.peek() == Some(SEPARATOR) && self.can_read_n(2)
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.cursor;
        while self.peek().is_some_and(&pred) {
            self.skip();
        }
        &self.input[start..self.cursor]
    }

    /// Read up to the next separator.
    pub fn read_unquoted(&mut self) -> &'a str {
        self.read_while(|c| c != SEPARATOR)
    }

    /// Read a double-quoted phrase, or a plain word when no quote opens it.
    pub fn read_string(&mut self) -> Result<String, SyntaxError> {
        if self.peek() != Some(QUOTE) {
            return Ok(self.read_unquoted().to_string());
        }
        let start = self.cursor;
        self.skip();
        let mut result = String::new();
        let mut escaped = false;
        while let Some(c) = self.peek() {
            self.skip();
            if escaped {
                if c == QUOTE || c == ESCAPE {
                    result.push(c);
                    escaped = false;
                } else {
                    self.cursor -= c.len_utf8();
                    return Err(self.error(SyntaxErrorKind::InvalidEscape(c)));
                }
            } else if c == ESCAPE {
                escaped = true;
            } else if c == QUOTE {
                return Ok(result);
            } else {
                result.push(c);
            }
        }
        Err(SyntaxError::new(
            SyntaxErrorKind::ExpectedEndOfQuote,
            self.input,
            start,
        ))
    }

    /// Read everything left on the line.
    pub fn read_remaining(&mut self) -> &'a str {
        let rest = self.remaining();
        self.cursor = self.input.len();
        rest
    }

    pub fn read_i64(&mut self) -> Result<i64, SyntaxError> {
        let start = self.cursor;
        let text = self.read_while(|c| c.is_ascii_digit() || c == '-' || c == '+');
        if text.is_empty() {
            return Err(self.error(SyntaxErrorKind::ExpectedValue));
        }
        text.parse().map_err(|_| {
            self.cursor = start;
            self.error(SyntaxErrorKind::InvalidInteger(text.to_string()))
        })
    }

    pub fn read_f64(&mut self) -> Result<f64, SyntaxError> {
        let start = self.cursor;
        let text = self.read_while(|c| {
            c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
        });
        if text.is_empty() {
            return Err(self.error(SyntaxErrorKind::ExpectedValue));
        }
        match text.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => {
                self.cursor = start;
                Err(self.error(SyntaxErrorKind::InvalidFloat(text.to_string())))
            }
        }
    }

    pub fn read_bool(&mut self) -> Result<bool, SyntaxError> {
        let start = self.cursor;
        let text = self.read_unquoted();
        match text {
            "" => Err(self.error(SyntaxErrorKind::ExpectedValue)),
            "true" => Ok(true),
            "false" => Ok(false),
            other => {
                self.cursor = start;
                Err(self.error(SyntaxErrorKind::InvalidBool(other.to_string())))
            }
        }
    }

    /// Build an error positioned at the cursor.
    pub fn error(&self, kind: SyntaxErrorKind) -> SyntaxError {
        SyntaxError::new(kind, self.input, self.cursor)
    }
}

/// Largest character boundary not after `index`.
pub(crate) fn floor_boundary(input: &str, index: usize) -> usize {
    let mut index = index.min(input.len());
    while !input.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_words() {
        let mut reader = StringReader::new("home set base");
        assert_eq!(reader.read_unquoted(), "home");
        assert!(reader.at_separator());
        reader.skip();
        assert_eq!(reader.read_unquoted(), "set");
        reader.skip();
        assert_eq!(reader.read_remaining(), "base");
        assert!(!reader.can_read());
    }

    #[test]
    fn test_read_quoted() {
        let mut reader = StringReader::new(r#""my \"big\" house" rest"#);
        assert_eq!(reader.read_string().unwrap(), r#"my "big" house"#);
        assert_eq!(reader.remaining(), " rest");

        let mut reader = StringReader::new(r#""unterminated"#);
        let err = reader.read_string().unwrap_err();
        assert_eq!(err.kind(), &SyntaxErrorKind::ExpectedEndOfQuote);
        assert_eq!(err.cursor(), Some(0));

        let mut reader = StringReader::new(r#""bad \x""#);
        assert_eq!(
            reader.read_string().unwrap_err().kind(),
            &SyntaxErrorKind::InvalidEscape('x')
        );
    }

    #[test]
    fn test_read_numbers() {
        let mut reader = StringReader::new("-42 3.5 abc");
        assert_eq!(reader.read_i64().unwrap(), -42);
        reader.skip();
        assert_eq!(reader.read_f64().unwrap(), 3.5);
        reader.skip();
        assert_eq!(
            reader.read_i64().unwrap_err().kind(),
            &SyntaxErrorKind::ExpectedValue
        );
    }

    #[test]
    fn test_read_bool() {
        let mut reader = StringReader::new("true maybe");
        assert!(reader.read_bool().unwrap());
        reader.skip();
        let err = reader.read_bool().unwrap_err();
        assert_eq!(err.kind(), &SyntaxErrorKind::InvalidBool("maybe".into()));
        assert_eq!(reader.cursor(), 5);
    }

    #[test]
    fn test_cursor_clamped_to_boundary() {
        let reader = StringReader::at("héllo", 2);
        assert_eq!(reader.cursor(), 1);
        assert_eq!(floor_boundary("abc", 10), 3);
    }
}
