//! Parsed parameter values and their grammars.

use lodestone_api::ArgKind;

use crate::error::{SyntaxError, SyntaxErrorKind};
use crate::reader::StringReader;

/// A single parsed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl ArgumentValue {
    /// Parse one value of `kind` at the reader's cursor.
    pub fn parse(kind: &ArgKind, reader: &mut StringReader<'_>) -> Result<Self, SyntaxError> {
        match kind {
            ArgKind::Word => {
                let word = reader.read_unquoted();
                if word.is_empty() {
                    return Err(reader.error(SyntaxErrorKind::ExpectedValue));
                }
                Ok(ArgumentValue::Text(word.to_string()))
            }
            ArgKind::Quoted => {
                let start = reader.cursor();
                let text = reader.read_string()?;
                if reader.cursor() == start {
                    return Err(reader.error(SyntaxErrorKind::ExpectedValue));
                }
                Ok(ArgumentValue::Text(text))
            }
            ArgKind::Greedy => {
                let rest = reader.read_remaining();
                if rest.is_empty() {
                    return Err(reader.error(SyntaxErrorKind::ExpectedValue));
                }
                Ok(ArgumentValue::Text(rest.to_string()))
            }
            ArgKind::Integer { min, max } => {
                let start = reader.cursor();
                let value = reader.read_i64()?;
                if let Some(min) = min.filter(|min| value < *min) {
                    reader.set_cursor(start);
                    return Err(reader.error(SyntaxErrorKind::NumberTooSmall {
                        found: value.to_string(),
                        min: min.to_string(),
                    }));
                }
                if let Some(max) = max.filter(|max| value > *max) {
                    reader.set_cursor(start);
                    return Err(reader.error(SyntaxErrorKind::NumberTooLarge {
                        found: value.to_string(),
                        max: max.to_string(),
                    }));
                }
                Ok(ArgumentValue::Integer(value))
            }
            ArgKind::Float { min, max } => {
                let start = reader.cursor();
                let value = reader.read_f64()?;
                if let Some(min) = min.filter(|min| value < *min) {
                    reader.set_cursor(start);
                    return Err(reader.error(SyntaxErrorKind::NumberTooSmall {
                        found: value.to_string(),
                        min: min.to_string(),
                    }));
                }
                if let Some(max) = max.filter(|max| value > *max) {
                    reader.set_cursor(start);
                    return Err(reader.error(SyntaxErrorKind::NumberTooLarge {
                        found: value.to_string(),
                        max: max.to_string(),
                    }));
                }
                Ok(ArgumentValue::Float(value))
            }
            ArgKind::Bool => reader.read_bool().map(ArgumentValue::Bool),
            ArgKind::Choice { values } => {
                let start = reader.cursor();
                let word = reader.read_unquoted();
                if word.is_empty() {
                    return Err(reader.error(SyntaxErrorKind::ExpectedValue));
                }
                if !values.iter().any(|v| v == word) {
                    reader.set_cursor(start);
                    return Err(reader.error(SyntaxErrorKind::InvalidChoice(word.to_string())));
                }
                Ok(ArgumentValue::Text(word.to_string()))
            }
        }
    }

    /// Parse a complete string as one value of `kind`.
    pub fn parse_str(kind: &ArgKind, text: &str) -> Result<Self, SyntaxError> {
        let mut reader = StringReader::new(text);
        let value = Self::parse(kind, &mut reader)?;
        if reader.can_read() {
            return Err(reader.error(SyntaxErrorKind::ExpectedSeparator));
        }
        Ok(value)
    }

    /// Parse one value, then keep consuming separated values of the same kind.
    ///
    /// Stops before the first value that fails to parse, leaving the cursor
    /// on the separator in front of it.
    pub fn parse_repeated(
        kind: &ArgKind,
        reader: &mut StringReader<'_>,
    ) -> Result<Vec<Self>, SyntaxError> {
        let mut values = vec![Self::parse(kind, reader)?];
        while reader.at_separator() {
            let checkpoint = reader.cursor();
            reader.skip();
            match Self::parse(kind, reader) {
                Ok(value) if !reader.can_read() || reader.peek() == Some(' ') => {
                    values.push(value)
                }
                _ => {
                    reader.set_cursor(checkpoint);
                    break;
                }
            }
        }
        Ok(values)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ArgumentValue::Text(_) => "string",
            ArgumentValue::Integer(_) => "integer",
            ArgumentValue::Float(_) => "number",
            ArgumentValue::Bool(_) => "boolean",
        }
    }
}

impl std::fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgumentValue::Text(s) => f.write_str(s),
            ArgumentValue::Integer(i) => write!(f, "{}", i),
            ArgumentValue::Float(v) => write!(f, "{}", v),
            ArgumentValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Conversion from a parsed value into a typed one.
pub trait FromArgument: Sized {
    /// Name used in type mismatch errors.
    const EXPECTED: &'static str;

    fn from_argument(value: &ArgumentValue) -> Option<Self>;
}

impl FromArgument for String {
    const EXPECTED: &'static str = "string";

    fn from_argument(value: &ArgumentValue) -> Option<Self> {
        match value {
            ArgumentValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromArgument for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_argument(value: &ArgumentValue) -> Option<Self> {
        match value {
            ArgumentValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromArgument for i32 {
    const EXPECTED: &'static str = "32-bit integer";

    fn from_argument(value: &ArgumentValue) -> Option<Self> {
        match value {
            ArgumentValue::Integer(i) => i32::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl FromArgument for f64 {
    const EXPECTED: &'static str = "number";

    fn from_argument(value: &ArgumentValue) -> Option<Self> {
        match value {
            ArgumentValue::Float(v) => Some(*v),
            ArgumentValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromArgument for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_argument(value: &ArgumentValue) -> Option<Self> {
        match value {
            ArgumentValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromArgument for ArgumentValue {
    const EXPECTED: &'static str = "value";

    fn from_argument(value: &ArgumentValue) -> Option<Self> {
        Some(value.clone())
    }
}

/// Completions a kind offers on its own, without a provider.
pub fn kind_suggestions(kind: &ArgKind) -> Vec<String> {
    match kind {
        ArgKind::Bool => vec!["true".to_string(), "false".to_string()],
        ArgKind::Choice { values } => values.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!(
            ArgumentValue::parse_str(&ArgKind::Word, "steve").unwrap(),
            ArgumentValue::Text("steve".into())
        );
        assert_eq!(
            ArgumentValue::parse_str(&ArgKind::Quoted, "\"a b\"").unwrap(),
            ArgumentValue::Text("a b".into())
        );
        assert_eq!(
            ArgumentValue::parse_str(&ArgKind::Bool, "false").unwrap(),
            ArgumentValue::Bool(false)
        );
        assert_eq!(
            ArgumentValue::parse_str(&ArgKind::Float { min: None, max: None }, "2.5").unwrap(),
            ArgumentValue::Float(2.5)
        );
    }

    #[test]
    fn test_integer_bounds() {
        let kind = ArgKind::Integer {
            min: Some(1),
            max: Some(64),
        };
        assert_eq!(
            ArgumentValue::parse_str(&kind, "64").unwrap(),
            ArgumentValue::Integer(64)
        );
        let err = ArgumentValue::parse_str(&kind, "0").unwrap_err();
        assert!(matches!(err.kind(), SyntaxErrorKind::NumberTooSmall { .. }));
        let err = ArgumentValue::parse_str(&kind, "65").unwrap_err();
        assert!(matches!(err.kind(), SyntaxErrorKind::NumberTooLarge { .. }));
    }

    #[test]
    fn test_choice_rejects_unknown_word() {
        let kind = ArgKind::Choice {
            values: vec!["add".into(), "remove".into()],
        };
        let err = ArgumentValue::parse_str(&kind, "list").unwrap_err();
        assert_eq!(err.kind(), &SyntaxErrorKind::InvalidChoice("list".into()));
    }

    #[test]
    fn test_parse_repeated_stops_at_mismatch() {
        let kind = ArgKind::Integer {
            min: None,
            max: None,
        };
        let mut reader = StringReader::new("1 2 3 four");
        let values = ArgumentValue::parse_repeated(&kind, &mut reader).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(reader.remaining(), " four");
    }

    #[test]
    fn test_from_argument() {
        assert_eq!(i32::from_argument(&ArgumentValue::Integer(7)), Some(7));
        assert_eq!(i32::from_argument(&ArgumentValue::Integer(i64::MAX)), None);
        assert_eq!(f64::from_argument(&ArgumentValue::Integer(2)), Some(2.0));
        assert_eq!(String::from_argument(&ArgumentValue::Bool(true)), None);
    }

    #[test]
    fn test_kind_suggestions() {
        assert_eq!(kind_suggestions(&ArgKind::Bool), vec!["true", "false"]);
        assert!(kind_suggestions(&ArgKind::Word).is_empty());
    }
}
