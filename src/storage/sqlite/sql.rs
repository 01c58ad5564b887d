//! SQL helper functions for `SQLite` backends.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Escapes SQL LIKE wildcards in a string to make them literal.
///
/// Use with `LIKE ? ESCAPE '\'`.
///
/// # Examples
///
/// ```
/// use world_memory::storage::sqlite::escape_like_wildcards;
///
/// assert_eq!(escape_like_wildcards("100%"), "100\\%");
/// assert_eq!(escape_like_wildcards("user_name"), "user\\_name");
/// assert_eq!(escape_like_wildcards("path\\file"), "path\\\\file");
/// ```
#[must_use]
pub fn escape_like_wildcards(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '_' | '\\' => {
                result.push('\\');
                result.push(c);
            },
            _ => result.push(c),
        }
    }
    result
}

/// Returns `?, ?, ?` with `n` placeholders.
#[must_use]
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Serializes a value into a JSON column.
///
/// # Errors
///
/// Returns [`Error::Storage`] if serialization fails.
pub fn to_json<T: Serialize + ?Sized>(operation: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::storage(operation, e))
}

/// Deserializes a JSON column inside a row mapper.
///
/// # Errors
///
/// Returns a conversion error naming the column if the JSON is malformed.
pub fn from_json<T: DeserializeOwned>(column: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Converts a timestamp into the stored epoch-millisecond form.
#[must_use]
pub fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("hello", "hello"; "no wildcards")]
    #[test_case("50% off", "50\\% off"; "percent")]
    #[test_case("snake_case", "snake\\_case"; "underscore")]
    #[test_case("a\\b", "a\\\\b"; "backslash")]
    fn test_escape_like_wildcards(input: &str, expected: &str) {
        assert_eq!(escape_like_wildcards(input), expected);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(0), "");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_json_column_roundtrip() {
        let raw = to_json("t", &vec!["a", "b"]).unwrap();
        let back: Vec<String> = from_json(0, &raw).unwrap();
        assert_eq!(back, vec!["a", "b"]);
        assert!(from_json::<Vec<String>>(0, "{not json").is_err());
    }
}
