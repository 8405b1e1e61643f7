//! Custom filters and functions for manifest templates
//!
//! - `replace_char`: replace every occurrence of a substring
//! - `base64_encode` / `base64_decode`
//! - `required`: fail if value is undefined

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Error, ErrorKind, Value};

/// Replace every occurrence of `from` with `to`
///
/// Usage: `{{ Domain | replace_char(".", "-") }}` or
/// `{{ replace_char(Domain, ".", "-") }}`
pub fn replace_char(value: &str, from: &str, to: &str) -> String {
    value.replace(from, to)
}

/// Base64 encode filter
///
/// Usage: `{{ value | base64_encode }}`
pub fn base64_encode(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Base64 decode filter
///
/// Usage: `{{ value | base64_decode }}`
pub fn base64_decode(value: &str) -> Result<String, Error> {
    STANDARD
        .decode(value)
        .map_err(|e| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("base64 decode error: {}", e),
            )
        })
        .and_then(|bytes| {
            String::from_utf8(bytes).map_err(|e| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    format!("base64 decode produced invalid UTF-8: {}", e),
                )
            })
        })
}

/// Required filter - fails if value is undefined or none
///
/// Usage: `{{ value | required }}`
pub fn required(value: Value) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        Err(Error::new(
            ErrorKind::UndefinedError,
            "required value is undefined",
        ))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_char() {
        assert_eq!(replace_char("apps.example.com", ".", "-"), "apps-example-com");
        assert_eq!(replace_char("no-dots", ".", "-"), "no-dots");
    }

    #[test]
    fn test_base64_round_values() {
        assert_eq!(base64_encode("hello"), "aGVsbG8=");
        assert_eq!(base64_decode("aGVsbG8=").unwrap(), "hello");
        assert!(base64_decode("not base64!").is_err());
    }

    #[test]
    fn test_required() {
        assert!(required(Value::UNDEFINED).is_err());
        assert!(required(Value::from(())).is_err());
        assert_eq!(required(Value::from("x")).unwrap().to_string(), "x");
    }
}
