//! YAML parsing utilities using yaml-rust2
//!
//! Manifest files are split on document separator lines first and every
//! document is parsed on its own, so a failure can name the offending
//! document.

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Why a YAML document could not be converted to JSON
#[derive(Debug, Clone, Error, PartialEq)]
pub enum YamlError {
    /// Input is not valid YAML
    #[error("invalid YAML: {0}")]
    Syntax(String),
    /// Valid YAML without a JSON equivalent
    #[error("unsupported YAML: {0}")]
    Unsupported(&'static str),
    /// Float that does not parse
    #[error("invalid number {0:?}")]
    Number(String),
}

/// Parse a single YAML document; empty input is `Value::Null`.
///
/// Input holding more than one document is rejected. [`split_documents`]
/// only splits on bare `---` lines, so a separator carrying a comment or tag
/// ends up here.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    let mut docs =
        YamlLoader::load_from_str(input).map_err(|e| YamlError::Syntax(e.to_string()))?;
    match docs.len() {
        0 => Ok(Value::Null),
        1 => yaml_to_json(docs.swap_remove(0)),
        n => Err(YamlError::Syntax(format!(
            "expected one document, found {n}"
        ))),
    }
}

/// Split content on lines consisting solely of `---` (trailing blanks allowed).
///
/// Blank documents are dropped.
pub fn split_documents(content: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if is_separator(line) {
            push_document(&mut docs, std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_document(&mut docs, current);

    docs
}

fn is_separator(line: &str) -> bool {
    line.strip_prefix("---")
        .is_some_and(|rest| rest.chars().all(|c| c == ' ' || c == '\t'))
}

fn push_document(docs: &mut Vec<String>, doc: String) {
    if !doc.trim().is_empty() {
        docs.push(doc);
    }
}

fn yaml_key(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(YamlError::Unsupported("mapping key that is not a scalar")),
    }
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(s) => {
            let f: f64 = s.parse().map_err(|_| YamlError::Number(s.clone()))?;
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Hash(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert(yaml_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err(YamlError::Unsupported("aliases")),
        Yaml::BadValue => return Err(YamlError::Unsupported("bad value")),
    })
}
