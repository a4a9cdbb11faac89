//! Normalization of GraphQL error payloads.
//!
//! Servers report failures in several shapes: a bare string in
//! `connection_error`, a single error object in `error` frames, or a
//! `{"errors": [...]}` list (possibly nested) in `data` frames. All of them
//! are flattened into one [`NormalizedError`].

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// Where a normalized error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Reported by the server for a single operation (or `connection_error`).
    #[default]
    Protocol,
    /// The transport errored or closed.
    Transport,
}

/// A structured GraphQL error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedError {
    /// The error message of the first flattened error.
    pub message: String,

    /// Extension fields of the first flattened error.
    ///
    /// Holds every field other than `message`/`error`/`errors`, with the
    /// contents of an `extensions` object merged on top.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,

    /// Every flattened error entry, in depth-first order.
    pub errors: Vec<Value>,

    /// Origin of the error.
    #[serde(skip)]
    pub kind: ErrorKind,

    /// Call-site trace captured when the operation was created (debug mode).
    #[serde(skip)]
    pub trace: Option<String>,
}

impl NormalizedError {
    /// Normalize a transport-level failure.
    pub fn transport(message: impl Into<String>, details: Map<String, Value>) -> Self {
        let mut entry = details;
        entry.insert("message".into(), Value::String(message.into()));
        let mut err = normalize(&Value::Object(entry));
        err.kind = ErrorKind::Transport;
        err
    }

    /// Look up an extension field.
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    /// The `code` extension, as reported by Hasura and most servers.
    pub fn code(&self) -> Option<&str> {
        self.extension("code").and_then(Value::as_str)
    }

    /// Render the error back to JSON.
    ///
    /// Normalizing the result yields an equal error.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = self.code() {
            write!(f, " ({code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for NormalizedError {}

/// Normalize an error payload.
///
/// Never fails: unknown shapes degrade to a message built from the payload.
pub fn normalize(payload: &Value) -> NormalizedError {
    let errors = match payload.get("errors") {
        Some(Value::Array(list)) => {
            let mut flat = Vec::with_capacity(list.len());
            flatten_into(list, &mut flat);
            flat
        }
        _ => vec![payload.clone()],
    };

    let first = errors.first().unwrap_or(payload);
    NormalizedError {
        message: message_of(first),
        extensions: extensions_of(first),
        errors,
        kind: ErrorKind::Protocol,
        trace: None,
    }
}

fn flatten_into(list: &[Value], out: &mut Vec<Value>) {
    for entry in list {
        match entry.get("errors") {
            Some(Value::Array(nested)) => flatten_into(nested, out),
            _ => out.push(entry.clone()),
        }
    }
}

fn message_of(entry: &Value) -> String {
    let field = entry.get("message").or_else(|| entry.get("error"));
    match field.unwrap_or(entry) {
        Value::String(message) => message.clone(),
        Value::Null => "unknown error".into(),
        other => other.to_string(),
    }
}

fn extensions_of(entry: &Value) -> Map<String, Value> {
    let Value::Object(fields) = entry else {
        return Map::new();
    };

    let mut extensions: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "message" | "error" | "errors" | "extensions"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    match fields.get("extensions") {
        Some(Value::Object(nested)) => {
            for (key, value) in nested {
                extensions.insert(key.clone(), value.clone());
            }
        }
        Some(other) => {
            extensions.insert("extensions".into(), other.clone());
        }
        None => {}
    }
    extensions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_error_object() {
        let err = normalize(&json!({
            "message": "field not found",
            "extensions": {"code": "validation-failed", "path": "$.selectionSet"}
        }));

        assert_eq!(err.message, "field not found");
        assert_eq!(err.code(), Some("validation-failed"));
        assert_eq!(err.extension("path"), Some(&json!("$.selectionSet")));
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.kind, ErrorKind::Protocol);
    }

    #[test]
    fn test_first_error_wins() {
        let err = normalize(&json!({
            "errors": [
                {"message": "first", "extensions": {"code": "a"}},
                {"message": "second", "extensions": {"code": "b"}}
            ]
        }));

        assert_eq!(err.message, "first");
        assert_eq!(err.code(), Some("a"));
        assert_eq!(err.errors.len(), 2);
        assert_eq!(err.errors[1]["message"], "second");
    }

    #[test]
    fn test_nested_errors_flatten_depth_first() {
        let err = normalize(&json!({
            "errors": [
                {"errors": [{"message": "a"}, {"errors": [{"message": "b"}]}]},
                {"message": "c"}
            ]
        }));

        let messages: Vec<_> = err.errors.iter().map(|e| e["message"].clone()).collect();
        assert_eq!(messages, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(err.message, "a");
    }

    #[test]
    fn test_string_payload() {
        let err = normalize(&json!("Could not verify JWT: JWTExpired"));
        assert_eq!(err.message, "Could not verify JWT: JWTExpired");
        assert!(err.extensions.is_empty());
    }

    #[test]
    fn test_error_field_used_as_message() {
        let err = normalize(&json!({"error": "bad request", "code": "400"}));
        assert_eq!(err.message, "bad request");
        assert_eq!(err.code(), Some("400"));
    }

    #[test]
    fn test_extensions_override_plain_fields() {
        let err = normalize(&json!({
            "message": "x",
            "code": "outer",
            "extensions": {"code": "inner"}
        }));
        assert_eq!(err.code(), Some("inner"));
    }

    #[test]
    fn test_normalize_is_idempotent_on_flat_error() {
        let once = normalize(&json!({"message": "x"}));
        let twice = normalize(&once.to_value());
        assert_eq!(once, twice);

        let once = normalize(&json!({"message": "y", "extensions": {"code": "c"}, "path": ["a"]}));
        let twice = normalize(&once.to_value());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_transport_error() {
        let mut details = Map::new();
        details.insert("code".into(), json!(1006));
        let err = NormalizedError::transport("WebSocket connection close", details);

        assert_eq!(err.kind, ErrorKind::Transport);
        assert_eq!(err.message, "WebSocket connection close");
        assert_eq!(err.extension("code"), Some(&json!(1006)));
        assert_eq!(err.to_string(), "WebSocket connection close");
    }

    #[test]
    fn test_empty_error_list_falls_back_to_payload() {
        let err = normalize(&json!({"errors": [], "message": "outer"}));
        assert_eq!(err.message, "outer");
        assert!(err.errors.is_empty());
    }
}
