//! Client status report model and parser.
//!
//! A DDM client reports its state as an arbitrarily nested JSON
//! document. The parser walks the tree tracking a dotted path and
//! flattens it into three collections: per-declaration compliance
//! records, generic key/value observations, and errors. Two exact
//! paths are special-cased and terminate descent; everything else is
//! handled generically, which keeps the parser tolerant of client
//! payload evolution without a schema.

use crate::error::StatusParseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Path of the per-declaration status subtree.
const PATH_DECLARATIONS: &str = ".StatusItems.management.declarations";

/// Path of the client error array.
///
/// Matched absolutely: an `Errors` key nested deeper in the tree is
/// flattened generically like any other subtree.
const PATH_ERRORS: &str = ".Errors";

/// The kind of container a status value was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// Directly inside a JSON object.
    Object,
    /// Inside a JSON array (array traversal does not extend the path).
    Array,
    /// At the root of the document.
    Root,
}

impl ContainerKind {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::Root => "root",
        }
    }
}

/// The scalar type of a status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// A JSON string.
    String,
    /// A JSON number (kept as its source text).
    Number,
    /// A JSON boolean.
    Boolean,
}

impl ValueKind {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// A flattened scalar observation from a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusValue {
    /// Dotted path of the leaf.
    pub path: String,
    /// Kind of the enclosing container.
    pub container: ContainerKind,
    /// Scalar type of the value.
    pub kind: ValueKind,
    /// The value text (string contents, number text, `true`/`false`).
    pub value: String,
}

/// An error reported by, or derived from, a status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusError {
    /// Dotted path the error was found at.
    pub path: String,
    /// The error payload, verbatim.
    pub error: Value,
}

/// The client-reported state of one declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclarationStatus {
    /// Declaration identifier.
    #[serde(default)]
    pub identifier: String,
    /// Whether the declaration is active on the device.
    #[serde(default)]
    pub active: bool,
    /// Validity as reported: `valid`, `invalid`, `unknown`, ...
    #[serde(default)]
    pub valid: String,
    /// The server token the client believes is current.
    #[serde(rename = "server-token", default)]
    pub server_token: String,
    /// Manifest-type bucket the status was reported under.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manifest_type: String,
    /// Reasons payload, present when the declaration is invalid or
    /// inactive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasons: Option<Value>,
}

/// A [`DeclarationStatus`] joined against the currently synthesized
/// manifest.
///
/// Produced by reconciliation, not by the parser: the placeholder
/// fields distinguish "never reported" from "reported as broken".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarationQueryStatus {
    /// The reported (or placeholder) declaration status.
    #[serde(flatten)]
    pub status: DeclarationStatus,
    /// Whether the reported server token matches the expected one.
    pub current: bool,
    /// When the last status report for this enrollment was received.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub status_received: Option<OffsetDateTime>,
    /// The status report ID the record came from, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
}

/// A parsed client status report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    /// Caller-supplied identifier for idempotent re-delivery tracking.
    pub id: Option<String>,
    /// Per-declaration compliance records.
    pub declarations: Vec<DeclarationStatus>,
    /// Errors, both client-reported and derived from declarations.
    pub errors: Vec<StatusError>,
    /// Flattened scalar observations.
    pub values: Vec<StatusValue>,
    /// The raw report bytes.
    pub raw: Vec<u8>,
}

/// Parses a raw client status report.
///
/// Malformed top-level JSON is a hard error; below the root the two
/// special-cased subtrees fail the parse on surprising shapes and
/// everything else is flattened generically.
///
/// # Errors
///
/// Returns [`StatusParseError::Json`] for malformed JSON and
/// [`StatusParseError::UnexpectedShape`] when a special-cased subtree
/// does not have the documented structure.
pub fn parse_status_report(raw: &[u8]) -> Result<StatusReport, StatusParseError> {
    let root: Value = serde_json::from_slice(raw)?;
    let mut report = StatusReport {
        raw: raw.to_vec(),
        ..StatusReport::default()
    };
    walk(&root, "", ContainerKind::Root, &mut report)?;
    Ok(report)
}

fn walk(
    v: &Value,
    path: &str,
    container: ContainerKind,
    report: &mut StatusReport,
) -> Result<(), StatusParseError> {
    if path == PATH_DECLARATIONS {
        return parse_declarations(v, report);
    }
    if path == PATH_ERRORS {
        return parse_errors(v, report);
    }
    match v {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = format!("{path}.{key}");
                walk(child, &child_path, ContainerKind::Object, report)?;
            }
        }
        Value::Array(items) => {
            // array elements share the parent's path
            for child in items {
                walk(child, path, ContainerKind::Array, report)?;
            }
        }
        Value::String(s) => report.values.push(StatusValue {
            path: path.to_string(),
            container,
            kind: ValueKind::String,
            value: s.clone(),
        }),
        Value::Number(n) => report.values.push(StatusValue {
            path: path.to_string(),
            container,
            kind: ValueKind::Number,
            value: n.to_string(),
        }),
        Value::Bool(b) => report.values.push(StatusValue {
            path: path.to_string(),
            container,
            kind: ValueKind::Boolean,
            value: b.to_string(),
        }),
        Value::Null => {}
    }
    Ok(())
}

/// Parses the `.StatusItems.management.declarations` subtree: an
/// object keyed by manifest-type bucket, each value an array of
/// declaration status objects.
fn parse_declarations(v: &Value, report: &mut StatusReport) -> Result<(), StatusParseError> {
    let buckets = v
        .as_object()
        .ok_or_else(|| StatusParseError::unexpected(PATH_DECLARATIONS, "object"))?;

    for (bucket, elements) in buckets {
        let bucket_path = format!("{PATH_DECLARATIONS}.{bucket}");
        let elements = elements
            .as_array()
            .ok_or_else(|| StatusParseError::unexpected(bucket_path.clone(), "array"))?;

        for element in elements {
            let mut status: DeclarationStatus = serde_json::from_value(element.clone())?;
            status.manifest_type = bucket.clone();

            // a non-active, non-valid declaration is also an error
            if !status.active && status.valid != "valid" {
                report.errors.push(StatusError {
                    path: bucket_path.clone(),
                    error: element.clone(),
                });
            }
            report.declarations.push(status);
        }
    }
    Ok(())
}

/// Parses the top-level `.Errors` array; elements are recorded
/// verbatim.
fn parse_errors(v: &Value, report: &mut StatusReport) -> Result<(), StatusParseError> {
    let elements = v
        .as_array()
        .ok_or_else(|| StatusParseError::unexpected(PATH_ERRORS, "array"))?;
    for element in elements {
        report.errors.push(StatusError {
            path: PATH_ERRORS.to_string(),
            error: element.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> StatusReport {
        parse_status_report(&serde_json::to_vec(&v).unwrap()).unwrap()
    }

    #[test]
    fn malformed_root_is_a_hard_error() {
        assert!(matches!(
            parse_status_report(b"{not json"),
            Err(StatusParseError::Json(_))
        ));
    }

    #[test]
    fn value_flattening_leaf_only() {
        let report = parse(json!({
            "StatusItems": {"device": {"model": {"family": "iPhone"}}}
        }));
        assert_eq!(report.values.len(), 1);
        let v = &report.values[0];
        assert_eq!(v.path, ".StatusItems.device.model.family");
        assert_eq!(v.value, "iPhone");
        assert_eq!(v.kind, ValueKind::String);
        assert_eq!(v.container, ContainerKind::Object);
    }

    #[test]
    fn arrays_do_not_extend_the_path() {
        let report = parse(json!({"a": {"b": [1, 2, true]}}));
        let paths: Vec<_> = report.values.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec![".a.b", ".a.b", ".a.b"]);
        assert_eq!(report.values[0].container, ContainerKind::Array);
        assert_eq!(report.values[0].kind, ValueKind::Number);
        assert_eq!(report.values[2].kind, ValueKind::Boolean);
    }

    #[test]
    fn null_leaves_are_dropped() {
        let report = parse(json!({"a": null, "b": {"c": null}}));
        assert!(report.values.is_empty());
    }

    #[test]
    fn root_scalars_use_root_container() {
        let report = parse_status_report(b"42").unwrap();
        assert_eq!(report.values.len(), 1);
        assert_eq!(report.values[0].path, "");
        assert_eq!(report.values[0].container, ContainerKind::Root);
    }

    #[test]
    fn declaration_statuses_are_extracted() {
        let report = parse(json!({
            "StatusItems": {"management": {"declarations": {
                "configurations": [
                    {"identifier": "com.example.a", "active": true,
                     "valid": "valid", "server-token": "t1"}
                ],
                "activations": []
            }}}
        }));
        assert_eq!(report.declarations.len(), 1);
        let d = &report.declarations[0];
        assert_eq!(d.identifier, "com.example.a");
        assert!(d.active);
        assert_eq!(d.valid, "valid");
        assert_eq!(d.server_token, "t1");
        assert_eq!(d.manifest_type, "configurations");
        assert!(report.errors.is_empty());
        // the subtree is handled, not generically flattened
        assert!(report.values.is_empty());
    }

    #[test]
    fn broken_declarations_duplicate_into_errors() {
        let report = parse(json!({
            "StatusItems": {"management": {"declarations": {
                "configurations": [
                    {"identifier": "com.example.test", "active": false,
                     "valid": "unknown", "server-token": "t1",
                     "reasons": [{"code": "Error.NotActive"}]}
                ]
            }}}
        }));
        assert_eq!(report.declarations.len(), 1);
        assert!(report.declarations[0].reasons.is_some());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            report.errors[0].path,
            ".StatusItems.management.declarations.configurations"
        );
        assert_eq!(
            report.errors[0].error["identifier"],
            json!("com.example.test")
        );
    }

    #[test]
    fn inactive_but_valid_is_not_an_error() {
        let report = parse(json!({
            "StatusItems": {"management": {"declarations": {
                "assets": [
                    {"identifier": "com.example.a", "active": false,
                     "valid": "valid", "server-token": "t1"}
                ]
            }}}
        }));
        assert!(report.errors.is_empty());
    }

    #[test]
    fn top_level_errors_collected_verbatim() {
        let report = parse(json!({
            "Errors": [{"ErrorCode": 1}, {"ErrorCode": 2}]
        }));
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().all(|e| e.path == ".Errors"));
        assert_eq!(report.errors[1].error, json!({"ErrorCode": 2}));
    }

    #[test]
    fn nested_errors_key_is_not_special() {
        let report = parse(json!({
            "StatusItems": {"Errors": [{"ErrorCode": 1}]}
        }));
        assert!(report.errors.is_empty());
        // flattened generically instead
        assert_eq!(report.values.len(), 1);
        assert_eq!(report.values[0].path, ".StatusItems.Errors.ErrorCode");
    }

    #[test]
    fn surprising_declarations_shape_fails_the_parse() {
        let raw = serde_json::to_vec(&json!({
            "StatusItems": {"management": {"declarations": ["not", "an", "object"]}}
        }))
        .unwrap();
        assert!(matches!(
            parse_status_report(&raw),
            Err(StatusParseError::UnexpectedShape { .. })
        ));

        let raw = serde_json::to_vec(&json!({
            "StatusItems": {"management": {"declarations": {"configurations": {"not": "array"}}}}
        }))
        .unwrap();
        assert!(matches!(
            parse_status_report(&raw),
            Err(StatusParseError::UnexpectedShape { .. })
        ));
    }
}
