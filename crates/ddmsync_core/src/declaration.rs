//! The DDM declaration wire type.

use crate::error::DeclarationError;
use serde::{Deserialize, Serialize};

/// A DDM declaration: a versioned configuration object.
///
/// The wire shape follows Apple's declaration documents:
/// `Identifier`, `Type`, `Payload`, and the server-derived
/// `ServerToken` (omitted from JSON while empty, e.g. on upload).
///
/// `server_token` is never trusted from input; storage recomputes it
/// on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Unique, opaque declaration identifier.
    #[serde(rename = "Identifier")]
    pub identifier: String,

    /// Dotted declaration type, e.g. `com.apple.configuration.account.mail`.
    #[serde(rename = "Type")]
    pub declaration_type: String,

    /// Opaque JSON object payload.
    #[serde(rename = "Payload", default)]
    pub payload: serde_json::Value,

    /// Content-derived opaque token; changes iff effective content changes.
    #[serde(rename = "ServerToken", default, skip_serializing_if = "String::is_empty")]
    pub server_token: String,
}

impl Declaration {
    /// Creates a declaration with an empty server token.
    pub fn new(
        identifier: impl Into<String>,
        declaration_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            declaration_type: declaration_type.into(),
            payload,
            server_token: String::new(),
        }
    }

    /// Parses a declaration from raw JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError::Json`] if the bytes are not valid
    /// JSON for the declaration shape. The result is not otherwise
    /// validated; call [`Declaration::validate`] for that.
    pub fn from_slice(raw: &[u8]) -> Result<Self, DeclarationError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Performs basic sanity checks on the declaration.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier or type is empty, or the
    /// payload is not a JSON object (an empty `{}` is fine).
    pub fn validate(&self) -> Result<(), DeclarationError> {
        if self.identifier.is_empty() {
            return Err(DeclarationError::EmptyIdentifier);
        }
        if self.declaration_type.is_empty() {
            return Err(DeclarationError::EmptyType);
        }
        if !self.payload.is_object() {
            return Err(DeclarationError::PayloadNotObject);
        }
        Ok(())
    }

    /// Returns a copy with the server token stripped.
    ///
    /// Inbound declarations must not carry a trusted token.
    #[must_use]
    pub fn without_token(&self) -> Self {
        Self {
            server_token: String::new(),
            ..self.clone()
        }
    }

    /// Serializes the declaration to its wire JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Splits a `"type/identifier"` check-in path into its two parts.
///
/// Used by the `declaration/.../...` DDM check-in endpoint. The
/// identifier part may itself contain slashes.
///
/// # Errors
///
/// Returns [`DeclarationError::InvalidPath`] if the path does not
/// contain both a non-empty type and a non-empty identifier.
pub fn parse_declaration_path(path: &str) -> Result<(&str, &str), DeclarationError> {
    match path.split_once('/') {
        Some((t, id)) if !t.is_empty() && !id.is_empty() => Ok((t, id)),
        _ => Err(DeclarationError::InvalidPath(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_and_validate() {
        let raw = br#"{"Identifier":"com.example.a","Type":"com.apple.configuration.management.test","Payload":{"Echo":"hi"}}"#;
        let d = Declaration::from_slice(raw).unwrap();
        d.validate().unwrap();
        assert_eq!(d.identifier, "com.example.a");
        assert!(d.server_token.is_empty());
    }

    #[test]
    fn empty_fields_rejected() {
        let d = Declaration::new("", "com.apple.configuration.x", json!({}));
        assert!(matches!(
            d.validate(),
            Err(DeclarationError::EmptyIdentifier)
        ));

        let d = Declaration::new("id", "", json!({}));
        assert!(matches!(d.validate(), Err(DeclarationError::EmptyType)));

        let d = Declaration::new("id", "com.apple.configuration.x", json!([1, 2]));
        assert!(matches!(
            d.validate(),
            Err(DeclarationError::PayloadNotObject)
        ));
    }

    #[test]
    fn token_omitted_when_empty() {
        let d = Declaration::new("id", "com.apple.configuration.x", json!({}));
        let s = String::from_utf8(d.to_json().unwrap()).unwrap();
        assert!(!s.contains("ServerToken"));

        let mut d = d;
        d.server_token = "abc".into();
        let s = String::from_utf8(d.to_json().unwrap()).unwrap();
        assert!(s.contains(r#""ServerToken":"abc""#));
    }

    #[test]
    fn declaration_path_split() {
        let (t, id) = parse_declaration_path("configuration/com.example.a").unwrap();
        assert_eq!(t, "configuration");
        assert_eq!(id, "com.example.a");

        // identifier keeps embedded slashes
        let (_, id) = parse_declaration_path("asset/a/b").unwrap();
        assert_eq!(id, "a/b");

        assert!(parse_declaration_path("no-slash").is_err());
        assert!(parse_declaration_path("/empty-type").is_err());
        assert!(parse_declaration_path("empty-id/").is_err());
    }
}
