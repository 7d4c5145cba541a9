//! Identifier-reference extraction for known declaration types.
//!
//! Some declaration payloads reference other declarations by
//! identifier (e.g. an activation referencing its configurations, or
//! a mail account referencing a credentials asset). The key paths are
//! fixed per declaration type. The extracted references are derived,
//! read-only data; they are never persisted as authoritative edges.

use crate::declaration::Declaration;
use serde_json::Value;

/// Payload key paths containing referenced declaration identifiers,
/// keyed by declaration type.
const IDENTIFIER_REFS: &[(&str, &[&[&str]])] = &[
    ("com.apple.activation.simple", &[&["StandardConfigurations"]]),
    (
        "com.apple.configuration.account.caldav",
        &[&["AuthenticationCredentialsAssetReference"]],
    ),
    (
        "com.apple.configuration.account.carddav",
        &[&["AuthenticationCredentialsAssetReference"]],
    ),
    (
        "com.apple.configuration.account.exchange",
        &[
            &["UserIdentityAssetReference"],
            &["AuthenticationCredentialsAssetReference"],
        ],
    ),
    (
        "com.apple.configuration.account.google",
        &[&["UserIdentityAssetReference"]],
    ),
    (
        "com.apple.configuration.account.ldap",
        &[&["AuthenticationCredentialsAssetReference"]],
    ),
    (
        "com.apple.configuration.account.mail",
        &[
            &["UserIdentityAssetReference"],
            &["IncomingServer", "AuthenticationCredentialsAssetReference"],
            &["OutgoingServer", "AuthenticationCredentialsAssetReference"],
        ],
    ),
    (
        "com.apple.configuration.account.subscribed-calendar",
        &[&["AuthenticationCredentialsAssetReference"]],
    ),
];

/// Follows a key path into a JSON object.
fn lookup<'a>(mut v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    for key in path {
        v = v.get(key)?;
    }
    Some(v)
}

/// Returns the declaration identifiers referenced by `d`'s payload.
///
/// Both a single string value and an array of strings are accepted at
/// a reference key path. Unknown declaration types yield an empty
/// list.
#[must_use]
pub fn identifier_refs(d: &Declaration) -> Vec<String> {
    let Some((_, paths)) = IDENTIFIER_REFS
        .iter()
        .find(|(t, _)| *t == d.declaration_type)
    else {
        return Vec::new();
    };

    let mut refs = Vec::new();
    for path in *paths {
        match lookup(&d.payload, path) {
            Some(Value::String(s)) => refs.push(s.clone()),
            Some(Value::Array(a)) => {
                refs.extend(a.iter().filter_map(|v| v.as_str().map(String::from)));
            }
            _ => {}
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn activation_references() {
        let d = Declaration::new(
            "act1",
            "com.apple.activation.simple",
            json!({"StandardConfigurations": ["com.example.cfg1", "com.example.cfg2"]}),
        );
        assert_eq!(
            identifier_refs(&d),
            vec!["com.example.cfg1", "com.example.cfg2"]
        );
    }

    #[test]
    fn nested_reference_paths() {
        let d = Declaration::new(
            "mail1",
            "com.apple.configuration.account.mail",
            json!({
                "UserIdentityAssetReference": "com.example.identity",
                "IncomingServer": {"AuthenticationCredentialsAssetReference": "com.example.creds"}
            }),
        );
        assert_eq!(
            identifier_refs(&d),
            vec!["com.example.identity", "com.example.creds"]
        );
    }

    #[test]
    fn unknown_type_has_no_refs() {
        let d = Declaration::new(
            "x",
            "com.apple.configuration.passcode.settings",
            json!({"StandardConfigurations": ["ignored"]}),
        );
        assert!(identifier_refs(&d).is_empty());
    }
}
