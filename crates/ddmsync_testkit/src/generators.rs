//! Property-based test generators using proptest.

use ddmsync_core::Declaration;
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for reverse-DNS declaration identifiers.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("com\\.[a-z]{1,8}\\.[a-z0-9]{1,12}").expect("invalid regex")
}

/// Strategy for declaration types with a recognized manifest bucket.
pub fn bucketed_type_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["activation", "asset", "configuration", "management"]),
        prop::string::string_regex("[a-z]{1,10}").expect("invalid regex"),
    )
        .prop_map(|(bucket, leaf)| format!("com.apple.{bucket}.{leaf}"))
}

/// Strategy for small JSON object payloads.
pub fn payload_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::string::string_regex("[A-Z][a-zA-Z]{0,9}").expect("invalid regex"),
        prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z ]{0,16}".prop_map(Value::from),
        ],
        0..6,
    )
    .prop_map(|map| json!(map))
}

/// Strategy for complete valid declarations.
pub fn declaration_strategy() -> impl Strategy<Value = Declaration> {
    (identifier_strategy(), bucketed_type_strategy(), payload_strategy())
        .prop_map(|(id, dtype, payload)| Declaration::new(id, dtype, payload))
}

/// Strategy for set names.
pub fn set_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}").expect("invalid regex")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddmsync_core::{sha256_hasher, ManifestType};
    use ddmsync_storage::{DeclarationStore, MemoryStore};

    proptest! {
        #[test]
        fn generated_declarations_validate(d in declaration_strategy()) {
            prop_assert!(d.validate().is_ok());
            prop_assert!(ManifestType::from_declaration_type(&d.declaration_type).is_some());
        }

        #[test]
        fn storing_any_declaration_is_idempotent(d in declaration_strategy()) {
            let store = MemoryStore::with_hasher(sha256_hasher);
            prop_assert!(store.store_declaration(&d).unwrap());
            prop_assert!(!store.store_declaration(&d).unwrap());
            let token = store.retrieve_declaration(&d.identifier).unwrap().server_token;
            prop_assert!(!token.is_empty());
        }

        #[test]
        fn touch_always_changes_the_token(d in declaration_strategy()) {
            let store = MemoryStore::new();
            store.store_declaration(&d).unwrap();
            let before = store.retrieve_declaration(&d.identifier).unwrap().server_token;
            store.touch_declaration(&d.identifier).unwrap();
            let after = store.retrieve_declaration(&d.identifier).unwrap().server_token;
            prop_assert_ne!(before, after);
        }
    }
}
