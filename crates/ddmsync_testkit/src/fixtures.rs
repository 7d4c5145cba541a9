//! Test fixtures: sample declarations and a status payload corpus.

use ddmsync_core::Declaration;
use ddmsync_storage::{FileStore, MemoryStore, Store};
use serde_json::json;
use tempfile::TempDir;

/// A sample configuration declaration.
#[must_use]
pub fn configuration(identifier: &str) -> Declaration {
    Declaration::new(
        identifier,
        "com.apple.configuration.management.test",
        json!({"Echo": identifier}),
    )
}

/// A sample activation declaration referencing `configuration_ids`.
#[must_use]
pub fn activation(identifier: &str, configuration_ids: &[&str]) -> Declaration {
    Declaration::new(
        identifier,
        "com.apple.activation.simple",
        json!({"StandardConfigurations": configuration_ids}),
    )
}

/// A sample asset declaration.
#[must_use]
pub fn asset(identifier: &str) -> Declaration {
    Declaration::new(
        identifier,
        "com.apple.asset.data",
        json!({"Reference": {"DataURL": format!("https://example.com/{identifier}")}}),
    )
}

/// A declaration whose type has no manifest bucket.
#[must_use]
pub fn unbucketed(identifier: &str) -> Declaration {
    Declaration::new(identifier, "com.example.custom.type", json!({"A": 1}))
}

/// A status report declaring one compliant declaration.
#[must_use]
pub fn compliant_status(identifier: &str, server_token: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "StatusItems": {"management": {"declarations": {
            "configurations": [{
                "identifier": identifier,
                "active": true,
                "valid": "valid",
                "server-token": server_token,
            }],
            "activations": [],
            "assets": [],
            "management": [],
        }}}
    }))
    .unwrap()
}

/// A status report declaring one broken declaration (inactive and
/// invalid, with reasons).
#[must_use]
pub fn broken_status(identifier: &str, server_token: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "StatusItems": {"management": {"declarations": {
            "configurations": [{
                "identifier": identifier,
                "active": false,
                "valid": "invalid",
                "server-token": server_token,
                "reasons": [{"code": "Error.ConfigurationCannotBeApplied"}],
            }],
        }}}
    }))
    .unwrap()
}

/// A status report carrying only generic device values.
#[must_use]
pub fn device_values_status() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "StatusItems": {"device": {
            "model": {"family": "iPhone", "identifier": "iPhone14,2"},
            "operating-system": {"build-version": "23A339", "family": "iOS",
                                 "supplemental": {"build-version": null}},
        }}
    }))
    .unwrap()
}

/// A status report with top-level client errors.
#[must_use]
pub fn errors_status() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "Errors": [
            {"StatusItem": "management.declarations", "ReasonsV1": [{"code": "Error.Timeout"}]}
        ]
    }))
    .unwrap()
}

/// One test store per engine, with automatic cleanup of the
/// file-backed one.
pub struct TestStore {
    store: Box<dyn Store>,
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory test store.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            _temp_dir: None,
        }
    }

    /// Creates a file-backed test store in a temporary directory.
    #[must_use]
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("creating temp directory");
        let store = FileStore::open(temp_dir.path()).expect("opening file store");
        Self {
            store: Box::new(store),
            _temp_dir: Some(temp_dir),
        }
    }

    /// The store as the full contract.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }
}

/// Runs `f` once per storage engine.
pub fn for_each_engine(f: impl Fn(&dyn Store)) {
    let memory = TestStore::memory();
    f(memory.store());

    let file = TestStore::file();
    f(file.store());
}
