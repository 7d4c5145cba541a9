//! Directory-backed storage engine.
//!
//! State is loaded into memory when the store is opened and mirrored
//! back to disk after every mutation. Three JSON documents live under
//! the store root: `declarations.json`, `associations.json`, and
//! `status.json`. Each write goes through a temp file followed by a
//! rename, so a crash mid-write leaves the previous document intact.

use crate::error::{StorageError, StorageResult};
use crate::graph::AssociationGraph;
use crate::record::{apply_store, apply_touch, DeclarationRecord, StatusLog};
use crate::traits::{
    AssociationStore, DeclarationStore, StatusStore, StoredDeclarationStatus, StoredStatusError,
    StoredStatusReport, StoredStatusValue,
};
use ddmsync_core::{sha256_hasher, Declaration, NewHash, StatusReport};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::debug;

const DECLARATIONS_FILE: &str = "declarations.json";
const ASSOCIATIONS_FILE: &str = "associations.json";
const STATUS_FILE: &str = "status.json";

#[derive(Default)]
struct FileState {
    declarations: BTreeMap<String, DeclarationRecord>,
    graph: AssociationGraph,
    status: BTreeMap<String, StatusLog>,
}

/// A directory-backed storage engine.
///
/// All state is held in memory behind one lock and flushed to the
/// store directory after each mutation, which favors read-heavy
/// check-in traffic over concurrent writers. Opening the same
/// directory from two processes at once is not supported.
pub struct FileStore {
    root: PathBuf,
    new_hash: NewHash,
    state: RwLock<FileState>,
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> StorageResult<T> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn persist_json<T: Serialize>(root: &Path, name: &str, value: &T) -> StorageResult<()> {
    let path = root.join(name);
    let tmp = root.join(format!("{name}.tmp"));
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

impl FileStore {
    /// Opens (creating if necessary) a store rooted at `path`,
    /// hashing tokens with SHA-256.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or an existing
    /// document cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        Self::open_with_hasher(path, sha256_hasher)
    }

    /// Opens a store using the given hash factory for server-token
    /// derivation.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or an existing
    /// document cannot be read or parsed.
    pub fn open_with_hasher(path: impl Into<PathBuf>, new_hash: NewHash) -> StorageResult<Self> {
        let root = path.into();
        fs::create_dir_all(&root)?;

        let state = FileState {
            declarations: load_json(&root.join(DECLARATIONS_FILE))?,
            graph: load_json(&root.join(ASSOCIATIONS_FILE))?,
            status: load_json(&root.join(STATUS_FILE))?,
        };
        debug!(
            root = %root.display(),
            declarations = state.declarations.len(),
            "opened file store"
        );

        Ok(Self {
            root,
            new_hash,
            state: RwLock::new(state),
        })
    }

    fn persist_declarations(
        &self,
        declarations: &BTreeMap<String, DeclarationRecord>,
    ) -> StorageResult<()> {
        persist_json(&self.root, DECLARATIONS_FILE, declarations)
    }

    fn persist_associations(&self, graph: &AssociationGraph) -> StorageResult<()> {
        persist_json(&self.root, ASSOCIATIONS_FILE, graph)
    }

    fn persist_status(&self, status: &BTreeMap<String, StatusLog>) -> StorageResult<()> {
        persist_json(&self.root, STATUS_FILE, status)
    }
}

impl DeclarationStore for FileStore {
    fn store_declaration(&self, d: &Declaration) -> StorageResult<bool> {
        let mut state = self.state.write();
        let existing = state.declarations.get(&d.identifier);
        let Some(record) = apply_store(existing, d, self.new_hash, OffsetDateTime::now_utc())?
        else {
            return Ok(false);
        };
        let prev = state.declarations.insert(d.identifier.clone(), record);
        if let Err(e) = self.persist_declarations(&state.declarations) {
            // a failed persist must not leave the write visible
            match prev {
                Some(p) => state.declarations.insert(d.identifier.clone(), p),
                None => state.declarations.remove(&d.identifier),
            };
            return Err(e);
        }
        Ok(true)
    }

    fn touch_declaration(&self, declaration_id: &str) -> StorageResult<()> {
        let mut state = self.state.write();
        let record = state
            .declarations
            .get(declaration_id)
            .ok_or_else(|| StorageError::DeclarationNotFound(declaration_id.to_string()))?;
        let touched = apply_touch(record, self.new_hash, OffsetDateTime::now_utc())?;
        let prev = state.declarations.insert(declaration_id.to_string(), touched);
        if let Err(e) = self.persist_declarations(&state.declarations) {
            if let Some(p) = prev {
                state.declarations.insert(declaration_id.to_string(), p);
            }
            return Err(e);
        }
        Ok(())
    }

    fn delete_declaration(&self, declaration_id: &str) -> StorageResult<bool> {
        let mut state = self.state.write();
        if !state.declarations.contains_key(declaration_id) {
            return Ok(false);
        }
        let set_count = state.graph.declaration_sets(declaration_id).len();
        if set_count > 0 {
            return Err(StorageError::declaration_in_use(declaration_id, set_count));
        }
        let Some(removed) = state.declarations.remove(declaration_id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist_declarations(&state.declarations) {
            state.declarations.insert(declaration_id.to_string(), removed);
            return Err(e);
        }
        Ok(true)
    }

    fn retrieve_declaration(&self, declaration_id: &str) -> StorageResult<Declaration> {
        self.state
            .read()
            .declarations
            .get(declaration_id)
            .map(|record| record.declaration.clone())
            .ok_or_else(|| StorageError::DeclarationNotFound(declaration_id.to_string()))
    }

    fn declaration_mod_time(&self, declaration_id: &str) -> StorageResult<OffsetDateTime> {
        self.state
            .read()
            .declarations
            .get(declaration_id)
            .map(|record| record.modified)
            .ok_or_else(|| StorageError::DeclarationNotFound(declaration_id.to_string()))
    }

    fn list_declarations(&self) -> StorageResult<Vec<String>> {
        Ok(self.state.read().declarations.keys().cloned().collect())
    }
}

impl AssociationStore for FileStore {
    // Edge mutations stage the change on a copy of the graph and
    // commit it only once the copy is on disk, so a failed persist
    // leaves both the file and the in-memory view untouched.

    fn store_set_declaration(&self, set_name: &str, declaration_id: &str) -> StorageResult<bool> {
        let mut state = self.state.write();
        if !state.declarations.contains_key(declaration_id) {
            return Err(StorageError::DeclarationNotFound(declaration_id.to_string()));
        }
        let mut graph = state.graph.clone();
        if !graph.link_set_declaration(set_name, declaration_id) {
            return Ok(false);
        }
        self.persist_associations(&graph)?;
        state.graph = graph;
        Ok(true)
    }

    fn remove_set_declaration(&self, set_name: &str, declaration_id: &str) -> StorageResult<bool> {
        let mut state = self.state.write();
        let mut graph = state.graph.clone();
        if !graph.unlink_set_declaration(set_name, declaration_id) {
            return Ok(false);
        }
        self.persist_associations(&graph)?;
        state.graph = graph;
        Ok(true)
    }

    fn store_enrollment_set(&self, enrollment_id: &str, set_name: &str) -> StorageResult<bool> {
        let mut state = self.state.write();
        let mut graph = state.graph.clone();
        if !graph.link_enrollment_set(enrollment_id, set_name) {
            return Ok(false);
        }
        self.persist_associations(&graph)?;
        state.graph = graph;
        Ok(true)
    }

    fn remove_enrollment_set(&self, enrollment_id: &str, set_name: &str) -> StorageResult<bool> {
        let mut state = self.state.write();
        let mut graph = state.graph.clone();
        if !graph.unlink_enrollment_set(enrollment_id, set_name) {
            return Ok(false);
        }
        self.persist_associations(&graph)?;
        state.graph = graph;
        Ok(true)
    }

    fn remove_all_enrollment_sets(&self, enrollment_id: &str) -> StorageResult<bool> {
        let mut state = self.state.write();
        let mut graph = state.graph.clone();
        if !graph.unlink_all_enrollment_sets(enrollment_id) {
            return Ok(false);
        }
        self.persist_associations(&graph)?;
        state.graph = graph;
        Ok(true)
    }

    fn declaration_sets(&self, declaration_id: &str) -> StorageResult<Vec<String>> {
        Ok(self.state.read().graph.declaration_sets(declaration_id))
    }

    fn set_declarations(&self, set_name: &str) -> StorageResult<Vec<String>> {
        Ok(self.state.read().graph.set_declarations(set_name))
    }

    fn enrollment_sets(&self, enrollment_id: &str) -> StorageResult<Vec<String>> {
        Ok(self.state.read().graph.enrollment_sets(enrollment_id))
    }

    fn set_enrollments(&self, set_name: &str) -> StorageResult<Vec<String>> {
        Ok(self.state.read().graph.set_enrollments(set_name))
    }

    fn list_sets(&self) -> StorageResult<Vec<String>> {
        Ok(self.state.read().graph.sets())
    }
}

impl StatusStore for FileStore {
    fn store_status_report(
        &self,
        enrollment_id: &str,
        report: &StatusReport,
    ) -> StorageResult<()> {
        let mut state = self.state.write();
        let mut log = state.status.get(enrollment_id).cloned().unwrap_or_default();
        log.ingest(report, OffsetDateTime::now_utc());
        let prev = state.status.insert(enrollment_id.to_string(), log);
        if let Err(e) = self.persist_status(&state.status) {
            match prev {
                Some(p) => state.status.insert(enrollment_id.to_string(), p),
                None => state.status.remove(enrollment_id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn last_declaration_statuses(
        &self,
        enrollment_id: &str,
    ) -> StorageResult<Vec<StoredDeclarationStatus>> {
        Ok(self
            .state
            .read()
            .status
            .get(enrollment_id)
            .map(|log| log.declarations.clone())
            .unwrap_or_default())
    }

    fn status_values(
        &self,
        enrollment_ids: &[String],
        path_prefix: Option<&str>,
    ) -> StorageResult<HashMap<String, Vec<StoredStatusValue>>> {
        let state = self.state.read();
        let mut out = HashMap::new();
        for enrollment_id in enrollment_ids {
            let Some(log) = state.status.get(enrollment_id) else {
                continue;
            };
            let values: Vec<_> = log
                .values
                .iter()
                .filter(|v| path_prefix.is_none_or(|p| v.value.path.starts_with(p)))
                .cloned()
                .collect();
            if !values.is_empty() {
                out.insert(enrollment_id.clone(), values);
            }
        }
        Ok(out)
    }

    fn status_errors(
        &self,
        enrollment_ids: &[String],
        offset: usize,
        limit: usize,
    ) -> StorageResult<HashMap<String, Vec<StoredStatusError>>> {
        let state = self.state.read();
        let mut out = HashMap::new();
        for enrollment_id in enrollment_ids {
            let Some(log) = state.status.get(enrollment_id) else {
                continue;
            };
            let window = log.errors.iter().skip(offset);
            let errors: Vec<_> = if limit == 0 {
                window.cloned().collect()
            } else {
                window.take(limit).cloned().collect()
            };
            if !errors.is_empty() {
                out.insert(enrollment_id.clone(), errors);
            }
        }
        Ok(out)
    }

    fn status_report(
        &self,
        enrollment_id: &str,
        index: usize,
    ) -> StorageResult<StoredStatusReport> {
        self.state
            .read()
            .status
            .get(enrollment_id)
            .and_then(|log| log.reports.get(index))
            .cloned()
            .ok_or_else(|| StorageError::StatusReportNotFound {
                enrollment_id: enrollment_id.to_string(),
                index,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decl(id: &str) -> Declaration {
        Declaration::new(
            id,
            "com.apple.configuration.management.test",
            json!({"Echo": id}),
        )
    }

    #[test]
    fn reopen_restores_state() {
        let dir = tempfile::tempdir().unwrap();

        let token = {
            let store = FileStore::open(dir.path()).unwrap();
            store.store_declaration(&decl("d1")).unwrap();
            store.store_set_declaration("s1", "d1").unwrap();
            store.store_enrollment_set("e1", "s1").unwrap();
            store.retrieve_declaration("d1").unwrap().server_token
        };

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.retrieve_declaration("d1").unwrap().server_token, token);
        assert_eq!(store.enrollment_sets("e1").unwrap(), vec!["s1"]);
        assert_eq!(store.set_declarations("s1").unwrap(), vec!["d1"]);

        // re-submitting the same content after a reopen is still a
        // no-op: the salt round-tripped through disk
        assert!(!store.store_declaration(&decl("d1")).unwrap());
    }

    #[test]
    fn status_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            let report = StatusReport {
                id: Some("r1".into()),
                raw: b"{\"StatusItems\":{}}".to_vec(),
                ..StatusReport::default()
            };
            store.store_status_report("e1", &report).unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        let stored = store.status_report("e1", 0).unwrap();
        assert_eq!(stored.status_id.as_deref(), Some("r1"));
        assert_eq!(stored.raw, b"{\"StatusItems\":{}}");
    }

    #[test]
    fn open_on_fresh_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested")).unwrap();
        assert!(store.list_declarations().unwrap().is_empty());
        assert!(store.list_sets().unwrap().is_empty());
    }

    #[test]
    fn failed_persist_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.store_declaration(&decl("d1")).unwrap();
        let token = store.retrieve_declaration("d1").unwrap().server_token;

        // a directory squatting on the temp path makes every
        // declaration write fail at the fs::write step
        fs::create_dir(dir.path().join("declarations.json.tmp")).unwrap();

        assert!(store.store_declaration(&decl("d2")).is_err());
        assert!(store.retrieve_declaration("d2").unwrap_err().is_not_found());

        assert!(store.touch_declaration("d1").is_err());
        assert_eq!(store.retrieve_declaration("d1").unwrap().server_token, token);

        assert!(store.delete_declaration("d1").is_err());
        assert!(store.retrieve_declaration("d1").is_ok());

        fs::create_dir(dir.path().join("associations.json.tmp")).unwrap();
        assert!(store.store_set_declaration("s1", "d1").is_err());
        assert!(store.set_declarations("s1").unwrap().is_empty());
        assert!(store.declaration_sets("d1").unwrap().is_empty());

        fs::create_dir(dir.path().join("status.json.tmp")).unwrap();
        let report = StatusReport {
            raw: b"{}".to_vec(),
            ..StatusReport::default()
        };
        assert!(store.store_status_report("e1", &report).is_err());
        assert!(store.status_report("e1", 0).unwrap_err().is_not_found());

        // clearing the blockage makes the same writes succeed
        fs::remove_dir(dir.path().join("declarations.json.tmp")).unwrap();
        assert!(store.store_declaration(&decl("d2")).unwrap());
    }

    #[test]
    fn delete_guard_holds_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.store_declaration(&decl("d1")).unwrap();
            store.store_set_declaration("s1", "d1").unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        let err = store.delete_declaration("d1").unwrap_err();
        assert!(matches!(err, StorageError::DeclarationInUse { .. }));
    }
}
