//! In-memory storage engine.

use crate::error::{StorageError, StorageResult};
use crate::graph::AssociationGraph;
use crate::record::{apply_store, apply_touch, DeclarationRecord, StatusLog};
use crate::traits::{
    AssociationStore, DeclarationStore, StatusStore, StoredDeclarationStatus, StoredStatusError,
    StoredStatusReport, StoredStatusValue,
};
use ddmsync_core::{sha256_hasher, Declaration, NewHash, StatusReport};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;

/// An in-memory storage engine.
///
/// Suitable for tests and ephemeral deployments. The three
/// collections (declarations, association graph, status logs) are
/// locked independently, so mutations of unrelated collections
/// proceed concurrently and readers never block readers.
///
/// Lock order where two are held: declarations before graph.
pub struct MemoryStore {
    new_hash: NewHash,
    declarations: RwLock<BTreeMap<String, DeclarationRecord>>,
    graph: RwLock<AssociationGraph>,
    status: RwLock<HashMap<String, StatusLog>>,
}

impl MemoryStore {
    /// Creates an empty store hashing tokens with SHA-256.
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(sha256_hasher)
    }

    /// Creates an empty store using the given hash factory for
    /// server-token derivation.
    #[must_use]
    pub fn with_hasher(new_hash: NewHash) -> Self {
        Self {
            new_hash,
            declarations: RwLock::new(BTreeMap::new()),
            graph: RwLock::new(AssociationGraph::default()),
            status: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeclarationStore for MemoryStore {
    fn store_declaration(&self, d: &Declaration) -> StorageResult<bool> {
        let mut declarations = self.declarations.write();
        let existing = declarations.get(&d.identifier);
        match apply_store(existing, d, self.new_hash, OffsetDateTime::now_utc())? {
            Some(record) => {
                declarations.insert(d.identifier.clone(), record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn touch_declaration(&self, declaration_id: &str) -> StorageResult<()> {
        let mut declarations = self.declarations.write();
        let record = declarations
            .get(declaration_id)
            .ok_or_else(|| StorageError::DeclarationNotFound(declaration_id.to_string()))?;
        let touched = apply_touch(record, self.new_hash, OffsetDateTime::now_utc())?;
        declarations.insert(declaration_id.to_string(), touched);
        Ok(())
    }

    fn delete_declaration(&self, declaration_id: &str) -> StorageResult<bool> {
        let mut declarations = self.declarations.write();
        if !declarations.contains_key(declaration_id) {
            return Ok(false);
        }
        let set_count = self.graph.read().declaration_sets(declaration_id).len();
        if set_count > 0 {
            return Err(StorageError::declaration_in_use(declaration_id, set_count));
        }
        declarations.remove(declaration_id);
        Ok(true)
    }

    fn retrieve_declaration(&self, declaration_id: &str) -> StorageResult<Declaration> {
        self.declarations
            .read()
            .get(declaration_id)
            .map(|record| record.declaration.clone())
            .ok_or_else(|| StorageError::DeclarationNotFound(declaration_id.to_string()))
    }

    fn declaration_mod_time(&self, declaration_id: &str) -> StorageResult<OffsetDateTime> {
        self.declarations
            .read()
            .get(declaration_id)
            .map(|record| record.modified)
            .ok_or_else(|| StorageError::DeclarationNotFound(declaration_id.to_string()))
    }

    fn list_declarations(&self) -> StorageResult<Vec<String>> {
        Ok(self.declarations.read().keys().cloned().collect())
    }
}

impl AssociationStore for MemoryStore {
    fn store_set_declaration(&self, set_name: &str, declaration_id: &str) -> StorageResult<bool> {
        let declarations = self.declarations.read();
        if !declarations.contains_key(declaration_id) {
            return Err(StorageError::DeclarationNotFound(declaration_id.to_string()));
        }
        Ok(self.graph.write().link_set_declaration(set_name, declaration_id))
    }

    fn remove_set_declaration(&self, set_name: &str, declaration_id: &str) -> StorageResult<bool> {
        Ok(self
            .graph
            .write()
            .unlink_set_declaration(set_name, declaration_id))
    }

    fn store_enrollment_set(&self, enrollment_id: &str, set_name: &str) -> StorageResult<bool> {
        Ok(self
            .graph
            .write()
            .link_enrollment_set(enrollment_id, set_name))
    }

    fn remove_enrollment_set(&self, enrollment_id: &str, set_name: &str) -> StorageResult<bool> {
        Ok(self
            .graph
            .write()
            .unlink_enrollment_set(enrollment_id, set_name))
    }

    fn remove_all_enrollment_sets(&self, enrollment_id: &str) -> StorageResult<bool> {
        Ok(self.graph.write().unlink_all_enrollment_sets(enrollment_id))
    }

    fn declaration_sets(&self, declaration_id: &str) -> StorageResult<Vec<String>> {
        Ok(self.graph.read().declaration_sets(declaration_id))
    }

    fn set_declarations(&self, set_name: &str) -> StorageResult<Vec<String>> {
        Ok(self.graph.read().set_declarations(set_name))
    }

    fn enrollment_sets(&self, enrollment_id: &str) -> StorageResult<Vec<String>> {
        Ok(self.graph.read().enrollment_sets(enrollment_id))
    }

    fn set_enrollments(&self, set_name: &str) -> StorageResult<Vec<String>> {
        Ok(self.graph.read().set_enrollments(set_name))
    }

    fn list_sets(&self) -> StorageResult<Vec<String>> {
        Ok(self.graph.read().sets())
    }
}

impl StatusStore for MemoryStore {
    fn store_status_report(
        &self,
        enrollment_id: &str,
        report: &StatusReport,
    ) -> StorageResult<()> {
        self.status
            .write()
            .entry(enrollment_id.to_string())
            .or_default()
            .ingest(report, OffsetDateTime::now_utc());
        Ok(())
    }

    fn last_declaration_statuses(
        &self,
        enrollment_id: &str,
    ) -> StorageResult<Vec<StoredDeclarationStatus>> {
        Ok(self
            .status
            .read()
            .get(enrollment_id)
            .map(|log| log.declarations.clone())
            .unwrap_or_default())
    }

    fn status_values(
        &self,
        enrollment_ids: &[String],
        path_prefix: Option<&str>,
    ) -> StorageResult<HashMap<String, Vec<StoredStatusValue>>> {
        let status = self.status.read();
        let mut out = HashMap::new();
        for enrollment_id in enrollment_ids {
            let Some(log) = status.get(enrollment_id) else {
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
        let status = self.status.read();
        let mut out = HashMap::new();
        for enrollment_id in enrollment_ids {
            let Some(log) = status.get(enrollment_id) else {
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
        self.status
            .read()
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
    fn delete_refuses_while_in_a_set() {
        let store = MemoryStore::new();
        store.store_declaration(&decl("d1")).unwrap();
        store.store_set_declaration("s1", "d1").unwrap();

        let err = store.delete_declaration("d1").unwrap_err();
        assert!(matches!(err, StorageError::DeclarationInUse { .. }));

        store.remove_set_declaration("s1", "d1").unwrap();
        assert!(store.delete_declaration("d1").unwrap());
        assert!(!store.delete_declaration("d1").unwrap());
    }

    #[test]
    fn set_membership_requires_an_existing_declaration() {
        let store = MemoryStore::new();
        let err = store.store_set_declaration("s1", "missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn mod_time_tracks_changes() {
        let store = MemoryStore::new();
        store.store_declaration(&decl("d1")).unwrap();
        let first = store.declaration_mod_time("d1").unwrap();

        // an identical re-submission is a no-op and keeps the time
        assert!(!store.store_declaration(&decl("d1")).unwrap());
        assert_eq!(store.declaration_mod_time("d1").unwrap(), first);
    }

    #[test]
    fn status_report_index_is_append_order() {
        let store = MemoryStore::new();
        let report = StatusReport {
            raw: b"{\"StatusItems\":{}}".to_vec(),
            ..StatusReport::default()
        };
        store.store_status_report("e1", &report).unwrap();
        store.store_status_report("e1", &report).unwrap();

        assert!(store.status_report("e1", 1).is_ok());
        let err = store.status_report("e1", 2).unwrap_err();
        assert!(err.is_not_found());
        assert!(store.status_report("e2", 0).unwrap_err().is_not_found());
    }
}
