//! The storage contract consumed by the core algorithms.
//!
//! Engines implement these three traits; synthesis
//! ([`crate::synth`]) and reconciliation ([`crate::reconcile`]) are
//! written once against them and never duplicated per engine.

use crate::error::StorageResult;
use ddmsync_core::{Declaration, DeclarationStatus, StatusError, StatusReport, StatusValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

/// Declaration CRUD plus server-token derivation, as one coherent
/// unit (token derivation must not be split from the write path).
pub trait DeclarationStore: Send + Sync {
    /// Stores a declaration, recomputing its server token.
    ///
    /// The inbound server token is stripped; a per-declaration random
    /// creation salt is generated at first write and kept thereafter,
    /// so re-uploading byte-identical content is idempotent. Returns
    /// `true` only if the effective content (and therefore the token)
    /// changed.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput`/`Declaration` on a malformed
    /// declaration, or an engine error.
    fn store_declaration(&self, d: &Declaration) -> StorageResult<bool>;

    /// Forces a server-token change without altering the payload, by
    /// bumping a per-declaration touch counter.
    ///
    /// # Errors
    ///
    /// Fails with `DeclarationNotFound` if the declaration does not
    /// exist.
    fn touch_declaration(&self, declaration_id: &str) -> StorageResult<()>;

    /// Deletes a declaration. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Fails with `DeclarationInUse` while the declaration is a
    /// member of any set; deletion is all-or-nothing.
    fn delete_declaration(&self, declaration_id: &str) -> StorageResult<bool>;

    /// Retrieves a declaration, including its current server token.
    ///
    /// # Errors
    ///
    /// Fails with `DeclarationNotFound` if absent.
    fn retrieve_declaration(&self, declaration_id: &str) -> StorageResult<Declaration>;

    /// Retrieves the last modification time of a declaration.
    ///
    /// # Errors
    ///
    /// Fails with `DeclarationNotFound` if absent.
    fn declaration_mod_time(&self, declaration_id: &str) -> StorageResult<OffsetDateTime>;

    /// Lists all declaration identifiers.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn list_declarations(&self) -> StorageResult<Vec<String>>;
}

/// The set/enrollment association graph with guaranteed inverse-edge
/// maintenance.
///
/// Every mutation is find-or-create / find-or-remove and reports
/// whether state actually changed; removing a non-existent
/// association is a no-op, not an error.
pub trait AssociationStore: Send + Sync {
    /// Associates a declaration with a set.
    ///
    /// # Errors
    ///
    /// Fails with `DeclarationNotFound` if the declaration does not
    /// exist.
    fn store_set_declaration(&self, set_name: &str, declaration_id: &str) -> StorageResult<bool>;

    /// Removes a declaration from a set.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn remove_set_declaration(&self, set_name: &str, declaration_id: &str) -> StorageResult<bool>;

    /// Subscribes an enrollment to a set.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn store_enrollment_set(&self, enrollment_id: &str, set_name: &str) -> StorageResult<bool>;

    /// Unsubscribes an enrollment from a set.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn remove_enrollment_set(&self, enrollment_id: &str, set_name: &str) -> StorageResult<bool>;

    /// Unsubscribes an enrollment from every set.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn remove_all_enrollment_sets(&self, enrollment_id: &str) -> StorageResult<bool>;

    /// Returns the sets a declaration is a member of.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn declaration_sets(&self, declaration_id: &str) -> StorageResult<Vec<String>>;

    /// Returns the declarations in a set.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn set_declarations(&self, set_name: &str) -> StorageResult<Vec<String>>;

    /// Returns the sets an enrollment is subscribed to.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn enrollment_sets(&self, enrollment_id: &str) -> StorageResult<Vec<String>>;

    /// Returns the enrollments subscribed to a set.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn set_enrollments(&self, set_name: &str) -> StorageResult<Vec<String>>;

    /// Returns all set names.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn list_sets(&self) -> StorageResult<Vec<String>>;

    /// Resolves the transitive enrollment fan-out of a change.
    ///
    /// Logical OR across the three seed collections: declarations are
    /// expanded to their sets, sets (direct and expanded) to their
    /// enrollments, explicit IDs pass through. The result is
    /// deduplicated and may be very large for popular sets.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn resolve_enrollment_ids(
        &self,
        declarations: &[String],
        sets: &[String],
        ids: &[String],
    ) -> StorageResult<Vec<String>> {
        let mut lookup_sets: Vec<String> = sets.to_vec();
        for declaration_id in declarations {
            lookup_sets.extend(self.declaration_sets(declaration_id)?);
        }
        let mut out: Vec<String> = ids.to_vec();
        for set_name in &lookup_sets {
            out.extend(self.set_enrollments(set_name)?);
        }
        out.sort();
        out.dedup();
        Ok(out)
    }
}

/// A status value with its storage bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStatusValue {
    /// The flattened observation.
    #[serde(flatten)]
    pub value: StatusValue,
    /// When the value was first recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The status report ID it arrived with, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
}

/// A status error with its storage bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStatusError {
    /// The recorded error.
    #[serde(flatten)]
    pub error: StatusError,
    /// When the error was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The status report ID it arrived with, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
}

/// The last-reported status of one declaration for one enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDeclarationStatus {
    /// The reported declaration status.
    #[serde(flatten)]
    pub status: DeclarationStatus,
    /// When the report carrying it was received.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The status report ID it arrived with, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
}

/// A raw status report as received, retrievable by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStatusReport {
    /// The raw report bytes.
    pub raw: Vec<u8>,
    /// The caller-supplied report ID, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
    /// When the report was received.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Persistence and retrieval of ingested status reports.
pub trait StatusStore: Send + Sync {
    /// Persists one parsed status report for an enrollment.
    ///
    /// The raw report is appended to the enrollment's report log; the
    /// last-known declaration statuses are replaced only when the
    /// report contains any (a report without declarations must not
    /// wipe them); values are merged with deduplication; errors are
    /// appended.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn store_status_report(&self, enrollment_id: &str, report: &StatusReport)
        -> StorageResult<()>;

    /// Returns the last-reported declaration statuses for an
    /// enrollment; empty if it never reported any.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn last_declaration_statuses(
        &self,
        enrollment_id: &str,
    ) -> StorageResult<Vec<StoredDeclarationStatus>>;

    /// Returns recorded status values per enrollment, optionally
    /// filtered to paths starting with `path_prefix`.
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn status_values(
        &self,
        enrollment_ids: &[String],
        path_prefix: Option<&str>,
    ) -> StorageResult<HashMap<String, Vec<StoredStatusValue>>>;

    /// Returns recorded status errors per enrollment, newest last,
    /// windowed by `offset`/`limit` (a `limit` of zero means no
    /// limit).
    ///
    /// # Errors
    ///
    /// Fails on an engine error.
    fn status_errors(
        &self,
        enrollment_ids: &[String],
        offset: usize,
        limit: usize,
    ) -> StorageResult<HashMap<String, Vec<StoredStatusError>>>;

    /// Retrieves a raw status report by its position in the
    /// enrollment's report log.
    ///
    /// # Errors
    ///
    /// Fails with `StatusReportNotFound` if the enrollment has no
    /// report at that index.
    fn status_report(&self, enrollment_id: &str, index: usize)
        -> StorageResult<StoredStatusReport>;
}

// Delegation through Arc, so one engine can back the service facade
// and the notifier at the same time.

impl<T: DeclarationStore + ?Sized> DeclarationStore for Arc<T> {
    fn store_declaration(&self, d: &Declaration) -> StorageResult<bool> {
        (**self).store_declaration(d)
    }

    fn touch_declaration(&self, declaration_id: &str) -> StorageResult<()> {
        (**self).touch_declaration(declaration_id)
    }

    fn delete_declaration(&self, declaration_id: &str) -> StorageResult<bool> {
        (**self).delete_declaration(declaration_id)
    }

    fn retrieve_declaration(&self, declaration_id: &str) -> StorageResult<Declaration> {
        (**self).retrieve_declaration(declaration_id)
    }

    fn declaration_mod_time(&self, declaration_id: &str) -> StorageResult<OffsetDateTime> {
        (**self).declaration_mod_time(declaration_id)
    }

    fn list_declarations(&self) -> StorageResult<Vec<String>> {
        (**self).list_declarations()
    }
}

impl<T: AssociationStore + ?Sized> AssociationStore for Arc<T> {
    fn store_set_declaration(&self, set_name: &str, declaration_id: &str) -> StorageResult<bool> {
        (**self).store_set_declaration(set_name, declaration_id)
    }

    fn remove_set_declaration(&self, set_name: &str, declaration_id: &str) -> StorageResult<bool> {
        (**self).remove_set_declaration(set_name, declaration_id)
    }

    fn store_enrollment_set(&self, enrollment_id: &str, set_name: &str) -> StorageResult<bool> {
        (**self).store_enrollment_set(enrollment_id, set_name)
    }

    fn remove_enrollment_set(&self, enrollment_id: &str, set_name: &str) -> StorageResult<bool> {
        (**self).remove_enrollment_set(enrollment_id, set_name)
    }

    fn remove_all_enrollment_sets(&self, enrollment_id: &str) -> StorageResult<bool> {
        (**self).remove_all_enrollment_sets(enrollment_id)
    }

    fn declaration_sets(&self, declaration_id: &str) -> StorageResult<Vec<String>> {
        (**self).declaration_sets(declaration_id)
    }

    fn set_declarations(&self, set_name: &str) -> StorageResult<Vec<String>> {
        (**self).set_declarations(set_name)
    }

    fn enrollment_sets(&self, enrollment_id: &str) -> StorageResult<Vec<String>> {
        (**self).enrollment_sets(enrollment_id)
    }

    fn set_enrollments(&self, set_name: &str) -> StorageResult<Vec<String>> {
        (**self).set_enrollments(set_name)
    }

    fn list_sets(&self) -> StorageResult<Vec<String>> {
        (**self).list_sets()
    }

    fn resolve_enrollment_ids(
        &self,
        declarations: &[String],
        sets: &[String],
        ids: &[String],
    ) -> StorageResult<Vec<String>> {
        (**self).resolve_enrollment_ids(declarations, sets, ids)
    }
}

impl<T: StatusStore + ?Sized> StatusStore for Arc<T> {
    fn store_status_report(
        &self,
        enrollment_id: &str,
        report: &StatusReport,
    ) -> StorageResult<()> {
        (**self).store_status_report(enrollment_id, report)
    }

    fn last_declaration_statuses(
        &self,
        enrollment_id: &str,
    ) -> StorageResult<Vec<StoredDeclarationStatus>> {
        (**self).last_declaration_statuses(enrollment_id)
    }

    fn status_values(
        &self,
        enrollment_ids: &[String],
        path_prefix: Option<&str>,
    ) -> StorageResult<HashMap<String, Vec<StoredStatusValue>>> {
        (**self).status_values(enrollment_ids, path_prefix)
    }

    fn status_errors(
        &self,
        enrollment_ids: &[String],
        offset: usize,
        limit: usize,
    ) -> StorageResult<HashMap<String, Vec<StoredStatusError>>> {
        (**self).status_errors(enrollment_ids, offset, limit)
    }

    fn status_report(
        &self,
        enrollment_id: &str,
        index: usize,
    ) -> StorageResult<StoredStatusReport> {
        (**self).status_report(enrollment_id, index)
    }
}
