//! The operation facade tying storage, synthesis, and notification
//! together.

use crate::error::{ServiceError, ServiceResult};
use ddmsync_core::{
    parse_declaration_path, parse_status_report, sha256_hasher, Declaration,
    DeclarationQueryStatus, NewHash,
};
use ddmsync_notify::ChangeNotifier;
use ddmsync_storage::{
    reconcile, synth, Store, StoredStatusError, StoredStatusReport, StoredStatusValue,
};
use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::{error, info};

/// One method per management and check-in operation.
///
/// Every mutation follows the same convention: apply to storage
/// first, then announce the change. A failed announcement never rolls
/// the mutation back; it is logged and the operation still reports
/// success, because the stored state is what clients will observe on
/// their next synchronization anyway.
pub struct Service<S, N> {
    store: S,
    notifier: N,
    new_hash: NewHash,
}

impl<S, N> Service<S, N>
where
    S: Store,
    N: ChangeNotifier,
{
    /// Creates a service hashing manifest tokens with SHA-256.
    pub fn new(store: S, notifier: N) -> Self {
        Self {
            store,
            notifier,
            new_hash: sha256_hasher,
        }
    }

    /// Overrides the hash factory used for manifest synthesis. Must
    /// match the factory the store derives server tokens with.
    #[must_use]
    pub fn with_hasher(mut self, new_hash: NewHash) -> Self {
        self.new_hash = new_hash;
        self
    }

    /// The underlying store, for conformance checks and migrations.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn notify(&self, declarations: &[String], sets: &[String], ids: &[String]) {
        if let Err(e) = self.notifier.changed(declarations, sets, ids) {
            error!(error = %e, "notifying changed enrollments");
        }
    }

    // --- declarations ---

    /// Stores a declaration from raw JSON; `true` if anything
    /// changed. Affected enrollments are notified only on change.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, a malformed declaration, or a storage
    /// error.
    pub fn put_declaration(&self, raw: &[u8]) -> ServiceResult<bool> {
        let d = Declaration::from_slice(raw).map_err(ddmsync_storage::StorageError::from)?;
        let changed = self.store.store_declaration(&d)?;
        if changed {
            info!(identifier = %d.identifier, "declaration stored");
            self.notify(&[d.identifier], &[], &[]);
        }
        Ok(changed)
    }

    /// Forces a server-token change for a declaration and notifies
    /// affected enrollments.
    ///
    /// # Errors
    ///
    /// Fails if the declaration does not exist.
    pub fn touch_declaration(&self, declaration_id: &str) -> ServiceResult<()> {
        self.store.touch_declaration(declaration_id)?;
        self.notify(&[declaration_id.to_string()], &[], &[]);
        Ok(())
    }

    /// Deletes a declaration; `true` if it existed.
    ///
    /// No notification: deletion is refused while any set references
    /// the declaration, so a successful delete can never affect an
    /// enrollment's manifest.
    ///
    /// # Errors
    ///
    /// Fails with a referential-conflict error while the declaration
    /// is in use.
    pub fn delete_declaration(&self, declaration_id: &str) -> ServiceResult<bool> {
        Ok(self.store.delete_declaration(declaration_id)?)
    }

    /// Retrieves a declaration with its current server token.
    ///
    /// # Errors
    ///
    /// Fails if the declaration does not exist.
    pub fn declaration(&self, declaration_id: &str) -> ServiceResult<Declaration> {
        Ok(self.store.retrieve_declaration(declaration_id)?)
    }

    /// Retrieves the last modification time of a declaration.
    ///
    /// # Errors
    ///
    /// Fails if the declaration does not exist.
    pub fn declaration_mod_time(&self, declaration_id: &str) -> ServiceResult<OffsetDateTime> {
        Ok(self.store.declaration_mod_time(declaration_id)?)
    }

    /// Lists all declaration identifiers.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn declarations(&self) -> ServiceResult<Vec<String>> {
        Ok(self.store.list_declarations()?)
    }

    /// The declaration identifiers a declaration's payload references,
    /// per the known-type reference table. Empty for unknown types.
    ///
    /// # Errors
    ///
    /// Fails if the declaration does not exist.
    pub fn declaration_references(&self, declaration_id: &str) -> ServiceResult<Vec<String>> {
        let d = self.store.retrieve_declaration(declaration_id)?;
        Ok(ddmsync_core::identifier_refs(&d))
    }

    // --- sets ---

    /// Adds a declaration to a set; `true` if the association was
    /// new. The set's enrollments are notified only on change.
    ///
    /// # Errors
    ///
    /// Fails if the declaration does not exist.
    pub fn put_set_declaration(&self, set_name: &str, declaration_id: &str) -> ServiceResult<bool> {
        let changed = self.store.store_set_declaration(set_name, declaration_id)?;
        if changed {
            self.notify(&[], &[set_name.to_string()], &[]);
        }
        Ok(changed)
    }

    /// Removes a declaration from a set; `true` if the association
    /// existed.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn delete_set_declaration(
        &self,
        set_name: &str,
        declaration_id: &str,
    ) -> ServiceResult<bool> {
        let changed = self.store.remove_set_declaration(set_name, declaration_id)?;
        if changed {
            self.notify(&[], &[set_name.to_string()], &[]);
        }
        Ok(changed)
    }

    /// Lists all set names.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn sets(&self) -> ServiceResult<Vec<String>> {
        Ok(self.store.list_sets()?)
    }

    /// The declarations in a set.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn set_declarations(&self, set_name: &str) -> ServiceResult<Vec<String>> {
        Ok(self.store.set_declarations(set_name)?)
    }

    /// The sets a declaration is a member of.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn declaration_sets(&self, declaration_id: &str) -> ServiceResult<Vec<String>> {
        Ok(self.store.declaration_sets(declaration_id)?)
    }

    // --- enrollments ---

    /// Subscribes an enrollment to a set; `true` if the subscription
    /// was new. The enrollment is notified only on change.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn put_enrollment_set(&self, enrollment_id: &str, set_name: &str) -> ServiceResult<bool> {
        let changed = self.store.store_enrollment_set(enrollment_id, set_name)?;
        if changed {
            self.notify(&[], &[], &[enrollment_id.to_string()]);
        }
        Ok(changed)
    }

    /// Unsubscribes an enrollment from a set; `true` if the
    /// subscription existed.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn delete_enrollment_set(
        &self,
        enrollment_id: &str,
        set_name: &str,
    ) -> ServiceResult<bool> {
        let changed = self.store.remove_enrollment_set(enrollment_id, set_name)?;
        if changed {
            self.notify(&[], &[], &[enrollment_id.to_string()]);
        }
        Ok(changed)
    }

    /// Unsubscribes an enrollment from every set; `true` if any
    /// subscription existed.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn delete_all_enrollment_sets(&self, enrollment_id: &str) -> ServiceResult<bool> {
        let changed = self.store.remove_all_enrollment_sets(enrollment_id)?;
        if changed {
            self.notify(&[], &[], &[enrollment_id.to_string()]);
        }
        Ok(changed)
    }

    /// The sets an enrollment is subscribed to.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn enrollment_sets(&self, enrollment_id: &str) -> ServiceResult<Vec<String>> {
        Ok(self.store.enrollment_sets(enrollment_id)?)
    }

    /// The enrollments subscribed to a set.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn set_enrollments(&self, set_name: &str) -> ServiceResult<Vec<String>> {
        Ok(self.store.set_enrollments(set_name)?)
    }

    // --- check-in protocol ---

    /// Synthesizes the Declaration Items JSON for an enrollment.
    ///
    /// # Errors
    ///
    /// Fails on a storage or serialization error.
    pub fn declaration_items(&self, enrollment_id: &str) -> ServiceResult<Vec<u8>> {
        Ok(synth::declaration_items_json(
            &self.store,
            enrollment_id,
            self.new_hash,
        )?)
    }

    /// Synthesizes the Synchronization Tokens JSON for an enrollment.
    ///
    /// # Errors
    ///
    /// Fails on a storage or serialization error.
    pub fn sync_tokens(&self, enrollment_id: &str) -> ServiceResult<Vec<u8>> {
        Ok(synth::sync_tokens_json(
            &self.store,
            enrollment_id,
            self.new_hash,
        )?)
    }

    /// Serves a declaration for a `declaration/<type>/<identifier>`
    /// check-in request path.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidInput` on a malformed path, and not-found
    /// when the declaration is absent, of a different manifest type,
    /// or not transitively accessible by the enrollment.
    pub fn enrollment_declaration(
        &self,
        path: &str,
        enrollment_id: &str,
    ) -> ServiceResult<Vec<u8>> {
        let (declaration_type, declaration_id) = parse_declaration_path(path)
            .map_err(|e| ServiceError::invalid_input(e.to_string()))?;
        Ok(synth::enrollment_declaration_json(
            &self.store,
            declaration_id,
            declaration_type,
            enrollment_id,
        )?)
    }

    /// Ingests a raw status report from an enrollment.
    ///
    /// `status_id` is an optional caller-supplied identifier (e.g. a
    /// request ID minted by the transport); it is stored alongside
    /// every record derived from the report.
    ///
    /// # Errors
    ///
    /// Fails if the report cannot be parsed or persisted.
    pub fn put_status(
        &self,
        enrollment_id: &str,
        status_id: Option<&str>,
        raw: &[u8],
    ) -> ServiceResult<()> {
        let mut report = parse_status_report(raw)?;
        report.id = status_id.map(String::from);
        info!(
            enrollment_id,
            status_id,
            declarations = report.declarations.len(),
            errors = report.errors.len(),
            values = report.values.len(),
            "status report received"
        );
        self.store.store_status_report(enrollment_id, &report)?;
        Ok(())
    }

    // --- status queries ---

    /// Reconciles each enrollment's reported statuses against its
    /// current manifest.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn declaration_status(
        &self,
        enrollment_ids: &[String],
    ) -> ServiceResult<HashMap<String, Vec<DeclarationQueryStatus>>> {
        Ok(reconcile::declaration_status(&self.store, enrollment_ids)?)
    }

    /// Recorded status values per enrollment, optionally filtered by
    /// path prefix.
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn status_values(
        &self,
        enrollment_ids: &[String],
        path_prefix: Option<&str>,
    ) -> ServiceResult<HashMap<String, Vec<StoredStatusValue>>> {
        Ok(self.store.status_values(enrollment_ids, path_prefix)?)
    }

    /// Recorded status errors per enrollment, windowed by
    /// offset/limit (a limit of zero means no limit).
    ///
    /// # Errors
    ///
    /// Fails on a storage error.
    pub fn status_errors(
        &self,
        enrollment_ids: &[String],
        offset: usize,
        limit: usize,
    ) -> ServiceResult<HashMap<String, Vec<StoredStatusError>>> {
        Ok(self.store.status_errors(enrollment_ids, offset, limit)?)
    }

    /// A raw status report by its position in an enrollment's report
    /// log.
    ///
    /// # Errors
    ///
    /// Fails if no report exists at that index.
    pub fn status_report(
        &self,
        enrollment_id: &str,
        index: usize,
    ) -> ServiceResult<StoredStatusReport> {
        Ok(self.store.status_report(enrollment_id, index)?)
    }
}
