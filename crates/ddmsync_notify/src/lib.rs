//! # ddmsync notify
//!
//! Change notification fan-out. When declarations, sets, or
//! enrollments change, the affected enrollment IDs are resolved
//! transitively through the association graph and handed to an
//! [`Enqueuer`] for delivery. Actual command delivery (MDM enqueue
//! APIs, push) lives outside this workspace; implementations of the
//! trait adapt to whichever MDM server fronts the enrollments.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ddmsync_core::{sha256_hasher, NewHash};
use ddmsync_storage::{synth, AssociationStore, DeclarationStore, StorageError};
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors raised while resolving or dispatching a change.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The affected-enrollment resolution failed.
    #[error("resolving enrollments: {0}")]
    Storage(#[from] StorageError),

    /// The enqueuer rejected a batch.
    #[error("enqueue failed: {0}")]
    Enqueue(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Receives resolved enrollment batches for delivery.
///
/// `tokens_json` carries the enrollment's current Synchronization
/// Tokens document when the notifier could attach it, letting capable
/// delivery paths short-circuit an unchanged client without a
/// round-trip.
pub trait Enqueuer: Send + Sync {
    /// Delivers a declarative-management command to a batch of
    /// enrollments.
    ///
    /// # Errors
    ///
    /// Fails if the batch could not be handed off for delivery.
    fn enqueue(
        &self,
        enrollment_ids: &[String],
        tokens_json: Option<&[u8]>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// The interface mutation paths use to announce a change.
///
/// Seed collections follow the change that happened: a declaration
/// edit seeds `declarations`, a set-membership change seeds `sets`, an
/// enrollment subscription change seeds `ids`. Any combination is
/// valid; empty seeds resolve to nobody and are a quiet no-op.
pub trait ChangeNotifier: Send + Sync {
    /// Announces that the named declarations, sets, and enrollments
    /// changed.
    ///
    /// # Errors
    ///
    /// Fails if resolution or hand-off failed; the underlying
    /// mutation has already been applied either way.
    fn changed(
        &self,
        declarations: &[String],
        sets: &[String],
        ids: &[String],
    ) -> NotifyResult<()>;
}

/// Resolves changes to enrollment batches and feeds an [`Enqueuer`].
pub struct Notifier<S, E> {
    store: S,
    enqueuer: E,
    new_hash: NewHash,
    multi_targeting: bool,
    tokens_for_single_id: bool,
}

impl<S, E> Notifier<S, E>
where
    S: DeclarationStore + AssociationStore,
    E: Enqueuer,
{
    /// Creates a notifier that targets all affected enrollments with
    /// one batch and attaches Sync Tokens to single-enrollment
    /// batches.
    pub fn new(store: S, enqueuer: E) -> Self {
        Self {
            store,
            enqueuer,
            new_hash: sha256_hasher,
            multi_targeting: true,
            tokens_for_single_id: true,
        }
    }

    /// Sends one single-enrollment batch per affected enrollment, for
    /// delivery paths without multi-targeting support.
    #[must_use]
    pub fn with_per_enrollment_batches(mut self) -> Self {
        self.multi_targeting = false;
        self
    }

    /// Disables attaching Sync Tokens to single-enrollment batches.
    #[must_use]
    pub fn without_single_id_tokens(mut self) -> Self {
        self.tokens_for_single_id = false;
        self
    }

    /// Overrides the hash factory used when synthesizing attached
    /// Sync Tokens. Must match the factory the store derives tokens
    /// with.
    #[must_use]
    pub fn with_hasher(mut self, new_hash: NewHash) -> Self {
        self.new_hash = new_hash;
        self
    }

    fn dispatch(&self, batch: &[String]) -> NotifyResult<()> {
        let tokens_json = if batch.len() == 1 && self.tokens_for_single_id {
            match synth::sync_tokens_json(&self.store, &batch[0], self.new_hash) {
                Ok(json) => Some(json),
                Err(e) => {
                    // deliver anyway; the client will fetch tokens itself
                    warn!(enrollment_id = %batch[0], error = %e, "synthesizing tokens for notification");
                    None
                }
            }
        } else {
            None
        };
        self.enqueuer
            .enqueue(batch, tokens_json.as_deref())
            .map_err(NotifyError::Enqueue)
    }
}

impl<S, E> ChangeNotifier for Notifier<S, E>
where
    S: DeclarationStore + AssociationStore,
    E: Enqueuer,
{
    fn changed(
        &self,
        declarations: &[String],
        sets: &[String],
        ids: &[String],
    ) -> NotifyResult<()> {
        let resolved = self.store.resolve_enrollment_ids(declarations, sets, ids)?;
        if resolved.is_empty() {
            debug!("no enrollments to notify");
            return Ok(());
        }
        debug!(count = resolved.len(), first = %resolved[0], "notifying enrollments");

        if self.multi_targeting {
            self.dispatch(&resolved)
        } else {
            for id in &resolved {
                self.dispatch(std::slice::from_ref(id))?;
            }
            Ok(())
        }
    }
}

/// A notifier that drops every change, for deployments without a
/// delivery path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopNotifier;

impl ChangeNotifier for NopNotifier {
    fn changed(&self, _: &[String], _: &[String], _: &[String]) -> NotifyResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddmsync_core::Declaration;
    use ddmsync_storage::MemoryStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct RecordingEnqueuer {
        batches: Arc<Mutex<Vec<(Vec<String>, bool)>>>,
    }

    impl Enqueuer for RecordingEnqueuer {
        fn enqueue(
            &self,
            enrollment_ids: &[String],
            tokens_json: Option<&[u8]>,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.batches
                .lock()
                .push((enrollment_ids.to_vec(), tokens_json.is_some()));
            Ok(())
        }
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .store_declaration(&Declaration::new(
                "com.example.a",
                "com.apple.configuration.management.test",
                json!({"Echo": "a"}),
            ))
            .unwrap();
        store.store_set_declaration("default", "com.example.a").unwrap();
        store.store_enrollment_set("e1", "default").unwrap();
        store.store_enrollment_set("e2", "default").unwrap();
        store
    }

    #[test]
    fn declaration_change_fans_out_to_subscribers() {
        let enqueuer = RecordingEnqueuer::default();
        let notifier = Notifier::new(seeded_store(), enqueuer.clone());

        notifier
            .changed(&["com.example.a".into()], &[], &[])
            .unwrap();

        let batches = enqueuer.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, vec!["e1", "e2"]);
        // multi-enrollment batches carry no tokens
        assert!(!batches[0].1);
    }

    #[test]
    fn single_enrollment_batch_carries_tokens() {
        let enqueuer = RecordingEnqueuer::default();
        let notifier = Notifier::new(seeded_store(), enqueuer.clone());

        notifier.changed(&[], &[], &["e1".into()]).unwrap();

        let batches = enqueuer.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, vec!["e1"]);
        assert!(batches[0].1);
    }

    #[test]
    fn per_enrollment_mode_splits_batches() {
        let enqueuer = RecordingEnqueuer::default();
        let notifier =
            Notifier::new(seeded_store(), enqueuer.clone()).with_per_enrollment_batches();

        notifier.changed(&[], &["default".into()], &[]).unwrap();

        let batches = enqueuer.batches.lock();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|(ids, has_tokens)| ids.len() == 1 && *has_tokens));
    }

    #[test]
    fn no_affected_enrollments_is_quiet() {
        let enqueuer = RecordingEnqueuer::default();
        let notifier = Notifier::new(MemoryStore::new(), enqueuer.clone());

        notifier.changed(&["com.example.unknown".into()], &[], &[]).unwrap();
        assert!(enqueuer.batches.lock().is_empty());
    }
}
