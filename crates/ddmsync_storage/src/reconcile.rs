//! Reconciliation of reported status against the expected manifest.

use crate::error::StorageResult;
use crate::synth;
use crate::traits::{AssociationStore, DeclarationStore, StatusStore};
use ddmsync_core::{DeclarationQueryStatus, DeclarationStatus, ManifestType};
use std::collections::{BTreeMap, HashMap};

/// Joins each enrollment's last-reported declaration statuses against
/// its currently synthesized manifest.
///
/// For every declaration in the manifest: if the client reported on
/// it, the record carries the report plus
/// `current = (reported token == expected token)`; if it never did, a
/// placeholder (expected token, `active = false`, `valid` empty)
/// makes the gap visible. Reports on declarations no longer in the
/// manifest are ignored. Enrollments with an empty manifest are
/// omitted from the result.
///
/// Declarations of unrecognized manifest type are not advertised in
/// Declaration Items and are likewise invisible here.
///
/// # Errors
///
/// Fails on an engine error.
pub fn declaration_status<S>(
    store: &S,
    enrollment_ids: &[String],
) -> StorageResult<HashMap<String, Vec<DeclarationQueryStatus>>>
where
    S: DeclarationStore + AssociationStore + StatusStore + ?Sized,
{
    let mut out = HashMap::new();

    for enrollment_id in enrollment_ids {
        let mut expected: BTreeMap<String, DeclarationQueryStatus> = BTreeMap::new();
        for entry in synth::manifest_entries(store, enrollment_id)? {
            if ManifestType::from_declaration_type(&entry.declaration_type).is_none() {
                continue;
            }
            expected.insert(
                entry.identifier.clone(),
                DeclarationQueryStatus {
                    status: DeclarationStatus {
                        identifier: entry.identifier,
                        server_token: entry.server_token,
                        ..DeclarationStatus::default()
                    },
                    current: false,
                    status_received: None,
                    status_id: None,
                },
            );
        }
        if expected.is_empty() {
            continue;
        }

        for stored in store.last_declaration_statuses(enrollment_id)? {
            let Some(slot) = expected.get_mut(&stored.status.identifier) else {
                // reported on a declaration no longer configured
                continue;
            };
            let current = stored.status.server_token == slot.status.server_token;
            *slot = DeclarationQueryStatus {
                status: stored.status,
                current,
                status_received: Some(stored.timestamp),
                status_id: stored.status_id,
            };
        }

        out.insert(
            enrollment_id.clone(),
            expected.into_values().collect(),
        );
    }
    Ok(out)
}
