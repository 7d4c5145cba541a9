//! Manifest synthesis against the storage contract.
//!
//! The two client-facing documents are rebuilt from live associations
//! on every read: collect the enrollment's sets, the sets'
//! declarations (deduplicated), and each declaration's current type
//! and token, then feed one pass through the core builders. The order
//! is sorted by identifier, which keeps the declarations token stable
//! across synthesis passes for an unchanged manifest.

use crate::error::StorageResult;
use crate::traits::{AssociationStore, DeclarationStore};
use crate::StorageError;
use ddmsync_core::{
    DeclarationItems, ItemsBuilder, ManifestType, NewHash, TokensBuilder, TokensResponse,
};
use std::collections::BTreeSet;

/// One declaration's contribution to an enrollment's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Declaration identifier.
    pub identifier: String,
    /// Full declaration type.
    pub declaration_type: String,
    /// Current server token.
    pub server_token: String,
}

/// Collects the manifest entries for one enrollment.
///
/// # Errors
///
/// Fails on an engine error. A dangling membership cannot occur: the
/// delete guard refuses to remove declarations still referenced by a
/// set.
pub fn manifest_entries<S>(store: &S, enrollment_id: &str) -> StorageResult<Vec<ManifestEntry>>
where
    S: DeclarationStore + AssociationStore + ?Sized,
{
    let mut declaration_ids = BTreeSet::new();
    for set_name in store.enrollment_sets(enrollment_id)? {
        declaration_ids.extend(store.set_declarations(&set_name)?);
    }

    let mut entries = Vec::with_capacity(declaration_ids.len());
    for declaration_id in declaration_ids {
        let d = store.retrieve_declaration(&declaration_id)?;
        entries.push(ManifestEntry {
            identifier: d.identifier,
            declaration_type: d.declaration_type,
            server_token: d.server_token,
        });
    }
    Ok(entries)
}

/// Synthesizes the Declaration Items document for one enrollment.
///
/// # Errors
///
/// Fails on an engine error.
pub fn declaration_items<S>(
    store: &S,
    enrollment_id: &str,
    new_hash: NewHash,
) -> StorageResult<DeclarationItems>
where
    S: DeclarationStore + AssociationStore + ?Sized,
{
    let mut builder = ItemsBuilder::new(new_hash);
    for entry in manifest_entries(store, enrollment_id)? {
        builder.add(&entry.identifier, &entry.declaration_type, &entry.server_token);
    }
    Ok(builder.finalize())
}

/// Synthesizes the Declaration Items JSON for one enrollment.
///
/// # Errors
///
/// Fails on an engine or serialization error.
pub fn declaration_items_json<S>(
    store: &S,
    enrollment_id: &str,
    new_hash: NewHash,
) -> StorageResult<Vec<u8>>
where
    S: DeclarationStore + AssociationStore + ?Sized,
{
    Ok(serde_json::to_vec(&declaration_items(
        store,
        enrollment_id,
        new_hash,
    )?)?)
}

/// Synthesizes the Synchronization Tokens document for one
/// enrollment.
///
/// # Errors
///
/// Fails on an engine error.
pub fn sync_tokens<S>(
    store: &S,
    enrollment_id: &str,
    new_hash: NewHash,
) -> StorageResult<TokensResponse>
where
    S: DeclarationStore + AssociationStore + ?Sized,
{
    let mut builder = TokensBuilder::new(new_hash);
    for entry in manifest_entries(store, enrollment_id)? {
        builder.add(&entry.server_token);
    }
    Ok(builder.finalize())
}

/// Synthesizes the Synchronization Tokens JSON for one enrollment.
///
/// # Errors
///
/// Fails on an engine or serialization error.
pub fn sync_tokens_json<S>(
    store: &S,
    enrollment_id: &str,
    new_hash: NewHash,
) -> StorageResult<Vec<u8>>
where
    S: DeclarationStore + AssociationStore + ?Sized,
{
    Ok(serde_json::to_vec(&sync_tokens(store, enrollment_id, new_hash)?)?)
}

/// Serves a declaration for a `declaration/<type>/<identifier>`
/// check-in request.
///
/// The declaration must exist, its manifest type must match the
/// requested one, and the enrollment must have transitive access
/// through one of its sets; any other outcome is indistinguishable
/// from the declaration not existing.
///
/// # Errors
///
/// Fails with `DeclarationNotFound` under any of the constraint
/// violations above, or on an engine error.
pub fn enrollment_declaration_json<S>(
    store: &S,
    declaration_id: &str,
    declaration_type: &str,
    enrollment_id: &str,
) -> StorageResult<Vec<u8>>
where
    S: DeclarationStore + AssociationStore + ?Sized,
{
    let d = store.retrieve_declaration(declaration_id)?;

    let matches_type = ManifestType::from_declaration_type(&d.declaration_type)
        .is_some_and(|mt| mt.as_str() == declaration_type);
    if !matches_type {
        return Err(StorageError::DeclarationNotFound(declaration_id.to_string()));
    }

    let mut accessible = false;
    for set_name in store.enrollment_sets(enrollment_id)? {
        if store
            .set_declarations(&set_name)?
            .iter()
            .any(|id| id == declaration_id)
        {
            accessible = true;
            break;
        }
    }
    if !accessible {
        return Err(StorageError::DeclarationNotFound(declaration_id.to_string()));
    }

    Ok(d.to_json()?)
}
