//! Shared per-declaration records and status-log bookkeeping.
//!
//! Both engines persist the same record shapes and run the same
//! mutation logic; only the persistence differs. Server-token
//! derivation lives here so it cannot drift between engines.

use crate::error::StorageResult;
use crate::traits::{
    StoredDeclarationStatus, StoredStatusError, StoredStatusReport, StoredStatusValue,
};
use ddmsync_core::{Declaration, NewHash, StatusReport};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Length of the per-declaration creation salt in bytes.
const SALT_LEN: usize = 32;

/// A stored declaration with the inputs its token derives from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DeclarationRecord {
    /// The declaration, with its current server token.
    pub declaration: Declaration,
    /// Hex-encoded creation salt, generated once at first write.
    pub salt: String,
    /// Touch counter; bumped to force a token change.
    pub touch: u64,
    /// First write time.
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    /// Last change time.
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
}

/// Derives the server token from declaration content.
///
/// One-way function of `{payload, salt, identifier, type, touch}`.
/// The payload is canonicalized through `serde_json` (object keys are
/// ordered), so a byte-different but semantically identical upload
/// still derives the same token. Wall-clock time never participates;
/// tokens are reproducible from stored inputs.
fn derive_token(
    new_hash: NewHash,
    d: &Declaration,
    salt: &[u8],
    touch: u64,
) -> StorageResult<String> {
    let mut hasher = new_hash();
    hasher.update(&serde_json::to_vec(&d.payload)?);
    hasher.update(salt);
    hasher.update(d.identifier.as_bytes());
    hasher.update(d.declaration_type.as_bytes());
    hasher.update(touch.to_string().as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Computes the stored record for a declaration write.
///
/// Returns `None` when the derived token matches the existing record,
/// i.e. a no-op re-submission.
pub(crate) fn apply_store(
    existing: Option<&DeclarationRecord>,
    d: &Declaration,
    new_hash: NewHash,
    now: OffsetDateTime,
) -> StorageResult<Option<DeclarationRecord>> {
    let mut d = d.without_token();
    d.validate()?;

    let (salt, touch, created) = match existing {
        Some(record) => (record.salt.clone(), record.touch, record.created),
        None => (hex::encode(rand::random::<[u8; SALT_LEN]>()), 0, now),
    };
    let salt_bytes = hex::decode(&salt)
        .map_err(|e| crate::StorageError::invalid_input(format!("corrupt salt: {e}")))?;

    let token = derive_token(new_hash, &d, &salt_bytes, touch)?;
    if let Some(record) = existing {
        if record.declaration.server_token == token {
            return Ok(None);
        }
    }

    d.server_token = token;
    Ok(Some(DeclarationRecord {
        declaration: d,
        salt,
        touch,
        created,
        modified: now,
    }))
}

/// Bumps the touch counter and re-derives the token.
pub(crate) fn apply_touch(
    record: &DeclarationRecord,
    new_hash: NewHash,
    now: OffsetDateTime,
) -> StorageResult<DeclarationRecord> {
    let touch = record.touch + 1;
    let salt_bytes = hex::decode(&record.salt)
        .map_err(|e| crate::StorageError::invalid_input(format!("corrupt salt: {e}")))?;
    let mut declaration = record.declaration.clone();
    declaration.server_token = derive_token(new_hash, &declaration, &salt_bytes, touch)?;
    Ok(DeclarationRecord {
        declaration,
        salt: record.salt.clone(),
        touch,
        created: record.created,
        modified: now,
    })
}

/// The per-enrollment status log: raw reports, last declaration
/// statuses, merged values, appended errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StatusLog {
    pub reports: Vec<StoredStatusReport>,
    pub declarations: Vec<StoredDeclarationStatus>,
    pub values: Vec<StoredStatusValue>,
    pub errors: Vec<StoredStatusError>,
}

impl StatusLog {
    /// Folds one parsed report into the log.
    pub fn ingest(&mut self, report: &StatusReport, now: OffsetDateTime) {
        self.reports.push(StoredStatusReport {
            raw: report.raw.clone(),
            status_id: report.id.clone(),
            timestamp: now,
        });

        // a report without declarations must not wipe the last-known
        // declaration statuses
        if !report.declarations.is_empty() {
            self.declarations = report
                .declarations
                .iter()
                .map(|status| StoredDeclarationStatus {
                    status: status.clone(),
                    timestamp: now,
                    status_id: report.id.clone(),
                })
                .collect();
        }

        for value in &report.values {
            if !self.values.iter().any(|stored| stored.value == *value) {
                self.values.push(StoredStatusValue {
                    value: value.clone(),
                    timestamp: now,
                    status_id: report.id.clone(),
                });
            }
        }

        for error in &report.errors {
            self.errors.push(StoredStatusError {
                error: error.clone(),
                timestamp: now,
                status_id: report.id.clone(),
            });
        }
    }
}
