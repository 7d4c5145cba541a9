//! # ddmsync storage
//!
//! The storage contract for the ddmsync DDM server, the shared
//! synthesis and reconciliation algorithms written once against that
//! contract, and two implementing engines.
//!
//! ## Design
//!
//! - The contract is three capability traits: [`DeclarationStore`],
//!   [`AssociationStore`], [`StatusStore`]. Core logic never touches
//!   an engine directly.
//! - Server-token derivation, association-graph maintenance, and
//!   status-log bookkeeping are shared modules so every engine
//!   enforces the same invariants (notably: both directions of an
//!   edge are written in one critical section).
//! - Manifest synthesis is lazy: the two client documents are rebuilt
//!   from live associations on every read, which keeps them from
//!   going stale without cache invalidation.
//!
//! ## Engines
//!
//! - [`MemoryStore`]: for tests and ephemeral deployments.
//! - [`FileStore`]: directory-backed persistence with atomic
//!   temp-file-and-rename writes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod graph;
mod memory;
mod record;
pub mod reconcile;
pub mod synth;
mod traits;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{
    AssociationStore, DeclarationStore, StatusStore, StoredDeclarationStatus, StoredStatusError,
    StoredStatusReport, StoredStatusValue,
};

/// The full storage contract: every capability a complete engine
/// provides.
pub trait Store: DeclarationStore + AssociationStore + StatusStore {}

impl<T: DeclarationStore + AssociationStore + StatusStore> Store for T {}
