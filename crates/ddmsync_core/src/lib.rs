//! # ddmsync core
//!
//! Protocol types and algorithms for Apple Declarative Device
//! Management (DDM) synchronization.
//!
//! This crate provides:
//! - The [`Declaration`] wire type and validation
//! - Manifest typing and the Declaration Items / Sync Tokens builders
//! - The client status report parser
//! - Identifier-reference extraction for known declaration types
//!
//! It carries no storage or transport knowledge; the storage contract
//! and engines live in `ddmsync_storage`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod declaration;
mod error;
mod idrefs;
mod manifest;
mod status;

pub use declaration::{parse_declaration_path, Declaration};
pub use error::{DeclarationError, StatusParseError};
pub use idrefs::identifier_refs;
pub use manifest::{
    sha256_hasher, DeclarationItems, ItemsBuilder, ManifestDeclaration, ManifestDeclarationItems,
    ManifestType, NewHash, SyncTokens, TokensBuilder, TokensResponse,
};
pub use status::{
    parse_status_report, ContainerKind, DeclarationQueryStatus, DeclarationStatus, StatusError,
    StatusReport, StatusValue, ValueKind,
};
