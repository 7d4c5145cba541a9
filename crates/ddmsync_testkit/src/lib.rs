//! # ddmsync Testkit
//!
//! Test utilities for the ddmsync workspace.
//!
//! This crate provides:
//! - Declaration and status-report fixtures
//! - A storage conformance suite run against every engine
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ddmsync_testkit::prelude::*;
//!
//! #[test]
//! fn engines_agree_on_touch() {
//!     for_each_engine(conformance::touch_semantics);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conformance;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conformance;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
