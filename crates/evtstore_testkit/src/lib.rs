//! # evtstore testkit
//!
//! Test utilities for evtstore.
//!
//! This crate provides:
//! - Temporary container fixtures and record builders
//! - Property-based test generators using proptest
//! - End-to-end tests of ordering, range filtering, tagging and task merges
//! - Parallel task container runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evtstore_testkit::prelude::*;
//!
//! #[test]
//! fn events_are_sorted() {
//!     let container = TestContainer::new();
//!     container.write_events(&[50, 10, 30]);
//!     assert_eq!(container.read_timestamps(None), vec![10, 30, 50]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
