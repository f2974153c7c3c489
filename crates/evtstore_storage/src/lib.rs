//! # evtstore storage
//!
//! Byte-store backends underneath evtstore containers.
//!
//! Every member of a container (data streams, offset tables, timestamp
//! tables, metadata) is persisted through a [`StorageBackend`]. Backends are
//! **opaque byte stores**: they know nothing about length prefixes, tables or
//! records.
//!
//! ## Design Principles
//!
//! - Positional reads (`read_at`) so readers get true random access
//! - Append-only writes; a member is never rewritten in place
//! - `Send + Sync` so a backend can be handed to another thread
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and scratch buffers
//! - [`FileBackend`] - One file per container member
//!
//! ## Example
//!
//! ```rust
//! use evtstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"event payload").unwrap();
//! let data = backend.read_at(offset, 13).unwrap();
//! assert_eq!(&data, b"event payload");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
