//! Mirror Core Library
//!
//! This library keeps a local directory in step with a remote collection:
//! files are fetched atomically, skipped when their size already matches,
//! digested on request, and the directory is reconciled against the expected
//! filename set afterwards.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`transport`] - HEAD/GET boundary with the reqwest implementation
//! - [`fs`] - Filesystem boundary with local and in-memory implementations
//! - [`download`] - Atomic fetcher, size verifier, filename resolver
//! - [`digest`] - Streaming content digests
//! - [`reconcile`] - Unexpected-entry detection and quarantine
//! - [`manifest`] - Batch description loaded from JSON
//! - [`sync`] - Concurrent batch engine tying the above together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod digest;
pub mod download;
pub mod fs;
pub mod manifest;
pub mod reconcile;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use digest::{ContentDigest, DigestError, DigestOutcome, Hasher};
pub use download::{
    Fetcher, FilenameResolver, HostFallbackRule, HostFallbacks, SizeComparison, TransferError,
    TransferErrorKind, Verifier,
};
pub use fs::{FileSystem, LocalFs, MemoryFs};
pub use manifest::{Manifest, ManifestEntry};
pub use reconcile::{QuarantinePolicy, ReconcileError, ReconcileReport, Reconciler};
pub use sync::{
    DEFAULT_CONCURRENCY, EngineError, EntryOutcome, EntryStatus, SyncEngine, SyncOptions,
    SyncReport,
};
pub use transport::{HttpTransport, Transport, TransportError};
