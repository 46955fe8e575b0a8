//! Atomic downloads, size verification and remote filename lookup.
//!
//! # Features
//!
//! - Commit-by-rename: bodies stream into `<destination>.tmp` and are renamed
//!   over the destination only once complete
//! - Host fallback: unreachable alias hosts are rewritten to their successor
//! - HEAD-based size parity check to skip redundant transfers
//! - Per-destination locking so checks and fetches of one path never overlap
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use mirror_core::download::{Fetcher, HostFallbackRule, HostFallbacks, Verifier};
//! use mirror_core::fs::LocalFs;
//! use mirror_core::transport::HttpTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new()?);
//! let fallbacks = HostFallbacks::new([HostFallbackRule::new(
//!     "farm0.static.example.com",
//!     "farm1.static.example.com",
//! )]);
//! let fetcher = Fetcher::new(transport.clone(), Arc::new(LocalFs), fallbacks);
//! let verifier = Verifier::new(transport, Arc::new(LocalFs), fetcher.locks());
//!
//! let dest = Path::new("./archive/set/123.jpg");
//! let url = "http://farm0.static.example.com/123.jpg";
//! if !verifier.sizes_match(url, dest).await? {
//!     fetcher.download(url, dest).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub(crate) mod constants;
mod error;
mod fallback;
mod fetcher;
mod filename;
mod lock;
mod verifier;

pub use constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, TEMP_SUFFIX};
pub use error::{TransferError, TransferErrorKind};
pub use fallback::{HostFallbackRule, HostFallbacks};
pub use fetcher::{DownloadJob, FetchOutcome, Fetcher, temporary_path};
pub use filename::{DEFAULT_VIDEO_EXTENSION, FilenameResolver, extension_of, is_safe_filename};
pub use lock::{PathGuard, PathLocks};
pub use verifier::{SizeComparison, Verifier};
