//! Constants for the download module (timeouts, scratch naming, buffers).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default overall request timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Suffix appended to a destination path to form its scratch path.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Read buffer size used when hashing local files.
pub const DIGEST_BUFFER_SIZE: usize = 8 * 1024;
