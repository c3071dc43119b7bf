//! Runtime limits and constants.

use std::time::Duration;

/// Maximum size in bytes for the serialized custom status set via
/// `ctx.set_custom_status()`.
///
/// A turn that ends with a larger status fails the orchestration instead of
/// shipping the status to the backend.
pub const MAX_CUSTOM_STATUS_BYTES: usize = 256 * 1024;

/// Delay before fetching again after a retryable provider error.
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);
