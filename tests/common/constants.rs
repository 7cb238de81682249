//! Shared constants for end-to-end tests
//!
//! When fixture audio or limits change, update only this file.

// ============================================================================
// Test Audio
// ============================================================================

/// Sample rate of generated fixture audio
pub const TEST_SAMPLE_RATE: u32 = 44_100;

/// Channels of generated fixture audio
pub const TEST_CHANNELS: u16 = 2;

/// Frames per generated stem (a quarter of a second)
pub const TEST_STEM_FRAMES: usize = 11_025;

/// Peak of stems the fake engine writes, above the normalization target
pub const LOUD_STEM_PEAK: f64 = 0.99;

/// Peak every published stem must stay under
pub const TARGET_PEAK: f64 = 0.891;

/// Filename used for uploads
pub const TEST_UPLOAD_NAME: &str = "song.mp3";

/// A URL the fake fetcher resolves
pub const FETCHABLE_URL: &str = "https://media.example.com/watch?v=ok";

/// A URL the fake fetcher refuses
pub const UNFETCHABLE_URL: &str = "https://media.example.com/watch?v=private";

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for a job to reach a terminal state (milliseconds)
pub const JOB_TIMEOUT_MS: u64 = 10_000;

/// Polling interval when waiting for a job (milliseconds)
pub const JOB_POLL_INTERVAL_MS: u64 = 50;
