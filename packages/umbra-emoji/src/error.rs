//! # Error Handling
//!
//! Error types for the emoji pipeline.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Core Errors (contract)                                            │
//! │  │   ├── NotInitialized        - EmojiCore not initialized             │
//! │  │   └── AlreadyInitialized    - EmojiCore already initialized         │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── LocaleNotLoaded       - Read from a locale never loaded       │
//! │  │   └── DatabaseError         - SQLite failure                        │
//! │  │                                                                      │
//! │  ├── Network Errors (transient)                                        │
//! │  │   ├── HttpStatus            - Non-304 HTTP failure                  │
//! │  │   ├── RequestFailed         - Transport-level failure               │
//! │  │   ├── WorkerUnavailable     - Background worker can't be spawned    │
//! │  │   └── Timeout               - Worker did not acknowledge in time    │
//! │  │                                                                      │
//! │  ├── Data Errors                                                       │
//! │  │   └── DataFormat            - Payload has an unexpected shape       │
//! │  │                                                                      │
//! │  └── Internal                                                          │
//! │      ├── SerializationError                                            │
//! │      └── DeserializationError                                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//!
//! Storage and loader operations return `Err` for every failure. The render
//! pipeline absorbs only *absent records* (a token without data falls back to
//! literal text); it never catches an `Err`, so `LocaleNotLoaded` reaches
//! the caller that broke the contract.

use thiserror::Error;

/// Result type alias for emoji pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the emoji pipeline
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Core Lifecycle Errors (100-199)
    // ========================================================================

    /// The emoji core has not been initialized
    #[error("Emoji core has not been initialized. Call EmojiCore::initialize() first.")]
    NotInitialized,

    /// The emoji core has already been initialized
    #[error("Emoji core has already been initialized.")]
    AlreadyInitialized,

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// A locale table was read before its rows were confirmed present
    #[error("Locale {0} has not been loaded")]
    LocaleNotLoaded(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ========================================================================
    // Network Errors (500-599)
    // ========================================================================

    /// The server answered with a status other than 2xx or 304
    #[error("Failed to fetch {url}: HTTP {status}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The request could not be completed
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The background worker could not be spawned
    #[error("Background worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The background worker did not acknowledge in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ========================================================================
    // Data Errors (800-899)
    // ========================================================================

    /// A dataset did not have the expected shape
    #[error("Unexpected data format: {0}")]
    DataFormat(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Core lifecycle
    /// - 400-499: Storage
    /// - 500-599: Network
    /// - 800-899: Data
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Core (100-199)
            Error::NotInitialized => 100,
            Error::AlreadyInitialized => 101,

            // Storage (400-499)
            Error::LocaleNotLoaded(_) => 400,
            Error::DatabaseError(_) => 405,

            // Network (500-599)
            Error::HttpStatus { .. } => 500,
            Error::RequestFailed(_) => 501,
            Error::Timeout(_) => 502,
            Error::WorkerUnavailable(_) => 503,

            // Data (800-899)
            Error::DataFormat(_) => 800,

            // Internal (900-999)
            Error::SerializationError(_) => 902,
            Error::DeserializationError(_) => 903,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by the caller retrying later.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::RequestFailed(_)
                | Error::HttpStatus { .. }
                | Error::WorkerUnavailable(_)
        )
    }

    /// Check if this error is a programming contract violation
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::LocaleNotLoaded(_) | Error::NotInitialized | Error::AlreadyInitialized
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Error::HttpStatus {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            },
            None => Error::RequestFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::DeserializationError(err.to_string())
        } else {
            Error::SerializationError(err.to_string())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
