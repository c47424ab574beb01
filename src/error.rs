//! # Error Types Module
//!
//! Centralized error handling for the relax-signal service.
//! Each stage of a poll cycle has its own error type so the scheduler can log
//! precisely what went wrong without ever stopping.
//!
//! ## Error Types
//! - `ConfigError`: Configuration file I/O and parsing errors
//! - `StoreError`: Credential and record store persistence errors
//! - `RefreshError`: Token exchange failures (logged, never raised past the refresher)
//! - `FetchError`: Provider data endpoint failures
//! - `ReconstructError`: Invalid raw samples handed to the RR reconstruction
//! - `CycleError`: Anything that abandons a single poll cycle
//!
//! ## Usage Examples
//! ```rust
//! // Config module uses ConfigError
//! pub fn load() -> Result<Config, ConfigError> { ... }
//!
//! // Fetcher uses FetchError
//! pub async fn fetch_today(...) -> Result<Vec<RawSample>, FetchError> { ... }
//! ```

use std::fmt;

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
    /// No usable directory for config or data files
    NoDirectory,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
            ConfigError::NoDirectory => {
                write!(f, "Could not determine a config or data directory")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
            ConfigError::NoDirectory => None,
        }
    }
}

/// Errors raised by the credential and record stores
#[derive(Debug)]
pub enum StoreError {
    /// Underlying file could not be read or written
    Io(std::io::Error),
    /// Stored document could not be decoded
    Corrupt(String),
    /// Document could not be encoded for writing
    Encode(String),
    /// The single credential document has never been seeded
    MissingCredentials,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store I/O failed: {}", e),
            StoreError::Corrupt(msg) => write!(f, "Stored document is corrupt: {}", msg),
            StoreError::Encode(msg) => write!(f, "Failed to encode document: {}", msg),
            StoreError::MissingCredentials => {
                write!(f, "Credential document not found; seed client_id and client_secret first")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Reasons a token exchange did not produce a usable pair
#[derive(Debug)]
pub enum RefreshError {
    /// Request never completed
    Transport(reqwest::Error),
    /// Token endpoint answered with a non-success status
    Rejected { status: u16, body: String },
    /// Response body was not the expected JSON
    Malformed(String),
    /// Response lacked one or both tokens
    IncompletePair,
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::Transport(e) => write!(f, "Token request failed: {}", e),
            RefreshError::Rejected { status, body } => {
                write!(f, "Token endpoint returned {}: {}", status, body)
            }
            RefreshError::Malformed(msg) => write!(f, "Malformed token response: {}", msg),
            RefreshError::IncompletePair => {
                write!(f, "Token response did not contain both access_token and refresh_token")
            }
        }
    }
}

impl std::error::Error for RefreshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RefreshError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors from the provider's intraday heart-rate endpoint
#[derive(Debug)]
pub enum FetchError {
    /// Request never completed (network, timeout)
    Transport(reqwest::Error),
    /// Access token was rejected; `refreshed` tells whether a new pair was stored
    Unauthorized { refreshed: bool },
    /// Any other non-success status
    Status(u16),
    /// Body was not the expected JSON document
    Malformed(String),
    /// Rotated credentials could not be persisted
    Store(StoreError),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport(e) => write!(f, "Heart rate request failed: {}", e),
            FetchError::Unauthorized { refreshed: true } => {
                write!(f, "Access token expired; refreshed tokens apply from the next cycle")
            }
            FetchError::Unauthorized { refreshed: false } => {
                write!(f, "Access token expired and could not be refreshed")
            }
            FetchError::Status(status) => write!(f, "HTTP error! status: {}", status),
            FetchError::Malformed(msg) => write!(f, "Malformed heart rate response: {}", msg),
            FetchError::Store(e) => write!(f, "Failed to persist refreshed tokens: {}", e),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Transport(e) => Some(e),
            FetchError::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid input to the RR reconstruction
#[derive(Debug, Clone, PartialEq)]
pub enum ReconstructError {
    /// Heart rate that cannot be turned into an interval
    InvalidRate { time: chrono::NaiveTime, bpm: f64 },
    /// Samples out of chronological order
    NegativeGap {
        previous: chrono::NaiveTime,
        current: chrono::NaiveTime,
    },
}

impl fmt::Display for ReconstructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconstructError::InvalidRate { time, bpm } => {
                write!(f, "Invalid heart rate {} bpm at {}", bpm, time)
            }
            ReconstructError::NegativeGap { previous, current } => {
                write!(f, "Sample at {} precedes previous sample at {}", current, previous)
            }
        }
    }
}

impl std::error::Error for ReconstructError {}

/// Anything that abandons a poll cycle
#[derive(Debug)]
pub enum CycleError {
    Store(StoreError),
    Fetch(FetchError),
    Reconstruct(ReconstructError),
    /// Shutdown was requested while the cycle was in flight
    Cancelled,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Store(e) => write!(f, "{}", e),
            CycleError::Fetch(e) => write!(f, "{}", e),
            CycleError::Reconstruct(e) => write!(f, "{}", e),
            CycleError::Cancelled => write!(f, "Cycle cancelled by shutdown"),
        }
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CycleError::Store(e) => Some(e),
            CycleError::Fetch(e) => Some(e),
            CycleError::Reconstruct(e) => Some(e),
            CycleError::Cancelled => None,
        }
    }
}

impl From<StoreError> for CycleError {
    fn from(e: StoreError) -> Self {
        CycleError::Store(e)
    }
}

impl From<FetchError> for CycleError {
    fn from(e: FetchError) -> Self {
        CycleError::Fetch(e)
    }
}

impl From<ReconstructError> for CycleError {
    fn from(e: ReconstructError) -> Self {
        CycleError::Reconstruct(e)
    }
}
