//! Custom error types for the application.
//!
//! This module defines the primary error type, `BodeError`, for the whole crate.
//! Using the `thiserror` crate, it provides one place for every failure that can
//! stop a sweep or prevent one from starting.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps `ConfigError`, raised while loading or validating
//!   `config/bode.toml` and its environment overrides.
//! - **`InvalidPlan`**: A sweep plan whose bounds or step count cannot produce a
//!   frequency sequence.
//! - **`Communication`**: Any command or query failure at the transport level. This is
//!   the only error kind that aborts a running sweep; drivers attach command context
//!   with `anyhow::Context` before it reaches the controller.
//! - **`SweepDeadline`**: The optional overall sweep deadline elapsed.
//! - **`FeatureNotEnabled`**: Functionality (like the VISA transport) that was not
//!   compiled in.
//!
//! Invalid measurements and autoranging failures are *not* errors: they are local to
//! one frequency point and handled by carry-forward inside the sweep controller.

use crate::config::ConfigError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, BodeError>;

/// Everything that stops a sweep or keeps one from starting
#[derive(Error, Debug)]
pub enum BodeError {
    /// Configuration failed to load or validate
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Sweep bounds or step count are unusable
    #[error("Invalid sweep plan: {0}")]
    InvalidPlan(String),

    /// The instrument link failed; aborts the sweep
    #[error("Instrument communication error: {0:#}")]
    Communication(#[from] anyhow::Error),

    /// The overall sweep deadline elapsed
    #[error("Sweep deadline exceeded after {completed} of {total} points")]
    SweepDeadline {
        /// Points recorded before the deadline
        completed: usize,
        /// Planned number of points
        total: usize,
    },

    /// A backend was requested that this build does not include
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Export file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// CSV encoding
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<serde_json::Error> for BodeError {
    fn from(err: serde_json::Error) -> Self {
        BodeError::Serialization(err.to_string())
    }
}

impl BodeError {
    /// True for failures caused by the instrument link rather than by configuration.
    pub fn is_communication(&self) -> bool {
        matches!(self, BodeError::Communication(_))
    }
}
