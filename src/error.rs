//! Error types for sei-dl
//!
//! This module provides the error handling for the library, including:
//! - The fatal [`Error`] taxonomy (authentication, configuration, total collection failure)
//! - Structured non-fatal [`Warning`]s accumulated during a pipeline run and
//!   returned to callers as data rather than thrown
//! - The [`Result`] alias used throughout the crate

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::adapter::AdapterError;
use crate::types::Category;

/// Result type alias for sei-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sei-dl
///
/// Fatal conditions only: anything that must stop the pipeline. Per-case and
/// per-page conditions that the pipeline absorbs are modeled as [`Warning`]s
/// or as entries in the batch report instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "portal.unit_name")
        key: Option<String>,
    },

    /// Login failed or the portal refused to confirm a logged-in identity.
    /// Also raised when a re-authentication after session expiry fails.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Both inbox categories failed to yield any page at all
    #[error("collection failed for every category: {0}")]
    Collection(String),

    /// A single artifact retrieval attempt failed (recorded per case in the
    /// batch report; never aborts the batch)
    #[error("artifact error: {0}")]
    Artifact(String),

    /// Portal adapter error (transport, timeout, unexpected page shape)
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// A non-fatal condition recorded while the pipeline kept going.
///
/// Warnings are accumulated in order of occurrence and returned alongside the
/// result set so automated callers can inspect them programmatically.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The desired organizational unit could not be activated; the session
    /// stayed on whatever unit was active before the attempt
    UnitSwitch {
        /// The unit requested by configuration
        requested: String,
        /// The unit that remained active, when known
        active: Option<String>,
        /// Why the switch did not happen
        reason: String,
    },

    /// A category's pagination was abandoned after a failed page; the pages
    /// already collected from that category were kept
    Pagination {
        /// The inbox category whose pagination was cut short
        category: Category,
        /// Zero-based page index that failed
        page: u32,
        /// Underlying cause
        reason: String,
    },

    /// A case's document subtree could not be fetched or parsed; the case's
    /// document list was left empty
    Enrichment {
        /// Canonical case number
        case_number: String,
        /// Underlying cause
        reason: String,
    },

    /// A case exhausted its download attempts (also present in the batch report)
    Download {
        /// Canonical case number
        case_number: String,
        /// Number of attempts made
        attempts: u32,
        /// Last error observed
        reason: String,
    },

    /// History persistence failed; the run's results are unaffected
    History {
        /// Path that could not be written or read
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::UnitSwitch {
                requested, reason, ..
            } => {
                write!(f, "unit switch to '{requested}' failed: {reason}")
            }
            Warning::Pagination {
                category,
                page,
                reason,
            } => {
                write!(
                    f,
                    "pagination of {category} stopped at page {}: {reason}",
                    page + 1
                )
            }
            Warning::Enrichment {
                case_number,
                reason,
            } => write!(f, "enrichment of {case_number} failed: {reason}"),
            Warning::Download {
                case_number,
                attempts,
                reason,
            } => write!(
                f,
                "download of {case_number} failed after {attempts} attempt(s): {reason}"
            ),
            Warning::History { path, reason } => {
                write!(
                    f,
                    "history persistence at {} failed: {reason}",
                    path.display()
                )
            }
        }
    }
}
