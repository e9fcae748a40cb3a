//! Error types for the channel-warehouse library.
//!
//! This module provides custom error types using `thiserror` for better error handling
//! and more specific error messages throughout the pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the channel-warehouse pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Warehouse (SQLite) errors
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] rusqlite::Error),

    /// Warehouse connection pool errors
    #[error("Warehouse pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Detection exchange file errors
    #[error("Exchange file error: {0}")]
    Exchange(#[from] csv::Error),

    /// Source platform errors (session, fetch, download)
    #[error("Source error: {0}")]
    Source(String),

    /// Detection model errors
    #[error("Detection error: {0}")]
    Detection(String),

    /// Invalid channel name (would escape or corrupt the partition layout)
    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    /// Invalid partition date
    #[error("Invalid partition date: {0} (expected YYYY-MM-DD)")]
    InvalidPartitionDate(String),

    /// A storage path that should exist does not
    #[error("Missing storage path: {}", .0.display())]
    MissingPath(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(format!("{err:#}"))
    }
}
