//! Channel Warehouse - Message Ingestion and Enrichment Pipeline
//!
//! A Rust library for ingesting channel messages from a source platform
//! into a partitioned raw data lake, enriching downloaded media with
//! object-detection metadata, and loading both into a relational warehouse
//! under idempotent, replay-safe semantics.
//!
//! # Features
//!
//! - Date/channel-partitioned batch storage with per-run audit manifests
//! - Concurrent, independently-failing per-channel ingestion
//! - Pluggable source platform and detection model clients
//! - Natural-key upserts with distinct conflict policies per table
//! - Explicit step DAG with failure short-circuit and a recurring trigger

/// Configuration management
pub mod config;
/// Detection enrichment and classification
pub mod detect;
/// Error types
pub mod error;
/// Partitioned raw data lake
pub mod lake;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Pipeline orchestration
pub mod pipeline;
/// Warehouse schema definitions
pub mod schema;
/// Source platform ingestion
pub mod source;
/// Input validation for partition identifiers
pub mod validation;
/// Relational warehouse loading
pub mod warehouse;

// Re-export key components for easier access
pub use detect::{Enricher, HttpDetector, ObjectDetector};
pub use lake::Lake;
pub use models::{Detection, DetectionRecord, ImageCategory, LoadReport, Manifest, MessageRecord};
pub use pipeline::{Orchestrator, PipelineSteps, RunReport, Step, StepExecutor};
pub use source::{HttpSourceClient, Ingestor, SourceClient};
pub use warehouse::Warehouse;
