//! Warehouse schema definitions
//!
//! This module provides constants for table and column names used with
//! rusqlite. The DDL itself lives under `migrations/` and is applied
//! idempotently when a [`crate::warehouse::Warehouse`] is opened.

/// Raw messages table schema
pub mod raw_messages {
    /// Table name
    pub const TABLE: &str = "raw_messages";
    /// Source-assigned message identifier (key part)
    pub const MESSAGE_ID: &str = "message_id";
    /// Channel identity (key part)
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Message timestamp column
    pub const MESSAGE_DATETIME: &str = "message_datetime";
    /// Message text column
    pub const MESSAGE_TEXT: &str = "message_text";
    /// Media flag column
    pub const HAS_MEDIA: &str = "has_media";
    /// Stored image path column
    pub const IMAGE_PATH: &str = "image_path";
    /// View count column
    pub const VIEW_COUNT: &str = "view_count";
    /// Forward count column
    pub const FORWARD_COUNT: &str = "forward_count";
    /// Load timestamp column, defaulted at insert
    pub const LOADED_AT: &str = "loaded_at";
}

/// Raw detections table schema
pub mod raw_detections {
    /// Table name
    pub const TABLE: &str = "raw_detections";
    /// Source-assigned message identifier (key part)
    pub const MESSAGE_ID: &str = "message_id";
    /// Channel identity (key part)
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Primary detection label column
    pub const DETECTED_CLASS: &str = "detected_class";
    /// Primary detection confidence column
    pub const CONFIDENCE_SCORE: &str = "confidence_score";
    /// Derived content category column
    pub const IMAGE_CATEGORY: &str = "image_category";
    /// Load timestamp column, refreshed on every upsert
    pub const LOADED_AT: &str = "loaded_at";
}
