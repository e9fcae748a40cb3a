//! Data models for ingested messages, manifests, and detection records.
//!
//! This module contains the data structures exchanged between pipeline
//! components: the normalized message record, the per-run partition
//! manifest, and the enrichment records produced by the object detector.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized message as ingested from a source channel.
///
/// The pair (`message_id`, `channel_name`) is the natural key: message ids
/// are source-assigned and unique per channel only. Records are immutable
/// once written to the partition store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Source-assigned message identifier, unique within its channel
    pub message_id: i64,
    /// Stable identity of the source channel
    pub channel_name: String,
    /// When the message was posted (UTC)
    pub message_datetime: DateTime<Utc>,
    /// Message text, if any
    pub message_text: Option<String>,
    /// True if the message carried any media attachment
    pub has_media: bool,
    /// Path to the downloaded photo; set only when the media was a single
    /// photo and the download succeeded
    pub image_path: Option<String>,
    /// View count reported by the source, if available
    pub view_count: Option<i64>,
    /// Forward count reported by the source, if available
    pub forward_count: Option<i64>,
}

/// Per-run audit record for one date partition.
///
/// Written exactly once after all channels of a run have been processed;
/// its presence signals run completion to downstream readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Partition date (YYYY-MM-DD)
    pub date: String,
    /// When the ingestion run finished (UTC)
    pub run_utc: DateTime<Utc>,
    /// Message count per channel; zero counts are recorded, not omitted
    pub channels: BTreeMap<String, u64>,
    /// Sum of all per-channel counts
    pub total_messages: u64,
    /// Caller-supplied metadata; never displaces the required fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One raw detection returned by the object-detection model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Model class label (e.g. "person", "bottle")
    pub class_name: String,
    /// Model confidence in [0, 1]
    pub confidence: f64,
}

/// Coarse content category derived from the full detection set of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCategory {
    /// A person and a container class are both present
    Promotional,
    /// A container class is present, no person
    ProductDisplay,
    /// A person is present, no container class
    Lifestyle,
    /// Neither is present (including the zero-detection case)
    Other,
}

impl ImageCategory {
    /// Wire/warehouse form of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Promotional => "promotional",
            Self::ProductDisplay => "product_display",
            Self::Lifestyle => "lifestyle",
            Self::Other => "other",
        }
    }

    /// Parse the wire form back into the enum.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "promotional" => Some(Self::Promotional),
            "product_display" => Some(Self::ProductDisplay),
            "lifestyle" => Some(Self::Lifestyle),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enrichment record for one processed image, joined back to its message
/// by the natural key.
///
/// Every processed image yields exactly one record; images with zero model
/// detections carry the sentinel values (`"none"`, 0.0, `other`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Message identifier (file stem of the stored image)
    pub message_id: i64,
    /// Channel the image was downloaded from
    pub channel_name: String,
    /// Label of the highest-confidence detection, or "none"
    pub detected_class: String,
    /// Confidence of the highest-confidence detection, or 0.0
    pub confidence_score: f64,
    /// Category derived from the full detection set
    pub image_category: ImageCategory,
}

/// Outcome accounting for one warehouse load call.
///
/// `attempted` always equals `loaded + skipped + rejected`; a loader never
/// reports partial success silently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Records seen in the input, including rejects
    pub attempted: usize,
    /// Records that reached the target (inserted or replaced)
    pub loaded: usize,
    /// Records left untouched by the insert-or-skip policy
    pub skipped: usize,
    /// Records rejected individually (missing/malformed key fields)
    pub rejected: usize,
}

impl LoadReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.loaded += other.loaded;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
    }
}

impl std::fmt::Display for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} attempted, {} loaded, {} skipped, {} rejected",
            self.attempted, self.loaded, self.skipped, self.rejected
        )
    }
}
