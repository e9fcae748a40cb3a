//! Partitioned raw data lake.
//!
//! The lake owns the on-disk layout of everything the ingestor produces:
//!
//! ```text
//! {root}/raw/messages/{date}/{channel}.json     message batches
//! {root}/raw/messages/{date}/_manifest.json     per-run audit manifest
//! {root}/raw/images/{channel}/{message_id}.jpg  downloaded media
//! {root}/detections.csv                         enrichment exchange file
//! ```
//!
//! All operations are confined to the tree under the configured root.
//! Directory creation is idempotent and batch writes are last-write-wins;
//! callers retrying a run treat the partition as overwritable.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{Manifest, MessageRecord};
use crate::validation;

/// Manifest files are distinguished from channel batches by this prefix.
const MANIFEST_FILE: &str = "_manifest.json";

/// Returns today's partition date in the `YYYY-MM-DD` form used throughout
/// the lake layout.
#[must_use]
pub fn utc_partition_date() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// One image stored in the media tree, addressed by its natural key.
#[derive(Debug, Clone)]
pub struct ImageRef {
    /// Channel the image belongs to (directory name)
    pub channel_name: String,
    /// Message id the image belongs to (file stem)
    pub message_id: i64,
    /// Absolute path of the image file
    pub path: PathBuf,
}

/// One batch file read back from a partition.
#[derive(Debug)]
pub struct BatchFile {
    /// Path the batch was read from
    pub path: PathBuf,
    /// Raw records; surfaced as JSON values so the loader can reject
    /// malformed rows individually
    pub records: Vec<Value>,
}

/// Handle to the partitioned storage tree under one root directory.
#[derive(Debug, Clone)]
pub struct Lake {
    root: PathBuf,
}

impl Lake {
    /// Create a handle for the given storage root. Nothing is created on
    /// disk until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root this lake writes under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn messages_dir(&self, date: &str) -> PathBuf {
        self.root.join("raw").join("messages").join(date)
    }

    fn images_root(&self) -> PathBuf {
        self.root.join("raw").join("images")
    }

    /// Path of the batch file for one (date, channel) partition.
    #[must_use]
    pub fn batch_path(&self, date: &str, channel: &str) -> PathBuf {
        self.messages_dir(date).join(format!("{channel}.json"))
    }

    /// Path of the manifest file for one date partition.
    #[must_use]
    pub fn manifest_path(&self, date: &str) -> PathBuf {
        self.messages_dir(date).join(MANIFEST_FILE)
    }

    /// Path a downloaded photo is stored at, keyed by the natural key.
    #[must_use]
    pub fn image_path(&self, channel: &str, message_id: i64) -> PathBuf {
        self.images_root().join(channel).join(format!("{message_id}.jpg"))
    }

    /// Path of the detection exchange file consumed by the detection loader.
    #[must_use]
    pub fn detections_csv_path(&self) -> PathBuf {
        self.root.join("detections.csv")
    }

    /// Ensure the media directory for `channel` exists and return it.
    /// Creating an existing directory is a no-op.
    pub fn ensure_channel_image_dir(&self, channel: &str) -> Result<PathBuf> {
        validation::validate_channel_name(channel)?;
        let dir = self.images_root().join(channel);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Write the message batch for one (date, channel) partition.
    ///
    /// Creates the partition directory on demand and overwrites any
    /// existing batch file for the pair; callers are responsible for not
    /// writing the same partition twice in one run if that is undesired.
    pub fn write_batch(
        &self,
        date: &str,
        channel: &str,
        records: &[MessageRecord],
    ) -> Result<PathBuf> {
        validation::validate_partition_date(date)?;
        validation::validate_channel_name(channel)?;

        let dir = self.messages_dir(date);
        fs::create_dir_all(&dir)?;

        let path = self.batch_path(date, channel);
        let file = File::create(&path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, records)?;

        debug!(
            date,
            channel,
            count = records.len(),
            path = %path.display(),
            "batch written"
        );
        Ok(path)
    }

    /// Write the audit manifest for one date partition.
    ///
    /// The total is always computed as the sum of the per-channel counts,
    /// and a run timestamp is always included. Caller-supplied `extra`
    /// fields are merged in but can never displace the required fields.
    pub fn write_manifest(
        &self,
        date: &str,
        channel_counts: &BTreeMap<String, u64>,
        extra: Option<serde_json::Map<String, Value>>,
    ) -> Result<PathBuf> {
        validation::validate_partition_date(date)?;

        let mut extra = extra.unwrap_or_default();
        for required in ["date", "run_utc", "channels", "total_messages"] {
            extra.remove(required);
        }

        let manifest = Manifest {
            date: date.to_string(),
            run_utc: Utc::now(),
            channels: channel_counts.clone(),
            total_messages: channel_counts.values().sum(),
            extra,
        };

        let dir = self.messages_dir(date);
        fs::create_dir_all(&dir)?;

        let path = self.manifest_path(date);
        let file = File::create(&path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &manifest)?;

        debug!(date, total = manifest.total_messages, path = %path.display(), "manifest written");
        Ok(path)
    }

    /// Read the manifest for one date partition.
    pub fn read_manifest(&self, date: &str) -> Result<Manifest> {
        validation::validate_partition_date(date)?;
        let path = self.manifest_path(date);
        if !path.exists() {
            return Err(PipelineError::MissingPath(path));
        }
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Enumerate batch files for the loader.
    ///
    /// With a date, only that partition is read; without one, every date
    /// partition under the messages tree is read. Manifests and other
    /// `_`-prefixed files are skipped. An absent tree yields an empty list
    /// rather than an error so a load against a never-scraped lake reports
    /// zero attempts.
    pub fn read_batches(&self, date: Option<&str>) -> Result<Vec<BatchFile>> {
        let mut dirs = Vec::new();
        match date {
            Some(date) => {
                validation::validate_partition_date(date)?;
                dirs.push(self.messages_dir(date));
            }
            None => {
                let root = self.root.join("raw").join("messages");
                if root.is_dir() {
                    for entry in fs::read_dir(root)? {
                        let entry = entry?;
                        if entry.file_type()?.is_dir() {
                            dirs.push(entry.path());
                        }
                    }
                }
            }
        }
        dirs.sort();

        let mut batches = Vec::new();
        for dir in dirs {
            if !dir.is_dir() {
                continue;
            }
            let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
                .filter_map(std::result::Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.extension().is_some_and(|ext| ext == "json")
                        && !p
                            .file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with('_'))
                })
                .collect();
            files.sort();

            for path in files {
                let file = File::open(&path)?;
                let records: Vec<Value> = serde_json::from_reader(file)?;
                batches.push(BatchFile { path, records });
            }
        }
        Ok(batches)
    }

    /// Walk the media tree and yield every stored image with its natural
    /// key. Files whose stem is not a message id are skipped.
    pub fn list_images(&self) -> Result<Vec<ImageRef>> {
        let root = self.images_root();
        let mut images = Vec::new();
        if !root.is_dir() {
            return Ok(images);
        }

        let mut channel_dirs: Vec<PathBuf> = fs::read_dir(&root)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        channel_dirs.sort();

        for channel_dir in channel_dirs {
            let Some(channel_name) = channel_dir
                .file_name()
                .and_then(|n| n.to_str())
                .map(ToString::to_string)
            else {
                continue;
            };

            let mut files: Vec<PathBuf> = fs::read_dir(&channel_dir)?
                .filter_map(std::result::Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "jpg"))
                .collect();
            files.sort();

            for path in files {
                let stem = path.file_stem().and_then(|s| s.to_str());
                match stem.and_then(|s| s.parse::<i64>().ok()) {
                    Some(message_id) => images.push(ImageRef {
                        channel_name: channel_name.clone(),
                        message_id,
                        path,
                    }),
                    None => {
                        debug!(path = %path.display(), "skipping image without message id stem");
                    }
                }
            }
        }
        Ok(images)
    }
}
