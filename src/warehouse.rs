//! Relational warehouse loading.
//!
//! Both loaders upsert on the natural key (`message_id`, `channel_name`)
//! but with deliberately different conflict policies:
//!
//! - raw messages are **insert-or-skip**: the first capture of a key wins
//!   forever, because raw data is the immutable source of truth;
//! - detections are **insert-or-replace**: a re-run refreshes label, score,
//!   category and load timestamp, because derived data follows the latest
//!   model pass.
//!
//! Each load call commits its batch as a single transaction and reports
//! attempted/loaded/skipped/rejected counts; malformed records are rejected
//! individually rather than failing or polluting the batch.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::lake::Lake;
use crate::metrics;
use crate::models::{DetectionRecord, ImageCategory, LoadReport, MessageRecord};
use crate::schema::{raw_detections, raw_messages};

/// Type alias for the warehouse connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
/// Type alias for one pooled warehouse connection
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Per-channel row count, as reported by [`Warehouse::channel_summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCount {
    /// Channel identity
    pub channel_name: String,
    /// Rows currently stored for the channel
    pub messages: i64,
}

/// Warehouse handle owning schema creation and all table writes.
#[derive(Clone)]
pub struct Warehouse {
    pool: DbPool,
}

impl Warehouse {
    /// Open (creating if needed) the warehouse database and ensure the
    /// schema exists. Schema creation is idempotent.
    pub fn new(database_path: &str, max_connections: u32) -> Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(database_path);
        let pool = Pool::builder()
            .max_size(max_connections)
            .build(manager)
            .context("Failed to create warehouse connection pool")?;

        let warehouse = Self { pool };
        warehouse.ensure_schema()?;
        Ok(warehouse)
    }

    /// Apply the idempotent DDL for both raw tables.
    fn ensure_schema(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(include_str!(
            "../migrations/2025-07-14-000000_create_raw_tables/up.sql"
        ))
        .context("Failed to create raw tables")?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        self.pool
            .get()
            .context("Failed to get warehouse connection")
    }

    /// Load raw message records under the insert-or-skip policy.
    ///
    /// Input rows arrive as raw JSON values straight from the batch files;
    /// rows that do not parse into a [`MessageRecord`] or carry an empty
    /// channel name are rejected individually and counted.
    pub fn load_messages(&self, rows: &[Value]) -> Result<LoadReport> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let mut report = LoadReport::default();

        {
            let sql = format!(
                "INSERT OR IGNORE INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                raw_messages::TABLE,
                raw_messages::MESSAGE_ID,
                raw_messages::CHANNEL_NAME,
                raw_messages::MESSAGE_DATETIME,
                raw_messages::MESSAGE_TEXT,
                raw_messages::HAS_MEDIA,
                raw_messages::IMAGE_PATH,
                raw_messages::VIEW_COUNT,
                raw_messages::FORWARD_COUNT,
            );
            let mut stmt = tx.prepare(&sql)?;

            for row in rows {
                report.attempted += 1;
                let record: MessageRecord = match serde_json::from_value(row.clone()) {
                    Ok(record) => record,
                    Err(e) => {
                        report.rejected += 1;
                        debug!(error = %e, "rejecting malformed message row");
                        continue;
                    }
                };
                if record.channel_name.trim().is_empty() {
                    report.rejected += 1;
                    debug!(message_id = record.message_id, "rejecting row without channel");
                    continue;
                }

                let changed = stmt.execute(params![
                    record.message_id,
                    record.channel_name,
                    record.message_datetime,
                    record.message_text,
                    record.has_media,
                    record.image_path,
                    record.view_count,
                    record.forward_count,
                ])?;
                if changed == 0 {
                    report.skipped += 1;
                } else {
                    report.loaded += 1;
                }
            }
        }

        tx.commit()?;
        metrics::record_load(raw_messages::TABLE, &report);
        info!(table = raw_messages::TABLE, %report, "message load committed");
        Ok(report)
    }

    /// Load detection records under the insert-or-replace policy.
    ///
    /// On key collision every non-key column is overwritten, including the
    /// load timestamp.
    pub fn load_detections(&self, records: &[DetectionRecord]) -> Result<LoadReport> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let mut report = LoadReport::default();

        {
            let sql = format!(
                "INSERT INTO {table} ({id}, {channel}, {class}, {score}, {category}) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT ({id}, {channel}) DO UPDATE SET \
                 {class} = excluded.{class}, \
                 {score} = excluded.{score}, \
                 {category} = excluded.{category}, \
                 {loaded_at} = CURRENT_TIMESTAMP",
                table = raw_detections::TABLE,
                id = raw_detections::MESSAGE_ID,
                channel = raw_detections::CHANNEL_NAME,
                class = raw_detections::DETECTED_CLASS,
                score = raw_detections::CONFIDENCE_SCORE,
                category = raw_detections::IMAGE_CATEGORY,
                loaded_at = raw_detections::LOADED_AT,
            );
            let mut stmt = tx.prepare(&sql)?;

            for record in records {
                report.attempted += 1;
                if record.channel_name.trim().is_empty() {
                    report.rejected += 1;
                    debug!(message_id = record.message_id, "rejecting detection without channel");
                    continue;
                }

                stmt.execute(params![
                    record.message_id,
                    record.channel_name,
                    record.detected_class,
                    record.confidence_score,
                    record.image_category.as_str(),
                ])?;
                report.loaded += 1;
            }
        }

        tx.commit()?;
        metrics::record_load(raw_detections::TABLE, &report);
        info!(table = raw_detections::TABLE, %report, "detection load committed");
        Ok(report)
    }

    /// Load every batch file the lake holds for `date` (or for all dates
    /// when `date` is `None`), folding the per-file reports together.
    pub fn load_messages_from_lake(&self, lake: &Lake, date: Option<&str>) -> Result<LoadReport> {
        let batches = lake.read_batches(date)?;
        if batches.is_empty() {
            warn!(root = %lake.root().display(), "no batch files found to load");
            return Ok(LoadReport::default());
        }

        let mut report = LoadReport::default();
        for batch in &batches {
            debug!(path = %batch.path.display(), records = batch.records.len(), "loading batch file");
            report.merge(self.load_messages(&batch.records)?);
        }
        info!(files = batches.len(), %report, "lake load finished");
        Ok(report)
    }

    /// Load the enrichment exchange file, rejecting rows that fail to
    /// parse individually.
    pub fn load_detections_from_csv(&self, path: &Path) -> Result<LoadReport> {
        if !path.exists() {
            warn!(path = %path.display(), "no exchange file found to load");
            return Ok(LoadReport::default());
        }

        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open exchange file {}", path.display()))?;

        let mut records = Vec::new();
        let mut parse_rejects = 0;
        for row in reader.deserialize::<DetectionRecord>() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => {
                    parse_rejects += 1;
                    debug!(error = %e, "rejecting malformed exchange row");
                }
            }
        }

        let mut report = self.load_detections(&records)?;
        report.attempted += parse_rejects;
        report.rejected += parse_rejects;
        Ok(report)
    }

    /// Fetch one stored message by its natural key.
    pub fn get_message(&self, message_id: i64, channel_name: &str) -> Result<Option<MessageRecord>> {
        let conn = self.get_connection()?;
        let sql = format!(
            "SELECT {}, {}, {}, {}, {}, {}, {}, {} FROM {} WHERE {} = ?1 AND {} = ?2",
            raw_messages::MESSAGE_ID,
            raw_messages::CHANNEL_NAME,
            raw_messages::MESSAGE_DATETIME,
            raw_messages::MESSAGE_TEXT,
            raw_messages::HAS_MEDIA,
            raw_messages::IMAGE_PATH,
            raw_messages::VIEW_COUNT,
            raw_messages::FORWARD_COUNT,
            raw_messages::TABLE,
            raw_messages::MESSAGE_ID,
            raw_messages::CHANNEL_NAME,
        );
        let record = conn
            .query_row(&sql, params![message_id, channel_name], map_message_row)
            .optional()?;
        Ok(record)
    }

    /// Fetch one stored detection by its natural key.
    pub fn get_detection(
        &self,
        message_id: i64,
        channel_name: &str,
    ) -> Result<Option<DetectionRecord>> {
        let conn = self.get_connection()?;
        let sql = format!(
            "SELECT {}, {}, {}, {}, {} FROM {} WHERE {} = ?1 AND {} = ?2",
            raw_detections::MESSAGE_ID,
            raw_detections::CHANNEL_NAME,
            raw_detections::DETECTED_CLASS,
            raw_detections::CONFIDENCE_SCORE,
            raw_detections::IMAGE_CATEGORY,
            raw_detections::TABLE,
            raw_detections::MESSAGE_ID,
            raw_detections::CHANNEL_NAME,
        );
        let row = conn
            .query_row(&sql, params![message_id, channel_name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .optional()?;

        match row {
            None => Ok(None),
            Some((message_id, channel_name, detected_class, confidence_score, category)) => {
                let image_category = ImageCategory::parse(&category).ok_or_else(|| {
                    anyhow::anyhow!("unknown image category in warehouse: {category}")
                })?;
                Ok(Some(DetectionRecord {
                    message_id,
                    channel_name,
                    detected_class,
                    confidence_score,
                    image_category,
                }))
            }
        }
    }

    /// Total stored rows, (messages, detections).
    pub fn counts(&self) -> Result<(i64, i64)> {
        let conn = self.get_connection()?;
        let messages: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", raw_messages::TABLE),
            [],
            |row| row.get(0),
        )?;
        let detections: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", raw_detections::TABLE),
            [],
            |row| row.get(0),
        )?;
        Ok((messages, detections))
    }

    /// Per-channel message counts, busiest channel first.
    pub fn channel_summary(&self) -> Result<Vec<ChannelCount>> {
        let conn = self.get_connection()?;
        let sql = format!(
            "SELECT {channel}, COUNT(*) FROM {table} GROUP BY {channel} ORDER BY COUNT(*) DESC, {channel}",
            channel = raw_messages::CHANNEL_NAME,
            table = raw_messages::TABLE,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(ChannelCount {
                channel_name: row.get(0)?,
                messages: row.get(1)?,
            })
        })?;

        let mut summary = Vec::new();
        for row in rows {
            summary.push(row?);
        }
        Ok(summary)
    }
}

/// Map a warehouse row back to a [`MessageRecord`].
fn map_message_row(row: &Row) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        message_id: row.get(0)?,
        channel_name: row.get(1)?,
        message_datetime: row.get(2)?,
        message_text: row.get(3)?,
        has_media: row.get(4)?,
        image_path: row.get(5)?,
        view_count: row.get(6)?,
        forward_count: row.get(7)?,
    })
}
