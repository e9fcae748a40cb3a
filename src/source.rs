//! Source platform ingestion.
//!
//! The platform itself is consumed through the [`SourceClient`] capability
//! trait: enumerate recent messages for a channel identity and download a
//! photo reference to a local path. Session management stays behind the
//! trait so the ingestion logic can be tested without a live gateway.
//!
//! [`Ingestor::run`] scrapes every configured channel concurrently, writes
//! one batch file per channel into the partition store, and finishes the
//! run with a single audit manifest covering all channels.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::SourceConfig;
use crate::lake::Lake;
use crate::metrics;
use crate::models::MessageRecord;
use crate::validation;

/// Kind of media attached to a source message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// A single photo; eligible for download
    Photo,
    /// Anything else (video, document, album); recorded but not fetched
    Other,
}

/// Reference to a media attachment on the source platform.
#[derive(Debug, Clone)]
pub struct MediaRef {
    /// Attachment kind
    pub kind: MediaKind,
    /// Opaque identifier the platform resolves to file content
    pub file_id: String,
}

/// One message as returned by the source platform, before normalization.
#[derive(Debug, Clone)]
pub struct SourceMessage {
    /// Source-assigned identifier, unique per channel
    pub id: i64,
    /// When the message was posted (UTC)
    pub datetime: DateTime<Utc>,
    /// Message text, if any
    pub text: Option<String>,
    /// Attached media, if any
    pub media: Option<MediaRef>,
    /// View count, if the platform reports one
    pub views: Option<i64>,
    /// Forward count, if the platform reports one
    pub forwards: Option<i64>,
}

/// Capability surface the ingestor needs from the source platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Verify the session/connection is usable. A failure here is fatal to
    /// the whole run and aborts before any partition write.
    async fn connect(&self) -> Result<()>;

    /// Enumerate up to `limit` most-recent messages for a channel identity.
    async fn recent_messages(&self, channel: &str, limit: usize) -> Result<Vec<SourceMessage>>;

    /// Download a photo reference to `dest`.
    async fn download_photo(&self, media: &MediaRef, dest: &Path) -> Result<()>;
}

/// Summary of one ingestion run.
#[derive(Debug)]
pub struct ScrapeSummary {
    /// Partition date the run wrote into
    pub date: String,
    /// Message count per channel; failed channels are recorded with 0
    pub channel_counts: BTreeMap<String, u64>,
    /// Sum of all per-channel counts
    pub total_messages: u64,
    /// Photos fetched this run (already-present files are not re-fetched)
    pub images_downloaded: u64,
    /// Channels whose scrape failed entirely
    pub failed_channels: Vec<String>,
    /// Path of the manifest written at the end of the run
    pub manifest_path: PathBuf,
}

struct ChannelScrape {
    messages: u64,
    images: u64,
}

/// Pulls a bounded window of messages per channel and hands normalized
/// batches to the partition store.
pub struct Ingestor {
    client: Arc<dyn SourceClient>,
    lake: Lake,
    config: SourceConfig,
}

impl Ingestor {
    /// Build an ingestor over a source client and a partition store.
    pub fn new(client: Arc<dyn SourceClient>, lake: Lake, config: SourceConfig) -> Self {
        Self {
            client,
            lake,
            config,
        }
    }

    /// Ingest all configured channels into the `date` partition.
    ///
    /// A single channel failing is contained: it is logged, recorded with a
    /// zero count, and the remaining channels still complete. Only a failed
    /// session check aborts the run as a whole.
    pub async fn run(&self, date: &str) -> Result<ScrapeSummary> {
        validation::validate_partition_date(date)?;

        self.client
            .connect()
            .await
            .context("source platform session check failed")?;

        info!(
            date,
            channels = self.config.channels.len(),
            limit = self.config.fetch_limit,
            "ingestion run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_channels.max(1)));
        let mut handles = Vec::new();

        for channel in &self.config.channels {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("ingestion semaphore closed")?;
            let client = Arc::clone(&self.client);
            let lake = self.lake.clone();
            let channel = channel.clone();
            let date = date.to_string();
            let limit = self.config.fetch_limit;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = scrape_channel(&*client, &lake, &channel, &date, limit).await;
                (channel, result)
            }));
        }

        let mut channel_counts = BTreeMap::new();
        let mut failed_channels = Vec::new();
        let mut images_downloaded = 0;

        for handle in handles {
            let (channel, result) = handle.await.context("channel scrape task panicked")?;
            match result {
                Ok(scrape) => {
                    metrics::record_channel_scrape(&channel, scrape.messages);
                    metrics::record_downloads(&channel, scrape.images);
                    images_downloaded += scrape.images;
                    channel_counts.insert(channel, scrape.messages);
                }
                Err(e) => {
                    error!(channel = %channel, error = %format!("{e:#}"), "channel scrape failed");
                    channel_counts.insert(channel.clone(), 0);
                    failed_channels.push(channel);
                }
            }
        }
        failed_channels.sort();

        let manifest_path = self.lake.write_manifest(date, &channel_counts, None)?;
        let total_messages = channel_counts.values().sum();

        info!(
            date,
            total_messages,
            images_downloaded,
            failed = failed_channels.len(),
            "ingestion run finished"
        );

        Ok(ScrapeSummary {
            date: date.to_string(),
            channel_counts,
            total_messages,
            images_downloaded,
            failed_channels,
            manifest_path,
        })
    }
}

/// Scrape one channel: fetch the recent-message window, download photo
/// media that is not already on disk, and write the partition batch.
///
/// One task owns one channel, so every media file under that channel's
/// directory has a single writer.
async fn scrape_channel(
    client: &dyn SourceClient,
    lake: &Lake,
    channel: &str,
    date: &str,
    limit: usize,
) -> Result<ChannelScrape> {
    let messages = client
        .recent_messages(channel, limit)
        .await
        .with_context(|| format!("failed to fetch messages for {channel}"))?;

    lake.ensure_channel_image_dir(channel)?;

    let mut records = Vec::with_capacity(messages.len());
    let mut images = 0;

    for message in messages {
        let mut image_path = None;

        if let Some(media) = message.media.as_ref().filter(|m| m.kind == MediaKind::Photo) {
            let dest = lake.image_path(channel, message.id);
            if dest.exists() {
                image_path = Some(dest.display().to_string());
            } else {
                match client.download_photo(media, &dest).await {
                    Ok(()) => {
                        images += 1;
                        image_path = Some(dest.display().to_string());
                    }
                    Err(e) => {
                        // Skip the whole message unit; the next run can
                        // pick it up again.
                        warn!(
                            channel,
                            message_id = message.id,
                            error = %format!("{e:#}"),
                            "photo download failed, skipping message"
                        );
                        continue;
                    }
                }
            }
        }

        records.push(MessageRecord {
            message_id: message.id,
            channel_name: channel.to_string(),
            message_datetime: message.datetime,
            message_text: message.text,
            has_media: message.media.is_some(),
            image_path,
            view_count: message.views,
            forward_count: message.forwards,
        });
    }

    if records.is_empty() {
        info!(channel, "no messages found");
    } else {
        lake.write_batch(date, channel, &records)?;
        info!(channel, count = records.len(), images, "channel scraped");
    }

    Ok(ChannelScrape {
        messages: records.len() as u64,
        images,
    })
}

/// HTTP implementation of [`SourceClient`] against a message gateway.
///
/// The gateway exposes the consumed capability surface as plain JSON: a
/// session probe, a recent-messages listing per channel, and file content
/// by media id. Wire details beyond that are the gateway's concern.
pub struct HttpSourceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSourceClient {
    /// Build a gateway client from the source configuration.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.gateway_url.trim().is_empty(),
            "missing source gateway URL"
        );
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build source gateway HTTP client")?;
        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: i64,
    date: DateTime<Utc>,
    text: Option<String>,
    views: Option<i64>,
    forwards: Option<i64>,
    media: Option<WireMedia>,
}

#[derive(Debug, Deserialize)]
struct WireMedia {
    kind: String,
    file_id: String,
}

impl From<WireMessage> for SourceMessage {
    fn from(wire: WireMessage) -> Self {
        Self {
            id: wire.id,
            datetime: wire.date,
            text: wire.text,
            media: wire.media.map(|m| MediaRef {
                kind: if m.kind == "photo" {
                    MediaKind::Photo
                } else {
                    MediaKind::Other
                },
                file_id: m.file_id,
            }),
            views: wire.views,
            forwards: wire.forwards,
        }
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn connect(&self) -> Result<()> {
        let url = format!("{}/session", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("source gateway unreachable")?;
        anyhow::ensure!(
            response.status().is_success(),
            "source gateway rejected session check ({})",
            response.status()
        );
        Ok(())
    }

    async fn recent_messages(&self, channel: &str, limit: usize) -> Result<Vec<SourceMessage>> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel);
        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .with_context(|| format!("message listing request failed for {channel}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("message listing failed for {channel} ({status}): {body}");
        }

        let wire: Vec<WireMessage> = response
            .json()
            .await
            .with_context(|| format!("malformed message listing for {channel}"))?;
        Ok(wire.into_iter().map(SourceMessage::from).collect())
    }

    async fn download_photo(&self, media: &MediaRef, dest: &Path) -> Result<()> {
        let url = format!("{}/files/{}", self.base_url, media.file_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("media download request failed for {}", media.file_id))?;

        let status = response.status();
        if !status.is_success() {
            bail!("media download failed for {} ({status})", media.file_id);
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("media download body failed for {}", media.file_id))?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &bytes)
            .with_context(|| format!("failed to store media at {}", dest.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn test_source_config(channels: Vec<String>) -> SourceConfig {
        let mut config = AppConfig::default().source;
        config.channels = channels;
        config
    }

    fn message(id: i64, media: Option<MediaRef>) -> SourceMessage {
        SourceMessage {
            id,
            datetime: Utc::now(),
            text: Some(format!("message {id}")),
            media,
            views: Some(10),
            forwards: Some(2),
        }
    }

    fn photo(file_id: &str) -> MediaRef {
        MediaRef {
            kind: MediaKind::Photo,
            file_id: file_id.to_string(),
        }
    }

    #[tokio::test]
    async fn media_download_happens_once_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let lake = Lake::new(dir.path());

        let mut client = MockSourceClient::new();
        client.expect_connect().times(2).returning(|| Ok(()));
        client
            .expect_recent_messages()
            .times(2)
            .returning(|_, _| Ok(vec![message(42, Some(photo("f42")))]));
        // The second run must find the file on disk and never reach the
        // network again.
        client
            .expect_download_photo()
            .times(1)
            .returning(|_, dest| {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(dest, b"jpeg-bytes").unwrap();
                Ok(())
            });

        let ingestor = Ingestor::new(
            Arc::new(client),
            lake.clone(),
            test_source_config(vec!["chan".to_string()]),
        );

        let first = ingestor.run("2025-07-14").await.unwrap();
        let second = ingestor.run("2025-07-14").await.unwrap();

        assert_eq!(first.total_messages, 1);
        assert_eq!(first.images_downloaded, 1);
        assert_eq!(second.total_messages, 1);
        assert_eq!(second.images_downloaded, 0);
        assert!(lake.image_path("chan", 42).exists());
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let lake = Lake::new(dir.path());

        let mut client = MockSourceClient::new();
        client.expect_connect().returning(|| Ok(()));
        client
            .expect_recent_messages()
            .withf(|channel, _| channel == "badchan")
            .returning(|_, _| Err(anyhow::anyhow!("fetch exploded")));
        client
            .expect_recent_messages()
            .withf(|channel, _| channel == "goodchan")
            .returning(|_, _| Ok(vec![message(1, None), message(2, None)]));

        let ingestor = Ingestor::new(
            Arc::new(client),
            lake.clone(),
            test_source_config(vec!["badchan".to_string(), "goodchan".to_string()]),
        );

        let summary = ingestor.run("2025-07-14").await.unwrap();

        assert_eq!(summary.channel_counts.get("goodchan"), Some(&2));
        assert_eq!(summary.channel_counts.get("badchan"), Some(&0));
        assert_eq!(summary.failed_channels, vec!["badchan".to_string()]);
        assert_eq!(summary.total_messages, 2);

        // Zero is a recorded outcome: the failing channel appears in the
        // manifest rather than being omitted.
        let manifest = lake.read_manifest("2025-07-14").unwrap();
        assert_eq!(manifest.total_messages, 2);
        assert!(manifest.channels.contains_key("badchan"));
        assert!(lake.batch_path("2025-07-14", "goodchan").exists());
        assert!(!lake.batch_path("2025-07-14", "badchan").exists());
    }

    #[tokio::test]
    async fn session_failure_aborts_before_any_partition_write() {
        let dir = tempfile::tempdir().unwrap();
        let lake = Lake::new(dir.path());

        let mut client = MockSourceClient::new();
        client
            .expect_connect()
            .returning(|| Err(anyhow::anyhow!("unauthorized")));

        let ingestor = Ingestor::new(
            Arc::new(client),
            lake.clone(),
            test_source_config(vec!["chan".to_string()]),
        );

        assert!(ingestor.run("2025-07-14").await.is_err());
        assert!(!lake.manifest_path("2025-07-14").exists());
        assert!(!lake.batch_path("2025-07-14", "chan").exists());
    }

    #[tokio::test]
    async fn failed_download_skips_only_that_message() {
        let dir = tempfile::tempdir().unwrap();
        let lake = Lake::new(dir.path());

        let mut client = MockSourceClient::new();
        client.expect_connect().returning(|| Ok(()));
        client.expect_recent_messages().returning(|_, _| {
            Ok(vec![
                message(1, Some(photo("f1"))),
                message(2, None),
            ])
        });
        client
            .expect_download_photo()
            .returning(|_, _| Err(anyhow::anyhow!("timed out")));

        let ingestor = Ingestor::new(
            Arc::new(client),
            lake.clone(),
            test_source_config(vec!["chan".to_string()]),
        );

        let summary = ingestor.run("2025-07-14").await.unwrap();
        assert_eq!(summary.total_messages, 1);
        assert_eq!(summary.images_downloaded, 0);
    }
}
