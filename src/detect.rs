//! Detection enrichment for downloaded media.
//!
//! The model is consumed through the [`ObjectDetector`] capability trait:
//! given an image, return a set of (class label, confidence) detections.
//! Model choice and weights are the endpoint's concern.
//!
//! For every stored image the enricher derives one [`DetectionRecord`]:
//! the highest-confidence detection becomes the primary label, and the
//! full detection set is classified into a coarse content category. The
//! flat record set is written to the exchange file the detection loader
//! consumes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::DetectionConfig;
use crate::lake::{ImageRef, Lake};
use crate::metrics;
use crate::models::{Detection, DetectionRecord, ImageCategory};

/// Class label treated as a person detection.
pub const PERSON_CLASS: &str = "person";

/// Container classes counted as a product for classification purposes.
pub const CONTAINER_CLASSES: [&str; 4] = ["bottle", "cup", "vase", "bowl"];

/// Label emitted for images with no detections at all.
pub const NO_DETECTION_CLASS: &str = "none";

/// Capability surface the enricher needs from the detection model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Run the model once over `image` and return every detection above
    /// the model's acceptance threshold.
    async fn detect(&self, image: &Path) -> Result<Vec<Detection>>;
}

/// Classify an image from its full detection set.
///
/// The result depends only on set membership, so it is deterministic
/// regardless of detection order.
#[must_use]
pub fn classify(detections: &[Detection]) -> ImageCategory {
    let has_person = detections.iter().any(|d| d.class_name == PERSON_CLASS);
    let has_container = detections
        .iter()
        .any(|d| CONTAINER_CLASSES.contains(&d.class_name.as_str()));

    match (has_person, has_container) {
        (true, true) => ImageCategory::Promotional,
        (false, true) => ImageCategory::ProductDisplay,
        (true, false) => ImageCategory::Lifestyle,
        (false, false) => ImageCategory::Other,
    }
}

/// The highest-confidence detection, if any.
fn primary(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

/// Build the enrichment record for one image.
///
/// Images with zero detections are still represented, with the sentinel
/// label/score and the `other` category.
#[must_use]
pub fn record_for_image(image: &ImageRef, detections: &[Detection]) -> DetectionRecord {
    let (detected_class, confidence_score) = primary(detections).map_or_else(
        || (NO_DETECTION_CLASS.to_string(), 0.0),
        |d| (d.class_name.clone(), d.confidence),
    );

    DetectionRecord {
        message_id: image.message_id,
        channel_name: image.channel_name.clone(),
        detected_class,
        confidence_score,
        image_category: classify(detections),
    }
}

/// Summary of one enrichment run.
#[derive(Debug)]
pub struct EnrichSummary {
    /// Images found in the media tree
    pub images_found: usize,
    /// Records written to the exchange file
    pub records_written: usize,
    /// Images skipped after a read or inference error
    pub images_failed: usize,
    /// Path of the exchange file
    pub output_path: PathBuf,
}

/// Runs the detection model over every stored image and writes the flat
/// enrichment record set.
pub struct Enricher {
    detector: Arc<dyn ObjectDetector>,
    lake: Lake,
    config: DetectionConfig,
}

impl Enricher {
    /// Build an enricher over a detector and a partition store.
    pub fn new(detector: Arc<dyn ObjectDetector>, lake: Lake, config: DetectionConfig) -> Self {
        Self {
            detector,
            lake,
            config,
        }
    }

    /// Enrich every image in the media tree.
    ///
    /// A read or inference error for one image is logged and that image is
    /// skipped; the remaining images still complete. Each image is
    /// independent, so inference runs concurrently up to the configured
    /// bound.
    pub async fn run(&self) -> Result<EnrichSummary> {
        let images = self.lake.list_images()?;
        info!(count = images.len(), "enrichment run started");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_images.max(1)));
        let mut handles = Vec::new();

        for image in images {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("enrichment semaphore closed")?;
            let detector = Arc::clone(&self.detector);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = detector.detect(&image.path).await;
                (image, result)
            }));
        }

        let images_found = handles.len();
        let mut records = Vec::new();
        let mut images_failed = 0;

        for handle in handles {
            let (image, result) = handle.await.context("detection task panicked")?;
            match result {
                Ok(detections) => records.push(record_for_image(&image, &detections)),
                Err(e) => {
                    images_failed += 1;
                    warn!(
                        path = %image.path.display(),
                        error = %format!("{e:#}"),
                        "detection failed, skipping image"
                    );
                }
            }
        }

        records.sort_by(|a, b| {
            a.channel_name
                .cmp(&b.channel_name)
                .then(a.message_id.cmp(&b.message_id))
        });

        let output_path = self.lake.detections_csv_path();
        write_detection_records(&output_path, &records)?;
        metrics::record_enrichment(records.len() as u64, images_failed as u64);

        info!(
            records = records.len(),
            failed = images_failed,
            path = %output_path.display(),
            "enrichment run finished"
        );

        Ok(EnrichSummary {
            images_found,
            records_written: records.len(),
            images_failed,
            output_path,
        })
    }
}

/// Write the enrichment record set to the exchange file, overwriting any
/// previous run's output.
pub fn write_detection_records(path: &Path, records: &[DetectionRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create exchange file at {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// HTTP implementation of [`ObjectDetector`] against an inference endpoint.
///
/// Posts the raw image bytes and parses the returned detection list; the
/// configured model name and acceptance threshold travel as query
/// parameters so thresholding stays on the model side.
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    confidence_threshold: f64,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    name: String,
    confidence: f64,
}

impl HttpDetector {
    /// Build a detector client from the detection configuration.
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.endpoint.trim().is_empty(),
            "missing detection endpoint URL"
        );
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build detection HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            confidence_threshold: config.confidence_threshold,
        })
    }
}

#[async_trait]
impl ObjectDetector for HttpDetector {
    async fn detect(&self, image: &Path) -> Result<Vec<Detection>> {
        let bytes = std::fs::read(image)
            .with_context(|| format!("failed to read image {}", image.display()))?;

        let url = format!("{}/v1/detect", self.endpoint);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("model", self.model.clone()),
                ("confidence", self.confidence_threshold.to_string()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .context("inference request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("inference failed ({status}): {body}");
        }

        let wire: Vec<WireDetection> = response
            .json()
            .await
            .context("malformed detection response")?;
        Ok(wire
            .into_iter()
            .map(|d| Detection {
                class_name: d.name,
                confidence: d.confidence,
            })
            .collect())
    }
}
