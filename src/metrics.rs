//! Metrics collection for pipeline runs.
//!
//! Thin wrappers over the `metrics` facade; without a recorder installed
//! every call is a no-op, so components record unconditionally.

use std::time::Duration;

use crate::models::LoadReport;

/// Record messages scraped for one channel.
pub fn record_channel_scrape(channel: &str, messages: u64) {
    metrics::counter!("cw_messages_scraped_total", "channel" => channel.to_string())
        .increment(messages);
}

/// Record media files downloaded for one channel.
pub fn record_downloads(channel: &str, images: u64) {
    metrics::counter!("cw_images_downloaded_total", "channel" => channel.to_string())
        .increment(images);
}

/// Record images enriched and failed by the detection step.
pub fn record_enrichment(processed: u64, failed: u64) {
    metrics::counter!("cw_images_enriched_total").increment(processed);
    metrics::counter!("cw_images_failed_total").increment(failed);
}

/// Record the outcome of one warehouse load call.
pub fn record_load(table: &str, report: &LoadReport) {
    let table = table.to_string();
    metrics::counter!("cw_rows_loaded_total", "table" => table.clone())
        .increment(report.loaded as u64);
    metrics::counter!("cw_rows_skipped_total", "table" => table.clone())
        .increment(report.skipped as u64);
    metrics::counter!("cw_rows_rejected_total", "table" => table).increment(report.rejected as u64);
}

/// Record one orchestrated step execution.
pub fn record_step(step: &str, duration: Duration, success: bool) {
    let status = if success { "success" } else { "error" };
    metrics::counter!("cw_steps_total", "step" => step.to_string(), "status" => status)
        .increment(1);
    metrics::histogram!("cw_step_duration_seconds", "step" => step.to_string())
        .record(duration.as_secs_f64());
}
