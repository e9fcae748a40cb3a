use serde_json::json;
use tempfile::tempdir;

use channel_warehouse::models::{DetectionRecord, ImageCategory};
use channel_warehouse::warehouse::Warehouse;

fn open_warehouse(dir: &tempfile::TempDir) -> Warehouse {
    let path = dir.path().join("warehouse.db");
    Warehouse::new(path.to_str().expect("utf-8 temp path"), 4).expect("Failed to open warehouse")
}

fn message_row(message_id: i64, channel: &str, text: &str) -> serde_json::Value {
    json!({
        "message_id": message_id,
        "channel_name": channel,
        "message_datetime": "2025-07-14T09:30:00Z",
        "message_text": text,
        "has_media": false,
        "image_path": null,
        "view_count": 11,
        "forward_count": null,
    })
}

fn detection(message_id: i64, channel: &str, class: &str, score: f64) -> DetectionRecord {
    DetectionRecord {
        message_id,
        channel_name: channel.to_string(),
        detected_class: class.to_string(),
        confidence_score: score,
        image_category: ImageCategory::ProductDisplay,
    }
}

#[test]
fn test_schema_creation_is_idempotent() {
    let dir = tempdir().expect("Failed to create temp directory");
    let first = open_warehouse(&dir);
    drop(first);
    // Re-opening the same database re-applies the DDL without error.
    let second = open_warehouse(&dir);
    assert_eq!(second.counts().unwrap(), (0, 0));
}

#[test]
fn test_raw_load_is_insert_or_skip() {
    let dir = tempdir().expect("Failed to create temp directory");
    let warehouse = open_warehouse(&dir);

    let first = warehouse
        .load_messages(&[message_row(1, "chan", "original capture")])
        .unwrap();
    assert_eq!(first.loaded, 1);
    assert_eq!(first.skipped, 0);

    // Same natural key, different payload: the first capture must win.
    let second = warehouse
        .load_messages(&[message_row(1, "chan", "late rewrite")])
        .unwrap();
    assert_eq!(second.loaded, 0);
    assert_eq!(second.skipped, 1);

    let stored = warehouse.get_message(1, "chan").unwrap().unwrap();
    assert_eq!(stored.message_text.as_deref(), Some("original capture"));
    assert_eq!(warehouse.counts().unwrap().0, 1);
}

#[test]
fn test_same_message_id_in_two_channels_is_two_rows() {
    let dir = tempdir().expect("Failed to create temp directory");
    let warehouse = open_warehouse(&dir);

    let report = warehouse
        .load_messages(&[message_row(1, "alpha", "a"), message_row(1, "beta", "b")])
        .unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(warehouse.counts().unwrap().0, 2);
}

#[test]
fn test_detection_load_is_insert_or_replace() {
    let dir = tempdir().expect("Failed to create temp directory");
    let warehouse = open_warehouse(&dir);

    warehouse
        .load_detections(&[detection(1, "chan", "bottle", 0.41)])
        .unwrap();
    let second = warehouse
        .load_detections(&[detection(1, "chan", "cup", 0.87)])
        .unwrap();
    assert_eq!(second.loaded, 1);

    // Re-runs refresh derived data: the latest pass wins.
    let stored = warehouse.get_detection(1, "chan").unwrap().unwrap();
    assert_eq!(stored.detected_class, "cup");
    assert!((stored.confidence_score - 0.87).abs() < f64::EPSILON);
    assert_eq!(warehouse.counts().unwrap().1, 1);
}

#[test]
fn test_malformed_rows_are_rejected_individually() {
    let dir = tempdir().expect("Failed to create temp directory");
    let warehouse = open_warehouse(&dir);

    let rows = vec![
        message_row(1, "chan", "good"),
        json!({"channel_name": "chan", "message_text": "no id"}),
        json!({
            "message_id": 3,
            "channel_name": "",
            "message_datetime": "2025-07-14T09:30:00Z",
            "message_text": "empty channel",
            "has_media": false,
            "image_path": null,
            "view_count": null,
            "forward_count": null,
        }),
        json!("not even an object"),
        message_row(5, "chan", "also good"),
    ];

    let report = warehouse.load_messages(&rows).unwrap();
    assert_eq!(report.attempted, 5);
    assert_eq!(report.loaded, 2);
    assert_eq!(report.rejected, 3);
    assert_eq!(report.attempted, report.loaded + report.skipped + report.rejected);
    assert_eq!(warehouse.counts().unwrap().0, 2);
}

#[test]
fn test_load_detections_from_csv_rejects_bad_rows() {
    let dir = tempdir().expect("Failed to create temp directory");
    let warehouse = open_warehouse(&dir);

    let csv_path = dir.path().join("detections.csv");
    std::fs::write(
        &csv_path,
        "message_id,channel_name,detected_class,confidence_score,image_category\n\
         1,chan,bottle,0.9,product_display\n\
         not-a-number,chan,cup,0.5,other\n\
         2,chan,person,0.7,lifestyle\n",
    )
    .unwrap();

    let report = warehouse.load_detections_from_csv(&csv_path).unwrap();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.loaded, 2);
    assert_eq!(report.rejected, 1);
    assert_eq!(warehouse.counts().unwrap().1, 2);
}

#[test]
fn test_load_detections_from_missing_csv_reports_zero() {
    let dir = tempdir().expect("Failed to create temp directory");
    let warehouse = open_warehouse(&dir);
    let report = warehouse
        .load_detections_from_csv(&dir.path().join("absent.csv"))
        .unwrap();
    assert_eq!(report.attempted, 0);
}

#[test]
fn test_channel_summary_counts_rows_per_channel() {
    let dir = tempdir().expect("Failed to create temp directory");
    let warehouse = open_warehouse(&dir);

    warehouse
        .load_messages(&[
            message_row(1, "alpha", "a"),
            message_row(2, "alpha", "b"),
            message_row(1, "beta", "c"),
        ])
        .unwrap();

    let summary = warehouse.channel_summary().unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].channel_name, "alpha");
    assert_eq!(summary[0].messages, 2);
    assert_eq!(summary[1].channel_name, "beta");
    assert_eq!(summary[1].messages, 1);
}
