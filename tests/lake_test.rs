use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tempfile::tempdir;

use channel_warehouse::lake::Lake;
use channel_warehouse::models::MessageRecord;

fn record(message_id: i64, channel: &str) -> MessageRecord {
    MessageRecord {
        message_id,
        channel_name: channel.to_string(),
        message_datetime: Utc.with_ymd_and_hms(2025, 7, 14, 9, 30, 0).unwrap(),
        message_text: Some(format!("message {message_id}")),
        has_media: false,
        image_path: None,
        view_count: Some(120),
        forward_count: None,
    }
}

#[test]
fn test_batch_write_is_idempotent() {
    let dir = tempdir().expect("Failed to create temp directory");
    let lake = Lake::new(dir.path());
    let records = vec![record(1, "chan"), record(2, "chan")];

    let first = lake.write_batch("2025-07-14", "chan", &records).unwrap();
    let content_after_first = std::fs::read_to_string(&first).unwrap();

    let second = lake.write_batch("2025-07-14", "chan", &records).unwrap();
    let content_after_second = std::fs::read_to_string(&second).unwrap();

    assert_eq!(first, second);
    assert_eq!(content_after_first, content_after_second);

    // The partition holds exactly one file for the channel, not two.
    let entries: Vec<_> = std::fs::read_dir(first.parent().unwrap())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(entries.len(), 1);

    let parsed: Vec<MessageRecord> =
        serde_json::from_str(&content_after_second).expect("batch file is valid JSON");
    assert_eq!(parsed.len(), 2);
}

#[test]
fn test_manifest_total_matches_channel_counts() {
    let dir = tempdir().expect("Failed to create temp directory");
    let lake = Lake::new(dir.path());

    let mut counts = BTreeMap::new();
    counts.insert("alpha".to_string(), 12_u64);
    counts.insert("beta".to_string(), 0_u64);
    counts.insert("gamma".to_string(), 5_u64);

    lake.write_manifest("2025-07-14", &counts, None).unwrap();
    let manifest = lake.read_manifest("2025-07-14").unwrap();

    assert_eq!(manifest.total_messages, 17);
    assert_eq!(manifest.date, "2025-07-14");
    for key in counts.keys() {
        assert!(manifest.channels.contains_key(key), "missing channel {key}");
    }
    // Zero is recorded, not omitted.
    assert_eq!(manifest.channels.get("beta"), Some(&0));
}

#[test]
fn test_manifest_extra_fields_cannot_displace_required_fields() {
    let dir = tempdir().expect("Failed to create temp directory");
    let lake = Lake::new(dir.path());

    let mut counts = BTreeMap::new();
    counts.insert("alpha".to_string(), 3_u64);

    let mut extra = serde_json::Map::new();
    extra.insert("total_messages".to_string(), serde_json::json!(999));
    extra.insert("trigger".to_string(), serde_json::json!("manual"));

    lake.write_manifest("2025-07-14", &counts, Some(extra)).unwrap();
    let manifest = lake.read_manifest("2025-07-14").unwrap();

    assert_eq!(manifest.total_messages, 3);
    assert_eq!(
        manifest.extra.get("trigger"),
        Some(&serde_json::json!("manual"))
    );
    assert!(!manifest.extra.contains_key("total_messages"));
}

#[test]
fn test_read_batches_skips_manifest_files() {
    let dir = tempdir().expect("Failed to create temp directory");
    let lake = Lake::new(dir.path());

    lake.write_batch("2025-07-14", "chan", &[record(1, "chan")]).unwrap();
    let mut counts = BTreeMap::new();
    counts.insert("chan".to_string(), 1_u64);
    lake.write_manifest("2025-07-14", &counts, None).unwrap();

    let batches = lake.read_batches(Some("2025-07-14")).unwrap();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].path.ends_with("chan.json"));
    assert_eq!(batches[0].records.len(), 1);
}

#[test]
fn test_read_batches_without_date_walks_all_partitions() {
    let dir = tempdir().expect("Failed to create temp directory");
    let lake = Lake::new(dir.path());

    lake.write_batch("2025-07-13", "chan", &[record(1, "chan")]).unwrap();
    lake.write_batch("2025-07-14", "chan", &[record(2, "chan"), record(3, "chan")])
        .unwrap();

    let batches = lake.read_batches(None).unwrap();
    assert_eq!(batches.len(), 2);
    let total: usize = batches.iter().map(|b| b.records.len()).sum();
    assert_eq!(total, 3);
}

#[test]
fn test_read_batches_on_empty_lake_is_empty_not_an_error() {
    let dir = tempdir().expect("Failed to create temp directory");
    let lake = Lake::new(dir.path());
    assert!(lake.read_batches(None).unwrap().is_empty());
    assert!(lake.read_batches(Some("2025-07-14")).unwrap().is_empty());
}

#[test]
fn test_list_images_yields_natural_keys_and_skips_odd_stems() {
    let dir = tempdir().expect("Failed to create temp directory");
    let lake = Lake::new(dir.path());

    for (channel, id) in [("alpha", 10_i64), ("alpha", 11), ("beta", 7)] {
        let path = lake.image_path(channel, id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"jpeg").unwrap();
    }
    // Not message-keyed; must be ignored.
    let stray = lake.image_path("alpha", 0).with_file_name("cover-art.jpg");
    std::fs::write(stray, b"jpeg").unwrap();

    let images = lake.list_images().unwrap();
    assert_eq!(images.len(), 3);
    assert!(images
        .iter()
        .any(|i| i.channel_name == "beta" && i.message_id == 7));
    assert!(images.iter().all(|i| i.path.exists()));
}

#[test]
fn test_rejects_traversal_channel_and_bad_date() {
    let dir = tempdir().expect("Failed to create temp directory");
    let lake = Lake::new(dir.path());

    assert!(lake.write_batch("2025-07-14", "../escape", &[]).is_err());
    assert!(lake.write_batch("not-a-date", "chan", &[]).is_err());
    assert!(lake.ensure_channel_image_dir("a/b").is_err());
}

proptest! {
    // The manifest total always equals the sum of the per-channel counts,
    // and every input channel appears in the manifest.
    #[test]
    fn manifest_total_invariant(
        counts in prop::collection::btree_map("[a-z][a-z0-9]{0,7}", 0_u64..10_000, 0..8)
    ) {
        let dir = tempdir().expect("Failed to create temp directory");
        let lake = Lake::new(dir.path());

        lake.write_manifest("2025-07-14", &counts, None).unwrap();
        let manifest = lake.read_manifest("2025-07-14").unwrap();

        prop_assert_eq!(manifest.total_messages, counts.values().sum::<u64>());
        for key in counts.keys() {
            prop_assert!(manifest.channels.contains_key(key));
        }
    }
}
