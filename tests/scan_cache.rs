mod support;

use chrono::{Duration, Utc};

use switchroot_depot::domain::{Artifact, ArtifactCategory, BuildEntry, BuildKind};
use switchroot_depot::scan_cache::{SCAN_CACHE_SCHEMA, ScanCache};

use support::utf8_tempdir;

fn entries() -> Vec<BuildEntry> {
    vec![
        BuildEntry::new(
            BuildKind::Os,
            "Ubuntu Noble".to_string(),
            "switchroot-noble-5.1.2.7z".to_string(),
            Artifact::new(
                "https://download.switchroot.org/ubuntu-noble/switchroot-noble-5.1.2.7z",
                "switchroot-noble-5.1.2.7z",
                3_000_000_000,
                ArtifactCategory::Os,
            ),
            None,
            None,
            Vec::new(),
        ),
        BuildEntry::new(
            BuildKind::Mobile,
            "Android TV".to_string(),
            "LineageOS 21.0 (20240115) + MindTheGapps".to_string(),
            Artifact::new("https://x/l.zip", "lineage-21.0.zip", 900, ArtifactCategory::Mobile),
            Some(Artifact::new(
                "https://x/g.zip",
                "MindTheGapps-14.zip",
                300,
                ArtifactCategory::Companion,
            )),
            Some("TV".parse().unwrap()),
            vec![Artifact::new("https://x/boot.img", "boot.img", 64, ArtifactCategory::Build)],
        ),
    ]
}

#[test]
fn record_older_than_a_day_is_a_miss() {
    let (_temp, root) = utf8_tempdir();
    let cache = ScanCache::new(root.join("last_scan.json"));
    let now = Utc::now();
    cache.save(&entries(), now - Duration::hours(25)).unwrap();

    assert_eq!(cache.load_at(now), None);
}

#[test]
fn recent_record_is_returned_intact() {
    let (_temp, root) = utf8_tempdir();
    let cache = ScanCache::new(root.join("last_scan.json"));
    let now = Utc::now();
    let scanned = now - Duration::hours(1);
    cache.save(&entries(), scanned).unwrap();

    let record = cache.load_at(now).unwrap();
    assert_eq!(record.schema_version, SCAN_CACHE_SCHEMA);
    assert_eq!(record.scan_timestamp, scanned.timestamp());
    assert_eq!(record.entries, entries());
}

#[test]
fn absent_file_is_a_miss() {
    let (_temp, root) = utf8_tempdir();
    let cache = ScanCache::new(root.join("nothing.json"));
    assert_eq!(cache.load(), None);
}
