mod support;

use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use switchroot_depot::config::RequiredFile;
use switchroot_depot::domain::{Artifact, ArtifactCategory, BuildEntry, BuildKind, ProfileTag};
use switchroot_depot::error::DepotError;
use switchroot_depot::planner::{TaskPlanner, descriptor_path};
use switchroot_depot::pool::{DownloadPool, TaskStatus};
use switchroot_depot::progress::{CancelToken, DownloadEvent, NullSink};
use switchroot_depot::transfer::{MULTI_SEGMENT_THRESHOLD, SegmentedDownloader, TransferSettings};

use support::{FakeFile, FakeTransport, RecordingSink, payload, utf8_tempdir};

const TEMPLATE: &str = "[Android]\nl4t=1\n";

fn url(name: &str) -> String {
    format!("https://files.example.org/{name}")
}

fn artifact(name: &str, category: ArtifactCategory) -> Artifact {
    Artifact::new(&url(name), name, 100, category)
}

fn linux(name: &str) -> BuildEntry {
    BuildEntry::new(
        BuildKind::Os,
        "Ubuntu Noble".to_string(),
        name.to_string(),
        artifact(name, ArtifactCategory::Os),
        None,
        None,
        Vec::new(),
    )
}

fn android(primary: &str, companion: &str, tag: &str) -> BuildEntry {
    BuildEntry::new(
        BuildKind::Mobile,
        format!("Android {tag}"),
        primary.to_string(),
        artifact(primary, ArtifactCategory::Mobile),
        Some(artifact(companion, ArtifactCategory::Companion)),
        Some(tag.parse::<ProfileTag>().unwrap()),
        vec![artifact("boot.img", ArtifactCategory::Build)],
    )
}

fn required() -> Vec<RequiredFile> {
    vec![RequiredFile {
        name: "bootlogo_android.bmp".to_string(),
        url: url("bootlogo_android.bmp"),
        path: Utf8PathBuf::from("switchroot/android/bootlogo_android.bmp"),
    }]
}

fn pool(transport: FakeTransport, workers: usize) -> DownloadPool<FakeTransport> {
    let settings = TransferSettings {
        connections: 4,
        chunk_size: 1024,
        multi_segment_threshold: MULTI_SEGMENT_THRESHOLD,
        poll_interval: Duration::from_millis(5),
    };
    DownloadPool::new(SegmentedDownloader::new(transport, settings), workers, TEMPLATE)
}

fn serve(transport: FakeTransport, names: &[&str]) -> FakeTransport {
    names.iter().fold(transport, |transport, name| {
        transport.with_file(&url(name), FakeFile::new(payload(2048), true))
    })
}

#[test]
fn failed_task_does_not_stop_siblings() {
    let transport = serve(FakeTransport::default(), &["a.7z", "c.7z"]);
    let plan = TaskPlanner::new(&[]).plan(&[linux("a.7z"), linux("b.7z"), linux("c.7z")]);
    let (_temp, root) = utf8_tempdir();

    let summary = pool(transport, 2)
        .run(&plan, &root, &NullSink, &CancelToken::new())
        .unwrap();

    assert_eq!(summary.total_tasks, 3);
    assert_eq!(summary.completed_tasks, 2);
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);
    let sequences = summary
        .outcomes
        .iter()
        .map(|outcome| outcome.sequence)
        .collect::<Vec<_>>();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_matches!(&summary.outcomes[1].status, TaskStatus::Failed { error } if error.contains("404"));
    assert!(root.join("a.7z").as_std_path().exists());
    assert!(!root.join("b.7z").as_std_path().exists());
    assert!(root.join("c.7z").as_std_path().exists());
}

#[test]
fn completion_count_never_exceeds_total() {
    let names = ["1.7z", "2.7z", "3.7z", "4.7z", "5.7z", "6.7z"];
    let transport = serve(FakeTransport::default(), &names);
    let entries = names.iter().map(|name| linux(name)).collect::<Vec<_>>();
    let plan = TaskPlanner::new(&[]).plan(&entries);
    let (_temp, root) = utf8_tempdir();
    let sink = RecordingSink::default();

    let summary = pool(transport, 3)
        .run(&plan, &root, &sink, &CancelToken::new())
        .unwrap();

    let mut finished = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            DownloadEvent::TaskFinished {
                completed_tasks,
                total_tasks,
                ..
            } => {
                assert!(completed_tasks <= total_tasks);
                Some(completed_tasks)
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    finished.sort_unstable();
    assert_eq!(finished, vec![1, 2, 3, 4, 5, 6]);
    assert!(summary.is_complete());
}

#[test]
fn shared_profile_is_finalized_once() {
    let transport = serve(
        FakeTransport::default(),
        &[
            "lineage-21.zip",
            "lineage-22.zip",
            "gapps-14.zip",
            "gapps-15.zip",
            "boot.img",
            "bootlogo_android.bmp",
        ],
    );
    let files = required();
    let plan = TaskPlanner::new(&files).plan(&[
        android("lineage-21.zip", "gapps-14.zip", "TV"),
        android("lineage-22.zip", "gapps-15.zip", "TV"),
    ]);
    let (_temp, root) = utf8_tempdir();
    let sink = RecordingSink::default();

    let summary = pool(transport, 4)
        .run(&plan, &root, &sink, &CancelToken::new())
        .unwrap();

    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.finalized_profiles.len(), 1);
    let tag: ProfileTag = "TV".parse().unwrap();
    let descriptor = descriptor_path(&root, &tag);
    assert_eq!(summary.finalized_profiles[0].path, descriptor);
    assert_eq!(fs::read_to_string(descriptor.as_std_path()).unwrap(), TEMPLATE);
    assert!(
        root.join("Android-TV/switchroot/install/boot.img")
            .as_std_path()
            .exists()
    );
    assert!(
        root.join("Android-TV/switchroot/android/bootlogo_android.bmp")
            .as_std_path()
            .exists()
    );

    let finalized_events = sink
        .events()
        .into_iter()
        .filter(|event| matches!(event, DownloadEvent::ProfileFinalized { .. }))
        .count();
    assert_eq!(finalized_events, 1);
    assert_matches!(
        sink.events().last(),
        Some(DownloadEvent::RunFinished { completed_tasks: 6, total_tasks: 6 })
    );
}

#[test]
fn cancelled_run_skips_everything_and_writes_no_descriptor() {
    let transport = serve(FakeTransport::default(), &["lineage-21.zip", "gapps.zip"]);
    let plan = TaskPlanner::new(&[]).plan(&[android("lineage-21.zip", "gapps.zip", "Tablet")]);
    let (_temp, root) = utf8_tempdir();
    let cancel = CancelToken::new();
    cancel.cancel();

    let summary = pool(transport.clone(), 2)
        .run(&plan, &root, &NullSink, &cancel)
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.completed_tasks, 0);
    assert_eq!(summary.skipped_tasks(), summary.total_tasks);
    assert!(summary.finalized_profiles.is_empty());
    assert!(transport.requests().is_empty());
    let tag: ProfileTag = "Tablet".parse().unwrap();
    assert!(!descriptor_path(&root, &tag).as_std_path().exists());
}

#[test]
fn cancelling_mid_run_skips_tasks_that_had_not_started() {
    let cancel = CancelToken::new();
    let transport = FakeTransport::default()
        .with_file(
            &url("first.7z"),
            FakeFile::new(payload(64 * 1024), true).cancelling(&cancel),
        )
        .with_file(&url("second.7z"), FakeFile::new(payload(2048), true))
        .with_file(&url("third.7z"), FakeFile::new(payload(2048), true));
    let plan = TaskPlanner::new(&[]).plan(&[
        linux("first.7z"),
        linux("second.7z"),
        linux("third.7z"),
    ]);
    let (_temp, root) = utf8_tempdir();
    let sink = RecordingSink::default();

    let summary = pool(transport.clone(), 1)
        .run(&plan, &root, &sink, &cancel)
        .unwrap();

    assert!(summary.cancelled);
    assert!(!summary.is_complete());
    assert_eq!(summary.completed_tasks, 0);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.skipped_tasks(), 3);
    for outcome in &summary.outcomes {
        assert_matches!(&outcome.status, TaskStatus::Skipped { reason } if reason.contains("cancel"));
    }
    let fetched = transport
        .requests()
        .into_iter()
        .map(|(url, _)| url)
        .collect::<Vec<_>>();
    assert_eq!(fetched, vec![url("first.7z")]);
    for name in ["first.7z", "second.7z", "third.7z"] {
        assert!(!root.join(name).as_std_path().exists());
    }
    let started = sink
        .events()
        .into_iter()
        .filter(|event| matches!(event, DownloadEvent::TaskStarted { .. }))
        .count();
    assert_eq!(started, 1);
}

#[test]
fn missing_root_is_fatal() {
    let (_temp, root) = utf8_tempdir();
    let plan = TaskPlanner::new(&[]).plan(&[linux("a.7z")]);
    let err = pool(FakeTransport::default(), 1)
        .run(&plan, &root.join("absent"), &NullSink, &CancelToken::new())
        .unwrap_err();
    assert_matches!(err, DepotError::InvalidDestination(_));
}
