// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests of the file source: configuration through to events on
//! the output queue, in both tail and cat modes.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use filesource::acquisition::event::{ExpectMode, LineEvent};
use filesource::acquisition::file::{Error, FileSource};
use filesource::acquisition::supervisor::Supervisor;
use filesource::acquisition::{AcquisitionMode, DataSource, MetricsLevel};
use filesource::bounded_channel::{BoundedReceiver, bounded};
use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use opentelemetry::global;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);
const QUIET_PERIOD: Duration = Duration::from_millis(500);

fn tail_source(yaml: &str, level: MetricsLevel) -> DataSource {
    FileSource::configure(yaml, level, &global::meter("test"))
        .unwrap()
        .into()
}

fn append(path: &Path, data: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(data.as_bytes()).unwrap();
    file.sync_all().unwrap();
}

async fn recv_n(rx: &BoundedReceiver<LineEvent>, n: usize) -> Vec<LineEvent> {
    let mut events = Vec::with_capacity(n);
    while events.len() < n {
        let event = timeout(TEST_TIMEOUT, rx.next())
            .await
            .expect("timed out waiting for events")
            .expect("output queue closed");
        events.push(event);
    }
    events
}

async fn assert_quiet(rx: &BoundedReceiver<LineEvent>) {
    sleep(QUIET_PERIOD).await;
    if let Some(event) = rx.try_recv() {
        panic!("unexpected event: {:?}", event);
    }
}

async fn shutdown(supervisor: &Supervisor) {
    supervisor.kill(None);
    timeout(TEST_TIMEOUT, supervisor.wait())
        .await
        .expect("workers did not stop")
        .unwrap();
    assert_eq!(supervisor.active_workers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tail_emits_only_appended_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    fs::write(&path, "old 1\nold 2\nold 3\n").unwrap();

    let source = tail_source(
        &format!("filenames:\n  - {}\nlabels:\n  type: syslog\n", path.display()),
        MetricsLevel::Full,
    );
    assert_eq!(source.mode(), AcquisitionMode::Tail);

    let (tx, rx) = bounded(64);
    let supervisor = Supervisor::new();
    source.start(tx, &supervisor).await.unwrap();

    append(&path, "new 1\nnew 2\n");

    let events = recv_n(&rx, 2).await;
    let raws: Vec<_> = events.iter().map(|e| e.raw.as_str()).collect();
    assert_eq!(raws, vec!["new 1", "new 2"]);
    for event in &events {
        assert_eq!(event.src, path.to_string_lossy());
        assert_eq!(event.expect_mode, ExpectMode::Live);
        assert_eq!(event.module, "file");
        assert_eq!(event.labels.get("type").map(String::as_str), Some("syslog"));
    }
    assert_quiet(&rx).await;

    assert_eq!(
        source.metrics().get(path.to_string_lossy().as_ref()),
        Some(&2)
    );

    shutdown(&supervisor).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_matching_file_is_read_from_start() {
    let dir = TempDir::new().unwrap();
    let source = tail_source(
        &format!("filenames:\n  - {}/*.log\n", dir.path().display()),
        MetricsLevel::Full,
    );

    let (tx, rx) = bounded(64);
    let supervisor = Supervisor::new();
    source.start(tx, &supervisor).await.unwrap();

    fs::write(dir.path().join("ignored.txt"), "nope\n").unwrap();
    let path = dir.path().join("new.log");
    fs::write(&path, "1\n2\n3\n4\n5\n").unwrap();

    let events = recv_n(&rx, 5).await;
    let raws: Vec<_> = events.iter().map(|e| e.raw.as_str()).collect();
    assert_eq!(raws, vec!["1", "2", "3", "4", "5"]);
    assert!(events.iter().all(|e| e.src == path.to_string_lossy()));
    assert_quiet(&rx).await;

    shutdown(&supervisor).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_excluded_files_never_emit() {
    let dir = TempDir::new().unwrap();
    let kept = dir.path().join("app.log");
    let skipped = dir.path().join("debug.log");
    fs::write(&kept, "").unwrap();
    fs::write(&skipped, "").unwrap();

    let source = tail_source(
        &format!(
            "filenames:\n  - {}/*.log\nexclude_regexps:\n  - debug\n",
            dir.path().display()
        ),
        MetricsLevel::Full,
    );

    let (tx, rx) = bounded(64);
    let supervisor = Supervisor::new();
    source.start(tx, &supervisor).await.unwrap();

    append(&skipped, "secret\n");
    fs::write(dir.path().join("debug-2.log"), "secret too\n").unwrap();
    append(&kept, "visible\n");

    let events = recv_n(&rx, 1).await;
    assert_eq!(events[0].raw, "visible");
    assert_quiet(&rx).await;

    shutdown(&supervisor).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blank_lines_are_dropped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    fs::write(&path, "").unwrap();

    let source = tail_source(
        &format!("filename: {}\n", path.display()),
        MetricsLevel::Aggregated,
    );

    let (tx, rx) = bounded(64);
    let supervisor = Supervisor::new();
    source.start(tx, &supervisor).await.unwrap();

    append(&path, "first\n\n\nsecond\r\n\n");

    let events = recv_n(&rx, 2).await;
    let raws: Vec<_> = events.iter().map(|e| e.raw.as_str()).collect();
    assert_eq!(raws, vec!["first", "second"]);
    assert!(events.iter().all(|e| e.src == "app.log"));
    assert_quiet(&rx).await;

    assert_eq!(source.metrics().get("app.log"), Some(&2));

    shutdown(&supervisor).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_patterns_tail_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    fs::write(&path, "").unwrap();

    let source = tail_source(
        &format!(
            "filenames:\n  - {}\n  - {}/*.log\n",
            path.display(),
            dir.path().display()
        ),
        MetricsLevel::Full,
    );

    let (tx, rx) = bounded(64);
    let supervisor = Supervisor::new();
    source.start(tx, &supervisor).await.unwrap();

    append(&path, "once\n");

    let events = recv_n(&rx, 1).await;
    assert_eq!(events[0].raw, "once");
    assert_quiet(&rx).await;

    shutdown(&supervisor).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_stops_all_workers() {
    let dir = TempDir::new().unwrap();
    for name in ["a.log", "b.log", "c.log"] {
        fs::write(dir.path().join(name), "").unwrap();
    }
    let source = tail_source(
        &format!("filenames:\n  - {}/*.log\n", dir.path().display()),
        MetricsLevel::None,
    );

    let (tx, rx) = bounded(64);
    let supervisor = Supervisor::new();
    source.start(tx, &supervisor).await.unwrap();
    assert!(supervisor.active_workers() >= 3);

    shutdown(&supervisor).await;

    append(&dir.path().join("a.log"), "late\n");
    fs::write(dir.path().join("d.log"), "late\n").unwrap();
    assert_quiet(&rx).await;
    assert!(source.metrics().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_after_shutdown_tails_again() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    fs::write(&path, "").unwrap();
    let source = tail_source(
        &format!("filenames:\n  - {}\n", path.display()),
        MetricsLevel::None,
    );

    let (tx, rx) = bounded(64);
    let supervisor = Supervisor::new();
    source.start(tx.clone(), &supervisor).await.unwrap();
    append(&path, "before restart\n");
    assert_eq!(recv_n(&rx, 1).await[0].raw, "before restart");
    shutdown(&supervisor).await;

    let supervisor = Supervisor::new();
    source.start(tx, &supervisor).await.unwrap();
    append(&path, "after restart\n");
    assert_eq!(recv_n(&rx, 1).await[0].raw, "after restart");
    assert_quiet(&rx).await;

    shutdown(&supervisor).await;
}

#[test]
fn test_many_files_tail_on_a_small_blocking_pool() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .max_blocking_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let dir = TempDir::new().unwrap();
        let paths: Vec<_> = (0..8)
            .map(|i| dir.path().join(format!("app{i}.log")))
            .collect();
        for path in &paths {
            fs::write(path, "").unwrap();
        }
        let source = tail_source(
            &format!("filenames:\n  - {}/*.log\n", dir.path().display()),
            MetricsLevel::None,
        );

        let (tx, rx) = bounded(64);
        let supervisor = Supervisor::new();
        source.start(tx, &supervisor).await.unwrap();

        for path in &paths {
            append(path, "line\n");
        }
        let mut sources: Vec<_> = recv_n(&rx, paths.len())
            .await
            .into_iter()
            .map(|e| e.src)
            .collect();
        sources.sort();
        let mut expected: Vec<_> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        expected.sort();
        assert_eq!(sources, expected);

        shutdown(&supervisor).await;
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cat_reads_gzip_through_dsn() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.log.gz");
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder.write_all(b"l1\nl2\n\nl3\nl4\n").unwrap();
    encoder.finish().unwrap();

    let mut labels = BTreeMap::new();
    labels.insert("type".to_string(), "nginx".to_string());
    let source: DataSource = FileSource::configure_by_dsn(
        &format!("file://{}", path.display()),
        labels,
        "replay-1",
        MetricsLevel::Full,
        &global::meter("test"),
    )
    .unwrap()
    .into();
    assert_eq!(source.mode(), AcquisitionMode::Cat);

    let (tx, rx) = bounded(64);
    let supervisor = Supervisor::new();
    let before = Utc::now();
    source.start(tx, &supervisor).await.unwrap();

    timeout(TEST_TIMEOUT, supervisor.wait())
        .await
        .expect("one-shot read did not finish")
        .unwrap();
    let after = Utc::now();

    let events: Vec<_> = std::iter::from_fn(|| rx.try_recv()).collect();
    let raws: Vec<_> = events.iter().map(|e| e.raw.as_str()).collect();
    assert_eq!(raws, vec!["l1", "l2", "l3", "l4"]);
    assert!(events.iter().all(|e| e.expect_mode == ExpectMode::Replay));
    for event in &events {
        assert!(
            before <= event.time && event.time <= after,
            "event time {} outside of the read ({before} .. {after})",
            event.time
        );
    }
    assert!(
        events
            .iter()
            .all(|e| e.labels.get("type").map(String::as_str) == Some("nginx"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cat_failure_fails_the_scope() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("long.log");
    fs::write(&path, format!("{}\n", "x".repeat(64))).unwrap();

    let source: DataSource = FileSource::configure_by_dsn(
        &format!("file://{}?max_buffer_size=16", path.display()),
        BTreeMap::new(),
        "replay-2",
        MetricsLevel::None,
        &global::meter("test"),
    )
    .unwrap()
    .into();

    let (tx, _rx) = bounded(8);
    let supervisor = Supervisor::new();
    source.start(tx, &supervisor).await.unwrap();

    let result = timeout(TEST_TIMEOUT, supervisor.wait())
        .await
        .expect("one-shot read did not finish");
    let err = result.unwrap_err();
    assert!(
        err.to_string().contains("exceeds the 16 byte buffer"),
        "unexpected error: {}",
        err
    );
}

#[test]
fn test_dsn_errors() {
    let meter = global::meter("test");
    let configure = |dsn: &str| {
        FileSource::configure_by_dsn(dsn, BTreeMap::new(), "id", MetricsLevel::None, &meter)
    };

    assert!(matches!(configure("http://x"), Err(Error::DsnScheme(_))));
    assert!(matches!(configure("file://"), Err(Error::DsnEmpty)));
    assert!(matches!(
        configure("file:///var/log/x.log?color=red"),
        Err(Error::DsnUnknownParameter(_))
    ));
    assert!(matches!(
        configure("file:///nonexistent-dir-for-tests/*.log"),
        Err(Error::NoMatchingFiles(_))
    ));
}
