//! Real-Time Stream Integration Tests

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cascade_resolver::services::diagnostics::{DiagnosticFilter, DiagnosticStream};
use cascade_resolver::{ErrorCategory, ErrorLocation, Severity, UnifiedError};

fn error(file: &str, severity: Severity, category: ErrorCategory) -> UnifiedError {
    UnifiedError {
        id: format!("{}-{:?}", file, severity),
        message: "problem".into(),
        severity,
        category,
        location: ErrorLocation::new(file, 1, 1),
        source: "pyright".into(),
        code: None,
        fixes: Vec::new(),
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_listener_drops_oldest_without_blocking() {
    let stream = Arc::new(DiagnosticStream::new(2));
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    stream.add_error_listener(move |batch| {
        let _ = entered_tx.lock().unwrap().send(());
        let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
        sink.lock().unwrap().push(batch.file_path);
    });

    stream.ingest("pyright", "f0.py", vec![error("f0.py", Severity::Error, ErrorCategory::Syntax)]);
    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .unwrap();

    // The listener is stalled on f0; these must not block
    let started = Instant::now();
    for i in 1..=5 {
        let file = format!("f{}.py", i);
        stream.ingest("pyright", &file, vec![error(&file, Severity::Warning, ErrorCategory::Style)]);
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(stream.dropped_notifications(), 3);

    for _ in 0..3 {
        release_tx.send(()).unwrap();
    }
    wait_for(|| seen.lock().unwrap().len() == 3).await;
    assert_eq!(*seen.lock().unwrap(), vec!["f0.py", "f4.py", "f5.py"]);

    let stats = stream.stats();
    assert_eq!(stats.total, 6);
    assert_eq!(stats.files_affected, 6);
    assert_eq!(stats.by_severity.get(&Severity::Warning), Some(&5));
    assert_eq!(stats.dropped, 3);
    stream.shutdown();
}

#[tokio::test]
async fn test_filter_limits_stats_and_notifications() {
    let stream = Arc::new(DiagnosticStream::new(16));
    stream.set_filter(DiagnosticFilter::all().with_severities(&[Severity::Error]));
    let batches = Arc::new(Mutex::new(Vec::new()));
    let sink = batches.clone();
    stream.add_error_listener(move |batch| sink.lock().unwrap().push(batch));

    stream.ingest(
        "ruff",
        "a.py",
        vec![
            error("a.py", Severity::Error, ErrorCategory::Syntax),
            error("a.py", Severity::Warning, ErrorCategory::Unused),
        ],
    );
    wait_for(|| batches.lock().unwrap().len() == 1).await;
    assert_eq!(batches.lock().unwrap()[0].errors.len(), 1);

    let stats = stream.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.received, 2);
    assert_eq!(stats.filtered_out, 1);

    // A clean republish clears the file
    stream.ingest("ruff", "a.py", Vec::new());
    assert_eq!(stream.stats().total, 0);
    stream.shutdown();
}
