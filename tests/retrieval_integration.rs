use ar_fetch::batch;
use ar_fetch::capture::{CaptureConfig, CaptureEngine, CaptureOutcome, UnavailableReason};
use ar_fetch::scanner::{ResultsScanner, ScanEntry};
use ar_fetch::{BrowserSession, LaunchOptions};
use std::time::{Duration, Instant};

/// Synthetic results listing: two live rows and one dimmed row
fn listing_page() -> String {
    concat!(
        "data:text/html,<html><body><table class='table'>",
        "<tr><td>YA100</td><td><a href='%23' class='verArDigital' onclick=\"verArDigital('YA100')\">Ver AR</a></td></tr>",
        "<tr><td>YA200</td><td><a href='%23' class='verArDigital' style='opacity:0.3' onclick=\"verArDigital('YA200')\">Ver AR</a></td></tr>",
        "<tr><td>YA300</td><td><a href='%23' class='verArDigital' onclick=\"verArDigital('YA300')\">Ver AR</a></td></tr>",
        "</table></body></html>"
    )
    .to_string()
}

#[test]
#[ignore] // Requires Chrome to be installed
fn test_scan_classifies_listing_rows() {
    let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");

    let tab = session.first_tab().expect("No tab");
    session.goto(&tab, &listing_page()).expect("Failed to navigate");
    std::thread::sleep(Duration::from_millis(500));

    let identifiers: Vec<String> =
        ["YA100", "YA200", "YA400"].iter().map(|s| s.to_string()).collect();
    let report = ResultsScanner::new(&tab).scan(&identifiers).expect("scan failed");

    assert!(matches!(report.entry("YA100"), Some(ScanEntry::Active(_))));
    assert!(matches!(report.entry("YA200"), Some(ScanEntry::Inactive)));
    // Never listed at all
    assert!(report.entry("YA400").is_none());
}

#[test]
#[ignore]
fn test_capture_timeout_keeps_batch_and_contexts_intact() {
    let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");

    let tab = session.first_tab().expect("No tab");
    session.goto(&tab, &listing_page()).expect("Failed to navigate");
    std::thread::sleep(Duration::from_millis(500));

    let identifiers: Vec<String> = ["YA100", "YA300"].iter().map(|s| s.to_string()).collect();
    let report = ResultsScanner::new(&tab).scan(&identifiers).expect("scan failed");
    assert_eq!(report.active_count(), 2);

    let output = tempfile::tempdir().expect("tempdir");
    let config = CaptureConfig {
        direct_transfer_timeout: Duration::from_secs(1),
        overall_budget: Duration::from_secs(3),
        ..CaptureConfig::default()
    };

    let tabs_before = session.tabs().expect("tabs").len();
    let engine =
        CaptureEngine::new(&session, tab, output.path(), config).expect("engine setup failed");

    // The dummy handler never produces any completion signal, so every
    // identifier must time out at the overall budget without stopping the
    // batch or leaking browsing contexts.
    let started = Instant::now();
    let summary = batch::run_batch(&session, &engine, &identifiers, &report).expect("batch failed");
    let elapsed = started.elapsed();

    assert!(summary.saved.is_empty());
    assert_eq!(summary.unavailable, identifiers);
    assert!(elapsed >= Duration::from_secs(6), "budgets not honored: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(20), "captures overran: {:?}", elapsed);

    assert_eq!(session.tabs().expect("tabs").len(), tabs_before);

    // No partial output may survive an unavailable identifier
    engine.finish();
    let leftovers: Vec<_> = std::fs::read_dir(output.path())
        .expect("read output dir")
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
}

#[test]
#[ignore]
fn test_capture_of_unlisted_identifier_skips_engine() {
    let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");

    let tab = session.first_tab().expect("No tab");
    session.goto(&tab, &listing_page()).expect("Failed to navigate");
    std::thread::sleep(Duration::from_millis(500));

    let identifiers = vec!["GHOST1".to_string()];
    let report = ResultsScanner::new(&tab).scan(&identifiers).expect("scan failed");

    let output = tempfile::tempdir().expect("tempdir");
    let engine = CaptureEngine::new(&session, tab, output.path(), CaptureConfig::default())
        .expect("engine setup failed");

    let started = Instant::now();
    let summary = batch::run_batch(&session, &engine, &identifiers, &report).expect("batch failed");

    // Not-listed identifiers resolve without burning the capture budget
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(summary.unavailable, vec!["GHOST1"]);
}

#[test]
#[ignore]
fn test_stale_binding_fails_capture_not_batch() {
    let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");

    let tab = session.first_tab().expect("No tab");
    session.goto(&tab, &listing_page()).expect("Failed to navigate");
    std::thread::sleep(Duration::from_millis(500));

    let identifiers = vec!["YA100".to_string()];
    let report = ResultsScanner::new(&tab).scan(&identifiers).expect("scan failed");

    // Re-render the listing: the scanned node ids are now stale
    session.goto(&tab, &listing_page()).expect("Failed to re-navigate");
    std::thread::sleep(Duration::from_millis(500));

    let output = tempfile::tempdir().expect("tempdir");
    let engine = CaptureEngine::new(&session, tab, output.path(), CaptureConfig::default())
        .expect("engine setup failed");

    let control = match report.entry("YA100") {
        Some(ScanEntry::Active(control)) => control.clone(),
        other => panic!("expected active entry, got {:?}", other),
    };

    match engine.capture(&control, "YA100") {
        CaptureOutcome::Unavailable { reason: UnavailableReason::ActionFailed(_) } => {}
        other => panic!("stale binding must fail as an action failure, got {:?}", other),
    }
}
