//! # ar-fetch
//!
//! Batch retrieval of digital delivery receipts (AR) from a tracking portal,
//! driven over the Chrome DevTools Protocol (CDP).
//!
//! Given a list of item tracking codes, the library logs into the portal,
//! submits a bulk query, then captures one receipt document per code. The
//! portal answers receipt requests non-deterministically — a direct file
//! transfer, a popup rendering the receipt inline, or only an asynchronous
//! network response — so each invocation races all three completion signals
//! and takes the first one, ranked by how unambiguous it is.
//!
//! ## Features
//!
//! - **Cross-frame element resolution**: ordered fallback descriptor chains
//!   searched across the main document and every nested frame
//! - **Results scanning**: per-identifier trigger controls resolved and
//!   filtered for dimmed/disabled rows before any capture is attempted
//! - **Multi-signal capture**: direct transfer, popup extraction and
//!   network-response matching raced under bounded timeouts
//! - **Batch resilience**: one identifier's failure never aborts the run
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ar_fetch::{BrowserSession, LaunchOptions};
//! use ar_fetch::capture::{CaptureConfig, CaptureEngine};
//! use ar_fetch::navigator::{Credentials, Navigator, NavigatorConfig};
//! use ar_fetch::scanner::ResultsScanner;
//!
//! # fn main() -> ar_fetch::Result<()> {
//! let session = BrowserSession::launch(LaunchOptions::default())?;
//!
//! let credentials = Credentials { username: "user.".into(), password: "secret".into() };
//! let navigator = Navigator::new(
//!     &session,
//!     credentials,
//!     NavigatorConfig::new("https://portal.example/app/", "downloads_ar/diagnostics"),
//! );
//!
//! let identifiers = vec!["YA259824691BR".to_string(), "YA259825184BR".to_string()];
//! let results = navigator.open_results(&identifiers)?;
//!
//! let report = ResultsScanner::new(&results).scan(&identifiers)?;
//! let engine = CaptureEngine::new(&session, results, "downloads_ar", CaptureConfig::default())?;
//!
//! let summary = ar_fetch::batch::run_batch(&session, &engine, &identifiers, &report)?;
//! engine.finish();
//! println!("saved: {:?}, unavailable: {:?}", summary.saved, summary.unavailable);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`browser`]: Browser session management and configuration
//! - [`locator`]: Cross-frame, fallback-chain element resolution
//! - [`navigator`]: Authentication and bulk-query navigation
//! - [`scanner`]: Trigger-control enumeration on the results listing
//! - [`capture`]: The completion-signal race and artifact persistence
//! - [`batch`]: Sequential orchestration and the run summary
//! - [`diagnostics`]: Page snapshots on fatal navigation failures
//! - [`error`]: Error types and result alias

pub mod batch;
pub mod browser;
pub mod capture;
pub mod diagnostics;
pub mod error;
pub mod locator;
pub mod navigator;
pub mod scanner;

pub use batch::{BatchSummary, MAX_BATCH_SIZE};
pub use browser::{BrowserSession, ConnectionOptions, LaunchOptions};
pub use capture::{CaptureConfig, CaptureEngine, CaptureOutcome, UnavailableReason};
pub use error::{FetchError, Result};
pub use locator::{Descriptor, FrameLocator};
pub use scanner::{ResultsScanner, ScanEntry, ScanReport, TriggerControl};
