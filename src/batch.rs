//! Sequential batch orchestration: one identifier at a time through the
//! capture engine, outcomes accumulated into a final summary.
//!
//! Identifiers are never processed concurrently: signal correlation inside
//! the capture race relies on the buffer referring unambiguously to the
//! current invocation.

use crate::browser::{BrowserSession, session::TabKey};
use crate::capture::{CaptureEngine, CaptureOutcome, UnavailableReason};
use crate::error::{FetchError, Result};
use crate::scanner::{ScanEntry, ScanReport, TriggerControl};
use serde::Serialize;

/// Upper bound on identifiers per run
pub const MAX_BATCH_SIZE: usize = 200;

/// Final report: disjoint ordered lists of identifiers that produced an
/// artifact and identifiers that did not
#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    pub saved: Vec<String>,
    pub unavailable: Vec<String>,
}

impl BatchSummary {
    pub fn is_complete_success(&self) -> bool {
        self.unavailable.is_empty()
    }
}

/// Run a batch against a prepared scan report, using `capture` for each
/// identifier with a live trigger control.
///
/// Generic over the capture function so ordering and resilience behavior
/// stays testable without a browser; [`run_batch`] wires in the real engine.
pub fn run_batch_with<F>(identifiers: &[String], report: &ScanReport, mut capture: F) -> Result<BatchSummary>
where
    F: FnMut(&TriggerControl, &str) -> CaptureOutcome,
{
    if identifiers.len() > MAX_BATCH_SIZE {
        return Err(FetchError::InvalidBatch(format!(
            "{} identifiers exceed the cap of {}",
            identifiers.len(),
            MAX_BATCH_SIZE
        )));
    }

    let mut summary = BatchSummary::default();

    for identifier in identifiers {
        let outcome = match report.entry(identifier) {
            Some(ScanEntry::Active(control)) => capture(control, identifier),
            Some(ScanEntry::Inactive) => {
                CaptureOutcome::Unavailable { reason: UnavailableReason::Inactive }
            }
            None => CaptureOutcome::Unavailable { reason: UnavailableReason::NotListed },
        };

        match outcome {
            CaptureOutcome::Saved { path } => {
                log::info!("{}: saved to {}", identifier, path.display());
                summary.saved.push(identifier.clone());
            }
            CaptureOutcome::Unavailable { reason } => {
                log::warn!("{}: unavailable ({})", identifier, reason);
                summary.unavailable.push(identifier.clone());
            }
        }
    }

    Ok(summary)
}

/// Run a batch with the real capture engine. After every invocation, stray
/// tabs beyond the original set are closed so no state leaks into the next
/// identifier.
pub fn run_batch(
    session: &BrowserSession,
    engine: &CaptureEngine,
    identifiers: &[String],
    report: &ScanReport,
) -> Result<BatchSummary> {
    let original_tabs: Vec<TabKey> = session.tab_keys()?;

    run_batch_with(identifiers, report, |control, identifier| {
        let outcome = engine.capture(control, identifier);
        // The engine already cleans up after itself; this guards against
        // popups that appear between invocations
        if let Err(e) = session.close_tabs_not_in(&original_tabs) {
            log::debug!("Stray-tab sweep after {} failed: {}", identifier, e);
        }
        outcome
    })
}
