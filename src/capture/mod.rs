//! Artifact capture: invoke one identifier's trigger control and race the
//! three completion signals the portal may answer with.
//!
//! The portal's response pattern is non-deterministic: sometimes a direct
//! file transfer, sometimes a popup rendering the artifact inline, sometimes
//! only an asynchronous network response. Exactly one signal — the first to
//! arrive, ranked direct transfer > popup > network response — resolves each
//! invocation; everything else is discarded. Whatever the outcome, the
//! engine leaves the browsing-context set exactly as it found it.

pub mod artifact;
pub(crate) mod signals;

use crate::browser::{BrowserSession, session::TabKey};
use crate::error::{FetchError, Result};
use crate::scanner::TriggerControl;
use artifact::PopupFetch;
use base64::Engine as _;
use base64::engine::general_purpose;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Element, Tab};
use signals::{RESPONSE_HOOK, ResponseCapture, Signal, SignalBuffer, TransferWatcher};
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// In-page script that extracts and fetches a popup-rendered artifact
const FETCH_ARTIFACT_JS: &str = include_str!("fetch_artifact.js");

/// Time budgets for one capture invocation
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sub-timeout for the unambiguous direct-transfer signal
    pub direct_transfer_timeout: Duration,

    /// How long a popup gets to settle before its content is extracted
    pub popup_settle_timeout: Duration,

    /// Overall budget; expiry demotes the identifier to unavailable
    pub overall_budget: Duration,

    /// Granularity of the bounded waits inside the race
    pub tick: Duration,

    /// Declared content types accepted from the network-response signal.
    /// Kept narrow by default: response matching is the weakest correlation
    /// and every inline image on the page would otherwise qualify.
    pub response_mime_filter: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            direct_transfer_timeout: Duration::from_secs(5),
            popup_settle_timeout: Duration::from_secs(5),
            overall_budget: Duration::from_secs(20),
            tick: Duration::from_millis(250),
            response_mime_filter: vec!["application/pdf".to_string()],
        }
    }
}

/// Why an identifier ended up without an artifact
#[derive(Debug, Clone, PartialEq)]
pub enum UnavailableReason {
    /// The identifier never appeared in the results listing
    NotListed,
    /// Its trigger control was present but rendered inactive
    Inactive,
    /// The control could not be invoked (stale, detached, obscured)
    ActionFailed(String),
    /// A popup opened but its artifact source could not be extracted
    ExtractionFailed(String),
    /// No completion signal resolved within the overall budget
    TimedOut,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::NotListed => write!(f, "not listed in results"),
            UnavailableReason::Inactive => write!(f, "receipt link inactive"),
            UnavailableReason::ActionFailed(reason) => write!(f, "trigger failed: {}", reason),
            UnavailableReason::ExtractionFailed(reason) => write!(f, "extraction failed: {}", reason),
            UnavailableReason::TimedOut => write!(f, "no completion signal within budget"),
        }
    }
}

impl UnavailableReason {
    fn from_error(error: FetchError) -> Self {
        match error {
            FetchError::ActionFailed { action, reason } => {
                UnavailableReason::ActionFailed(format!("{}: {}", action, reason))
            }
            FetchError::ExtractionFailed(reason) => UnavailableReason::ExtractionFailed(reason),
            FetchError::DecodeFailed(reason) => UnavailableReason::ExtractionFailed(reason),
            other => UnavailableReason::ExtractionFailed(other.to_string()),
        }
    }
}

/// Per-identifier result of a capture invocation
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Saved { path: PathBuf },
    Unavailable { reason: UnavailableReason },
}

/// Drives the capture race for one identifier at a time
pub struct CaptureEngine<'a> {
    session: &'a BrowserSession,
    tab: Arc<Tab>,
    output_dir: PathBuf,
    staging_dir: PathBuf,
    config: CaptureConfig,
}

impl<'a> CaptureEngine<'a> {
    /// Prepare the engine: output and staging directories are created and
    /// the results tab is pointed at the staging directory for transfers.
    pub fn new(
        session: &'a BrowserSession,
        tab: Arc<Tab>,
        output_dir: impl Into<PathBuf>,
        config: CaptureConfig,
    ) -> Result<Self> {
        let output_dir = output_dir.into();
        let staging_dir = output_dir.join(".staging");
        std::fs::create_dir_all(&staging_dir)?;

        tab.call_method(Page::SetDownloadBehavior {
            behavior: Page::SetDownloadBehaviorBehaviorOption::Allow,
            download_path: Some(staging_dir.to_string_lossy().into_owned()),
        })
        .map_err(|e| FetchError::TabOperationFailed(format!("Failed to set download behavior: {}", e)))?;

        Ok(Self { session, tab, output_dir, staging_dir, config })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Capture the artifact for one identifier.
    ///
    /// Never returns an error: every failure is local to the identifier and
    /// reported as an `Unavailable` outcome. Cleanup — watcher shutdown,
    /// response-hook removal, popup closing, staging sweep — runs on every
    /// path before the outcome is reported.
    pub fn capture(&self, control: &TriggerControl, identifier: &str) -> CaptureOutcome {
        let tabs_before = match self.session.tab_keys() {
            Ok(keys) => keys,
            Err(e) => {
                return CaptureOutcome::Unavailable { reason: UnavailableReason::ActionFailed(e.to_string()) };
            }
        };

        // Armed: per-invocation buffer, staging baseline, signal sources
        let buffer = SignalBuffer::new();
        let baseline = signals::staging_baseline(&self.staging_dir);
        let deadline = Instant::now() + self.config.overall_budget;

        if let Err(e) = signals::register_response_hook(&self.tab, &buffer, self.config.response_mime_filter.clone())
        {
            // The race degrades to the transfer and popup signals
            log::warn!("{}: response hook unavailable: {}", identifier, e);
        }
        let watcher =
            TransferWatcher::spawn(self.staging_dir.clone(), baseline.clone(), Arc::clone(&buffer), deadline);

        let outcome = self.race(control, identifier, &buffer, &tabs_before, deadline);

        // Cleanup, regardless of outcome
        watcher.stop();
        if let Err(e) = self.tab.deregister_response_handling(RESPONSE_HOOK) {
            log::debug!("Failed to deregister response hook: {}", e);
        }
        match self.session.close_tabs_not_in(&tabs_before) {
            Ok(closed) if closed > 0 => log::debug!("{}: closed {} stray tab(s)", identifier, closed),
            Ok(_) => {}
            Err(e) => log::debug!("{}: stray-tab sweep failed: {}", identifier, e),
        }
        self.sweep_staging(&baseline);

        match outcome {
            Ok(outcome) => outcome,
            Err(e) => CaptureOutcome::Unavailable { reason: UnavailableReason::from_error(e) },
        }
    }

    /// Armed -> Racing -> Resolved, priority direct transfer > popup >
    /// buffered network response
    fn race(
        &self,
        control: &TriggerControl,
        identifier: &str,
        buffer: &SignalBuffer,
        tabs_before: &[TabKey],
        deadline: Instant,
    ) -> Result<CaptureOutcome> {
        if let Err(e) = self.invoke(control) {
            return Ok(CaptureOutcome::Unavailable { reason: UnavailableReason::from_error(e) });
        }

        let mut responses: VecDeque<ResponseCapture> = VecDeque::new();

        // (a) direct transfer: unambiguous, checked first within its own
        // sub-timeout. Matching responses seen meanwhile stay buffered.
        let direct_deadline = deadline.min(Instant::now() + self.config.direct_transfer_timeout);
        loop {
            if let Some(staged) = drain(buffer, &mut responses) {
                let path = self.finalize_transfer(&staged, identifier)?;
                log::info!("{}: saved via direct transfer", identifier);
                return Ok(CaptureOutcome::Saved { path });
            }
            let now = Instant::now();
            if now >= direct_deadline {
                break;
            }
            buffer.wait((direct_deadline - now).min(self.config.tick));
        }

        // (b) popup: correlated by causality, preferred over response
        // matching whenever one actually opened. Extraction failures demote
        // this identifier; the popup is closed either way.
        if let Some(popup) = self.session.popup_since(tabs_before)? {
            log::info!("{}: artifact opened in a popup, extracting", identifier);
            let extracted = self.capture_from_popup(&popup, identifier);
            if let Err(e) = popup.close(true) {
                log::debug!("{}: failed to close popup: {}", identifier, e);
            }
            return match extracted {
                Ok(path) => {
                    log::info!("{}: saved via popup extraction", identifier);
                    Ok(CaptureOutcome::Saved { path })
                }
                Err(e) => {
                    log::warn!("{}: popup extraction failed: {}", identifier, e);
                    Ok(CaptureOutcome::Unavailable { reason: UnavailableReason::from_error(e) })
                }
            };
        }

        // (c) network response: weakest signal, capture of last resort. A
        // late direct transfer still outranks a buffered response within
        // the same tick.
        loop {
            if let Some(staged) = drain(buffer, &mut responses) {
                let path = self.finalize_transfer(&staged, identifier)?;
                log::info!("{}: saved via late direct transfer", identifier);
                return Ok(CaptureOutcome::Saved { path });
            }
            if let Some(response) = responses.pop_front() {
                let ext = artifact::extension_for(&response.mime_type, Some(&response.url));
                let path = self.persist(identifier, &response.bytes, &ext)?;
                log::info!("{}: saved via network response ({})", identifier, response.url);
                return Ok(CaptureOutcome::Saved { path });
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            buffer.wait((deadline - now).min(self.config.tick));
        }

        Ok(CaptureOutcome::Unavailable { reason: UnavailableReason::TimedOut })
    }

    /// Click the trigger; on failure, one forced programmatic activation
    fn invoke(&self, control: &TriggerControl) -> Result<()> {
        let element = Element::new(&self.tab, control.node_id).map_err(|e| FetchError::ActionFailed {
            action: "resolve-trigger".to_string(),
            reason: format!("stale control binding: {}", e),
        })?;

        if let Err(primary) = element.click() {
            log::debug!("{}: click failed ({}), forcing programmatic activation", control.identifier, primary);
            element
                .call_js_fn("function() { this.click(); }", vec![], false)
                .map_err(|forced| FetchError::ActionFailed {
                    action: "click".to_string(),
                    reason: format!("{}; forced activation: {}", primary, forced),
                })?;
        }
        Ok(())
    }

    /// Extract the artifact's binary source from a popup and fetch it
    /// out-of-band with the session's cookies
    fn capture_from_popup(&self, popup: &Arc<Tab>, identifier: &str) -> Result<PathBuf> {
        // Give the viewer a chance to attach its embed or image; neither
        // wait failing is fatal, the script falls back to the page URL
        let _ = popup.wait_until_navigated();
        let _ = popup.wait_for_element_with_custom_timeout(
            "embed[src], object[data], img[src]",
            self.config.popup_settle_timeout,
        );

        let remote = popup
            .evaluate(FETCH_ARTIFACT_JS, true)
            .map_err(|e| FetchError::ExtractionFailed(format!("artifact fetch script failed: {}", e)))?;
        let value = remote
            .value
            .ok_or_else(|| FetchError::ExtractionFailed("fetch script returned no value".to_string()))?;
        let payload: String = serde_json::from_value(value)
            .map_err(|e| FetchError::ExtractionFailed(format!("unexpected script return: {}", e)))?;
        let fetched: PopupFetch = serde_json::from_str(&payload)
            .map_err(|e| FetchError::ExtractionFailed(format!("malformed script payload: {}", e)))?;

        if !fetched.ok {
            let detail = if fetched.error.is_empty() {
                format!("source fetch returned status {}", fetched.status)
            } else {
                fetched.error
            };
            return Err(FetchError::ExtractionFailed(detail));
        }

        let bytes = general_purpose::STANDARD
            .decode(&fetched.data)
            .map_err(|e| FetchError::DecodeFailed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(FetchError::ExtractionFailed("artifact source was empty".to_string()));
        }

        let ext = artifact::extension_for(&fetched.content_type, Some(&fetched.source));
        self.persist(identifier, &bytes, &ext)
    }

    /// Move a finished staged transfer to its deterministic output name
    fn finalize_transfer(&self, staged: &Path, identifier: &str) -> Result<PathBuf> {
        let ext = staged
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase)
            .filter(|ext| artifact::is_known_extension(ext))
            .unwrap_or_else(|| "pdf".to_string());

        let path = self.output_dir.join(format!("{}.{}", artifact::sanitize_stem(identifier), ext));
        std::fs::rename(staged, &path)?;
        Ok(path)
    }

    /// Write a captured payload under the identifier's deterministic name
    fn persist(&self, identifier: &str, bytes: &[u8], ext: &str) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{}.{}", artifact::sanitize_stem(identifier), ext));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Remove unclaimed staging entries so no partial file survives an
    /// unavailable identifier
    fn sweep_staging(&self, baseline: &std::collections::HashSet<std::ffi::OsString>) {
        if let Ok(entries) = std::fs::read_dir(&self.staging_dir) {
            for entry in entries.flatten() {
                if !baseline.contains(&entry.file_name()) {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
    }

    /// Tear down the staging directory once the batch is over
    pub fn finish(self) {
        let _ = std::fs::remove_dir_all(&self.staging_dir);
    }
}

/// Drain pending signals: a finished transfer resolves immediately, matching
/// responses accumulate for the last-resort phase
fn drain(buffer: &SignalBuffer, responses: &mut VecDeque<ResponseCapture>) -> Option<PathBuf> {
    for signal in buffer.drain_now() {
        match signal {
            Signal::TransferComplete(path) => return Some(path),
            Signal::Response(response) => responses.push_back(response),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_outranks_buffered_response() {
        let buffer = SignalBuffer::new();
        buffer.push(Signal::Response(ResponseCapture {
            url: "https://host/a.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: vec![1, 2, 3],
        }));
        buffer.push(Signal::TransferComplete(PathBuf::from("/staging/a.pdf")));

        let mut responses = VecDeque::new();
        let staged = drain(&buffer, &mut responses);

        assert_eq!(staged, Some(PathBuf::from("/staging/a.pdf")));
        // The response arrived first but is only kept as a fallback
        assert_eq!(responses.len(), 1);
    }

    #[test]
    fn test_drain_accumulates_responses_without_transfer() {
        let buffer = SignalBuffer::new();
        for i in 0..3 {
            buffer.push(Signal::Response(ResponseCapture {
                url: format!("https://host/{}.pdf", i),
                mime_type: "application/pdf".to_string(),
                bytes: vec![i],
            }));
        }

        let mut responses = VecDeque::new();
        assert!(drain(&buffer, &mut responses).is_none());
        assert_eq!(responses.len(), 3);
        // First buffered match stays authoritative
        assert_eq!(responses.pop_front().unwrap().url, "https://host/0.pdf");
    }

    #[test]
    fn test_unavailable_reason_mapping() {
        let action = FetchError::ActionFailed { action: "click".to_string(), reason: "detached".to_string() };
        assert!(matches!(UnavailableReason::from_error(action), UnavailableReason::ActionFailed(_)));

        let extraction = FetchError::ExtractionFailed("status 404".to_string());
        assert_eq!(
            UnavailableReason::from_error(extraction),
            UnavailableReason::ExtractionFailed("status 404".to_string())
        );
    }

    #[test]
    fn test_default_config_ordering() {
        let config = CaptureConfig::default();
        assert!(config.direct_transfer_timeout < config.overall_budget);
        assert!(config.tick < config.direct_transfer_timeout);
        assert_eq!(config.response_mime_filter, vec!["application/pdf".to_string()]);
    }
}
