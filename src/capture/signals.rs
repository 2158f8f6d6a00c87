//! Completion-signal plumbing for one capture invocation.
//!
//! Each invocation gets its own [`SignalBuffer`]; the buffer is created when
//! the control is armed and dropped during cleanup, so signals can never
//! leak from one identifier's attempt into the next.

use crate::error::{FetchError, Result};
use base64::Engine as _;
use base64::engine::general_purpose;
use headless_chrome::Tab;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Registration name for the per-invocation response hook
pub(crate) const RESPONSE_HOOK: &str = "artifact-capture";

/// How often the transfer watcher samples the staging directory
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// One completion signal observed after the trigger control was invoked
#[derive(Debug)]
pub(crate) enum Signal {
    /// A direct file transfer finished landing in the staging directory
    TransferComplete(PathBuf),

    /// A network response with an artifact content type; the body is
    /// fetched eagerly because the browser evicts it soon after
    Response(ResponseCapture),
}

#[derive(Debug)]
pub(crate) struct ResponseCapture {
    pub url: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Wait/notify queue shared by the signal sources of one invocation
pub(crate) struct SignalBuffer {
    queue: Mutex<VecDeque<Signal>>,
    available: Condvar,
}

impl SignalBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { queue: Mutex::new(VecDeque::new()), available: Condvar::new() })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Signal>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push(&self, signal: Signal) {
        self.lock().push_back(signal);
        self.available.notify_one();
    }

    /// Remove and return everything currently buffered, without waiting
    pub fn drain_now(&self) -> Vec<Signal> {
        self.lock().drain(..).collect()
    }

    /// Block until a signal arrives or `timeout` elapses, riding out
    /// spurious wakeups
    pub fn wait(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while guard.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let (next, result) = match self.available.wait_timeout(guard, deadline - now) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard = next;
            if result.timed_out() {
                return;
            }
        }
    }
}

/// Hook buffering responses whose declared content type matches an artifact
/// type. The hook stays registered for exactly one invocation.
pub(crate) fn register_response_hook(
    tab: &Arc<Tab>,
    buffer: &Arc<SignalBuffer>,
    mime_filter: Vec<String>,
) -> Result<()> {
    let buffer = Arc::clone(buffer);
    tab.register_response_handling(
        RESPONSE_HOOK,
        Box::new(move |params, fetch_body| {
            let mime = params.response.mime_type.to_ascii_lowercase();
            if !matches_mime_filter(&mime, &mime_filter) {
                return;
            }

            let url = params.response.url.clone();
            match fetch_body() {
                Ok(body) => {
                    let bytes = if body.base_64_encoded {
                        match general_purpose::STANDARD.decode(&body.body) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                log::debug!("Undecodable response body from {}: {}", url, e);
                                return;
                            }
                        }
                    } else {
                        body.body.into_bytes()
                    };

                    if bytes.is_empty() {
                        return;
                    }
                    log::debug!("Buffered {} response from {} ({} bytes)", mime, url, bytes.len());
                    buffer.push(Signal::Response(ResponseCapture { url, mime_type: mime, bytes }));
                }
                Err(e) => log::debug!("Response body unavailable for {}: {}", url, e),
            }
        }),
    )
    .map(|_| ())
    .map_err(|e| FetchError::TabOperationFailed(format!("Failed to register response hook: {}", e)))
}

/// Whether a declared content type passes the artifact filter
pub(crate) fn matches_mime_filter(mime: &str, filter: &[String]) -> bool {
    filter.iter().any(|wanted| {
        if let Some(prefix) = wanted.strip_suffix("/*") {
            mime.starts_with(prefix) && mime[prefix.len()..].starts_with('/')
        } else {
            mime.contains(wanted.as_str())
        }
    })
}

/// Names currently present in the staging directory; transfers are
/// attributed by difference against this baseline
pub(crate) fn staging_baseline(staging: &Path) -> HashSet<OsString> {
    std::fs::read_dir(staging)
        .map(|entries| entries.flatten().map(|entry| entry.file_name()).collect())
        .unwrap_or_default()
}

/// Background thread translating finished direct transfers into signals.
///
/// Chrome writes in-progress transfers under a `.crdownload` name and
/// renames on completion; a new name with a stable size is therefore a
/// finished transfer.
pub(crate) struct TransferWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TransferWatcher {
    pub fn spawn(
        staging: PathBuf,
        baseline: HashSet<OsString>,
        buffer: Arc<SignalBuffer>,
        deadline: Instant,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            watch(&staging, &baseline, &buffer, deadline, &stop_flag);
        });

        Self { stop, handle: Some(handle) }
    }

    /// Signal the thread to exit and wait for it
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TransferWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn watch(
    staging: &Path,
    baseline: &HashSet<OsString>,
    buffer: &SignalBuffer,
    deadline: Instant,
    stop: &AtomicBool,
) {
    let mut sizes: HashMap<OsString, u64> = HashMap::new();

    while !stop.load(Ordering::Relaxed) && Instant::now() < deadline {
        if let Ok(entries) = std::fs::read_dir(staging) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if baseline.contains(&name) {
                    continue;
                }
                let display = name.to_string_lossy();
                if display.ends_with(".crdownload") || display.ends_with(".tmp") {
                    continue;
                }

                let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
                match sizes.get(&name) {
                    // Same non-zero size on two consecutive samples: done
                    Some(&previous) if previous == len && len > 0 => {
                        buffer.push(Signal::TransferComplete(staging.join(&name)));
                        return;
                    }
                    _ => {
                        sizes.insert(name, len);
                    }
                }
            }
        }
        std::thread::sleep(WATCH_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_preserves_arrival_order() {
        let buffer = SignalBuffer::new();
        buffer.push(Signal::Response(ResponseCapture {
            url: "a".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: vec![1],
        }));
        buffer.push(Signal::TransferComplete(PathBuf::from("/tmp/x.pdf")));

        let drained = buffer.drain_now();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], Signal::Response(_)));
        assert!(matches!(drained[1], Signal::TransferComplete(_)));
        assert!(buffer.drain_now().is_empty());
    }

    #[test]
    fn test_buffer_wait_is_bounded() {
        let buffer = SignalBuffer::new();
        let started = Instant::now();
        buffer.wait(Duration::from_millis(120));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "returned too early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "waited too long: {:?}", elapsed);
    }

    #[test]
    fn test_buffer_wakes_on_push() {
        let buffer = SignalBuffer::new();
        let waker = Arc::clone(&buffer);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            waker.push(Signal::TransferComplete(PathBuf::from("/tmp/y.pdf")));
        });

        let started = Instant::now();
        buffer.wait(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(buffer.drain_now().len(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn test_mime_filter() {
        let filter = vec!["application/pdf".to_string()];
        assert!(matches_mime_filter("application/pdf", &filter));
        assert!(matches_mime_filter("application/pdf; charset=binary", &filter));
        assert!(!matches_mime_filter("text/html", &filter));

        let wildcard = vec!["image/*".to_string()];
        assert!(matches_mime_filter("image/png", &wildcard));
        assert!(!matches_mime_filter("imagex/png", &wildcard));
        assert!(!matches_mime_filter("application/pdf", &wildcard));
    }

    #[test]
    fn test_watcher_reports_stable_new_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("existing.pdf"), b"old").unwrap();
        let baseline = staging_baseline(dir.path());
        assert_eq!(baseline.len(), 1);

        let buffer = SignalBuffer::new();
        let watcher = TransferWatcher::spawn(
            dir.path().to_path_buf(),
            baseline,
            Arc::clone(&buffer),
            Instant::now() + Duration::from_secs(5),
        );

        // Partial file must be ignored, the final rename picked up
        std::fs::write(dir.path().join("receipt.pdf.crdownload"), b"partial").unwrap();
        std::thread::sleep(Duration::from_millis(150));
        std::fs::rename(dir.path().join("receipt.pdf.crdownload"), dir.path().join("receipt.pdf")).unwrap();

        buffer.wait(Duration::from_secs(3));
        // Allow a second sample for the size-stability check
        let mut drained = buffer.drain_now();
        for _ in 0..30 {
            if !drained.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
            drained = buffer.drain_now();
        }
        watcher.stop();

        assert_eq!(drained.len(), 1, "expected one transfer signal");
        match &drained[0] {
            Signal::TransferComplete(path) => {
                assert_eq!(path.file_name().unwrap().to_string_lossy(), "receipt.pdf");
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_watcher_stops_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = SignalBuffer::new();
        let watcher = TransferWatcher::spawn(
            dir.path().to_path_buf(),
            HashSet::new(),
            Arc::clone(&buffer),
            Instant::now() + Duration::from_millis(200),
        );

        std::thread::sleep(Duration::from_millis(400));
        // stop() after the deadline must not hang
        watcher.stop();
        assert!(buffer.drain_now().is_empty());
    }
}
