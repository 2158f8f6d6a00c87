use crate::{browser::config::{ConnectionOptions, LaunchOptions},
            error::{FetchError, Result}};
use headless_chrome::{Browser, Tab};
use std::{ffi::OsStr, sync::Arc, time::Duration};

/// Opaque identity of an open tab, stable for the lifetime of the tab.
///
/// Derived from the `Arc` allocation rather than the target id so that
/// set-difference against a snapshot stays cheap and infallible.
pub type TabKey = usize;

/// Browser session that manages a Chrome/Chromium instance
pub struct BrowserSession {
    /// The underlying headless_chrome Browser instance
    browser: Browser,
}

impl BrowserSession {
    /// Launch a new browser instance with the given options
    pub fn launch(options: LaunchOptions) -> Result<Self> {
        let mut launch_opts = headless_chrome::LaunchOptions::default();

        // Ignore default arguments to prevent detection by anti-bot services
        launch_opts.ignore_default_args.push(OsStr::new("--enable-automation"));
        launch_opts.args.push(OsStr::new("--disable-blink-features=AutomationControlled"));

        // A batch of 200 identifiers can keep the session busy for over an
        // hour; the crate default idle timeout of 30s is far too short
        launch_opts.idle_browser_timeout = Duration::from_secs(60 * 60);

        launch_opts.headless = options.headless;
        launch_opts.window_size = Some((options.window_width, options.window_height));

        if let Some(path) = options.chrome_path {
            launch_opts.path = Some(path);
        }

        if let Some(dir) = options.user_data_dir {
            launch_opts.user_data_dir = Some(dir);
        }

        launch_opts.sandbox = options.sandbox;

        let browser = Browser::new(launch_opts).map_err(|e| FetchError::LaunchFailed(e.to_string()))?;

        browser.new_tab().map_err(|e| FetchError::LaunchFailed(format!("Failed to create tab: {}", e)))?;

        Ok(Self { browser })
    }

    /// Connect to an existing browser instance via WebSocket
    pub fn connect(options: ConnectionOptions) -> Result<Self> {
        let browser = Browser::connect(options.ws_url).map_err(|e| FetchError::ConnectionFailed(e.to_string()))?;

        Ok(Self { browser })
    }

    /// Launch a browser with default options
    pub fn new() -> Result<Self> {
        Self::launch(LaunchOptions::default())
    }

    /// Get all open tabs
    pub fn tabs(&self) -> Result<Vec<Arc<Tab>>> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|e| FetchError::TabOperationFailed(format!("Failed to get tabs: {}", e)))?
            .clone();

        Ok(tabs)
    }

    /// Get the first open tab (the one created at launch)
    pub fn first_tab(&self) -> Result<Arc<Tab>> {
        self.tabs()?
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::TabOperationFailed("No open tab".to_string()))
    }

    /// Snapshot the identities of all currently open tabs
    pub fn tab_keys(&self) -> Result<Vec<TabKey>> {
        Ok(self.tabs()?.iter().map(Self::key_of).collect())
    }

    /// Identity of a single tab, comparable against a `tab_keys` snapshot
    pub fn key_of(tab: &Arc<Tab>) -> TabKey {
        Arc::as_ptr(tab) as TabKey
    }

    /// First tab that is not part of the given snapshot, if any.
    ///
    /// Used to detect popups spawned by a click: snapshot before, compare
    /// after.
    pub fn popup_since(&self, before: &[TabKey]) -> Result<Option<Arc<Tab>>> {
        Ok(self.tabs()?.into_iter().find(|tab| !before.contains(&Self::key_of(tab))))
    }

    /// Close every tab not present in the given snapshot; returns how many
    /// were closed. Individual close failures are logged, not propagated.
    pub fn close_tabs_not_in(&self, before: &[TabKey]) -> Result<usize> {
        let mut closed = 0;
        for tab in self.tabs()? {
            if !before.contains(&Self::key_of(&tab)) {
                if let Err(e) = tab.close(true) {
                    log::debug!("Failed to close stray tab: {}", e);
                } else {
                    closed += 1;
                }
            }
        }
        Ok(closed)
    }

    /// Get the underlying Browser instance
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Navigate the given tab to a URL and wait for the load to commit
    pub fn goto(&self, tab: &Arc<Tab>, url: &str) -> Result<()> {
        tab.navigate_to(url)
            .map_err(|e| FetchError::NavigationFailed(format!("Failed to navigate to {}: {}", url, e)))?;
        tab.wait_until_navigated()
            .map_err(|e| FetchError::NavigationFailed(format!("Navigation to {} did not complete: {}", url, e)))?;

        Ok(())
    }

    /// Close the browser by closing all tabs; the process itself is torn
    /// down when the Browser instance is dropped
    pub fn close(&self) -> Result<()> {
        for tab in self.tabs()? {
            let _ = tab.close(false);
        }
        Ok(())
    }
}
