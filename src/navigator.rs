//! Session navigation: authentication, menu traversal and bulk-query
//! submission.
//!
//! Every control here is addressed through defensive descriptor chains
//! because the portal varies attribute names, casing and accents across
//! instances. A stage that cannot proceed dumps a diagnostic snapshot and
//! fails the whole run; the batch cannot begin without a positioned results
//! page.

use crate::browser::BrowserSession;
use crate::diagnostics;
use crate::error::{FetchError, Result};
use crate::locator::{Descriptor, FrameLocator};
use headless_chrome::Tab;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executed in every stage before the menu is searched; the portal builds
/// its navigation lazily through this function when it is present
const MENU_BOOTSTRAP_JS: &str =
    "(() => { if (typeof opcoes === 'function') { opcoes(); return true; } return false; })()";

/// Login credentials for the portal
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Navigation configuration
#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    /// Entry URL of the portal
    pub login_url: String,

    /// Pattern the post-login URL must settle on
    pub settled_url_pattern: String,

    /// Budget for each individual stage wait
    pub stage_timeout: Duration,

    /// Where diagnostic snapshots go on stage failure
    pub diagnostics_dir: PathBuf,
}

impl NavigatorConfig {
    pub fn new(login_url: impl Into<String>, diagnostics_dir: impl Into<PathBuf>) -> Self {
        Self {
            login_url: login_url.into(),
            settled_url_pattern: "sgd".to_string(),
            stage_timeout: Duration::from_secs(30),
            diagnostics_dir: diagnostics_dir.into(),
        }
    }
}

/// Sequences the excluded-but-required flow up to a positioned results page
pub struct Navigator<'a> {
    session: &'a BrowserSession,
    credentials: Credentials,
    config: NavigatorConfig,
}

impl<'a> Navigator<'a> {
    pub fn new(session: &'a BrowserSession, credentials: Credentials, config: NavigatorConfig) -> Self {
        Self { session, credentials, config }
    }

    /// Authenticate, open the bulk-query screen, submit the identifiers and
    /// return a tab positioned at the results listing.
    pub fn open_results(&self, identifiers: &[String]) -> Result<Arc<Tab>> {
        let tab = self.session.first_tab()?;
        self.login(&tab)?;
        let results = self.open_bulk_query(&tab)?;
        self.submit_query(&results, identifiers)?;
        Ok(results)
    }

    /// Authenticate against the portal's login screen, wherever it hides
    /// its form (including inside iframes and behind a front door).
    pub fn login(&self, tab: &Arc<Tab>) -> Result<()> {
        log::info!("Opening login URL {}", self.config.login_url);
        self.session.goto(tab, &self.config.login_url)?;

        let locator = FrameLocator::new(tab);

        // Some instances show an access button before the credential form
        if locator.click_first(&front_door_controls(), Duration::from_secs(6)).is_ok() {
            log::debug!("Front-door access control clicked");
        }

        log::info!("Filling credentials");
        locator
            .fill_first(&username_fields(), &self.credentials.username, Duration::from_secs(10))
            .map_err(|e| self.fail_stage(tab, "login", "login_fields_missing", &format!("username field: {}", e)))?;
        locator
            .fill_first(&password_fields(), &self.credentials.password, Duration::from_secs(10))
            .map_err(|e| self.fail_stage(tab, "login", "login_fields_missing", &format!("password field: {}", e)))?;

        log::info!("Submitting credentials");
        match locator.click_first(&submit_controls(), Duration::from_secs(8)) {
            Ok(_) => {}
            Err(FetchError::ControlNotFound(_)) => {
                // Fallback: Enter on the password field
                let located = locator.locate(&password_fields(), Duration::from_secs(3)).map_err(|e| {
                    self.fail_stage(tab, "login", "login_no_submit", &format!("no submit control: {}", e))
                })?;
                located
                    .element
                    .focus()
                    .and_then(|_| tab.press_key("Enter"))
                    .map_err(|e| self.fail_stage(tab, "login", "login_no_submit", &e.to_string()))?;
            }
            Err(e) => {
                return Err(self.fail_stage(tab, "login", "login_submit_failed", &e.to_string()));
            }
        }

        let pattern = Regex::new(&self.config.settled_url_pattern).map_err(|e| FetchError::StageFailed {
            stage: "login".to_string(),
            reason: format!("invalid settle pattern: {}", e),
        })?;
        if !self.wait_for_url(tab, &pattern, self.config.stage_timeout) {
            return Err(self.fail_stage(
                tab,
                "login",
                "login_settle_timeout",
                &format!("URL never matched '{}'", self.config.settled_url_pattern),
            ));
        }

        log::info!("Login completed");
        Ok(())
    }

    /// Open the bulk-query screen from the search menu. The portal opens it
    /// in a new tab when it can; same-tab rendering is handled as well.
    pub fn open_bulk_query(&self, tab: &Arc<Tab>) -> Result<Arc<Tab>> {
        log::info!("Opening search menu");
        let _ = tab.evaluate(MENU_BOOTSTRAP_JS, false);

        let locator = FrameLocator::new(tab);
        locator
            .click_first(&menu_controls(), Duration::from_secs(8))
            .map_err(|e| self.fail_stage(tab, "menu", "menu_missing", &e.to_string()))?;

        log::info!("Selecting bulk query");
        let before = self.session.tab_keys()?;
        locator
            .click_first(&bulk_query_controls(), Duration::from_secs(8))
            .map_err(|e| self.fail_stage(tab, "menu", "bulk_query_missing", &e.to_string()))?;

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(popup) = self.session.popup_since(&before)? {
                let _ = popup.wait_until_navigated();
                log::debug!("Bulk-query screen opened in a new tab");
                return Ok(popup);
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(200));
        }

        log::debug!("Bulk-query screen rendered in place");
        Ok(Arc::clone(tab))
    }

    /// Paste the identifier list, start the search and wait for the results
    /// listing to appear.
    pub fn submit_query(&self, tab: &Arc<Tab>, identifiers: &[String]) -> Result<()> {
        log::info!("Submitting {} identifier(s)", identifiers.len());
        let locator = FrameLocator::new(tab);

        locator
            .fill_first(&query_textarea(), &identifiers.join("\n"), Duration::from_secs(10))
            .map_err(|e| self.fail_stage(tab, "query", "query_textarea_missing", &e.to_string()))?;
        locator
            .click_first(&search_controls(), Duration::from_secs(8))
            .map_err(|e| self.fail_stage(tab, "query", "query_submit_missing", &e.to_string()))?;

        log::info!("Waiting for the results listing");
        locator
            .locate(&results_listing(), Duration::from_secs(15))
            .map_err(|e| self.fail_stage(tab, "query", "results_missing", &e.to_string()))?;

        Ok(())
    }

    /// Bounded wait until the tab's URL matches the pattern
    fn wait_for_url(&self, tab: &Arc<Tab>, pattern: &Regex, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pattern.is_match(&tab.get_url()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(250));
        }
    }

    /// Persist a diagnostic snapshot and build the fatal stage error
    fn fail_stage(&self, tab: &Arc<Tab>, stage: &str, label: &str, reason: &str) -> FetchError {
        if let Err(e) = diagnostics::dump_page(tab, &self.config.diagnostics_dir, label) {
            log::warn!("Diagnostic snapshot failed: {}", e);
        }
        FetchError::StageFailed { stage: stage.to_string(), reason: reason.to_string() }
    }
}

fn front_door_controls() -> Vec<Descriptor> {
    vec![
        Descriptor::text("a", "acessar"),
        Descriptor::text("a", "entrar"),
        Descriptor::text("a", "login"),
        Descriptor::text("button", "acessar"),
        Descriptor::text("button", "entrar"),
        Descriptor::text("button", "login"),
    ]
}

fn username_fields() -> Vec<Descriptor> {
    vec![
        Descriptor::css("input#username"),
        Descriptor::css("input[name='username']"),
        Descriptor::css("input[type='email']"),
        Descriptor::css("input[type='text']"),
    ]
}

fn password_fields() -> Vec<Descriptor> {
    vec![
        Descriptor::css("input#password"),
        Descriptor::css("input[name='password']"),
        Descriptor::css("input[type='password']"),
    ]
}

fn submit_controls() -> Vec<Descriptor> {
    vec![
        Descriptor::css("button[type='submit']"),
        Descriptor::css("input[type='submit']"),
        Descriptor::text("button", "entrar"),
        Descriptor::text("button", "login"),
    ]
}

fn menu_controls() -> Vec<Descriptor> {
    vec![
        Descriptor::css("a[title='Pesquisar Objeto']"),
        Descriptor::css("a.opcoes"),
        Descriptor::attr("a[onclick]", "onclick", "opcoes()"),
        Descriptor::text("a, button", "pesquisar objeto"),
    ]
}

fn bulk_query_controls() -> Vec<Descriptor> {
    vec![
        Descriptor::text("a", "consultar varios objetos"),
        Descriptor::text("button", "consultar varios objetos"),
        Descriptor::text("a, span, button", "consultar"),
    ]
}

fn query_textarea() -> Vec<Descriptor> {
    vec![
        Descriptor::css("textarea[id*='obj']"),
        Descriptor::css("textarea[name*='obj']"),
        Descriptor::css("textarea[placeholder*='objet']"),
        Descriptor::css("textarea"),
    ]
}

fn search_controls() -> Vec<Descriptor> {
    vec![
        Descriptor::text("button", "pesquisar"),
        Descriptor::text("button", "buscar"),
        Descriptor::text("a.btn", "pesquisar"),
        Descriptor::css("input[type='submit'][value*='esquisar']"),
    ]
}

fn results_listing() -> Vec<Descriptor> {
    vec![
        Descriptor::css("table.table"),
        Descriptor::css("div[id*='result'] table"),
        Descriptor::css("div[class*='resultado'] table"),
        Descriptor::css("table"),
    ]
}
