//! Enumerates per-identifier trigger controls in the bulk-query results
//! listing and filters out the ones the portal has rendered inactive.

use crate::error::Result;
use crate::locator::{Descriptor, FrameLocator, attribute_of};
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::DOM;
use indexmap::IndexMap;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Name of the inline handler the portal attaches to receipt links
const TRIGGER_HANDLER: &str = "verArDigital";

/// Loose selector matching every receipt trigger control of the generic kind
const TRIGGER_SELECTOR: &str = "a[onclick*='verArDigital']";

/// Controls rendered at or below this computed opacity are treated as dimmed
const DIMMED_OPACITY: f64 = 0.45;

/// A trigger control resolved in the results listing, bound to exactly one
/// identifier.
///
/// The binding is established once per scan pass and is not re-validated:
/// the stored node id goes stale if the listing re-renders, in which case
/// the capture attempt fails rather than acting on the wrong row.
#[derive(Debug, Clone)]
pub struct TriggerControl {
    pub identifier: String,
    pub node_id: DOM::NodeId,
    /// Label of the browsing context the control was found in
    pub context: String,
}

/// Classification of one requested identifier after scanning
#[derive(Debug, Clone)]
pub enum ScanEntry {
    /// A live trigger control is bound to the identifier
    Active(TriggerControl),
    /// A control exists but is marked unavailable (dimmed or disabled)
    Inactive,
}

/// Scan output: requested identifiers mapped to their classification, in
/// request order. Identifiers with no entry were not found in the listing.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub entries: IndexMap<String, ScanEntry>,
}

impl ScanReport {
    pub fn entry(&self, identifier: &str) -> Option<&ScanEntry> {
        self.entries.get(identifier)
    }

    pub fn active_count(&self) -> usize {
        self.entries.values().filter(|e| matches!(e, ScanEntry::Active(_))).count()
    }

    pub fn inactive_count(&self) -> usize {
        self.entries.values().filter(|e| matches!(e, ScanEntry::Inactive)).count()
    }
}

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Budget for resolving each identifier's trigger control
    pub per_identifier_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { per_identifier_timeout: Duration::from_secs(6) }
    }
}

/// Resolves trigger controls for a batch of identifiers on the results page
pub struct ResultsScanner<'a> {
    tab: &'a Arc<Tab>,
    config: ScanConfig,
}

impl<'a> ResultsScanner<'a> {
    pub fn new(tab: &'a Arc<Tab>) -> Self {
        Self { tab, config: ScanConfig::default() }
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the trigger control for every requested identifier.
    ///
    /// Each identifier is tried with a strict descriptor first (identifier
    /// embedded directly in the selector) and falls back to enumerating all
    /// generic trigger controls with client-side filtering on the handler
    /// argument, because some rendering paths omit the identifier from the
    /// static attributes the strict selector relies on.
    pub fn scan(&self, identifiers: &[String]) -> Result<ScanReport> {
        let locator = FrameLocator::new(self.tab);
        let mut report = ScanReport::default();

        for identifier in identifiers {
            let candidates = trigger_candidates(identifier);
            let located = match locator.locate(&candidates, self.config.per_identifier_timeout) {
                Ok(located) => located,
                Err(e) => {
                    log::debug!("No trigger control for {}: {}", identifier, e);
                    continue;
                }
            };

            // Confirm the binding: the handler argument must match the
            // requested identifier exactly, not as a substring
            let onclick = attribute_of(&located.element, "onclick")?.unwrap_or_default();
            match extract_identifier(&onclick) {
                Some(embedded) if embedded == *identifier => {}
                other => {
                    log::warn!(
                        "Trigger control for {} carries unmatched handler argument {:?}; skipping",
                        identifier,
                        other
                    );
                    continue;
                }
            }

            if self.is_inactive(&located.element)? {
                log::info!("{}: receipt link present but inactive", identifier);
                report.entries.insert(identifier.clone(), ScanEntry::Inactive);
                continue;
            }

            let control = TriggerControl {
                identifier: identifier.clone(),
                node_id: located.element.node_id,
                context: located.context.label.clone(),
            };
            report.entries.insert(identifier.clone(), ScanEntry::Active(control));
        }

        log::info!(
            "Scan complete: {} active, {} inactive, {} not listed",
            report.active_count(),
            report.inactive_count(),
            identifiers.len() - report.entries.len()
        );
        Ok(report)
    }

    /// Inactive when the control is visually dimmed or carries a disabled
    /// marker. The two source heuristics disagree here; either signal alone
    /// marks the row unavailable.
    fn is_inactive(&self, element: &headless_chrome::Element) -> Result<bool> {
        let class = attribute_of(element, "class")?;
        let disabled = attribute_of(element, "disabled")?;
        let aria = attribute_of(element, "aria-disabled")?;
        if has_disabled_marker(class.as_deref(), disabled.as_deref(), aria.as_deref()) {
            return Ok(true);
        }

        let opacity = element
            .call_js_fn(
                "function() { return parseFloat(window.getComputedStyle(this).opacity || '1'); }",
                vec![],
                false,
            )
            .ok()
            .and_then(|remote| remote.value)
            .and_then(|value| value.as_f64())
            .unwrap_or(1.0);

        Ok(opacity <= DIMMED_OPACITY)
    }
}

/// Candidate chain for one identifier's trigger control: strict first,
/// loose fallback second
fn trigger_candidates(identifier: &str) -> [Descriptor; 2] {
    [
        Descriptor::css(format!(r#"a[onclick*="{}('{}'"]"#, TRIGGER_HANDLER, identifier)),
        Descriptor::attr(TRIGGER_SELECTOR, "onclick", format!("'{}'", identifier)),
    ]
}

/// Extract the identifier embedded as the handler's first argument,
/// e.g. `verArDigital('YA259824691BR')` -> `YA259824691BR`
pub fn extract_identifier(onclick: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(&format!(r"{}\('([^']+)'", TRIGGER_HANDLER)).expect("trigger pattern is valid")
    });
    re.captures(onclick).map(|caps| caps[1].to_string())
}

/// Disabled-marker heuristic over static attributes
pub fn has_disabled_marker(class: Option<&str>, disabled: Option<&str>, aria_disabled: Option<&str>) -> bool {
    if disabled.is_some() {
        return true;
    }
    if aria_disabled.map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false) {
        return true;
    }
    class
        .map(|c| c.split_whitespace().any(|token| token.eq_ignore_ascii_case("disabled") || token.eq_ignore_ascii_case("inativo")))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_identifier() {
        assert_eq!(
            extract_identifier("verArDigital('YA259824691BR')"),
            Some("YA259824691BR".to_string())
        );
        assert_eq!(
            extract_identifier("javascript:verArDigital('AB123', true);"),
            Some("AB123".to_string())
        );
        assert_eq!(extract_identifier("verOutraCoisa('YA259824691BR')"), None);
        assert_eq!(extract_identifier(""), None);
    }

    #[test]
    fn test_disabled_marker_from_class_token() {
        assert!(has_disabled_marker(Some("link disabled"), None, None));
        assert!(has_disabled_marker(Some("btn INATIVO"), None, None));
        // "disabled" must be a whole class token
        assert!(!has_disabled_marker(Some("not-disabled-style"), None, None));
        assert!(!has_disabled_marker(Some("link active"), None, None));
    }

    #[test]
    fn test_disabled_marker_from_attributes() {
        assert!(has_disabled_marker(None, Some(""), None));
        assert!(has_disabled_marker(None, None, Some("true")));
        assert!(has_disabled_marker(None, None, Some("TRUE")));
        assert!(!has_disabled_marker(None, None, Some("false")));
        assert!(!has_disabled_marker(None, None, None));
    }

    #[test]
    fn test_trigger_candidates_strict_before_loose() {
        let candidates = trigger_candidates("YA1");
        match &candidates[0] {
            Descriptor::Css(selector) => assert!(selector.contains("verArDigital('YA1'")),
            other => panic!("expected strict css descriptor, got {:?}", other),
        }
        match &candidates[1] {
            Descriptor::Attr { attribute, contains, .. } => {
                assert_eq!(attribute, "onclick");
                assert!(contains.contains("YA1"));
            }
            other => panic!("expected loose attr descriptor, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_report_counts() {
        let mut report = ScanReport::default();
        report.entries.insert(
            "A".to_string(),
            ScanEntry::Active(TriggerControl { identifier: "A".to_string(), node_id: 1, context: "main".to_string() }),
        );
        report.entries.insert("B".to_string(), ScanEntry::Inactive);

        assert_eq!(report.active_count(), 1);
        assert_eq!(report.inactive_count(), 1);
        assert!(report.entry("A").is_some());
        assert!(report.entry("C").is_none());
    }
}
