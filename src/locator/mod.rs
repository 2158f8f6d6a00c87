//! Cross-frame element resolution with fallback descriptor chains.
//!
//! The locator sweeps an ordered candidate list across every browsing
//! context of a page (main document first, nested frames in document order)
//! and returns the first visible match. Descriptor order dominates context
//! order: a lower-priority descriptor is never chosen while a higher one
//! matches anywhere.

pub mod descriptor;
pub mod frames;

pub use descriptor::{Descriptor, fold};
pub use frames::FrameContext;

use crate::error::{FetchError, Result};
use headless_chrome::protocol::cdp::DOM;
use headless_chrome::{Element, Tab};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A successfully resolved control
pub struct Located<'a> {
    pub element: Element<'a>,
    pub context: FrameContext,
    /// Index into the candidate slice of the descriptor that matched
    pub descriptor_index: usize,
}

/// Searches candidate descriptors across all browsing contexts of one tab
pub struct FrameLocator<'a> {
    tab: &'a Arc<Tab>,
    poll_interval: Duration,
}

impl<'a> FrameLocator<'a> {
    pub fn new(tab: &'a Arc<Tab>) -> Self {
        Self { tab, poll_interval: Duration::from_millis(250) }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Resolve the first currently-visible element matching any candidate.
    ///
    /// Sweeps descriptor-major: for each descriptor in order, every context
    /// is tried before the next descriptor is considered. A sweep that finds
    /// nothing is repeated until `timeout` expires. Individual resolution
    /// errors (stale node ids, bad selectors in one frame) count as "not
    /// found in this context" and never abort the search.
    pub fn locate(&self, candidates: &[Descriptor], timeout: Duration) -> Result<Located<'a>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.sweep(candidates) {
                Ok(Some(located)) => return Ok(located),
                Ok(None) => {}
                Err(e) => log::debug!("Locator sweep failed, retrying: {}", e),
            }

            if Instant::now() >= deadline {
                return Err(FetchError::ControlNotFound(descriptor::describe(candidates)));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Click the first available match.
    ///
    /// `ControlNotFound` means no candidate resolved anywhere within the
    /// timeout; `ActionFailed` means a candidate resolved but could not be
    /// clicked. Callers that require the control treat either as a hard
    /// stage failure.
    pub fn click_first(&self, candidates: &[Descriptor], timeout: Duration) -> Result<Located<'a>> {
        let located = self.locate(candidates, timeout)?;
        located
            .element
            .click()
            .map_err(|e| FetchError::ActionFailed { action: "click".to_string(), reason: e.to_string() })?;
        Ok(located)
    }

    /// Fill the first available match with `text`.
    ///
    /// Sets the value programmatically and fires input/change events so the
    /// page's own handlers see the edit; per-key typing is far too slow for
    /// a 200-identifier textarea.
    pub fn fill_first(&self, candidates: &[Descriptor], text: &str, timeout: Duration) -> Result<Located<'a>> {
        let located = self.locate(candidates, timeout)?;
        located
            .element
            .call_js_fn(
                r#"function(value) {
                    this.focus();
                    this.value = value;
                    this.dispatchEvent(new Event("input", { bubbles: true }));
                    this.dispatchEvent(new Event("change", { bubbles: true }));
                }"#,
                vec![serde_json::json!(text)],
                false,
            )
            .map_err(|e| FetchError::ActionFailed { action: "fill".to_string(), reason: e.to_string() })?;
        Ok(located)
    }

    /// One pass over descriptors × contexts; `Ok(None)` when nothing matched
    fn sweep(&self, candidates: &[Descriptor]) -> Result<Option<Located<'a>>> {
        let contexts = frames::enumerate_contexts(self.tab)?;

        for (index, descriptor) in candidates.iter().enumerate() {
            for context in &contexts {
                match self.resolve_in(descriptor, context) {
                    Ok(Some(element)) => {
                        log::debug!("Matched {} in {}", descriptor, context.label);
                        return Ok(Some(Located { element, context: context.clone(), descriptor_index: index }));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Treated as "not found in this context"
                        log::trace!("{} failed in {}: {}", descriptor, context.label, e);
                    }
                }
            }
        }

        Ok(None)
    }

    fn resolve_in(&self, descriptor: &Descriptor, context: &FrameContext) -> Result<Option<Element<'a>>> {
        match descriptor {
            Descriptor::Css(_) => {
                let node_ids = self.query_all(context, descriptor.base_selector())?;
                match node_ids.first() {
                    Some(&node_id) => self.visible_element(node_id),
                    None => Ok(None),
                }
            }
            Descriptor::Text { .. } => {
                for node_id in self.query_all(context, descriptor.base_selector())? {
                    if let Some(element) = self.visible_element(node_id)? {
                        let text = element.get_inner_text().unwrap_or_default();
                        if descriptor.matches_payload(Some(&text), None) {
                            return Ok(Some(element));
                        }
                    }
                }
                Ok(None)
            }
            Descriptor::Attr { attribute, .. } => {
                for node_id in self.query_all(context, descriptor.base_selector())? {
                    if let Some(element) = self.visible_element(node_id)? {
                        let value = attribute_of(&element, attribute)?;
                        if descriptor.matches_payload(None, value.as_deref()) {
                            return Ok(Some(element));
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    /// Query all matches for a selector inside one context's document.
    /// Query failures (stale document node, selector unsupported in this
    /// frame) resolve to an empty list.
    pub(crate) fn query_all(&self, context: &FrameContext, selector: &str) -> Result<Vec<DOM::NodeId>> {
        match self.tab.call_method(DOM::QuerySelectorAll {
            node_id: context.document_node_id,
            selector: selector.to_string(),
        }) {
            Ok(result) => Ok(result.node_ids),
            Err(e) => {
                log::trace!("querySelectorAll('{}') failed in {}: {}", selector, context.label, e);
                Ok(Vec::new())
            }
        }
    }

    /// Wrap a node id, keeping it only if it is currently rendered
    pub(crate) fn visible_element(&self, node_id: DOM::NodeId) -> Result<Option<Element<'a>>> {
        let element = match Element::new(self.tab, node_id) {
            Ok(element) => element,
            Err(_) => return Ok(None),
        };
        if is_visible(&element) { Ok(Some(element)) } else { Ok(None) }
    }
}

/// An element counts as visible when it has a rendered, non-empty box
pub(crate) fn is_visible(element: &Element) -> bool {
    element
        .get_box_model()
        .map(|model| model.width as f64 > 0.0 && model.height as f64 > 0.0)
        .unwrap_or(false)
}

/// Read one attribute value off an element
pub(crate) fn attribute_of(element: &Element, name: &str) -> Result<Option<String>> {
    let attributes = element
        .get_attributes()
        .map_err(|e| FetchError::ActionFailed { action: "read-attributes".to_string(), reason: e.to_string() })?;

    Ok(attributes.and_then(|flat| {
        flat.chunks_exact(2)
            .find(|pair| pair[0] == name)
            .map(|pair| pair[1].clone())
    }))
}
