use crate::error::{FetchError, Result};
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::DOM;
use std::sync::Arc;

/// One browsing context able to answer selector queries: the main document
/// or the content document of a nested frame.
#[derive(Debug, Clone)]
pub struct FrameContext {
    /// CDP node id of the context's document node, valid until the next
    /// re-render of the owning frame
    pub document_node_id: DOM::NodeId,

    /// Position of the context in the enumeration, e.g. "main" or "frame[2]"
    pub label: String,
}

/// Enumerate browsing contexts of a page: the main document first, then the
/// content documents of nested frames in document order.
///
/// Node ids go stale when the page re-renders; callers re-enumerate on every
/// sweep rather than caching the result.
pub fn enumerate_contexts(tab: &Arc<Tab>) -> Result<Vec<FrameContext>> {
    let root = tab
        .call_method(DOM::GetDocument { depth: Some(u32::MAX), pierce: Some(true) })
        .map_err(|e| FetchError::TabOperationFailed(format!("DOM.getDocument failed: {}", e)))?
        .root;

    let mut contexts = Vec::new();
    collect_documents(&root, &mut contexts);
    Ok(contexts)
}

fn collect_documents(node: &DOM::Node, out: &mut Vec<FrameContext>) {
    // nodeType 9 is a document node
    if node.node_type == 9 {
        let label = if out.is_empty() { "main".to_string() } else { format!("frame[{}]", out.len()) };
        out.push(FrameContext { document_node_id: node.node_id, label });
    }

    if let Some(children) = &node.children {
        for child in children {
            collect_documents(child, out);
        }
    }

    // Frame elements carry their nested document here when the tree is
    // fetched with pierce
    if let Some(content) = &node.content_document {
        collect_documents(content, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserSession, LaunchOptions};

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_main_context_comes_first() {
        let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");

        let tab = session.first_tab().expect("No tab");
        session
            .goto(&tab, "data:text/html,<html><body><p>top</p><iframe srcdoc='<p>inner</p>'></iframe></body></html>")
            .expect("Failed to navigate");

        std::thread::sleep(std::time::Duration::from_millis(500));

        let contexts = enumerate_contexts(&tab).expect("Failed to enumerate contexts");
        assert!(!contexts.is_empty());
        assert_eq!(contexts[0].label, "main");

        // The srcdoc iframe should contribute a nested context
        assert!(contexts.len() >= 2, "expected nested context, got {}", contexts.len());
        assert_eq!(contexts[1].label, "frame[1]");
    }
}
