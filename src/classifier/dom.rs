//! Parsed page snapshot with incremental fragment insertion.
//!
//! A `PageDom` stands in for the live document: one instance per page
//! lifetime, node ids stable for as long as the instance lives. Dynamic
//! content is modeled by appending parsed fragments under an existing node,
//! which is what feed hydration looks like from the classifier's seat.

use std::collections::VecDeque;

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

pub struct PageDom {
    html: Html,
}

impl PageDom {
    pub fn parse(document: &str) -> Self {
        Self {
            html: Html::parse_document(document),
        }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Compiles a selector, skipping (with a log line) anything the selector
    /// engine rejects. Bad selectors must never abort a pass.
    pub fn compile(raw: &str) -> Option<Selector> {
        match Selector::parse(raw) {
            Ok(selector) => Some(selector),
            Err(e) => {
                debug!(selector = raw, "skipping unsupported selector: {:?}", e);
                None
            }
        }
    }

    pub fn select_all<'a>(&'a self, selector: &Selector) -> Vec<ElementRef<'a>> {
        self.html.select(selector).collect()
    }

    pub fn find_first(&self, raw: &str) -> Option<ElementRef<'_>> {
        let selector = Self::compile(raw)?;
        self.html.select(&selector).next()
    }

    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    pub fn body(&self) -> Option<NodeId> {
        self.find_first("body").map(|el| el.id())
    }

    /// Appends a parsed HTML fragment under `parent`, preserving order.
    /// Returns the number of nodes added. Existing node ids are untouched.
    pub fn append_fragment(&mut self, parent: NodeId, fragment_html: &str) -> usize {
        let fragment = Html::parse_fragment(fragment_html);
        let src_root = fragment.tree.root();
        // fragment parsing wraps content in an <html> element
        let src_parent = src_root
            .children()
            .find(|child| matches!(child.value(), Node::Element(el) if el.name() == "html"))
            .unwrap_or(src_root);

        let mut added = 0;
        let mut queue: VecDeque<(NodeId, NodeId)> = src_parent
            .children()
            .map(|child| (child.id(), parent))
            .collect();

        while let Some((src_id, dest_parent)) = queue.pop_front() {
            let Some(src) = fragment.tree.get(src_id) else {
                continue;
            };
            let value = src.value().clone();
            let Some(mut dest) = self.html.tree.get_mut(dest_parent) else {
                continue;
            };
            let new_id = dest.append(value).id();
            added += 1;
            for child in src.children() {
                queue.push_back((child.id(), new_id));
            }
        }
        added
    }
}

/// Walks up from `el` to the nearest ancestor whose element name is in
/// `names`. The element itself is not considered.
pub fn closest_named<'a>(el: ElementRef<'a>, names: &[&str]) -> Option<ElementRef<'a>> {
    for node in el.ancestors() {
        if let Some(ancestor) = ElementRef::wrap(node) {
            if names.contains(&ancestor.value().name()) {
                return Some(ancestor);
            }
        }
    }
    None
}
