//! Core type definitions for the shadow tree.
//!
//! Key design principles:
//! 1. Use u32 ids everywhere instead of pointers
//! 2. Use SmallVec for child lists (most nodes have few children)
//! 3. Closed enums instead of sentinel-string dispatch
//! 4. Change payloads are merge deltas: `None` means "unchanged"

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Node identifier. Positive, monotonically assigned, never reused
/// while a session is alive.
pub type NodeId = u32;

/// Opaque host-side reference to an element.
///
/// The change source mints these; the store only uses them as map keys
/// to look up the stable [`NodeId`] it assigned on first sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef(pub u64);

/// Closed set of node kinds tracked by the shadow model.
///
/// The wire protocol reserves sentinel tag strings for the non-element
/// kinds; those sentinels live at the codec boundary, never here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Element,
    Text,
    DocType,
    Ignored,
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Element
    }
}

/// Quantized layout rectangle. Scroll offsets are present only for
/// scrollable containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub scroll_x: Option<i32>,
    pub scroll_y: Option<i32>,
}

impl LayoutRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            scroll_x: None,
            scroll_y: None,
        }
    }

    /// Quantize float coordinates to the integer grid used on the wire.
    pub fn from_f64(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(
            x.round() as i32,
            y.round() as i32,
            width.round() as i32,
            height.round() as i32,
        )
    }

    pub fn with_scroll(mut self, scroll_x: i32, scroll_y: i32) -> Self {
        self.scroll_x = Some(scroll_x);
        self.scroll_y = Some(scroll_y);
        self
    }
}

/// A tracked node in the shadow model.
///
/// Owned exclusively by the store. `active` flips to false on removal;
/// the record itself stays until session teardown so the id is never
/// reassigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub next_sibling_id: Option<NodeId>,
    pub children: SmallVec<[NodeId; 4]>,
    pub kind: NodeKind,
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub text: Option<String>,
    pub rect: Option<LayoutRect>,
    /// Raw DOM node type, kept only for ignored nodes.
    pub dom_type: Option<u32>,
    /// Content masking: when set, the encoder ships a length fingerprint
    /// instead of the text itself. The masking policy lives in the host.
    pub masked: bool,
    pub dirty: bool,
    pub active: bool,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            parent_id: None,
            next_sibling_id: None,
            children: SmallVec::new(),
            kind: NodeKind::Element,
            tag: String::new(),
            attributes: HashMap::new(),
            text: None,
            rect: None,
            dom_type: None,
            masked: false,
            dirty: false,
            active: true,
        }
    }

    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    pub fn is_text(&self) -> bool {
        self.kind == NodeKind::Text
    }

    /// Get attribute value
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }
}

/// Merge payload delivered by the change source.
///
/// Every field is optional: `None` leaves the stored value untouched.
/// Position fields are doubly optional so "unchanged" (`None`) and
/// "now detached" (`Some(None)`) stay distinct.
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    pub parent: Option<Option<NodeRef>>,
    pub next: Option<Option<NodeRef>>,
    pub kind: Option<NodeKind>,
    pub tag: Option<String>,
    pub attributes: Option<HashMap<String, String>>,
    pub text: Option<Option<String>>,
    pub rect: Option<LayoutRect>,
    pub dom_type: Option<u32>,
    pub masked: Option<bool>,
}

impl NodeData {
    /// Payload for an element node with the given tag.
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            kind: Some(NodeKind::Element),
            tag: Some(tag.into()),
            ..Default::default()
        }
    }

    /// Payload for a text node.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: Some(NodeKind::Text),
            text: Some(Some(content.into())),
            ..Default::default()
        }
    }

    /// Payload for a document type declaration.
    pub fn doctype(name: impl Into<String>) -> Self {
        Self {
            kind: Some(NodeKind::DocType),
            tag: Some(name.into()),
            ..Default::default()
        }
    }

    /// Payload for an ignored node (kept for structure, content dropped).
    pub fn ignored(dom_type: u32, tag: impl Into<String>) -> Self {
        Self {
            kind: Some(NodeKind::Ignored),
            tag: Some(tag.into()),
            dom_type: Some(dom_type),
            ..Default::default()
        }
    }

    pub fn under(mut self, parent: NodeRef) -> Self {
        self.parent = Some(Some(parent));
        self
    }

    pub fn before(mut self, next: NodeRef) -> Self {
        self.next = Some(Some(next));
        self
    }

    pub fn detached(mut self) -> Self {
        self.parent = Some(None);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_rect(mut self, rect: LayoutRect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn with_masked(mut self, masked: bool) -> Self {
        self.masked = Some(masked);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_quantization() {
        let rect = LayoutRect::from_f64(10.4, -3.6, 99.5, 0.2);
        assert_eq!(rect.x, 10);
        assert_eq!(rect.y, -4);
        assert_eq!(rect.width, 100);
        assert_eq!(rect.height, 0);
        assert_eq!(rect.scroll_x, None);
    }

    #[test]
    fn test_node_data_builder() {
        let data = NodeData::element("div")
            .under(NodeRef(7))
            .with_attribute("class", "main");
        assert_eq!(data.tag.as_deref(), Some("div"));
        assert_eq!(data.parent, Some(Some(NodeRef(7))));
        assert_eq!(
            data.attributes.as_ref().unwrap().get("class").unwrap(),
            "main"
        );
        assert_eq!(data.next, None);
    }
}
