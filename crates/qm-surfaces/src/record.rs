//! Per-node suppression record, serialized as `data-qm-*` attributes.
//!
//! A node carries a record exactly while the engine owns its hidden state.
//! The attribute encoding keeps the record with the node, so a node the host
//! page discards takes its record with it.

use qm_dom::Document;
use qm_dom::NodeId;

use crate::registry::SuppressionKind;

pub const SUPPRESSED_ATTR: &str = "data-qm-suppressed";
pub const SURFACE_ATTR: &str = "data-qm-surface";
pub const ORIGINAL_DISPLAY_ATTR: &str = "data-qm-original-display";
pub const ORIGINAL_VISIBILITY_ATTR: &str = "data-qm-original-visibility";
pub const COLLAPSE_ATTR: &str = "data-qm-collapse";
pub const ORIGINAL_LAYOUT_ATTR: &str = "data-qm-original-layout";

const RECORD_ATTRS: &[&str] = &[
    SUPPRESSED_ATTR,
    SURFACE_ATTR,
    ORIGINAL_DISPLAY_ATTR,
    ORIGINAL_VISIBILITY_ATTR,
    COLLAPSE_ATTR,
    ORIGINAL_LAYOUT_ATTR,
];

/// Layout overrides the engine wrote on top of the display change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutOverride {
    Collapse,
    Expand,
}

impl LayoutOverride {
    pub fn for_kind(kind: SuppressionKind) -> Option<Self> {
        match kind {
            SuppressionKind::HardHide => None,
            SuppressionKind::LayoutCollapse => Some(Self::Collapse),
            SuppressionKind::LayoutExpand => Some(Self::Expand),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Collapse => "collapse",
            Self::Expand => "expand",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "collapse" => Some(Self::Collapse),
            "expand" => Some(Self::Expand),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressedElementRecord {
    pub surface: String,
    /// Computed display before the first suppression; `None` when the kind
    /// never touches display.
    pub original_display: Option<String>,
    pub original_visibility: Option<String>,
    pub layout: Option<LayoutOverride>,
    /// Inline layout declarations present before the override, as CSS text.
    pub original_layout: Option<String>,
}

impl SuppressedElementRecord {
    pub fn is_tagged(doc: &Document, node: NodeId) -> bool {
        doc.get_attribute(node, SUPPRESSED_ATTR) == Some("true")
    }

    pub fn read(doc: &Document, node: NodeId) -> Option<Self> {
        if !Self::is_tagged(doc, node) {
            return None;
        }

        let owned = |name: &str| doc.get_attribute(node, name).map(str::to_owned);
        Some(Self {
            surface: owned(SURFACE_ATTR).unwrap_or_default(),
            original_display: owned(ORIGINAL_DISPLAY_ATTR),
            original_visibility: owned(ORIGINAL_VISIBILITY_ATTR),
            layout: doc
                .get_attribute(node, COLLAPSE_ATTR)
                .and_then(LayoutOverride::parse),
            original_layout: owned(ORIGINAL_LAYOUT_ATTR),
        })
    }

    /// Tags the node. Returns false when the node is gone.
    pub fn write(&self, doc: &mut Document, node: NodeId) -> bool {
        if doc.element(node).is_none() {
            return false;
        }

        doc.set_attribute(node, SURFACE_ATTR, &self.surface);
        if let Some(display) = &self.original_display {
            doc.set_attribute(node, ORIGINAL_DISPLAY_ATTR, display);
        }
        if let Some(visibility) = &self.original_visibility {
            doc.set_attribute(node, ORIGINAL_VISIBILITY_ATTR, visibility);
        }
        if let Some(layout) = self.layout {
            doc.set_attribute(node, COLLAPSE_ATTR, layout.as_str());
        }
        if let Some(original) = &self.original_layout {
            doc.set_attribute(node, ORIGINAL_LAYOUT_ATTR, original);
        }
        // The flag goes last so a half-written record is never observed as tagged.
        doc.set_attribute(node, SUPPRESSED_ATTR, "true");
        true
    }

    /// Removes every record attribute. Returns true when anything was removed.
    pub fn clear(doc: &mut Document, node: NodeId) -> bool {
        let mut removed = false;
        for name in RECORD_ATTRS {
            removed |= doc.remove_attribute(node, name);
        }
        removed
    }
}
