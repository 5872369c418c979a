//! The toggle button mounted into the host page's navbar.

use qm_core::PageKind;
use qm_core::QmResult;
use qm_dom::Document;
use qm_dom::NodeId;
use qm_presentation::AffordanceView;
use tracing::debug;

pub const TOGGLE_BUTTON_ID: &str = "quiet-mode-toggle-button";
pub const TOGGLE_ICON_ID: &str = "quiet-mode-toggle-icon";
const TOOLTIP_CLASS: &str = "yt-quiet-mode-tooltip";
const NAVBAR_SLOT: &str = "ytd-masthead #end #buttons";
const NOTIFICATION_BUTTON: &str = "ytd-notification-topbar-button-renderer";
const INITIAL_LABEL: &str = "Toggle No Distractions Mode";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToggleAffordance {
    button: Option<NodeId>,
    icon: Option<NodeId>,
    tooltip: Option<NodeId>,
    mounts: u64,
}

impl ToggleAffordance {
    pub fn button(&self) -> Option<NodeId> {
        self.button
    }

    pub fn mounts(&self) -> u64 {
        self.mounts
    }

    pub fn is_mounted(&self, doc: &Document) -> bool {
        self.button.is_some_and(|button| doc.is_connected(button))
    }

    /// True when `node` is the button or inside it.
    pub fn contains(&self, doc: &Document, node: NodeId) -> bool {
        self.button
            .is_some_and(|button| doc.is_connected(button) && doc.is_inclusive_ancestor(button, node))
    }

    /// Mounts the button when it is missing. The quiet destination gets it in
    /// the body; host pages get it in the navbar, right after the
    /// notifications button. Returns true when a button was inserted.
    pub fn ensure_mounted(&mut self, doc: &mut Document, page: PageKind) -> QmResult<bool> {
        if self.is_mounted(doc) {
            return Ok(false);
        }

        let slot = if page == PageKind::QuietApp {
            doc.body()
        } else {
            doc.select(NAVBAR_SLOT)?
        };
        let Some(slot) = slot else {
            return Ok(false);
        };

        let button = doc.create_element("button");
        doc.set_attribute(button, "id", TOGGLE_BUTTON_ID);
        doc.set_attribute(button, "class", "yt-quiet-mode-button");
        doc.set_attribute(button, "type", "button");
        doc.set_attribute(button, "aria-label", INITIAL_LABEL);

        let icon = doc.create_element("img");
        doc.set_attribute(icon, "id", TOGGLE_ICON_ID);
        doc.set_attribute(icon, "width", "24");
        doc.set_attribute(icon, "height", "24");
        doc.set_attribute(icon, "alt", "");
        doc.append_child(button, icon)?;

        let tooltip = doc.create_element("div");
        doc.set_attribute(tooltip, "class", TOOLTIP_CLASS);
        doc.set_attribute(tooltip, "role", "tooltip");
        doc.append_child(button, tooltip)?;

        match insertion_point(doc, slot) {
            Some(before) => doc.insert_before(slot, button, Some(before))?,
            None => doc.append_child(slot, button)?,
        }

        self.button = Some(button);
        self.icon = Some(icon);
        self.tooltip = Some(tooltip);
        self.mounts = self.mounts.saturating_add(1);
        debug!(button, mounts = self.mounts, page = page.as_str(), "toggle affordance mounted");
        Ok(true)
    }

    /// Writes the view into the button. Unchanged values are left alone.
    pub fn render(&self, doc: &mut Document, view: &AffordanceView) -> bool {
        let (Some(button), Some(icon), Some(tooltip)) = (self.button, self.icon, self.tooltip) else {
            return false;
        };
        if !doc.is_connected(button) {
            return false;
        }

        doc.set_attribute(icon, "src", view.icon.path);
        doc.set_attribute(button, "aria-label", view.label);
        doc.set_attribute(button, "aria-pressed", if view.pressed { "true" } else { "false" });

        if doc.text_content(tooltip) != view.tooltip {
            for child in doc.children(tooltip).to_vec() {
                doc.remove(child);
            }
            let text = doc.create_text(view.tooltip);
            if doc.append_child(tooltip, text).is_err() {
                return false;
            }
        }
        true
    }
}

/// Sibling that follows the slot child holding the notifications button.
fn insertion_point(doc: &Document, slot: NodeId) -> Option<NodeId> {
    let selector = qm_dom::parse_selector(NOTIFICATION_BUTTON).ok()?;
    let notification = doc.query(slot, &selector)?;
    let children = doc.children(slot);
    let index = children
        .iter()
        .position(|child| doc.is_inclusive_ancestor(*child, notification))?;
    children.get(index + 1).copied()
}
