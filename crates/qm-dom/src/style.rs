//! Computed display/visibility resolution.
//!
//! Resolution order: inline style, then the last matching author rule, then
//! the `hidden` attribute, then the tag default. Visibility inherits.

use crate::Document;
use crate::NodeId;

const INLINE_TAGS: &[&str] = &[
    "a",
    "abbr",
    "b",
    "button",
    "code",
    "em",
    "i",
    "img",
    "input",
    "label",
    "select",
    "small",
    "span",
    "strong",
    "sub",
    "sup",
    "textarea",
    "video",
    "yt-formatted-string",
    "yt-icon",
];

const NON_RENDERED_TAGS: &[&str] = &[
    "head", "link", "meta", "script", "style", "template", "title",
];

pub(crate) fn default_display(tag: &str) -> &'static str {
    if NON_RENDERED_TAGS.contains(&tag) {
        "none"
    } else if INLINE_TAGS.contains(&tag) {
        "inline"
    } else {
        "block"
    }
}

impl Document {
    pub fn computed_display(&self, node: NodeId) -> String {
        if let Some(value) = self.resolved_property(node, "display") {
            return value;
        }

        let Some(element) = self.element(node) else {
            return "none".to_owned();
        };

        if element.attribute("hidden").is_some() {
            return "none".to_owned();
        }

        default_display(element.tag()).to_owned()
    }

    pub fn computed_visibility(&self, node: NodeId) -> String {
        if let Some(value) = self.resolved_property(node, "visibility") {
            if value != "inherit" {
                return value;
            }
        }

        match self.parent(node) {
            Some(parent) if self.element(parent).is_some() => self.computed_visibility(parent),
            _ => "visible".to_owned(),
        }
    }

    /// Declared background colour. Not inherited; `None` means transparent.
    pub fn background_color(&self, node: NodeId) -> Option<String> {
        self.resolved_property(node, "background-color")
            .or_else(|| self.resolved_property(node, "background"))
    }

    /// True when the node or any ancestor computes to `display: none`, or the
    /// node computes to a non-visible visibility.
    pub fn is_rendered(&self, node: NodeId) -> bool {
        if self.computed_visibility(node) != "visible" {
            return false;
        }

        let mut current = Some(node);
        while let Some(id) = current {
            if self.element(id).is_none() {
                break;
            }
            if self.computed_display(id) == "none" {
                return false;
            }
            current = self.parent(id);
        }
        true
    }

    fn resolved_property(&self, node: NodeId, name: &str) -> Option<String> {
        if let Some(value) = self.inline_style(node).get(name) {
            return Some(value.to_owned());
        }

        let element = self.element(node)?;
        self.author_rules()
            .iter()
            .rev()
            .find(|rule| rule.selector.matches(&element) && rule.style.get(name).is_some())
            .and_then(|rule| rule.style.get(name))
            .map(str::to_owned)
    }
}
