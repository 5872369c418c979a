//! Declarative catalog of distraction surfaces.

use qm_core::PageKind;
use qm_dom::Document;
use qm_dom::NodeId;

/// How a surface is taken out of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressionKind {
    /// `display: none` plus `visibility: hidden`; layout space is released by
    /// the display change alone.
    HardHide,
    /// Zeroes flex/width/margin/padding and sets `display: none` so sibling
    /// content can take the freed space immediately.
    LayoutCollapse,
    /// Widens a content region that neighbours a collapsed surface. The node
    /// stays visible.
    LayoutExpand,
}

impl SuppressionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HardHide => "hard-hide",
            Self::LayoutCollapse => "collapse",
            Self::LayoutExpand => "expand",
        }
    }
}

/// Page types a surface is reconciled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Applicability {
    /// Every reconciled host page.
    Always,
    /// Video pages only.
    WatchOnly,
}

impl Applicability {
    pub fn applies_to(self, page: PageKind) -> bool {
        match self {
            Self::Always => page.is_target(),
            Self::WatchOnly => page.is_watch(),
        }
    }
}

/// Extra check a matched node must pass before it is treated as the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentGuard {
    /// Broad comment selectors also hit unrelated item sections; keep only
    /// nodes that really hold the discussion.
    CommentsSection,
}

impl ContentGuard {
    pub fn admits(self, doc: &Document, node: NodeId) -> bool {
        match self {
            Self::CommentsSection => {
                let Some(element) = doc.element(node) else {
                    return false;
                };
                element.element_id() == Some("comments")
                    || matches!(element.tag(), "ytd-comments" | "ytd-comments-header-renderer")
                    || element.attribute("target-id") == Some("watch-discussion")
                    || doc.descendants(node).into_iter().skip(1).any(|child| {
                        doc.element(child).is_some_and(|inner| {
                            inner.tag() == "ytd-comments" || inner.element_id() == Some("comments")
                        })
                    })
            }
        }
    }
}

/// Keep/hide classification for the children of an action-button row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionButtonPolicy {
    /// Labels whose buttons are hidden (matched against `aria-label` and text).
    pub hidden_names: &'static [&'static str],
    /// Tags that are always hidden regardless of label.
    pub hidden_tags: &'static [&'static str],
    /// Tags and ids that mark the like button, which always stays.
    pub keep_tags: &'static [&'static str],
    pub keep_ids: &'static [&'static str],
}

impl ActionButtonPolicy {
    /// True when `child` (a direct child of a button row) should be hidden.
    pub fn hides(&self, doc: &Document, child: NodeId) -> bool {
        let Some(element) = doc.element(child) else {
            return false;
        };

        let is_first = doc
            .parent(child)
            .and_then(|parent| doc.element_children(parent).first().copied())
            == Some(child);
        if is_first
            || self.keep_tags.contains(&element.tag())
            || element
                .element_id()
                .is_some_and(|id| self.keep_ids.contains(&id))
        {
            return false;
        }

        if self.hidden_tags.contains(&element.tag()) {
            return true;
        }

        let mut labels: Vec<&str> = element.attribute("aria-label").into_iter().collect();
        labels.extend(
            doc.descendants(child)
                .into_iter()
                .skip(1)
                .filter_map(|node| doc.element(node))
                .filter(|inner| inner.tag() == "button")
                .filter_map(|inner| inner.attribute("aria-label")),
        );
        let text = doc.text_content(child);

        self.hidden_names.iter().any(|name| {
            labels.iter().any(|label| label.contains(name)) || text.contains(name)
        })
    }
}

/// Second-chance discovery for navbar buttons whose markup is unstable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavbarFallback {
    /// Selector enumerating every candidate for the text scan.
    pub scan: &'static str,
    /// Lowercase needle looked up in labels and text.
    pub needle: &'static str,
    /// Matches candidates whose `href` contains this fragment.
    pub href_fragment: Option<&'static str>,
    /// A primary match is widened to its closest ancestor of this tag.
    pub lift_to: Option<&'static str>,
}

impl NavbarFallback {
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(element) = doc.element(node) else {
            return false;
        };

        let own_label = element.attribute("aria-label").unwrap_or_default();
        let button_label = doc
            .descendants(node)
            .into_iter()
            .skip(1)
            .filter_map(|child| doc.element(child))
            .find(|inner| inner.tag() == "button")
            .and_then(|inner| inner.attribute("aria-label"))
            .unwrap_or_default();
        let text = doc.text_content(node);

        [own_label, button_label, text.as_str()]
            .iter()
            .any(|value| value.to_ascii_lowercase().contains(self.needle))
            || self.href_fragment.is_some_and(|fragment| {
                element
                    .attribute("href")
                    .is_some_and(|href| href.contains(fragment))
            })
    }
}

/// How a surface's nodes are discovered from its rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMatcher {
    /// Every node matching any rule.
    Rules,
    /// Rules select button rows; children are classified individually.
    ActionButtons(ActionButtonPolicy),
    /// Rules are tried first; a full scan with text matching runs only when
    /// they find nothing.
    NavbarButton(NavbarFallback),
}

/// Static description of one distraction surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    pub id: &'static str,
    /// Ordered match rules. Rules the DOM cannot evaluate are skipped.
    pub rules: &'static [&'static str],
    pub kind: SuppressionKind,
    pub applicability: Applicability,
    pub matcher: SurfaceMatcher,
    pub guard: Option<ContentGuard>,
}

const COMMENTS: SurfaceDescriptor = SurfaceDescriptor {
    id: "comments",
    rules: &[
        "#comments",
        "ytd-comments#comments",
        "ytd-watch-flexy #comments",
        "#primary #comments",
        "ytd-comments",
        "ytd-comments-header-renderer",
        "ytd-watch-flexy ytd-item-section-renderer[target-id=\"watch-discussion\"]",
        "ytd-item-section-renderer[target-id=\"watch-discussion\"]",
        "ytd-item-section-renderer:has(#comments)",
        "ytd-item-section-renderer:has(ytd-comments)",
    ],
    kind: SuppressionKind::HardHide,
    applicability: Applicability::WatchOnly,
    matcher: SurfaceMatcher::Rules,
    guard: Some(ContentGuard::CommentsSection),
};

const SUGGESTIONS: SurfaceDescriptor = SurfaceDescriptor {
    id: "suggestions",
    rules: &[
        "#secondary",
        "ytd-watch-flexy #secondary",
        "ytd-watch-flexy[role=\"main\"] #secondary",
        "#columns #secondary",
        "ytd-watch-flexy ytd-watch-next-secondary-results-renderer",
        "ytd-watch-next-secondary-results-renderer",
    ],
    kind: SuppressionKind::LayoutCollapse,
    applicability: Applicability::WatchOnly,
    matcher: SurfaceMatcher::Rules,
    guard: None,
};

const PRIMARY_EXPAND: SurfaceDescriptor = SurfaceDescriptor {
    id: "primary-expand",
    rules: &["ytd-watch-flexy #primary", "#columns #primary"],
    kind: SuppressionKind::LayoutExpand,
    applicability: Applicability::WatchOnly,
    matcher: SurfaceMatcher::Rules,
    guard: None,
};

const END_SCREEN: SurfaceDescriptor = SurfaceDescriptor {
    id: "end-screen",
    rules: &[
        ".ytp-fullscreen-grid-stills-container",
        ".ytp-modern-videowall-still",
        ".ytp-suggestion-set",
        "ytd-endscreen-renderer",
        "ytd-endscreen-content-renderer",
        ".ytp-endscreen-content",
        ".ytp-endscreen",
        "ytd-watch-next-results-renderer",
        "ytd-autoplay-renderer",
        "ytd-item-section-renderer[target-id=\"watch-related\"]",
        "#related",
        "#watch-related",
    ],
    kind: SuppressionKind::HardHide,
    applicability: Applicability::WatchOnly,
    matcher: SurfaceMatcher::Rules,
    guard: None,
};

const ACTION_BUTTONS: SurfaceDescriptor = SurfaceDescriptor {
    id: "action-buttons",
    rules: &[
        "ytd-watch-metadata #top-level-buttons-computed",
        "#top-level-buttons-computed",
        "ytd-menu-renderer",
        "#actions",
        "#menu-container",
    ],
    kind: SuppressionKind::HardHide,
    applicability: Applicability::WatchOnly,
    matcher: SurfaceMatcher::ActionButtons(ActionButtonPolicy {
        hidden_names: &["Dislike", "Share", "Download", "Save", "Clip", "Thanks"],
        hidden_tags: &["ytd-dislike-button-renderer"],
        keep_tags: &["ytd-like-button-renderer", "like-button-view-model"],
        keep_ids: &["like-button"],
    }),
    guard: None,
};

const NAVBAR_CREATE: SurfaceDescriptor = SurfaceDescriptor {
    id: "navbar-create",
    rules: &[
        "ytd-button-renderer button[aria-label=\"Create\"]",
        "ytd-button-renderer button[aria-label*=\"Create\"]",
        "ytd-button-renderer button[aria-label*=\"create\"]",
        "ytd-button-renderer[aria-label*=\"Create\"]",
        "ytd-topbar-menu-button-renderer[aria-label*=\"Create\"]",
        "ytd-topbar-menu-button-renderer[aria-label*=\"create\"]",
        "#create-icon",
        "ytd-topbar-menu-button-renderer button[aria-label*=\"Create\"]",
        "ytd-topbar-menu-button-renderer button[aria-label*=\"create\"]",
    ],
    kind: SuppressionKind::HardHide,
    applicability: Applicability::Always,
    matcher: SurfaceMatcher::NavbarButton(NavbarFallback {
        scan: "ytd-button-renderer, ytd-topbar-menu-button-renderer, a[href*=\"/create\"]",
        needle: "create",
        href_fragment: Some("/create"),
        lift_to: Some("ytd-button-renderer"),
    }),
    guard: None,
};

const NAVBAR_NOTIFICATIONS: SurfaceDescriptor = SurfaceDescriptor {
    id: "navbar-notifications",
    rules: &[
        "ytd-notification-topbar-button-renderer",
        "#notification-button",
        "button[aria-label*=\"Notifications\"]",
        "button[aria-label*=\"notifications\"]",
    ],
    kind: SuppressionKind::HardHide,
    applicability: Applicability::Always,
    matcher: SurfaceMatcher::NavbarButton(NavbarFallback {
        scan: "ytd-masthead ytd-topbar-menu-button-renderer, ytd-masthead button",
        needle: "notification",
        href_fragment: None,
        lift_to: Some("ytd-notification-topbar-button-renderer"),
    }),
    guard: None,
};

/// Immutable set of surfaces, created once per page instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceRegistry {
    surfaces: Vec<SurfaceDescriptor>,
}

impl Default for SurfaceRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl SurfaceRegistry {
    /// The catalog for the video host.
    pub fn standard() -> Self {
        Self::from_descriptors(vec![
            COMMENTS,
            SUGGESTIONS,
            PRIMARY_EXPAND,
            END_SCREEN,
            ACTION_BUTTONS,
            NAVBAR_CREATE,
            NAVBAR_NOTIFICATIONS,
        ])
    }

    pub fn from_descriptors(surfaces: Vec<SurfaceDescriptor>) -> Self {
        Self { surfaces }
    }

    pub fn surfaces(&self) -> &[SurfaceDescriptor] {
        &self.surfaces
    }

    pub fn get(&self, id: &str) -> Option<&SurfaceDescriptor> {
        self.surfaces.iter().find(|surface| surface.id == id)
    }

    pub fn applicable(&self, page: PageKind) -> impl Iterator<Item = &SurfaceDescriptor> {
        self.surfaces
            .iter()
            .filter(move |surface| surface.applicability.applies_to(page))
    }
}
