//! Loading-placeholder classification used to hold back restores.

use std::fmt::Debug;

use qm_dom::ElementRef;

/// Decides whether a node is part of the host page's own loading UI.
///
/// Restoring such a node mid-load would fight the host's placeholder logic,
/// so restore passes leave it alone and revisit it on the next pass.
pub trait LoadingClassifier: Debug {
    fn is_loading(&self, element: &ElementRef<'_>) -> bool;
}

const DEFAULT_MARKERS: &[&str] = &[
    "skeleton",
    "spinner",
    "loading",
    "placeholder",
    "shimmer",
    "ghost",
    "continuation",
];

/// Substring heuristics over tag, id and class names, plus `aria-busy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingHeuristics {
    markers: Vec<String>,
}

impl Default for NamingHeuristics {
    fn default() -> Self {
        Self::new(DEFAULT_MARKERS.iter().map(|marker| (*marker).to_owned()))
    }
}

impl NamingHeuristics {
    pub fn new(markers: impl IntoIterator<Item = String>) -> Self {
        Self {
            markers: markers
                .into_iter()
                .map(|marker| marker.to_ascii_lowercase())
                .filter(|marker| !marker.is_empty())
                .collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    fn mentions_marker(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.markers.iter().any(|marker| name.contains(marker.as_str()))
    }
}

impl LoadingClassifier for NamingHeuristics {
    fn is_loading(&self, element: &ElementRef<'_>) -> bool {
        if element.attribute("aria-busy") == Some("true") {
            return true;
        }

        self.mentions_marker(element.tag())
            || element
                .element_id()
                .is_some_and(|id| self.mentions_marker(id))
            || element.classes().any(|class| self.mentions_marker(class))
    }
}
