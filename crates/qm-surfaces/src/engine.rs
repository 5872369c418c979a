//! Idempotent apply/restore of surfaces against the live document.
//!
//! Every call re-queries the document; node ids are never carried from one
//! pass to the next. A node the host page removed in between simply stops
//! matching.

use qm_core::PageKind;
use qm_css::InlineStyle;
use qm_dom::Document;
use qm_dom::NodeId;
use qm_dom::parse_selector;
use tracing::debug;

use crate::loading::LoadingClassifier;
use crate::loading::NamingHeuristics;
use crate::record::LayoutOverride;
use crate::record::SuppressedElementRecord;
use crate::registry::ActionButtonPolicy;
use crate::registry::NavbarFallback;
use crate::registry::SuppressionKind;
use crate::registry::SurfaceDescriptor;
use crate::registry::SurfaceMatcher;
use crate::registry::SurfaceRegistry;

/// Set on action-button rows once their children were classified. The value
/// is the child count at classification time, so new children trigger a
/// fresh classification.
pub const PROCESSED_ATTR: &str = "data-qm-processed";

const LAYOUT_PROPERTIES: &[&str] = &["flex", "width", "min-width", "max-width", "margin", "padding"];

const HIDE_STYLES: &[(&str, &str)] = &[("display", "none"), ("visibility", "hidden")];

const COLLAPSE_STYLES: &[(&str, &str)] = &[
    ("flex", "0 0 0"),
    ("width", "0"),
    ("min-width", "0"),
    ("margin", "0"),
    ("padding", "0"),
    ("display", "none"),
];

const EXPAND_STYLES: &[(&str, &str)] = &[
    ("max-width", "none"),
    ("flex", "1 1 auto"),
    ("width", "100%"),
];

/// Counters for one apply or restore sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub surfaces: usize,
    pub suppressed: usize,
    pub restored: usize,
    /// Tagged nodes left alone because they looked like loading UI.
    pub skipped_loading: usize,
    /// Rules the DOM could not evaluate, in first-seen order.
    pub skipped_selectors: Vec<String>,
}

impl PassReport {
    pub fn changed(&self) -> bool {
        self.suppressed > 0 || self.restored > 0
    }

    fn skip_selector(&mut self, rule: &str) {
        if !self.skipped_selectors.iter().any(|seen| seen == rule) {
            self.skipped_selectors.push(rule.to_owned());
        }
    }
}

#[derive(Debug)]
pub struct SuppressionEngine {
    registry: SurfaceRegistry,
    classifier: Box<dyn LoadingClassifier>,
}

impl Default for SuppressionEngine {
    fn default() -> Self {
        Self::new(SurfaceRegistry::standard())
    }
}

impl SuppressionEngine {
    pub fn new(registry: SurfaceRegistry) -> Self {
        Self::with_classifier(registry, Box::new(NamingHeuristics::default()))
    }

    pub fn with_classifier(registry: SurfaceRegistry, classifier: Box<dyn LoadingClassifier>) -> Self {
        Self {
            registry,
            classifier,
        }
    }

    pub fn registry(&self) -> &SurfaceRegistry {
        &self.registry
    }

    /// Suppresses every current match of `surface`. Returns how many nodes
    /// were newly tagged; already tagged matches only get their hide styles
    /// reasserted.
    pub fn apply(&self, surface: &SurfaceDescriptor, doc: &mut Document) -> usize {
        let mut report = PassReport::default();
        self.apply_surface(surface, doc, &mut report);
        report.suppressed
    }

    /// Restores every node this surface tagged. Returns how many were
    /// restored.
    pub fn restore(&self, surface: &SurfaceDescriptor, doc: &mut Document) -> usize {
        let mut report = PassReport::default();
        self.restore_surface(surface, doc, &mut report);
        report.restored
    }

    /// Generic fallback: restores any tagged node, whichever surface owns it.
    pub fn restore_any_tagged(&self, doc: &mut Document) -> usize {
        let mut report = PassReport::default();
        self.restore_tagged(doc, |_| true, &mut report);
        report.restored
    }

    /// One sweep applying every surface that applies to `page`.
    pub fn apply_pass(&self, doc: &mut Document, page: PageKind) -> PassReport {
        let mut report = PassReport::default();
        for surface in self.registry.applicable(page) {
            report.surfaces += 1;
            self.apply_surface(surface, doc, &mut report);
        }

        debug!(
            page = page.as_str(),
            surfaces = report.surfaces,
            suppressed = report.suppressed,
            skipped_selectors = report.skipped_selectors.len(),
            "apply pass finished"
        );
        report
    }

    /// One sweep restoring every surface, then any tagged leftovers.
    pub fn restore_pass(&self, doc: &mut Document) -> PassReport {
        let mut report = PassReport::default();
        for surface in self.registry.surfaces() {
            report.surfaces += 1;
            self.restore_surface(surface, doc, &mut report);
        }
        self.restore_tagged(doc, |_| true, &mut report);

        debug!(
            surfaces = report.surfaces,
            restored = report.restored,
            skipped_loading = report.skipped_loading,
            "restore pass finished"
        );
        report
    }

    fn apply_surface(&self, surface: &SurfaceDescriptor, doc: &mut Document, report: &mut PassReport) {
        let targets = match surface.matcher {
            SurfaceMatcher::Rules => rule_matches(doc, surface, report),
            SurfaceMatcher::ActionButtons(policy) => action_button_targets(doc, surface, &policy, report),
            SurfaceMatcher::NavbarButton(fallback) => navbar_targets(doc, surface, &fallback, report),
        };

        let mut newly = 0_usize;
        for node in targets {
            if suppress_node(doc, surface, node) {
                newly += 1;
            }
        }

        if newly > 0 {
            debug!(surface = surface.id, count = newly, "surface suppressed");
        }
        report.suppressed += newly;
    }

    fn restore_surface(&self, surface: &SurfaceDescriptor, doc: &mut Document, report: &mut PassReport) {
        let before = report.restored;
        self.restore_tagged(
            doc,
            |record| record.surface == surface.id,
            report,
        );

        if matches!(surface.matcher, SurfaceMatcher::ActionButtons(_)) {
            let rows: Vec<NodeId> = doc
                .descendants(Document::ROOT)
                .into_iter()
                .filter(|node| doc.has_attribute(*node, PROCESSED_ATTR))
                .collect();
            for row in rows {
                doc.remove_attribute(row, PROCESSED_ATTR);
            }
        }

        let restored = report.restored - before;
        if restored > 0 {
            debug!(surface = surface.id, count = restored, "surface restored");
        }
    }

    fn restore_tagged(
        &self,
        doc: &mut Document,
        owned_by: impl Fn(&SuppressedElementRecord) -> bool,
        report: &mut PassReport,
    ) {
        // Document order restores ancestors before their descendants.
        let tagged: Vec<NodeId> = doc
            .descendants(Document::ROOT)
            .into_iter()
            .filter(|node| SuppressedElementRecord::is_tagged(doc, *node))
            .collect();

        for node in tagged {
            let Some(record) = SuppressedElementRecord::read(doc, node) else {
                continue;
            };
            if !owned_by(&record) {
                continue;
            }
            if doc
                .element(node)
                .is_some_and(|element| self.classifier.is_loading(&element))
            {
                report.skipped_loading += 1;
                continue;
            }

            restore_node(doc, node, &record);
            report.restored += 1;
        }
    }
}

fn rule_matches(doc: &Document, surface: &SurfaceDescriptor, report: &mut PassReport) -> Vec<NodeId> {
    let mut out = evaluate_rules(doc, surface.id, surface.rules, report);
    if let Some(guard) = surface.guard {
        out.retain(|node| guard.admits(doc, *node));
    }
    out
}

fn evaluate_rules(
    doc: &Document,
    surface: &str,
    rules: &[&str],
    report: &mut PassReport,
) -> Vec<NodeId> {
    let mut out: Vec<NodeId> = Vec::new();
    for rule in rules {
        match parse_selector(rule) {
            Ok(selector) => {
                for node in doc.query_all(Document::ROOT, &selector) {
                    if !out.contains(&node) {
                        out.push(node);
                    }
                }
            }
            Err(error) => {
                debug!(surface, selector = *rule, code = error.code, "skipping selector");
                report.skip_selector(rule);
            }
        }
    }
    out
}

fn action_button_targets(
    doc: &mut Document,
    surface: &SurfaceDescriptor,
    policy: &ActionButtonPolicy,
    report: &mut PassReport,
) -> Vec<NodeId> {
    // The first rule that finds anything wins; later rules name wrappers of
    // the same row whose children are not the buttons themselves.
    let mut rows = Vec::new();
    for rule in surface.rules {
        rows = evaluate_rules(doc, surface.id, std::slice::from_ref(rule), report);
        if !rows.is_empty() {
            break;
        }
    }

    let mut targets = Vec::new();
    for row in rows {
        let children = doc.element_children(row);
        let stamp = row_stamp(&children);
        if doc.get_attribute(row, PROCESSED_ATTR) == Some(stamp.as_str()) {
            targets.extend(children.into_iter().filter(|child| {
                SuppressedElementRecord::read(doc, *child)
                    .is_some_and(|record| record.surface == surface.id)
            }));
            continue;
        }

        targets.extend(children.into_iter().filter(|child| policy.hides(doc, *child)));
        doc.set_attribute(row, PROCESSED_ATTR, &stamp);
    }
    targets
}

/// Identity of a row's children. Replacing a child in place changes it even
/// when the count stays the same.
fn row_stamp(children: &[NodeId]) -> String {
    children
        .iter()
        .map(NodeId::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn navbar_targets(
    doc: &Document,
    surface: &SurfaceDescriptor,
    fallback: &NavbarFallback,
    report: &mut PassReport,
) -> Vec<NodeId> {
    let primary = rule_matches(doc, surface, report);
    let mut out: Vec<NodeId> = Vec::new();

    if primary.is_empty() {
        let candidates = evaluate_rules(doc, surface.id, &[fallback.scan], report);
        out.extend(candidates.into_iter().filter(|node| fallback.matches(doc, *node)));
        if !out.is_empty() {
            debug!(surface = surface.id, count = out.len(), "matched through text scan");
        }
        return out;
    }

    for node in primary {
        let lifted = fallback
            .lift_to
            .and_then(|tag| closest_tag(doc, node, tag))
            .unwrap_or(node);
        if !out.contains(&lifted) {
            out.push(lifted);
        }
    }
    out
}

fn closest_tag(doc: &Document, node: NodeId, tag: &str) -> Option<NodeId> {
    std::iter::once(node)
        .chain(doc.ancestors(node))
        .find(|candidate| doc.element(*candidate).is_some_and(|element| element.tag() == tag))
}

/// Tags (first time only) and styles one node. Returns true when newly tagged.
fn suppress_node(doc: &mut Document, surface: &SurfaceDescriptor, node: NodeId) -> bool {
    if doc.element(node).is_none() {
        return false;
    }

    let newly = !SuppressedElementRecord::is_tagged(doc, node);
    if newly {
        let record = capture(doc, surface, node);
        record.write(doc, node);
    }

    let styles = match surface.kind {
        SuppressionKind::HardHide => HIDE_STYLES,
        SuppressionKind::LayoutCollapse => COLLAPSE_STYLES,
        SuppressionKind::LayoutExpand => EXPAND_STYLES,
    };
    for (name, value) in styles {
        doc.set_style_property(node, name, value);
    }
    newly
}

fn capture(doc: &Document, surface: &SurfaceDescriptor, node: NodeId) -> SuppressedElementRecord {
    let layout = LayoutOverride::for_kind(surface.kind);
    let original_layout = layout.map(|_| {
        let inline = doc.inline_style(node);
        let mut kept = InlineStyle::empty();
        for name in LAYOUT_PROPERTIES {
            if let Some(value) = inline.get(name) {
                kept.set(name, value);
            }
        }
        kept.to_css_text()
    });

    let (original_display, original_visibility) = match surface.kind {
        SuppressionKind::HardHide => (
            Some(doc.computed_display(node)),
            Some(captured_visibility(doc, node)),
        ),
        SuppressionKind::LayoutCollapse => (Some(doc.computed_display(node)), None),
        SuppressionKind::LayoutExpand => (None, None),
    };

    SuppressedElementRecord {
        surface: surface.id.to_owned(),
        original_display,
        original_visibility,
        layout,
        original_layout,
    }
}

/// Visibility inherits, so a node nested in an already hidden surface would
/// otherwise capture our own `hidden` as its original value.
fn captured_visibility(doc: &Document, node: NodeId) -> String {
    let visibility = doc.computed_visibility(node);
    let inherited_from_suppressed = doc.inline_style(node).get("visibility").is_none()
        && doc
            .ancestors(node)
            .into_iter()
            .any(|ancestor| SuppressedElementRecord::is_tagged(doc, ancestor));

    if visibility != "visible" && inherited_from_suppressed {
        String::new()
    } else {
        visibility
    }
}

fn restore_node(doc: &mut Document, node: NodeId, record: &SuppressedElementRecord) {
    if record.layout.is_some() {
        for name in LAYOUT_PROPERTIES {
            doc.remove_style_property(node, name);
        }
        if let Some(original) = &record.original_layout {
            for declaration in InlineStyle::parse(original).declarations() {
                doc.set_style_property(node, &declaration.name, &declaration.value);
            }
        }
    }

    if let Some(display) = &record.original_display {
        // A captured `none` says nothing about the intended display; leave it
        // to the page's own rules rather than hiding the node again.
        doc.remove_style_property(node, "display");
        if !display.is_empty() && display != "none" && doc.computed_display(node) != *display {
            doc.set_style_property(node, "display", display);
        }
    }

    if let Some(visibility) = &record.original_visibility {
        doc.remove_style_property(node, "visibility");
        if !visibility.is_empty() && doc.computed_visibility(node) != *visibility {
            doc.set_style_property(node, "visibility", visibility);
        }
    }

    SuppressedElementRecord::clear(doc, node);
}

#[cfg(test)]
mod tests {
    use super::PROCESSED_ATTR;
    use super::SuppressionEngine;
    use super::row_stamp;
    use crate::Applicability;
    use crate::SuppressedElementRecord;
    use crate::SuppressionKind;
    use crate::SurfaceDescriptor;
    use crate::SurfaceMatcher;
    use crate::SurfaceRegistry;
    use qm_core::PageKind;
    use qm_dom::Document;
    use qm_dom::NodeId;
    use qm_dom::NodeKind;
    use qm_html::HtmlParser;

    const WATCH_PAGE: &str = r#"<html><head><title>watch</title></head><body>
        <ytd-masthead><div id="end"><div id="buttons">
            <ytd-button-renderer id="create-wrap"><button aria-label="Create"></button></ytd-button-renderer>
            <ytd-notification-topbar-button-renderer id="notif"><button aria-label="Notifications"></button></ytd-notification-topbar-button-renderer>
        </div></div></ytd-masthead>
        <ytd-watch-flexy role="main"><div id="columns">
            <div id="primary" style="max-width: 1280px">
                <video id="movie"></video>
                <ytd-watch-metadata><div id="top-level-buttons-computed">
                    <segmented-like-dislike-button-view-model id="like"><button aria-label="like this video"></button></segmented-like-dislike-button-view-model>
                    <yt-button-view-model id="share"><button aria-label="Share"></button></yt-button-view-model>
                    <ytd-download-button-renderer id="download">Download</ytd-download-button-renderer>
                </div></ytd-watch-metadata>
                <ytd-comments id="comments"><ytd-comments-header-renderer id="comments-header"></ytd-comments-header-renderer></ytd-comments>
            </div>
            <div id="secondary" style="width: 402px">
                <ytd-watch-next-secondary-results-renderer id="results"><div id="related"></div></ytd-watch-next-secondary-results-renderer>
            </div>
        </div></ytd-watch-flexy>
    </body></html>"#;

    fn watch_page() -> Document {
        let mut doc = HtmlParser.parse(WATCH_PAGE);
        assert!(doc.add_author_rule("#columns #secondary", "display: flex").is_ok());
        doc
    }

    fn node(doc: &Document, selector: &str) -> NodeId {
        doc.select(selector)
            .ok()
            .flatten()
            .unwrap_or_else(|| unreachable!())
    }

    fn snapshot(doc: &Document) -> Vec<(NodeId, Vec<(String, String)>)> {
        doc.descendants(Document::ROOT)
            .into_iter()
            .filter_map(|id| match doc.node(id).map(|node| &node.kind) {
                Some(NodeKind::Element(data)) => Some((id, data.attributes.clone())),
                _ => None,
            })
            .collect()
    }

    fn tagged_count(doc: &Document) -> usize {
        doc.descendants(Document::ROOT)
            .into_iter()
            .filter(|id| SuppressedElementRecord::is_tagged(doc, *id))
            .count()
    }

    #[test]
    fn apply_pass_hides_every_watch_surface() {
        let mut doc = watch_page();
        let engine = SuppressionEngine::default();
        let report = engine.apply_pass(&mut doc, PageKind::Watch);

        assert_eq!(report.surfaces, 7);
        assert_eq!(report.suppressed, 10);
        assert_eq!(
            report.skipped_selectors,
            vec![
                "ytd-item-section-renderer:has(#comments)".to_owned(),
                "ytd-item-section-renderer:has(ytd-comments)".to_owned(),
            ]
        );

        for selector in ["#comments", "#comments-header", "#secondary", "#related", "#share", "#download", "#create-wrap", "#notif"] {
            assert!(!doc.is_rendered(node(&doc, selector)), "{selector} still rendered");
        }
        assert!(doc.is_rendered(node(&doc, "#like")));
        assert!(doc.is_rendered(node(&doc, "#movie")));

        let primary = node(&doc, "#primary");
        assert_eq!(doc.inline_style(primary).get("max-width"), Some("none"));
        assert_eq!(doc.inline_style(primary).get("width"), Some("100%"));
    }

    #[test]
    fn apply_is_idempotent_on_an_unchanged_document() {
        let mut doc = watch_page();
        let engine = SuppressionEngine::default();
        engine.apply_pass(&mut doc, PageKind::Watch);
        let first = snapshot(&doc);

        let observer = doc.observe(Document::ROOT, qm_dom::ObserverInit::subtree_changes());
        let again = engine.apply_pass(&mut doc, PageKind::Watch);
        assert_eq!(again.suppressed, 0);
        assert_eq!(snapshot(&doc), first);
        assert!(doc.take_records(observer).is_empty());
    }

    #[test]
    fn reapply_reasserts_styles_the_host_overwrote() {
        let mut doc = watch_page();
        let engine = SuppressionEngine::default();
        engine.apply_pass(&mut doc, PageKind::Watch);

        let comments = node(&doc, "#comments");
        let captured = doc.get_attribute(comments, "data-qm-original-display").map(str::to_owned);
        doc.set_attribute(comments, "style", "display: block");
        assert!(doc.is_rendered(comments));

        assert_eq!(engine.apply_pass(&mut doc, PageKind::Watch).suppressed, 0);
        assert!(!doc.is_rendered(comments));
        assert_eq!(
            doc.get_attribute(comments, "data-qm-original-display").map(str::to_owned),
            captured
        );
    }

    #[test]
    fn home_page_only_touches_navbar_surfaces() {
        let mut doc = watch_page();
        let engine = SuppressionEngine::default();
        let report = engine.apply_pass(&mut doc, PageKind::Home);
        assert_eq!(report.surfaces, 2);
        assert_eq!(report.suppressed, 2);
        assert!(doc.is_rendered(node(&doc, "#comments")));

        let quiet = engine.apply_pass(&mut doc, PageKind::QuietApp);
        assert_eq!(quiet.surfaces, 0);
    }

    #[test]
    fn restore_pass_returns_page_to_original_state() {
        let mut doc = watch_page();
        let before: Vec<(String, String, String)> = ["#comments", "#comments-header", "#secondary", "#related", "#primary"]
            .into_iter()
            .map(|selector| {
                let id = node(&doc, selector);
                (selector.to_owned(), doc.computed_display(id), doc.computed_visibility(id))
            })
            .collect();

        let engine = SuppressionEngine::default();
        engine.apply_pass(&mut doc, PageKind::Watch);
        let report = engine.restore_pass(&mut doc);
        assert_eq!(report.restored, 10);
        assert_eq!(tagged_count(&doc), 0);
        assert!(!doc.has_attribute(node(&doc, "#top-level-buttons-computed"), PROCESSED_ATTR));

        for (selector, display, visibility) in before {
            let id = node(&doc, &selector);
            assert_eq!(doc.computed_display(id), display, "{selector}");
            assert_eq!(doc.computed_visibility(id), visibility, "{selector}");
        }

        let secondary = node(&doc, "#secondary");
        assert_eq!(doc.get_attribute(secondary, "style"), Some("width: 402px;"));
        let primary = node(&doc, "#primary");
        assert_eq!(doc.get_attribute(primary, "style"), Some("max-width: 1280px;"));
        assert_eq!(engine.restore_pass(&mut doc).restored, 0);
    }

    #[test]
    fn captured_none_clears_inline_display_instead_of_rehiding() {
        let mut doc = HtmlParser.parse(r#"<div id="related" style="display: none"></div>"#);
        let engine = SuppressionEngine::default();
        let surface = engine.registry().get("end-screen").copied().unwrap_or_else(|| unreachable!());
        assert_eq!(engine.apply(&surface, &mut doc), 1);
        let related = node(&doc, "#related");
        assert_eq!(doc.get_attribute(related, "data-qm-original-display"), Some("none"));

        assert_eq!(engine.restore(&surface, &mut doc), 1);
        assert_eq!(doc.inline_style(related).get("display"), None);
        assert_eq!(doc.computed_display(related), "block");
    }

    #[test]
    fn loading_nodes_are_left_for_a_later_pass() {
        let mut doc = watch_page();
        let related = node(&doc, "#related");
        doc.set_attribute(related, "class", "ytd-continuation-item-renderer spinner");

        let engine = SuppressionEngine::default();
        engine.apply_pass(&mut doc, PageKind::Watch);
        let hidden_style = doc.get_attribute(related, "style").map(str::to_owned);

        let report = engine.restore_pass(&mut doc);
        assert_eq!(report.skipped_loading, 2);
        assert!(SuppressedElementRecord::is_tagged(&doc, related));
        assert_eq!(doc.get_attribute(related, "style").map(str::to_owned), hidden_style);
        assert_eq!(tagged_count(&doc), 1);

        doc.set_attribute(related, "class", "");
        let later = engine.restore_pass(&mut doc);
        assert_eq!(later.restored, 1);
        assert_eq!(tagged_count(&doc), 0);
    }

    #[test]
    fn unsupported_rules_are_skipped_not_fatal() {
        let surface = SurfaceDescriptor {
            id: "subject",
            rules: &["div:has(> span)", "#target", "div::before"],
            kind: SuppressionKind::HardHide,
            applicability: Applicability::Always,
            matcher: SurfaceMatcher::Rules,
            guard: None,
        };
        let engine = SuppressionEngine::new(SurfaceRegistry::from_descriptors(vec![surface]));
        let mut doc = HtmlParser.parse(r#"<div id="target"><span></span></div>"#);

        let report = engine.apply_pass(&mut doc, PageKind::Other);
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.skipped_selectors.len(), 2);
    }

    #[test]
    fn action_row_is_reclassified_when_children_change() {
        let mut doc = watch_page();
        let engine = SuppressionEngine::default();
        let surface = engine.registry().get("action-buttons").copied().unwrap_or_else(|| unreachable!());
        assert_eq!(engine.apply(&surface, &mut doc), 2);

        let row = node(&doc, "#top-level-buttons-computed");
        let stamp = row_stamp(&doc.element_children(row));
        assert_eq!(stamp.split(',').count(), 3);
        assert_eq!(doc.get_attribute(row, PROCESSED_ATTR), Some(stamp.as_str()));
        assert_eq!(engine.apply(&surface, &mut doc), 0);

        HtmlParser.parse_fragment_into(&mut doc, row, r#"<yt-button-view-model id="clip"><button aria-label="Clip"></button></yt-button-view-model>"#);
        assert_eq!(engine.apply(&surface, &mut doc), 1);
        let stamp = row_stamp(&doc.element_children(row));
        assert_eq!(stamp.split(',').count(), 4);
        assert_eq!(doc.get_attribute(row, PROCESSED_ATTR), Some(stamp.as_str()));
        assert!(doc.is_rendered(node(&doc, "#like")));
    }

    #[test]
    fn replaced_action_button_is_hidden_on_reapply() {
        let mut doc = watch_page();
        let engine = SuppressionEngine::default();
        engine.apply_pass(&mut doc, PageKind::Watch);

        let old_share = node(&doc, "#share");
        let fresh = doc.create_element("yt-button-view-model");
        doc.set_attribute(fresh, "id", "share-2");
        let button = doc.create_element("button");
        doc.set_attribute(button, "aria-label", "Share");
        assert!(doc.append_child(fresh, button).is_ok());
        assert!(doc.replace(old_share, fresh).is_ok());
        assert!(doc.is_rendered(fresh));

        let report = engine.apply_pass(&mut doc, PageKind::Watch);
        assert_eq!(report.suppressed, 1);
        assert!(!doc.is_rendered(fresh));
        assert!(SuppressedElementRecord::is_tagged(&doc, fresh));
        assert!(doc.is_rendered(node(&doc, "#like")));
        assert!(!doc.is_rendered(node(&doc, "#download")));
    }

    #[test]
    fn navbar_falls_back_to_text_scan() {
        let mut doc = HtmlParser.parse(
            r#"<ytd-masthead>
                <ytd-topbar-menu-button-renderer id="c"><a href="/upload">Create</a></ytd-topbar-menu-button-renderer>
                <ytd-topbar-menu-button-renderer id="apps"><button aria-label="YouTube apps"></button></ytd-topbar-menu-button-renderer>
            </ytd-masthead>"#,
        );
        let engine = SuppressionEngine::default();
        let surface = engine.registry().get("navbar-create").copied().unwrap_or_else(|| unreachable!());

        assert_eq!(engine.apply(&surface, &mut doc), 1);
        assert!(SuppressedElementRecord::is_tagged(&doc, node(&doc, "#c")));
        assert!(!SuppressedElementRecord::is_tagged(&doc, node(&doc, "#apps")));
    }

    #[test]
    fn vanished_nodes_yield_zero_matches() {
        let mut doc = watch_page();
        let engine = SuppressionEngine::default();
        engine.apply_pass(&mut doc, PageKind::Watch);

        let comments = node(&doc, "#comments");
        assert!(doc.remove(comments));
        let report = engine.restore_pass(&mut doc);
        assert_eq!(report.restored, 8);
        assert_eq!(tagged_count(&doc), 0);
    }

    mod properties {
        use super::SuppressionEngine;
        use crate::Applicability;
        use crate::SuppressedElementRecord;
        use crate::SuppressionKind;
        use crate::SurfaceDescriptor;
        use crate::SurfaceMatcher;
        use crate::SurfaceRegistry;
        use proptest::prelude::*;
        use proptest::sample::select;
        use qm_dom::Document;
        use qm_dom::NodeId;

        #[derive(Debug, Clone)]
        struct Fixture {
            tag: &'static str,
            display: &'static str,
            visibility: &'static str,
            parent_visibility: &'static str,
            width: &'static str,
            margin: &'static str,
            author_display: Option<&'static str>,
            kind: SuppressionKind,
        }

        fn fixture() -> impl Strategy<Value = Fixture> {
            (
                select(vec!["div", "span", "ytd-comments"]),
                select(vec!["", "block", "flex", "inline-block", "grid"]),
                select(vec!["", "visible", "hidden"]),
                select(vec!["", "hidden"]),
                select(vec!["", "50%", "320px"]),
                select(vec!["", "0 auto", "8px"]),
                proptest::option::of(select(vec!["flex", "contents"])),
                select(vec![
                    SuppressionKind::HardHide,
                    SuppressionKind::LayoutCollapse,
                    SuppressionKind::LayoutExpand,
                ]),
            )
                .prop_map(
                    |(tag, display, visibility, parent_visibility, width, margin, author_display, kind)| Fixture {
                        tag,
                        display,
                        visibility,
                        parent_visibility,
                        width,
                        margin,
                        author_display,
                        kind,
                    },
                )
        }

        fn build(fixture: &Fixture) -> (Document, NodeId, SuppressionEngine) {
            let mut doc = Document::new();
            let html = doc.create_element("html");
            let body = doc.create_element("body");
            let subject = doc.create_element(fixture.tag);
            assert!(doc.append_child(Document::ROOT, html).is_ok());
            assert!(doc.append_child(html, body).is_ok());
            assert!(doc.append_child(body, subject).is_ok());
            doc.set_attribute(subject, "id", "subject");
            doc.set_style_property(body, "visibility", fixture.parent_visibility);
            doc.set_style_property(subject, "display", fixture.display);
            doc.set_style_property(subject, "visibility", fixture.visibility);
            doc.set_style_property(subject, "width", fixture.width);
            doc.set_style_property(subject, "margin", fixture.margin);
            if let Some(display) = fixture.author_display {
                assert!(doc.add_author_rule("#subject", &format!("display: {display}")).is_ok());
            }

            let surface = SurfaceDescriptor {
                id: "subject",
                rules: &["#subject"],
                kind: fixture.kind,
                applicability: Applicability::Always,
                matcher: SurfaceMatcher::Rules,
                guard: None,
            };
            let engine = SuppressionEngine::new(SurfaceRegistry::from_descriptors(vec![surface]));
            (doc, subject, engine)
        }

        fn observed(doc: &Document, node: NodeId) -> (String, String, Option<String>, Option<String>) {
            let inline = doc.inline_style(node);
            (
                doc.computed_display(node),
                doc.computed_visibility(node),
                inline.get("width").map(str::to_owned),
                inline.get("margin").map(str::to_owned),
            )
        }

        proptest! {
            #[test]
            fn apply_twice_matches_apply_once(fixture in fixture()) {
                let (mut doc, subject, engine) = build(&fixture);
                let surface = engine.registry().surfaces()[0];

                prop_assert_eq!(engine.apply(&surface, &mut doc), 1);
                let once = (doc.get_attribute(subject, "style").map(str::to_owned), SuppressedElementRecord::read(&doc, subject));
                prop_assert_eq!(engine.apply(&surface, &mut doc), 0);
                let twice = (doc.get_attribute(subject, "style").map(str::to_owned), SuppressedElementRecord::read(&doc, subject));
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn restore_undoes_apply(fixture in fixture()) {
                let (mut doc, subject, engine) = build(&fixture);
                let surface = engine.registry().surfaces()[0];
                let before = observed(&doc, subject);

                engine.apply(&surface, &mut doc);
                if fixture.kind != SuppressionKind::LayoutExpand {
                    prop_assert_eq!(doc.computed_display(subject), "none");
                }
                prop_assert_eq!(engine.restore(&surface, &mut doc), 1);

                prop_assert_eq!(observed(&doc, subject), before);
                prop_assert!(!SuppressedElementRecord::is_tagged(&doc, subject));
                prop_assert!(doc.get_attribute(subject, "data-qm-original-display").is_none());
            }
        }
    }
}
