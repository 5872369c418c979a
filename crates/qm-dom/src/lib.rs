//! Arena DOM with inline styles, selector queries and mutation observers.
//!
//! Node ids are never reused. A removed node's slot stays empty, so holding a
//! stale id is harmless: every accessor simply reports the node as gone.

mod observer;
mod style;

pub use observer::MutationKind;
pub use observer::MutationRecord;
pub use observer::ObserverId;
pub use observer::ObserverInit;

use observer::Registration;
use qm_core::QmError;
use qm_core::QmResult;
use qm_css::InlineStyle;
use qm_css::SelectorElement;
use qm_css::SelectorList;
use tracing::trace;

/// ID used to address nodes in the DOM arena.
pub type NodeId = u64;

/// Playback readiness of a media element, mirroring `HTMLMediaElement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaState {
    /// 0 = nothing, 1 = metadata, 2 = current data, 3 = future data, 4 = enough data.
    pub ready_state: u8,
    pub seeking: bool,
}

impl MediaState {
    pub const HAVE_FUTURE_DATA: u8 = 3;

    pub fn ready() -> Self {
        Self {
            ready_state: 4,
            seeking: false,
        }
    }

    pub fn buffering() -> Self {
        Self {
            ready_state: 1,
            seeking: false,
        }
    }

    pub fn is_buffering(self) -> bool {
        self.seeking || self.ready_state < Self::HAVE_FUTURE_DATA
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub media: Option<MediaState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

/// Host page stylesheet rule: selector plus declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorRule {
    pub selector: SelectorList,
    pub style: InlineStyle,
}

/// A live document tree.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Option<Node>>,
    author_rules: Vec<AuthorRule>,
    observers: Vec<Registration>,
    next_observer: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            })],
            author_rules: Vec::new(),
            observers: Vec::new(),
            next_observer: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(usize::try_from(id).ok()?)?.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(usize::try_from(id).ok()?)?.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// True when the node is attached below the document root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == Self::ROOT {
                return true;
            }
            current = self.node(node_id).and_then(|node| node.parent);
        }
        false
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|child| self.element(*child).is_some())
            .collect()
    }

    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        match &self.node(id)?.kind {
            NodeKind::Element(data) => Some(ElementRef {
                doc: self,
                id,
                data,
            }),
            _ => None,
        }
    }

    /// The `<html>` element.
    pub fn document_element(&self) -> Option<NodeId> {
        self.element_children(Self::ROOT).first().copied()
    }

    pub fn body(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html)
            .into_iter()
            .find(|child| self.element(*child).is_some_and(|element| element.tag() == "body"))
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeKind::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
            media: None,
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeKind::Text(text.to_owned()))
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Some(Node {
            parent: None,
            children: Vec::new(),
            kind,
        }));
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> QmResult<()> {
        self.insert_before(parent, child, None)
    }

    /// Inserts `child` under `parent` before `reference`, or last when
    /// `reference` is `None`. An attached child is moved.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> QmResult<()> {
        if !self.contains(parent) || !self.contains(child) {
            return Err(QmError::new(
                "dom.node_missing",
                format!("cannot insert node {child} under {parent}: node no longer exists"),
            ));
        }

        if child == Self::ROOT || self.is_inclusive_ancestor(child, parent) {
            return Err(QmError::new(
                "dom.hierarchy_invalid",
                format!("inserting node {child} under {parent} would create a cycle"),
            ));
        }

        if matches!(self.node(parent).map(|node| &node.kind), Some(NodeKind::Text(_))) {
            return Err(QmError::new(
                "dom.hierarchy_invalid",
                format!("text node {parent} cannot have children"),
            ));
        }

        self.detach(child);

        let position = match reference {
            Some(reference) => self
                .children(parent)
                .iter()
                .position(|candidate| *candidate == reference)
                .ok_or_else(|| {
                    QmError::new(
                        "dom.reference_missing",
                        format!("reference node {reference} is not a child of {parent}"),
                    )
                })?,
            None => self.children(parent).len(),
        };

        if let Some(node) = self.node_mut(parent) {
            node.children.insert(position, child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }

        self.queue_record(MutationRecord {
            kind: MutationKind::ChildList,
            target: parent,
        });
        Ok(())
    }

    /// Detaches the node and drops its whole subtree.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == Self::ROOT || !self.contains(id) {
            return false;
        }

        self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Ok(index) = usize::try_from(current) else {
                continue;
            };
            if let Some(slot) = self.nodes.get_mut(index) {
                if let Some(node) = slot.take() {
                    stack.extend(node.children);
                }
            }
        }
        true
    }

    /// Replaces `old` with `new` in place; `old` is dropped.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> QmResult<()> {
        let parent = self.parent(old).ok_or_else(|| {
            QmError::new(
                "dom.node_detached",
                format!("node {old} has no parent to be replaced in"),
            )
        })?;
        self.insert_before(parent, new, Some(old))?;
        self.remove(old);
        Ok(())
    }

    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };

        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|child| *child != id);
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = None;
        }

        self.queue_record(MutationRecord {
            kind: MutationKind::ChildList,
            target: parent,
        });
    }

    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Parent chain starting at the node's parent.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(ancestor) = current {
            out.push(ancestor);
            current = self.parent(ancestor);
        }
        out
    }

    /// Inclusive descendants in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.node(id)?.kind {
            NodeKind::Element(data) => data
                .attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.get_attribute(id, name).is_some()
    }

    /// Sets an attribute. Returns false (and records nothing) when unchanged.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let Some(NodeKind::Element(data)) = self.node_mut(id).map(|node| &mut node.kind) else {
            return false;
        };

        match data.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) if existing == value => return false,
            Some((_, existing)) => *existing = value.to_owned(),
            None => data.attributes.push((name.clone(), value.to_owned())),
        }

        self.queue_record(MutationRecord {
            kind: MutationKind::Attribute { name },
            target: id,
        });
        true
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let Some(NodeKind::Element(data)) = self.node_mut(id).map(|node| &mut node.kind) else {
            return false;
        };

        let before = data.attributes.len();
        data.attributes.retain(|(key, _)| *key != name);
        if data.attributes.len() == before {
            return false;
        }

        self.queue_record(MutationRecord {
            kind: MutationKind::Attribute { name },
            target: id,
        });
        true
    }

    pub fn inline_style(&self, id: NodeId) -> InlineStyle {
        self.get_attribute(id, "style")
            .map(InlineStyle::parse)
            .unwrap_or_default()
    }

    /// Sets one inline style property; an empty value removes it. Returns false
    /// when the style attribute did not change.
    pub fn set_style_property(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        if self.element(id).is_none() {
            return false;
        }

        let mut style = self.inline_style(id);
        if !style.set(name, value) {
            return false;
        }
        self.write_style(id, &style)
    }

    pub fn remove_style_property(&mut self, id: NodeId, name: &str) -> bool {
        let mut style = self.inline_style(id);
        if style.remove(name).is_none() {
            return false;
        }
        self.write_style(id, &style)
    }

    fn write_style(&mut self, id: NodeId, style: &InlineStyle) -> bool {
        if style.is_empty() {
            self.remove_attribute(id, "style")
        } else {
            self.set_attribute(id, "style", &style.to_css_text())
        }
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node_id in self.descendants(id) {
            if let Some(NodeKind::Text(text)) = self.node(node_id).map(|node| &node.kind) {
                out.push_str(text);
            }
        }
        out
    }

    pub fn media_state(&self, id: NodeId) -> Option<MediaState> {
        match &self.node(id)?.kind {
            NodeKind::Element(data) => data.media,
            _ => None,
        }
    }

    /// Media readiness is element state, not markup, so no record is queued.
    pub fn set_media_state(&mut self, id: NodeId, state: MediaState) -> bool {
        match self.node_mut(id).map(|node| &mut node.kind) {
            Some(NodeKind::Element(data)) => {
                data.media = Some(state);
                true
            }
            _ => false,
        }
    }

    pub fn add_author_rule(&mut self, selector: &str, declarations: &str) -> QmResult<()> {
        let selector = parse_selector(selector)?;
        self.author_rules.push(AuthorRule {
            selector,
            style: InlineStyle::parse(declarations),
        });
        Ok(())
    }

    pub fn author_rules(&self) -> &[AuthorRule] {
        &self.author_rules
    }

    /// Connected elements below `scope` (exclusive) matching `selector`, in
    /// document order.
    pub fn query_all(&self, scope: NodeId, selector: &SelectorList) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .skip(1)
            .filter(|id| {
                self.element(*id)
                    .is_some_and(|element| selector.matches(&element))
            })
            .collect()
    }

    pub fn query(&self, scope: NodeId, selector: &SelectorList) -> Option<NodeId> {
        self.descendants(scope).into_iter().skip(1).find(|id| {
            self.element(*id)
                .is_some_and(|element| selector.matches(&element))
        })
    }

    /// Parses and runs a selector against the whole document.
    pub fn select_all(&self, selector: &str) -> QmResult<Vec<NodeId>> {
        Ok(self.query_all(Self::ROOT, &parse_selector(selector)?))
    }

    pub fn select(&self, selector: &str) -> QmResult<Option<NodeId>> {
        Ok(self.query(Self::ROOT, &parse_selector(selector)?))
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, id: NodeId, selector: &SelectorList) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if self
                .element(node_id)
                .is_some_and(|element| selector.matches(&element))
            {
                return Some(node_id);
            }
            current = self.parent(node_id);
        }
        None
    }

    pub fn observe(&mut self, target: NodeId, init: ObserverInit) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer = self.next_observer.saturating_add(1);
        trace!(observer = id.0, node = target, "mutation observer attached");
        self.observers.push(Registration {
            id,
            target,
            init,
            queue: Vec::new(),
        });
        id
    }

    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|registration| registration.id != id);
        let removed = self.observers.len() != before;
        if removed {
            trace!(observer = id.0, "mutation observer detached");
        }
        removed
    }

    pub fn is_observing(&self, id: ObserverId) -> bool {
        self.observers.iter().any(|registration| registration.id == id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn take_records(&mut self, id: ObserverId) -> Vec<MutationRecord> {
        self.observers
            .iter_mut()
            .find(|registration| registration.id == id)
            .map(|registration| std::mem::take(&mut registration.queue))
            .unwrap_or_default()
    }

    /// Observers with undelivered records, in registration order.
    pub fn pending_observers(&self) -> Vec<ObserverId> {
        self.observers
            .iter()
            .filter(|registration| !registration.queue.is_empty())
            .map(|registration| registration.id)
            .collect()
    }

    fn queue_record(&mut self, record: MutationRecord) {
        let interested: Vec<usize> = self
            .observers
            .iter()
            .enumerate()
            .filter(|(_, registration)| {
                registration.init.accepts(&record.kind)
                    && (registration.target == record.target
                        || (registration.init.subtree
                            && self.is_inclusive_ancestor(registration.target, record.target)))
            })
            .map(|(index, _)| index)
            .collect();

        for index in interested {
            if let Some(registration) = self.observers.get_mut(index) {
                registration.queue.push(record.clone());
            }
        }
    }
}

/// Parses a selector into the workspace error type.
pub fn parse_selector(selector: &str) -> QmResult<SelectorList> {
    SelectorList::parse(selector).map_err(|error| {
        QmError::new(
            error.code(),
            format!("cannot evaluate selector `{selector}`: {error}"),
        )
    })
}

/// Borrowed view of one element.
#[derive(Debug, Clone, Copy)]
pub struct ElementRef<'a> {
    doc: &'a Document,
    id: NodeId,
    data: &'a ElementData,
}

impl<'a> ElementRef<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tag(&self) -> &'a str {
        &self.data.tag
    }

    pub fn attribute(&self, name: &str) -> Option<&'a str> {
        self.data
            .attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn element_id(&self) -> Option<&'a str> {
        self.attribute("id")
    }

    pub fn classes(&self) -> impl Iterator<Item = &'a str> {
        self.attribute("class")
            .unwrap_or_default()
            .split_ascii_whitespace()
    }

    pub fn has_class_name(&self, class: &str) -> bool {
        self.classes().any(|name| name == class)
    }

    fn sibling_elements(&self) -> Vec<NodeId> {
        self.doc
            .parent(self.id)
            .map(|parent| self.doc.element_children(parent))
            .unwrap_or_default()
    }
}

impl SelectorElement for ElementRef<'_> {
    fn local_name(&self) -> &str {
        self.tag()
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        ElementRef::attribute(self, name)
    }

    fn parent_element(&self) -> Option<Self> {
        self.doc.element(self.doc.parent(self.id)?)
    }

    fn is_first_child(&self) -> bool {
        self.doc.parent(self.id).is_some() && self.sibling_elements().first() == Some(&self.id)
    }

    fn is_last_child(&self) -> bool {
        self.doc.parent(self.id).is_some() && self.sibling_elements().last() == Some(&self.id)
    }
}
