//! Mutation observer registrations and records.

use crate::NodeId;

/// Handle for one observer registration on a [`crate::Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub(crate) u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attribute { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
}

/// What an observer is interested in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverInit {
    pub child_list: bool,
    pub attributes: bool,
    pub subtree: bool,
    /// When set, only these attribute names produce records.
    pub attribute_filter: Option<Vec<String>>,
}

impl ObserverInit {
    pub fn subtree_changes() -> Self {
        Self {
            child_list: true,
            attributes: true,
            subtree: true,
            attribute_filter: None,
        }
    }

    pub fn child_list_subtree() -> Self {
        Self {
            child_list: true,
            attributes: false,
            subtree: true,
            attribute_filter: None,
        }
    }

    pub fn attributes_only(filter: &[&str]) -> Self {
        Self {
            child_list: false,
            attributes: true,
            subtree: false,
            attribute_filter: Some(filter.iter().map(|name| (*name).to_owned()).collect()),
        }
    }

    pub(crate) fn accepts(&self, kind: &MutationKind) -> bool {
        match kind {
            MutationKind::ChildList => self.child_list,
            MutationKind::Attribute { name } => {
                self.attributes
                    && self
                        .attribute_filter
                        .as_ref()
                        .is_none_or(|filter| filter.iter().any(|allowed| allowed == name))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Registration {
    pub id: ObserverId,
    pub target: NodeId,
    pub init: ObserverInit,
    pub queue: Vec<MutationRecord>,
}
