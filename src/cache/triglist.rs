//! Priority-ordered trigger lists.
//!
//! A triglist is the scheduling unit of the trigger core: schema caches keep
//! one per event, a firing state owns the merged list it is working through,
//! and the deferred queue holds the leftovers. Nodes refer to triggers by
//! handle and never own them.

use crate::ids::ObjectHandle;
use crate::value::DbObject;

/// One scheduled trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriglistNode {
    /// Trigger to fire.
    pub trigger: ObjectHandle,
    /// Priority snapshot used for ordering.
    pub priority: f64,
    /// Object the firing applies to (deferred work only).
    pub target: Option<DbObject>,
    /// Recursion depth at which the node was scheduled.
    pub depth: usize,
}

impl TriglistNode {
    /// Node for `trigger` with no target bound.
    #[must_use]
    pub const fn new(trigger: ObjectHandle, priority: f64) -> Self {
        Self {
            trigger,
            priority,
            target: None,
            depth: 0,
        }
    }
}

/// List of nodes ordered by non-increasing priority.
///
/// Equal priorities keep insertion/merge order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Triglist {
    nodes: Vec<TriglistNode>,
}

impl Triglist {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in firing order.
    pub fn iter(&self) -> impl Iterator<Item = &TriglistNode> {
        self.nodes.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut TriglistNode> {
        self.nodes.iter_mut()
    }

    /// Trigger handles in firing order.
    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.nodes.iter().map(|n| n.trigger)
    }

    /// Whether `trigger` is scheduled.
    #[must_use]
    pub fn contains(&self, trigger: ObjectHandle) -> bool {
        self.nodes.iter().any(|n| n.trigger == trigger)
    }

    /// Node at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TriglistNode> {
        self.nodes.get(index)
    }

    /// Insert a trigger after every entry of greater or equal priority.
    pub fn insert(&mut self, trigger: ObjectHandle, priority: f64) {
        self.insert_node(TriglistNode::new(trigger, priority));
    }

    /// Priority-ordered insertion of a prepared node.
    pub fn insert_node(&mut self, node: TriglistNode) {
        let at = self.nodes.partition_point(|n| n.priority >= node.priority);
        self.nodes.insert(at, node);
    }

    /// Merge another sorted list, consuming its nodes.
    ///
    /// On equal priority the nodes already in `self` come first.
    pub fn merge(&mut self, src: Self) {
        if src.is_empty() {
            return;
        }
        if self.is_empty() {
            self.nodes = src.nodes;
            return;
        }
        let dst = std::mem::take(&mut self.nodes);
        let mut merged = Vec::with_capacity(dst.len() + src.nodes.len());
        let mut a = dst.into_iter().peekable();
        let mut b = src.nodes.into_iter().peekable();
        loop {
            let take_a = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => x.priority >= y.priority,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_a { a.next() } else { b.next() };
            merged.extend(next);
        }
        self.nodes = merged;
    }

    /// Merge copies of another list's nodes, leaving it untouched.
    pub fn merge_copy(&mut self, src: &Self) {
        self.merge(src.clone());
    }

    /// Append nodes verbatim, without reordering.
    pub(crate) fn append(&mut self, mut other: Self) {
        self.nodes.append(&mut other.nodes);
    }

    /// Unlink the first node for `trigger`. Returns whether one was found.
    pub fn remove(&mut self, trigger: ObjectHandle) -> bool {
        match self.nodes.iter().position(|n| n.trigger == trigger) {
            Some(i) => {
                self.nodes.remove(i);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> TriglistNode {
        self.nodes.remove(index)
    }

    pub(crate) fn push_front(&mut self, node: TriglistNode) {
        self.nodes.insert(0, node);
    }

    pub(crate) fn pop_front(&mut self) -> Option<TriglistNode> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(self.nodes.remove(0))
        }
    }

    /// Re-sort a trigger whose priority changed. Returns whether it was
    /// present.
    pub fn reinsert(&mut self, trigger: ObjectHandle, priority: f64) -> bool {
        let Some(i) = self.nodes.iter().position(|n| n.trigger == trigger) else {
            return false;
        };
        let mut node = self.nodes.remove(i);
        node.priority = priority;
        self.insert_node(node);
        true
    }

    /// Keep only the nodes matching `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&TriglistNode) -> bool) {
        self.nodes.retain(keep);
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Whether priorities are non-increasing.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.nodes.windows(2).all(|w| w[0].priority >= w[1].priority)
    }
}

impl IntoIterator for Triglist {
    type Item = TriglistNode;
    type IntoIter = std::vec::IntoIter<TriglistNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}
