//! Shadow tree store.
//!
//! Owns node identity and relationships for one capture session:
//! - opaque host references map to stable, monotonically assigned ids
//! - parent/sibling/children links mirror current document order
//! - dirty flags form a consume-on-read queue for the encoder
//! - a copy-on-write journal provides checkpoint/rollback without
//!   duplicating the whole tree
//!
//! Removal never frees a record: the node flips to `active = false` and
//! keeps its id until teardown, so ids are never reassigned mid-session.

use crate::error::{Result, StoreError};
use crate::types::{Node, NodeData, NodeId, NodeRef};
use ahash::AHashMap;

/// Per-checkpoint undo journal. Prior states are captured on first
/// touch only; an entry of `None` means the key did not exist when the
/// checkpoint was opened.
#[derive(Debug)]
struct Journal {
    next_id: NodeId,
    dirty: Vec<NodeId>,
    nodes: AHashMap<NodeId, Option<Node>>,
    refs: AHashMap<NodeRef, Option<NodeId>>,
}

/// The shadow model for one capture session.
#[derive(Debug)]
pub struct NodeStore {
    nodes: AHashMap<NodeId, Node>,
    ids: AHashMap<NodeRef, NodeId>,
    /// Dirty queue in first-dirtied order. Parents are discovered before
    /// their children, so this doubles as document-discovery order for
    /// freshly inserted subtrees.
    dirty: Vec<NodeId>,
    next_id: NodeId,
    journal: Option<Journal>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self {
            nodes: AHashMap::with_capacity(1024),
            ids: AHashMap::with_capacity(1024),
            dirty: Vec::new(),
            next_id: 1,
            journal: None,
        }
    }

    /// Return the stable id for a host reference, assigning a fresh one
    /// on first sight when `autogenerate` is set. `None` in, `None` out.
    pub fn identify(&mut self, node: Option<NodeRef>, autogenerate: bool) -> Option<NodeId> {
        let node = node?;
        if let Some(&id) = self.ids.get(&node) {
            return Some(id);
        }
        if !autogenerate {
            return None;
        }
        self.journal_ref(node);
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(node, id);
        Some(id)
    }

    /// Immutable lookup: the id previously assigned to a reference.
    pub fn lookup(&self, node: NodeRef) -> Option<NodeId> {
        self.ids.get(&node).copied()
    }

    /// Insert-or-update entry point for change notifications.
    pub fn upsert(&mut self, node: NodeRef, data: NodeData) {
        let id = match self.identify(Some(node), true) {
            Some(id) => id,
            None => return,
        };
        if self.nodes.contains_key(&id) {
            self.apply_update(id, data);
        } else {
            self.apply_insert(id, data);
        }
    }

    /// Mark the node and all descendants inactive and dirty.
    /// Unknown references are a no-op.
    pub fn remove(&mut self, node: NodeRef) {
        let id = match self.identify(Some(node), false) {
            Some(id) => id,
            None => return,
        };
        self.deactivate_subtree(id);
    }

    /// Drain the dirty queue: clones of every dirty node in
    /// first-dirtied order, flags cleared. Empty when nothing changed.
    pub fn take_dirty(&mut self) -> Vec<Node> {
        let ids = std::mem::take(&mut self.dirty);
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            self.journal_node(id);
            if let Some(node) = self.nodes.get_mut(&id) {
                if node.dirty {
                    node.dirty = false;
                    out.push(node.clone());
                }
            }
        }
        out
    }

    /// Open a checkpoint. Subsequent mutations journal the prior state
    /// of each touched node; an earlier, unfinished checkpoint is
    /// discarded (its changes become permanent).
    pub fn snapshot(&mut self) {
        self.journal = Some(Journal {
            next_id: self.next_id,
            dirty: self.dirty.clone(),
            nodes: AHashMap::new(),
            refs: AHashMap::new(),
        });
    }

    /// Roll back to the open checkpoint, including the id counter so
    /// monotonic assignment survives the rollback.
    ///
    /// # Panics
    /// Panics when no checkpoint is open; that is a programming error,
    /// not a recoverable condition.
    pub fn restore(&mut self) {
        let journal = match self.journal.take() {
            Some(journal) => journal,
            None => panic!("NodeStore::restore called without a prior snapshot"),
        };
        self.next_id = journal.next_id;
        self.dirty = journal.dirty;
        for (id, prior) in journal.nodes {
            match prior {
                Some(node) => {
                    self.nodes.insert(id, node);
                }
                None => {
                    self.nodes.remove(&id);
                }
            }
        }
        for (node_ref, prior) in journal.refs {
            match prior {
                Some(id) => {
                    self.ids.insert(node_ref, id);
                }
                None => {
                    self.ids.remove(&node_ref);
                }
            }
        }
    }

    /// Keep everything accumulated since the checkpoint and drop the
    /// journal.
    ///
    /// # Panics
    /// Panics when no checkpoint is open.
    pub fn commit(&mut self) {
        if self.journal.take().is_none() {
            panic!("NodeStore::commit called without a prior snapshot");
        }
    }

    pub fn has_checkpoint(&self) -> bool {
        self.journal.is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn try_get(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(StoreError::UnknownNode(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.active)
    }

    /// Drop all records. Only valid at session teardown.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.ids.clear();
        self.dirty.clear();
        self.journal = None;
    }

    fn apply_insert(&mut self, id: NodeId, data: NodeData) {
        let parent_id = self.identify(data.parent.flatten(), true);
        let next_id = self.identify(data.next.flatten(), true);
        self.journal_node(id);

        let mut node = Node::new(id);
        node.parent_id = parent_id;
        node.next_sibling_id = next_id;
        self.nodes.insert(id, node);
        self.merge_fields(id, data);

        if let Some(parent) = parent_id {
            self.attach_child(parent, id, next_id);
        }
        self.mark_dirty(id);
    }

    fn apply_update(&mut self, id: NodeId, data: NodeData) {
        self.journal_node(id);

        // Reparent-to-nothing is a removal, not a move.
        if data.parent == Some(None) {
            if let Some(old_parent) = self.nodes.get(&id).and_then(|n| n.parent_id) {
                self.detach_child(old_parent, id);
            }
            self.merge_fields(id, data);
            if let Some(node) = self.nodes.get_mut(&id) {
                node.parent_id = None;
                node.active = false;
            }
            self.mark_dirty(id);
            return;
        }

        // Outer None: position unchanged. Inner None (for `next`): the
        // node became the last child.
        let new_parent: Option<Option<NodeId>> = match data.parent {
            Some(Some(parent_ref)) => Some(self.identify(Some(parent_ref), true)),
            _ => None,
        };
        let new_next: Option<Option<NodeId>> = match data.next {
            Some(next_ref) => Some(self.identify(next_ref, true)),
            None => None,
        };

        let (old_parent, old_next) = match self.nodes.get(&id) {
            Some(node) => (node.parent_id, node.next_sibling_id),
            None => return,
        };
        let parent_changed = matches!(new_parent, Some(p) if p != old_parent);
        let next_changed = matches!(new_next, Some(n) if n != old_next);

        if parent_changed || next_changed {
            let target_parent = new_parent.unwrap_or(old_parent);
            let target_next = new_next.unwrap_or(old_next);
            if let Some(parent) = old_parent {
                self.detach_child(parent, id);
            }
            if let Some(parent) = target_parent {
                self.attach_child(parent, id, target_next);
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.parent_id = target_parent;
                node.next_sibling_id = target_next;
            }
        }

        self.merge_fields(id, data);
        self.mark_dirty(id);
    }

    fn merge_fields(&mut self, id: NodeId, data: NodeData) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if let Some(kind) = data.kind {
                node.kind = kind;
            }
            if let Some(tag) = data.tag {
                node.tag = tag;
            }
            if let Some(attributes) = data.attributes {
                node.attributes.extend(attributes);
            }
            if let Some(text) = data.text {
                node.text = text;
            }
            if let Some(rect) = data.rect {
                node.rect = Some(rect);
            }
            if let Some(dom_type) = data.dom_type {
                node.dom_type = Some(dom_type);
            }
            if let Some(masked) = data.masked {
                node.masked = masked;
            }
        }
    }

    /// Splice a child into a parent's ordered list, before `next` when
    /// that sibling is present, appended otherwise. Unknown parents are
    /// a no-op.
    fn attach_child(&mut self, parent: NodeId, child: NodeId, next: Option<NodeId>) {
        self.journal_node(parent);
        if let Some(node) = self.nodes.get_mut(&parent) {
            let position = next.and_then(|n| node.children.iter().position(|&c| c == n));
            match position {
                Some(index) => node.children.insert(index, child),
                None => node.children.push(child),
            }
        }
    }

    fn detach_child(&mut self, parent: NodeId, child: NodeId) {
        self.journal_node(parent);
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|c| *c != child);
        }
    }

    fn deactivate_subtree(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            self.journal_node(id);
            let children: Vec<NodeId> = match self.nodes.get_mut(&id) {
                Some(node) => {
                    node.active = false;
                    node.children.iter().copied().collect()
                }
                None => continue,
            };
            self.mark_dirty(id);
            stack.extend(children);
        }
    }

    fn mark_dirty(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.dirty {
                node.dirty = true;
                self.dirty.push(id);
            }
        }
    }

    fn journal_node(&mut self, id: NodeId) {
        match self.journal.as_ref() {
            Some(journal) if !journal.nodes.contains_key(&id) => {}
            _ => return,
        }
        let prior = self.nodes.get(&id).cloned();
        if let Some(journal) = self.journal.as_mut() {
            journal.nodes.insert(id, prior);
        }
    }

    fn journal_ref(&mut self, node_ref: NodeRef) {
        match self.journal.as_ref() {
            Some(journal) if !journal.refs.contains_key(&node_ref) => {}
            _ => return,
        }
        let prior = self.ids.get(&node_ref).copied();
        if let Some(journal) = self.journal.as_mut() {
            journal.refs.insert(node_ref, prior);
        }
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}
