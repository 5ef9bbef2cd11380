//! Batch decoder and tree reconstructor.
//!
//! Mirrors the encoder token for token: the same delta accumulator,
//! the same stream-position numbering for back-references, reset at
//! every batch boundary. The rebuilt tree persists across batches so a
//! stream of incremental uploads replays into one evolving document.
//!
//! Malformed input never panics here. A corrupt batch decodes to
//! nothing, a bad record is skipped with a warning, and the worst case
//! is an incomplete reconstruction.

use crate::compress;
use crate::error::{Result, WireError};
use crate::schema::{self, Envelope, MutationRecord, NodeState, Payload};
use crate::token::Token;
use ahash::AHashMap;
use serde_json::Value;
use shadow::{LayoutRect, NodeId, NodeKind};
use std::collections::HashMap;
use tracing::warn;

/// Expands hash and key-list tokens into the strings they stand for.
/// The capture side's dedup table is one implementor; a replay client
/// would back this with its definition store.
pub trait KeyResolver {
    fn resolve(&self, keys: &[String]) -> Vec<String>;
}

/// A node of the rebuilt tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub next: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub text: Option<String>,
    pub rect: Option<LayoutRect>,
    pub dom_type: Option<u32>,
}

/// Id-keyed reconstruction of the captured document.
///
/// Forward references are tolerated: attaching under a parent that has
/// not been decoded yet creates a placeholder that the parent's own
/// record later fills in.
#[derive(Debug, Default)]
pub struct DecodedTree {
    nodes: AHashMap<NodeId, DecodedNode>,
    roots: Vec<NodeId>,
}

impl DecodedTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NodeId) -> Option<&DecodedNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecodedNode> {
        self.nodes.values()
    }

    fn ensure(&mut self, id: NodeId) -> &mut DecodedNode {
        self.nodes.entry(id).or_insert_with(|| DecodedNode {
            id,
            ..DecodedNode::default()
        })
    }

    /// Detach from the current position and splice in under `parent`,
    /// before `next` when that sibling is already known, after
    /// `previous` as the fallback, appended otherwise.
    fn place(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        previous: Option<NodeId>,
        next: Option<NodeId>,
    ) {
        self.detach(id);
        let node = self.ensure(id);
        node.parent = parent;
        node.next = next;
        match parent {
            None => self.roots.push(id),
            Some(parent_id) => {
                let siblings = &mut self.ensure(parent_id).children;
                let at = next
                    .and_then(|n| siblings.iter().position(|&c| c == n))
                    .or_else(|| {
                        previous
                            .and_then(|p| siblings.iter().position(|&c| c == p))
                            .map(|i| i + 1)
                    })
                    .unwrap_or(siblings.len());
                siblings.insert(at, id);
            }
        }
    }

    fn detach(&mut self, id: NodeId) {
        let parent = self.nodes.get(&id).and_then(|node| node.parent);
        match parent {
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|&c| c != id);
                }
            }
            None => self.roots.retain(|&r| r != id),
        }
    }

    /// Remove a node and its whole subtree.
    fn remove(&mut self, id: NodeId) {
        self.detach(id);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
        }
    }
}

/// Everything one batch carried besides tree mutations.
#[derive(Debug, Default)]
pub struct DecodedSession {
    pub tree: DecodedTree,
    pub events: Vec<Envelope>,
}

/// Stateful decoder. Per-batch token state (accumulator, position
/// table) resets on every [`Reconstructor::apply_batch`]; the tree
/// accumulates.
#[derive(Debug, Default)]
pub struct Reconstructor {
    accumulator: i64,
    position: usize,
    seen: AHashMap<usize, String>,
    tree: DecodedTree,
}

impl Reconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &DecodedTree {
        &self.tree
    }

    pub fn into_tree(self) -> DecodedTree {
        self.tree
    }

    /// Decompress, parse and replay one upload batch. Tree mutations
    /// land in the tree; every other record is returned for the
    /// caller. Bad records are skipped, a bad batch yields nothing.
    pub fn apply_batch(&mut self, packed: &str, resolver: &dyn KeyResolver) -> Vec<Envelope> {
        self.accumulator = 0;
        self.position = 0;
        self.seen.clear();

        let json = match compress::decompress(Some(packed)) {
            Some(json) if !json.is_empty() => json,
            Some(_) => {
                warn!("truncated batch, nothing recovered");
                return Vec::new();
            }
            None => {
                warn!("corrupt batch, nothing recovered");
                return Vec::new();
            }
        };
        let records = match serde_json::from_str::<Value>(&json) {
            Ok(Value::Array(records)) => records,
            Ok(_) => {
                warn!("batch is not a record array");
                return Vec::new();
            }
            Err(error) => {
                warn!(%error, "batch is not valid JSON");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        for record in &records {
            match schema::decode_record(record) {
                Ok(envelope) => match envelope.payload {
                    Payload::Mutation(ref mutation) => {
                        let target = envelope.id as NodeId;
                        if let Err(error) = self.apply_mutation(target, mutation, resolver) {
                            warn!(%error, sequence = envelope.sequence, "skipping record");
                        }
                    }
                    _ => events.push(envelope),
                },
                Err(error) => {
                    warn!(%error, "skipping record");
                }
            }
        }
        events
    }

    fn apply_mutation(
        &mut self,
        target: NodeId,
        mutation: &MutationRecord,
        resolver: &dyn KeyResolver,
    ) -> Result<()> {
        match mutation {
            MutationRecord::Upsert(tokens) => self.apply_upsert(tokens, resolver),
            MutationRecord::Remove => {
                self.tree.remove(target);
                Ok(())
            }
            MutationRecord::Move { parent, next } => {
                match parent {
                    // Reparenting to nothing is a removal.
                    None => self.tree.remove(target),
                    Some(parent) => self.tree.place(target, Some(*parent), None, *next),
                }
                Ok(())
            }
            MutationRecord::Attribute { name, value } => {
                let node = self.tree.ensure(target);
                match value {
                    Some(value) => {
                        node.attributes.insert(name.clone(), value.clone());
                    }
                    None => {
                        node.attributes.remove(name);
                    }
                }
                Ok(())
            }
            MutationRecord::CharacterData { text } => {
                self.tree.ensure(target).text = Some(text.clone());
                Ok(())
            }
            MutationRecord::Scroll { x, y } => {
                let node = self.tree.ensure(target);
                let rect = node.rect.get_or_insert(LayoutRect::new(0, 0, 0, 0));
                rect.scroll_x = Some(*x);
                rect.scroll_y = Some(*y);
                Ok(())
            }
            MutationRecord::Input { value } => {
                self.tree.ensure(target).text = Some(value.clone());
                Ok(())
            }
            MutationRecord::Insert(state) => {
                self.apply_state(state);
                Ok(())
            }
        }
    }

    /// Replay one incremental token run: id, parent, next, then the
    /// metadata strings after back-reference expansion.
    fn apply_upsert(&mut self, tokens: &[Value], resolver: &dyn KeyResolver) -> Result<()> {
        if tokens.len() < 4 {
            return Err(WireError::TruncatedRecord {
                expected: 4,
                got: tokens.len(),
            });
        }
        let id = self.read_id(&tokens[0])?;
        let parent = self.read_link(&tokens[1])?;
        let next = self.read_link(&tokens[2])?;
        let strings = self.expand_metadata(&tokens[3..], resolver)?;
        let tag = strings
            .first()
            .ok_or(WireError::MalformedToken(self.position))?;
        let kind = schema::kind_for_tag(tag);

        let node = self.tree.ensure(id);
        node.kind = kind;
        match kind {
            NodeKind::Element => {
                node.tag = tag.clone();
                node.attributes.clear();
                node.rect = None;
                for entry in &strings[1..] {
                    if let Some((key, value)) = schema::parse_attribute_pair(entry) {
                        node.attributes.insert(key.to_string(), value.to_string());
                    } else if let Some(rect) = schema::parse_layout_token(entry) {
                        node.rect = Some(rect);
                    }
                }
            }
            NodeKind::Text => {
                node.text = Some(strings.get(1).cloned().unwrap_or_default());
            }
            NodeKind::DocType => {
                node.tag = strings.get(1).cloned().unwrap_or_default();
                node.attributes.clear();
                for entry in strings.iter().skip(2) {
                    if let Some((key, value)) = schema::parse_attribute_pair(entry) {
                        node.attributes.insert(key.to_string(), value.to_string());
                    }
                }
            }
            NodeKind::Ignored => {
                node.dom_type = strings
                    .get(1)
                    .and_then(|s| crate::hash::from_base36(s))
                    .map(|v| v as u32);
                node.tag = strings.get(2).cloned().unwrap_or_default();
            }
        }
        self.tree.place(id, parent, None, next);
        Ok(())
    }

    /// Discrete full-state insert, bypassing the token grammar.
    fn apply_state(&mut self, state: &NodeState) {
        let node = self.tree.ensure(state.index);
        node.kind = state.kind;
        node.tag = state.tag.clone();
        node.attributes = state.attributes.clone();
        node.text = state.text.clone();
        node.rect = state.rect;
        node.dom_type = state.dom_type;
        self.tree
            .place(state.index, state.parent, state.previous, state.next);
    }

    /// Mandatory id slot: the value always folds into the accumulator,
    /// a literal 0 simply leaves it where it was.
    fn read_id(&mut self, value: &Value) -> Result<NodeId> {
        let token = Token::from_value(value, self.position)?;
        let delta = match token {
            Token::Delta(delta) => delta,
            _ => return Err(WireError::MalformedToken(self.position)),
        };
        self.accumulator += delta;
        self.position += 1;
        if self.accumulator <= 0 {
            return Err(WireError::MalformedToken(self.position - 1));
        }
        Ok(self.accumulator as NodeId)
    }

    /// Parent/next slot: 0 is the absent sentinel and never folds.
    fn read_link(&mut self, value: &Value) -> Result<Option<NodeId>> {
        let token = Token::from_value(value, self.position)?;
        let delta = match token {
            Token::Delta(delta) => delta,
            _ => return Err(WireError::MalformedToken(self.position)),
        };
        self.position += 1;
        if delta == 0 {
            return Ok(None);
        }
        self.accumulator += delta;
        if self.accumulator <= 0 {
            return Err(WireError::MalformedToken(self.position - 1));
        }
        Ok(Some(self.accumulator as NodeId))
    }

    fn expand_metadata(
        &mut self,
        values: &[Value],
        resolver: &dyn KeyResolver,
    ) -> Result<Vec<String>> {
        let mut strings = Vec::new();
        for value in values {
            let token = Token::from_value(value, self.position)?;
            match token {
                Token::Literal(text) => {
                    self.seen.entry(self.position).or_insert_with(|| text.clone());
                    strings.push(text);
                }
                Token::IndexRef(at) => {
                    let text = self
                        .seen
                        .get(&at)
                        .cloned()
                        .ok_or(WireError::MalformedToken(self.position))?;
                    strings.push(text);
                }
                Token::HashRef(key) => {
                    strings.extend(resolver.resolve(std::slice::from_ref(&key)));
                }
                Token::KeyList(keys) => {
                    strings.extend(resolver.resolve(&keys));
                }
                Token::Delta(_) => return Err(WireError::MalformedToken(self.position)),
            }
            self.position += 1;
        }
        Ok(strings)
    }
}

/// One-shot convenience over [`Reconstructor`] for a single batch.
pub fn decode_batch(packed: &str, resolver: &dyn KeyResolver) -> DecodedSession {
    let mut reconstructor = Reconstructor::new();
    let events = reconstructor.apply_batch(packed, resolver);
    DecodedSession {
        tree: reconstructor.into_tree(),
        events,
    }
}
