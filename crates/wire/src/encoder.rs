//! Incremental token encoder.
//!
//! Walks a dirty-node snapshot in discovery order and turns each node
//! into a short token run:
//!
//! ```text
//! [id delta] [parent delta|0] [next delta|0] [metadata strings...]
//! ```
//!
//! Ids ride a shared accumulator: every non-zero number token folds
//! into it, so consecutive nearby ids cost one or two digits. A literal
//! `0` is the absent/root sentinel and never folds. The metadata block
//! may then be replaced wholesale by a content hash, or token by token
//! with positional back-references, whichever is strictly cheaper than
//! writing the strings out.

use crate::decode::KeyResolver;
use crate::error::Result;
use crate::hash;
use crate::schema::{self, IGNORED_TAG};
use crate::token::Token;
use ahash::AHashMap;
use shadow::{Node, NodeId, NodeKind};

/// Content-addressed table of metadata blocks, shared across batches.
///
/// The digest is 32-bit-truncated, so two different blocks can land on
/// the same key; the first one wins and the second deduplicates
/// incorrectly without any signal. Accepted trade-off.
#[derive(Debug, Default)]
pub struct DedupTable {
    blocks: AHashMap<String, Vec<String>>,
}

impl DedupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block under its digest. Returns true when the digest
    /// was not seen before.
    pub fn admit(&mut self, digest: &str, block: &[String]) -> bool {
        if self.blocks.contains_key(digest) {
            return false;
        }
        self.blocks.insert(digest.to_string(), block.to_vec());
        true
    }

    pub fn get(&self, digest: &str) -> Option<&[String]> {
        self.blocks.get(digest).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl KeyResolver for DedupTable {
    fn resolve(&self, keys: &[String]) -> Vec<String> {
        let mut strings = Vec::new();
        for key in keys {
            if let Some(block) = self.get(key) {
                strings.extend(block.iter().cloned());
            }
        }
        strings
    }
}

/// Per-batch token encoder. The accumulator and the position table are
/// shared across every node of one batch and reset for the next.
///
/// `Clone` lets a caller trial-encode a node and only commit the
/// advanced cursor state when the resulting record is kept.
#[derive(Debug, Clone)]
pub struct TokenEncoder {
    accumulator: i64,
    position: usize,
    seen: AHashMap<String, usize>,
}

impl Default for TokenEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEncoder {
    pub fn new() -> Self {
        Self {
            accumulator: 0,
            position: 0,
            seen: AHashMap::new(),
        }
    }

    /// Encode one dirty node into its token run. The caller feeds nodes
    /// in discovery order so parent references resolve to ids the
    /// decoder has already seen or will see later in the same batch.
    pub fn encode_node(&mut self, node: &Node, dedup: &mut DedupTable) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        self.push_id(node.id, &mut tokens);
        self.push_link(node.parent_id, &mut tokens);
        self.push_link(node.next_sibling_id, &mut tokens);

        let block = metadata_block(node);
        let serialized = serde_json::to_string(&block)?;
        let digest = hash::digest(&serialized);
        dedup.admit(&digest, &block);

        for token in self.choose_encoding(&block, &serialized, &digest) {
            self.note(&token);
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn push_id(&mut self, id: NodeId, tokens: &mut Vec<Token>) {
        let delta = i64::from(id) - self.accumulator;
        self.accumulator = i64::from(id);
        self.position += 1;
        tokens.push(Token::Delta(delta));
    }

    /// Parent/next reference: `0` for absent, otherwise a delta that
    /// folds into the accumulator. The delta is never legitimately 0
    /// (a node cannot be its own parent or sibling), so the sentinel
    /// stays unambiguous.
    fn push_link(&mut self, link: Option<NodeId>, tokens: &mut Vec<Token>) {
        self.position += 1;
        match link {
            None => tokens.push(Token::Delta(0)),
            Some(id) => {
                let delta = i64::from(id) - self.accumulator;
                self.accumulator = i64::from(id);
                tokens.push(Token::Delta(delta));
            }
        }
    }

    /// One substitution strategy per block, the cheaper one; ties
    /// between substituting and not substituting keep the plain
    /// literals, ties between the two substitutions take the hash.
    fn choose_encoding(&self, block: &[String], serialized: &str, digest: &str) -> Vec<Token> {
        let plain_cost: usize = block.iter().map(|s| literal_cost(s)).sum();

        let hash_applies = digest.len() < serialized.len();
        let hash_cost = digest.len() + 4;

        let mut index_cost = 0usize;
        let mut index_hits = false;
        let indexed: Vec<Token> = block
            .iter()
            .map(|text| match self.seen.get(text) {
                Some(&at) if index_cost_at(at) < literal_cost(text) => {
                    index_hits = true;
                    index_cost += index_cost_at(at);
                    Token::IndexRef(at)
                }
                _ => {
                    index_cost += literal_cost(text);
                    Token::Literal(text.clone())
                }
            })
            .collect();

        if hash_applies && hash_cost < plain_cost && (!index_hits || hash_cost <= index_cost) {
            return vec![Token::HashRef(digest.to_string())];
        }
        if index_hits && index_cost < plain_cost {
            return indexed;
        }
        block
            .iter()
            .map(|text| Token::Literal(text.clone()))
            .collect()
    }

    /// Account an emitted token: every token occupies one stream
    /// position; only literals become back-reference targets.
    fn note(&mut self, token: &Token) {
        if let Token::Literal(text) = token {
            self.seen.entry(text.clone()).or_insert(self.position);
        }
        self.position += 1;
    }
}

/// Wire cost of a JSON string token (quotes included, escapes ignored;
/// a heuristic is enough here, the stream stays valid either way).
fn literal_cost(text: &str) -> usize {
    text.len() + 2
}

/// Wire cost of `[index]`.
fn index_cost_at(position: usize) -> usize {
    let digits = if position == 0 {
        1
    } else {
        (position as f64).log10() as usize + 1
    };
    digits + 2
}

/// The metadata strings for one node, tag sentinel first. This is the
/// unit the dedup table content-addresses.
pub fn metadata_block(node: &Node) -> Vec<String> {
    match node.kind {
        NodeKind::Element => {
            let mut block = vec![node.tag.clone()];
            block.extend(schema::attribute_pairs(&node.attributes));
            if let Some(rect) = &node.rect {
                block.push(schema::layout_token(rect));
            }
            block
        }
        NodeKind::Text => {
            let content = node.text.clone().unwrap_or_default();
            let content = if node.masked {
                masked_fingerprint(&content)
            } else {
                content
            };
            vec![schema::TEXT_TAG.to_string(), content]
        }
        NodeKind::DocType => {
            let mut block = vec![schema::DOCTYPE_TAG.to_string(), node.tag.clone()];
            block.extend(schema::attribute_pairs(&node.attributes));
            block
        }
        NodeKind::Ignored => vec![
            IGNORED_TAG.to_string(),
            hash::to_base36(i64::from(node.dom_type.unwrap_or(0))),
            node.tag.clone(),
        ],
    }
}

/// Length fingerprint shipped instead of masked text.
pub fn masked_fingerprint(text: &str) -> String {
    format!("*{}", hash::to_base36(text.chars().count() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadow::{LayoutRect, NodeData, NodeRef, NodeStore};

    fn id_delta(token: &Token) -> i64 {
        match token {
            Token::Delta(delta) => *delta,
            other => panic!("expected delta, got {other:?}"),
        }
    }

    #[test]
    fn test_delta_ids_telescope_to_final_id() {
        let mut store = NodeStore::new();
        store.upsert(NodeRef(1), NodeData::element("header"));
        store.upsert(NodeRef(2), NodeData::element("main"));
        store.upsert(NodeRef(3), NodeData::element("footer"));
        let mut encoder = TokenEncoder::new();
        let mut dedup = DedupTable::new();

        // Parentless nodes keep their link slots at literal zero, so the
        // accumulator only ever folds the id deltas.
        let mut sum = 0;
        let mut last = 0;
        for node in store.take_dirty() {
            let tokens = encoder.encode_node(&node, &mut dedup).unwrap();
            sum += id_delta(&tokens[0]);
            last = i64::from(node.id);
        }
        assert_eq!(sum, last);
    }

    #[test]
    fn test_absent_links_are_literal_zero() {
        let mut store = NodeStore::new();
        store.upsert(NodeRef(1), NodeData::element("html"));
        let mut encoder = TokenEncoder::new();
        let mut dedup = DedupTable::new();

        let nodes = store.take_dirty();
        let tokens = encoder.encode_node(&nodes[0], &mut dedup).unwrap();
        assert_eq!(tokens[1], Token::Delta(0));
        assert_eq!(tokens[2], Token::Delta(0));
    }

    #[test]
    fn test_identical_attribute_blocks_collapse_to_one_hash() {
        let mut store = NodeStore::new();
        store.upsert(NodeRef(1), NodeData::element("ul"));
        store.upsert(
            NodeRef(2),
            NodeData::element("li")
                .under(NodeRef(1))
                .with_attribute("class", "item selected highlighted"),
        );
        store.upsert(
            NodeRef(3),
            NodeData::element("li")
                .under(NodeRef(1))
                .with_attribute("class", "item selected highlighted"),
        );

        let mut encoder = TokenEncoder::new();
        let mut dedup = DedupTable::new();
        let mut hashes = Vec::new();
        for node in store.take_dirty() {
            for token in encoder.encode_node(&node, &mut dedup).unwrap() {
                if let Token::HashRef(digest) = token {
                    hashes.push(digest);
                }
            }
        }
        // Both siblings substitute, and with the same digest.
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], hashes[1]);
        assert!(dedup.get(&hashes[0]).is_some());
    }

    #[test]
    fn test_hash_substitution_requires_strictly_shorter_digest() {
        let mut store = NodeStore::new();
        store.upsert(NodeRef(1), NodeData::element("p"));
        let mut encoder = TokenEncoder::new();
        let mut dedup = DedupTable::new();

        let nodes = store.take_dirty();
        let tokens = encoder.encode_node(&nodes[0], &mut dedup).unwrap();
        // Block is just ["p"]; the digest cannot beat a 3-byte literal.
        assert_eq!(tokens[3], Token::Literal("p".into()));
    }

    #[test]
    fn test_repeated_short_tag_uses_index_backref() {
        let mut store = NodeStore::new();
        store.upsert(NodeRef(1), NodeData::element("ul"));
        store.upsert(NodeRef(2), NodeData::element("li").under(NodeRef(1)));
        store.upsert(NodeRef(3), NodeData::element("li").under(NodeRef(1)));

        let mut encoder = TokenEncoder::new();
        let mut dedup = DedupTable::new();
        let mut runs = Vec::new();
        for node in store.take_dirty() {
            runs.push(encoder.encode_node(&node, &mut dedup).unwrap());
        }
        // A bare ["li"] block is too short for the digest to win, so the
        // first occurrence ships the literal and the second points back at
        // its stream position. Positions: three tokens per run before the
        // tag, which puts the first "li" at 7.
        assert_eq!(runs[1][3], Token::Literal("li".into()));
        assert_eq!(runs[2][3], Token::IndexRef(7));
    }

    #[test]
    fn test_masked_text_ships_length_fingerprint() {
        let mut store = NodeStore::new();
        store.upsert(
            NodeRef(1),
            NodeData::text("4111 1111 1111 1111").with_masked(true),
        );
        let nodes = store.take_dirty();
        let block = metadata_block(&nodes[0]);
        assert_eq!(block[1], format!("*{}", hash::to_base36(19)));
    }

    #[test]
    fn test_metadata_block_shapes() {
        let mut store = NodeStore::new();
        store.upsert(NodeRef(1), NodeData::doctype("html"));
        store.upsert(NodeRef(2), NodeData::ignored(8, "script").under(NodeRef(1)));
        store.upsert(
            NodeRef(3),
            NodeData::element("div")
                .under(NodeRef(1))
                .with_attribute("id", "main")
                .with_rect(LayoutRect::new(0, 0, 100, 40)),
        );

        let nodes = store.take_dirty();
        assert_eq!(metadata_block(&nodes[0]), vec![schema::DOCTYPE_TAG, "html"]);
        assert_eq!(
            metadata_block(&nodes[1]),
            vec![IGNORED_TAG, "8", "script"]
        );
        assert_eq!(
            metadata_block(&nodes[2]),
            vec!["div", "id=main", "0*0*2s*14"]
        );
    }
}
