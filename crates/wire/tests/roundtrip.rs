//! End-to-end round trips: capture through a session, replay through
//! the reconstructor, compare trees.

use shadow::{LayoutRect, Node, NodeData, NodeId, NodeRef, NodeStore};
use std::cell::RefCell;
use std::rc::Rc;
use wire::decode::decode_batch;
use wire::session::{CaptureSession, Clock, SessionConfig, UploadSink};
use wire::{compress, DecodedTree, Reconstructor};

#[derive(Clone, Copy, Default)]
struct FrozenClock;

impl Clock for FrozenClock {
    fn now(&self) -> u64 {
        1_700_000_000_000
    }
}

#[derive(Clone, Default)]
struct MemorySink(Rc<RefCell<Vec<String>>>);

impl MemorySink {
    fn payloads(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

impl UploadSink for MemorySink {
    fn deliver(&mut self, _session_id: &str, payload: &str) {
        self.0.borrow_mut().push(payload.to_string());
    }
}

fn capture_session() -> (CaptureSession<FrozenClock, MemorySink>, MemorySink) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let sink = MemorySink::default();
    let session = CaptureSession::new(SessionConfig::default(), FrozenClock, sink.clone());
    (session, sink)
}

/// Active children only: the store keeps removed ids in the parent's
/// list, the decoded tree does not.
fn active_children(store: &NodeStore, node: &Node) -> Vec<NodeId> {
    node.children
        .iter()
        .copied()
        .filter(|&c| store.get(c).map(|n| n.active).unwrap_or(false))
        .collect()
}

fn assert_trees_match(store: &NodeStore, tree: &DecodedTree) {
    let active = store.active_nodes().count();
    assert_eq!(tree.len(), active, "node count");
    for node in store.active_nodes() {
        let twin = tree
            .get(node.id)
            .unwrap_or_else(|| panic!("node {} missing from decode", node.id));
        assert_eq!(twin.kind, node.kind, "kind of {}", node.id);
        assert_eq!(twin.tag, node.tag, "tag of {}", node.id);
        assert_eq!(twin.parent, node.parent_id, "parent of {}", node.id);
        assert_eq!(twin.attributes, node.attributes, "attributes of {}", node.id);
        assert_eq!(twin.rect, node.rect, "rect of {}", node.id);
        assert_eq!(
            twin.children,
            active_children(store, node),
            "children of {}",
            node.id
        );
        if !node.masked {
            assert_eq!(twin.text, node.text, "text of {}", node.id);
        }
    }
}

fn build_page(session: &mut CaptureSession<FrozenClock, MemorySink>) {
    session.insert(NodeRef(1), NodeData::doctype("html"));
    session.insert(NodeRef(2), NodeData::element("html"));
    session.insert(NodeRef(3), NodeData::element("head").under(NodeRef(2)));
    session.insert(NodeRef(4), NodeData::ignored(1, "script").under(NodeRef(3)));
    session.insert(
        NodeRef(5),
        NodeData::element("body")
            .under(NodeRef(2))
            .with_rect(LayoutRect::new(0, 0, 1280, 2000).with_scroll(0, 0)),
    );
    session.insert(
        NodeRef(6),
        NodeData::element("div")
            .under(NodeRef(5))
            .with_attribute("id", "app")
            .with_attribute("class", "container dark")
            .with_rect(LayoutRect::new(0, 0, 1280, 400)),
    );
    session.insert(NodeRef(7), NodeData::text("welcome back").under(NodeRef(6)));
}

#[test]
fn full_page_round_trips() {
    let (mut session, sink) = capture_session();
    build_page(&mut session);
    session.flush();

    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 1);
    let decoded = decode_batch(&payloads[0], session.dedup());
    assert_trees_match(session.store(), &decoded.tree);

    // Kind-specific details survive the sentinel mapping.
    let doctype = decoded.tree.get(1).unwrap();
    assert_eq!(doctype.tag, "html");
    let script = decoded.tree.get(4).unwrap();
    assert_eq!(script.tag, "script");
    assert_eq!(script.dom_type, Some(1));
}

#[test]
fn incremental_batches_replay_into_the_same_tree() {
    let (mut session, sink) = capture_session();
    build_page(&mut session);
    session.flush();

    // Second wave: attribute change, text change, a new node spliced
    // before an existing sibling, and a removed subtree.
    session.update(
        NodeRef(6),
        NodeData::default().with_attribute("class", "container light"),
    );
    session.update(NodeRef(7), NodeData::text("welcome"));
    session.insert(
        NodeRef(8),
        NodeData::element("nav").under(NodeRef(5)).before(NodeRef(6)),
    );
    session.remove(NodeRef(3));
    session.flush();

    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 2);
    let mut reconstructor = Reconstructor::new();
    reconstructor.apply_batch(&payloads[0], session.dedup());
    reconstructor.apply_batch(&payloads[1], session.dedup());
    assert_trees_match(session.store(), reconstructor.tree());

    let body = reconstructor.tree().get(5).unwrap();
    let nav = session.store().lookup(NodeRef(8)).unwrap();
    assert_eq!(body.children.first(), Some(&nav));
}

#[test]
fn identical_siblings_deduplicate_and_still_decode() {
    let (mut session, sink) = capture_session();
    session.insert(NodeRef(1), NodeData::element("ul"));
    for host in 2..=5u64 {
        session.insert(
            NodeRef(host),
            NodeData::element("li")
                .under(NodeRef(1))
                .with_attribute("class", "item selected highlighted"),
        );
    }
    session.flush();

    let payloads = sink.payloads();
    let decoded = decode_batch(&payloads[0], session.dedup());
    assert_trees_match(session.store(), &decoded.tree);
    for id in 2..=5u32 {
        assert_eq!(
            decoded.tree.get(id).unwrap().attributes.get("class").unwrap(),
            "item selected highlighted"
        );
    }
}

#[test]
fn masked_text_ships_only_a_fingerprint() {
    let (mut session, sink) = capture_session();
    session.insert(NodeRef(1), NodeData::element("form"));
    session.insert(
        NodeRef(2),
        NodeData::text("4111 1111 1111 1111")
            .under(NodeRef(1))
            .with_masked(true),
    );
    session.flush();

    let payload = &sink.payloads()[0];
    let json = compress::decompress(Some(payload)).unwrap();
    assert!(!json.contains("4111"), "masked content leaked: {json}");

    let decoded = decode_batch(payload, session.dedup());
    let text = decoded.tree.get(2).unwrap().text.clone().unwrap();
    assert!(text.starts_with('*'));
}

#[test]
fn insert_then_remove_scenario() {
    let (mut session, sink) = capture_session();
    session.insert(NodeRef(1), NodeData::element("div").with_attribute("id", "A"));
    session.insert(NodeRef(2), NodeData::text("hi").under(NodeRef(1)));
    session.flush();

    session.remove(NodeRef(1));
    session.flush();

    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 2);

    let first = decode_batch(&payloads[0], session.dedup());
    assert_eq!(first.tree.len(), 2);

    let mut reconstructor = Reconstructor::new();
    reconstructor.apply_batch(&payloads[0], session.dedup());
    reconstructor.apply_batch(&payloads[1], session.dedup());
    assert!(reconstructor.tree().is_empty());
    assert!(session.store().active_nodes().next().is_none());
}

#[test]
fn compression_round_trips_printable_ascii() {
    let samples = [
        "",
        "a",
        "hello world",
        "aaaaaaaaaa",
        r#"[[0,1,0,0,0,1,0,0,"div","id=app"],[1,1,0,0,0,1,-1,0,"*TXT*","hi"]]"#,
        "the quick brown fox jumps over the lazy dog, the quick brown fox",
    ];
    for sample in samples {
        let packed = compress::compress(Some(sample));
        assert_eq!(
            compress::decompress(Some(&packed)).as_deref(),
            Some(sample),
            "sample {sample:?}"
        );
    }
}
