//! Positional schema codec.
//!
//! Every event variant maps to a flat array with fields at fixed
//! positions. Two rules keep the arrays both compact and unambiguous:
//! optional fields may be omitted only from the tail, and an absent
//! field in the middle of the list must be an explicit `null` so later
//! positions keep their offsets. Nested composites (node state, layout
//! rectangles, attribute lists) are themselves arrays following the
//! same rules, recursively.
//!
//! Decoding is strictly positional: the event kind (and, for tree
//! nodes, the tag sentinel at a fixed offset) selects the shape; value
//! types are never used to guess.

use crate::error::{Result, WireError};
use crate::hash;
use serde_json::Value;
use shadow::{LayoutRect, NodeId, NodeKind};
use std::collections::HashMap;

/// Reserved tag sentinels. They exist only on the wire; inside the
/// crates a [`NodeKind`] is carried instead.
pub const DOCTYPE_TAG: &str = "*DOC*";
pub const TEXT_TAG: &str = "*TXT*";
pub const IGNORED_TAG: &str = "*IGNORE*";

pub fn wire_tag<'a>(kind: NodeKind, tag: &'a str) -> &'a str {
    match kind {
        NodeKind::Element => tag,
        NodeKind::DocType => DOCTYPE_TAG,
        NodeKind::Text => TEXT_TAG,
        NodeKind::Ignored => IGNORED_TAG,
    }
}

pub fn kind_for_tag(tag: &str) -> NodeKind {
    match tag {
        DOCTYPE_TAG => NodeKind::DocType,
        TEXT_TAG => NodeKind::Text,
        IGNORED_TAG => NodeKind::Ignored,
        _ => NodeKind::Element,
    }
}

/// Event categories with their numeric wire discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    Mutation = 1,
    Pointer = 2,
    Viewport = 3,
    Performance = 4,
    Instrumentation = 5,
}

impl EventKind {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            1 => Some(EventKind::Mutation),
            2 => Some(EventKind::Pointer),
            3 => Some(EventKind::Viewport),
            4 => Some(EventKind::Performance),
            5 => Some(EventKind::Instrumentation),
            _ => None,
        }
    }
}

/// Mutation sub-operations. `Upsert` carries the token-grammar stream
/// from the incremental encoder; the rest are discrete leaf payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MutationOp {
    Upsert = 0,
    Remove = 1,
    Move = 2,
    Attribute = 3,
    CharacterData = 4,
    Scroll = 5,
    Input = 6,
    Insert = 7,
}

impl MutationOp {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(MutationOp::Upsert),
            1 => Some(MutationOp::Remove),
            2 => Some(MutationOp::Move),
            3 => Some(MutationOp::Attribute),
            4 => Some(MutationOp::CharacterData),
            5 => Some(MutationOp::Scroll),
            6 => Some(MutationOp::Input),
            7 => Some(MutationOp::Insert),
            _ => None,
        }
    }
}

/// Pointer sample. Always emitted in full; no optional tail.
/// Positions: `[index, pointer_type, pointer_id, x, y, width, height,
/// pressure, tilt_x, tilt_y, target, buttons]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerSample {
    pub index: u32,
    pub pointer_type: u8,
    pub pointer_id: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub pressure: f64,
    pub tilt_x: i32,
    pub tilt_y: i32,
    pub target: NodeId,
    pub buttons: u32,
}

/// Viewport sample: `[scroll_x, scroll_y, width, height,
/// page_width?, page_height?]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewportSample {
    pub scroll_x: i32,
    pub scroll_y: i32,
    pub width: u32,
    pub height: u32,
    pub page_width: Option<u32>,
    pub page_height: Option<u32>,
}

/// Performance timing: `[name, start, duration, detail?]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceTiming {
    pub name: String,
    pub start: u64,
    pub duration: u64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Error = 2,
}

impl Severity {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Severity::Info),
            1 => Some(Severity::Warning),
            2 => Some(Severity::Error),
            _ => None,
        }
    }
}

/// Instrumentation report: `[code, severity, message?, count?]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationReport {
    pub code: u32,
    pub severity: Severity,
    pub message: Option<String>,
    pub count: Option<u64>,
}

/// Full node state, the nested composite used by discrete inserts:
/// `[index, parent, previous, next, tag, ...tail]` where the tag
/// sentinel selects the tail shape: doctype `[attributes]`, text
/// `[content]`, ignored `[node_type, element_tag]`, element
/// `[attributes, layout?]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeState {
    pub index: NodeId,
    pub parent: Option<NodeId>,
    pub previous: Option<NodeId>,
    pub next: Option<NodeId>,
    pub kind: NodeKind,
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub text: Option<String>,
    pub rect: Option<LayoutRect>,
    pub dom_type: Option<u32>,
}

/// One tree-mutation record.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationRecord {
    /// Token-grammar stream for one dirty node (decoded by the
    /// reconstructor, not positionally).
    Upsert(Vec<Value>),
    Remove,
    Move {
        parent: Option<NodeId>,
        next: Option<NodeId>,
    },
    /// `value: None` means the attribute was removed, encoded as an
    /// explicit `null` since nothing may vanish from the middle.
    Attribute {
        name: String,
        value: Option<String>,
    },
    CharacterData {
        text: String,
    },
    Scroll {
        x: i32,
        y: i32,
    },
    Input {
        value: String,
    },
    Insert(NodeState),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Mutation(MutationRecord),
    Pointer(PointerSample),
    Viewport(ViewportSample),
    Performance(PerformanceTiming),
    Instrumentation(InstrumentationReport),
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::Mutation(_) => EventKind::Mutation,
            Payload::Pointer(_) => EventKind::Pointer,
            Payload::Viewport(_) => EventKind::Viewport,
            Payload::Performance(_) => EventKind::Performance,
            Payload::Instrumentation(_) => EventKind::Instrumentation,
        }
    }
}

/// One record of the batch envelope:
/// `[sequence, kind, id, time, ...payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sequence: u64,
    pub id: u64,
    pub time: u64,
    pub payload: Payload,
}

/// Render an envelope to its wire array.
pub fn encode_record(envelope: &Envelope) -> Value {
    let mut fields = vec![
        Value::from(envelope.sequence),
        Value::from(envelope.payload.kind() as u64),
        Value::from(envelope.id),
        Value::from(envelope.time),
    ];
    fields.extend(encode_payload(&envelope.payload));
    Value::Array(fields)
}

/// Parse one wire array back into an envelope.
pub fn decode_record(value: &Value) -> Result<Envelope> {
    let fields = match value {
        Value::Array(fields) => fields,
        _ => return Err(WireError::TypeMismatch(0)),
    };
    if fields.len() < 4 {
        return Err(WireError::TruncatedRecord {
            expected: 4,
            got: fields.len(),
        });
    }
    let sequence = req_u64(fields, 0)?;
    let kind_code = req_u64(fields, 1)?;
    let kind = EventKind::from_u64(kind_code).ok_or(WireError::UnknownEventKind(kind_code))?;
    let id = req_u64(fields, 2)?;
    let time = req_u64(fields, 3)?;
    let payload = decode_payload(kind, &fields[4..])?;
    Ok(Envelope {
        sequence,
        id,
        time,
        payload,
    })
}

pub fn encode_payload(payload: &Payload) -> Vec<Value> {
    match payload {
        Payload::Pointer(sample) => vec![
            Value::from(sample.index),
            Value::from(sample.pointer_type),
            Value::from(sample.pointer_id),
            Value::from(sample.x),
            Value::from(sample.y),
            Value::from(sample.width),
            Value::from(sample.height),
            Value::from(sample.pressure),
            Value::from(sample.tilt_x),
            Value::from(sample.tilt_y),
            Value::from(sample.target),
            Value::from(sample.buttons),
        ],
        Payload::Viewport(sample) => positional(vec![
            Some(Value::from(sample.scroll_x)),
            Some(Value::from(sample.scroll_y)),
            Some(Value::from(sample.width)),
            Some(Value::from(sample.height)),
            sample.page_width.map(Value::from),
            sample.page_height.map(Value::from),
        ]),
        Payload::Performance(timing) => positional(vec![
            Some(Value::from(timing.name.clone())),
            Some(Value::from(timing.start)),
            Some(Value::from(timing.duration)),
            timing.detail.clone().map(Value::from),
        ]),
        Payload::Instrumentation(report) => positional(vec![
            Some(Value::from(report.code)),
            Some(Value::from(report.severity as u64)),
            report.message.clone().map(Value::from),
            report.count.map(Value::from),
        ]),
        Payload::Mutation(record) => encode_mutation(record),
    }
}

pub fn decode_payload(kind: EventKind, fields: &[Value]) -> Result<Payload> {
    match kind {
        EventKind::Pointer => Ok(Payload::Pointer(PointerSample {
            index: req_u64(fields, 0)? as u32,
            pointer_type: req_u64(fields, 1)? as u8,
            pointer_id: req_u64(fields, 2)? as u32,
            x: req_i64(fields, 3)? as i32,
            y: req_i64(fields, 4)? as i32,
            width: req_i64(fields, 5)? as i32,
            height: req_i64(fields, 6)? as i32,
            pressure: req_f64(fields, 7)?,
            tilt_x: req_i64(fields, 8)? as i32,
            tilt_y: req_i64(fields, 9)? as i32,
            target: req_u64(fields, 10)? as NodeId,
            buttons: req_u64(fields, 11)? as u32,
        })),
        EventKind::Viewport => Ok(Payload::Viewport(ViewportSample {
            scroll_x: req_i64(fields, 0)? as i32,
            scroll_y: req_i64(fields, 1)? as i32,
            width: req_u64(fields, 2)? as u32,
            height: req_u64(fields, 3)? as u32,
            page_width: opt_u64(fields, 4)?.map(|v| v as u32),
            page_height: opt_u64(fields, 5)?.map(|v| v as u32),
        })),
        EventKind::Performance => Ok(Payload::Performance(PerformanceTiming {
            name: req_str(fields, 0)?.to_string(),
            start: req_u64(fields, 1)?,
            duration: req_u64(fields, 2)?,
            detail: opt_str(fields, 3)?.map(str::to_string),
        })),
        EventKind::Instrumentation => {
            let severity_code = req_u64(fields, 1)?;
            Ok(Payload::Instrumentation(InstrumentationReport {
                code: req_u64(fields, 0)? as u32,
                severity: Severity::from_u64(severity_code)
                    .ok_or(WireError::TypeMismatch(1))?,
                message: opt_str(fields, 2)?.map(str::to_string),
                count: opt_u64(fields, 3)?,
            }))
        }
        EventKind::Mutation => Ok(Payload::Mutation(decode_mutation(fields)?)),
    }
}

fn encode_mutation(record: &MutationRecord) -> Vec<Value> {
    match record {
        MutationRecord::Upsert(tokens) => {
            let mut fields = vec![Value::from(MutationOp::Upsert as u64)];
            fields.extend(tokens.iter().cloned());
            fields
        }
        MutationRecord::Remove => vec![Value::from(MutationOp::Remove as u64)],
        MutationRecord::Move { parent, next } => positional(vec![
            Some(Value::from(MutationOp::Move as u64)),
            parent.map(Value::from),
            next.map(Value::from),
        ]),
        MutationRecord::Attribute { name, value } => vec![
            Value::from(MutationOp::Attribute as u64),
            Value::from(name.clone()),
            value.clone().map(Value::from).unwrap_or(Value::Null),
        ],
        MutationRecord::CharacterData { text } => vec![
            Value::from(MutationOp::CharacterData as u64),
            Value::from(text.clone()),
        ],
        MutationRecord::Scroll { x, y } => vec![
            Value::from(MutationOp::Scroll as u64),
            Value::from(*x),
            Value::from(*y),
        ],
        MutationRecord::Input { value } => vec![
            Value::from(MutationOp::Input as u64),
            Value::from(value.clone()),
        ],
        MutationRecord::Insert(state) => vec![
            Value::from(MutationOp::Insert as u64),
            Value::Array(encode_node_state(state)),
        ],
    }
}

fn decode_mutation(fields: &[Value]) -> Result<MutationRecord> {
    let op_code = req_u64(fields, 0)?;
    let op = MutationOp::from_u64(op_code).ok_or(WireError::UnknownMutationOp(op_code))?;
    match op {
        MutationOp::Upsert => Ok(MutationRecord::Upsert(fields[1..].to_vec())),
        MutationOp::Remove => Ok(MutationRecord::Remove),
        MutationOp::Move => Ok(MutationRecord::Move {
            parent: opt_u64(fields, 1)?.map(|v| v as NodeId),
            next: opt_u64(fields, 2)?.map(|v| v as NodeId),
        }),
        MutationOp::Attribute => Ok(MutationRecord::Attribute {
            name: req_str(fields, 1)?.to_string(),
            value: opt_str(fields, 2)?.map(str::to_string),
        }),
        MutationOp::CharacterData => Ok(MutationRecord::CharacterData {
            text: req_str(fields, 1)?.to_string(),
        }),
        MutationOp::Scroll => Ok(MutationRecord::Scroll {
            x: req_i64(fields, 1)? as i32,
            y: req_i64(fields, 2)? as i32,
        }),
        MutationOp::Input => Ok(MutationRecord::Input {
            value: req_str(fields, 1)?.to_string(),
        }),
        MutationOp::Insert => {
            let nested = match fields.get(1) {
                Some(Value::Array(items)) => items,
                _ => return Err(WireError::TypeMismatch(1)),
            };
            Ok(MutationRecord::Insert(decode_node_state(nested)?))
        }
    }
}

/// Render full node state as its positional array.
pub fn encode_node_state(state: &NodeState) -> Vec<Value> {
    let mut fields = vec![
        Value::from(state.index),
        state.parent.map(Value::from).unwrap_or(Value::Null),
        state.previous.map(Value::from).unwrap_or(Value::Null),
        state.next.map(Value::from).unwrap_or(Value::Null),
        Value::from(wire_tag(state.kind, &state.tag)),
    ];
    match state.kind {
        NodeKind::DocType => {
            // The pinned doctype tail is `[attributes]`; the name rides
            // along under the reserved `name` key.
            let mut attributes = state.attributes.clone();
            if !state.tag.is_empty() {
                attributes.insert("name".to_string(), state.tag.clone());
            }
            fields.push(attribute_array(&attributes));
        }
        NodeKind::Text => {
            fields.push(Value::from(state.text.clone().unwrap_or_default()));
        }
        NodeKind::Ignored => {
            fields.push(Value::from(state.dom_type.unwrap_or(0)));
            fields.push(Value::from(state.tag.clone()));
        }
        NodeKind::Element => {
            fields.push(attribute_array(&state.attributes));
            if let Some(rect) = &state.rect {
                fields.push(rect_array(rect));
            }
        }
    }
    fields
}

/// Parse a positional node-state array; the tag at offset 4 selects
/// the tail shape.
pub fn decode_node_state(fields: &[Value]) -> Result<NodeState> {
    let tag = req_str(fields, 4)?;
    let kind = kind_for_tag(tag);
    let mut state = NodeState {
        index: req_u64(fields, 0)? as NodeId,
        parent: opt_u64(fields, 1)?.map(|v| v as NodeId),
        previous: opt_u64(fields, 2)?.map(|v| v as NodeId),
        next: opt_u64(fields, 3)?.map(|v| v as NodeId),
        kind,
        tag: if kind == NodeKind::Element {
            tag.to_string()
        } else {
            String::new()
        },
        ..NodeState::default()
    };
    match kind {
        NodeKind::DocType => {
            state.attributes = parse_attribute_array(fields.get(5), 5)?;
            if let Some(name) = state.attributes.remove("name") {
                state.tag = name;
            }
        }
        NodeKind::Text => {
            state.text = Some(req_str(fields, 5)?.to_string());
        }
        NodeKind::Ignored => {
            state.dom_type = Some(req_u64(fields, 5)? as u32);
            state.tag = req_str(fields, 6)?.to_string();
        }
        NodeKind::Element => {
            state.attributes = parse_attribute_array(fields.get(5), 5)?;
            if let Some(Value::Array(parts)) = fields.get(6) {
                state.rect = Some(parse_rect_array(parts, 6)?);
            }
        }
    }
    Ok(state)
}

/// Sorted `key=value` attribute strings. Sorting makes the encoding
/// deterministic, which the content-addressed dedup relies on.
pub fn attribute_pairs(attributes: &HashMap<String, String>) -> Vec<String> {
    let mut pairs: Vec<String> = attributes
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    pairs.sort();
    pairs
}

pub fn parse_attribute_pair(pair: &str) -> Option<(&str, &str)> {
    pair.split_once('=')
}

/// Layout quad as base-36 fields joined by `*`: 4 fields, or 6 with
/// scroll offsets.
pub fn layout_token(rect: &LayoutRect) -> String {
    let mut parts = vec![
        hash::to_base36(i64::from(rect.x)),
        hash::to_base36(i64::from(rect.y)),
        hash::to_base36(i64::from(rect.width)),
        hash::to_base36(i64::from(rect.height)),
    ];
    if let (Some(scroll_x), Some(scroll_y)) = (rect.scroll_x, rect.scroll_y) {
        parts.push(hash::to_base36(i64::from(scroll_x)));
        parts.push(hash::to_base36(i64::from(scroll_y)));
    }
    parts.join("*")
}

pub fn parse_layout_token(token: &str) -> Option<LayoutRect> {
    let parts: Vec<i64> = token
        .split('*')
        .map(hash::from_base36)
        .collect::<Option<Vec<i64>>>()?;
    match parts.as_slice() {
        [x, y, w, h] => Some(LayoutRect::new(*x as i32, *y as i32, *w as i32, *h as i32)),
        [x, y, w, h, sx, sy] => Some(
            LayoutRect::new(*x as i32, *y as i32, *w as i32, *h as i32)
                .with_scroll(*sx as i32, *sy as i32),
        ),
        _ => None,
    }
}

fn attribute_array(attributes: &HashMap<String, String>) -> Value {
    Value::Array(
        attribute_pairs(attributes)
            .into_iter()
            .map(Value::from)
            .collect(),
    )
}

fn parse_attribute_array(
    value: Option<&Value>,
    position: usize,
) -> Result<HashMap<String, String>> {
    let items = match value {
        Some(Value::Array(items)) => items,
        _ => return Err(WireError::TypeMismatch(position)),
    };
    let mut attributes = HashMap::with_capacity(items.len());
    for item in items {
        let pair = item.as_str().ok_or(WireError::TypeMismatch(position))?;
        if let Some((key, val)) = parse_attribute_pair(pair) {
            attributes.insert(key.to_string(), val.to_string());
        }
    }
    Ok(attributes)
}

fn rect_array(rect: &LayoutRect) -> Value {
    let mut parts = vec![
        Value::from(rect.x),
        Value::from(rect.y),
        Value::from(rect.width),
        Value::from(rect.height),
    ];
    if let (Some(scroll_x), Some(scroll_y)) = (rect.scroll_x, rect.scroll_y) {
        parts.push(Value::from(scroll_x));
        parts.push(Value::from(scroll_y));
    }
    Value::Array(parts)
}

fn parse_rect_array(parts: &[Value], position: usize) -> Result<LayoutRect> {
    let numbers: Vec<i32> = parts
        .iter()
        .map(|v| v.as_i64().map(|n| n as i32))
        .collect::<Option<Vec<i32>>>()
        .ok_or(WireError::TypeMismatch(position))?;
    match numbers.as_slice() {
        [x, y, w, h] => Ok(LayoutRect::new(*x, *y, *w, *h)),
        [x, y, w, h, sx, sy] => Ok(LayoutRect::new(*x, *y, *w, *h).with_scroll(*sx, *sy)),
        _ => Err(WireError::TypeMismatch(position)),
    }
}

/// Trim trailing absent fields, keep interior gaps as explicit nulls.
fn positional(fields: Vec<Option<Value>>) -> Vec<Value> {
    let mut keep = fields.len();
    while keep > 0 && fields[keep - 1].is_none() {
        keep -= 1;
    }
    fields
        .into_iter()
        .take(keep)
        .map(|field| field.unwrap_or(Value::Null))
        .collect()
}

fn req_u64(fields: &[Value], position: usize) -> Result<u64> {
    match fields.get(position) {
        Some(value) => value.as_u64().ok_or(WireError::TypeMismatch(position)),
        None => Err(WireError::TruncatedRecord {
            expected: position + 1,
            got: fields.len(),
        }),
    }
}

fn req_i64(fields: &[Value], position: usize) -> Result<i64> {
    match fields.get(position) {
        Some(value) => value.as_i64().ok_or(WireError::TypeMismatch(position)),
        None => Err(WireError::TruncatedRecord {
            expected: position + 1,
            got: fields.len(),
        }),
    }
}

fn req_f64(fields: &[Value], position: usize) -> Result<f64> {
    match fields.get(position) {
        Some(value) => value.as_f64().ok_or(WireError::TypeMismatch(position)),
        None => Err(WireError::TruncatedRecord {
            expected: position + 1,
            got: fields.len(),
        }),
    }
}

fn req_str<'a>(fields: &'a [Value], position: usize) -> Result<&'a str> {
    match fields.get(position) {
        Some(value) => value.as_str().ok_or(WireError::TypeMismatch(position)),
        None => Err(WireError::TruncatedRecord {
            expected: position + 1,
            got: fields.len(),
        }),
    }
}

/// Absent (past the tail) and explicit `null` both read as `None`.
fn opt_u64(fields: &[Value], position: usize) -> Result<Option<u64>> {
    match fields.get(position) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or(WireError::TypeMismatch(position)),
    }
}

fn opt_str<'a>(fields: &'a [Value], position: usize) -> Result<Option<&'a str>> {
    match fields.get(position) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or(WireError::TypeMismatch(position)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(envelope: Envelope) {
        let wire = encode_record(&envelope);
        let decoded = decode_record(&wire).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_pointer_sample_is_always_full() {
        let envelope = Envelope {
            sequence: 3,
            id: 0,
            time: 1234,
            payload: Payload::Pointer(PointerSample {
                index: 1,
                pointer_type: 2,
                pointer_id: 5,
                x: -4,
                y: 9,
                width: 1,
                height: 1,
                pressure: 0.5,
                tilt_x: 0,
                tilt_y: 0,
                target: 12,
                buttons: 1,
            }),
        };
        let wire = encode_record(&envelope);
        assert_eq!(wire.as_array().unwrap().len(), 4 + 12);
        round_trip(envelope);
    }

    #[test]
    fn test_viewport_trailing_optionals_are_trimmed() {
        let payload = Payload::Viewport(ViewportSample {
            scroll_x: 0,
            scroll_y: 120,
            width: 800,
            height: 600,
            page_width: None,
            page_height: None,
        });
        let fields = encode_payload(&payload);
        assert_eq!(fields.len(), 4);
        round_trip(Envelope {
            sequence: 0,
            id: 0,
            time: 1,
            payload,
        });
    }

    #[test]
    fn test_mid_list_gap_is_preserved_as_null() {
        let payload = Payload::Viewport(ViewportSample {
            scroll_x: 0,
            scroll_y: 0,
            width: 800,
            height: 600,
            page_width: None,
            page_height: Some(4000),
        });
        let fields = encode_payload(&payload);
        assert_eq!(fields[4], Value::Null);
        assert_eq!(fields[5], json!(4000));
        round_trip(Envelope {
            sequence: 1,
            id: 0,
            time: 1,
            payload,
        });
    }

    #[test]
    fn test_move_with_null_parent_keeps_next_position() {
        let payload = Payload::Mutation(MutationRecord::Move {
            parent: None,
            next: Some(8),
        });
        let fields = encode_payload(&payload);
        assert_eq!(fields, vec![json!(2), Value::Null, json!(8)]);
        round_trip(Envelope {
            sequence: 2,
            id: 7,
            time: 5,
            payload,
        });
    }

    #[test]
    fn test_attribute_removal_is_explicit_null() {
        let payload = Payload::Mutation(MutationRecord::Attribute {
            name: "class".into(),
            value: None,
        });
        let fields = encode_payload(&payload);
        assert_eq!(fields[2], Value::Null);
        round_trip(Envelope {
            sequence: 0,
            id: 3,
            time: 9,
            payload,
        });
    }

    #[test]
    fn test_node_state_tail_shapes() {
        let mut attributes = HashMap::new();
        attributes.insert("id".to_string(), "main".to_string());

        let element = NodeState {
            index: 5,
            parent: Some(1),
            previous: None,
            next: Some(6),
            kind: NodeKind::Element,
            tag: "div".into(),
            attributes: attributes.clone(),
            rect: Some(LayoutRect::new(0, 0, 100, 50)),
            ..NodeState::default()
        };
        let fields = encode_node_state(&element);
        assert_eq!(fields[2], Value::Null);
        assert_eq!(fields[4], json!("div"));
        assert_eq!(decode_node_state(&fields).unwrap(), element);

        let text = NodeState {
            index: 6,
            parent: Some(5),
            kind: NodeKind::Text,
            text: Some("hi".into()),
            ..NodeState::default()
        };
        let fields = encode_node_state(&text);
        assert_eq!(fields[4], json!(TEXT_TAG));
        assert_eq!(decode_node_state(&fields).unwrap(), text);

        let ignored = NodeState {
            index: 7,
            parent: Some(1),
            kind: NodeKind::Ignored,
            tag: "script".into(),
            dom_type: Some(1),
            ..NodeState::default()
        };
        let fields = encode_node_state(&ignored);
        assert_eq!(fields[4], json!(IGNORED_TAG));
        assert_eq!(decode_node_state(&fields).unwrap(), ignored);

        let doctype = NodeState {
            index: 1,
            kind: NodeKind::DocType,
            attributes,
            ..NodeState::default()
        };
        let fields = encode_node_state(&doctype);
        assert_eq!(fields[4], json!(DOCTYPE_TAG));
        assert_eq!(decode_node_state(&fields).unwrap(), doctype);
    }

    #[test]
    fn test_named_doctype_state_round_trips() {
        let doctype = NodeState {
            index: 1,
            kind: NodeKind::DocType,
            tag: "html".into(),
            ..NodeState::default()
        };
        let fields = encode_node_state(&doctype);
        assert_eq!(fields[5], json!(["name=html"]));
        assert_eq!(decode_node_state(&fields).unwrap(), doctype);
    }

    #[test]
    fn test_unknown_event_kind_is_reported_not_fatal() {
        let wire = json!([0, 99, 0, 0, "x"]);
        match decode_record(&wire) {
            Err(WireError::UnknownEventKind(99)) => {}
            other => panic!("expected UnknownEventKind, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_mutation_op_is_reported() {
        let wire = json!([0, 1, 4, 0, 42]);
        match decode_record(&wire) {
            Err(WireError::UnknownMutationOp(42)) => {}
            other => panic!("expected UnknownMutationOp, got {other:?}"),
        }
    }

    #[test]
    fn test_layout_token_round_trip() {
        let rect = LayoutRect::new(-12, 40, 1280, 720).with_scroll(0, 300);
        let token = layout_token(&rect);
        assert_eq!(token.split('*').count(), 6);
        assert_eq!(parse_layout_token(&token), Some(rect));

        let plain = LayoutRect::new(1, 2, 3, 4);
        assert_eq!(parse_layout_token(&layout_token(&plain)), Some(plain));
        assert_eq!(parse_layout_token("k=v"), None);
        assert_eq!(parse_layout_token("1*2*3"), None);
    }
}
