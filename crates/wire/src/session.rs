//! Capture session: one shadow store, one encode pipeline, one sink.
//!
//! Everything runs on the caller's single logical task. Change
//! notifications mutate the store synchronously; encoding a batch is
//! the one long-running operation, so it is a resumable step function:
//! `begin_batch()` captures the dirty snapshot, `step()` encodes nodes
//! until the long-task budget elapses and then yields back to the
//! host. Mutations arriving while a batch is suspended simply dirty
//! the store again and form the next batch.
//!
//! Checkpointing and encoding must not interleave; that sequencing is
//! asserted, not locked, because there is no second thread to lock
//! against.

use crate::compress;
use crate::encoder::{DedupTable, TokenEncoder};
use crate::error::WireError;
use crate::schema::{
    self, Envelope, InstrumentationReport, MutationRecord, Payload, PerformanceTiming,
    PointerSample, Severity, ViewportSample,
};
use serde_json::Value;
use shadow::{Node, NodeData, NodeRef, NodeStore};
use tracing::{debug, warn};
use uuid::Uuid;

/// Diagnostic code for a record dropped over the size ceiling.
pub const OVERSIZED_RECORD_CODE: u32 = 1;

/// Millisecond wall clock, host-supplied so tests can drive time.
pub trait Clock {
    fn now(&self) -> u64;
}

/// Default clock: milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Receives each finished batch as one compressed string. Transport,
/// retry and batching policy live behind this seam.
pub trait UploadSink {
    fn deliver(&mut self, session_id: &str, payload: &str);
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stable identity for the whole capture, sent with every upload.
    pub id: String,
    /// Encode-step budget; `step()` yields once it is exceeded.
    pub long_task_budget_ms: u64,
    /// Serialized-size ceiling per record.
    pub max_record_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            long_task_budget_ms: 30,
            max_record_bytes: 64 * 1024,
        }
    }
}

/// Outcome of one `step()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Budget exhausted with nodes still pending; call `step()` again.
    Yielded,
    /// No batch in flight (finished or never started).
    Done,
}

struct Batch {
    nodes: Vec<Node>,
    cursor: usize,
    encoder: TokenEncoder,
    records: Vec<Envelope>,
}

/// A queued non-tree event. Timestamped at enqueue, sequenced at batch
/// assembly so tree records always replay first.
struct Pending {
    id: u64,
    time: u64,
    payload: Payload,
}

/// An independent capture session owning its store and encode state.
pub struct CaptureSession<C: Clock, S: UploadSink> {
    config: SessionConfig,
    clock: C,
    sink: S,
    store: NodeStore,
    dedup: DedupTable,
    sequence: u64,
    queued: Vec<Pending>,
    batch: Option<Batch>,
}

impl<S: UploadSink> CaptureSession<SystemClock, S> {
    pub fn with_defaults(sink: S) -> Self {
        Self::new(SessionConfig::default(), SystemClock, sink)
    }
}

impl<C: Clock, S: UploadSink> CaptureSession<C, S> {
    pub fn new(config: SessionConfig, clock: C, sink: S) -> Self {
        Self {
            config,
            clock,
            sink,
            store: NodeStore::new(),
            dedup: DedupTable::new(),
            sequence: 0,
            queued: Vec::new(),
            batch: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// The dedup table doubles as the key resolver for decoding what
    /// this session encoded.
    pub fn dedup(&self) -> &DedupTable {
        &self.dedup
    }

    // Change-source entry points. Insert and update share upsert
    // semantics; the store works out which one it is.

    pub fn insert(&mut self, node: NodeRef, data: NodeData) {
        self.store.upsert(node, data);
    }

    pub fn update(&mut self, node: NodeRef, data: NodeData) {
        self.store.upsert(node, data);
    }

    pub fn remove(&mut self, node: NodeRef) {
        self.store.remove(node);
    }

    // Non-tree event intake. Queued records ride the next finished
    // batch with their enqueue-time timestamp and sequence number.

    pub fn record_pointer(&mut self, sample: PointerSample) {
        let id = u64::from(sample.target);
        self.queue(id, Payload::Pointer(sample));
    }

    pub fn record_viewport(&mut self, sample: ViewportSample) {
        self.queue(0, Payload::Viewport(sample));
    }

    pub fn record_performance(&mut self, timing: PerformanceTiming) {
        self.queue(0, Payload::Performance(timing));
    }

    pub fn record_instrumentation(&mut self, report: InstrumentationReport) {
        self.queue(0, Payload::Instrumentation(report));
    }

    pub fn record_scroll(&mut self, node: NodeRef, x: i32, y: i32) {
        match self.store.lookup(node) {
            Some(id) => self.queue(
                u64::from(id),
                Payload::Mutation(MutationRecord::Scroll { x, y }),
            ),
            None => warn!("scroll on untracked node, dropped"),
        }
    }

    pub fn record_input(&mut self, node: NodeRef, value: impl Into<String>) {
        match self.store.lookup(node) {
            Some(id) => self.queue(
                u64::from(id),
                Payload::Mutation(MutationRecord::Input {
                    value: value.into(),
                }),
            ),
            None => warn!("input on untracked node, dropped"),
        }
    }

    fn queue(&mut self, id: u64, payload: Payload) {
        let pending = Pending {
            id,
            time: self.clock.now(),
            payload,
        };
        self.queued.push(pending);
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        sequence
    }

    // Checkpointing. Must be sequenced strictly around batches.

    pub fn snapshot(&mut self) {
        assert!(
            self.batch.is_none(),
            "snapshot must not overlap an in-progress encode"
        );
        self.store.snapshot();
    }

    pub fn restore(&mut self) {
        assert!(
            self.batch.is_none(),
            "restore must not overlap an in-progress encode"
        );
        self.store.restore();
    }

    pub fn commit(&mut self) {
        self.store.commit();
    }

    /// Capture the dirty snapshot and open a batch. The snapshot is
    /// fixed here; later store mutations belong to the next batch.
    pub fn begin_batch(&mut self) {
        if self.batch.is_some() {
            warn!("batch already in progress, ignoring begin");
            return;
        }
        let nodes = self.store.take_dirty();
        debug!(nodes = nodes.len(), queued = self.queued.len(), "batch opened");
        self.batch = Some(Batch {
            nodes,
            cursor: 0,
            encoder: TokenEncoder::new(),
            records: Vec::new(),
        });
    }

    /// Encode pending nodes until the budget elapses. Returns
    /// [`StepResult::Yielded`] with work remaining, [`StepResult::Done`]
    /// once the batch (if any) has been assembled and delivered.
    pub fn step(&mut self) -> StepResult {
        let started = self.clock.now();
        loop {
            let Some(batch) = self.batch.as_mut() else {
                return StepResult::Done;
            };
            if batch.cursor >= batch.nodes.len() {
                break;
            }
            let Batch {
                nodes,
                cursor,
                encoder,
                records,
            } = batch;
            let node = &nodes[*cursor];
            *cursor += 1;

            let sequence = self.sequence;
            self.sequence += 1;
            let time = self.clock.now();
            if node.active {
                // Trial-encode on a scratch copy: a dropped record
                // must leave the stream state the decoder mirrors
                // (accumulator, back-reference positions) untouched.
                // The dedup table is content-addressed, so a stray
                // admission from a dropped record stays resolvable.
                let mut trial = encoder.clone();
                let tokens = match trial.encode_node(node, &mut self.dedup) {
                    Ok(tokens) => tokens,
                    Err(error) => {
                        warn!(%error, node = node.id, "node skipped");
                        continue;
                    }
                };
                let envelope = Envelope {
                    sequence,
                    id: 0,
                    time,
                    payload: Payload::Mutation(MutationRecord::Upsert(
                        tokens.iter().map(|token| token.to_value()).collect(),
                    )),
                };
                match Self::oversize_diagnostic(&self.config, &envelope) {
                    Some(diagnostic) => records.push(diagnostic),
                    None => {
                        *encoder = trial;
                        records.push(envelope);
                    }
                }
            } else {
                // Deactivated nodes encode as removals.
                let envelope = Envelope {
                    sequence,
                    id: u64::from(node.id),
                    time,
                    payload: Payload::Mutation(MutationRecord::Remove),
                };
                match Self::oversize_diagnostic(&self.config, &envelope) {
                    Some(diagnostic) => records.push(diagnostic),
                    None => records.push(envelope),
                }
            }

            if self.clock.now().saturating_sub(started) >= self.config.long_task_budget_ms {
                return StepResult::Yielded;
            }
        }
        self.finish_batch();
        StepResult::Done
    }

    /// Run a whole batch to completion in one call.
    pub fn flush(&mut self) {
        if self.batch.is_none() {
            self.begin_batch();
        }
        while self.step() == StepResult::Yielded {}
    }

    /// Abandon any in-flight batch, roll back to the last checkpoint
    /// if one is open, and hand the store back to the caller.
    pub fn teardown(mut self) -> NodeStore {
        if self.batch.take().is_some() && self.store.has_checkpoint() {
            self.store.restore();
        } else if self.store.has_checkpoint() {
            self.store.commit();
        }
        self.store
    }

    fn finish_batch(&mut self) {
        let Some(batch) = self.batch.take() else {
            return;
        };
        let mut records = batch.records;
        let pending: Vec<Pending> = self.queued.drain(..).collect();
        for event in pending {
            let envelope = Envelope {
                sequence: self.next_sequence(),
                id: event.id,
                time: event.time,
                payload: event.payload,
            };
            match Self::oversize_diagnostic(&self.config, &envelope) {
                Some(diagnostic) => records.push(diagnostic),
                None => records.push(envelope),
            }
        }
        if records.is_empty() {
            debug!("empty batch, nothing delivered");
            return;
        }
        let rendered: Vec<Value> = records.iter().map(schema::encode_record).collect();
        let json = Value::Array(rendered).to_string();
        let packed = compress::compress(Some(&json));
        debug!(
            records = records.len(),
            bytes = packed.len(),
            "batch delivered"
        );
        self.sink.deliver(&self.config.id, &packed);
    }

    /// Oversized records are dropped, but never silently: `Some` carries
    /// the diagnostic record that takes their place in the batch.
    fn oversize_diagnostic(config: &SessionConfig, envelope: &Envelope) -> Option<Envelope> {
        let size = schema::encode_record(envelope).to_string().len();
        if size <= config.max_record_bytes {
            return None;
        }
        let error = WireError::OversizedRecord {
            size,
            limit: config.max_record_bytes,
        };
        warn!(%error, sequence = envelope.sequence, "record dropped");
        Some(Envelope {
            sequence: envelope.sequence,
            id: envelope.id,
            time: envelope.time,
            payload: Payload::Instrumentation(InstrumentationReport {
                code: OVERSIZED_RECORD_CODE,
                severity: Severity::Warning,
                message: Some(format!("record dropped at {size} bytes")),
                count: Some(size as u64),
            }),
        })
    }
}
