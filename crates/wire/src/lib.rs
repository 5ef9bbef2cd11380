//! Incremental capture wire protocol.
//!
//! Turns a stream of shadow-tree mutations and discrete UI events into
//! compact compressed upload batches, and turns those batches back
//! into a replayable tree.
//!
//! ## Pipeline
//!
//! ```text
//! capture:  NodeStore ──take_dirty──▶ TokenEncoder ─┐
//!           pointer/viewport/perf events ─ schema ──┼─▶ JSON ─▶ compress ─▶ sink
//!                                                   │
//! replay:   sink ─▶ decompress ─▶ JSON ─▶ Reconstructor ─▶ DecodedTree
//! ```
//!
//! The interesting parts: node ids travel as deltas against a running
//! accumulator, repeated metadata travels as content hashes or
//! positional back-references, every record is a flat positional
//! array, and the whole serialized batch goes through an LZ78-family
//! growing-dictionary codec before upload.
//!
//! Decoding is forgiving by construction: unknown discriminants skip a
//! record, corrupt compressed input decodes to nothing, and neither
//! ever panics.

pub mod compress;
pub mod decode;
pub mod encoder;
pub mod error;
pub mod hash;
pub mod schema;
pub mod session;
pub mod token;

pub use decode::{decode_batch, DecodedNode, DecodedSession, DecodedTree, KeyResolver, Reconstructor};
pub use encoder::{DedupTable, TokenEncoder};
pub use error::{Result, WireError};
pub use schema::{
    Envelope, EventKind, InstrumentationReport, MutationRecord, NodeState, Payload,
    PerformanceTiming, PointerSample, Severity, ViewportSample,
};
pub use session::{CaptureSession, Clock, SessionConfig, StepResult, SystemClock, UploadSink};
pub use token::Token;
