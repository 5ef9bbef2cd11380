//! Shadow tree model for incremental capture.
//!
//! Tracks a live, constantly-mutating node tree on behalf of the wire
//! encoder: stable integer identity for opaque host references,
//! parent/sibling/children relationships in document order, a dirty
//! queue consumed batch by batch, and checkpoint/rollback that never
//! duplicates the full tree.
//!
//! ## Core design
//!
//! ```text
//! change source → NodeStore (ids, links, dirty flags) → take_dirty()
//!                      ↓
//!               undo journal (checkpoint/rollback)
//! ```

pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::NodeStore;
pub use types::{LayoutRect, Node, NodeData, NodeId, NodeKind, NodeRef};
