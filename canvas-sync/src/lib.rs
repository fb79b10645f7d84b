//! State synchronization for a shared, live-edited canvas.
//!
//! - [`merge`]: last-writer-wins by `updatedAt` with tombstone precedence over
//!   six entity collections.
//! - [`solve`]: damped fixed-point search keeping `base + incoming <= 100`
//!   on the node/edge energy graph.
//! - [`DeliveryClient`]: one acknowledged patch per request id over a
//!   persistent connection, retried once.
//! - [`HistoryStack`] / [`Replica`]: local mutations with undo and redo.
//!
//! ```
//! use canvas_sync::{merge_and_solve, CanvasState, Edge, Node, Patch, ReplicaConfig};
//!
//! let mut patch = Patch::new();
//! patch
//!     .push(Node::new("a", "Research", 80.0))
//!     .push(Node::new("b", "Write-up", 90.0))
//!     .push(Edge::new("e1", "a", "b"));
//!
//! let merged = merge_and_solve(&CanvasState::new(), &patch, &ReplicaConfig::default());
//! // stored energy stays as authored; the correction is derived
//! assert_eq!(merged.state.get::<Node>("b").unwrap().energy, 90.0);
//! assert_eq!(merged.solution.base("b"), Some(20.0));
//! assert_eq!(merged.solution.effective("b"), Some(100.0));
//! ```

mod clock;
mod config;
pub mod delivery;
mod energy;
mod error;
mod history;
mod merge;
mod model;
mod patch;
mod replica;
mod session;
mod state;
mod sync;
mod tombstone;

pub use clock::{now_millis, Clock, ManualClock, SystemClock};
pub use config::{DeliveryConfig, ReplicaConfig, ENV_ACK_TIMEOUT_MS, ENV_CLIENT_ID, ENV_ENDPOINT};
pub use delivery::{DeliveryClient, Inbound, Receipt};
pub use energy::{clamp_energy, solve, Solution, DEFAULT_MAX_ITERATIONS};
pub use error::{Error, Result};
pub use history::{HistoryStack, Snapshot, DEFAULT_HISTORY_LIMIT};
pub use merge::{merge, MergeReport, TieBreakPolicy};
pub use model::{
    Attachment, Author, Comment, CommentTarget, Drawing, Edge, EdgeType, Entity, EntityKind, Layer, MediaRef,
    Node, NodeType, Point, TaskStatus, TextBox, Tool, DEFAULT_LAYER_ID, MAX_ENERGY,
};
pub use patch::Patch;
pub use replica::{NodeUpdate, Replica};
pub use session::{SessionSnapshot, SessionSource, StaticSource};
pub use state::{CanvasState, Collection, Stored};
pub use sync::{merge_and_solve, replay, solve_state, solved_view, Merged};
pub use tombstone::{deletion_timestamp, TombstoneMap, Tombstones};
