//! `canvas-live`: command-line front end for the canvas sync engine.
//!
//! ```text
//! canvas-live replay --state state.json patch-1.json patch-2.json
//! canvas-live send --session board-42 --token $TOKEN patch.json
//! ```

pub mod cli;
pub mod telemetry;

pub use canvas_sync;
