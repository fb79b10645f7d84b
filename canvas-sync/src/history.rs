//! Bounded undo/redo over whole-state snapshots.
//!
//! A snapshot is a [`CanvasState`] clone. Collections are copy-on-write, so
//! holding one costs a handful of reference counts and later edits never
//! reach into it.

use std::collections::VecDeque;

use crate::state::CanvasState;

pub const DEFAULT_HISTORY_LIMIT: usize = 60;

pub type Snapshot = CanvasState;

#[derive(Debug, Clone)]
pub struct HistoryStack {
    past: VecDeque<Snapshot>,
    future: Vec<Snapshot>,
    limit: usize,
}

impl HistoryStack {
    pub fn new(limit: usize) -> Self {
        Self { past: VecDeque::new(), future: Vec::new(), limit: limit.max(1) }
    }

    /// Records the pre-mutation state. Drops the oldest entry past the limit
    /// and clears redo: history does not branch.
    pub fn push(&mut self, snapshot: Snapshot) {
        if self.past.len() == self.limit {
            self.past.pop_front();
        }
        self.past.push_back(snapshot);
        self.future.clear();
    }

    /// Pops the latest snapshot; `current` moves to the redo side.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let previous = self.past.pop_back()?;
        self.future.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.future.pop()?;
        if self.past.len() == self.limit {
            self.past.pop_front();
        }
        self.past.push_back(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.future.len()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
