use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::EntityKind;

/// id -> deletion timestamp (ms). Shared copy-on-write.
pub type TombstoneMap = Arc<BTreeMap<String, i64>>;

/// One tombstone map per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Tombstones {
    pub nodes: TombstoneMap,
    pub edges: TombstoneMap,
    pub drawings: TombstoneMap,
    pub text_boxes: TombstoneMap,
    pub comments: TombstoneMap,
    pub layers: TombstoneMap,
}

impl Tombstones {
    pub fn map(&self, kind: EntityKind) -> &TombstoneMap {
        match kind {
            EntityKind::Nodes => &self.nodes,
            EntityKind::Edges => &self.edges,
            EntityKind::Drawings => &self.drawings,
            EntityKind::TextBoxes => &self.text_boxes,
            EntityKind::Comments => &self.comments,
            EntityKind::Layers => &self.layers,
        }
    }

    pub(crate) fn map_mut(&mut self, kind: EntityKind) -> &mut TombstoneMap {
        match kind {
            EntityKind::Nodes => &mut self.nodes,
            EntityKind::Edges => &mut self.edges,
            EntityKind::Drawings => &mut self.drawings,
            EntityKind::TextBoxes => &mut self.text_boxes,
            EntityKind::Comments => &mut self.comments,
            EntityKind::Layers => &mut self.layers,
        }
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<i64> {
        self.map(kind).get(id).copied()
    }

    /// Records a tombstone unless an equal or later one is already present.
    /// Returns whether the map changed.
    pub fn insert(&mut self, kind: EntityKind, id: &str, ts: i64) -> bool {
        match self.get(kind, id) {
            Some(existing) if existing >= ts => false,
            _ => {
                Arc::make_mut(self.map_mut(kind)).insert(id.to_string(), ts);
                true
            }
        }
    }

    /// Whether a tombstone hides a version of `id` stamped `updated_at`.
    pub fn shadows(&self, kind: EntityKind, id: &str, updated_at: i64) -> bool {
        self.get(kind, id).is_some_and(|ts| ts >= updated_at)
    }

    pub fn len(&self) -> usize {
        EntityKind::ALL.iter().map(|k| self.map(*k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &str, i64)> + '_ {
        EntityKind::ALL.into_iter().flat_map(move |kind| {
            self.map(kind).iter().map(move |(id, ts)| (kind, id.as_str(), *ts))
        })
    }
}

/// Deletion timestamp for an entity last updated at `last_updated_at`.
///
/// Always strictly after the deleted version, so a stale copy of that version
/// can never outrank the tombstone.
pub fn deletion_timestamp(now: i64, last_updated_at: i64) -> i64 {
    now.max(last_updated_at.saturating_add(1))
}
