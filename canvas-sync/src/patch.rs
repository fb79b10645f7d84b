//! Patch wire shape and its lenient decoder.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::model::{Comment, Drawing, Edge, EntityKind, Layer, Node, TextBox};
use crate::state::Stored;
use crate::tombstone::Tombstones;

/// A bundle of upserted entities plus tombstones: the unit of synchronization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub drawings: Vec<Drawing>,
    pub text_boxes: Vec<TextBox>,
    pub comments: Vec<Comment>,
    pub layers: Vec<Layer>,
    pub tombstones: Tombstones,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a patch, normalizing instead of failing.
    ///
    /// Non-array collections become empty, entities that do not decode are
    /// dropped individually, non-object tombstone maps become empty and
    /// non-numeric or non-finite tombstone values are dropped.
    pub fn from_value(value: &Value) -> Self {
        let mut patch = Patch {
            nodes: entities(value, EntityKind::Nodes),
            edges: entities(value, EntityKind::Edges),
            drawings: entities(value, EntityKind::Drawings),
            text_boxes: entities(value, EntityKind::TextBoxes),
            comments: entities(value, EntityKind::Comments),
            layers: entities(value, EntityKind::Layers),
            tombstones: Tombstones::default(),
        };

        let Some(maps) = value.get("tombstones").and_then(Value::as_object) else {
            return patch;
        };
        for kind in EntityKind::ALL {
            let Some(entries) = maps.get(kind.as_str()).and_then(Value::as_object) else {
                continue;
            };
            for (id, ts) in entries {
                if let Some(ts) = timestamp(ts) {
                    patch.tombstones.insert(kind, id, ts);
                }
            }
        }
        patch
    }

    pub fn push<T: Stored>(&mut self, entity: T) -> &mut Self {
        T::patch_items_mut(self).push(entity);
        self
    }

    pub fn tombstone(&mut self, kind: EntityKind, id: &str, ts: i64) -> &mut Self {
        self.tombstones.insert(kind, id, ts);
        self
    }

    pub fn entity_count(&self) -> usize {
        self.nodes.len()
            + self.edges.len()
            + self.drawings.len()
            + self.text_boxes.len()
            + self.comments.len()
            + self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0 && self.tombstones.is_empty()
    }
}

impl<'de> Deserialize<'de> for Patch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Patch::from_value(&value))
    }
}

fn entities<T: DeserializeOwned + Stored>(value: &Value, kind: EntityKind) -> Vec<T> {
    let Some(items) = value.get(kind.as_str()).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<T>(item.clone()).ok())
        .filter(|entity| !entity.id().is_empty())
        .collect()
}

fn timestamp(value: &Value) -> Option<i64> {
    if let Some(ts) = value.as_i64() {
        return Some(ts);
    }
    value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)
}
