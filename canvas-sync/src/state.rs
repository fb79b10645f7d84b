//! Local canvas state: six copy-on-write collections plus their tombstones.
//!
//! Collections are `Arc<BTreeMap>`; every write goes through
//! [`Arc::make_mut`], so a clone taken earlier (a history snapshot, a reader on
//! another task) is never altered after the fact.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::merge::{merge, TieBreakPolicy};
use crate::model::{Comment, Drawing, Edge, Entity, EntityKind, Layer, Node, TextBox, DEFAULT_LAYER_ID};
use crate::patch::Patch;
use crate::tombstone::Tombstones;

pub type Collection<T> = Arc<BTreeMap<String, T>>;

/// Routes an entity type to its slot in [`CanvasState`] and [`Patch`].
pub trait Stored: Entity {
    fn collection(state: &CanvasState) -> &Collection<Self>;
    fn collection_mut(state: &mut CanvasState) -> &mut Collection<Self>;
    fn patch_items(patch: &Patch) -> &Vec<Self>;
    fn patch_items_mut(patch: &mut Patch) -> &mut Vec<Self>;
}

macro_rules! impl_stored {
    ($ty:ty, $field:ident) => {
        impl Stored for $ty {
            fn collection(state: &CanvasState) -> &Collection<Self> {
                &state.$field
            }
            fn collection_mut(state: &mut CanvasState) -> &mut Collection<Self> {
                &mut state.$field
            }
            fn patch_items(patch: &Patch) -> &Vec<Self> {
                &patch.$field
            }
            fn patch_items_mut(patch: &mut Patch) -> &mut Vec<Self> {
                &mut patch.$field
            }
        }
    };
}

impl_stored!(Node, nodes);
impl_stored!(Edge, edges);
impl_stored!(Drawing, drawings);
impl_stored!(TextBox, text_boxes);
impl_stored!(Comment, comments);
impl_stored!(Layer, layers);

/// Serializes in the patch wire shape; decoding goes through the lenient
/// patch decoder and a merge into an empty state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Patch", into = "Patch")]
pub struct CanvasState {
    pub(crate) nodes: Collection<Node>,
    pub(crate) edges: Collection<Edge>,
    pub(crate) drawings: Collection<Drawing>,
    pub(crate) text_boxes: Collection<TextBox>,
    pub(crate) comments: Collection<Comment>,
    pub(crate) layers: Collection<Layer>,
    pub(crate) tombstones: Tombstones,
}

impl CanvasState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible entity with this id, if any.
    pub fn get<T: Stored>(&self, id: &str) -> Option<&T> {
        T::collection(self)
            .get(id)
            .filter(|e| !self.tombstones.shadows(T::KIND, id, e.updated_at()))
    }

    pub fn contains<T: Stored>(&self, id: &str) -> bool {
        self.get::<T>(id).is_some()
    }

    /// Visible entities of one kind, in id order.
    pub fn iter<T: Stored>(&self) -> impl Iterator<Item = &T> + '_ {
        T::collection(self)
            .values()
            .filter(move |e| !self.tombstones.shadows(T::KIND, e.id(), e.updated_at()))
    }

    /// Every stored entity of one kind, including tombstone-shadowed versions.
    pub fn raw<T: Stored>(&self) -> &Collection<T> {
        T::collection(self)
    }

    pub fn count<T: Stored>(&self) -> usize {
        self.iter::<T>().count()
    }

    pub fn tombstones(&self) -> &Tombstones {
        &self.tombstones
    }

    /// Whether `id` of `kind` is tombstoned in the resolved view.
    pub fn is_deleted(&self, kind: EntityKind, id: &str) -> bool {
        let Some(ts) = self.tombstones.get(kind, id) else {
            return false;
        };
        match self.updated_at_of(kind, id) {
            Some(updated_at) => ts >= updated_at,
            None => true,
        }
    }

    /// Whether a visible entity of `kind` has this id.
    pub fn exists(&self, kind: EntityKind, id: &str) -> bool {
        match kind {
            EntityKind::Nodes => self.contains::<Node>(id),
            EntityKind::Edges => self.contains::<Edge>(id),
            EntityKind::Drawings => self.contains::<Drawing>(id),
            EntityKind::TextBoxes => self.contains::<TextBox>(id),
            EntityKind::Comments => self.contains::<Comment>(id),
            EntityKind::Layers => self.layer_exists(id),
        }
    }

    /// Last stored `updatedAt` for an id, visible or not.
    pub fn updated_at_of(&self, kind: EntityKind, id: &str) -> Option<i64> {
        match kind {
            EntityKind::Nodes => self.nodes.get(id).map(Entity::updated_at),
            EntityKind::Edges => self.edges.get(id).map(Entity::updated_at),
            EntityKind::Drawings => self.drawings.get(id).map(Entity::updated_at),
            EntityKind::TextBoxes => self.text_boxes.get(id).map(Entity::updated_at),
            EntityKind::Comments => self.comments.get(id).map(Entity::updated_at),
            EntityKind::Layers => self.layers.get(id).map(Entity::updated_at),
        }
    }

    /// The default layer always exists, whether or not it has been stored.
    pub fn layer_exists(&self, id: &str) -> bool {
        id == DEFAULT_LAYER_ID || self.contains::<Layer>(id)
    }

    pub(crate) fn put<T: Stored>(&mut self, entity: T) {
        Arc::make_mut(T::collection_mut(self)).insert(entity.id().to_string(), entity);
    }

    pub(crate) fn remove<T: Stored>(&mut self, id: &str) -> Option<T> {
        if !T::collection(self).contains_key(id) {
            return None;
        }
        Arc::make_mut(T::collection_mut(self)).remove(id)
    }

    /// The whole state as a patch; merging it into an empty state yields `self`.
    pub fn to_patch(&self) -> Patch {
        Patch {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
            drawings: self.drawings.values().cloned().collect(),
            text_boxes: self.text_boxes.values().cloned().collect(),
            comments: self.comments.values().cloned().collect(),
            layers: self.layers.values().cloned().collect(),
            tombstones: self.tombstones.clone(),
        }
    }
}

impl From<Patch> for CanvasState {
    fn from(patch: Patch) -> Self {
        merge(&CanvasState::default(), &patch, TieBreakPolicy::default()).0
    }
}

impl From<CanvasState> for Patch {
    fn from(state: CanvasState) -> Self {
        state.to_patch()
    }
}
