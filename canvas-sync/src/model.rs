//! Canvas entities.
//!
//! All six kinds share `id`, `createdAt`, `updatedAt` and optional author
//! fields. Timestamps are wall-clock milliseconds. Every struct decodes
//! leniently: missing fields take their defaults so that peers running an
//! older or newer schema still merge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Id of the layer every canvas has; it cannot be deleted.
pub const DEFAULT_LAYER_ID: &str = "default";

pub const MAX_ENERGY: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Nodes,
    Edges,
    Drawings,
    TextBoxes,
    Comments,
    Layers,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Nodes,
        EntityKind::Edges,
        EntityKind::Drawings,
        EntityKind::TextBoxes,
        EntityKind::Comments,
        EntityKind::Layers,
    ];

    /// Wire name of the collection.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Nodes => "nodes",
            EntityKind::Edges => "edges",
            EntityKind::Drawings => "drawings",
            EntityKind::TextBoxes => "textBoxes",
            EntityKind::Comments => "comments",
            EntityKind::Layers => "layers",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Task,
    #[default]
    Idea,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub position: Point,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Base energy, kept within `[0, MAX_ENERGY]` by the solver.
    pub energy: f64,
    pub clarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_child_progress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

impl Node {
    pub fn new(id: &str, title: &str, energy: f64) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            energy,
            clarity: 0.5,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeType {
    #[default]
    Default,
    Connection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// Absent means enabled; only an explicit `false` stops conduction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curvature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_point: Option<Point>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

impl Edge {
    pub fn new(id: &str, source: &str, target: &str) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            ..Default::default()
        }
    }

    pub fn conducts_energy(&self) -> bool {
        self.energy_enabled != Some(false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
    #[default]
    Pen,
    Eraser,
    Highlighter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Drawing {
    pub id: String,
    pub points: Vec<Point>,
    pub path: String,
    pub color: String,
    pub stroke_width: f64,
    pub opacity: f64,
    pub tool: Tool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextBox {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

/// What a comment is attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommentTarget {
    #[default]
    Canvas,
    Node { id: String },
    Edge { id: String },
    TextBox { id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub target: CommentTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

impl Comment {
    pub fn new(id: &str, target: CommentTarget, text: &str) -> Self {
        Self {
            id: id.to_string(),
            target,
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn reply(id: &str, parent: &Comment, text: &str) -> Self {
        Self {
            parent_id: Some(parent.id.clone()),
            ..Self::new(id, parent.target.clone(), text)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub visible: bool,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            visible: true,
            created_at: 0,
            updated_at: 0,
            author_id: None,
            author_name: None,
        }
    }
}

impl Layer {
    pub fn new(id: &str, name: &str) -> Self {
        Self { id: id.to_string(), name: name.to_string(), ..Default::default() }
    }
}

/// Who is making local changes; stamped onto every entity the replica writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: String,
    pub name: String,
}

/// Behaviour shared by all six collections.
pub trait Entity: Clone + PartialEq + Serialize + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;
    fn updated_at(&self) -> i64;
    fn created_at(&self) -> i64;
    fn set_timestamps(&mut self, created_at: i64, updated_at: i64);
    fn set_author(&mut self, author: &Author);
    /// Layer the entity lives on, for kinds that have one.
    fn layer_id(&self) -> Option<&str> {
        None
    }
    /// Entities this one points at; a local write is rejected unless all exist.
    fn references(&self) -> Vec<(EntityKind, &str)> {
        self.layer_id().map(|layer| (EntityKind::Layers, layer)).into_iter().collect()
    }
}

macro_rules! impl_entity {
    (@base $ty:ty, $kind:expr, { $($extra:tt)* }) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn updated_at(&self) -> i64 {
                self.updated_at
            }

            fn created_at(&self) -> i64 {
                self.created_at
            }

            fn set_timestamps(&mut self, created_at: i64, updated_at: i64) {
                self.created_at = created_at;
                self.updated_at = updated_at;
            }

            fn set_author(&mut self, author: &Author) {
                self.author_id = Some(author.id.clone());
                self.author_name = Some(author.name.clone());
            }

            $($extra)*
        }
    };
    ($ty:ty, $kind:expr, layered) => {
        impl_entity!(@base $ty, $kind, {
            fn layer_id(&self) -> Option<&str> {
                self.layer_id.as_deref()
            }
        });
    };
    ($ty:ty, $kind:expr) => {
        impl_entity!(@base $ty, $kind, {});
    };
}

impl_entity!(Node, EntityKind::Nodes, layered);
impl_entity!(@base Edge, EntityKind::Edges, {
    fn references(&self) -> Vec<(EntityKind, &str)> {
        vec![(EntityKind::Nodes, self.source.as_str()), (EntityKind::Nodes, self.target.as_str())]
    }
});
impl_entity!(Drawing, EntityKind::Drawings, layered);
impl_entity!(TextBox, EntityKind::TextBoxes, layered);
impl_entity!(@base Comment, EntityKind::Comments, {
    fn references(&self) -> Vec<(EntityKind, &str)> {
        let mut refs = Vec::with_capacity(2);
        match &self.target {
            CommentTarget::Canvas => {}
            CommentTarget::Node { id } => refs.push((EntityKind::Nodes, id.as_str())),
            CommentTarget::Edge { id } => refs.push((EntityKind::Edges, id.as_str())),
            CommentTarget::TextBox { id } => refs.push((EntityKind::TextBoxes, id.as_str())),
        }
        if let Some(parent) = &self.parent_id {
            refs.push((EntityKind::Comments, parent.as_str()));
        }
        refs
    }
});
impl_entity!(Layer, EntityKind::Layers);
