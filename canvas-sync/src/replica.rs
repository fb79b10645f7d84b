//! Local replica: the mutation handlers a client or agent drives.
//!
//! Every local write is validated against the resolved view, recorded in
//! history, applied through the merge resolver and followed by an energy
//! re-solve. The returned [`Patch`] is what goes to the delivery client.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::ReplicaConfig;
use crate::energy::{clamp_energy, Solution};
use crate::error::{Error, Result};
use crate::history::HistoryStack;
use crate::merge::MergeReport;
use crate::model::{
    Author, Comment, CommentTarget, Drawing, Edge, Entity, EntityKind, Node, Point, TaskStatus, TextBox,
    DEFAULT_LAYER_ID,
};
use crate::patch::Patch;
use crate::session::{SessionSnapshot, SessionSource};
use crate::state::{CanvasState, Stored};
use crate::sync::{merge_and_solve, solve_state, solved_view};
use crate::tombstone::deletion_timestamp;

pub struct Replica {
    state: CanvasState,
    history: HistoryStack,
    solution: Solution,
    clock: Arc<dyn Clock>,
    author: Option<Author>,
    session: Option<SessionInfo>,
    cfg: ReplicaConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionInfo {
    id: String,
    version: u64,
}

impl Replica {
    pub fn new(cfg: ReplicaConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: ReplicaConfig, clock: Arc<dyn Clock>) -> Self {
        let state = CanvasState::new();
        let solution = solve_state(&state, cfg.max_solver_iterations);
        Self {
            state,
            history: HistoryStack::new(cfg.history_limit),
            solution,
            clock,
            author: None,
            session: None,
            cfg,
        }
    }

    pub fn set_author(&mut self, author: Author) {
        self.author = Some(author);
    }

    pub fn state(&self) -> &CanvasState {
        &self.state
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    /// State with solved base energies, as shown to a user.
    pub fn solved_state(&self) -> CanvasState {
        solved_view(&self.state, &self.solution)
    }

    pub fn effective_energy(&self, node_id: &str) -> Option<f64> {
        self.solution.effective(node_id)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn session_version(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.version)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Replaces local state with a fetched snapshot. History does not survive.
    pub fn seed(&mut self, snapshot: SessionSnapshot) {
        info!(session = %snapshot.id, version = snapshot.version, "seeding replica");
        self.state = snapshot.state;
        self.session = Some(SessionInfo { id: snapshot.id, version: snapshot.version });
        self.history.clear();
        self.resolve();
    }

    pub async fn seed_from(
        &mut self,
        source: &dyn SessionSource,
        session_id: &str,
        credential: Option<&str>,
    ) -> Result<()> {
        let snapshot = source.fetch(session_id, credential).await?;
        self.seed(snapshot);
        Ok(())
    }

    /// Merges a patch that arrived from elsewhere. Not undoable.
    pub fn apply_remote(&mut self, patch: &Patch) -> MergeReport {
        let merged = merge_and_solve(&self.state, patch, &self.cfg);
        self.state = merged.state;
        self.solution = merged.solution;
        merged.report
    }

    /// Creates an entity with `createdAt = updatedAt = now`.
    pub fn insert<T: Stored>(&mut self, entity: T) -> Result<Patch> {
        self.write(entity, true)
    }

    /// Writes a whole entity, keeping `createdAt` of a visible predecessor.
    pub fn upsert<T: Stored>(&mut self, entity: T) -> Result<Patch> {
        self.write(entity, false)
    }

    /// Edits a visible entity in place. The closure must not change the id.
    pub fn update<T: Stored>(&mut self, id: &str, edit: impl FnOnce(&mut T)) -> Result<Patch> {
        let mut entity = self.state.get::<T>(id).cloned().ok_or_else(|| Error::stale(T::KIND, id))?;
        edit(&mut entity);
        self.write(entity, false)
    }

    pub fn update_node(&mut self, id: &str) -> NodeUpdate<'_> {
        NodeUpdate { replica: self, id: id.to_string(), changes: Vec::new() }
    }

    /// Tombstones an entity and everything that depends on it.
    pub fn delete(&mut self, kind: EntityKind, id: &str) -> Result<Patch> {
        if kind == EntityKind::Layers && id == DEFAULT_LAYER_ID {
            return Err(Error::ProtectedLayer(id.to_string()));
        }
        if !self.state.exists(kind, id) {
            return Err(Error::NotFound { kind, id: id.to_string() });
        }

        let now = self.clock.now_ms();
        let mut patch = Patch::new();
        let mut queue = VecDeque::from([(kind, id.to_string())]);
        while let Some((kind, id)) = queue.pop_front() {
            if patch.tombstones.get(kind, &id).is_some() {
                continue;
            }
            let last = self.state.updated_at_of(kind, &id).unwrap_or(0);
            patch.tombstone(kind, &id, deletion_timestamp(now, last));
            queue.extend(self.dependents(kind, &id));
        }
        debug!(%kind, id, tombstones = patch.tombstones.len(), "delete");
        Ok(self.commit(patch))
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.history.undo(self.state.clone()) else {
            return false;
        };
        self.state = previous;
        self.resolve();
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.history.redo(self.state.clone()) else {
            return false;
        };
        self.state = next;
        self.resolve();
        true
    }

    fn write<T: Stored>(&mut self, mut entity: T, fresh: bool) -> Result<Patch> {
        if let Some((kind, id)) = entity.references().into_iter().find(|(kind, id)| !self.state.exists(*kind, id)) {
            return Err(Error::stale(kind, id));
        }

        let id = entity.id().to_string();
        let now = self.clock.now_ms();
        let previous = self.state.updated_at_of(T::KIND, &id).map_or(now, |ts| ts + 1);
        let tombstone = self.state.tombstones().get(T::KIND, &id).map_or(now, |ts| ts + 1);
        let updated_at = now.max(previous).max(tombstone);
        let created_at = match self.state.get::<T>(&id) {
            Some(existing) if !fresh => existing.created_at(),
            _ => updated_at,
        };
        entity.set_timestamps(created_at, updated_at);
        if let Some(author) = &self.author {
            entity.set_author(author);
        }

        let mut patch = Patch::new();
        patch.push(entity);
        Ok(self.commit(patch))
    }

    /// Records the pre-image, merges and re-solves. The patch carries energies
    /// as authored; receivers derive the same corrections.
    fn commit(&mut self, patch: Patch) -> Patch {
        self.history.push(self.state.clone());
        let merged = merge_and_solve(&self.state, &patch, &self.cfg);
        self.state = merged.state;
        self.solution = merged.solution;
        patch
    }

    fn resolve(&mut self) {
        self.solution = solve_state(&self.state, self.cfg.max_solver_iterations);
    }

    /// Visible entities that must go when `(kind, id)` goes.
    fn dependents(&self, kind: EntityKind, id: &str) -> Vec<(EntityKind, String)> {
        let s = &self.state;
        let comments_on = |target: CommentTarget| -> Vec<(EntityKind, String)> {
            s.iter::<Comment>()
                .filter(|c| c.target == target)
                .map(|c| (EntityKind::Comments, c.id.clone()))
                .collect()
        };
        match kind {
            EntityKind::Nodes => {
                let mut out: Vec<_> = s
                    .iter::<Edge>()
                    .filter(|e| e.source == id || e.target == id)
                    .map(|e| (EntityKind::Edges, e.id.clone()))
                    .collect();
                out.extend(comments_on(CommentTarget::Node { id: id.to_string() }));
                out
            }
            EntityKind::Edges => comments_on(CommentTarget::Edge { id: id.to_string() }),
            EntityKind::TextBoxes => comments_on(CommentTarget::TextBox { id: id.to_string() }),
            EntityKind::Comments => s
                .iter::<Comment>()
                .filter(|c| c.parent_id.as_deref() == Some(id))
                .map(|c| (EntityKind::Comments, c.id.clone()))
                .collect(),
            EntityKind::Layers => {
                let on_layer = |layer: Option<&str>| layer == Some(id);
                let mut out: Vec<_> = s
                    .iter::<Node>()
                    .filter(|n| on_layer(n.layer_id()))
                    .map(|n| (EntityKind::Nodes, n.id.clone()))
                    .collect();
                out.extend(
                    s.iter::<Drawing>()
                        .filter(|d| on_layer(d.layer_id()))
                        .map(|d| (EntityKind::Drawings, d.id.clone())),
                );
                out.extend(
                    s.iter::<TextBox>()
                        .filter(|t| on_layer(t.layer_id()))
                        .map(|t| (EntityKind::TextBoxes, t.id.clone())),
                );
                out
            }
            EntityKind::Drawings => Vec::new(),
        }
    }
}

enum NodeChange {
    Title(String),
    Content(String),
    Position(Point),
    Energy(f64),
    Clarity(f64),
    Status(TaskStatus),
    Progress(f64),
    Layer(String),
}

impl NodeChange {
    fn apply(self, node: &mut Node) {
        match self {
            NodeChange::Title(title) => node.title = title,
            NodeChange::Content(content) => node.content = content,
            NodeChange::Position(position) => node.position = position,
            NodeChange::Energy(energy) => node.energy = clamp_energy(energy),
            NodeChange::Clarity(clarity) => node.clarity = if clarity.is_nan() { 0.0 } else { clarity.clamp(0.0, 1.0) },
            NodeChange::Status(status) => node.status = Some(status),
            NodeChange::Progress(progress) => node.progress = Some(progress),
            NodeChange::Layer(layer) => node.layer_id = Some(layer),
        }
    }
}

/// Field-by-field node edit, applied as one undoable mutation on `commit`.
pub struct NodeUpdate<'a> {
    replica: &'a mut Replica,
    id: String,
    changes: Vec<NodeChange>,
}

impl<'a> NodeUpdate<'a> {
    pub fn title(mut self, title: &str) -> Self {
        self.changes.push(NodeChange::Title(title.to_string()));
        self
    }

    pub fn content(mut self, content: &str) -> Self {
        self.changes.push(NodeChange::Content(content.to_string()));
        self
    }

    pub fn position(mut self, x: f64, y: f64) -> Self {
        self.changes.push(NodeChange::Position(Point::new(x, y)));
        self
    }

    pub fn energy(mut self, energy: f64) -> Self {
        self.changes.push(NodeChange::Energy(energy));
        self
    }

    pub fn clarity(mut self, clarity: f64) -> Self {
        self.changes.push(NodeChange::Clarity(clarity));
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.changes.push(NodeChange::Status(status));
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.changes.push(NodeChange::Progress(progress));
        self
    }

    pub fn layer(mut self, layer_id: &str) -> Self {
        self.changes.push(NodeChange::Layer(layer_id.to_string()));
        self
    }

    pub fn commit(self) -> Result<Patch> {
        let changes = self.changes;
        self.replica.update::<Node>(&self.id, move |node| {
            for change in changes {
                change.apply(node);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::Layer;
    use crate::session::StaticSource;

    fn replica_at(now: i64) -> (Replica, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let replica = Replica::with_clock(ReplicaConfig::default(), clock.clone());
        (replica, clock)
    }

    fn comment_on(id: &str, target: CommentTarget) -> Comment {
        Comment::new(id, target, id)
    }

    #[test]
    fn insert_stamps_timestamps_and_author() {
        let (mut r, _) = replica_at(1_000);
        r.set_author(Author { id: "u1".into(), name: "Ada".into() });

        let patch = r.insert(Node::new("a", "Plan", 30.0)).unwrap();
        let node = &patch.nodes[0];
        assert_eq!((node.created_at, node.updated_at), (1_000, 1_000));
        assert_eq!(node.author_name.as_deref(), Some("Ada"));
        assert_eq!(r.state().get::<Node>("a"), Some(node));
        assert_eq!(r.effective_energy("a"), Some(30.0));
    }

    #[test]
    fn updates_are_monotonic_even_with_a_stuck_clock() {
        let (mut r, _) = replica_at(500);
        r.insert(Node::new("a", "a", 10.0)).unwrap();
        let patch = r.update_node("a").title("renamed").commit().unwrap();

        let node = &patch.nodes[0];
        assert_eq!(node.created_at, 500);
        assert_eq!(node.updated_at, 501);
        assert_eq!(node.title, "renamed");
    }

    #[test]
    fn edge_to_missing_node_is_stale() {
        let (mut r, _) = replica_at(1);
        r.insert(Node::new("a", "a", 10.0)).unwrap();

        let err = r.insert(Edge::new("e1", "a", "ghost")).unwrap_err();
        assert!(matches!(err, Error::StaleReference { kind: EntityKind::Nodes, ref id } if id == "ghost"));
        assert_eq!(r.state().count::<Edge>(), 0);
        assert!(!err.is_retryable());
    }

    #[test]
    fn update_of_missing_entity_is_stale() {
        let (mut r, _) = replica_at(1);
        let err = r.update_node("nope").energy(5.0).commit().unwrap_err();
        assert!(matches!(err, Error::StaleReference { kind: EntityKind::Nodes, .. }));
    }

    #[test]
    fn node_on_unknown_layer_is_stale_but_default_layer_is_fine() {
        let (mut r, _) = replica_at(1);
        let mut node = Node::new("a", "a", 1.0);
        node.layer_id = Some("sketch".into());
        assert!(r.insert(node.clone()).is_err());

        node.layer_id = Some(DEFAULT_LAYER_ID.into());
        assert!(r.insert(node).is_ok());
    }

    #[test]
    fn local_edit_ships_authored_energy_and_solves_locally() {
        let (mut r, _) = replica_at(1);
        r.insert(Node::new("a", "a", 80.0)).unwrap();
        r.insert(Node::new("b", "b", 10.0)).unwrap();
        r.insert(Edge::new("e1", "a", "b")).unwrap();

        let patch = r.update_node("b").energy(90.0).commit().unwrap();
        assert_eq!(patch.nodes[0].energy, 90.0);
        assert_eq!(r.solution().base("b"), Some(20.0));
        assert_eq!(r.effective_energy("b"), Some(100.0));
        assert_eq!(r.solved_state().get::<Node>("b").unwrap().energy, 20.0);

        // a peer merging the same patch derives the same correction
        let peer = merge_and_solve(&CanvasState::new(), &r.state().to_patch(), &ReplicaConfig::default());
        assert_eq!(&peer.solution, r.solution());
    }

    #[test]
    fn lifting_the_cap_restores_authored_energy() {
        let (mut r, _) = replica_at(1);
        r.insert(Node::new("a", "a", 80.0)).unwrap();
        r.insert(Node::new("b", "b", 90.0)).unwrap();
        r.insert(Edge::new("e1", "a", "b")).unwrap();
        assert_eq!(r.solution().base("b"), Some(20.0));

        r.update_node("a").energy(10.0).commit().unwrap();
        assert_eq!(r.solution().base("b"), Some(90.0));
        assert_eq!(r.effective_energy("b"), Some(100.0));
    }

    #[test]
    fn deleting_a_node_cascades_to_edges_and_comments() {
        let (mut r, clock) = replica_at(10);
        r.insert(Node::new("n", "n", 10.0)).unwrap();
        r.insert(Node::new("m", "m", 10.0)).unwrap();
        r.insert(Edge::new("in", "m", "n")).unwrap();
        r.insert(Edge::new("out", "n", "m")).unwrap();
        r.insert(comment_on("c1", CommentTarget::Node { id: "n".into() })).unwrap();
        r.insert(comment_on("c2", CommentTarget::Edge { id: "in".into() })).unwrap();
        r.insert(comment_on("keep", CommentTarget::Node { id: "m".into() })).unwrap();

        clock.set(20);
        let patch = r.delete(EntityKind::Nodes, "n").unwrap();

        let tombstoned: Vec<_> = patch.tombstones.iter().map(|(k, id, _)| (k, id.to_string())).collect();
        assert_eq!(tombstoned.len(), 5);
        for (kind, id) in [
            (EntityKind::Nodes, "n"),
            (EntityKind::Edges, "in"),
            (EntityKind::Edges, "out"),
            (EntityKind::Comments, "c1"),
            (EntityKind::Comments, "c2"),
        ] {
            assert!(tombstoned.contains(&(kind, id.to_string())), "{kind} {id} not tombstoned");
            assert!(r.state().is_deleted(kind, id));
        }
        assert!(r.state().contains::<Comment>("keep"));
        assert!(r.state().contains::<Node>("m"));
    }

    #[test]
    fn tombstone_is_strictly_newer_than_last_update() {
        let (mut r, clock) = replica_at(100);
        r.insert(Node::new("a", "a", 1.0)).unwrap();
        // clock went backwards between edit and delete
        clock.set(40);
        let patch = r.delete(EntityKind::Nodes, "a").unwrap();
        assert_eq!(patch.tombstones.get(EntityKind::Nodes, "a"), Some(101));
    }

    #[test]
    fn deleting_a_comment_removes_the_whole_thread() {
        let (mut r, _) = replica_at(1);
        let root = comment_on("root", CommentTarget::Canvas);
        r.insert(root.clone()).unwrap();
        let reply = Comment::reply("r1", &root, "one");
        r.insert(reply.clone()).unwrap();
        r.insert(Comment::reply("r2", &reply, "two")).unwrap();
        r.insert(comment_on("other", CommentTarget::Canvas)).unwrap();

        let patch = r.delete(EntityKind::Comments, "root").unwrap();
        assert_eq!(patch.tombstones.len(), 3);
        assert_eq!(r.state().count::<Comment>(), 1);
    }

    #[test]
    fn reply_to_missing_parent_is_stale() {
        let (mut r, _) = replica_at(1);
        let ghost = comment_on("ghost", CommentTarget::Canvas);
        let err = r.insert(Comment::reply("r1", &ghost, "hi")).unwrap_err();
        assert!(matches!(err, Error::StaleReference { kind: EntityKind::Comments, .. }));
    }

    #[test]
    fn deleting_a_layer_takes_its_contents_along() {
        let (mut r, _) = replica_at(1);
        r.insert(Layer::new("sketch", "Sketch")).unwrap();
        let mut on_layer = Node::new("a", "a", 1.0);
        on_layer.layer_id = Some("sketch".into());
        r.insert(on_layer).unwrap();
        r.insert(Node::new("b", "b", 1.0)).unwrap();
        r.insert(Edge::new("e1", "b", "a")).unwrap();
        r.insert(Drawing { id: "d1".into(), layer_id: Some("sketch".into()), ..Default::default() }).unwrap();
        r.insert(TextBox { id: "t1".into(), layer_id: Some("sketch".into()), ..Default::default() }).unwrap();
        r.insert(comment_on("c1", CommentTarget::TextBox { id: "t1".into() })).unwrap();

        let patch = r.delete(EntityKind::Layers, "sketch").unwrap();
        assert_eq!(patch.tombstones.len(), 6);
        assert!(r.state().contains::<Node>("b"));
        assert_eq!(r.state().count::<Edge>(), 0);
        assert_eq!(r.state().count::<Comment>(), 0);
    }

    #[test]
    fn default_layer_is_protected() {
        let (mut r, _) = replica_at(1);
        let err = r.delete(EntityKind::Layers, DEFAULT_LAYER_ID).unwrap_err();
        assert!(matches!(err, Error::ProtectedLayer(_)));
    }

    #[test]
    fn deleting_missing_entity_is_not_found() {
        let (mut r, _) = replica_at(1);
        assert!(matches!(r.delete(EntityKind::Drawings, "d0"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn undo_redo_round_trip_restores_state_and_energy() {
        let (mut r, clock) = replica_at(1);
        let initial = r.state().clone();

        r.insert(Node::new("a", "a", 80.0)).unwrap();
        clock.advance(1);
        r.insert(Node::new("b", "b", 90.0)).unwrap();
        clock.advance(1);
        r.insert(Edge::new("e1", "a", "b")).unwrap();
        clock.advance(1);
        r.delete(EntityKind::Nodes, "a").unwrap();
        let last = r.state().clone();

        for _ in 0..4 {
            assert!(r.undo());
        }
        assert!(!r.undo());
        assert_eq!(r.state(), &initial);
        assert_eq!(r.effective_energy("b"), None);

        for _ in 0..4 {
            assert!(r.redo());
        }
        assert!(!r.redo());
        assert_eq!(r.state(), &last);
        assert_eq!(r.effective_energy("b"), Some(90.0));

        assert!(r.undo());
        assert_eq!(r.effective_energy("b"), Some(100.0), "effective map re-derived after undo");
    }

    #[test]
    fn new_edit_after_undo_drops_redo() {
        let (mut r, _) = replica_at(1);
        r.insert(Node::new("a", "a", 1.0)).unwrap();
        r.undo();
        assert!(r.can_redo());
        r.insert(Node::new("b", "b", 1.0)).unwrap();
        assert!(!r.can_redo());
    }

    #[test]
    fn remote_patches_do_not_touch_history() {
        let (mut r, _) = replica_at(1);
        let mut remote = Patch::new();
        remote.push(Node { updated_at: 5, ..Node::new("x", "x", 60.0) });

        let report = r.apply_remote(&remote);
        assert_eq!(report.inserted, 1);
        assert!(!r.can_undo());
        assert_eq!(r.effective_energy("x"), Some(60.0));
    }

    #[test]
    fn local_edit_supersedes_remote_tombstone() {
        let (mut r, _) = replica_at(1);
        r.insert(Node::new("a", "a", 1.0)).unwrap();
        let mut remote = Patch::new();
        remote.tombstone(EntityKind::Nodes, "a", 50);
        r.apply_remote(&remote);
        assert!(r.state().is_deleted(EntityKind::Nodes, "a"));

        let patch = r.upsert(Node::new("a", "again", 1.0)).unwrap();
        assert_eq!(patch.nodes[0].updated_at, 51);
        assert!(r.state().contains::<Node>("a"));
    }

    #[tokio::test]
    async fn seed_replaces_state_and_clears_history() {
        let (mut r, _) = replica_at(1);
        r.insert(Node::new("local", "local", 1.0)).unwrap();

        let mut remote = CanvasState::new();
        remote.put(Node::new("a", "a", 80.0));
        remote.put(Node::new("b", "b", 90.0));
        remote.put(Edge::new("e1", "a", "b"));
        let source = StaticSource::new().with(SessionSnapshot { id: "s1".into(), version: 9, state: remote });

        r.seed_from(&source, "s1", None).await.unwrap();
        assert_eq!(r.session_id(), Some("s1"));
        assert_eq!(r.session_version(), Some(9));
        assert!(!r.can_undo());
        assert!(!r.state().contains::<Node>("local"));
        assert_eq!(r.effective_energy("b"), Some(100.0));
    }
}
