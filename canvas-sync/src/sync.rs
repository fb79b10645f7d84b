use tracing::debug;

use crate::config::ReplicaConfig;
use crate::energy::{solve, Solution};
use crate::merge::{merge, MergeReport};
use crate::model::{Edge, Node};
use crate::patch::Patch;
use crate::state::CanvasState;

/// Result of merging: `state` holds node energies as authored, `solution`
/// the corrected bases derived from them.
#[derive(Debug, Clone)]
pub struct Merged {
    pub state: CanvasState,
    pub report: MergeReport,
    pub solution: Solution,
}

impl Merged {
    pub fn solved_state(&self) -> CanvasState {
        solved_view(&self.state, &self.solution)
    }
}

/// Solves energy over the visible graph of `state`.
///
/// Always starts from the authored energies, so the result depends only on
/// which entities are visible and not on the order they arrived in.
pub fn solve_state(state: &CanvasState, max_iterations: usize) -> Solution {
    let edges: Vec<&Edge> = state.iter::<Edge>().collect();
    solve(state.iter::<Node>(), edges, max_iterations)
}

/// `state` with corrected base energies written into its nodes. `updatedAt`
/// is untouched; the result is for display, not for merging.
pub fn solved_view(state: &CanvasState, solution: &Solution) -> CanvasState {
    let mut view = state.clone();
    for node in &solution.nodes {
        let changed = view.get::<Node>(&node.id).is_some_and(|current| current.energy != node.energy);
        if changed {
            view.put(node.clone());
        }
    }
    view
}

/// Applies a patch without any network round trip: merge, then re-solve.
pub fn merge_and_solve(local: &CanvasState, patch: &Patch, cfg: &ReplicaConfig) -> Merged {
    let (state, report) = merge(local, patch, cfg.tie_break);
    let solution = solve_state(&state, cfg.max_solver_iterations);
    debug!(
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        conflicts = report.conflicts,
        tombstoned = report.tombstoned,
        deleted = report.deleted,
        iterations = solution.iterations,
        converged = solution.converged,
        "merged patch"
    );
    Merged { state, report, solution }
}

/// Folds a sequence of patches onto `state`, e.g. a journal replayed offline.
pub fn replay<'a>(
    state: &CanvasState,
    patches: impl IntoIterator<Item = &'a Patch>,
    cfg: &ReplicaConfig,
) -> Merged {
    let mut merged = Merged {
        state: state.clone(),
        report: MergeReport::default(),
        solution: solve_state(state, cfg.max_solver_iterations),
    };
    for patch in patches {
        let next = merge_and_solve(&merged.state, patch, cfg);
        merged.report = sum_reports(&merged.report, &next.report);
        merged.state = next.state;
        merged.solution = next.solution;
    }
    merged
}

fn sum_reports(a: &MergeReport, b: &MergeReport) -> MergeReport {
    MergeReport {
        inserted: a.inserted + b.inserted,
        updated: a.updated + b.updated,
        skipped: a.skipped + b.skipped,
        conflicts: a.conflicts + b.conflicts,
        tombstoned: a.tombstoned + b.tombstoned,
        deleted: a.deleted + b.deleted,
    }
}

// Deleted entities must never come back from an older copy, regardless of
// which replica saw what first.
#[cfg(test)]
mod zombie_tests {
    use super::*;
    use crate::model::{Comment, CommentTarget, EntityKind};
    use crate::tombstone::deletion_timestamp;

    fn cfg() -> ReplicaConfig {
        ReplicaConfig::default()
    }

    fn node(id: &str, energy: f64, updated_at: i64) -> Node {
        Node { updated_at, created_at: updated_at, ..Node::new(id, id, energy) }
    }

    fn assert_converged(a: &CanvasState, b: &CanvasState) {
        assert_eq!(a, b, "replicas diverge");
    }

    #[test]
    fn merge_and_solve_clamps_incoming_graph() {
        let mut patch = Patch::new();
        patch
            .push(node("a", 80.0, 1))
            .push(node("b", 90.0, 1))
            .push(Edge { updated_at: 1, ..Edge::new("e1", "a", "b") });

        let merged = merge_and_solve(&CanvasState::new(), &patch, &cfg());
        assert_eq!(merged.state.get::<Node>("b").unwrap().energy, 90.0, "authored value kept");
        assert_eq!(merged.solution.base("b"), Some(20.0));
        assert_eq!(merged.solution.effective("b"), Some(100.0));
        assert_eq!(merged.report.inserted, 3);

        let view = merged.solved_state();
        assert_eq!(view.get::<Node>("b").unwrap().energy, 20.0);
        assert_eq!(view.get::<Node>("b").unwrap().updated_at, 1, "derived, not re-stamped");
    }

    #[test]
    fn merge_and_solve_is_idempotent() {
        let mut patch = Patch::new();
        patch.push(node("a", 80.0, 1)).push(node("b", 90.0, 1)).push(Edge::new("e1", "a", "b"));
        let once = merge_and_solve(&CanvasState::new(), &patch, &cfg());
        let twice = merge_and_solve(&once.state, &patch, &cfg());
        assert_eq!(once.state, twice.state);
        assert_eq!(once.solution.effective, twice.solution.effective);
    }

    #[test]
    fn deleted_node_edge_disappears_from_solver() {
        let mut seed = Patch::new();
        seed.push(node("a", 80.0, 1)).push(node("b", 90.0, 1)).push(Edge::new("e1", "a", "b"));
        let s = merge_and_solve(&CanvasState::new(), &seed, &cfg()).state;

        let mut delete = Patch::new();
        delete.tombstone(EntityKind::Nodes, "a", deletion_timestamp(5, 1));
        delete.tombstone(EntityKind::Edges, "e1", deletion_timestamp(5, 0));
        let merged = merge_and_solve(&s, &delete, &cfg());
        // the cap came from the edge; with it gone b is back to its own energy
        assert_eq!(merged.solution.effective("b"), Some(90.0));
        assert!(merged.solution.effective("a").is_none());
    }

    #[test]
    fn offline_replica_cannot_resurrect_deleted_comment() {
        let comment = Comment { updated_at: 100, ..Comment::new("c1", CommentTarget::Canvas, "hello") };
        let mut create = Patch::new();
        create.push(comment.clone());

        let mut online = merge_and_solve(&CanvasState::new(), &create, &cfg()).state;
        let mut offline = online.clone();

        let mut delete = Patch::new();
        delete.tombstone(EntityKind::Comments, "c1", deletion_timestamp(100, comment.updated_at));
        online = merge_and_solve(&online, &delete, &cfg()).state;

        // offline peer reconnects and pushes its whole (stale) state
        let from_offline = offline.to_patch();
        online = merge_and_solve(&online, &from_offline, &cfg()).state;
        offline = merge_and_solve(&offline, &online.to_patch(), &cfg()).state;

        assert!(online.get::<Comment>("c1").is_none(), "zombie comment on online replica");
        assert!(offline.get::<Comment>("c1").is_none(), "offline replica kept deleted comment");
        assert_converged(&online, &offline);
    }

    #[test]
    fn replay_matches_incremental_merge() {
        let mut p1 = Patch::new();
        p1.push(node("a", 50.0, 1)).push(node("b", 70.0, 1));
        let mut p2 = Patch::new();
        p2.push(Edge { updated_at: 2, ..Edge::new("e1", "a", "b") });
        let mut p3 = Patch::new();
        p3.push(node("a", 10.0, 3));

        let incremental = [&p1, &p2, &p3]
            .into_iter()
            .fold(CanvasState::new(), |s, p| merge_and_solve(&s, p, &cfg()).state);
        let replayed = replay(&CanvasState::new(), [&p1, &p2, &p3], &cfg());

        assert_eq!(replayed.state, incremental);
        assert_eq!(replayed.report.inserted, 3);
        assert_eq!(replayed.report.updated, 1);
        assert_eq!(replayed.solution.base("b"), Some(70.0));
        assert_eq!(replayed.solution.effective("b"), Some(80.0));
    }

    #[test]
    fn corrections_do_not_depend_on_arrival_order() {
        let mut start = Patch::new();
        start.push(node("a", 80.0, 1)).push(node("b", 90.0, 1));
        let start = merge_and_solve(&CanvasState::new(), &start, &cfg()).state;

        let mut link = Patch::new();
        link.push(Edge { updated_at: 2, ..Edge::new("e1", "a", "b") });
        let mut drain = Patch::new();
        drain.push(node("a", 10.0, 3));

        let x = replay(&start, [&link, &drain], &cfg());
        let y = replay(&start, [&drain, &link], &cfg());
        assert_eq!(x.state, y.state);
        assert_eq!(x.solution, y.solution);
        assert_eq!(x.solution.base("b"), Some(90.0));
        assert_eq!(x.solution.effective("b"), Some(100.0));
    }

    #[test]
    fn random_patch_orders_converge() {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut patches = Vec::new();
        for i in 0..12i64 {
            let mut p = Patch::new();
            let id = format!("n{}", i % 4);
            p.push(node(&id, (i * 9 % 100) as f64, i));
            if i % 5 == 4 {
                p.tombstone(EntityKind::Nodes, &format!("n{}", (i + 1) % 4), i);
            }
            patches.push(p);
        }

        let reference = replay(&CanvasState::new(), &patches, &cfg()).state;
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        for _ in 0..20 {
            patches.shuffle(&mut rng);
            let shuffled = replay(&CanvasState::new(), &patches, &cfg()).state;
            assert_converged(&reference, &shuffled);
        }
    }

    #[test]
    fn random_graph_edits_converge_with_solver() {
        use rand::seq::SliceRandom;
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(23);
        let mut patches = Vec::new();
        for ts in 1..=40i64 {
            let mut p = Patch::new();
            let a = format!("n{}", rng.gen_range(0..5));
            let b = format!("n{}", rng.gen_range(0..5));
            match rng.gen_range(0..10) {
                0..=4 => {
                    p.push(node(&a, rng.gen_range(0.0..100.0), ts));
                }
                5..=7 => {
                    let mut e = Edge { updated_at: ts, ..Edge::new(&format!("{a}-{b}"), &a, &b) };
                    e.energy_enabled = Some(rng.gen_bool(0.8));
                    p.push(e);
                }
                8 => {
                    p.tombstone(EntityKind::Edges, &format!("{a}-{b}"), ts);
                }
                _ => {
                    p.tombstone(EntityKind::Nodes, &a, ts);
                }
            }
            patches.push(p);
        }

        let reference = replay(&CanvasState::new(), &patches, &cfg());
        for _ in 0..20 {
            patches.shuffle(&mut rng);
            let shuffled = replay(&CanvasState::new(), &patches, &cfg());
            assert_converged(&reference.state, &shuffled.state);
            assert_eq!(reference.solution, shuffled.solution);
        }
    }
}
