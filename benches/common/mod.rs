#![allow(dead_code)]

use canvas_sync::{CanvasState, Comment, CommentTarget, Edge, EntityKind, Node, Patch};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn node(idx: usize, energy: f64, updated_at: i64) -> Node {
    Node {
        updated_at,
        created_at: updated_at,
        ..Node::new(&format!("node_{idx}"), &format!("Task {idx}"), energy)
    }
}

/// `nodes` nodes with roughly `fanout` random edges each, all stamped at `ts`.
pub fn create_canvas_patch(nodes: usize, fanout: usize, ts: i64, seed: u64) -> Patch {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut patch = Patch::new();
    for i in 0..nodes {
        patch.push(node(i, rng.gen_range(0.0..100.0), ts));
    }
    let mut edge = 0;
    for i in 0..nodes {
        for _ in 0..fanout {
            let target = rng.gen_range(0..nodes);
            patch.push(Edge {
                updated_at: ts,
                created_at: ts,
                ..Edge::new(&format!("edge_{edge}"), &format!("node_{i}"), &format!("node_{target}"))
            });
            edge += 1;
        }
    }
    for i in (0..nodes).step_by(10) {
        patch.push(Comment {
            updated_at: ts,
            ..Comment::new(&format!("comment_{i}"), CommentTarget::Node { id: format!("node_{i}") }, "note")
        });
    }
    patch
}

pub fn create_canvas(nodes: usize, fanout: usize) -> CanvasState {
    CanvasState::from(create_canvas_patch(nodes, fanout, 1, 42))
}

/// Updates the first `count` nodes at `ts` and tombstones every fifth one.
pub fn create_update_patch(count: usize, ts: i64) -> Patch {
    let mut patch = Patch::new();
    for i in 0..count {
        if i % 5 == 4 {
            patch.tombstone(EntityKind::Nodes, &format!("node_{i}"), ts);
        } else {
            patch.push(node(i, 50.0, ts));
        }
    }
    patch
}
