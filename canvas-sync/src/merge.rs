//! Last-writer-wins merge with tombstone precedence.
//!
//! An incoming entity replaces the local one when its `updatedAt` is strictly
//! greater; equal timestamps with different content go to the
//! [`TieBreakPolicy`]. A tombstone at `ts` hides every version of its id with
//! `updatedAt <= ts`, whichever order the two arrive in. Merge never fails:
//! the patch has already been normalized by its decoder.

use serde::{Deserialize, Serialize};

use crate::model::{Comment, Drawing, Edge, EntityKind, Layer, Node, TextBox};
use crate::patch::Patch;
use crate::state::{CanvasState, Stored};

/// How two different versions stamped with the same `updatedAt` are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TieBreakPolicy {
    PreferExisting,
    PreferIncoming,
    /// The version with the smaller canonical JSON encoding wins.
    #[default]
    LexicographicMin,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub conflicts: usize,
    /// Tombstones that were new or later than the local ones.
    pub tombstoned: usize,
    /// Local entities dropped because a tombstone now shadows them.
    pub deleted: usize,
}

impl MergeReport {
    pub fn total_changes(&self) -> usize {
        self.inserted + self.updated + self.tombstoned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeDecision {
    Accept,
    Reject,
    Conflict,
}

pub(crate) fn resolve_versions(local_updated_at: i64, remote_updated_at: i64) -> MergeDecision {
    match local_updated_at.cmp(&remote_updated_at) {
        std::cmp::Ordering::Less => MergeDecision::Accept,
        std::cmp::Ordering::Greater => MergeDecision::Reject,
        std::cmp::Ordering::Equal => MergeDecision::Conflict,
    }
}

pub(crate) fn resolve_conflict(local_value: &[u8], remote_value: &[u8], policy: TieBreakPolicy) -> bool {
    match policy {
        TieBreakPolicy::PreferExisting => false,
        TieBreakPolicy::PreferIncoming => true,
        TieBreakPolicy::LexicographicMin => remote_value < local_value,
    }
}

/// Applies `patch` on top of `local`, returning the new state.
///
/// `local` is left untouched; untouched collections stay shared with it.
pub fn merge(local: &CanvasState, patch: &Patch, policy: TieBreakPolicy) -> (CanvasState, MergeReport) {
    let mut state = local.clone();
    let mut report = MergeReport::default();

    for (kind, id, ts) in patch.tombstones.iter() {
        if state.tombstones.insert(kind, id, ts) {
            report.tombstoned += 1;
        }
        if drop_shadowed(&mut state, kind, id) {
            report.deleted += 1;
        }
    }

    merge_collection::<Node>(&mut state, &patch.nodes, policy, &mut report);
    merge_collection::<Edge>(&mut state, &patch.edges, policy, &mut report);
    merge_collection::<Drawing>(&mut state, &patch.drawings, policy, &mut report);
    merge_collection::<TextBox>(&mut state, &patch.text_boxes, policy, &mut report);
    merge_collection::<Comment>(&mut state, &patch.comments, policy, &mut report);
    merge_collection::<Layer>(&mut state, &patch.layers, policy, &mut report);

    (state, report)
}

fn drop_shadowed(state: &mut CanvasState, kind: EntityKind, id: &str) -> bool {
    match kind {
        EntityKind::Nodes => drop_if_shadowed::<Node>(state, id),
        EntityKind::Edges => drop_if_shadowed::<Edge>(state, id),
        EntityKind::Drawings => drop_if_shadowed::<Drawing>(state, id),
        EntityKind::TextBoxes => drop_if_shadowed::<TextBox>(state, id),
        EntityKind::Comments => drop_if_shadowed::<Comment>(state, id),
        EntityKind::Layers => drop_if_shadowed::<Layer>(state, id),
    }
}

fn drop_if_shadowed<T: Stored>(state: &mut CanvasState, id: &str) -> bool {
    let shadowed = T::collection(state)
        .get(id)
        .is_some_and(|e| state.tombstones.shadows(T::KIND, id, e.updated_at()));
    if shadowed {
        state.remove::<T>(id);
    }
    shadowed
}

fn merge_collection<T: Stored>(
    state: &mut CanvasState,
    incoming: &[T],
    policy: TieBreakPolicy,
    report: &mut MergeReport,
) {
    for remote in incoming {
        let id = remote.id();
        if state.tombstones.shadows(T::KIND, id, remote.updated_at()) {
            report.skipped += 1;
            continue;
        }

        let accept = match T::collection(state).get(id) {
            None => {
                report.inserted += 1;
                true
            }
            Some(local) => match resolve_versions(local.updated_at(), remote.updated_at()) {
                MergeDecision::Accept => {
                    report.updated += 1;
                    true
                }
                MergeDecision::Reject => false,
                MergeDecision::Conflict if local == remote => false,
                MergeDecision::Conflict => {
                    report.conflicts += 1;
                    let won = resolve_conflict(&canonical(local), &canonical(remote), policy);
                    if won {
                        report.updated += 1;
                    }
                    won
                }
            },
        };

        if accept {
            state.put(remote.clone());
        } else {
            report.skipped += 1;
        }
    }
}

fn canonical<T: Serialize>(entity: &T) -> Vec<u8> {
    serde_json::to_vec(entity).unwrap_or_default()
}
