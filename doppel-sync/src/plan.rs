// SPDX-License-Identifier: AGPL-3.0-or-later
//! Apply order and statistics
//!
//! Steps of a pair run in four phases over the canonical row order
//! (relative folder ascending, so parents come before their contents):
//!
//! 1. folder creates, parents first
//! 2. moves, so renamed files leave folders that are about to be deleted
//! 3. deletions, children first
//! 4. file and symlink creates and updates

use doppel_compare::{
    sort_rows, BaseFolderPair, FolderComparison, NodeId, RowRef, Side, SortKey, SortSpec, SyncOperation,
};
use doppel_core::{DoppelError, DoppelResult};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    pub node: NodeId,
    pub operation: SyncOperation,
}

/// Ordered steps for one folder pair
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub pair: usize,
    pub steps: Vec<PlanStep>,
    /// Rows that need no step of their own: no-ops, conflicts and move
    /// sources, which are handled by the step of their move target.
    pub skipped: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PlanPhase {
    CreateFolders,
    Moves,
    Deletions,
    Transfers,
}

fn phase_of(node_is_folder: bool, operation: SyncOperation) -> Option<PlanPhase> {
    use SyncOperation::*;
    match operation {
        CreateLeft | CreateRight if node_is_folder => Some(PlanPhase::CreateFolders),
        CreateLeft | CreateRight | UpdateLeft | UpdateRight => Some(PlanPhase::Transfers),
        MoveLeftTo | MoveRightTo => Some(PlanPhase::Moves),
        DeleteLeft | DeleteRight => Some(PlanPhase::Deletions),
        MoveLeftFrom | MoveRightFrom | None | DoNothing | Conflict => Option::None,
    }
}

/// Order the resolved operations of pair `pair_index`.
pub fn build_plan(comparison: &FolderComparison, pair_index: usize) -> DoppelResult<SyncPlan> {
    let pair = comparison
        .pairs()
        .get(pair_index)
        .ok_or_else(|| DoppelError::ContractViolation(format!("no folder pair #{pair_index}")))?;

    let mut rows: Vec<RowRef> = pair
        .preorder()
        .into_iter()
        .map(|node| RowRef { pair: pair_index, node })
        .collect();
    sort_rows(comparison, &mut rows, SortSpec::ascending(SortKey::RelativeFolder));

    let mut phases: [Vec<PlanStep>; 4] = Default::default();
    let mut skipped = Vec::new();
    for row in &rows {
        let node = pair.node(row.node);
        let operation = node.sync_operation();
        match phase_of(node.is_folder(), operation) {
            Some(phase) => phases[phase as usize].push(PlanStep {
                node: row.node,
                operation,
            }),
            None => skipped.push(row.node),
        }
    }
    phases[PlanPhase::Deletions as usize].reverse();

    let steps: Vec<PlanStep> = phases.into_iter().flatten().collect();
    if steps.len() + skipped.len() != pair.len() {
        return Err(DoppelError::ContractViolation(format!(
            "plan covers {} of {} items",
            steps.len() + skipped.len(),
            pair.len()
        )));
    }
    Ok(SyncPlan {
        pair: pair_index,
        steps,
        skipped,
    })
}

/// What a sync would do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatistics {
    pub create_left: usize,
    pub create_right: usize,
    pub update_left: usize,
    pub update_right: usize,
    pub delete_left: usize,
    pub delete_right: usize,
    pub move_left: usize,
    pub move_right: usize,
    pub conflicts: usize,
    /// Bytes copied by creates and updates; moves are renames.
    pub bytes_to_process: u64,
    pub rows_total: usize,
}

impl SyncStatistics {
    pub fn of_pair(pair: &BaseFolderPair) -> Self {
        let mut stats = Self::default();
        for (_, node) in pair.iter() {
            stats.rows_total += 1;
            let source_size = |side: Side| node.file_size(side).unwrap_or(0);
            match node.sync_operation() {
                SyncOperation::CreateLeft => {
                    stats.create_left += 1;
                    stats.bytes_to_process += source_size(Side::Right);
                }
                SyncOperation::CreateRight => {
                    stats.create_right += 1;
                    stats.bytes_to_process += source_size(Side::Left);
                }
                SyncOperation::UpdateLeft => {
                    stats.update_left += 1;
                    stats.bytes_to_process += source_size(Side::Right);
                }
                SyncOperation::UpdateRight => {
                    stats.update_right += 1;
                    stats.bytes_to_process += source_size(Side::Left);
                }
                SyncOperation::DeleteLeft => stats.delete_left += 1,
                SyncOperation::DeleteRight => stats.delete_right += 1,
                SyncOperation::MoveLeftTo => stats.move_left += 1,
                SyncOperation::MoveRightTo => stats.move_right += 1,
                SyncOperation::Conflict => stats.conflicts += 1,
                SyncOperation::MoveLeftFrom
                | SyncOperation::MoveRightFrom
                | SyncOperation::None
                | SyncOperation::DoNothing => {}
            }
        }
        stats
    }

    pub fn of(comparison: &FolderComparison) -> Self {
        comparison
            .pairs()
            .iter()
            .filter(|pair| pair.fatal_error().is_none())
            .map(Self::of_pair)
            .fold(Self::default(), |mut acc, s| {
                acc.create_left += s.create_left;
                acc.create_right += s.create_right;
                acc.update_left += s.update_left;
                acc.update_right += s.update_right;
                acc.delete_left += s.delete_left;
                acc.delete_right += s.delete_right;
                acc.move_left += s.move_left;
                acc.move_right += s.move_right;
                acc.conflicts += s.conflicts;
                acc.bytes_to_process += s.bytes_to_process;
                acc.rows_total += s.rows_total;
                acc
            })
    }

    /// Number of steps a sync would execute.
    pub fn items_to_process(&self) -> u64 {
        (self.create_left
            + self.create_right
            + self.update_left
            + self.update_right
            + self.delete_left
            + self.delete_right
            + self.move_left
            + self.move_right) as u64
    }

    pub fn has_changes(&self) -> bool {
        self.items_to_process() > 0
    }
}
