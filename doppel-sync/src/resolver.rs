// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync operation resolver
//!
//! [`resolve_operation`] is a pure function of one item's category,
//! presence and direction override. [`resolve_sync_operations`] applies it
//! to every item and then fixes up operations that only make sense
//! together: creates below folders that will not exist, folder deletions
//! that would take unknown content with them, and detected renames.

use crate::direction::{DirectionCategory, DirectionConfig, DirectionRule, DirectionSet};
use doppel_compare::{BaseFolderPair, CompareFilesResult, FileSystemObject, FolderComparison, Side, SyncOperation};
use doppel_core::DoppelResult;

pub fn resolve_operation(node: &FileSystemObject, directions: &DirectionSet) -> SyncOperation {
    match node.category() {
        CompareFilesResult::Equal => return SyncOperation::None,
        CompareFilesResult::TraversalError => return SyncOperation::DoNothing,
        _ => {}
    }

    let rule = match (node.direction_override(), DirectionCategory::of(node.category())) {
        (Some(direction), _) => DirectionRule::from(direction),
        (None, Some(category)) => directions.rule(category),
        (None, None) => DirectionRule::Conflict,
    };

    let left = node.is_present(Side::Left);
    let right = node.is_present(Side::Right);
    match rule {
        DirectionRule::Conflict => SyncOperation::Conflict,
        DirectionRule::None => SyncOperation::DoNothing,
        DirectionRule::Right => match (left, right) {
            (true, true) => SyncOperation::UpdateRight,
            (true, false) => SyncOperation::CreateRight,
            (false, true) => SyncOperation::DeleteRight,
            (false, false) => SyncOperation::DoNothing,
        },
        DirectionRule::Left => match (left, right) {
            (true, true) => SyncOperation::UpdateLeft,
            (false, true) => SyncOperation::CreateLeft,
            (true, false) => SyncOperation::DeleteLeft,
            (false, false) => SyncOperation::DoNothing,
        },
    }
}

/// Assign an operation to every item of every pair.
pub fn resolve_sync_operations(comparison: &mut FolderComparison, config: &DirectionConfig) -> DoppelResult<()> {
    let directions = config.directions()?;
    for pair in comparison.pairs_mut() {
        resolve_pair(pair, &directions);
    }
    Ok(())
}

pub fn resolve_pair(pair: &mut BaseFolderPair, directions: &DirectionSet) {
    let order = pair.preorder();

    for &id in &order {
        let operation = resolve_operation(pair.node(id), directions);
        pair.set_sync_operation(id, operation);
    }

    // creates need their parent folder on the target side
    for &id in &order {
        let node = pair.node(id);
        let target = match node.sync_operation() {
            SyncOperation::CreateLeft => Side::Left,
            SyncOperation::CreateRight => Side::Right,
            _ => continue,
        };
        let Some(parent) = node.parent() else { continue };
        let parent = pair.node(parent);
        if !parent.is_present(target) && parent.sync_operation() != node.sync_operation() {
            tracing::debug!(path = %node.pair_relative_path(), "parent folder will not exist, skipping");
            pair.set_sync_operation(id, SyncOperation::DoNothing);
        }
    }

    // a folder is only deleted if everything inside goes with it
    for &id in order.iter().rev() {
        let node = pair.node(id);
        let delete = node.sync_operation();
        if !node.is_folder() || !matches!(delete, SyncOperation::DeleteLeft | SyncOperation::DeleteRight) {
            continue;
        }
        if node
            .children()
            .iter()
            .any(|&child| pair.node(child).sync_operation() != delete)
        {
            tracing::debug!(path = %node.pair_relative_path(), "folder keeps content, not deleting");
            pair.set_sync_operation(id, SyncOperation::DoNothing);
        }
    }

    for &id in &order {
        let node = pair.node(id);
        let Some(partner) = node.move_ref() else { continue };
        if !node.is_present(Side::Left) {
            continue;
        }
        let (left_op, right_op) = (node.sync_operation(), pair.node(partner).sync_operation());
        match (left_op, right_op) {
            (SyncOperation::CreateRight, SyncOperation::DeleteRight) => {
                pair.set_sync_operation(partner, SyncOperation::MoveRightFrom);
                pair.set_sync_operation(id, SyncOperation::MoveRightTo);
            }
            (SyncOperation::DeleteLeft, SyncOperation::CreateLeft) => {
                pair.set_sync_operation(id, SyncOperation::MoveLeftFrom);
                pair.set_sync_operation(partner, SyncOperation::MoveLeftTo);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::CustomDirections;
    use doppel_compare::{compare_folders, CompareOptions, CompareVariant, FolderPairSpec, NodeId, SyncDirection};
    use doppel_core::{AbstractPath, CancelToken, FileId, ProgressReporter};
    use doppel_providers::{BackendRegistry, MemoryStore};
    use std::collections::BTreeMap;

    async fn compare(store: &MemoryStore) -> FolderComparison {
        let mut registry = BackendRegistry::new();
        registry.register_memory_store(store.clone());
        compare_folders(
            &[FolderPairSpec::new(
                AbstractPath::parse_phrase("mem://v/left").unwrap(),
                AbstractPath::parse_phrase("mem://v/right").unwrap(),
            )],
            &CompareOptions::new(CompareVariant::TimeAndSize {
                tolerance_secs: 2,
                ignore_time_shift_minutes: Vec::new(),
            }),
            &registry,
            &ProgressReporter::silent(),
            &CancelToken::new(),
        )
        .await
        .unwrap()
    }

    fn id_of(pair: &BaseFolderPair, path: &str) -> NodeId {
        pair.iter()
            .find(|(_, n)| n.pair_relative_path().as_str() == path)
            .map(|(id, _)| id)
            .unwrap()
    }

    fn op(cmp: &FolderComparison, path: &str) -> SyncOperation {
        let pair = &cmp.pairs()[0];
        pair.node(id_of(pair, path)).sync_operation()
    }

    fn sample() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_file("v", "left/a/x.txt", &[0; 10], 100);
        store.add_file("v", "right/a/x.txt", &[0; 10], 100);
        store.add_file("v", "left/newer.txt", &[0; 10], 200);
        store.add_file("v", "right/newer.txt", &[0; 10], 100);
        store.add_file("v", "left/older.txt", b"o", 100);
        store.add_file("v", "right/older.txt", b"o", 500);
        store.add_file("v", "left/size.txt", b"ab", 100);
        store.add_file("v", "right/size.txt", b"abc", 100);
        store.add_file("v", "left/new_dir/inner.txt", b"i", 1);
        store.add_file("v", "right/gone_dir/inner.txt", b"g", 1);
        store
    }

    #[tokio::test]
    async fn test_mirror() {
        let mut cmp = compare(&sample()).await;
        resolve_sync_operations(&mut cmp, &DirectionConfig::Mirror).unwrap();

        assert_eq!(op(&cmp, "a/x.txt"), SyncOperation::None);
        assert_eq!(op(&cmp, "newer.txt"), SyncOperation::UpdateRight);
        assert_eq!(op(&cmp, "older.txt"), SyncOperation::UpdateRight);
        assert_eq!(op(&cmp, "size.txt"), SyncOperation::UpdateRight);
        assert_eq!(op(&cmp, "new_dir"), SyncOperation::CreateRight);
        assert_eq!(op(&cmp, "new_dir/inner.txt"), SyncOperation::CreateRight);
        assert_eq!(op(&cmp, "gone_dir"), SyncOperation::DeleteRight);
        assert_eq!(op(&cmp, "gone_dir/inner.txt"), SyncOperation::DeleteRight);
    }

    #[tokio::test]
    async fn test_two_way() {
        let mut cmp = compare(&sample()).await;
        resolve_sync_operations(&mut cmp, &DirectionConfig::TwoWay).unwrap();

        assert_eq!(op(&cmp, "newer.txt"), SyncOperation::UpdateRight);
        assert_eq!(op(&cmp, "older.txt"), SyncOperation::UpdateLeft);
        assert_eq!(op(&cmp, "size.txt"), SyncOperation::Conflict);
        assert_eq!(op(&cmp, "new_dir/inner.txt"), SyncOperation::CreateRight);
        assert_eq!(op(&cmp, "gone_dir"), SyncOperation::CreateLeft);
        assert_eq!(op(&cmp, "gone_dir/inner.txt"), SyncOperation::CreateLeft);
    }

    #[tokio::test]
    async fn test_override_and_orphans() {
        let mut cmp = compare(&sample()).await;
        {
            let pair = &mut cmp.pairs_mut()[0];
            let new_dir = id_of(pair, "new_dir");
            pair.set_direction_override(new_dir, Some(SyncDirection::None));
            let older = id_of(pair, "older.txt");
            pair.set_direction_override(older, Some(SyncDirection::Left));
        }
        resolve_sync_operations(&mut cmp, &DirectionConfig::Mirror).unwrap();

        assert_eq!(op(&cmp, "new_dir"), SyncOperation::DoNothing);
        assert_eq!(op(&cmp, "new_dir/inner.txt"), SyncOperation::DoNothing);
        assert_eq!(op(&cmp, "older.txt"), SyncOperation::UpdateLeft);
    }

    #[tokio::test]
    async fn test_folder_with_kept_content_not_deleted() {
        let store = MemoryStore::new();
        store.add_folder("v", "left");
        store.add_file("v", "right/old/keep.txt", b"k", 1);
        store.add_file("v", "right/old/drop.txt", b"d", 1);
        let mut cmp = compare(&store).await;
        {
            let pair = &mut cmp.pairs_mut()[0];
            let keep = id_of(pair, "old/keep.txt");
            pair.set_direction_override(keep, Some(SyncDirection::None));
        }
        resolve_sync_operations(&mut cmp, &DirectionConfig::Mirror).unwrap();
        assert_eq!(op(&cmp, "old/drop.txt"), SyncOperation::DeleteRight);
        assert_eq!(op(&cmp, "old/keep.txt"), SyncOperation::DoNothing);
        assert_eq!(op(&cmp, "old"), SyncOperation::DoNothing);
    }

    #[tokio::test]
    async fn test_traversal_error_and_conflict_never_resolved() {
        let store = MemoryStore::new();
        store.add_file("v", "left/locked/a.txt", b"a", 1);
        store.add_folder("v", "right/locked");
        store.set_unreadable("v", "right/locked");
        store.add_file("v", "left/clash", b"f", 1);
        store.add_folder("v", "right/clash");
        let mut cmp = compare(&store).await;

        for config in [DirectionConfig::Mirror, DirectionConfig::TwoWay, DirectionConfig::Update] {
            resolve_sync_operations(&mut cmp, &config).unwrap();
            assert_eq!(op(&cmp, "locked/a.txt"), SyncOperation::DoNothing);
            let pair = &cmp.pairs()[0];
            let clashes: Vec<_> = pair
                .iter()
                .filter(|(_, n)| n.pair_relative_path().as_str() == "clash")
                .map(|(_, n)| n.sync_operation())
                .collect();
            assert_eq!(clashes, vec![SyncOperation::Conflict, SyncOperation::Conflict]);
        }
    }

    #[tokio::test]
    async fn test_rename_becomes_single_move() {
        let store = MemoryStore::new();
        store.add_file_with_id("v", "left/b/old.txt", b"0123456789", 5, Some(FileId::from_raw(42)));
        store.add_file_with_id("v", "right/b/new.txt", b"0123456789", 5, Some(FileId::from_raw(42)));

        let mut cmp = compare(&store).await;
        resolve_sync_operations(&mut cmp, &DirectionConfig::Mirror).unwrap();
        assert_eq!(op(&cmp, "b/old.txt"), SyncOperation::MoveRightTo);
        assert_eq!(op(&cmp, "b/new.txt"), SyncOperation::MoveRightFrom);

        let mut table = BTreeMap::new();
        for category in DirectionCategory::ALL {
            table.insert(category, DirectionRule::Left);
        }
        let mirror_to_left = DirectionConfig::Custom {
            directions: CustomDirections(table),
        };
        resolve_sync_operations(&mut cmp, &mirror_to_left).unwrap();
        assert_eq!(op(&cmp, "b/old.txt"), SyncOperation::MoveLeftFrom);
        assert_eq!(op(&cmp, "b/new.txt"), SyncOperation::MoveLeftTo);

        resolve_sync_operations(&mut cmp, &DirectionConfig::Update).unwrap();
        assert_eq!(op(&cmp, "b/old.txt"), SyncOperation::CreateRight);
        assert_eq!(op(&cmp, "b/new.txt"), SyncOperation::DoNothing);
    }

    #[tokio::test]
    async fn test_incomplete_custom_table_fails_fast() {
        let mut cmp = compare(&sample()).await;
        let config = DirectionConfig::Custom {
            directions: CustomDirections::default(),
        };
        assert!(resolve_sync_operations(&mut cmp, &config).is_err());
        assert_eq!(op(&cmp, "newer.txt"), SyncOperation::None);
    }
}
