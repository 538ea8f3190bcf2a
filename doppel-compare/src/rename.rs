// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rename detection from file ids

use crate::hierarchy::{BaseFolderPair, CompareFilesResult, NodeId, Side};
use doppel_core::FileId;
use std::collections::HashMap;

/// Link left-only and right-only files that are the same physical file.
///
/// Both base folders must live on the same device root, otherwise equal ids
/// mean nothing. A match needs the same id and size on both sides, and the
/// id must be unique among the one-sided files of its side. Returns the
/// number of linked pairs.
pub fn detect_moves(pair: &mut BaseFolderPair) -> usize {
    if pair.base(Side::Left).device() != pair.base(Side::Right).device() {
        return 0;
    }

    let left = unique_ids(pair, CompareFilesResult::LeftOnly, Side::Left);
    let right = unique_ids(pair, CompareFilesResult::RightOnly, Side::Right);

    let mut links = Vec::new();
    for (id, left_node) in &left {
        let Some(right_node) = right.get(id) else { continue };
        if pair.node(*left_node).file_size(Side::Left) == pair.node(*right_node).file_size(Side::Right) {
            links.push((*left_node, *right_node));
        }
    }
    links.sort();
    for &(l, r) in &links {
        tracing::debug!(
            from = %pair.node(l).pair_relative_path(),
            to = %pair.node(r).pair_relative_path(),
            "rename detected"
        );
        pair.link_move(l, r);
    }
    links.len()
}

fn unique_ids(pair: &BaseFolderPair, category: CompareFilesResult, side: Side) -> HashMap<FileId, NodeId> {
    let mut seen: HashMap<FileId, Option<NodeId>> = HashMap::new();
    for (id, node) in pair.iter() {
        if node.category() != category {
            continue;
        }
        if let Some(file_id) = node.file_id(side) {
            seen.entry(file_id)
                .and_modify(|slot| *slot = None)
                .or_insert(Some(id));
        }
    }
    seen.into_iter()
        .filter_map(|(file_id, node)| node.map(|n| (file_id, n)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{FileDescr, ObjectKind, SidePair};
    use doppel_core::{AbstractPath, AfsPath, DeviceRoot};

    fn add(pair: &mut BaseFolderPair, side: Side, name: &str, size: u64, id: Option<u128>) -> NodeId {
        let category = match side {
            Side::Left => CompareFilesResult::LeftOnly,
            Side::Right => CompareFilesResult::RightOnly,
        };
        pair.add_node(
            None,
            SidePair::one_sided(side, name.to_string()),
            ObjectKind::File(SidePair::one_sided(
                side,
                FileDescr {
                    size,
                    mod_time: 0,
                    file_id: id.map(FileId::from_raw),
                },
            )),
            category,
            None,
        )
    }

    fn pair_on(left_root: &str, right_root: &str) -> BaseFolderPair {
        BaseFolderPair::new(
            AbstractPath::new(DeviceRoot::new("mem", left_root), AfsPath::new("l")),
            AbstractPath::new(DeviceRoot::new("mem", right_root), AfsPath::new("r")),
        )
    }

    #[test]
    fn test_links_matching_ids() {
        let mut pair = pair_on("v", "v");
        let old = add(&mut pair, Side::Left, "old.txt", 5, Some(7));
        let new = add(&mut pair, Side::Right, "new.txt", 5, Some(7));
        let other = add(&mut pair, Side::Right, "other.txt", 5, Some(8));
        assert_eq!(detect_moves(&mut pair), 1);
        assert_eq!(pair.node(old).move_ref(), Some(new));
        assert_eq!(pair.node(new).move_ref(), Some(old));
        assert_eq!(pair.node(other).move_ref(), None);
    }

    #[test]
    fn test_requires_size_unique_id_and_same_device() {
        let mut pair = pair_on("v", "v");
        add(&mut pair, Side::Left, "a", 5, Some(1));
        add(&mut pair, Side::Right, "b", 6, Some(1));
        add(&mut pair, Side::Left, "c", 1, Some(2));
        add(&mut pair, Side::Left, "d", 1, Some(2));
        add(&mut pair, Side::Right, "e", 1, Some(2));
        add(&mut pair, Side::Left, "f", 1, None);
        add(&mut pair, Side::Right, "g", 1, None);
        assert_eq!(detect_moves(&mut pair), 0);

        let mut pair = pair_on("v", "w");
        add(&mut pair, Side::Left, "a", 5, Some(1));
        add(&mut pair, Side::Right, "b", 5, Some(1));
        assert_eq!(detect_moves(&mut pair), 0);
    }
}
