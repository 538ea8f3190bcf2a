// SPDX-License-Identifier: AGPL-3.0-or-later
//! Row ordering for presentation and apply order
//!
//! Rules, in order of precedence:
//! - rows whose item is absent on the probed side go last
//! - for name, size, time and extension keys folders go after files and
//!   symlinks; the size key also puts symlinks after files; the
//!   relative-folder key puts each folder right before its contents
//! - for the category key `Equal` goes last, for the operation key `None`
//! - only the final key comparison is reversed for descending order
//!
//! Sorting is stable.

use crate::hierarchy::{
    CompareFilesResult, FileSystemObject, FolderComparison, NodeId, ObjectKind, Side, SyncOperation,
};
use crate::natural::compare_natural;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    ItemName(Side),
    FullPath(Side),
    RelativeFolder,
    FileSize(Side),
    ModTime(Side),
    Extension(Side),
    Category,
    SyncOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub ascending: bool,
}

impl SortSpec {
    pub fn ascending(key: SortKey) -> Self {
        Self { key, ascending: true }
    }

    pub fn descending(key: SortKey) -> Self {
        Self { key, ascending: false }
    }
}

/// One row of the flattened comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowRef {
    pub pair: usize,
    pub node: NodeId,
}

/// All rows, pair by pair, parents before children.
pub fn rows(comparison: &FolderComparison) -> Vec<RowRef> {
    comparison
        .pairs()
        .iter()
        .enumerate()
        .flat_map(|(pair, p)| p.preorder().into_iter().map(move |node| RowRef { pair, node }))
        .collect()
}

pub fn sort_rows(comparison: &FolderComparison, rows: &mut [RowRef], spec: SortSpec) {
    rows.sort_by(|a, b| compare_rows(comparison, *a, *b, spec));
}

pub fn compare_rows(comparison: &FolderComparison, a: RowRef, b: RowRef, spec: SortSpec) -> Ordering {
    let pa = &comparison.pairs()[a.pair];
    let pb = &comparison.pairs()[b.pair];
    let na = pa.node(a.node);
    let nb = pb.node(b.node);
    let directed = |ord: Ordering| if spec.ascending { ord } else { ord.reverse() };

    match spec.key {
        SortKey::ItemName(side) => absent_last(na, nb, side)
            .then_with(|| folders_last(na, nb))
            .then_with(|| {
                directed(compare_natural(
                    na.item_name(side).unwrap_or_default(),
                    nb.item_name(side).unwrap_or_default(),
                ))
            }),
        SortKey::FullPath(side) => absent_last(na, nb, side).then_with(|| {
            let ta = pa.abstract_path(a.node, side).to_string();
            let tb = pb.abstract_path(b.node, side).to_string();
            directed(compare_segments(ta.split('/'), tb.split('/')))
        }),
        SortKey::RelativeFolder => {
            let folder_of = |n: &FileSystemObject| {
                if n.is_folder() {
                    n.pair_relative_path().clone()
                } else {
                    n.pair_relative_path().parent().unwrap_or_default()
                }
            };
            let (fa, fb) = (folder_of(na), folder_of(nb));
            directed(a.pair.cmp(&b.pair).then_with(|| compare_segments(fa.segments(), fb.segments())))
                .then_with(|| nb.is_folder().cmp(&na.is_folder()))
                .then_with(|| compare_natural(na.pair_name(), nb.pair_name()))
        }
        SortKey::FileSize(side) => absent_last(na, nb, side)
            .then_with(|| kind_rank(na).cmp(&kind_rank(nb)))
            .then_with(|| directed(na.file_size(side).unwrap_or(0).cmp(&nb.file_size(side).unwrap_or(0)))),
        SortKey::ModTime(side) => absent_last(na, nb, side)
            .then_with(|| folders_last(na, nb))
            .then_with(|| directed(na.mod_time(side).unwrap_or(0).cmp(&nb.mod_time(side).unwrap_or(0)))),
        SortKey::Extension(side) => absent_last(na, nb, side)
            .then_with(|| folders_last(na, nb))
            .then_with(|| {
                let ext = |n: &FileSystemObject| {
                    n.item_name(side)
                        .and_then(|name| name.rsplit_once('.'))
                        .map(|(_, ext)| ext.to_string())
                        .unwrap_or_default()
                };
                directed(compare_natural(&ext(na), &ext(nb)))
            }),
        SortKey::Category => {
            let equal = |n: &FileSystemObject| n.category() == CompareFilesResult::Equal;
            equal(na)
                .cmp(&equal(nb))
                .then_with(|| directed(category_rank(na.category()).cmp(&category_rank(nb.category()))))
        }
        SortKey::SyncOperation => {
            let none = |n: &FileSystemObject| n.sync_operation() == SyncOperation::None;
            none(na).cmp(&none(nb)).then_with(|| {
                directed(operation_rank(na.sync_operation()).cmp(&operation_rank(nb.sync_operation())))
            })
        }
    }
}

fn absent_last(a: &FileSystemObject, b: &FileSystemObject, side: Side) -> Ordering {
    b.is_present(side).cmp(&a.is_present(side))
}

fn folders_last(a: &FileSystemObject, b: &FileSystemObject) -> Ordering {
    a.is_folder().cmp(&b.is_folder())
}

/// Files, then symlinks, then folders.
fn kind_rank(n: &FileSystemObject) -> u8 {
    match n.kind() {
        ObjectKind::File(_) => 0,
        ObjectKind::Symlink(_) => 1,
        ObjectKind::Folder(_) => 2,
    }
}

fn compare_segments<'a>(a: impl Iterator<Item = &'a str>, b: impl Iterator<Item = &'a str>) -> Ordering {
    let mut a = a;
    let mut b = b;
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match compare_natural(x, y) {
                Ordering::Equal => continue,
                ord => return ord,
            },
        }
    }
}

fn category_rank(category: CompareFilesResult) -> u8 {
    match category {
        CompareFilesResult::LeftOnly => 0,
        CompareFilesResult::RightOnly => 1,
        CompareFilesResult::LeftNewer => 2,
        CompareFilesResult::RightNewer => 3,
        CompareFilesResult::Different => 4,
        CompareFilesResult::Conflict => 5,
        CompareFilesResult::TraversalError => 6,
        CompareFilesResult::Equal => 7,
    }
}

fn operation_rank(operation: SyncOperation) -> u8 {
    use SyncOperation::*;
    match operation {
        CreateLeft => 0,
        CreateRight => 1,
        DeleteLeft => 2,
        DeleteRight => 3,
        MoveLeftFrom => 4,
        MoveLeftTo => 5,
        MoveRightFrom => 6,
        MoveRightTo => 7,
        UpdateLeft => 8,
        UpdateRight => 9,
        DoNothing => 10,
        Conflict => 11,
        None => 12,
    }
}
