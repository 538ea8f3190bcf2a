// SPDX-License-Identifier: AGPL-3.0-or-later
//! Difference tree
//!
//! Each folder pair owns an arena of [`FileSystemObject`]s addressed by
//! [`NodeId`]. Parent links are plain indices into the same arena. After a
//! comparison pass only the sync operation and the direction override of a
//! node can change.

use doppel_core::{AbstractPath, AfsPath, FileId, ItemType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node within its [`BaseFolderPair`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

/// Left and right state of one attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidePair<T> {
    pub left: Option<T>,
    pub right: Option<T>,
}

impl<T> SidePair<T> {
    pub fn new(left: Option<T>, right: Option<T>) -> Self {
        Self { left, right }
    }

    pub fn one_sided(side: Side, value: T) -> Self {
        match side {
            Side::Left => Self::new(Some(value), None),
            Side::Right => Self::new(None, Some(value)),
        }
    }

    pub fn get(&self, side: Side) -> Option<&T> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    pub fn is_present(&self, side: Side) -> bool {
        self.get(side).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescr {
    pub size: u64,
    pub mod_time: i64,
    pub file_id: Option<FileId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkDescr {
    pub mod_time: i64,
}

/// What a node is, with per-side attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    File(SidePair<FileDescr>),
    Symlink(SidePair<SymlinkDescr>),
    Folder(SidePair<()>),
}

impl ObjectKind {
    pub fn item_type(&self) -> ItemType {
        match self {
            ObjectKind::File(_) => ItemType::File,
            ObjectKind::Symlink(_) => ItemType::Symlink,
            ObjectKind::Folder(_) => ItemType::Folder,
        }
    }

    pub fn is_present(&self, side: Side) -> bool {
        match self {
            ObjectKind::File(p) => p.is_present(side),
            ObjectKind::Symlink(p) => p.is_present(side),
            ObjectKind::Folder(p) => p.is_present(side),
        }
    }
}

/// Relationship between the left and right state of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareFilesResult {
    Equal,
    LeftOnly,
    RightOnly,
    LeftNewer,
    RightNewer,
    Different,
    Conflict,
    /// Contents of a folder on the other side could not be read.
    TraversalError,
}

impl fmt::Display for CompareFilesResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareFilesResult::Equal => "equal",
            CompareFilesResult::LeftOnly => "left only",
            CompareFilesResult::RightOnly => "right only",
            CompareFilesResult::LeftNewer => "left newer",
            CompareFilesResult::RightNewer => "right newer",
            CompareFilesResult::Different => "different",
            CompareFilesResult::Conflict => "conflict",
            CompareFilesResult::TraversalError => "traversal error",
        })
    }
}

/// Action assigned to one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    None,
    CreateLeft,
    CreateRight,
    UpdateLeft,
    UpdateRight,
    DeleteLeft,
    DeleteRight,
    /// Source of a rename on the left; the linked node carries the target.
    MoveLeftFrom,
    MoveLeftTo,
    MoveRightFrom,
    MoveRightTo,
    DoNothing,
    Conflict,
}

impl SyncOperation {
    /// Side written by this operation.
    pub fn target_side(self) -> Option<Side> {
        use SyncOperation::*;
        match self {
            CreateLeft | UpdateLeft | DeleteLeft | MoveLeftFrom | MoveLeftTo => Some(Side::Left),
            CreateRight | UpdateRight | DeleteRight | MoveRightFrom | MoveRightTo => Some(Side::Right),
            None | DoNothing | Conflict => Option::None,
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SyncOperation::*;
        f.write_str(match self {
            None => "-",
            CreateLeft => "create left",
            CreateRight => "create right",
            UpdateLeft => "update left",
            UpdateRight => "update right",
            DeleteLeft => "delete left",
            DeleteRight => "delete right",
            MoveLeftFrom => "move left (from)",
            MoveLeftTo => "move left (to)",
            MoveRightFrom => "move right (from)",
            MoveRightTo => "move right (to)",
            DoNothing => "do nothing",
            Conflict => "conflict",
        })
    }
}

/// Direction chosen for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    None,
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct FileSystemObject {
    parent: Option<NodeId>,
    names: SidePair<String>,
    kind: ObjectKind,
    category: CompareFilesResult,
    category_note: Option<String>,
    children: Vec<NodeId>,
    move_ref: Option<NodeId>,
    direction_override: Option<SyncDirection>,
    operation: SyncOperation,
    pair_path: AfsPath,
}

impl FileSystemObject {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn item_type(&self) -> ItemType {
        self.kind.item_type()
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, ObjectKind::Folder(_))
    }

    pub fn is_present(&self, side: Side) -> bool {
        self.kind.is_present(side)
    }

    /// Name on `side`, if the item exists there.
    pub fn item_name(&self, side: Side) -> Option<&str> {
        self.names.get(side).map(String::as_str)
    }

    /// Name common to both sides; the left spelling wins on case differences.
    pub fn pair_name(&self) -> &str {
        self.names
            .left
            .as_deref()
            .or(self.names.right.as_deref())
            .unwrap_or_default()
    }

    /// Path below the base folders, spelled with pair names.
    pub fn pair_relative_path(&self) -> &AfsPath {
        &self.pair_path
    }

    pub fn category(&self) -> CompareFilesResult {
        self.category
    }

    pub fn category_note(&self) -> Option<&str> {
        self.category_note.as_deref()
    }

    pub fn file(&self, side: Side) -> Option<&FileDescr> {
        match &self.kind {
            ObjectKind::File(p) => p.get(side),
            _ => None,
        }
    }

    pub fn file_size(&self, side: Side) -> Option<u64> {
        self.file(side).map(|f| f.size)
    }

    pub fn mod_time(&self, side: Side) -> Option<i64> {
        match &self.kind {
            ObjectKind::File(p) => p.get(side).map(|f| f.mod_time),
            ObjectKind::Symlink(p) => p.get(side).map(|s| s.mod_time),
            ObjectKind::Folder(_) => None,
        }
    }

    pub fn file_id(&self, side: Side) -> Option<FileId> {
        self.file(side).and_then(|f| f.file_id)
    }

    /// Other half of a detected rename.
    pub fn move_ref(&self) -> Option<NodeId> {
        self.move_ref
    }

    pub fn direction_override(&self) -> Option<SyncDirection> {
        self.direction_override
    }

    pub fn sync_operation(&self) -> SyncOperation {
        self.operation
    }
}

/// Difference tree of one configured folder pair
#[derive(Debug, Clone)]
pub struct BaseFolderPair {
    left_base: AbstractPath,
    right_base: AbstractPath,
    left_exists: bool,
    right_exists: bool,
    case_sensitive: bool,
    fatal_error: Option<String>,
    nodes: Vec<FileSystemObject>,
    roots: Vec<NodeId>,
}

impl BaseFolderPair {
    pub fn new(left_base: AbstractPath, right_base: AbstractPath) -> Self {
        Self {
            left_base,
            right_base,
            left_exists: false,
            right_exists: false,
            case_sensitive: true,
            fatal_error: None,
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    pub fn base(&self, side: Side) -> &AbstractPath {
        match side {
            Side::Left => &self.left_base,
            Side::Right => &self.right_base,
        }
    }

    pub fn base_exists(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left_exists,
            Side::Right => self.right_exists,
        }
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Set when the pair could not be compared at all.
    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal_error.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &FileSystemObject {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &FileSystemObject)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Relative path as spelled on `side`, falling back to pair names for
    /// components that only exist on the other side.
    pub fn relative_path(&self, id: NodeId, side: Side) -> AfsPath {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            names.push(node.item_name(side).unwrap_or(node.pair_name()).to_string());
            current = node.parent;
        }
        AfsPath::from_segments(names.iter().rev())
    }

    pub fn abstract_path(&self, id: NodeId, side: Side) -> AbstractPath {
        self.base(side).join(self.relative_path(id, side).as_str())
    }

    /// Parents before children, siblings in insertion order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        order
    }

    /// Whether the node or anything below it differs.
    pub fn has_differences(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.category != CompareFilesResult::Equal
            || node.children.iter().any(|&child| self.has_differences(child))
    }

    pub fn set_sync_operation(&mut self, id: NodeId, operation: SyncOperation) {
        self.nodes[id.0].operation = operation;
    }

    pub fn set_direction_override(&mut self, id: NodeId, direction: Option<SyncDirection>) {
        self.nodes[id.0].direction_override = direction;
    }

    pub(crate) fn set_base_status(&mut self, left_exists: bool, right_exists: bool, case_sensitive: bool) {
        self.left_exists = left_exists;
        self.right_exists = right_exists;
        self.case_sensitive = case_sensitive;
    }

    pub(crate) fn set_fatal_error(&mut self, message: String) {
        self.fatal_error = Some(message);
    }

    pub(crate) fn add_node(
        &mut self,
        parent: Option<NodeId>,
        names: SidePair<String>,
        kind: ObjectKind,
        category: CompareFilesResult,
        category_note: Option<String>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let pair_name = names.left.as_deref().or(names.right.as_deref()).unwrap_or_default();
        let pair_path = match parent {
            Some(p) => self.node(p).pair_path.join(pair_name),
            None => AfsPath::new(pair_name),
        };
        self.nodes.push(FileSystemObject {
            parent,
            names,
            kind,
            category,
            category_note,
            children: Vec::new(),
            move_ref: None,
            direction_override: None,
            operation: SyncOperation::None,
            pair_path,
        });
        match parent {
            Some(p) => self.nodes[p.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub(crate) fn set_category(&mut self, id: NodeId, category: CompareFilesResult, note: Option<String>) {
        let node = &mut self.nodes[id.0];
        node.category = category;
        node.category_note = note;
    }

    pub(crate) fn link_move(&mut self, a: NodeId, b: NodeId) {
        self.nodes[a.0].move_ref = Some(b);
        self.nodes[b.0].move_ref = Some(a);
    }
}

/// Result of one comparison pass; pairs keep their configured order
#[derive(Debug, Clone, Default)]
pub struct FolderComparison {
    pairs: Vec<BaseFolderPair>,
}

impl FolderComparison {
    pub fn new(pairs: Vec<BaseFolderPair>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[BaseFolderPair] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut [BaseFolderPair] {
        &mut self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn total_items(&self) -> usize {
        self.pairs.iter().map(BaseFolderPair::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppel_core::DeviceRoot;

    fn pair() -> BaseFolderPair {
        let dev = DeviceRoot::new("mem", "v");
        BaseFolderPair::new(
            AbstractPath::new(dev.clone(), AfsPath::new("left")),
            AbstractPath::new(dev, AfsPath::new("right")),
        )
    }

    fn file(size: u64) -> FileDescr {
        FileDescr {
            size,
            mod_time: 0,
            file_id: None,
        }
    }

    #[test]
    fn test_paths_follow_parent_links() {
        let mut p = pair();
        let dir = p.add_node(
            None,
            SidePair::new(Some("Docs".into()), Some("docs".into())),
            ObjectKind::Folder(SidePair::new(Some(()), Some(()))),
            CompareFilesResult::Equal,
            None,
        );
        let f = p.add_node(
            Some(dir),
            SidePair::one_sided(Side::Right, "a.txt".into()),
            ObjectKind::File(SidePair::one_sided(Side::Right, file(1))),
            CompareFilesResult::RightOnly,
            None,
        );

        assert_eq!(p.node(f).parent(), Some(dir));
        assert_eq!(p.node(dir).children(), &[f]);
        assert_eq!(p.node(f).pair_relative_path().as_str(), "Docs/a.txt");
        assert_eq!(p.relative_path(f, Side::Right).as_str(), "docs/a.txt");
        assert_eq!(p.relative_path(f, Side::Left).as_str(), "Docs/a.txt");
        assert_eq!(p.abstract_path(f, Side::Right).to_phrase(), "mem://v/right/docs/a.txt");
        assert!(p.has_differences(dir));
        assert!(!p.node(f).is_present(Side::Left));
    }

    #[test]
    fn test_preorder_parents_first() {
        let mut p = pair();
        let both = || ObjectKind::Folder(SidePair::new(Some(()), Some(())));
        let names = |n: &str| SidePair::new(Some(n.to_string()), Some(n.to_string()));
        let a = p.add_node(None, names("a"), both(), CompareFilesResult::Equal, None);
        let b = p.add_node(None, names("b"), both(), CompareFilesResult::Equal, None);
        let a1 = p.add_node(Some(a), names("a1"), both(), CompareFilesResult::Equal, None);
        let a1x = p.add_node(Some(a1), names("x"), both(), CompareFilesResult::Equal, None);
        assert_eq!(p.preorder(), vec![a, a1, a1x, b]);
        assert!(!p.has_differences(a));
    }

    #[test]
    fn test_only_operation_and_override_mutable() {
        let mut p = pair();
        let f = p.add_node(
            None,
            SidePair::one_sided(Side::Left, "f".into()),
            ObjectKind::File(SidePair::one_sided(Side::Left, file(3))),
            CompareFilesResult::LeftOnly,
            None,
        );
        p.set_sync_operation(f, SyncOperation::CreateRight);
        p.set_direction_override(f, Some(SyncDirection::None));
        assert_eq!(p.node(f).sync_operation(), SyncOperation::CreateRight);
        assert_eq!(p.node(f).direction_override(), Some(SyncDirection::None));
        assert_eq!(p.node(f).category(), CompareFilesResult::LeftOnly);
        assert_eq!(p.node(f).file_size(Side::Left), Some(3));
    }

    #[test]
    fn test_operation_target_side() {
        assert_eq!(SyncOperation::CreateRight.target_side(), Some(Side::Right));
        assert_eq!(SyncOperation::MoveLeftFrom.target_side(), Some(Side::Left));
        assert_eq!(SyncOperation::Conflict.target_side(), None);
    }
}
