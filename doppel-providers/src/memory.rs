// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory volumes
//!
//! A [`MemoryStore`] holds any number of `mem://<root>` device roots. All
//! backends created from one store see the same data, which makes it a
//! cheap stand-in for a second filesystem in tests and dry runs.

use async_trait::async_trait;
use doppel_core::{
    backend::{FinalizeResult, InputStream, OutputStream, RecycleSession, StorageBackend, StorageCapabilities},
    AbstractPath, AfsPath, CancelToken, CopyResult, DeviceRoot, DoppelError, DoppelResult, FileId, FileInfo,
    FolderInfo, FolderListing, IoCallback, ItemInfo, ItemType, StreamAttributes, SymlinkInfo,
};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const MEMORY_SCHEME: &str = "mem";

const BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum NodeData {
    File(Arc<Vec<u8>>),
    Folder,
    Symlink(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    mod_time: i64,
    file_id: Option<FileId>,
}

impl Node {
    fn item_type(&self) -> ItemType {
        match self.data {
            NodeData::File(_) => ItemType::File,
            NodeData::Folder => ItemType::Folder,
            NodeData::Symlink(_) => ItemType::Symlink,
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    /// keyed by (root, path); device roots themselves are implicit folders
    nodes: BTreeMap<(String, AfsPath), Node>,
    unreadable: HashSet<(String, AfsPath)>,
    next_id: u128,
}

impl StoreInner {
    fn allocate_id(&mut self) -> FileId {
        self.next_id += 1;
        FileId::from_raw(self.next_id)
    }

    fn get(&self, root: &str, path: &AfsPath) -> Option<&Node> {
        self.nodes.get(&(root.to_string(), path.clone()))
    }

    fn item_type(&self, root: &str, path: &AfsPath) -> Option<ItemType> {
        if path.is_root() {
            return Some(ItemType::Folder);
        }
        self.get(root, path).map(Node::item_type)
    }

    fn require_parent_folder(&self, root: &str, path: &AfsPath) -> DoppelResult<()> {
        let parent = path.parent().unwrap_or_default();
        match self.item_type(root, &parent) {
            Some(ItemType::Folder) => Ok(()),
            Some(_) => Err(DoppelError::NotAFolder(display(root, &parent))),
            None => Err(DoppelError::NotFound(display(root, &parent))),
        }
    }

    /// Insert a new item; the parent must be a folder and the name free.
    fn insert_new(&mut self, root: &str, path: &AfsPath, node: Node) -> DoppelResult<()> {
        if path.is_root() || self.item_type(root, path).is_some() {
            return Err(DoppelError::TargetExists(display(root, path)));
        }
        self.require_parent_folder(root, path)?;
        self.nodes.insert((root.to_string(), path.clone()), node);
        Ok(())
    }

    fn children(&self, root: &str, folder: &AfsPath) -> Vec<(AfsPath, Node)> {
        self.nodes
            .iter()
            .filter(|((r, p), _)| r == root && p.parent().as_ref() == Some(folder))
            .map(|((_, p), n)| (p.clone(), n.clone()))
            .collect()
    }

    fn remove(&mut self, root: &str, path: &AfsPath, expected: ItemType) -> DoppelResult<()> {
        match self.item_type(root, path) {
            None => return Err(DoppelError::NotFound(display(root, path))),
            Some(t) if t != expected => {
                return Err(DoppelError::Other(format!("{} is a {t}, not a {expected}", display(root, path))))
            }
            Some(_) => {}
        }
        if expected == ItemType::Folder && !self.children(root, path).is_empty() {
            return Err(DoppelError::DirectoryNotEmpty(display(root, path)));
        }
        self.nodes.remove(&(root.to_string(), path.clone()));
        Ok(())
    }
}

fn display(root: &str, path: &AfsPath) -> String {
    AbstractPath::new(DeviceRoot::new(MEMORY_SCHEME, root), path.clone()).to_string()
}

/// Shared storage for `mem://` volumes
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self, root: impl Into<String>) -> MemoryBackend {
        MemoryBackend {
            device: DeviceRoot::new(MEMORY_SCHEME, root),
            store: self.clone(),
            capabilities: StorageCapabilities {
                symlinks: true,
                file_ids: true,
                ..Default::default()
            },
            case_sensitive: true,
        }
    }

    /// Create a folder and any missing parents.
    pub fn add_folder(&self, root: &str, path: &str) {
        let mut inner = self.inner.lock();
        let mut current = AfsPath::root();
        for seg in AfsPath::new(path).segments() {
            current = current.join(seg);
            inner
                .nodes
                .entry((root.to_string(), current.clone()))
                .or_insert(Node {
                    data: NodeData::Folder,
                    mod_time: 0,
                    file_id: None,
                });
        }
    }

    /// Add a file with a fresh file id, creating parent folders.
    pub fn add_file(&self, root: &str, path: &str, content: &[u8], mod_time: i64) -> FileId {
        let id = self.inner.lock().allocate_id();
        self.add_file_with_id(root, path, content, mod_time, Some(id));
        id
    }

    pub fn add_file_with_id(&self, root: &str, path: &str, content: &[u8], mod_time: i64, file_id: Option<FileId>) {
        let path = AfsPath::new(path);
        if let Some(parent) = path.parent() {
            self.add_folder(root, parent.as_str());
        }
        self.inner.lock().nodes.insert(
            (root.to_string(), path),
            Node {
                data: NodeData::File(Arc::new(content.to_vec())),
                mod_time,
                file_id,
            },
        );
    }

    pub fn add_symlink(&self, root: &str, path: &str, target: &str, mod_time: i64) {
        let path = AfsPath::new(path);
        if let Some(parent) = path.parent() {
            self.add_folder(root, parent.as_str());
        }
        self.inner.lock().nodes.insert(
            (root.to_string(), path),
            Node {
                data: NodeData::Symlink(target.to_string()),
                mod_time,
                file_id: None,
            },
        );
    }

    /// Make listing `path` fail with permission denied.
    pub fn set_unreadable(&self, root: &str, path: &str) {
        self.inner.lock().unreadable.insert((root.to_string(), AfsPath::new(path)));
    }

    pub fn read_file(&self, root: &str, path: &str) -> Option<Vec<u8>> {
        match self.inner.lock().get(root, &AfsPath::new(path)).map(|n| n.data.clone()) {
            Some(NodeData::File(data)) => Some(data.as_ref().clone()),
            _ => None,
        }
    }

    pub fn item_type(&self, root: &str, path: &str) -> Option<ItemType> {
        self.inner.lock().item_type(root, &AfsPath::new(path))
    }

    pub fn mod_time(&self, root: &str, path: &str) -> Option<i64> {
        self.inner.lock().get(root, &AfsPath::new(path)).map(|n| n.mod_time)
    }

    /// All item paths below `root`, sorted.
    pub fn paths(&self, root: &str) -> Vec<String> {
        self.inner
            .lock()
            .nodes
            .keys()
            .filter(|(r, _)| r == root)
            .map(|(_, p)| p.as_str().to_string())
            .collect()
    }
}

/// One `mem://` device root
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    device: DeviceRoot,
    store: MemoryStore,
    capabilities: StorageCapabilities,
    case_sensitive: bool,
}

impl MemoryBackend {
    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    fn root(&self) -> &str {
        self.device.root()
    }

    fn same_store_target<'a>(&self, target: &'a AbstractPath) -> DoppelResult<(&'a str, &'a AfsPath)> {
        if target.device().scheme() != MEMORY_SCHEME {
            return Err(DoppelError::Unsupported(format!("{target} is not a memory path")));
        }
        Ok((target.device().root(), target.afs_path()))
    }
}

struct MemoryInputStream {
    data: Arc<Vec<u8>>,
    pos: usize,
    attrs: StreamAttributes,
}

#[async_trait]
impl InputStream for MemoryInputStream {
    async fn read(&mut self, buf: &mut [u8]) -> DoppelResult<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    async fn attributes(&mut self) -> DoppelResult<Option<StreamAttributes>> {
        Ok(Some(self.attrs.clone()))
    }
}

/// Buffers writes; the file only becomes visible on finalize.
struct MemoryOutputStream {
    store: MemoryStore,
    root: String,
    path: AfsPath,
    buffer: Vec<u8>,
    mod_time: Option<i64>,
}

#[async_trait]
impl OutputStream for MemoryOutputStream {
    async fn write(&mut self, data: &[u8]) -> DoppelResult<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn finalize(&mut self) -> DoppelResult<FinalizeResult> {
        let mut inner = self.store.inner.lock();
        let id = inner.allocate_id();
        let node = Node {
            data: NodeData::File(Arc::new(std::mem::take(&mut self.buffer))),
            mod_time: self.mod_time.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            file_id: Some(id),
        };
        inner.insert_new(&self.root, &self.path, node)?;
        Ok(FinalizeResult {
            file_id: Some(id),
            error_mod_time: None,
        })
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn device(&self) -> &DeviceRoot {
        &self.device
    }

    fn display_name(&self) -> &str {
        "Memory"
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    async fn item_type(&self, path: &AfsPath) -> DoppelResult<ItemType> {
        self.store
            .inner
            .lock()
            .item_type(self.root(), path)
            .ok_or_else(|| DoppelError::NotFound(self.display_path(path)))
    }

    async fn list_folder(&self, path: &AfsPath) -> DoppelResult<FolderListing> {
        let inner = self.store.inner.lock();
        if inner.unreadable.contains(&(self.root().to_string(), path.clone())) {
            return Err(DoppelError::PermissionDenied(self.display_path(path)));
        }
        match inner.item_type(self.root(), path) {
            Some(ItemType::Folder) => {}
            Some(_) => return Err(DoppelError::NotAFolder(self.display_path(path))),
            None => return Err(DoppelError::NotFound(self.display_path(path))),
        }

        let items = inner
            .children(self.root(), path)
            .into_iter()
            .map(|(child, node)| {
                let name = child.name().unwrap_or_default().to_string();
                match node.data {
                    NodeData::File(data) => ItemInfo::File(FileInfo {
                        name,
                        size: data.len() as u64,
                        mod_time: node.mod_time,
                        file_id: node.file_id,
                    }),
                    NodeData::Folder => ItemInfo::Folder(FolderInfo { name }),
                    NodeData::Symlink(_) => ItemInfo::Symlink(SymlinkInfo {
                        name,
                        mod_time: node.mod_time,
                    }),
                }
            })
            .collect();
        Ok(FolderListing {
            items,
            failed_items: Vec::new(),
        })
    }

    async fn create_folder(&self, path: &AfsPath) -> DoppelResult<()> {
        self.store.inner.lock().insert_new(
            self.root(),
            path,
            Node {
                data: NodeData::Folder,
                mod_time: chrono::Utc::now().timestamp(),
                file_id: None,
            },
        )
    }

    async fn remove_file(&self, path: &AfsPath) -> DoppelResult<()> {
        self.store.inner.lock().remove(self.root(), path, ItemType::File)
    }

    async fn remove_symlink(&self, path: &AfsPath) -> DoppelResult<()> {
        self.store.inner.lock().remove(self.root(), path, ItemType::Symlink)
    }

    async fn remove_folder(&self, path: &AfsPath) -> DoppelResult<()> {
        self.store.inner.lock().remove(self.root(), path, ItemType::Folder)
    }

    async fn set_mod_time(&self, path: &AfsPath, mod_time: i64) -> DoppelResult<()> {
        let mut inner = self.store.inner.lock();
        match inner.nodes.get_mut(&(self.root().to_string(), path.clone())) {
            Some(node) => {
                node.mod_time = mod_time;
                Ok(())
            }
            None => Err(DoppelError::NotFound(self.display_path(path))),
        }
    }

    async fn resolve_symlink(&self, path: &AfsPath) -> DoppelResult<AbstractPath> {
        let target = self.read_symlink_target(path).await?;
        let target = String::from_utf8_lossy(&target).into_owned();
        let base = path.parent().unwrap_or_default();
        let resolved = if target.starts_with('/') {
            AfsPath::new(&target)
        } else {
            base.join(&target)
        };
        if self.store.inner.lock().item_type(self.root(), &resolved).is_none() {
            return Err(DoppelError::NotFound(self.display_path(&resolved)));
        }
        Ok(self.abstract_path(&resolved))
    }

    async fn read_symlink_target(&self, path: &AfsPath) -> DoppelResult<Vec<u8>> {
        match self.store.inner.lock().get(self.root(), path).map(|n| &n.data) {
            Some(NodeData::Symlink(target)) => Ok(target.clone().into_bytes()),
            Some(_) => Err(DoppelError::Other(format!("{} is not a symlink", self.display_path(path)))),
            None => Err(DoppelError::NotFound(self.display_path(path))),
        }
    }

    async fn open_input_stream(&self, path: &AfsPath) -> DoppelResult<Box<dyn InputStream>> {
        let node = self
            .store
            .inner
            .lock()
            .get(self.root(), path)
            .cloned()
            .ok_or_else(|| DoppelError::NotFound(self.display_path(path)))?;
        match node.data {
            NodeData::File(data) => Ok(Box::new(MemoryInputStream {
                attrs: StreamAttributes {
                    mod_time: node.mod_time,
                    size: data.len() as u64,
                    file_id: node.file_id,
                },
                data,
                pos: 0,
            })),
            _ => Err(DoppelError::Other(format!("{} is not a file", self.display_path(path)))),
        }
    }

    async fn open_output_stream(
        &self,
        path: &AfsPath,
        _stream_size: Option<u64>,
        mod_time: Option<i64>,
    ) -> DoppelResult<Box<dyn OutputStream>> {
        {
            let inner = self.store.inner.lock();
            if inner.item_type(self.root(), path).is_some() {
                return Err(DoppelError::TargetExists(self.display_path(path)));
            }
            inner.require_parent_folder(self.root(), path)?;
        }
        Ok(Box::new(MemoryOutputStream {
            store: self.store.clone(),
            root: self.root().to_string(),
            path: path.clone(),
            buffer: Vec::new(),
            mod_time,
        }))
    }

    async fn copy_file_same_kind(
        &self,
        source: &AfsPath,
        target: &AbstractPath,
        _copy_permissions: bool,
        progress: Option<&IoCallback<'_>>,
        cancel: &CancelToken,
    ) -> DoppelResult<CopyResult> {
        cancel.check()?;
        let (target_root, target_path) = self.same_store_target(target)?;
        let source_node = self
            .store
            .inner
            .lock()
            .get(self.root(), source)
            .cloned()
            .ok_or_else(|| DoppelError::NotFound(self.display_path(source)))?;
        let NodeData::File(data) = &source_node.data else {
            return Err(DoppelError::Other(format!("{} is not a file", self.display_path(source))));
        };
        let size = data.len() as u64;
        if let Some(cb) = progress {
            cb(size)?;
        }

        let mut inner = self.store.inner.lock();
        let target_id = inner.allocate_id();
        inner.insert_new(
            target_root,
            target_path,
            Node {
                data: source_node.data.clone(),
                mod_time: source_node.mod_time,
                file_id: Some(target_id),
            },
        )?;
        Ok(CopyResult {
            file_size: size,
            mod_time: source_node.mod_time,
            source_id: source_node.file_id,
            target_id: Some(target_id),
            error_mod_time: None,
            error_permissions: None,
        })
    }

    async fn copy_new_folder_same_kind(
        &self,
        _source: &AfsPath,
        target: &AbstractPath,
        _copy_permissions: bool,
    ) -> DoppelResult<()> {
        let (root, path) = self.same_store_target(target)?;
        self.store.inner.lock().insert_new(
            root,
            path,
            Node {
                data: NodeData::Folder,
                mod_time: chrono::Utc::now().timestamp(),
                file_id: None,
            },
        )
    }

    async fn copy_symlink_same_kind(
        &self,
        source: &AfsPath,
        target: &AbstractPath,
        _copy_permissions: bool,
    ) -> DoppelResult<()> {
        let (root, path) = self.same_store_target(target)?;
        let mut inner = self.store.inner.lock();
        let node = inner
            .get(self.root(), source)
            .cloned()
            .ok_or_else(|| DoppelError::NotFound(self.display_path(source)))?;
        if node.item_type() != ItemType::Symlink {
            return Err(DoppelError::Other(format!("{} is not a symlink", self.display_path(source))));
        }
        inner.insert_new(root, path, node)
    }

    async fn rename_item_same_kind(&self, source: &AfsPath, target: &AbstractPath) -> DoppelResult<()> {
        if self.compare_device_root(target.device()) != Ordering::Equal {
            return Err(DoppelError::DifferentVolume {
                source_path: self.display_path(source),
                target: target.to_string(),
            });
        }
        let target_path = target.afs_path();
        let mut inner = self.store.inner.lock();
        let root = self.root().to_string();
        if inner.get(&root, source).is_none() {
            return Err(DoppelError::NotFound(self.display_path(source)));
        }
        if inner.item_type(&root, target_path).is_some() {
            return Err(DoppelError::TargetExists(target.to_string()));
        }
        inner.require_parent_folder(&root, target_path)?;

        let moved: Vec<(AfsPath, AfsPath)> = inner
            .nodes
            .keys()
            .filter(|(r, _)| *r == root)
            .filter_map(|(_, p)| p.strip_prefix(source).map(|rest| (p.clone(), target_path.join(rest.as_str()))))
            .collect();
        for (from, to) in moved {
            if let Some(node) = inner.nodes.remove(&(root.clone(), from)) {
                inner.nodes.insert((root.clone(), to), node);
            }
        }
        Ok(())
    }

    async fn supports_permissions(&self, _path: &AfsPath) -> DoppelResult<bool> {
        Ok(false)
    }

    async fn free_disk_space(&self, _path: &AfsPath) -> DoppelResult<u64> {
        Ok(0)
    }

    async fn supports_recycle_bin(&self, _path: &AfsPath) -> DoppelResult<bool> {
        Ok(false)
    }

    async fn create_recycle_session(&self, _base: &AfsPath) -> DoppelResult<Box<dyn RecycleSession>> {
        Err(DoppelError::Unsupported(format!(
            "no recycle bin on {}",
            self.device
        )))
    }

    async fn recycle_item_if_exists(&self, path: &AfsPath) -> DoppelResult<bool> {
        Err(DoppelError::Unsupported(format!(
            "no recycle bin for {}",
            self.display_path(path)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppel_core::{transfer, TraverseSink};

    #[derive(Default)]
    struct Collect {
        seen: Vec<String>,
        failed: Vec<String>,
    }

    impl TraverseSink for Collect {
        fn on_file(&mut self, folder: &AfsPath, file: &FileInfo) {
            self.seen.push(format!("f:{}", folder.join(&file.name)));
        }
        fn on_symlink(&mut self, folder: &AfsPath, link: &SymlinkInfo) {
            self.seen.push(format!("l:{}", folder.join(&link.name)));
        }
        fn on_folder(&mut self, folder: &AfsPath, sub: &FolderInfo) -> bool {
            self.seen.push(format!("d:{}", folder.join(&sub.name)));
            sub.name != "skip"
        }
        fn on_folder_error(&mut self, folder: &AfsPath, _error: &DoppelError) {
            self.failed.push(folder.to_string());
        }
        fn on_item_error(&mut self, _folder: &AfsPath, name: &str, _message: &str) {
            self.failed.push(name.to_string());
        }
    }

    #[tokio::test]
    async fn test_traverse_reports_everything_once() {
        let store = MemoryStore::new();
        store.add_file("vol", "base/a.txt", b"a", 1);
        store.add_file("vol", "base/sub/b.txt", b"b", 2);
        store.add_symlink("vol", "base/sub/link", "b.txt", 3);
        store.add_file("vol", "base/skip/hidden.txt", b"h", 4);
        store.add_folder("vol", "base/locked/x");
        store.set_unreadable("vol", "base/locked");
        let backend = store.backend("vol");

        let mut sink = Collect::default();
        backend
            .traverse(&AfsPath::new("base"), &mut sink, &CancelToken::new())
            .await
            .unwrap();
        sink.seen.sort();
        assert_eq!(
            sink.seen,
            vec!["d:locked", "d:skip", "d:sub", "f:a.txt", "f:sub/b.txt", "l:sub/link"]
        );
        assert_eq!(sink.failed, vec!["locked"]);
    }

    #[tokio::test]
    async fn test_traverse_stops_on_cancel() {
        let store = MemoryStore::new();
        store.add_file("vol", "a", b"", 0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut sink = Collect::default();
        let result = store.backend("vol").traverse(&AfsPath::root(), &mut sink, &cancel).await;
        assert!(matches!(result, Err(DoppelError::Cancelled)));
    }

    #[tokio::test]
    async fn test_output_stream_invisible_until_finalized() {
        let store = MemoryStore::new();
        let backend = store.backend("vol");
        let mut out = backend.open_output_stream(&AfsPath::new("f"), None, Some(9)).await.unwrap();
        out.write(b"abc").await.unwrap();
        assert!(store.item_type("vol", "f").is_none());
        out.finalize().await.unwrap();
        assert_eq!(store.read_file("vol", "f").unwrap(), b"abc");
        assert_eq!(store.mod_time("vol", "f"), Some(9));
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let store = MemoryStore::new();
        let backend = store.backend("vol");
        assert!(matches!(
            backend.create_folder(&AfsPath::new("a/b")).await,
            Err(DoppelError::NotFound(_))
        ));
        backend.create_folder(&AfsPath::new("a")).await.unwrap();
        backend.create_folder(&AfsPath::new("a/b")).await.unwrap();
        assert!(matches!(
            backend.create_folder(&AfsPath::new("a")).await,
            Err(DoppelError::TargetExists(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() {
        let store = MemoryStore::new();
        store.add_file("vol", "old/x/f.txt", b"f", 0);
        let backend = store.backend("vol");
        backend
            .rename_item_same_kind(&AfsPath::new("old"), &backend.abstract_path(&AfsPath::new("new")))
            .await
            .unwrap();
        assert_eq!(store.paths("vol"), vec!["new", "new/x", "new/x/f.txt"]);
    }

    #[tokio::test]
    async fn test_rename_across_roots_fails() {
        let store = MemoryStore::new();
        store.add_file("a", "f", b"f", 0);
        let a = store.backend("a");
        let b = store.backend("b");
        let result = a
            .rename_item_same_kind(&AfsPath::new("f"), &b.abstract_path(&AfsPath::new("f")))
            .await;
        assert!(matches!(result, Err(DoppelError::DifferentVolume { .. })));
    }

    #[tokio::test]
    async fn test_move_falls_back_to_copy_across_roots() {
        let store = MemoryStore::new();
        store.add_file("a", "f", b"payload", 77);
        let a = store.backend("a");
        let b = store.backend("b");
        let src = AfsPath::new("f");
        let dst = AfsPath::new("g");

        transfer::move_item(
            transfer::Location::new(&a, &src),
            transfer::Location::new(&b, &dst),
            ItemType::File,
            transfer::CopyOptions::default(),
            None,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert!(store.item_type("a", "f").is_none());
        assert_eq!(store.read_file("b", "g").unwrap(), b"payload");
        assert_eq!(store.mod_time("b", "g"), Some(77));
    }

    #[tokio::test]
    async fn test_remove_folder_not_empty() {
        let store = MemoryStore::new();
        store.add_file("vol", "d/f", b"", 0);
        let backend = store.backend("vol");
        assert!(matches!(
            backend.remove_folder(&AfsPath::new("d")).await,
            Err(DoppelError::DirectoryNotEmpty(_))
        ));
    }

    #[tokio::test]
    async fn test_path_status_unreachable_root_never_happens_for_memory() {
        let store = MemoryStore::new();
        let backend = store.backend("vol");
        let status = backend.path_status(&AfsPath::new("x/y")).await.unwrap();
        assert!(status.existing_path.afs_path().is_root());
        assert_eq!(status.missing, vec!["x", "y"]);
    }
}
