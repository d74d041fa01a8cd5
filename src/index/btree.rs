//! On-disk B-tree of checkpoints keyed by `(timestamp, rank)`
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes, see header.rs)        │
//! ├─────────────────────────────────────────┤
//! │ TREE META (32 bytes)                    │
//! │   degree: u32                           │
//! │   root: u64          (node id)          │
//! │   node_count: u64                       │
//! │   reserved: [u8; 8]                     │
//! │   checksum: u32      (CRC32 of 0..28)   │
//! ├─────────────────────────────────────────┤
//! │ NODES (fixed size, node id n at         │
//! │        96 + n * node_size)              │
//! │   leaf: u8                              │
//! │   reserved: [u8; 3]                     │
//! │   key_count: u32                        │
//! │   keys: [record; 2t - 1]                │
//! │   children: [u64; 2t]                   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Nodes are split on the way down during insertion, so an insert touches
//! each level once. Every modified node is written through; a bounded cache
//! serves repeated reads of the upper levels.

use crate::index::error::{IndexError, IndexResult};
use crate::index::header::{self, IndexHeader, BTREE_MAGIC, HEADER_SIZE};
use crate::index::{Checkpoint, Location};
use crate::types::{TimeRange, Timestamp, TraceSignature};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Size of the tree metadata block
const META_SIZE: usize = 32;

/// Offset of node 0
const NODES_START: u64 = (HEADER_SIZE + META_SIZE) as u64;

/// Fixed prefix of every node (leaf flag + key count)
const NODE_PREFIX: usize = 8;

/// Outcome of a timestamp search in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSearch {
    /// Rank of the lowest-ranked checkpoint carrying the timestamp
    Found(u64),
    /// No checkpoint has the timestamp. `floor_rank` is the checkpoint
    /// immediately before it in key order, if any.
    NotFound { floor_rank: Option<u64> },
}

#[derive(Debug, Clone)]
struct Node<L> {
    id: u64,
    leaf: bool,
    keys: Vec<Checkpoint<L>>,
    children: Vec<u64>,
}

/// Bytes used by one node of minimum degree `degree`
fn node_size<L: Location>(degree: usize) -> usize {
    NODE_PREFIX + (2 * degree - 1) * Checkpoint::<L>::record_size() + 2 * degree * 8
}

fn check_degree(degree: usize) -> IndexResult<()> {
    if degree < 2 {
        return Err(IndexError::Config(format!(
            "B-tree degree must be at least 2, got {}",
            degree
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TreeMeta {
    degree: u32,
    root: u64,
    node_count: u64,
}

impl TreeMeta {
    fn to_bytes(self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[0..4].copy_from_slice(&self.degree.to_le_bytes());
        buf[4..12].copy_from_slice(&self.root.to_le_bytes());
        buf[12..20].copy_from_slice(&self.node_count.to_le_bytes());
        let checksum = crc32fast::hash(&buf[0..28]);
        buf[28..32].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; META_SIZE]) -> IndexResult<Self> {
        if header::read_u32(buf, 28) != crc32fast::hash(&buf[0..28]) {
            return Err(IndexError::Corruption("Tree metadata checksum mismatch".into()));
        }
        Ok(Self {
            degree: header::read_u32(buf, 0),
            root: header::read_u64(buf, 4),
            node_count: header::read_u64(buf, 12),
        })
    }
}

/// File handle, node cache and tree shape. Guarded by one mutex so that a
/// search sees a consistent root.
struct NodeStore<L> {
    file: File,
    cache: HashMap<u64, Node<L>>,
    cache_capacity: usize,
    degree: usize,
    node_size: usize,
    root: u64,
    node_count: u64,
}

impl<L: Location> NodeStore<L> {
    fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    fn meta(&self) -> TreeMeta {
        TreeMeta {
            degree: self.degree as u32,
            root: self.root,
            node_count: self.node_count,
        }
    }

    fn write_meta(&mut self) -> IndexResult<()> {
        let bytes = self.meta().to_bytes();
        self.file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    fn offset_of(&self, id: u64) -> u64 {
        NODES_START + id * self.node_size as u64
    }

    fn allocate(&mut self) -> u64 {
        let id = self.node_count;
        self.node_count += 1;
        id
    }

    fn cache_put(&mut self, node: Node<L>) {
        if self.cache_capacity == 0 {
            return;
        }
        if self.cache.len() >= self.cache_capacity && !self.cache.contains_key(&node.id) {
            self.cache.clear();
        }
        self.cache.insert(node.id, node);
    }

    fn read(&mut self, id: u64) -> IndexResult<Node<L>> {
        if let Some(node) = self.cache.get(&id) {
            return Ok(node.clone());
        }
        if id >= self.node_count {
            return Err(IndexError::Corruption(format!(
                "Node {} beyond node count {}",
                id, self.node_count
            )));
        }

        let mut buf = vec![0u8; self.node_size];
        self.file.seek(SeekFrom::Start(self.offset_of(id)))?;
        self.file.read_exact(&mut buf)?;
        let node = self.decode(id, &buf)?;

        self.cache_put(node.clone());
        Ok(node)
    }

    fn write(&mut self, node: &Node<L>) -> IndexResult<()> {
        let buf = self.encode(node);
        self.file.seek(SeekFrom::Start(self.offset_of(node.id)))?;
        self.file.write_all(&buf)?;
        self.cache_put(node.clone());
        Ok(())
    }

    fn encode(&self, node: &Node<L>) -> Vec<u8> {
        let record_size = Checkpoint::<L>::record_size();
        let children_at = NODE_PREFIX + self.max_keys() * record_size;

        let mut buf = vec![0u8; self.node_size];
        buf[0] = node.leaf as u8;
        buf[4..8].copy_from_slice(&(node.keys.len() as u32).to_le_bytes());
        for (i, key) in node.keys.iter().enumerate() {
            let at = NODE_PREFIX + i * record_size;
            key.encode(&mut buf[at..at + record_size]);
        }
        for (i, child) in node.children.iter().enumerate() {
            let at = children_at + i * 8;
            buf[at..at + 8].copy_from_slice(&child.to_le_bytes());
        }
        buf
    }

    fn decode(&self, id: u64, buf: &[u8]) -> IndexResult<Node<L>> {
        let record_size = Checkpoint::<L>::record_size();
        let children_at = NODE_PREFIX + self.max_keys() * record_size;

        let leaf = buf[0] != 0;
        let key_count = header::read_u32(buf, 4) as usize;
        if key_count > self.max_keys() {
            return Err(IndexError::Corruption(format!(
                "Node {} claims {} keys (max {})",
                id,
                key_count,
                self.max_keys()
            )));
        }

        let keys = (0..key_count)
            .map(|i| {
                let at = NODE_PREFIX + i * record_size;
                Checkpoint::decode(&buf[at..at + record_size])
            })
            .collect();
        let children = if leaf {
            Vec::new()
        } else {
            (0..=key_count)
                .map(|i| header::read_u64(buf, children_at + i * 8))
                .collect()
        };

        Ok(Node {
            id,
            leaf,
            keys,
            children,
        })
    }

    fn insert(&mut self, checkpoint: Checkpoint<L>) -> IndexResult<()> {
        let root = self.read(self.root)?;
        if root.keys.len() < self.max_keys() {
            return self.insert_non_full(root, checkpoint);
        }

        // Grow the tree by one level
        let new_root = Node {
            id: self.allocate(),
            leaf: false,
            keys: Vec::new(),
            children: vec![root.id],
        };
        self.root = new_root.id;
        tracing::debug!("B-tree root split, new root {}", new_root.id);

        let new_root = self.split_child(new_root, 0, root)?;
        self.insert_non_full(new_root, checkpoint)
    }

    /// Move the median of the full `child` (at `parent.children[i]`) up into
    /// `parent`, giving the upper half to a new sibling. Returns the updated
    /// parent.
    fn split_child(
        &mut self,
        mut parent: Node<L>,
        i: usize,
        mut child: Node<L>,
    ) -> IndexResult<Node<L>> {
        let t = self.degree;

        let mut sibling = Node {
            id: self.allocate(),
            leaf: child.leaf,
            keys: child.keys.split_off(t),
            children: Vec::new(),
        };
        let median = child
            .keys
            .pop()
            .ok_or_else(|| IndexError::Corruption(format!("Split of short node {}", child.id)))?;
        if !child.leaf {
            sibling.children = child.children.split_off(t);
        }

        parent.keys.insert(i, median);
        parent.children.insert(i + 1, sibling.id);

        self.write(&child)?;
        self.write(&sibling)?;
        self.write(&parent)?;
        Ok(parent)
    }

    fn insert_non_full(&mut self, mut node: Node<L>, checkpoint: Checkpoint<L>) -> IndexResult<()> {
        let key = checkpoint.key();
        loop {
            let mut pos = node.keys.partition_point(|k| k.key() < key);
            if node.leaf {
                node.keys.insert(pos, checkpoint);
                return self.write(&node);
            }

            let mut child = self.read(child_id(&node, pos)?)?;
            if child.keys.len() == self.max_keys() {
                node = self.split_child(node, pos, child)?;
                if key > node.keys[pos].key() {
                    pos += 1;
                }
                child = self.read(child_id(&node, pos)?)?;
            }
            node = child;
        }
    }

    fn search(&mut self, timestamp: Timestamp) -> IndexResult<TreeSearch> {
        let mut node = self.read(self.root)?;
        let mut lower_bound: Option<(Timestamp, u64)> = None;
        let mut floor_rank = None;

        loop {
            let i = node.keys.partition_point(|k| k.timestamp < timestamp);
            if i > 0 {
                floor_rank = Some(node.keys[i - 1].rank);
            }
            if let Some(key) = node.keys.get(i) {
                lower_bound = Some((key.timestamp, key.rank));
            }
            if node.leaf {
                break;
            }
            node = self.read(child_id(&node, i)?)?;
        }

        Ok(match lower_bound {
            Some((ts, rank)) if ts == timestamp => TreeSearch::Found(rank),
            _ => TreeSearch::NotFound { floor_rank },
        })
    }

    fn walk(&mut self, id: u64, visit: &mut dyn FnMut(&Checkpoint<L>)) -> IndexResult<()> {
        let node = self.read(id)?;
        for (i, key) in node.keys.iter().enumerate() {
            if !node.leaf {
                self.walk(child_id(&node, i)?, visit)?;
            }
            visit(key);
        }
        if !node.leaf {
            self.walk(child_id(&node, node.keys.len())?, visit)?;
        }
        Ok(())
    }
}

fn child_id<L>(node: &Node<L>, i: usize) -> IndexResult<u64> {
    node.children
        .get(i)
        .copied()
        .ok_or_else(|| IndexError::Corruption(format!("Node {} has no child {}", node.id, i)))
}

/// Persistent B-tree of checkpoints
pub struct BTree<L: Location> {
    path: PathBuf,
    header: IndexHeader,
    degree: usize,
    store: Option<Mutex<NodeStore<L>>>,
    created_from_scratch: bool,
}

impl<L: Location> BTree<L> {
    /// Open the tree at `path`, reusing it when it is complete, matches
    /// `signature` and was built with the same degree
    pub fn open(
        path: impl AsRef<Path>,
        signature: TraceSignature,
        degree: usize,
        cache_capacity: usize,
    ) -> IndexResult<Self> {
        check_degree(degree)?;
        let path = path.as_ref().to_path_buf();
        let node_size = node_size::<L>(degree);

        let mut opened = header::open_or_create(&path, BTREE_MAGIC, L::ENCODED_SIZE, signature)?;
        let mut meta = None;

        if !opened.created_from_scratch {
            match Self::load_meta(&mut opened.file, degree, node_size) {
                Ok(existing) => meta = Some(existing),
                Err(e) => {
                    tracing::warn!("B-tree {:?} unusable, rebuilding: {}", path, e);
                    drop(opened);
                    opened = header::create(&path, BTREE_MAGIC, L::ENCODED_SIZE, signature)?;
                }
            }
        }

        Self::from_opened(path, opened, degree, cache_capacity, meta)
    }

    /// Start an empty tree at `path`, discarding whatever the file held
    pub fn create(
        path: impl AsRef<Path>,
        signature: TraceSignature,
        degree: usize,
        cache_capacity: usize,
    ) -> IndexResult<Self> {
        check_degree(degree)?;
        let path = path.as_ref().to_path_buf();
        let opened = header::create(&path, BTREE_MAGIC, L::ENCODED_SIZE, signature)?;
        Self::from_opened(path, opened, degree, cache_capacity, None)
    }

    fn from_opened(
        path: PathBuf,
        opened: header::OpenedFile,
        degree: usize,
        cache_capacity: usize,
        meta: Option<TreeMeta>,
    ) -> IndexResult<Self> {
        let node_size = node_size::<L>(degree);
        let mut store = NodeStore {
            file: opened.file,
            cache: HashMap::new(),
            cache_capacity,
            degree,
            node_size,
            root: 0,
            node_count: 0,
        };

        match meta {
            Some(meta) => {
                store.root = meta.root;
                store.node_count = meta.node_count;
            }
            None => {
                let root = Node {
                    id: store.allocate(),
                    leaf: true,
                    keys: Vec::new(),
                    children: Vec::new(),
                };
                store.write(&root)?;
                store.write_meta()?;
            }
        }

        Ok(Self {
            path,
            header: opened.header,
            degree,
            store: Some(Mutex::new(store)),
            created_from_scratch: meta.is_none(),
        })
    }

    fn load_meta(file: &mut File, degree: usize, node_size: usize) -> IndexResult<TreeMeta> {
        let mut buf = [0u8; META_SIZE];
        file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        file.read_exact(&mut buf)?;
        let meta = TreeMeta::from_bytes(&buf)?;

        if meta.degree as usize != degree {
            return Err(IndexError::InvalidFormat(format!(
                "built with degree {}, configured {}",
                meta.degree, degree
            )));
        }
        if meta.root >= meta.node_count {
            return Err(IndexError::Corruption(format!(
                "root {} beyond node count {}",
                meta.root, meta.node_count
            )));
        }
        let expected = NODES_START + meta.node_count * node_size as u64;
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(IndexError::Corruption(format!(
                "file truncated ({} < {} bytes)",
                actual, expected
            )));
        }
        Ok(meta)
    }

    fn store(&self) -> IndexResult<MutexGuard<'_, NodeStore<L>>> {
        self.store
            .as_ref()
            .ok_or(IndexError::Closed)?
            .lock()
            .map_err(|e| IndexError::Lock(e.to_string()))
    }

    fn store_mut(&mut self) -> IndexResult<&mut NodeStore<L>> {
        self.store
            .as_mut()
            .ok_or(IndexError::Closed)?
            .get_mut()
            .map_err(|e| IndexError::Lock(e.to_string()))
    }

    /// Insert a checkpoint whose rank is already assigned
    pub fn insert(&mut self, checkpoint: Checkpoint<L>) -> IndexResult<()> {
        self.store_mut()?.insert(checkpoint)?;
        self.header.size += 1;
        Ok(())
    }

    /// Look up a timestamp
    pub fn search(&self, timestamp: Timestamp) -> IndexResult<TreeSearch> {
        self.store()?.search(timestamp)
    }

    /// Call `visit` on every checkpoint in `(timestamp, rank)` order
    pub fn visit_in_order(&self, mut visit: impl FnMut(&Checkpoint<L>)) -> IndexResult<()> {
        let mut store = self.store()?;
        let root = store.root;
        store.walk(root, &mut visit)
    }

    pub fn len(&self) -> u64 {
        self.header.size
    }

    pub fn is_empty(&self) -> bool {
        self.header.size == 0
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of allocated nodes
    pub fn node_count(&self) -> IndexResult<u64> {
        Ok(self.store()?.node_count)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn is_created_from_scratch(&self) -> bool {
        self.created_from_scratch
    }

    pub fn is_complete(&self) -> bool {
        self.header.complete
    }

    pub fn set_time_range(&mut self, range: TimeRange) {
        self.header.time_range = range;
    }

    pub fn set_nb_events(&mut self, nb_events: u64) {
        self.header.nb_events = nb_events;
    }

    fn persist(&mut self) -> IndexResult<()> {
        let header = self.header.clone();
        let store = self.store_mut()?;
        store.write_meta()?;
        header.write_to(&mut store.file)?;
        store.file.sync_all()?;
        Ok(())
    }

    /// Flag the tree as complete so the next session can reuse it
    pub fn set_complete(&mut self) -> IndexResult<()> {
        if self.header.complete {
            return Ok(());
        }
        self.header.complete = true;
        self.persist()
    }

    /// Persist metadata and close the file
    pub fn dispose(&mut self) -> IndexResult<()> {
        if self.store.is_none() {
            return Ok(());
        }
        let result = self.persist();
        self.store = None;
        result
    }
}

impl<L: Location> Drop for BTree<L> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::warn!("Failed to close B-tree {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn signature() -> TraceSignature {
        TraceSignature::new(99, 7)
    }

    /// Deterministic permutation of 0..n
    fn scrambled(n: u64) -> Vec<u64> {
        (0..n).map(|i| (i * 7919) % n).collect()
    }

    fn build(path: &Path, degree: usize, timestamps: &[i64]) -> BTree<u64> {
        let mut tree = BTree::open(path, signature(), degree, 8).unwrap();
        for (rank, &ts) in timestamps.iter().enumerate() {
            let mut checkpoint = Checkpoint::new(ts, rank as u64 * 10);
            checkpoint.rank = rank as u64;
            tree.insert(checkpoint).unwrap();
        }
        tree
    }

    #[test]
    fn test_node_size() {
        // 8 + 29 * 24 + 30 * 8
        assert_eq!(node_size::<u64>(15), 8 + 29 * 24 + 240);
    }

    #[test]
    fn test_in_order_after_splits() {
        let dir = tempdir().unwrap();
        let timestamps: Vec<i64> = scrambled(500).into_iter().map(|v| v as i64 * 3).collect();
        let tree = build(&dir.path().join("tree.idx"), 2, &timestamps);

        assert_eq!(tree.len(), 500);
        assert!(tree.node_count().unwrap() > 100);

        let mut seen = Vec::new();
        tree.visit_in_order(|c| seen.push(c.timestamp)).unwrap();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
    }

    #[test]
    fn test_search_non_monotonic() {
        let dir = tempdir().unwrap();
        // rank:          0   1   2   3   4
        let timestamps = [50, 10, 40, 20, 30];
        let tree = build(&dir.path().join("tree.idx"), 2, &timestamps);

        assert_eq!(tree.search(40).unwrap(), TreeSearch::Found(2));
        assert_eq!(tree.search(10).unwrap(), TreeSearch::Found(1));
        assert_eq!(
            tree.search(35).unwrap(),
            TreeSearch::NotFound {
                floor_rank: Some(4)
            }
        );
        assert_eq!(
            tree.search(5).unwrap(),
            TreeSearch::NotFound { floor_rank: None }
        );
        assert_eq!(
            tree.search(60).unwrap(),
            TreeSearch::NotFound {
                floor_rank: Some(0)
            }
        );
    }

    #[test]
    fn test_duplicate_timestamps_resolve_to_lowest_rank() {
        let dir = tempdir().unwrap();
        let timestamps: Vec<i64> = (0..200).map(|i| if i % 2 == 0 { 7 } else { i }).collect();
        let tree = build(&dir.path().join("tree.idx"), 3, &timestamps);

        assert_eq!(tree.search(7).unwrap(), TreeSearch::Found(0));
        assert_eq!(tree.search(199).unwrap(), TreeSearch::Found(199));
    }

    #[test]
    fn test_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.idx");
        let timestamps: Vec<i64> = scrambled(100).into_iter().map(|v| v as i64).collect();

        {
            let mut tree = build(&path, 4, &timestamps);
            tree.set_nb_events(100);
            tree.set_complete().unwrap();
        }

        let tree = BTree::<u64>::open(&path, signature(), 4, 8).unwrap();
        assert!(!tree.is_created_from_scratch());
        assert_eq!(tree.len(), 100);
        assert_eq!(tree.header().nb_events, 100);
        for (rank, &ts) in timestamps.iter().enumerate() {
            assert_eq!(tree.search(ts).unwrap(), TreeSearch::Found(rank as u64));
        }
    }

    #[test]
    fn test_degree_change_forces_rebuild() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.idx");
        {
            let mut tree = build(&path, 4, &[1, 2, 3]);
            tree.set_complete().unwrap();
        }

        let tree = BTree::<u64>::open(&path, signature(), 5, 8).unwrap();
        assert!(tree.is_created_from_scratch());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_invalid_degree() {
        let dir = tempdir().unwrap();
        let result = BTree::<u64>::open(dir.path().join("tree.idx"), signature(), 1, 8);
        assert!(matches!(result, Err(IndexError::Config(_))));
    }
}
