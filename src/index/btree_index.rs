//! B-Tree Index - timestamp search that tolerates non-monotonic traces
//!
//! Two files live side by side in the supplementary directory:
//! - `checkpoint_btree.idx`: B-tree keyed by `(timestamp, rank)`
//! - `checkpoint_btree_flatarray.idx`: flat array keyed by rank
//!
//! Both are written on every insert. If only one of them can be reused the
//! pair is discarded and rebuilt together.

use crate::index::btree::{BTree, TreeSearch};
use crate::index::error::IndexResult;
use crate::index::flat_array::FlatArray;
use crate::index::{
    Checkpoint, CheckpointIndex, IndexBackend, IndexOptions, Location, BTREE_FILE, BTREE_RANK_FILE,
};
use crate::types::{TimeRange, Timestamp, TraceSignature};
use std::path::{Path, PathBuf};

/// Checkpoint index made of a B-tree and a rank array
pub struct BTreeCheckpointIndex<L: Location> {
    dir: PathBuf,
    tree: BTree<L>,
    ranks: FlatArray<L>,
}

impl<L: Location> BTreeCheckpointIndex<L> {
    /// Open the index files inside `dir`
    pub fn open(
        dir: impl AsRef<Path>,
        signature: TraceSignature,
        options: &IndexOptions,
    ) -> IndexResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let tree_path = dir.join(BTREE_FILE);
        let ranks_path = dir.join(BTREE_RANK_FILE);

        let (mut tree, mut ranks) = (
            BTree::open(
                &tree_path,
                signature,
                options.btree_degree,
                options.node_cache_size,
            )?,
            FlatArray::open(&ranks_path, signature, options.record_cache_size)?,
        );

        let consistent = tree.is_created_from_scratch() == ranks.is_created_from_scratch()
            && tree.len() == ranks.len();
        if !consistent {
            tracing::warn!(
                "Inconsistent B-tree index in {:?} (tree {}/{}, ranks {}/{}), rebuilding both",
                dir,
                tree.len(),
                tree.is_created_from_scratch(),
                ranks.len(),
                ranks.is_created_from_scratch()
            );
            for result in [tree.dispose(), ranks.dispose()] {
                if let Err(e) = result {
                    tracing::warn!("Failed to close stale B-tree index in {:?}: {}", dir, e);
                }
            }
            drop(tree);
            drop(ranks);
            // Both files are truncated, whichever of them was still valid
            tree = BTree::create(
                &tree_path,
                signature,
                options.btree_degree,
                options.node_cache_size,
            )?;
            ranks = FlatArray::create(&ranks_path, signature, options.record_cache_size)?;
        }

        Ok(Self { dir, tree, ranks })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Underlying tree, for inspection
    pub fn tree(&self) -> &BTree<L> {
        &self.tree
    }
}

impl<L: Location> CheckpointIndex<L> for BTreeCheckpointIndex<L> {
    fn backend(&self) -> IndexBackend {
        IndexBackend::BTree
    }

    fn insert(&mut self, mut checkpoint: Checkpoint<L>) -> IndexResult<u64> {
        let rank = self.ranks.len();
        checkpoint.rank = rank;
        self.ranks.append(&checkpoint)?;
        self.tree.insert(checkpoint)?;
        Ok(rank)
    }

    fn get(&self, rank: u64) -> IndexResult<Checkpoint<L>> {
        self.ranks.get(rank)
    }

    fn find(&self, timestamp: Timestamp) -> IndexResult<Result<u64, u64>> {
        Ok(match self.tree.search(timestamp)? {
            TreeSearch::Found(rank) => Ok(rank),
            TreeSearch::NotFound { floor_rank } => Err(floor_rank.map_or(0, |rank| rank + 1)),
        })
    }

    fn size(&self) -> u64 {
        self.ranks.len()
    }

    fn time_range(&self) -> TimeRange {
        self.ranks.time_range()
    }

    fn set_time_range(&mut self, range: TimeRange) {
        self.tree.set_time_range(range);
        self.ranks.set_time_range(range);
    }

    fn nb_events(&self) -> u64 {
        self.ranks.nb_events()
    }

    fn set_nb_events(&mut self, nb_events: u64) {
        self.tree.set_nb_events(nb_events);
        self.ranks.set_nb_events(nb_events);
    }

    fn is_created_from_scratch(&self) -> bool {
        self.tree.is_created_from_scratch()
    }

    fn is_complete(&self) -> bool {
        self.tree.is_complete() && self.ranks.is_complete()
    }

    fn set_index_complete(&mut self) -> IndexResult<()> {
        self.tree.set_complete()?;
        self.ranks.set_complete()
    }

    fn dispose(&mut self) -> IndexResult<()> {
        let tree = self.tree.dispose();
        let ranks = self.ranks.dispose();
        tree.and(ranks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{header, IndexError};
    use tempfile::tempdir;

    fn signature() -> TraceSignature {
        TraceSignature::new(10_000, 42)
    }

    fn options() -> IndexOptions {
        IndexOptions {
            btree_degree: 3,
            node_cache_size: 4,
            record_cache_size: 4,
        }
    }

    #[test]
    fn test_non_monotonic_find() {
        let dir = tempdir().unwrap();
        let mut index = BTreeCheckpointIndex::<u64>::open(dir.path(), signature(), &options()).unwrap();

        // rank: 0    1    2    3    4
        for ts in [100, 300, 200, 500, 400] {
            index.insert(Checkpoint::new(ts, ts as u64)).unwrap();
        }

        assert_eq!(index.size(), 5);
        assert_eq!(index.find(200).unwrap(), Ok(2));
        assert_eq!(index.find(500).unwrap(), Ok(3));
        // Floor of 250 is (200, rank 2)
        assert_eq!(index.find(250).unwrap(), Err(3));
        assert_eq!(index.find(50).unwrap(), Err(0));
        // Floor of 450 is (400, rank 4)
        assert_eq!(index.find(450).unwrap(), Err(5));

        assert_eq!(index.get(3).unwrap().timestamp, 500);
    }

    #[test]
    fn test_monotonic_agrees_with_binary_search() {
        let dir = tempdir().unwrap();
        let mut index = BTreeCheckpointIndex::<u64>::open(dir.path(), signature(), &options()).unwrap();
        for i in 0..100i64 {
            index.insert(Checkpoint::new(i * 10, i as u64)).unwrap();
        }

        assert_eq!(index.find(370).unwrap(), Ok(37));
        assert_eq!(index.find(375).unwrap(), Err(38));
        assert_eq!(index.find(-1).unwrap(), Err(0));
        assert_eq!(index.find(10_000).unwrap(), Err(100));
    }

    #[test]
    fn test_reopen_and_half_missing_pair() {
        let dir = tempdir().unwrap();

        {
            let mut index =
                BTreeCheckpointIndex::<u64>::open(dir.path(), signature(), &options()).unwrap();
            for i in 0..20i64 {
                index.insert(Checkpoint::new(i, i as u64)).unwrap();
            }
            index.set_nb_events(2_000);
            index.set_time_range(TimeRange::new(0, 1_999));
            index.set_index_complete().unwrap();
        }

        {
            let index = BTreeCheckpointIndex::<u64>::open(dir.path(), signature(), &options()).unwrap();
            assert!(!index.is_created_from_scratch());
            assert!(index.is_complete());
            assert_eq!(index.size(), 20);
            assert_eq!(index.nb_events(), 2_000);
            assert_eq!(index.find(12).unwrap(), Ok(12));
        }

        std::fs::remove_file(dir.path().join(BTREE_RANK_FILE)).unwrap();

        let index = BTreeCheckpointIndex::<u64>::open(dir.path(), signature(), &options()).unwrap();
        assert!(index.is_created_from_scratch());
        assert_eq!(index.size(), 0);
        assert!(index.tree().is_empty());
    }

    #[test]
    fn test_inconsistent_pair_truncates_the_valid_half() {
        let dir = tempdir().unwrap();
        {
            let mut index =
                BTreeCheckpointIndex::<u64>::open(dir.path(), signature(), &options()).unwrap();
            for i in 0..40i64 {
                index.insert(Checkpoint::new(40 - i, i as u64)).unwrap();
            }
            index.set_index_complete().unwrap();
        }
        let tree_path = dir.path().join(BTREE_FILE);
        assert!(header::read_header(&tree_path).unwrap().complete);

        // Rank file rebuilt on its own: the pair now disagrees
        let ranks_path = dir.path().join(BTREE_RANK_FILE);
        drop(FlatArray::<u64>::create(&ranks_path, signature(), 8).unwrap());

        let mut index =
            BTreeCheckpointIndex::<u64>::open(dir.path(), signature(), &options()).unwrap();
        assert!(index.is_created_from_scratch());
        assert_eq!(index.size(), 0);
        assert!(index.tree().is_empty());
        assert_eq!(index.find(20).unwrap(), Err(0));

        let tree_header = header::read_header(&tree_path).unwrap();
        assert!(!tree_header.complete);
        assert_eq!(tree_header.size, 0);

        // The healed pair is usable and reusable
        index.insert(Checkpoint::new(7, 70)).unwrap();
        index.set_index_complete().unwrap();
        drop(index);
        let index = BTreeCheckpointIndex::<u64>::open(dir.path(), signature(), &options()).unwrap();
        assert!(!index.is_created_from_scratch());
        assert_eq!(index.find(7).unwrap(), Ok(0));
    }

    #[test]
    fn test_dispose() {
        let dir = tempdir().unwrap();
        let mut index = BTreeCheckpointIndex::<u64>::open(dir.path(), signature(), &options()).unwrap();
        index.insert(Checkpoint::new(1, 1)).unwrap();
        index.dispose().unwrap();
        index.dispose().unwrap();

        assert!(matches!(index.find(1), Err(IndexError::Closed)));
        assert!(matches!(index.get(0), Err(IndexError::Closed)));
    }
}
