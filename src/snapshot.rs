//! Extract partition snapshots from phylogenetic trees.
//!
//! # Overview
//! A TreeSnapshot captures all the non-trivial bipartitions (splits) of a tree
//! along with their branch lengths. The snapshot is immutable and owns its
//! data, so snapshots of many trees can be compared in parallel.
//!
//! # What is a bipartition?
//! Each internal branch in a tree divides the tips into two groups.
//! For example:
//! ```text
//!      root
//!     /    \
//!   {A,B}  {C,D}  ← This branch creates partition {A,B}|{C,D}
//! ```
//!
//! Only one side of each partition is stored: the side that does not contain
//! tip 0 (see [`Bitset::canonical`]).

use std::collections::{HashMap, HashSet};

use crate::bitset::Bitset;
use crate::error::{Result, TreeError};
use crate::tree::Tree;

/// An immutable snapshot of all partitions in a phylogenetic tree.
///
/// # Fields
/// - `parts`: All non-trivial bipartitions, **canonicalized**
/// - `lengths`: Branch length for each partition (missing lengths count as 0)
/// - `root_children`: Bitsets below the root's children (for rooted RF)
/// - `tip_names`: Sorted tip universe the bitsets refer to
/// - `rooted`: Whether the tree is rooted
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    pub parts: HashSet<Bitset>,
    pub lengths: HashMap<Bitset, f64>,
    pub root_children: Vec<Bitset>,
    pub tip_names: Vec<String>,
    pub rooted: bool,
}

impl TreeSnapshot {
    /// Extract a snapshot from a tree whose bipartitions are built.
    ///
    /// # Algorithm
    /// 1. Walk every edge of the tree
    /// 2. Skip trivial edges (one tip on the smaller side)
    /// 3. Canonicalize the edge bitset (side without tip 0)
    /// 4. Accumulate the branch length under the canonical key, so that the
    ///    two root edges of a rooted tree count as one unrooted branch
    ///
    /// # Errors
    /// `TipIndexNotBuilt` / `BitsetsNotBuilt` when
    /// [`Tree::prepare_bipartitions`] has not been called since the last edit.
    pub fn from_tree(tree: &Tree) -> Result<Self> {
        let tip_names = tree.tip_index()?.names().to_vec();
        let mut parts = HashSet::new();
        let mut lengths: HashMap<Bitset, f64> = HashMap::new();

        for e in tree.edges() {
            if tree.topo_depth(e)? <= 1 {
                continue;
            }
            let canonical = tree.edge_bitset(e)?.canonical();
            *lengths.entry(canonical.clone()).or_default() += tree.edge(e).length.unwrap_or(0.0);
            parts.insert(canonical);
        }

        let root = tree.root()?;
        let mut root_children = Vec::new();
        for (e, _) in tree.children(root) {
            root_children.push(tree.edge_bitset(e)?.clone());
        }
        root_children.sort_unstable();

        Ok(TreeSnapshot { parts, lengths, root_children, tip_names, rooted: tree.is_rooted() })
    }

    /// Builds the bipartitions of `tree` if needed, then snapshots it.
    pub fn from_tree_mut(tree: &mut Tree) -> Result<Self> {
        if !tree.bitsets_ready() {
            tree.prepare_bipartitions()?;
        }
        Self::from_tree(tree)
    }

    pub fn num_tips(&self) -> usize {
        self.tip_names.len()
    }

    /// Fails with `TipSetMismatch` unless both snapshots share one tip universe.
    pub fn check_comparable(&self, other: &TreeSnapshot) -> Result<()> {
        if self.tip_names != other.tip_names {
            return Err(TreeError::TipSetMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::parse_newick;

    /// ```text
    ///           root
    ///          /    \
    ///      node1     node2
    ///      /   \     /   \
    ///     A     B   C    node3
    ///                    /   \
    ///                   D     E
    /// ```
    ///
    /// Tips sorted: A=0, B=1, C=2, D=3, E=4
    ///
    /// | Edge  | Tips below  | Smaller side | Canonical |
    /// |-------|-------------|--------------|-----------|
    /// | node1 | {A, B}      | 2            | {C,D,E}   |
    /// | node2 | {C, D, E}   | 2            | {C,D,E}   |
    /// | node3 | {D, E}      | 2            | {D,E}     |
    ///
    /// node1 and node2 are the two halves of the same unrooted branch.
    #[test]
    fn test_root_edges_merge() {
        let mut tree = parse_newick("((A:1,B:1):0.5,(C:1,(D:1,E:1):2):1.5);").unwrap();
        let snap = TreeSnapshot::from_tree_mut(&mut tree).unwrap();
        assert!(snap.rooted);
        assert_eq!(snap.parts.len(), 2);

        let cde = Bitset::from_indices(5, [2, 3, 4]);
        let de = Bitset::from_indices(5, [3, 4]);
        assert!(snap.parts.contains(&cde));
        assert!(snap.parts.contains(&de));
        assert_eq!(snap.lengths[&cde], 2.0);
        assert_eq!(snap.lengths[&de], 2.0);
        assert_eq!(snap.root_children.len(), 2);
    }

    #[test]
    fn test_unrooted_star_has_no_parts() {
        let mut tree = parse_newick("(A,B,C,D);").unwrap();
        let snap = TreeSnapshot::from_tree_mut(&mut tree).unwrap();
        assert!(!snap.rooted);
        assert!(snap.parts.is_empty());
        assert_eq!(snap.num_tips(), 4);
    }

    #[test]
    fn test_requires_bitsets() {
        let tree = parse_newick("((A,B),(C,D));").unwrap();
        assert!(matches!(TreeSnapshot::from_tree(&tree), Err(TreeError::TipIndexNotBuilt)));
    }

    #[test]
    fn test_tip_set_mismatch() {
        let mut a = parse_newick("((A,B),(C,D));").unwrap();
        let mut b = parse_newick("((A,B),(C,E));").unwrap();
        let sa = TreeSnapshot::from_tree_mut(&mut a).unwrap();
        let sb = TreeSnapshot::from_tree_mut(&mut b).unwrap();
        assert!(matches!(sa.check_comparable(&sb), Err(TreeError::TipSetMismatch)));
    }
}
