//! Consensus trees.
//!
//! Every edge of every input tree is counted in a [`BipartitionIndex`].
//! Bipartitions frequent enough to pass the cutoff are then inserted one by
//! one into a star tree. A cutoff of at least 0.5 keeps only bipartitions
//! present in a strict majority of the trees, which are pairwise compatible,
//! so insertion never has to arbitrate between conflicting splits.

use log::{debug, info};

use crate::bitset::Bitset;
use crate::edge_index::{BipartitionIndex, EdgeIndexEntry};
use crate::error::{Result, TreeError};
use crate::stream::{TreeStream, first_error};
use crate::tree::{NodeId, Tree};

/// Consensus settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusConfig {
    /// Minimum frequency of a kept bipartition, in `[0.5, 1]`. At 1 a
    /// bipartition must be in every tree (strict consensus); below 1 it must
    /// be in strictly more than `cutoff * N` trees.
    pub cutoff: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig { cutoff: 0.5 }
    }
}

/// Accumulates trees and builds their consensus.
#[derive(Debug)]
pub struct ConsensusBuilder {
    cutoff: f64,
    index: BipartitionIndex,
    tip_names: Option<Vec<String>>,
    trees: usize,
}

impl ConsensusBuilder {
    /// Fails with `InvalidArgument` when `cutoff` is outside `[0.5, 1]`.
    pub fn new(config: ConsensusConfig) -> Result<Self> {
        if !(0.5..=1.0).contains(&config.cutoff) {
            return Err(TreeError::InvalidArgument(format!(
                "consensus cutoff must be within [0.5, 1], got {}",
                config.cutoff
            )));
        }
        Ok(ConsensusBuilder { cutoff: config.cutoff, index: BipartitionIndex::new(), tip_names: None, trees: 0 })
    }

    /// Number of trees added so far.
    pub fn len(&self) -> usize {
        self.trees
    }

    pub fn is_empty(&self) -> bool {
        self.trees == 0
    }

    /// Counts the edges of `tree`, building its bipartitions if needed.
    ///
    /// Fails with `TipSetMismatch` when its tips differ from the first tree's.
    pub fn push(&mut self, tree: &mut Tree) -> Result<()> {
        if !tree.bitsets_ready() {
            tree.prepare_bipartitions()?;
        }
        let names = tree.tip_index()?.names();
        match &self.tip_names {
            Some(expected) if expected.as_slice() != names => return Err(TreeError::TipSetMismatch),
            Some(_) => {}
            None => self.tip_names = Some(names.to_vec()),
        }
        self.index.add_tree(tree)?;
        self.trees += 1;
        Ok(())
    }

    fn passes(&self, entry: &EdgeIndexEntry) -> bool {
        if self.cutoff >= 1.0 {
            entry.count >= self.trees
        } else {
            entry.count as f64 > self.cutoff * self.trees as f64
        }
    }

    /// Builds the consensus tree, with its bipartitions ready.
    ///
    /// Internal branches carry the mean observed length and the frequency
    /// of their bipartition as support; tip branches the mean tip length.
    pub fn finish(self) -> Result<Tree> {
        let names = self.tip_names.as_deref().ok_or(TreeError::EmptyStream)?;
        let n = names.len();
        let total = self.trees as f64;

        let mut tree = Tree::new();
        let root = tree.new_node("");
        let mut clades: Vec<Bitset> = vec![Bitset::zeros(n)];
        for (i, name) in names.iter().enumerate() {
            let tip = tree.new_node(name.as_str());
            let e = tree.connect_nodes(root, tip)?;
            let tip_split = Bitset::from_indices(n, [i]);
            tree.edge_mut(e)?.length = self.index.value(&tip_split).and_then(EdgeIndexEntry::mean_length);
            clades.push(tip_split);
        }
        clades[root] = Bitset::from_indices(n, 0..n);

        // larger clades first, ties in bitset order for a stable result
        let mut kept: Vec<(Bitset, &EdgeIndexEntry)> = self
            .index
            .iter()
            .filter(|entry| {
                let ones = entry.bitset.count_ones();
                ones.min(n - ones) > 1 && self.passes(entry)
            })
            .map(|entry| (entry.bitset.canonical(), entry))
            .collect();
        kept.sort_by(|(a, _), (b, _)| b.count_ones().cmp(&a.count_ones()).then_with(|| a.cmp(b)));

        for (clade, entry) in &kept {
            let node = insert_clade(&mut tree, &mut clades, root, clade)?;
            let e = tree.parent_edge(node).ok_or(TreeError::Inconsistent("inserted clade has no parent".into()))?;
            let edge = tree.edge_mut(e)?;
            edge.length = entry.mean_length();
            edge.support = Some(entry.count as f64 / total);
        }
        info!("consensus of {} trees: {} of {} bipartitions kept", self.trees, kept.len(), self.index.len());

        tree.prepare_bipartitions()?;
        Ok(tree)
    }
}

/// Inserts `clade` (a tip set not containing tip 0) below the lowest node
/// whose clade contains it, gathering the children it spans under a new node.
fn insert_clade(tree: &mut Tree, clades: &mut Vec<Bitset>, root: NodeId, clade: &Bitset) -> Result<NodeId> {
    let mut current = root;
    'descend: loop {
        for (_, child) in tree.children(current) {
            if clade.is_subset_of(&clades[child]) && clades[child] != *clade {
                current = child;
                continue 'descend;
            }
        }
        break;
    }

    let spanned: Vec<_> = tree.children(current).filter(|&(_, c)| clades[c].is_subset_of(clade)).collect();
    let node = tree.new_node("");
    tree.connect_nodes(current, node)?;
    for (e, _) in spanned {
        tree.move_edge_endpoint(e, current, node, None);
    }
    if clades.len() <= node {
        clades.resize(node + 1, Bitset::zeros(clade.len()));
    }
    clades[node] = clade.clone();
    debug!("clade of {} tips inserted below node {current}", clade.count_ones());
    Ok(node)
}

/// Consensus of every tree of `stream`.
///
/// The whole stream is read even when an entry fails; the error of the
/// lowest sequence id is returned after that.
pub fn consensus(stream: TreeStream, config: ConsensusConfig) -> Result<Tree> {
    let mut builder = match ConsensusBuilder::new(config) {
        Ok(b) => b,
        Err(e) => {
            stream.into_iter().for_each(drop);
            return Err(e);
        }
    };
    let mut errors = Vec::new();
    for entry in stream {
        let result = entry.tree.and_then(|mut tree| builder.push(&mut tree));
        if let Err(e) = result {
            errors.push(e.in_stream(entry.id));
        }
    }
    if let Some(e) = first_error(errors) {
        return Err(e);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random;
    use crate::rearrangement::nni_moves;
    use crate::stream::{stream_newick, stream_trees};
    use crate::tree::parse_newick;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn splits(tree: &Tree) -> HashSet<Bitset> {
        tree.internal_edges().iter().map(|&e| tree.edge_bitset(e).unwrap().canonical()).collect()
    }

    #[test]
    fn test_strict_consensus_of_identical_trees() {
        let mut rng = StdRng::seed_from_u64(1000);
        let source = random::yule(1000, false, &mut rng).unwrap();
        let stream = stream_trees(vec![source.clone(), source.clone(), source.clone()], 2);
        let cons = consensus(stream, ConsensusConfig { cutoff: 1.0 }).unwrap();
        cons.validate().unwrap();
        assert_eq!(cons.edges().len(), source.edges().len());
        assert!(cons.internal_edges().iter().all(|&e| cons.edge(e).support == Some(1.0)));
    }

    #[test]
    fn test_majority_frequency_and_lengths() {
        let text = "((A:1,B:1):1,(C:1,D:1):1,E:1);\n((A:1,B:1):3,(C:1,E:1):1,D:1);\n((A:3,C:1):1,(B:1,D:1):1,E:1);";
        let cons = consensus(stream_newick(text.to_string(), 4), ConsensusConfig::default()).unwrap();
        cons.validate().unwrap();
        assert_eq!(cons.internal_edges().len(), 1);
        let e = cons.internal_edges()[0];
        let edge = cons.edge(e);
        assert!((edge.support.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(edge.length, Some(2.0));
        let a = cons.node_by_name("A").unwrap();
        let ae = cons.parent_edge(a).unwrap();
        assert!((cons.edge(ae).length.unwrap() - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_strict_subset_of_majority() {
        let mut rng = StdRng::seed_from_u64(77);
        let base = random::yule(25, false, &mut rng).unwrap();
        let mut trees = Vec::new();
        for _ in 0..9 {
            let mut t = base.clone();
            for _ in 0..2 {
                let moves = nni_moves(&t);
                let m = &moves[rng.gen_range(0..moves.len())];
                m.apply(&mut t).unwrap();
            }
            trees.push(t);
        }
        let strict = consensus(stream_trees(trees.clone(), 3), ConsensusConfig { cutoff: 1.0 }).unwrap();
        let majority = consensus(stream_trees(trees, 3), ConsensusConfig { cutoff: 0.5 }).unwrap();
        let (s, m) = (splits(&strict), splits(&majority));
        assert!(s.is_subset(&m));
        assert!(majority.internal_edges().iter().all(|&e| majority.edge(e).support.unwrap() > 0.5));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            ConsensusBuilder::new(ConsensusConfig { cutoff: 0.4 }),
            Err(TreeError::InvalidArgument(_))
        ));
        let stream = stream_newick("((A,B),C,D);((A,B),C,E);(A,(B,;".to_string(), 1);
        match consensus(stream, ConsensusConfig::default()) {
            Err(TreeError::Stream { id, source }) => {
                assert_eq!(id, 1);
                assert!(matches!(*source, TreeError::TipSetMismatch));
            }
            other => panic!("unexpected {other:?}"),
        }
        let empty = stream_trees(Vec::new(), 1);
        assert!(matches!(consensus(empty, ConsensusConfig::default()), Err(TreeError::EmptyStream)));
        let single = parse_newick("((A,B),(C,D),E);").unwrap();
        let cons = consensus(stream_trees(vec![single], 1), ConsensusConfig { cutoff: 1.0 }).unwrap();
        assert_eq!(cons.internal_edges().len(), 2);
    }
}
