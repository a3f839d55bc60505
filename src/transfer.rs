//! Transfer distance between a reference bipartition and a candidate tree.
//!
//! # Overview
//! The transfer distance of a reference split `L|L'` to a candidate edge `c`
//! is the number of tips that must cross `c` so that `c` induces the same
//! split. For a reference edge the interesting value is the minimum over all
//! candidate edges, which measures how far the branch is from being present
//! in the candidate tree.
//!
//! # Algorithm
//! Let `L` be the light (smaller) side of the reference split, `p = |L|`,
//! and `n` the number of tips. For a candidate edge whose right side holds
//! `size` tips, `ones` of which are in `L`:
//!
//! ```text
//! d = (p - ones) + (size - ones)      tips to move so that right side == L
//! d = min(d, n - d)                   or so that right side == L'
//! ```
//!
//! `ones` is obtained for every candidate edge in one bottom-up pass over the
//! candidate tree, so a reference edge costs O(edges of the candidate). The
//! pass stops as soon as no smaller value can follow (0, or 1 when the split
//! is known to be absent).
//!
//! A [`TransferContext`] holds the read-only part of that pass (post-order,
//! child links, subtree sizes, the candidate's bipartition index) and is
//! shared by all workers handling one candidate tree; the per-call scratch
//! buffer is owned by each worker.

use crate::bitset::Bitset;
use crate::edge_index::BipartitionIndex;
use crate::error::{Result, TreeError};
use crate::tree::{EdgeId, Tree};

/// Precomputed post-order view of a candidate tree.
#[derive(Debug)]
pub struct TransferContext<'a> {
    tree: &'a Tree,
    num_tips: usize,
    /// Candidate edges, every edge after the edges below it.
    order: Vec<EdgeId>,
    /// Tip bit of the edge's right node, `u32::MAX` for internal edges.
    tip_bit: Vec<u32>,
    /// Positions (in `order`) of the child edges, in CSR layout.
    child_start: Vec<u32>,
    child_list: Vec<u32>,
    /// Number of tips on the right side of each edge.
    size: Vec<u32>,
    index: BipartitionIndex,
}

const INTERNAL: u32 = u32::MAX;

impl<'a> TransferContext<'a> {
    /// Builds the context of a candidate tree whose bipartitions are built.
    pub fn new(tree: &'a Tree) -> Result<Self> {
        if !tree.bitsets_ready() {
            return Err(TreeError::BitsetsNotBuilt);
        }
        let num_tips = tree.tip_index()?.len();
        let order = tree.postorder_edges()?;

        let mut position = vec![u32::MAX; tree.edge_capacity()];
        for (pos, &e) in order.iter().enumerate() {
            position[e] = pos as u32;
        }

        let mut tip_bit = Vec::with_capacity(order.len());
        let mut child_start = Vec::with_capacity(order.len() + 1);
        let mut child_list = Vec::with_capacity(order.len());
        let mut size = Vec::with_capacity(order.len());
        let mut index = BipartitionIndex::new();

        for &e in &order {
            child_start.push(child_list.len() as u32);
            let right = tree.edge(e).right();
            let bitset = tree.edge_bitset(e)?;
            if tree.node(right).is_tip() {
                tip_bit.push(tree.tip_bit(&tree.node(right).name)? as u32);
            } else {
                tip_bit.push(INTERNAL);
                child_list.extend(tree.children(right).map(|(ce, _)| position[ce]));
            }
            size.push(bitset.count_ones() as u32);
            index.add_edge_count(bitset, None, None);
        }
        child_start.push(child_list.len() as u32);

        Ok(TransferContext { tree, num_tips, order, tip_bit, child_start, child_list, size, index })
    }

    /// Number of candidate edges, the length of the scratch buffer.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Scratch buffer sized for [`TransferContext::min_transfer`].
    pub fn scratch(&self) -> Vec<u32> {
        vec![0; self.order.len()]
    }

    /// True when the candidate tree has the bipartition `split`.
    pub fn contains(&self, split: &Bitset) -> bool {
        self.index.contains(split)
    }

    /// Fails with `TipSetMismatch` unless `reference` uses the same tip universe.
    pub fn check_compatible(&self, reference: &Tree) -> Result<()> {
        if !self.tree.same_tip_set(reference)? {
            return Err(TreeError::TipSetMismatch);
        }
        Ok(())
    }

    /// Minimum transfer distance of `split` to the candidate tree, with the
    /// candidate edge reaching it.
    ///
    /// `absent` tells that `split` is known not to be in the candidate tree,
    /// so the search may stop at distance 1. `scratch` must hold
    /// [`TransferContext::len`] values.
    pub fn min_transfer(&self, split: &Bitset, absent: bool, scratch: &mut [u32]) -> Result<(usize, EdgeId)> {
        let n = self.num_tips;
        if split.len() != n {
            return Err(TreeError::TipSetMismatch);
        }
        if scratch.len() < self.order.len() {
            return Err(TreeError::InvalidArgument("transfer scratch buffer too small".into()));
        }
        let ones_total = split.count_ones();
        // count tips of the light side only
        let light_is_split = ones_total <= n - ones_total;
        let p = ones_total.min(n - ones_total);
        let stop = if absent { 1 } else { 0 };

        let mut best = usize::MAX;
        let mut best_edge = self.order.first().copied().ok_or(TreeError::TooFewTips(n))?;
        for pos in 0..self.order.len() {
            let ones = match self.tip_bit[pos] {
                INTERNAL => {
                    let (from, to) = (self.child_start[pos] as usize, self.child_start[pos + 1] as usize);
                    self.child_list[from..to].iter().map(|&c| scratch[c as usize]).sum()
                }
                bit => (split.contains(bit as usize) == light_is_split) as u32,
            };
            scratch[pos] = ones;

            let (ones, size) = (ones as usize, self.size[pos] as usize);
            let d = (p - ones) + (size - ones);
            let d = d.min(n - d);
            if d < best {
                best = d;
                best_edge = self.order[pos];
                if d <= stop {
                    break;
                }
            }
        }
        Ok((best, best_edge))
    }

    /// Transfer distance of `split`, taking the O(1) shortcuts for
    /// topological depths 1 and 2.
    pub fn transfer_distance(&self, split: &Bitset, scratch: &mut [u32]) -> Result<usize> {
        let ones = split.count_ones();
        let depth = ones.min(self.num_tips - ones);
        match depth {
            0 | 1 => Ok(0),
            2 => Ok(if self.contains(split) { 0 } else { 1 }),
            _ => {
                let absent = !self.contains(split);
                if !absent {
                    return Ok(0);
                }
                Ok(self.min_transfer(split, true, scratch)?.0)
            }
        }
    }

    /// Tips (as bit positions) that must cross `edge` so that it induces
    /// `split`, choosing the side of `edge` that needs the fewest moves.
    pub fn transfer_moves(&self, split: &Bitset, edge: EdgeId) -> Result<Vec<usize>> {
        let right = self.tree.edge_bitset(edge)?;
        if right.len() != split.len() {
            return Err(TreeError::TipSetMismatch);
        }
        let n = self.num_tips;
        let diff = (0..n).filter(|&i| right.contains(i) != split.contains(i)).count();
        // polarity: reconcile with the split itself or with its complement
        let wanted_complement = diff > n - diff;
        Ok((0..n)
            .filter(|&i| (right.contains(i) != split.contains(i)) != wanted_complement)
            .collect())
    }
}

/// Transfer support of a branch from its average transfer distance.
///
/// Only meaningful for `depth >= 2`; callers handle terminal branches.
pub fn normalized_support(avg_distance: f64, depth: usize) -> f64 {
    debug_assert!(depth >= 2);
    1.0 - avg_distance / (depth as f64 - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random;
    use crate::tree::parse_newick;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn prepared(newick: &str) -> Tree {
        let mut tree = parse_newick(newick).unwrap();
        tree.prepare_bipartitions().unwrap();
        tree
    }

    #[test]
    fn test_self_distance_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = random::yule(40, false, &mut rng).unwrap();
        tree.prepare_bipartitions().unwrap();
        let ctx = TransferContext::new(&tree).unwrap();
        let mut scratch = ctx.scratch();
        for e in tree.internal_edges() {
            let split = tree.edge_bitset(e).unwrap();
            let depth = tree.topo_depth(e).unwrap();
            let (d, _) = ctx.min_transfer(split, false, &mut scratch).unwrap();
            assert_eq!(d, 0);
            assert_eq!(ctx.transfer_distance(split, &mut scratch).unwrap(), 0);
            if depth >= 2 {
                assert_eq!(normalized_support(0.0, depth), 1.0);
            }
        }
    }

    #[test]
    fn test_distance_bounds_on_random_trees() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..5 {
            let mut reference = random::yule(30, false, &mut rng).unwrap();
            let mut candidate = random::uniform(30, false, &mut rng).unwrap();
            reference.prepare_bipartitions().unwrap();
            candidate.prepare_bipartitions().unwrap();
            let ctx = TransferContext::new(&candidate).unwrap();
            ctx.check_compatible(&reference).unwrap();
            let mut scratch = ctx.scratch();
            for e in reference.edges() {
                let depth = reference.topo_depth(e).unwrap();
                let split = reference.edge_bitset(e).unwrap();
                let d = ctx.transfer_distance(split, &mut scratch).unwrap();
                assert!(d <= depth.saturating_sub(1), "{d} > {depth} - 1");
                let (full, _) = ctx.min_transfer(split, false, &mut scratch).unwrap();
                assert_eq!(d, full);
            }
        }
    }

    #[test]
    fn test_known_distance_and_moves() {
        // {A,B,C} vs candidate where C sits with D,E: one tip moves
        let reference = prepared("((A,B,C),(D,E,F),(G,H));");
        let candidate = prepared("((A,B),(C,D,E,F),(G,H));");
        let ctx = TransferContext::new(&candidate).unwrap();
        ctx.check_compatible(&reference).unwrap();
        let mut scratch = ctx.scratch();

        let abc = Bitset::from_indices(8, [0, 1, 2]);
        assert!(!ctx.contains(&abc));
        let (d, edge) = ctx.min_transfer(&abc, true, &mut scratch).unwrap();
        assert_eq!(d, 1);
        let moves = ctx.transfer_moves(&abc, edge).unwrap();
        assert_eq!(moves, vec![2]);

        let def = Bitset::from_indices(8, [3, 4, 5]);
        assert_eq!(ctx.transfer_distance(&def, &mut scratch).unwrap(), 1);
    }

    #[test]
    fn test_depth_two_shortcut() {
        let candidate = prepared("((A,B),(C,D),(E,F));");
        let ctx = TransferContext::new(&candidate).unwrap();
        let mut scratch = ctx.scratch();
        assert_eq!(ctx.transfer_distance(&Bitset::from_indices(6, [0, 1]), &mut scratch).unwrap(), 0);
        assert_eq!(ctx.transfer_distance(&Bitset::from_indices(6, [0, 2]), &mut scratch).unwrap(), 1);
        // complement of a present split
        let cd_ef = Bitset::from_indices(6, [2, 3, 4, 5]);
        assert_eq!(ctx.transfer_distance(&cd_ef, &mut scratch).unwrap(), 0);
    }

    #[test]
    fn test_tip_set_mismatch() {
        let reference = prepared("((A,B),(C,D),E);");
        let candidate = prepared("((A,B),(C,D),F);");
        let ctx = TransferContext::new(&candidate).unwrap();
        assert!(matches!(ctx.check_compatible(&reference), Err(TreeError::TipSetMismatch)));
        let mut scratch = ctx.scratch();
        let wide = Bitset::from_indices(6, [0, 1]);
        assert!(matches!(ctx.min_transfer(&wide, false, &mut scratch), Err(TreeError::TipSetMismatch)));
    }
}
