//! Tree distance metrics using bitset-based snapshots.
//!
//! This module implements three phylogenetic tree distance measures:
//!
//! 1. **Robinson-Foulds (RF)**: Counts the number of bipartitions that differ
//!    between two trees. Range: [0, 2n-6] where n is the number of tips.
//!
//! 2. **Weighted Robinson-Foulds**: Like RF but considers branch lengths.
//!    For shared partitions, adds |length_a - length_b|.
//!    For unique partitions, adds the full branch length.
//!
//! 3. **Kuhner-Felsenstein (Branch Score)**: Similar to weighted RF but uses
//!    squared differences: sqrt(Σ(length_a - length_b)²)
//!
//! Every function requires both trees to share one tip universe and fails
//! with `TipSetMismatch` otherwise.

use log::debug;
use rayon::prelude::*;

use crate::error::Result;
use crate::snapshot::TreeSnapshot;
use crate::tree::Tree;

/// Distance measure used by the pairwise matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Metric {
    Rf,
    Weighted,
    Kf,
}

impl Metric {
    /// Distance between two comparable snapshots.
    pub fn between(self, a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
        match self {
            Metric::Rf => rf_from_snapshots(a, b) as f64,
            Metric::Weighted => weighted_rf_from_snapshots(a, b),
            Metric::Kf => kf_from_snapshots(a, b),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::Rf => "RF",
            Metric::Weighted => "Weighted",
            Metric::Kf => "KF",
        }
    }
}

fn comparable_snapshots(tree_a: &Tree, tree_b: &Tree) -> Result<(TreeSnapshot, TreeSnapshot)> {
    let snap_a = TreeSnapshot::from_tree(tree_a)?;
    let snap_b = TreeSnapshot::from_tree(tree_b)?;
    snap_a.check_comparable(&snap_b)?;
    Ok((snap_a, snap_b))
}

/// Compute Robinson-Foulds distance between two trees.
///
/// # Algorithm
/// RF = |A ∪ B| - |A ∩ B| = |A| + |B| - 2|A ∩ B|
///
/// Where A and B are the sets of bipartitions in each tree.
///
/// # Rooted Tree Adjustment
/// For rooted trees, if the root position differs, we add 2 to the distance.
/// This accounts for the two extra bipartitions created by moving the root.
///
/// # Example
/// ```text
/// Tree 1:  ((A,B),(C,D))     Partitions: {A,B}
/// Tree 2:  ((A,C),(B,D))     Partitions: {A,C}
///
/// Intersection: 0 partitions match
/// RF = 1 + 1 - 2*0 = 2, plus 2 for the moved root
/// ```
///
/// # Errors
/// Precondition errors when the bipartitions of either tree are not built,
/// `TipSetMismatch` when the tip sets differ.
pub fn robinson_foulds(tree_a: &Tree, tree_b: &Tree) -> Result<usize> {
    let (snap_a, snap_b) = comparable_snapshots(tree_a, tree_b)?;
    Ok(rf_from_snapshots(&snap_a, &snap_b))
}

/// Compute Robinson-Foulds distance from two pre-computed snapshots.
///
/// # Algorithm (O(n) using HashSet)
/// ```text
/// intersection = A.parts ∩ B.parts
/// RF = len(A) + len(B) - 2 * len(intersection)
/// ```
pub fn rf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> usize {
    let inter = a.parts.intersection(&b.parts).count();
    let rf = a.parts.len() + b.parts.len() - 2 * inter;
    let same_root = a.root_children == b.root_children;
    if a.rooted && b.rooted && rf != 0 && !same_root { rf + 2 } else { rf }
}

/// Compute Weighted Robinson-Foulds distance between two trees.
///
/// # Algorithm
/// For each partition:
/// - If in both trees: add |length_a - length_b|
/// - If only in A: add length_a
/// - If only in B: add length_b
///
/// # Example
/// ```text
/// Tree 1: ((A:1.0,B:1.0):2.0,(C:1.0,D:1.0):2.0,E:1.0);
/// Tree 2: ((A:1.5,B:1.0):3.0,(C:0.5,D:1.0):2.0,E:1.0);
///
/// Shared partition {A,B}: |2.0 - 3.0| = 1.0
/// Shared partition {C,D}: |2.0 - 2.0| = 0.0
/// ```
pub fn weighted_robinson_foulds(tree_a: &Tree, tree_b: &Tree) -> Result<f64> {
    let (snap_a, snap_b) = comparable_snapshots(tree_a, tree_b)?;
    Ok(weighted_rf_from_snapshots(&snap_a, &snap_b))
}

/// Compute Weighted RF distance from two pre-computed snapshots.
pub fn weighted_rf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
    let mut distance = 0.0;

    for part in &a.parts {
        let length_a = a.lengths.get(part).unwrap_or(&0.0);
        if let Some(length_b) = b.lengths.get(part) {
            distance += (length_a - length_b).abs();
        } else {
            distance += length_a;
        }
    }

    // partitions only in B
    for part in &b.parts {
        if !a.parts.contains(part) {
            distance += b.lengths.get(part).unwrap_or(&0.0);
        }
    }

    distance
}

/// Compute Kuhner-Felsenstein (Branch Score) distance between two trees.
///
/// # Algorithm
/// Like Weighted RF but uses squared differences:
/// distance = sqrt(Σ (length_a - length_b)²)
///
/// # Properties
/// - More sensitive to large branch length differences
/// - Euclidean metric in branch length space
pub fn kuhner_felsenstein(tree_a: &Tree, tree_b: &Tree) -> Result<f64> {
    let (snap_a, snap_b) = comparable_snapshots(tree_a, tree_b)?;
    Ok(kf_from_snapshots(&snap_a, &snap_b))
}

/// Compute Kuhner-Felsenstein distance from two pre-computed snapshots.
pub fn kf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
    let mut sum_squared = 0.0;

    for part in &a.parts {
        let length_a = a.lengths.get(part).unwrap_or(&0.0);
        if let Some(length_b) = b.lengths.get(part) {
            let diff = length_a - length_b;
            sum_squared += diff * diff;
        } else {
            sum_squared += length_a * length_a;
        }
    }

    for part in &b.parts {
        if !a.parts.contains(part) {
            let length_b = b.lengths.get(part).unwrap_or(&0.0);
            sum_squared += length_b * length_b;
        }
    }

    sum_squared.sqrt()
}

/// Builds the bipartitions of every tree and snapshots them in parallel.
pub fn build_snapshots(trees: &mut [Tree]) -> Result<Vec<TreeSnapshot>> {
    trees.par_iter_mut().map(TreeSnapshot::from_tree_mut).collect()
}

/// Symmetric distance matrix over all pairs of snapshots.
///
/// Pairs are computed in parallel; fails with `TipSetMismatch` before any
/// distance is computed when the snapshots do not share one tip universe.
pub fn pairwise_matrix(snapshots: &[TreeSnapshot], metric: Metric) -> Result<Vec<Vec<f64>>> {
    if let Some(first) = snapshots.first() {
        for snap in &snapshots[1..] {
            first.check_comparable(snap)?;
        }
    }
    let n = snapshots.len();
    debug!("{} distances over {} combinations", metric.label(), n * n.saturating_sub(1) / 2);

    let pairs: Vec<(usize, usize, f64)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| (i, j, metric.between(&snapshots[i], &snapshots[j])))
        .collect();

    let mut matrix = vec![vec![0.0f64; n]; n];
    for (i, j, dist) in pairs {
        matrix[i][j] = dist;
        matrix[j][i] = dist;
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreeError;
    use crate::tree::parse_newick;
    use itertools::Itertools;

    fn prepared(newick: &str) -> Tree {
        let mut tree = parse_newick(newick).unwrap();
        tree.prepare_bipartitions().unwrap();
        tree
    }

    #[test]
    fn test_tip_set_mismatch() {
        let a = prepared("((A,B),(C,D),E);");
        let b = prepared("((A,B),(C,D),F);");
        assert!(matches!(robinson_foulds(&a, &b), Err(TreeError::TipSetMismatch)));
    }

    #[test]
    fn test_rooted_adjustment() {
        let a = prepared("((A,B),(C,D));");
        let b = prepared("((A,C),(B,D));");
        assert_eq!(robinson_foulds(&a, &b).unwrap(), 4);
        assert_eq!(robinson_foulds(&a, &a).unwrap(), 0);
    }

    #[test]
    fn test_weighted_example() {
        let a = prepared("((A:1.0,B:1.0):2.0,(C:1.0,D:1.0):2.0,E:1.0);");
        let b = prepared("((A:1.5,B:1.0):3.0,(C:0.5,D:1.0):2.0,E:1.0);");
        assert!((weighted_robinson_foulds(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((kuhner_felsenstein(&a, &b).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pairwise_matrix_symmetric() {
        let mut trees = vec![
            parse_newick("((A,B),(C,D),E);").unwrap(),
            parse_newick("((A,C),(B,D),E);").unwrap(),
            parse_newick("((A,B),(C,E),D);").unwrap(),
        ];
        let snaps = build_snapshots(&mut trees).unwrap();
        let m = pairwise_matrix(&snaps, Metric::Rf).unwrap();
        assert_eq!(m, vec![vec![0.0, 4.0, 2.0], vec![4.0, 0.0, 4.0], vec![2.0, 4.0, 0.0]]);
    }

    // PHYLIP treedist example trees, every branch of length 0.1
    // https://evolution.genetics.washington.edu/phylip/doc/treedist.html
    const TREEDIST: [&str; 12] = [
        "(A:0.1,(B:0.1,(H:0.1,(D:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,((J:0.1,H:0.1):0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,(H:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((F:0.1,I:0.1):0.1,(G:0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,(((J:0.1,H:0.1):0.1,D:0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,(G:0.1,((F:0.1,I:0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(D:0.1,(H:0.1,(J:0.1,(((G:0.1,E:0.1):0.1,(F:0.1,I:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1):0.1);",
        "(A:0.1,(B:0.1,(E:0.1,((G:0.1,(F:0.1,I:0.1):0.1):0.1,((J:0.1,(H:0.1,D:0.1):0.1):0.1,C:0.1):0.1):0.1):0.1):0.1);",
    ];

    const TREEDIST_RF: [[usize; 12]; 12] = [
        [0, 4, 2, 10, 10, 10, 10, 10, 10, 10, 2, 10],
        [4, 0, 2, 10, 8, 10, 8, 10, 8, 10, 2, 10],
        [2, 2, 0, 10, 10, 10, 10, 10, 10, 10, 0, 10],
        [10, 10, 10, 0, 2, 2, 4, 2, 4, 0, 10, 2],
        [10, 8, 10, 2, 0, 4, 2, 4, 2, 2, 10, 4],
        [10, 10, 10, 2, 4, 0, 2, 2, 4, 2, 10, 2],
        [10, 8, 10, 4, 2, 2, 0, 4, 2, 4, 10, 4],
        [10, 10, 10, 2, 4, 2, 4, 0, 2, 2, 10, 0],
        [10, 8, 10, 4, 2, 4, 2, 2, 0, 4, 10, 2],
        [10, 10, 10, 0, 2, 2, 4, 2, 4, 0, 10, 2],
        [2, 2, 0, 10, 10, 10, 10, 10, 10, 10, 0, 10],
        [10, 10, 10, 2, 4, 2, 4, 0, 2, 2, 10, 0],
    ];

    #[test]
    fn robinson_foulds_treedist() {
        for indices in (0..TREEDIST.len()).combinations(2) {
            let (i0, i1) = (indices[0], indices[1]);
            let t0 = prepared(TREEDIST[i0]);
            let t1 = prepared(TREEDIST[i1]);
            assert_eq!(robinson_foulds(&t0, &t1).unwrap(), TREEDIST_RF[i0][i1], "trees {i0} and {i1}");
        }
    }

    #[test]
    // each differing split contributes its full 0.1 length
    fn weighted_robinson_foulds_treedist() {
        for indices in (0..TREEDIST.len()).combinations(2) {
            let (i0, i1) = (indices[0], indices[1]);
            let t0 = prepared(TREEDIST[i0]);
            let t1 = prepared(TREEDIST[i1]);
            let expected = 0.1 * TREEDIST_RF[i0][i1] as f64;
            assert!((weighted_robinson_foulds(&t0, &t1).unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn kuhner_felsenstein_treedist() {
        for indices in (0..TREEDIST.len()).combinations(2) {
            let (i0, i1) = (indices[0], indices[1]);
            let t0 = prepared(TREEDIST[i0]);
            let t1 = prepared(TREEDIST[i1]);
            let expected = (0.01 * TREEDIST_RF[i0][i1] as f64).sqrt();
            assert!((kuhner_felsenstein(&t0, &t1).unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn treedist_matrix_matches_pairs() {
        let mut trees: Vec<Tree> = TREEDIST.iter().map(|nw| parse_newick(nw).unwrap()).collect();
        let snaps = build_snapshots(&mut trees).unwrap();
        let m = pairwise_matrix(&snaps, Metric::Rf).unwrap();
        for (i, row) in m.iter().enumerate() {
            for (j, &d) in row.iter().enumerate() {
                assert_eq!(d, TREEDIST_RF[i][j] as f64);
            }
        }
    }
}
