//! Reversible local rearrangements.
//!
//! An NNI (nearest neighbor interchange) acts on an internal edge whose two
//! endpoints `n1` (left) and `n2` (right) both have three neighbors:
//!
//! ```text
//!   n1_1           n2_1            n1_1           n2_1
//!       \         /                    \         /
//!        n1 --- n2        cross=false    n1 --- n2
//!       /         \       =========>    /         \
//!   n1_2           n2_2            n2_1*          n2_2
//! ```
//!
//! One subtree of `n1` (`n1_2`) is exchanged with one subtree of `n2`
//! (`n2_1`, or `n2_2` when `cross` is set). The exchange keeps every list
//! slot in place, so applying the same exchange twice restores the tree
//! exactly: undo is apply.

use log::trace;

use crate::error::{Result, TreeError};
use crate::tree::{EdgeId, NodeId, Tree};

/// One NNI move on a pivot edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nni {
    pub edge: EdgeId,
    pub n1: NodeId,
    pub n2: NodeId,
    pub n1_1: NodeId,
    pub n1_2: NodeId,
    pub n2_1: NodeId,
    pub n2_2: NodeId,
    pub cross: bool,
    /// Edge holding `n1_2`.
    moved_1: EdgeId,
    /// Edge holding the exchanged subtree of `n2`.
    moved_2: EdgeId,
}

fn other_two(tree: &Tree, node: NodeId, pivot: EdgeId) -> Result<[(EdgeId, NodeId); 2]> {
    let n = tree.try_node(node)?;
    if n.degree() != 3 {
        return Err(TreeError::NotBifurcating { node, degree: n.degree() });
    }
    let mut others = n.edges().iter().zip(n.neighbors()).filter(|(e, _)| **e != pivot).map(|(e, c)| (*e, *c));
    match (others.next(), others.next()) {
        (Some(a), Some(b)) => Ok([a, b]),
        _ => Err(TreeError::Inconsistent(format!("node {node} lists edge {pivot} twice"))),
    }
}

impl Nni {
    /// Describes the move on `edge`. Fails with `NotBifurcating` when an
    /// endpoint does not have exactly three neighbors.
    pub fn new(tree: &Tree, edge: EdgeId, cross: bool) -> Result<Self> {
        let e = tree.try_edge(edge)?;
        let (n1, n2) = (e.left(), e.right());
        let [(_, n1_1), (moved_1, n1_2)] = other_two(tree, n1, edge)?;
        let [(b1, n2_1), (b2, n2_2)] = other_two(tree, n2, edge)?;
        let moved_2 = if cross { b2 } else { b1 };
        Ok(Nni { edge, n1, n2, n1_1, n1_2, n2_1, n2_2, cross, moved_1, moved_2 })
    }

    /// Exchanges the two subtrees. Involutive.
    fn swap(&self, tree: &mut Tree) -> Result<()> {
        let (ea, eb) = (self.moved_1, self.moved_2);
        let ends = |tree: &Tree, e: EdgeId| -> Result<(NodeId, NodeId)> {
            let edge = tree.try_edge(e)?;
            Ok((edge.left(), edge.right()))
        };
        let (a_l, a_r) = ends(tree, ea)?;
        let (b_l, b_r) = ends(tree, eb)?;
        // current holders of the two subtrees
        let holder_a = if a_l == self.n1 || a_l == self.n2 { a_l } else { a_r };
        let holder_b = if b_l == self.n1 || b_l == self.n2 { b_l } else { b_r };
        if holder_a == holder_b || ![self.n1, self.n2].contains(&holder_a) || ![self.n1, self.n2].contains(&holder_b) {
            return Err(TreeError::Inconsistent(format!("edges {ea} and {eb} no longer surround edge {}", self.edge)));
        }
        let sub_a = if a_l == holder_a { a_r } else { a_l };
        let sub_b = if b_l == holder_b { b_r } else { b_l };

        tree.replace_incident(holder_a, ea, eb, sub_b)?;
        tree.replace_incident(holder_b, eb, ea, sub_a)?;
        tree.replace_neighbor(sub_a, ea, holder_b)?;
        tree.replace_neighbor(sub_b, eb, holder_a)?;
        tree.replace_endpoint(ea, holder_a, holder_b)?;
        tree.replace_endpoint(eb, holder_b, holder_a)?;

        // a subtree on the root side makes its new holder the pivot's parent
        let parent_side = if tree.edge(ea).left() == sub_a {
            Some(holder_b)
        } else if tree.edge(eb).left() == sub_b {
            Some(holder_a)
        } else {
            None
        };
        if let Some(top) = parent_side {
            tree.orient_edge(self.edge, top)?;
        }
        tree.clear_bitsets();
        trace!("nni on edge {}: swapped edges {ea} and {eb}", self.edge);
        Ok(())
    }
}

/// Closed set of rearrangement moves sharing one apply/undo contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rearrangement {
    Nni(Nni),
}

impl Rearrangement {
    /// Performs the move. Bitsets of the tree become stale.
    pub fn apply(&self, tree: &mut Tree) -> Result<()> {
        match self {
            Rearrangement::Nni(m) => m.swap(tree),
        }
    }

    /// Reverts a previous [`Rearrangement::apply`].
    pub fn undo(&self, tree: &mut Tree) -> Result<()> {
        match self {
            Rearrangement::Nni(m) => m.swap(tree),
        }
    }

    pub fn edge(&self) -> EdgeId {
        match self {
            Rearrangement::Nni(m) => m.edge,
        }
    }
}

/// Both NNI moves of every internal edge whose endpoints have three
/// neighbors each, in pre-order of the edges.
pub fn nni_moves(tree: &Tree) -> Vec<Rearrangement> {
    let mut moves = Vec::new();
    for e in tree.internal_edges() {
        let edge = tree.edge(e);
        if tree.node(edge.left()).degree() != 3 || tree.node(edge.right()).degree() != 3 {
            continue;
        }
        for cross in [false, true] {
            if let Ok(m) = Nni::new(tree, e, cross) {
                moves.push(Rearrangement::Nni(m));
            }
        }
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::Bitset;
    use crate::random;
    use crate::tree::parse_newick;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn splits(tree: &mut Tree) -> HashSet<Bitset> {
        tree.prepare_bipartitions().unwrap();
        tree.edges().iter().map(|&e| tree.edge_bitset(e).unwrap().canonical()).collect()
    }

    #[test]
    fn test_not_bifurcating() {
        let t = parse_newick("((A,B,C),(D,E));").unwrap();
        let e = t.internal_edges()[0];
        assert!(matches!(Nni::new(&t, e, false), Err(TreeError::NotBifurcating { .. })));
    }

    #[test]
    fn test_single_move() {
        let mut t = parse_newick("((A,B),(C,D),E);").unwrap();
        let ab = t.node_by_name("A").and_then(|a| t.parent(a)).unwrap();
        let e = t.parent_edge(ab).unwrap();
        // n1 = root (pivot edge, CD, E), n2 = AB node; n1_2 = E, n2_1 = A
        let m = Rearrangement::Nni(Nni::new(&t, e, false).unwrap());
        m.apply(&mut t).unwrap();
        t.validate().unwrap();
        assert_eq!(t.to_newick().unwrap(), "((E,B),(C,D),A);");
        m.undo(&mut t).unwrap();
        assert_eq!(t.to_newick().unwrap(), "((A,B),(C,D),E);");
    }

    #[test]
    fn test_move_count() {
        let mut rng = StdRng::seed_from_u64(9);
        let t = random::yule(10, false, &mut rng).unwrap();
        // 7 internal edges of an unrooted binary tree on 10 tips
        assert_eq!(nni_moves(&t).len(), 14);
    }

    #[test]
    fn test_apply_undo_round_trip() {
        let mut rng = StdRng::seed_from_u64(2024);
        for rooted in [false, true] {
            let mut t = random::uniform(12, rooted, &mut rng).unwrap();
            let original = splits(&mut t);
            let newick = t.to_newick().unwrap();
            for m in nni_moves(&t) {
                m.apply(&mut t).unwrap();
                t.validate().unwrap();
                let moved = splits(&mut t);
                assert_ne!(moved, original);
                assert_eq!(moved.difference(&original).count(), 1);

                m.undo(&mut t).unwrap();
                t.validate().unwrap();
                assert_eq!(splits(&mut t), original);
                assert_eq!(t.to_newick().unwrap(), newick);
            }
        }
    }

    #[test]
    fn test_pivot_reorientation_on_root_side() {
        let mut t = parse_newick("(((A,B)x,(C,D)y)u,E,F)r;").unwrap();
        let (u, x, y) = (
            t.node_by_name("u").unwrap(),
            t.node_by_name("x").unwrap(),
            t.node_by_name("y").unwrap(),
        );
        // y becomes the root, so u's last neighbor is now its parent
        t.reroot(y).unwrap();
        let newick = t.to_newick().unwrap();
        let pivot = t.parent_edge(x).unwrap();
        let m = Nni::new(&t, pivot, false).unwrap();
        assert_eq!((m.n1, m.n2, m.n1_2), (u, x, y));

        let m = Rearrangement::Nni(m);
        m.apply(&mut t).unwrap();
        t.validate().unwrap();
        assert_eq!(t.parent(u), Some(x));
        assert_eq!(t.parent(x), Some(y));

        m.undo(&mut t).unwrap();
        t.validate().unwrap();
        assert_eq!(t.parent(x), Some(u));
        assert_eq!(t.to_newick().unwrap(), newick);
    }
}
