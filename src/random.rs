//! Random tree generators.
//!
//! Every generator takes the random source explicitly, so a seeded
//! `StdRng` reproduces the same tree. Tips are named `Tip0`, `Tip1`, ...
//! and branch lengths follow an exponential law of mean 1.

use rand::Rng;

use crate::error::{Result, TreeError};
use crate::tree::{NodeId, Tree};

fn exp_length<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    -(1.0 - rng.r#gen::<f64>()).ln()
}

fn check_tips(n: usize, rooted: bool) -> Result<()> {
    let min = if rooted { 2 } else { 3 };
    if n < min {
        return Err(TreeError::TooFewTips(n));
    }
    Ok(())
}

/// Names the tips in pre-order and draws every branch length.
fn finish<R: Rng + ?Sized>(mut tree: Tree, rooted: bool, rng: &mut R) -> Result<Tree> {
    if !rooted {
        tree.unroot();
    }
    for (i, tip) in tree.tips().into_iter().enumerate() {
        tree.node_mut(tip)?.name = format!("Tip{i}");
    }
    for e in tree.edges() {
        tree.edge_mut(e)?.length = Some(exp_length(rng));
    }
    Ok(tree)
}

/// Yule-Harding tree: starting from a cherry, a uniformly chosen tip splits
/// until `n` tips exist.
pub fn yule<R: Rng + ?Sized>(n: usize, rooted: bool, rng: &mut R) -> Result<Tree> {
    check_tips(n, rooted)?;
    let mut tree = Tree::new();
    let root = tree.new_node("");
    let mut tips: Vec<NodeId> = Vec::with_capacity(n);
    for _ in 0..2 {
        let t = tree.new_node("");
        tree.connect_nodes(root, t)?;
        tips.push(t);
    }
    while tips.len() < n {
        let split = tips.swap_remove(rng.gen_range(0..tips.len()));
        for _ in 0..2 {
            let t = tree.new_node("");
            tree.connect_nodes(split, t)?;
            tips.push(t);
        }
    }
    finish(tree, rooted, rng)
}

/// Tree drawn uniformly among binary topologies, by attaching each new tip
/// on a uniformly chosen edge. A rooted tree is then rooted on a uniformly
/// chosen edge.
pub fn uniform<R: Rng + ?Sized>(n: usize, rooted: bool, rng: &mut R) -> Result<Tree> {
    check_tips(n, rooted)?;
    let mut tree = Tree::new();
    let root = tree.new_node("");
    let mut edges = Vec::with_capacity(2 * n);
    let start = if n == 2 { 2 } else { 3 };
    for _ in 0..start {
        let t = tree.new_node("");
        edges.push(tree.connect_nodes(root, t)?);
    }
    for _ in start..n {
        let e = edges[rng.gen_range(0..edges.len())];
        let mid = tree.split_edge(e, None)?;
        let t = tree.new_node("");
        edges.push(tree.connect_nodes(mid, t)?);
        // split_edge created the lower half as the newest edge
        edges.push(tree.edge_capacity() - 2);
    }
    if rooted && n > 2 {
        let e = edges[rng.gen_range(0..edges.len())];
        let new_root = tree.split_edge(e, None)?;
        tree.reroot(new_root)?;
    }
    finish(tree, rooted, rng)
}

/// Ladder-shaped tree: every internal node has at least one tip child.
pub fn caterpillar<R: Rng + ?Sized>(n: usize, rooted: bool, rng: &mut R) -> Result<Tree> {
    check_tips(n, rooted)?;
    let mut tree = Tree::new();
    let mut current = tree.new_node("");
    for _ in 0..n - 2 {
        let t = tree.new_node("");
        tree.connect_nodes(current, t)?;
        let next = tree.new_node("");
        tree.connect_nodes(current, next)?;
        current = next;
    }
    for _ in 0..2 {
        let t = tree.new_node("");
        tree.connect_nodes(current, t)?;
    }
    finish(tree, rooted, rng)
}

/// Perfectly balanced tree with `2^depth` tips.
pub fn balanced<R: Rng + ?Sized>(depth: u32, rooted: bool, rng: &mut R) -> Result<Tree> {
    let n = 1usize.checked_shl(depth).ok_or_else(|| TreeError::InvalidArgument(format!("depth {depth}")))?;
    check_tips(n, rooted)?;
    let mut tree = Tree::new();
    let mut level = vec![tree.new_node("")];
    for _ in 0..depth {
        let mut next = Vec::with_capacity(level.len() * 2);
        for &parent in &level {
            for _ in 0..2 {
                let c = tree.new_node("");
                tree.connect_nodes(parent, c)?;
                next.push(c);
            }
        }
        level = next;
    }
    finish(tree, rooted, rng)
}

/// Star tree: every tip hangs from the root.
pub fn star<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Result<Tree> {
    check_tips(n, false)?;
    let mut tree = Tree::new();
    let root = tree.new_node("");
    for _ in 0..n {
        let t = tree.new_node("");
        tree.connect_nodes(root, t)?;
    }
    finish(tree, false, rng)
}
