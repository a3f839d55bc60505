//! Arena-based phylogenetic tree.
//!
//! # Overview
//! A [`Tree`] owns every [`Node`] and [`Edge`]; nodes and edges refer to each
//! other through [`NodeId`] / [`EdgeId`] indices into the owning tree, so the
//! cyclic node ↔ edge references never need shared ownership.
//!
//! * A node keeps its neighbors and its incident edges in two lists of the
//!   same order (`neighbors[i]` is reached through `edges[i]`).
//! * An edge is oriented: `left` is the ancestor-side node under the current
//!   rooting and `right` its child. Any change of root re-derives the
//!   orientation of every edge.
//! * A rooted tree has a root with exactly 2 neighbors, an unrooted tree a
//!   pseudo-root with 3 or more.
//! * Deleted nodes and edges are tombstoned; their ids are never reused.
//!   Only what is reachable from the root belongs to the tree.
//!
//! Bipartitions are derived from the tip index (tip name → bit, assigned in
//! sorted name order) and stored lazily on the edges. Any topology change
//! drops them; they must be rebuilt with [`Tree::update_bitsets`] before a
//! bipartition-dependent operation.

mod edit;
mod newick;
mod reroot;

use std::collections::HashMap;

use crate::bitset::Bitset;
use crate::error::{Result, TreeError};

pub use newick::{from_phylotree, parse_newick};

/// Index of a node in its tree's arena.
pub type NodeId = usize;
/// Index of an edge in its tree's arena.
pub type EdgeId = usize;

/// A tree node: tip, internal node or root.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    /// Node label, empty when unnamed.
    pub name: String,
    /// Bracketed comments attached to the node label.
    pub comments: Vec<String>,
    pub(crate) neighbors: Vec<NodeId>,
    pub(crate) edges: Vec<EdgeId>,
    pub(crate) depth: Option<usize>,
    pub(crate) alive: bool,
}

impl Node {
    fn new(id: NodeId, name: String) -> Self {
        Node {
            id,
            name,
            comments: Vec::new(),
            neighbors: Vec::new(),
            edges: Vec::new(),
            depth: None,
            alive: true,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Neighbor nodes, in the same order as [`Node::edges`].
    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Incident edges, in the same order as [`Node::neighbors`].
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn degree(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_tip(&self) -> bool {
        self.neighbors.len() <= 1
    }

    /// Number of edges to the closest tip, once [`Tree::update_depths`] ran.
    pub fn depth(&self) -> Option<usize> {
        self.depth
    }
}

/// An oriented edge between a parent (`left`) and a child (`right`).
#[derive(Debug, Clone)]
pub struct Edge {
    pub(crate) id: EdgeId,
    pub(crate) left: NodeId,
    pub(crate) right: NodeId,
    /// Branch length, if known.
    pub length: Option<f64>,
    /// Branch support, if known.
    pub support: Option<f64>,
    /// Bracketed comments written after the branch length.
    pub comments: Vec<String>,
    pub(crate) bitset: Option<Bitset>,
    pub(crate) alive: bool,
}

impl Edge {
    pub fn id(&self) -> EdgeId {
        self.id
    }

    /// Ancestor-side node.
    pub fn left(&self) -> NodeId {
        self.left
    }

    /// Descendant-side node.
    pub fn right(&self) -> NodeId {
        self.right
    }

    /// The endpoint that is not `node`.
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if self.left == node { self.right } else { self.left }
    }
}

/// Mapping between tip names and their bit positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipIndex {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl TipIndex {
    /// Builds the index from tip names; positions follow the sorted order.
    pub fn new(mut names: Vec<String>) -> Result<Self> {
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(TreeError::DuplicateTip(dup[0].clone()));
        }
        let positions = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
        Ok(TipIndex { names, positions })
    }

    /// Sorted tip names; `names()[i]` owns bit `i`.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A phylogenetic tree owning its nodes and edges.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) root: Option<NodeId>,
    pub(crate) tip_index: Option<TipIndex>,
    pub(crate) bitsets_valid: bool,
}

// ============================================================================
// Construction and access
// ============================================================================
impl Tree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Tree::default()
    }

    /// Adds a disconnected node and returns its id.
    ///
    /// The first node added becomes the root until [`Tree::set_root`] says otherwise.
    pub fn new_node(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, name.into()));
        if self.root.is_none() {
            self.root = Some(id);
        }
        id
    }

    /// Connects `parent` to `child` with a new edge and returns the edge id.
    pub fn connect_nodes(&mut self, parent: NodeId, child: NodeId) -> Result<EdgeId> {
        self.try_node(parent)?;
        self.try_node(child)?;
        let id = self.edges.len();
        self.edges.push(Edge {
            id,
            left: parent,
            right: child,
            length: None,
            support: None,
            comments: Vec::new(),
            bitset: None,
            alive: true,
        });
        self.nodes[parent].neighbors.push(child);
        self.nodes[parent].edges.push(id);
        self.nodes[child].neighbors.push(parent);
        self.nodes[child].edges.push(id);
        self.clear_bitsets();
        self.tip_index = None;
        Ok(id)
    }

    /// Designates `node` as the root and re-orients every edge away from it.
    pub fn set_root(&mut self, node: NodeId) -> Result<()> {
        self.try_node(node)?;
        self.root = Some(node);
        self.reorient();
        Ok(())
    }

    /// Number of edge ids ever allocated, tombstones included.
    pub(crate) fn edge_capacity(&self) -> usize {
        self.edges.len()
    }

    /// Number of node ids ever allocated, tombstones included.
    pub(crate) fn node_capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Root node.
    pub fn root(&self) -> Result<NodeId> {
        self.root.ok_or(TreeError::NoRoot)
    }

    /// Node by id.
    ///
    /// # Panics
    /// Panics if `id` was never allocated by this tree; see [`Tree::try_node`].
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Edge by id.
    ///
    /// # Panics
    /// Panics if `id` was never allocated by this tree; see [`Tree::try_edge`].
    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    /// Node by id, failing for unknown or deleted nodes.
    pub fn try_node(&self, id: NodeId) -> Result<&Node> {
        match self.nodes.get(id) {
            Some(n) if n.alive => Ok(n),
            _ => Err(TreeError::NodeNotFound(id)),
        }
    }

    /// Edge by id, failing for unknown or deleted edges.
    pub fn try_edge(&self, id: EdgeId) -> Result<&Edge> {
        match self.edges.get(id) {
            Some(e) if e.alive => Ok(e),
            _ => Err(TreeError::EdgeNotFound(id)),
        }
    }

    /// Mutable node, for labels and comments.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.try_node(id)?;
        Ok(&mut self.nodes[id])
    }

    /// Mutable edge, for length, support and comments.
    pub fn edge_mut(&mut self, id: EdgeId) -> Result<&mut Edge> {
        self.try_edge(id)?;
        Ok(&mut self.edges[id])
    }

    /// True when the root has exactly two neighbors.
    pub fn is_rooted(&self) -> bool {
        self.root.is_some_and(|r| self.nodes[r].degree() == 2)
    }

    /// Edge linking `node` to its parent, `None` for the root and for ids
    /// this tree never allocated.
    pub fn parent_edge(&self, node: NodeId) -> Option<EdgeId> {
        self.nodes
            .get(node)?
            .edges
            .iter()
            .copied()
            .find(|&e| self.edges[e].right == node)
    }

    /// Parent of `node`, `None` for the root.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parent_edge(node).map(|e| self.edges[e].left)
    }

    /// `(edge, child)` pairs below `node`, in neighbor order; nothing for an
    /// unknown id.
    pub fn children(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, NodeId)> + '_ {
        self.nodes
            .get(node)
            .into_iter()
            .flat_map(|n| n.edges.iter().zip(&n.neighbors))
            .filter(move |(e, _)| self.edges[**e].left == node)
            .map(|(e, c)| (*e, *c))
    }

    /// Finds a node by its label.
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes().into_iter().find(|&n| self.nodes[n].name == name)
    }
}

// ============================================================================
// Traversals
// ============================================================================
impl Tree {
    /// Nodes in pre-order (parents before children, children in neighbor order).
    pub fn preorder(&self) -> Result<Vec<NodeId>> {
        let root = self.root()?;
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            order.push(node);
            let before = stack.len();
            stack.extend(self.children(node).map(|(_, c)| c));
            stack[before..].reverse();
        }
        Ok(order)
    }

    /// Nodes with every child listed before its parent.
    pub fn postorder(&self) -> Result<Vec<NodeId>> {
        let mut order = self.preorder()?;
        order.reverse();
        Ok(order)
    }

    /// Edges ordered so that every edge comes after all edges below it.
    pub fn postorder_edges(&self) -> Result<Vec<EdgeId>> {
        Ok(self
            .postorder()?
            .into_iter()
            .filter_map(|n| self.parent_edge(n))
            .collect())
    }

    /// All nodes of the tree in pre-order, empty when there is no root.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.preorder().unwrap_or_default()
    }

    /// All edges of the tree, in pre-order of their child node.
    pub fn edges(&self) -> Vec<EdgeId> {
        self.nodes().into_iter().filter_map(|n| self.parent_edge(n)).collect()
    }

    /// All tips in pre-order.
    pub fn tips(&self) -> Vec<NodeId> {
        self.nodes().into_iter().filter(|&n| self.nodes[n].is_tip()).collect()
    }

    pub fn num_tips(&self) -> usize {
        self.tips().len()
    }

    /// Edges whose child is not a tip.
    pub fn internal_edges(&self) -> Vec<EdgeId> {
        self.edges()
            .into_iter()
            .filter(|&e| !self.nodes[self.edges[e].right].is_tip())
            .collect()
    }

    /// Edges leading to a tip.
    pub fn tip_edges(&self) -> Vec<EdgeId> {
        self.edges()
            .into_iter()
            .filter(|&e| self.nodes[self.edges[e].right].is_tip())
            .collect()
    }

    /// Tip names in pre-order.
    pub fn tip_names(&self) -> Vec<String> {
        self.tips().into_iter().map(|t| self.nodes[t].name.clone()).collect()
    }

    /// True when every internal node has 3 neighbors (2 for a rooted root).
    pub fn is_binary(&self) -> bool {
        let root = self.root;
        self.nodes().into_iter().all(|n| {
            let d = self.nodes[n].degree();
            d <= 1 || d == 3 || (Some(n) == root && d == 2)
        })
    }

    /// Sum of all known branch lengths.
    pub fn sum_branch_lengths(&self) -> f64 {
        self.edges().into_iter().filter_map(|e| self.edges[e].length).sum()
    }

    /// Re-derives `left`/`right` of every edge reachable from the root.
    pub(crate) fn reorient(&mut self) {
        let Some(root) = self.root else { return };
        let mut stack = vec![(root, usize::MAX)];
        while let Some((node, from_edge)) = stack.pop() {
            for i in 0..self.nodes[node].edges.len() {
                let e = self.nodes[node].edges[i];
                if e == from_edge {
                    continue;
                }
                let child = self.nodes[node].neighbors[i];
                let edge = &mut self.edges[e];
                edge.left = node;
                edge.right = child;
                stack.push((child, e));
            }
        }
        self.clear_bitsets();
    }

    /// Checks the structural invariants on everything reachable from the root:
    /// aligned neighbor/edge lists, orientation away from the root, one parent
    /// per non-root node, no cycle.
    pub fn validate(&self) -> Result<()> {
        let root = self.root()?;
        self.try_node(root)?;
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let n = self.try_node(node)?;
            if seen[node] {
                return Err(TreeError::Inconsistent(format!("node {node} is reachable twice")));
            }
            seen[node] = true;
            if n.neighbors.len() != n.edges.len() {
                return Err(TreeError::Inconsistent(format!("node {node} has misaligned adjacency")));
            }
            let mut parents = 0;
            for (&e, &nb) in n.edges.iter().zip(&n.neighbors) {
                let edge = self.try_edge(e)?;
                if edge.other_end(node) != nb || (edge.left != node && edge.right != node) {
                    return Err(TreeError::EdgeNotFound(e));
                }
                if edge.right == node {
                    parents += 1;
                } else {
                    stack.push(nb);
                }
            }
            let expected = usize::from(node != root);
            if parents != expected {
                return Err(TreeError::Inconsistent(format!(
                    "node {node} has {parents} parent edges, expected {expected}"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tip index, bitsets and depths
// ============================================================================
impl Tree {
    /// Assigns every tip a stable bit position by sorted name.
    ///
    /// Fails on unnamed or duplicated tips.
    pub fn update_tip_index(&mut self) -> Result<()> {
        let mut names = Vec::new();
        for t in self.tips() {
            let name = &self.nodes[t].name;
            if name.is_empty() {
                return Err(TreeError::UnnamedTip(t));
            }
            names.push(name.clone());
        }
        self.tip_index = Some(TipIndex::new(names)?);
        self.clear_bitsets();
        Ok(())
    }

    /// The tip index, if built.
    pub fn tip_index(&self) -> Result<&TipIndex> {
        self.tip_index.as_ref().ok_or(TreeError::TipIndexNotBuilt)
    }

    /// Bit position of a tip name.
    pub fn tip_bit(&self, name: &str) -> Result<usize> {
        self.tip_index()?
            .position(name)
            .ok_or_else(|| TreeError::TipNotFound(name.to_string()))
    }

    /// True when both trees were indexed over exactly the same tip names.
    pub fn same_tip_set(&self, other: &Tree) -> Result<bool> {
        Ok(self.tip_index()?.names() == other.tip_index()?.names())
    }

    /// Marks every edge bitset as stale.
    pub fn clear_bitsets(&mut self) {
        self.bitsets_valid = false;
    }

    /// Fills every edge with the set of tips on its right side, in one
    /// bottom-up pass. Requires the tip index.
    pub fn update_bitsets(&mut self) -> Result<()> {
        let len = self.tip_index()?.len();
        for e in self.postorder_edges()? {
            let right = self.edges[e].right;
            let mut bs = Bitset::zeros(len);
            if self.nodes[right].is_tip() {
                bs.set(self.tip_bit(&self.nodes[right].name)?);
            } else {
                for (ce, _) in self.children(right) {
                    if let Some(child) = &self.edges[ce].bitset {
                        bs.or_assign(child);
                    }
                }
            }
            self.edges[e].bitset = Some(bs);
        }
        self.bitsets_valid = true;
        Ok(())
    }

    /// Builds the tip index and the bitsets in one go.
    pub fn prepare_bipartitions(&mut self) -> Result<()> {
        self.update_tip_index()?;
        self.update_bitsets()
    }

    /// True once [`Tree::update_bitsets`] ran since the last topology change.
    pub fn bitsets_ready(&self) -> bool {
        self.bitsets_valid && self.tip_index.is_some()
    }

    /// Tips on the right side of `edge`.
    pub fn edge_bitset(&self, edge: EdgeId) -> Result<&Bitset> {
        let e = self.try_edge(edge)?;
        if !self.bitsets_valid {
            return Err(TreeError::BitsetsNotBuilt);
        }
        e.bitset.as_ref().ok_or(TreeError::BitsetsNotBuilt)
    }

    /// Topological depth of `edge`: size of the smaller side of its bipartition.
    pub fn topo_depth(&self, edge: EdgeId) -> Result<usize> {
        let n = self.tip_index()?.len();
        let ones = self.edge_bitset(edge)?.count_ones();
        Ok(ones.min(n - ones))
    }

    /// Sets every node's depth to its distance, in edges, to the closest tip.
    pub fn update_depths(&mut self) -> Result<()> {
        let post = self.postorder()?;
        let mut below = vec![usize::MAX; self.nodes.len()];
        for &n in &post {
            below[n] = if self.nodes[n].is_tip() {
                0
            } else {
                self.children(n)
                    .map(|(_, c)| below[c].saturating_add(1))
                    .min()
                    .unwrap_or(usize::MAX)
            };
        }
        // top-down: closest tip may be reached through the parent
        for &n in post.iter().rev() {
            if let Some(p) = self.parent(n) {
                below[n] = below[n].min(below[p].saturating_add(1));
            }
            self.nodes[n].depth = Some(below[n]);
        }
        Ok(())
    }
}

// ============================================================================
// Low-level surgery shared by the editing modules
// ============================================================================
impl Tree {
    /// Removes `edge` from the adjacency lists of both its endpoints.
    pub(crate) fn unlink_edge(&mut self, edge: EdgeId) {
        let (l, r) = (self.edges[edge].left, self.edges[edge].right);
        for n in [l, r] {
            let node = &mut self.nodes[n];
            if let Some(pos) = node.edges.iter().position(|&e| e == edge) {
                node.edges.remove(pos);
                node.neighbors.remove(pos);
            }
        }
    }

    pub(crate) fn delete_edge(&mut self, edge: EdgeId) {
        self.unlink_edge(edge);
        self.edges[edge].alive = false;
        self.edges[edge].bitset = None;
    }

    pub(crate) fn delete_node(&mut self, node: NodeId) {
        let n = &mut self.nodes[node];
        n.alive = false;
        n.neighbors.clear();
        n.edges.clear();
    }

    /// In `node`'s lists, puts `new_edge` (reaching `new_neighbor`) in the
    /// slot of `old_edge`.
    pub(crate) fn replace_incident(
        &mut self,
        node: NodeId,
        old_edge: EdgeId,
        new_edge: EdgeId,
        new_neighbor: NodeId,
    ) -> Result<()> {
        let n = &mut self.nodes[node];
        let pos = n
            .edges
            .iter()
            .position(|&e| e == old_edge)
            .ok_or(TreeError::EdgeNotFound(old_edge))?;
        n.edges[pos] = new_edge;
        n.neighbors[pos] = new_neighbor;
        Ok(())
    }

    /// In `node`'s lists, makes `edge` reach `new_neighbor`.
    pub(crate) fn replace_neighbor(&mut self, node: NodeId, edge: EdgeId, new_neighbor: NodeId) -> Result<()> {
        let n = &mut self.nodes[node];
        let pos = n.edges.iter().position(|&e| e == edge).ok_or(TreeError::EdgeNotFound(edge))?;
        n.neighbors[pos] = new_neighbor;
        Ok(())
    }

    /// Swaps the `old` end of `edge` for `new`, keeping the orientation.
    pub(crate) fn replace_endpoint(&mut self, edge: EdgeId, old: NodeId, new: NodeId) -> Result<()> {
        let e = &mut self.edges[edge];
        if e.left == old {
            e.left = new;
        } else if e.right == old {
            e.right = new;
        } else {
            return Err(TreeError::Inconsistent(format!("node {old} is not an end of edge {edge}")));
        }
        Ok(())
    }

    /// Orients `edge` so that `parent` is its left end.
    pub(crate) fn orient_edge(&mut self, edge: EdgeId, parent: NodeId) -> Result<()> {
        let e = &mut self.edges[edge];
        if e.right == parent {
            std::mem::swap(&mut e.left, &mut e.right);
        } else if e.left != parent {
            return Err(TreeError::Inconsistent(format!("node {parent} is not an end of edge {edge}")));
        }
        Ok(())
    }

    /// Re-attaches the `old` endpoint of `edge` to `new`, keeping its
    /// position in `new`'s lists at `slot` (or appending when `None`).
    pub(crate) fn move_edge_endpoint(
        &mut self,
        edge: EdgeId,
        old: NodeId,
        new: NodeId,
        slot: Option<usize>,
    ) {
        let other = self.edges[edge].other_end(old);
        {
            let e = &mut self.edges[edge];
            if e.left == old {
                e.left = new;
            } else {
                e.right = new;
            }
        }
        if let Some(pos) = self.nodes[old].edges.iter().position(|&x| x == edge) {
            self.nodes[old].edges.remove(pos);
            self.nodes[old].neighbors.remove(pos);
        }
        let target = &mut self.nodes[new];
        match slot {
            Some(i) if i <= target.edges.len() => {
                target.edges.insert(i, edge);
                target.neighbors.insert(i, other);
            }
            _ => {
                target.edges.push(edge);
                target.neighbors.push(other);
            }
        }
        if let Some(pos) = self.nodes[other].edges.iter().position(|&x| x == edge) {
            self.nodes[other].neighbors[pos] = new;
        }
    }
}
