//! Topology edits: tip removal, branch collapsing, unrooting, relabeling.
//!
//! Every edit drops the edge bitsets. Edits that change the tip set also drop
//! the tip index.

use std::collections::{HashMap, HashSet};

use log::debug;
use rand::Rng;
use rand::seq::SliceRandom;

use super::{EdgeId, NodeId, Tree};
use crate::error::{Result, TreeError};

fn sum_lengths(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

fn max_support(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

impl Tree {
    /// Removes the named tips, or every other tip when `revert` is set.
    ///
    /// Nodes left with two neighbors are merged away: the surviving edge gets
    /// the sum of both lengths and the larger of both supports. Fails on a
    /// duplicated or unknown name and when fewer than 2 tips would remain.
    pub fn remove_tips<S: AsRef<str>>(&mut self, names: &[S], revert: bool) -> Result<()> {
        let mut wanted = HashSet::with_capacity(names.len());
        for name in names {
            if !wanted.insert(name.as_ref()) {
                return Err(TreeError::DuplicateTip(name.as_ref().to_string()));
            }
        }

        let tips = self.tips();
        let present: HashSet<&str> = tips.iter().map(|&t| self.nodes[t].name.as_str()).collect();
        if let Some(missing) = wanted.iter().find(|n| !present.contains(*n)) {
            return Err(TreeError::TipNotFound(missing.to_string()));
        }

        let doomed: Vec<NodeId> = tips
            .iter()
            .copied()
            .filter(|&t| wanted.contains(self.nodes[t].name.as_str()) != revert)
            .collect();
        let remaining = tips.len() - doomed.len();
        if remaining < 2 {
            return Err(TreeError::TooFewTips(remaining));
        }

        debug!("removing {} tips, {} remain", doomed.len(), remaining);
        for tip in doomed {
            self.remove_tip(tip)?;
        }
        self.tip_index = None;
        self.clear_bitsets();
        Ok(())
    }

    fn remove_tip(&mut self, tip: NodeId) -> Result<()> {
        let root = self.root()?;
        if tip == root {
            // tree rooted on a tip: its only neighbor takes over
            let (e, nb) = (self.nodes[tip].edges[0], self.nodes[tip].neighbors[0]);
            self.delete_edge(e);
            self.delete_node(tip);
            self.root = Some(nb);
            self.reorient();
            return Ok(());
        }

        let edge = self.parent_edge(tip).ok_or(TreeError::NodeNotFound(tip))?;
        let parent = self.edges[edge].left;
        let degree_before = self.nodes[parent].degree();
        self.delete_edge(edge);
        self.delete_node(tip);

        let degree = self.nodes[parent].degree();
        if parent == root {
            if degree == 1 {
                let (ce, child) = (self.nodes[parent].edges[0], self.nodes[parent].neighbors[0]);
                self.delete_edge(ce);
                self.delete_node(parent);
                self.root = Some(child);
            } else if degree == 2 && degree_before >= 3 {
                // keep an unrooted tree unrooted
                self.unroot();
            }
        } else if degree == 2 {
            self.merge_degree_two(parent);
        }
        Ok(())
    }

    /// Merges a non-root node with exactly one parent and one child into a
    /// single edge (length sum, support max).
    pub(crate) fn merge_degree_two(&mut self, node: NodeId) {
        let Some(up) = self.parent_edge(node) else { return };
        let Some((down, child)) = self.children(node).next() else { return };
        if self.nodes[node].degree() != 2 {
            return;
        }
        let parent = self.edges[up].left;

        if let Some(pos) = self.nodes[child].edges.iter().position(|&e| e == down) {
            self.nodes[child].edges[pos] = up;
            self.nodes[child].neighbors[pos] = parent;
        }
        if let Some(pos) = self.nodes[parent].edges.iter().position(|&e| e == up) {
            self.nodes[parent].neighbors[pos] = child;
        }

        let (len_down, sup_down) = (self.edges[down].length, self.edges[down].support);
        let kept = &mut self.edges[up];
        kept.right = child;
        kept.length = sum_lengths(kept.length, len_down);
        kept.support = max_support(kept.support, sup_down);

        self.edges[down].alive = false;
        self.edges[down].bitset = None;
        self.delete_node(node);
        self.clear_bitsets();
    }

    /// Removes a 2-neighbor root, joining its two edges into one.
    ///
    /// The internal child becomes the pseudo-root. Trees that are not rooted,
    /// or whose root only joins two tips, are left unchanged.
    pub fn unroot(&mut self) {
        let Some(root) = self.root else { return };
        if self.nodes[root].degree() != 2 {
            return;
        }
        let n = &self.nodes[root];
        let (e0, c0, e1, c1) = (n.edges[0], n.neighbors[0], n.edges[1], n.neighbors[1]);
        let ((keep_e, new_root), (other_e, _)) = if !self.nodes[c0].is_tip() {
            ((e0, c0), (e1, c1))
        } else if !self.nodes[c1].is_tip() {
            ((e1, c1), (e0, c0))
        } else {
            return;
        };

        let length = sum_lengths(self.edges[keep_e].length, self.edges[other_e].length);
        let support = max_support(self.edges[keep_e].support, self.edges[other_e].support);
        self.delete_edge(keep_e);
        self.move_edge_endpoint(other_e, root, new_root, Some(0));
        let edge = &mut self.edges[other_e];
        edge.length = length;
        edge.support = support;
        self.delete_node(root);
        self.root = Some(new_root);
        self.reorient();
    }

    /// Collapses an internal edge: the child's other edges move to the
    /// parent, at the position the collapsed edge held.
    pub(crate) fn collapse_edge(&mut self, edge: EdgeId) {
        let (u, v) = (self.edges[edge].left, self.edges[edge].right);
        let slot = self.nodes[u].edges.iter().position(|&e| e == edge).unwrap_or(0);
        self.delete_edge(edge);
        let moved: Vec<EdgeId> = self.nodes[v].edges.clone();
        for (k, e) in moved.into_iter().enumerate() {
            self.move_edge_endpoint(e, v, u, Some(slot + k));
        }
        self.delete_node(v);
        self.clear_bitsets();
    }

    /// Collapses every internal edge selected by `pred`; root-adjacent
    /// edges only when `include_root`. Returns the number collapsed.
    fn collapse_where(&mut self, include_root: bool, pred: impl Fn(&Tree, EdgeId) -> bool) -> usize {
        let selected: Vec<EdgeId> = {
            let tree: &Tree = self;
            tree.internal_edges()
                .into_iter()
                .filter(|&e| include_root || Some(tree.edges[e].left) != tree.root)
                .filter(|&e| pred(tree, e))
                .collect()
        };
        for &e in &selected {
            self.collapse_edge(e);
        }
        debug!("collapsed {} edges", selected.len());
        selected.len()
    }

    /// Removes internal edges with length ≤ `threshold`, turning their
    /// endpoints into a multifurcation.
    ///
    /// Root-adjacent edges are skipped unless `include_root`. Tip edges can
    /// not be merged away without losing the tip; with `include_tips` their
    /// length is set to 0 instead. Edges without a length are left alone.
    pub fn collapse_short_branches(
        &mut self,
        threshold: f64,
        include_root: bool,
        include_tips: bool,
    ) -> usize {
        let short = |t: &Tree, e: EdgeId| t.edges[e].length.is_some_and(|l| l <= threshold);
        if include_tips {
            for e in self.tip_edges() {
                if short(self, e) {
                    self.edges[e].length = Some(0.0);
                }
            }
        }
        self.collapse_where(include_root, short)
    }

    /// Removes internal edges whose support is below `threshold`.
    pub fn collapse_low_support(&mut self, threshold: f64) -> usize {
        self.collapse_where(false, |t, e| t.edges[e].support.is_some_and(|s| s < threshold))
    }

    /// Removes internal edges whose topological depth lies in `[min, max]`.
    ///
    /// Requires up-to-date bitsets.
    pub fn collapse_depth(&mut self, min: usize, max: usize) -> Result<usize> {
        let mut depths = HashMap::new();
        for e in self.internal_edges() {
            depths.insert(e, self.topo_depth(e)?);
        }
        Ok(self.collapse_where(false, |_, e| {
            depths.get(&e).is_some_and(|d| (min..=max).contains(d))
        }))
    }

    /// Renames tips according to `map`; tips absent from the map keep their
    /// name. Returns the number of renamed tips.
    pub fn rename_tips(&mut self, map: &HashMap<String, String>) -> usize {
        let mut renamed = 0;
        for t in self.tips() {
            if let Some(new) = map.get(&self.nodes[t].name) {
                self.nodes[t].name = new.clone();
                renamed += 1;
            }
        }
        self.tip_index = None;
        self.clear_bitsets();
        renamed
    }

    /// Randomly permutes tip names over the tips, keeping the topology.
    pub fn shuffle_tip_names<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let tips = self.tips();
        let mut names: Vec<String> = tips.iter().map(|&t| self.nodes[t].name.clone()).collect();
        names.shuffle(rng);
        for (t, name) in tips.into_iter().zip(names) {
            self.nodes[t].name = name;
        }
        self.tip_index = None;
        self.clear_bitsets();
    }

    pub fn clear_lengths(&mut self) {
        for e in &mut self.edges {
            e.length = None;
        }
    }

    pub fn clear_supports(&mut self) {
        for e in &mut self.edges {
            e.support = None;
        }
    }

    pub fn clear_comments(&mut self) {
        for n in &mut self.nodes {
            n.comments.clear();
        }
        for e in &mut self.edges {
            e.comments.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TreeError;
    use crate::tree::parse_newick;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_remove_tip_merges_lengths_and_supports() {
        let mut t = parse_newick("((A:1,B:2)0.9:3,(C:1,D:1)0.5:1,E:1);").unwrap();
        t.remove_tips(&["A"], false).unwrap();
        t.validate().unwrap();
        assert_eq!(t.to_newick().unwrap(), "(B:5,(C:1,D:1)0.5:1,E:1);");
    }

    #[test]
    fn test_remove_tips_support_max() {
        let mut t = parse_newick("(((A:1,B:1)0.2:1,C:1)0.8:1,D:1,E:1);").unwrap();
        t.remove_tips(&["C"], false).unwrap();
        assert_eq!(t.to_newick().unwrap(), "((A:1,B:1)0.8:2,D:1,E:1);");
    }

    #[test]
    fn test_remove_tips_revert() {
        let mut t = parse_newick("((A:1,B:1):1,(C:1,D:1):1,E:1);").unwrap();
        t.remove_tips(&["A", "C", "E"], true).unwrap();
        t.validate().unwrap();
        let mut names = t.tip_names();
        names.sort();
        assert_eq!(names, vec!["A", "C", "E"]);
    }

    #[test]
    fn test_remove_tips_rooted_root_collapses() {
        let mut t = parse_newick("(A:1,(B:1,(C:1,D:1):1):1);").unwrap();
        t.remove_tips(&["A"], false).unwrap();
        t.validate().unwrap();
        assert_eq!(t.to_newick().unwrap(), "(B:1,(C:1,D:1):1);");
    }

    #[test]
    fn test_remove_tips_errors() {
        let mut t = parse_newick("(A,B,C);").unwrap();
        assert!(matches!(t.remove_tips(&["A", "A"], false), Err(TreeError::DuplicateTip(_))));
        assert!(matches!(t.remove_tips(&["Z"], false), Err(TreeError::TipNotFound(_))));
        assert!(matches!(t.remove_tips(&["A", "B"], false), Err(TreeError::TooFewTips(1))));
        // failed calls leave the tree untouched
        assert_eq!(t.to_newick().unwrap(), "(A,B,C);");
    }

    #[test]
    fn test_remove_tip_from_unrooted_root_keeps_unrooted() {
        let mut t = parse_newick("(A:1,(B:1,C:1):1,(D:1,E:1):2);").unwrap();
        t.remove_tips(&["A"], false).unwrap();
        t.validate().unwrap();
        assert!(!t.is_rooted());
        assert_eq!(t.num_tips(), 4);
        assert_eq!(t.sum_branch_lengths(), 7.0);
    }

    #[test]
    fn test_collapse_short_branches() {
        let mut t = parse_newick("((A:1,B:1):0.01,(C:1,D:1):0.5,(E:1,F:1):0.001);").unwrap();
        let n = t.collapse_short_branches(0.01, false, false);
        // root-adjacent edges are protected
        assert_eq!(n, 0);
        let n = t.collapse_short_branches(0.01, true, false);
        assert_eq!(n, 2);
        t.validate().unwrap();
        assert_eq!(t.to_newick().unwrap(), "(A:1,B:1,(C:1,D:1):0.5,E:1,F:1);");
    }

    #[test]
    fn test_collapse_nested_keeps_order() {
        let mut t = parse_newick("(X:1,((A:1,B:1):0.1,C:1):2,Y:1);").unwrap();
        assert_eq!(t.collapse_short_branches(0.5, false, false), 1);
        assert_eq!(t.to_newick().unwrap(), "(X:1,(A:1,B:1,C:1):2,Y:1);");
    }

    #[test]
    fn test_collapse_tips_sets_zero() {
        let mut t = parse_newick("(A:0.001,B:1,C:1);").unwrap();
        t.collapse_short_branches(0.01, false, true);
        assert_eq!(t.to_newick().unwrap(), "(A:0,B:1,C:1);");
    }

    #[test]
    fn test_collapse_low_support_and_depth() {
        let mut t = parse_newick("(X,((A,B)0.3,(C,D)0.9)0.7,Y);").unwrap();
        assert_eq!(t.collapse_low_support(0.5), 1);
        assert_eq!(t.to_newick().unwrap(), "(X,(A,B,(C,D)0.9)0.7,Y);");

        let mut t = parse_newick("(X,((A,B),(C,D)),Y);").unwrap();
        t.prepare_bipartitions().unwrap();
        assert_eq!(t.collapse_depth(2, 2).unwrap(), 2);
        assert_eq!(t.to_newick().unwrap(), "(X,(A,B,C,D),Y);");
    }

    #[test]
    fn test_unroot() {
        let mut t = parse_newick("((A:1,B:1)0.4:1,(C:1,D:1)0.9:2);").unwrap();
        t.unroot();
        t.validate().unwrap();
        assert!(!t.is_rooted());
        assert_eq!(t.to_newick().unwrap(), "((C:1,D:1)0.9:3,A:1,B:1);");
    }

    #[test]
    fn test_rename_and_shuffle() {
        let mut t = parse_newick("(A,B,(C,D));").unwrap();
        let map = [("A".to_string(), "Z".to_string())].into_iter().collect();
        assert_eq!(t.rename_tips(&map), 1);
        assert!(t.node_by_name("Z").is_some());

        let mut rng = StdRng::seed_from_u64(7);
        t.shuffle_tip_names(&mut rng);
        let mut names = t.tip_names();
        names.sort();
        assert_eq!(names, vec!["B", "C", "D", "Z"]);
    }
}
