//! Rerooting: on a node, on an outgroup, at the midpoint.

use std::collections::HashSet;

use log::debug;

use super::{EdgeId, NodeId, Tree};
use crate::bitset::Bitset;
use crate::error::{Result, TreeError};

impl Tree {
    /// True when `node` is reachable from the root.
    pub fn contains_node(&self, node: NodeId) -> bool {
        let Ok(root) = self.root() else { return false };
        if self.try_node(node).is_err() {
            return false;
        }
        let mut current = node;
        let mut steps = 0;
        while current != root {
            match self.parent(current) {
                Some(p) if steps < self.nodes.len() => {
                    current = p;
                    steps += 1;
                }
                _ => return false,
            }
        }
        true
    }

    /// Makes `node` the root.
    ///
    /// Only the edges on the path between the old and the new root change
    /// direction. Fails when `node` is not part of the tree.
    pub fn reroot(&mut self, node: NodeId) -> Result<()> {
        if !self.contains_node(node) {
            return Err(TreeError::NodeNotFound(node));
        }
        let mut path = Vec::new();
        let mut current = node;
        while let Some(e) = self.parent_edge(current) {
            path.push(e);
            current = self.edges[e].left;
        }
        for e in path {
            let edge = &mut self.edges[e];
            std::mem::swap(&mut edge.left, &mut edge.right);
        }
        self.root = Some(node);
        self.clear_bitsets();
        Ok(())
    }

    /// Inserts a new node on `edge`, `offset` away from its left end
    /// (half the length when `None`). Both halves keep the support.
    pub(crate) fn split_edge(&mut self, edge: EdgeId, offset: Option<f64>) -> Result<NodeId> {
        self.try_edge(edge)?;
        let (u, v) = (self.edges[edge].left, self.edges[edge].right);
        let length = self.edges[edge].length;
        let support = self.edges[edge].support;

        let mid = self.new_node("");
        let lower = self.edges.len();
        self.edges.push(super::Edge {
            id: lower,
            left: mid,
            right: v,
            length: None,
            support,
            comments: Vec::new(),
            bitset: None,
            alive: true,
        });
        if let Some(pos) = self.nodes[v].edges.iter().position(|&e| e == edge) {
            self.nodes[v].edges[pos] = lower;
            self.nodes[v].neighbors[pos] = mid;
        }
        if let Some(pos) = self.nodes[u].edges.iter().position(|&e| e == edge) {
            self.nodes[u].neighbors[pos] = mid;
        }
        self.edges[edge].right = mid;
        let m = &mut self.nodes[mid];
        m.neighbors.extend([u, v]);
        m.edges.extend([edge, lower]);

        if let Some(l) = length {
            let upper = offset.unwrap_or(l / 2.0).clamp(0.0, l);
            self.edges[edge].length = Some(upper);
            self.edges[lower].length = Some(l - upper);
        }
        self.clear_bitsets();
        Ok(mid)
    }

    /// Roots the tree on the branch separating `outgroup` from the other tips.
    ///
    /// A rooted tree is unrooted first. The new root sits in the middle of
    /// that branch. Fails on unknown tips or when the outgroup does not form
    /// one side of a branch.
    pub fn reroot_outgroup<S: AsRef<str>>(&mut self, outgroup: &[S]) -> Result<()> {
        let mut seen = HashSet::new();
        for name in outgroup {
            if !seen.insert(name.as_ref()) {
                return Err(TreeError::DuplicateTip(name.as_ref().to_string()));
            }
        }
        if outgroup.is_empty() {
            return Err(TreeError::InvalidArgument("empty outgroup".to_string()));
        }

        self.unroot();
        self.prepare_bipartitions()?;
        let len = self.tip_index()?.len();
        let mut wanted = Bitset::zeros(len);
        for name in outgroup {
            wanted.set(self.tip_bit(name.as_ref())?);
        }
        if wanted.count_ones() == len {
            return Err(TreeError::OutgroupNotMonophyletic);
        }

        let mut target = None;
        for e in self.edges() {
            if self.edge_bitset(e)?.equal_or_complement(&wanted) {
                target = Some(e);
                break;
            }
        }
        let edge = target.ok_or(TreeError::OutgroupNotMonophyletic)?;
        let root = self.split_edge(edge, None)?;
        debug!("outgroup of {} tips rooted on edge {edge}", outgroup.len());
        self.reroot(root)
    }

    /// Distance (sum of lengths, missing ones count 0) from `from` to every
    /// node, with the edge used to reach it.
    fn distances_from(&self, from: NodeId) -> (Vec<f64>, Vec<Option<EdgeId>>) {
        let mut dist = vec![f64::NAN; self.nodes.len()];
        let mut via = vec![None; self.nodes.len()];
        dist[from] = 0.0;
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            let n = &self.nodes[node];
            for (&e, &nb) in n.edges.iter().zip(&n.neighbors) {
                if via[node] == Some(e) {
                    continue;
                }
                dist[nb] = dist[node] + self.edges[e].length.unwrap_or(0.0);
                via[nb] = Some(e);
                stack.push(nb);
            }
        }
        (dist, via)
    }

    fn farthest_tip(&self, dist: &[f64]) -> Option<NodeId> {
        self.tips()
            .into_iter()
            .filter(|&t| !dist[t].is_nan())
            .max_by(|&a, &b| dist[a].total_cmp(&dist[b]))
    }

    /// Roots the tree in the middle of its longest tip-to-tip path.
    ///
    /// Fails with fewer than two tips, or when no branch has a positive
    /// length.
    pub fn reroot_midpoint(&mut self) -> Result<()> {
        let tips = self.tips();
        if tips.len() < 2 {
            return Err(TreeError::TooFewTips(tips.len()));
        }
        if !self.edges().iter().any(|&e| self.edges[e].length.is_some_and(|l| l > 0.0)) {
            return Err(TreeError::InvalidArgument("midpoint rooting needs branch lengths".to_string()));
        }
        self.unroot();
        let (d0, _) = self.distances_from(tips[0]);
        let a = self.farthest_tip(&d0).ok_or(TreeError::TooFewTips(0))?;
        let (da, via) = self.distances_from(a);
        let b = self.farthest_tip(&da).ok_or(TreeError::TooFewTips(1))?;
        let half = da[b] / 2.0;

        // walk back from b towards a until the half distance is crossed
        let mut node = b;
        let edge = loop {
            let e = via[node].ok_or(TreeError::Inconsistent("broken midpoint path".into()))?;
            let prev = self.edges[e].other_end(node);
            if da[prev] <= half {
                break e;
            }
            node = prev;
        };
        let prev = self.edges[edge].other_end(node);
        let from_prev = half - da[prev];
        // split_edge measures from the left end
        let offset = if self.edges[edge].left == prev {
            from_prev
        } else {
            self.edges[edge].length.unwrap_or(0.0) - from_prev
        };
        let root = self.split_edge(edge, Some(offset))?;
        debug!("midpoint root placed at {half} on a path of length {}", da[b]);
        self.reroot(root)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TreeError;
    use crate::tree::parse_newick;

    #[test]
    fn test_reroot_flips_path_only() {
        let mut t = parse_newick("((A:1,B:1)x:1,(C:1,D:1)y:1,E:1)r;").unwrap();
        let y = t.node_by_name("y").unwrap();
        t.reroot(y).unwrap();
        t.validate().unwrap();
        assert_eq!(t.root().unwrap(), y);
        assert_eq!(t.to_newick().unwrap(), "(((A:1,B:1)x:1,E:1)r:1,C:1,D:1)y;");
    }

    #[test]
    fn test_reroot_unknown_node() {
        let mut t = parse_newick("(A,B,C);").unwrap();
        assert!(matches!(t.reroot(99), Err(TreeError::NodeNotFound(99))));
        let lonely = t.new_node("lonely");
        assert!(matches!(t.reroot(lonely), Err(TreeError::NodeNotFound(_))));
    }

    #[test]
    fn test_reroot_keeps_bipartitions() {
        let mut t = parse_newick("((A,B),(C,D),(E,F));").unwrap();
        t.prepare_bipartitions().unwrap();
        let before: Vec<_> = t.internal_edges().iter().map(|&e| t.edge_bitset(e).unwrap().canonical()).collect();
        let c = t.node_by_name("C").unwrap();
        let p = t.parent(c).unwrap();
        t.reroot(p).unwrap();
        assert!(matches!(t.edge_bitset(0), Err(TreeError::BitsetsNotBuilt)));
        t.update_bitsets().unwrap();
        let after: Vec<_> = t.edges().iter().map(|&e| t.edge_bitset(e).unwrap().canonical()).collect();
        for bs in before {
            assert!(after.contains(&bs));
        }
    }

    #[test]
    fn test_reroot_outgroup() {
        let mut t = parse_newick("((A:1,B:1):2,(C:1,D:1):1,E:1);").unwrap();
        t.reroot_outgroup(&["C", "D"]).unwrap();
        t.validate().unwrap();
        assert!(t.is_rooted());
        assert_eq!(t.to_newick().unwrap(), "(((A:1,B:1):2,E:1):0.5,(C:1,D:1):0.5);");
    }

    #[test]
    fn test_reroot_outgroup_complement_side() {
        let mut t = parse_newick("((A:1,B:1):2,(C:1,D:1):1,E:1);").unwrap();
        t.reroot_outgroup(&["A", "B", "E"]).unwrap();
        assert!(t.is_rooted());
        t.prepare_bipartitions().unwrap();
        let root = t.root().unwrap();
        let mut sides: Vec<usize> = t.children(root).map(|(e, _)| t.edge_bitset(e).unwrap().count_ones()).collect();
        sides.sort();
        assert_eq!(sides, vec![2, 3]);
    }

    #[test]
    fn test_reroot_outgroup_not_monophyletic() {
        let mut t = parse_newick("((A,B),(C,D),E);").unwrap();
        assert!(matches!(t.reroot_outgroup(&["A", "C"]), Err(TreeError::OutgroupNotMonophyletic)));
        assert!(matches!(t.reroot_outgroup(&["Q"]), Err(TreeError::TipNotFound(_))));
    }

    #[test]
    fn test_reroot_midpoint() {
        let mut t = parse_newick("(A:1,B:1,(C:1,D:7):1);").unwrap();
        t.reroot_midpoint().unwrap();
        t.validate().unwrap();
        assert!(t.is_rooted());
        // longest path A..D = 9, root 4.5 away from both ends, on D's branch
        let root = t.root().unwrap();
        let d = t.node_by_name("D").unwrap();
        let e = t.parent_edge(d).unwrap();
        assert_eq!(t.edge(e).left(), root);
        assert_eq!(t.edge(e).length, Some(4.5));
    }

    #[test]
    fn test_reroot_midpoint_without_lengths() {
        let mut t = parse_newick("((A,B),(C,D),E);").unwrap();
        let before = t.to_newick().unwrap();
        assert!(matches!(t.reroot_midpoint(), Err(TreeError::InvalidArgument(_))));
        assert_eq!(t.to_newick().unwrap(), before);

        let mut zeros = parse_newick("((A:0,B:0):0,(C:0,D:0):0,E:0);").unwrap();
        assert!(matches!(zeros.reroot_midpoint(), Err(TreeError::InvalidArgument(_))));

        let mut rooted = parse_newick("((A,B),(C,D));").unwrap();
        assert!(matches!(rooted.reroot_midpoint(), Err(TreeError::InvalidArgument(_))));
        assert!(rooted.is_rooted());
    }
}
