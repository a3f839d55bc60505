//! Complement-aware hash index of bipartitions.
//!
//! A bipartition and its complement describe the same unrooted branch, so
//! both hash to the same bucket ([`Bitset::complement_hash`]) and compare
//! equal on lookup ([`Bitset::equal_or_complement`]). Each entry aggregates
//! how often the bipartition was seen and the lengths/supports it carried.
//!
//! An index is filled from one thread; once built it can be shared
//! read-only (`&BipartitionIndex` is `Sync`).

use std::collections::HashMap;

use crate::bitset::Bitset;
use crate::error::{Result, TreeError};
use crate::tree::Tree;

/// Aggregate occurrence data of one bipartition.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeIndexEntry {
    /// Bitset as first inserted (either side).
    pub bitset: Bitset,
    pub count: usize,
    pub length_sum: f64,
    pub length_count: usize,
    pub support_sum: f64,
    pub support_count: usize,
}

impl EdgeIndexEntry {
    /// Mean of the lengths that were known, `None` if none was.
    pub fn mean_length(&self) -> Option<f64> {
        (self.length_count > 0).then(|| self.length_sum / self.length_count as f64)
    }

    pub fn mean_support(&self) -> Option<f64> {
        (self.support_count > 0).then(|| self.support_sum / self.support_count as f64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BipartitionIndex {
    buckets: HashMap<u64, Vec<usize>>,
    entries: Vec<EdgeIndexEntry>,
}

impl BipartitionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, bitset: &Bitset) -> Option<usize> {
        self.buckets
            .get(&bitset.complement_hash())?
            .iter()
            .copied()
            .find(|&i| self.entries[i].bitset.equal_or_complement(bitset))
    }

    /// Counts one more occurrence of `bitset`, accumulating its length and
    /// support when known. Returns the updated occurrence count.
    pub fn add_edge_count(&mut self, bitset: &Bitset, length: Option<f64>, support: Option<f64>) -> usize {
        let i = match self.position(bitset) {
            Some(i) => i,
            None => {
                let i = self.entries.len();
                self.entries.push(EdgeIndexEntry {
                    bitset: bitset.clone(),
                    count: 0,
                    length_sum: 0.0,
                    length_count: 0,
                    support_sum: 0.0,
                    support_count: 0,
                });
                self.buckets.entry(bitset.complement_hash()).or_default().push(i);
                i
            }
        };
        let entry = &mut self.entries[i];
        entry.count += 1;
        if let Some(l) = length {
            entry.length_sum += l;
            entry.length_count += 1;
        }
        if let Some(s) = support {
            entry.support_sum += s;
            entry.support_count += 1;
        }
        entry.count
    }

    /// Feeds every edge of `tree` into the index.
    ///
    /// The two edges below the root of a rooted tree are one unrooted branch:
    /// they are counted once, with their lengths summed.
    pub fn add_tree(&mut self, tree: &Tree) -> Result<()> {
        if !tree.bitsets_ready() {
            return Err(TreeError::BitsetsNotBuilt);
        }
        let root = tree.root()?;
        let root_edges: Vec<_> = if tree.is_rooted() {
            tree.children(root).map(|(e, _)| e).collect()
        } else {
            Vec::new()
        };

        for e in tree.edges() {
            if root_edges.contains(&e) {
                continue;
            }
            let edge = tree.edge(e);
            self.add_edge_count(tree.edge_bitset(e)?, edge.length, edge.support);
        }

        if let [a, b] = root_edges[..] {
            let (ea, eb) = (tree.edge(a), tree.edge(b));
            let length = match (ea.length, eb.length) {
                (None, None) => None,
                (x, y) => Some(x.unwrap_or(0.0) + y.unwrap_or(0.0)),
            };
            let support = match (ea.support, eb.support) {
                (Some(x), Some(y)) => Some(x.max(y)),
                (x, y) => x.or(y),
            };
            self.add_edge_count(tree.edge_bitset(a)?, length, support);
        }
        Ok(())
    }

    /// Entry of `bitset` (or its complement).
    pub fn value(&self, bitset: &Bitset) -> Option<&EdgeIndexEntry> {
        self.position(bitset).map(|i| &self.entries[i])
    }

    pub fn contains(&self, bitset: &Bitset) -> bool {
        self.position(bitset).is_some()
    }

    /// Number of distinct bipartitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EdgeIndexEntry> {
        self.entries.iter()
    }
}
