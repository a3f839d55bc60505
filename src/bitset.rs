//! Compact bitset representation for tip sets in phylogenetic trees.
//!
//! # Overview
//! A bitset is an efficient way to represent which tips lie on one side of a
//! branch. Each bit position corresponds to a tip index, and tip indices are
//! assigned by sorted tip name so that trees parsed independently over the
//! same taxa produce directly comparable bitsets.
//!
//! # Example
//! For a tree with tips [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - Side {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Side {B, D} → bitset `0b1010`, the complement: the same bipartition
//!   seen from the other end of the branch.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A fixed-width bitset over the tip universe of a tree.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily large trees.
/// Each u64 word holds 64 tip indices. The width (`len`) is fixed when the
/// bitset is created and is needed to take complements: bits past `len` are
/// always zero.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    /// Creates a new bitset of `len` bits, all set to 0.
    ///
    /// # Example
    /// ```
    /// # use rust_python_tree_toolkit::bitset::Bitset;
    /// // For a tree with 100 tips, 2 words (128 bits) are allocated
    /// let bs = Bitset::zeros(100);
    /// assert_eq!(bs.words().len(), 2);
    /// assert_eq!(bs.len(), 100);
    /// ```
    pub fn zeros(len: usize) -> Self {
        Bitset { words: vec![0u64; len.div_ceil(64)], len }
    }

    /// Creates a bitset of `len` bits with the given indices set.
    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut bs = Bitset::zeros(len);
        for idx in indices {
            bs.set(idx);
        }
        bs
    }

    /// Width of the bitset in bits (the number of tips of the universe).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the universe is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw words, least significant bit first.
    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Sets the bit at the given index to 1.
    ///
    /// Marks a tip as present on this side.
    ///
    /// # Example
    /// ```
    /// # use rust_python_tree_toolkit::bitset::Bitset;
    /// let mut bs = Bitset::zeros(8);
    /// bs.set(0);  // Mark tip 0 as present
    /// bs.set(5);  // Mark tip 5 as present
    /// assert_eq!(bs.words()[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        let word = idx >> 6;     // Equivalent to idx / 64
        let bit = idx & 63;      // Equivalent to idx % 64
        self.words[word] |= 1u64 << bit;
    }

    /// Sets the bit at the given index to 0.
    #[inline]
    pub fn unset(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        self.words[idx >> 6] &= !(1u64 << (idx & 63));
    }

    /// Whether the tip with index `idx` is on this side.
    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        idx < self.len && (self.words[idx >> 6] >> (idx & 63)) & 1 == 1
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// Merges two tip sets: `self` becomes `self ∪ other`
    ///
    /// # Example
    /// ```
    /// # use rust_python_tree_toolkit::bitset::Bitset;
    /// let mut left = Bitset::zeros(4);
    /// left.set(0);   // {0}
    ///
    /// let mut right = Bitset::zeros(4);
    /// right.set(1);  // {1}
    ///
    /// left.or_assign(&right);  // {0} ∪ {1} = {0, 1}
    /// assert_eq!(left.words()[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }

    /// Counts the number of set bits (population count).
    ///
    /// Returns how many tips are on this side.
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of tips present in both `self` and `other`.
    #[inline]
    pub fn intersection_count(&self, other: &Bitset) -> usize {
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// True when every tip of `self` is also in `other`.
    pub fn is_subset_of(&self, other: &Bitset) -> bool {
        self.words.iter().zip(&other.words).all(|(a, b)| a & !b == 0)
    }

    /// Mask of the valid bits of word `i`.
    #[inline]
    fn word_mask(&self, i: usize) -> u64 {
        let last = self.words.len() - 1;
        let rem = self.len & 63;
        if i == last && rem != 0 { (1u64 << rem) - 1 } else { u64::MAX }
    }

    /// The other side of the bipartition.
    ///
    /// Flips all bits up to `len`, keeping the remaining bits as 0.
    ///
    /// # Example
    /// ```
    /// # use rust_python_tree_toolkit::bitset::Bitset;
    /// let bs = Bitset::from_indices(4, [0, 1]);
    /// assert_eq!(bs.complement().words()[0], 0b1100);
    /// ```
    pub fn complement(&self) -> Bitset {
        let words = self
            .words
            .iter()
            .enumerate()
            .map(|(i, w)| !w & self.word_mask(i))
            .collect();
        Bitset { words, len: self.len }
    }

    /// Bipartition equality: the two sets are equal, or one is the
    /// complement of the other.
    ///
    /// A branch splits the tips into two sides and which side is "right"
    /// depends on the rooting, so both cases describe the same branch.
    pub fn equal_or_complement(&self, other: &Bitset) -> bool {
        if self.len != other.len {
            return false;
        }
        if self.words == other.words {
            return true;
        }
        self.words
            .iter()
            .zip(&other.words)
            .enumerate()
            .all(|(i, (a, b))| a ^ b == self.word_mask(i))
    }

    /// Hash that is identical for a bitset and its complement.
    ///
    /// The set is hashed in its canonical orientation: the side that does NOT
    /// contain tip 0. No allocation takes place.
    pub fn complement_hash(&self) -> u64 {
        let flip = self.contains(0);
        let mut hasher = DefaultHasher::new();
        self.len.hash(&mut hasher);
        for (i, w) in self.words.iter().enumerate() {
            let canonical = if flip { !w & self.word_mask(i) } else { *w };
            canonical.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// The canonical orientation of this bipartition (side without tip 0).
    pub fn canonical(&self) -> Bitset {
        if self.contains(0) { self.complement() } else { self.clone() }
    }

    /// Indices of the set bits in increasing order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            let mut word = w;
            std::iter::from_fn(move || {
                if word == 0 {
                    return None;
                }
                let bit = word.trailing_zeros() as usize;
                word &= word - 1;
                Some((i << 6) + bit)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = Bitset::zeros(4);
        bs.set(0);
        bs.set(2);
        assert_eq!(bs.words()[0], 0b0101);
        assert!(bs.contains(2));
        bs.unset(2);
        assert!(!bs.contains(2));
    }

    #[test]
    fn test_bitset_or() {
        let mut bs1 = Bitset::from_indices(4, [0, 1]);
        let bs2 = Bitset::from_indices(4, [2, 3]);
        bs1.or_assign(&bs2);
        assert_eq!(bs1.words()[0], 0b1111);
    }

    /// Visual example: How bitsets represent a small tree
    ///
    /// ```text
    ///           root
    ///          /    \
    ///        node1   D
    ///        /   \
    ///       A    node2
    ///            /   \
    ///           B     C
    /// ```
    ///
    /// Tip mapping: A=0, B=1, C=2, D=3
    ///
    /// - node2: {B, C} → `0b0110`, complement {A, D} → `0b1001`
    /// - node1: {A, B, C} → `0b0111`, complement {D} → `0b1000`
    #[test]
    fn test_mini_tree_example() {
        let node2 = Bitset::from_indices(4, [1, 2]);
        assert_eq!(node2.complement().words()[0], 0b1001);

        let mut node1 = Bitset::from_indices(4, [0]);
        node1.or_assign(&node2);
        assert_eq!(node1.words()[0], 0b0111);
        assert_eq!(node1.complement().words()[0], 0b1000);
        assert!(node2.is_subset_of(&node1));
        assert!(!node1.is_subset_of(&node2));
        assert_eq!(node1.intersection_count(&node2), 2);
    }

    #[test]
    fn test_large_tree() {
        // More than 64 tips (multiple words)
        let bs = Bitset::from_indices(130, [0, 63, 64, 129]);
        assert_eq!(bs.count_ones(), 4);
        assert_eq!(bs.words()[0], 1u64 | (1u64 << 63));
        assert_eq!(bs.words()[1], 1u64);
        let comp = bs.complement();
        assert_eq!(comp.count_ones(), 126);
        // padding bits of the last word stay clear
        assert_eq!(comp.words()[2] >> 2, 0);
        assert_eq!(bs.iter_ones().collect::<Vec<_>>(), vec![0, 63, 64, 129]);
    }

    #[test]
    fn test_canonical_drops_tip_zero() {
        let ab = Bitset::from_indices(4, [0, 1]);
        let cd = Bitset::from_indices(4, [2, 3]);
        assert_eq!(ab.canonical(), cd);
        assert_eq!(cd.canonical(), cd);
        assert_eq!(ab.complement_hash(), cd.complement_hash());
    }

    #[test]
    fn test_different_width_not_equal() {
        let a = Bitset::from_indices(4, [1]);
        let b = Bitset::from_indices(5, [1]);
        assert!(!a.equal_or_complement(&b));
    }

    proptest! {
        #[test]
        fn prop_complement_is_same_bipartition(len in 1usize..200, seed in proptest::collection::vec(any::<usize>(), 0..50)) {
            let bs = Bitset::from_indices(len, seed.into_iter().map(|i| i % len));
            let comp = bs.complement();
            prop_assert!(bs.equal_or_complement(&comp));
            prop_assert!(comp.equal_or_complement(&bs));
            prop_assert_eq!(bs.complement_hash(), comp.complement_hash());
            prop_assert_eq!(bs.count_ones() + comp.count_ones(), len);
            prop_assert_eq!(comp.complement(), bs);
        }
    }
}
