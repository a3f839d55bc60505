//! Comparison of a reference tree against other trees.
//!
//! [`compare_trees`] summarises whole trees by their shared and specific
//! bipartitions; [`compare_edges`] describes every reference edge against
//! one other tree, including its transfer distance.

use log::{debug, warn};
use rayon::prelude::*;

use crate::distances::rf_from_snapshots;
use crate::error::{Result, TreeError};
use crate::snapshot::TreeSnapshot;
use crate::stream::{TreeStream, first_error};
use crate::transfer::TransferContext;
use crate::tree::{EdgeId, Tree};

/// Bipartition counts of one compared tree against the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeComparison {
    /// Sequence id of the compared tree in its stream.
    pub id: usize,
    pub common: usize,
    pub reference_specific: usize,
    pub compared_specific: usize,
    pub rf: usize,
}

/// One reference edge looked up in another tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeComparison {
    pub edge: EdgeId,
    pub depth: usize,
    pub found: bool,
    pub transfer: usize,
}

fn compare_snapshots(id: usize, reference: &TreeSnapshot, other: &TreeSnapshot) -> Result<TreeComparison> {
    reference.check_comparable(other)?;
    let common = reference.parts.intersection(&other.parts).count();
    Ok(TreeComparison {
        id,
        common,
        reference_specific: reference.parts.len() - common,
        compared_specific: other.parts.len() - common,
        rf: rf_from_snapshots(reference, other),
    })
}

/// Compares every tree of `stream` to `reference`, in stream order.
///
/// The whole stream is read even when an entry fails; the error of the
/// lowest sequence id is returned after that.
pub fn compare_trees(reference: &mut Tree, stream: TreeStream) -> Result<Vec<TreeComparison>> {
    let reference = match TreeSnapshot::from_tree_mut(reference) {
        Ok(s) => s,
        Err(e) => {
            stream.into_iter().for_each(drop);
            return Err(e);
        }
    };
    let mut comparisons = Vec::new();
    let mut errors = Vec::new();
    for entry in stream {
        let id = entry.id;
        let result = entry
            .tree
            .and_then(|mut tree| TreeSnapshot::from_tree_mut(&mut tree))
            .and_then(|snap| compare_snapshots(id, &reference, &snap));
        match result {
            Ok(c) => {
                debug!("tree {id}: {} common, rf {}", c.common, c.rf);
                comparisons.push(c);
            }
            Err(e) => {
                warn!("skipping tree {id}: {e}");
                errors.push(e.in_stream(id));
            }
        }
    }
    if let Some(e) = first_error(errors) {
        return Err(e);
    }
    if comparisons.is_empty() {
        return Err(TreeError::EmptyStream);
    }
    Ok(comparisons)
}

/// Describes every edge of `reference` in `other`: whether its bipartition
/// exists there, and its transfer distance.
pub fn compare_edges(reference: &mut Tree, other: &mut Tree) -> Result<Vec<EdgeComparison>> {
    reference.prepare_bipartitions()?;
    other.prepare_bipartitions()?;
    let reference: &Tree = reference;
    let ctx = TransferContext::new(other)?;
    ctx.check_compatible(reference)?;

    let edges = reference.edges();
    edges
        .par_iter()
        .map_init(
            || ctx.scratch(),
            |scratch, &e| -> Result<EdgeComparison> {
                let split = reference.edge_bitset(e)?;
                Ok(EdgeComparison {
                    edge: e,
                    depth: reference.topo_depth(e)?,
                    found: ctx.contains(split),
                    transfer: ctx.transfer_distance(split, scratch)?,
                })
            },
        )
        .collect()
}
