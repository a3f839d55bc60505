//! Branch supports from a stream of bootstrap trees.
//!
//! # Scheduling
//! Bootstrap trees are pulled from the stream by a rayon pool
//! (`par_bridge`). For one bootstrap tree, the reference branches are then
//! split across the same pool, all sharing the tree's read-only
//! [`TransferContext`]; each worker owns its scratch buffer.
//!
//! # Accumulation
//! A bootstrap tree contributes one integer per reference branch (transfer
//! distance, or 0/1 presence). Contributions are summed in atomic counters,
//! and only once the whole tree was processed without error, so the result
//! does not depend on the order in which trees complete.
//!
//! # Failures and cancellation
//! A failing bootstrap tree is skipped and its error remembered; the stream
//! is always read to its end, then the error of the lowest sequence id is
//! returned and the reference tree keeps its former supports.
//! Cancellation is checked before each bootstrap tree: the remaining trees
//! are drained without work and supports are computed from what was
//! accumulated.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::bitset::Bitset;
use crate::error::{Result, TreeError};
use crate::stream::{DEFAULT_QUEUE_SIZE, TreeStream, first_error};
use crate::transfer::{TransferContext, normalized_support};
use crate::tree::{EdgeId, Tree};

/// Support computation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportConfig {
    /// Worker threads; 0 uses rayon's global pool.
    pub threads: usize,
    /// Capacity of the bootstrap tree queue, for stream producers.
    pub queue_size: usize,
    /// Also record which taxa had to move (transfer support only).
    pub transfer_details: bool,
}

impl Default for SupportConfig {
    fn default() -> Self {
        SupportConfig { threads: 0, queue_size: DEFAULT_QUEUE_SIZE, transfer_details: false }
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportMethod {
    /// Transfer bootstrap expectation.
    Transfer,
    /// Classical bootstrap proportion.
    Felsenstein,
}

/// Support of one reference branch.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSupport {
    pub edge: EdgeId,
    pub depth: usize,
    /// `None` when no bootstrap tree was processed.
    pub support: Option<f64>,
    /// Mean transfer distance, for transfer support.
    pub mean_distance: Option<f64>,
}

/// How often a taxon had to move to recover reference branches.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonTransfer {
    pub name: String,
    /// Percentage of (branch, bootstrap tree) pairs in which the taxon moved.
    pub index: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupportReport {
    /// Bootstrap trees that contributed.
    pub replicates: usize,
    pub cancelled: bool,
    pub edges: Vec<EdgeSupport>,
    pub taxa: Option<Vec<TaxonTransfer>>,
}

/// Reference branch with at least two tips on each side.
#[derive(Debug)]
struct Branch {
    edge: EdgeId,
    /// Other root edge of a rooted reference, carrying the same split.
    twin: Option<EdgeId>,
    split: Bitset,
    depth: usize,
}

struct Contribution {
    values: Vec<u64>,
    moved: Vec<usize>,
}

struct Accumulator {
    replicates: AtomicU64,
    sums: Vec<AtomicU64>,
    moves: Vec<AtomicU64>,
}

impl Accumulator {
    fn new(branches: usize, tips: usize) -> Self {
        Accumulator {
            replicates: AtomicU64::new(0),
            sums: (0..branches).map(|_| AtomicU64::new(0)).collect(),
            moves: (0..tips).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn commit(&self, contribution: &Contribution) {
        for (sum, &v) in self.sums.iter().zip(&contribution.values) {
            sum.fetch_add(v, Ordering::Relaxed);
        }
        for &tip in &contribution.moved {
            self.moves[tip].fetch_add(1, Ordering::Relaxed);
        }
        self.replicates.fetch_add(1, Ordering::Relaxed);
    }
}

fn branches(reference: &mut Tree) -> Result<Vec<Branch>> {
    reference.prepare_bipartitions()?;
    let root_edges: Vec<EdgeId> = if reference.is_rooted() {
        reference.children(reference.root()?).map(|(e, _)| e).collect()
    } else {
        Vec::new()
    };
    let mut branches = Vec::new();
    for e in reference.edges() {
        let twin = match root_edges[..] {
            [a, b] if e == a => Some(b),
            [_, b] if e == b => continue,
            _ => None,
        };
        let depth = reference.topo_depth(e)?;
        if depth >= 2 {
            branches.push(Branch { edge: e, twin, split: reference.edge_bitset(e)?.clone(), depth });
        }
    }
    Ok(branches)
}

/// Contribution of one bootstrap tree.
fn replicate(
    reference: &Tree,
    branches: &[Branch],
    tree: &mut Tree,
    method: SupportMethod,
    details: bool,
) -> Result<Contribution> {
    tree.prepare_bipartitions()?;
    let ctx = TransferContext::new(tree)?;
    ctx.check_compatible(reference)?;

    match method {
        SupportMethod::Felsenstein => Ok(Contribution {
            values: branches.par_iter().map(|b| u64::from(ctx.contains(&b.split))).collect(),
            moved: Vec::new(),
        }),
        SupportMethod::Transfer => {
            let per_branch: Vec<(u64, Vec<usize>)> = branches
                .par_iter()
                .map_init(
                    || ctx.scratch(),
                    |scratch, b| -> Result<(u64, Vec<usize>)> {
                        if !details {
                            return Ok((ctx.transfer_distance(&b.split, scratch)? as u64, Vec::new()));
                        }
                        if ctx.contains(&b.split) {
                            return Ok((0, Vec::new()));
                        }
                        let (d, edge) = ctx.min_transfer(&b.split, true, scratch)?;
                        Ok((d as u64, ctx.transfer_moves(&b.split, edge)?))
                    },
                )
                .collect::<Result<_>>()?;
            let mut values = Vec::with_capacity(per_branch.len());
            let mut moved = Vec::new();
            for (d, tips) in per_branch {
                values.push(d);
                moved.extend(tips);
            }
            Ok(Contribution { values, moved })
        }
    }
}

/// Computes supports of the reference branches from a stream of bootstrap
/// trees and stores them on the reference edges.
pub fn compute_support(
    reference: &mut Tree,
    stream: TreeStream,
    method: SupportMethod,
    config: &SupportConfig,
    cancel: &CancelToken,
) -> Result<SupportReport> {
    let pool = match config.threads {
        0 => None,
        n => match ThreadPoolBuilder::new().num_threads(n).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                stream.into_iter().for_each(drop);
                return Err(TreeError::InvalidArgument(format!("cannot start {n} worker threads: {e}")));
            }
        },
    };
    let branches = match branches(reference) {
        Ok(b) => b,
        Err(e) => {
            stream.into_iter().for_each(drop);
            return Err(e);
        }
    };
    let details = config.transfer_details && method == SupportMethod::Transfer;
    let tips = reference.tip_index()?.len();
    let accumulator = Accumulator::new(branches.len(), tips);
    let errors = Mutex::new(Vec::new());

    let view: &Tree = reference;
    let run = || {
        stream.into_iter().par_bridge().for_each(|entry| {
            if cancel.is_cancelled() {
                return;
            }
            let id = entry.id;
            match entry.tree.and_then(|mut tree| replicate(view, &branches, &mut tree, method, details)) {
                Ok(contribution) => {
                    accumulator.commit(&contribution);
                    debug!("bootstrap tree {id} done");
                }
                Err(e) => {
                    warn!("skipping bootstrap tree {id}: {e}");
                    errors.lock().unwrap_or_else(PoisonError::into_inner).push(e.in_stream(id));
                }
            }
        })
    };
    match &pool {
        Some(pool) => pool.install(run),
        None => run(),
    }

    let errors = errors.into_inner().unwrap_or_else(PoisonError::into_inner);
    if let Some(e) = first_error(errors) {
        return Err(e);
    }
    let cancelled = cancel.is_cancelled();
    let replicates = accumulator.replicates.load(Ordering::Relaxed) as usize;
    if replicates == 0 && !cancelled {
        return Err(TreeError::EmptyStream);
    }

    let mut edges = Vec::with_capacity(branches.len());
    for (b, sum) in branches.iter().zip(&accumulator.sums) {
        let sum = sum.load(Ordering::Relaxed) as f64;
        let (support, mean_distance) = match (replicates, method) {
            (0, _) => (None, None),
            (r, SupportMethod::Transfer) => {
                let avg = sum / r as f64;
                (Some(normalized_support(avg, b.depth)), Some(avg))
            }
            (r, SupportMethod::Felsenstein) => (Some(sum / r as f64), None),
        };
        if let Some(s) = support {
            for e in std::iter::once(b.edge).chain(b.twin) {
                reference.edge_mut(e)?.support = Some(s);
            }
        }
        edges.push(EdgeSupport { edge: b.edge, depth: b.depth, support, mean_distance });
    }

    let taxa = if details {
        let pairs = (replicates * branches.len()).max(1) as f64;
        let names = reference.tip_index()?.names();
        Some(
            names
                .iter()
                .zip(&accumulator.moves)
                .map(|(name, m)| TaxonTransfer {
                    name: name.clone(),
                    index: 100.0 * m.load(Ordering::Relaxed) as f64 / pairs,
                })
                .collect(),
        )
    } else {
        None
    };

    info!("{} supports from {replicates} bootstrap trees{}", edges.len(), if cancelled { " (cancelled)" } else { "" });
    Ok(SupportReport { replicates, cancelled, edges, taxa })
}

/// Transfer bootstrap expectation of every reference branch.
pub fn transfer_support(
    reference: &mut Tree,
    stream: TreeStream,
    config: &SupportConfig,
    cancel: &CancelToken,
) -> Result<SupportReport> {
    compute_support(reference, stream, SupportMethod::Transfer, config, cancel)
}

/// Felsenstein bootstrap proportion of every reference branch.
pub fn felsenstein_support(
    reference: &mut Tree,
    stream: TreeStream,
    config: &SupportConfig,
    cancel: &CancelToken,
) -> Result<SupportReport> {
    compute_support(reference, stream, SupportMethod::Felsenstein, config, cancel)
}
