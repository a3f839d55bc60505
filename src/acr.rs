//! Ancestral character reconstruction by parsimony.
//!
//! Costs follow the Sankoff formulation with unit cost per state change:
//! a bottom-up pass computes, for every node and state, the cheapest cost
//! of the subtree below; a top-down pass then assigns states.
//!
//! * `Deltran` keeps the parent's state whenever it is optimal, delaying
//!   changes towards the tips.
//! * `Acctran` prefers an optimal state different from the parent's,
//!   placing changes as close to the root as possible.
//! * `Downpass` keeps, for every node, every state used by at least one
//!   most parsimonious reconstruction.
//!
//! Tips missing from the state map are ambiguous: any state costs nothing.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::error::{Result, TreeError};
use crate::tree::{NodeId, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsimonyAlgorithm {
    Acctran,
    Deltran,
    Downpass,
}

/// Reconstructed states, as indices into `alphabet`.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// All states observed at the tips, sorted.
    pub alphabet: Vec<String>,
    /// Number of state changes of a most parsimonious reconstruction.
    pub cost: usize,
    states: HashMap<NodeId, Vec<usize>>,
}

impl Reconstruction {
    /// States assigned to `node` (one, except with `Downpass`).
    pub fn states(&self, node: NodeId) -> Vec<&str> {
        self.states
            .get(&node)
            .map(|s| s.iter().map(|&i| self.alphabet[i].as_str()).collect())
            .unwrap_or_default()
    }
}

const INF: f64 = f64::INFINITY;

/// Reconstructs ancestral states of every node from the tip states.
///
/// Fails with `TipNotFound` when `tip_states` names a tip absent from the
/// tree, and with `InvalidArgument` when no tip carries a state.
pub fn reconstruct(
    tree: &Tree,
    tip_states: &HashMap<String, String>,
    algorithm: ParsimonyAlgorithm,
) -> Result<Reconstruction> {
    let tips = tree.tips();
    for name in tip_states.keys() {
        if !tips.iter().any(|&t| &tree.node(t).name == name) {
            return Err(TreeError::TipNotFound(name.clone()));
        }
    }
    let alphabet: Vec<String> = tip_states.values().cloned().collect::<BTreeSet<_>>().into_iter().collect();
    if alphabet.is_empty() {
        return Err(TreeError::InvalidArgument("no tip state given".to_string()));
    }
    let k = alphabet.len();
    let position: HashMap<&str, usize> = alphabet.iter().enumerate().map(|(i, s)| (s.as_str(), i)).collect();

    // bottom-up costs
    let post = tree.postorder()?;
    let mut below: HashMap<NodeId, Vec<f64>> = HashMap::with_capacity(post.len());
    for &node in &post {
        let costs = if tree.node(node).is_tip() && node != tree.root()? {
            match tip_states.get(&tree.node(node).name) {
                Some(s) => (0..k).map(|i| if i == position[s.as_str()] { 0.0 } else { INF }).collect(),
                None => vec![0.0; k],
            }
        } else {
            let mut costs = vec![0.0; k];
            for (_, child) in tree.children(node) {
                let c = &below[&child];
                for (s, cost) in costs.iter_mut().enumerate() {
                    *cost += transition_min(c, s);
                }
            }
            costs
        };
        below.insert(node, costs);
    }

    let root = tree.root()?;
    let best = below[&root].iter().copied().fold(INF, f64::min);
    let mut states = HashMap::with_capacity(post.len());

    match algorithm {
        ParsimonyAlgorithm::Deltran | ParsimonyAlgorithm::Acctran => {
            let prefer_parent = algorithm == ParsimonyAlgorithm::Deltran;
            for &node in post.iter().rev() {
                let costs = &below[&node];
                let state = match tree.parent(node) {
                    None => argmin(costs.iter().copied()),
                    Some(p) => {
                        let ps: usize = states.get(&p).and_then(|v: &Vec<usize>| v.first().copied()).unwrap_or(0);
                        choose(costs, ps, prefer_parent)
                    }
                };
                states.insert(node, vec![state]);
            }
        }
        ParsimonyAlgorithm::Downpass => {
            // cost of the rest of the tree given the node's state
            let mut above: HashMap<NodeId, Vec<f64>> = HashMap::with_capacity(post.len());
            above.insert(root, vec![0.0; k]);
            for &node in post.iter().rev() {
                let up = above[&node].clone();
                let own = &below[&node];
                let total: Vec<f64> = (0..k).map(|s| own[s] + up[s]).collect();
                let set: Vec<usize> = (0..k).filter(|&s| total[s] <= best).collect();
                states.insert(node, set);
                for (_, child) in tree.children(node) {
                    let c = &below[&child];
                    let outside: Vec<f64> = (0..k).map(|t| own[t] - transition_min(c, t) + up[t]).collect();
                    above.insert(child, (0..k).map(|s| transition_min(&outside, s)).collect());
                }
            }
        }
    }

    debug!("parsimony reconstruction over {k} states, {best} changes");
    Ok(Reconstruction { alphabet, cost: best as usize, states })
}

/// `min_t cost[t] + [t != s]`.
fn transition_min(costs: &[f64], s: usize) -> f64 {
    costs
        .iter()
        .enumerate()
        .map(|(t, &c)| if t == s { c } else { c + 1.0 })
        .fold(INF, f64::min)
}

fn argmin(costs: impl Iterator<Item = f64>) -> usize {
    let mut best = (0, INF);
    for (i, c) in costs.enumerate() {
        if c < best.1 {
            best = (i, c);
        }
    }
    best.0
}

/// Optimal state of a node whose parent is in state `parent`.
fn choose(costs: &[f64], parent: usize, prefer_parent: bool) -> usize {
    let with_change = |t: usize| if t == parent { costs[t] } else { costs[t] + 1.0 };
    let best = (0..costs.len()).map(with_change).fold(INF, f64::min);
    let optimal: Vec<usize> = (0..costs.len()).filter(|&t| with_change(t) <= best).collect();
    if prefer_parent && optimal.contains(&parent) {
        return parent;
    }
    optimal.iter().copied().find(|&t| t != parent).or(optimal.first().copied()).unwrap_or(parent)
}

/// Writes the reconstructed states of internal nodes as their names
/// (ambiguous states joined by `|`).
pub fn annotate(tree: &mut Tree, reconstruction: &Reconstruction) -> Result<()> {
    for node in tree.nodes() {
        if tree.node(node).is_tip() {
            continue;
        }
        let name = reconstruction.states(node).join("|");
        tree.node_mut(node)?.name = name;
    }
    Ok(())
}
