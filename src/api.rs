//! Python binding layer.
//!
//! Trees cross the boundary as Newick strings; errors become `ValueError`
//! (or `OSError` for file errors).

use pyo3::exceptions::{PyOSError, PyValueError};
use pyo3::prelude::*;

use crate::consensus::ConsensusConfig;
use crate::distances::{Metric, build_snapshots, pairwise_matrix};
use crate::error::TreeError;
use crate::io::stream_file;
use crate::stream::{DEFAULT_QUEUE_SIZE, collect_stream, stream_newick};
use crate::support::{CancelToken, SupportConfig, SupportMethod, compute_support};
use crate::tree::{Tree, parse_newick};

fn to_py(e: TreeError) -> PyErr {
    match e {
        TreeError::Io(e) => PyOSError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

/// Compute branch supports of a reference tree.
///
/// Args:
///     reference: Newick string of the reference tree
///     bootstrap: Newick strings of the bootstrap trees
///     method: "tbe" (transfer bootstrap expectation) or "fbp" (default: "tbe")
///     threads: Worker threads, 0 for one per core (default: 0)
///
/// Returns:
///     The reference tree, in Newick, with supports on its internal branches
///
/// Raises:
///     ValueError: On unparsable trees or trees over other taxa
#[pyfunction]
#[pyo3(signature = (reference, bootstrap, method="tbe", threads=0))]
fn transfer_support(reference: &str, bootstrap: Vec<String>, method: &str, threads: usize) -> PyResult<String> {
    let method = match method {
        "tbe" => SupportMethod::Transfer,
        "fbp" => SupportMethod::Felsenstein,
        other => return Err(PyValueError::new_err(format!("unknown support method '{other}'"))),
    };
    let mut tree = parse_newick(reference).map_err(to_py)?;
    let stream = stream_newick(bootstrap.join("\n"), DEFAULT_QUEUE_SIZE);
    let config = SupportConfig { threads, ..SupportConfig::default() };
    compute_support(&mut tree, stream, method, &config, &CancelToken::new()).map_err(to_py)?;
    tree.to_newick().map_err(to_py)
}

/// Consensus of a list of Newick trees.
///
/// Args:
///     trees: Newick strings over one set of taxa
///     cutoff: Minimum bipartition frequency in [0.5, 1] (default: 0.5)
///
/// Returns:
///     The consensus tree in Newick, supports being bipartition frequencies
#[pyfunction]
#[pyo3(signature = (trees, cutoff=0.5))]
fn consensus(trees: Vec<String>, cutoff: f64) -> PyResult<String> {
    let stream = stream_newick(trees.join("\n"), DEFAULT_QUEUE_SIZE);
    let tree = crate::consensus::consensus(stream, ConsensusConfig { cutoff }).map_err(to_py)?;
    tree.to_newick().map_err(to_py)
}

/// Compute pairwise distances between all trees of several tree files.
///
/// Args:
///     paths: Newick or NEXUS tree files (optionally gzipped)
///     metric: "rf", "weighted" or "kf" (default: "rf")
///
/// Returns:
///     A tuple of (tree_names, distance_matrix) where tree names are
///     `file{i}_tree_{j}`
///
/// Raises:
///     ValueError: If no trees are found or trees have different leaf sets
#[pyfunction]
#[pyo3(signature = (paths, metric="rf"))]
fn pairwise_rf(paths: Vec<String>, metric: &str) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    let metric = match metric {
        "rf" => Metric::Rf,
        "weighted" => Metric::Weighted,
        "kf" => Metric::Kf,
        other => return Err(PyValueError::new_err(format!("unknown metric '{other}'"))),
    };

    let mut names = Vec::new();
    let mut trees: Vec<Tree> = Vec::new();
    for (file_idx, path) in paths.iter().enumerate() {
        let (entries, errors) = collect_stream(stream_file(path, DEFAULT_QUEUE_SIZE).map_err(to_py)?);
        if let Some(e) = errors.into_iter().next() {
            return Err(PyValueError::new_err(format!("{path}: {e}")));
        }
        for (id, tree) in entries {
            names.push(format!("file{file_idx}_tree_{id}"));
            trees.push(tree);
        }
    }
    if trees.len() < 2 {
        return Err(PyValueError::new_err("Need at least 2 trees to compute pairwise distances"));
    }

    let snapshots = build_snapshots(&mut trees).map_err(to_py)?;
    let matrix = pairwise_matrix(&snapshots, metric).map_err(to_py)?;
    Ok((names, matrix))
}

/// Python module definition
#[pymodule]
fn rust_python_tree_toolkit(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(transfer_support, m)?)?;
    m.add_function(wrap_pyfunction!(consensus, m)?)?;
    m.add_function(wrap_pyfunction!(pairwise_rf, m)?)?;
    Ok(())
}
