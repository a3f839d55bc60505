//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `tree`: arena tree model, Newick conversion, rerooting and editing.
//! - `bitset`: compact bitset representation for tree bipartitions.
//! - `edge_index`: complement-aware bipartition counter.
//! - `snapshot`: tree snapshot for efficient distance calculations.
//! - `distances`: Robinson-Foulds, weighted RF and Kuhner-Felsenstein.
//! - `transfer`: transfer distance between a bipartition and a tree.
//! - `support`: transfer and Felsenstein bootstrap supports.
//! - `consensus`: majority-rule and strict consensus.
//! - `compare`: reference tree against other trees or edges.
//! - `rearrangement`: reversible NNI moves.
//! - `acr`: ancestral states by parsimony.
//! - `random`: random tree generators.
//! - `stream`: bounded multi-tree streams.
//! - `io`: reading Newick/NEXUS files and writing trees and matrices.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod acr;
pub mod bitset;
pub mod compare;
pub mod consensus;
pub mod distances;
pub mod edge_index;
pub mod error;
pub mod io;
pub mod random;
pub mod rearrangement;
pub mod snapshot;
pub mod stream;
pub mod support;
pub mod transfer;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use bitset::Bitset;
pub use error::{Result, TreeError};
pub use snapshot::TreeSnapshot;
pub use tree::{EdgeId, NodeId, Tree, parse_newick};
