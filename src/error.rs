//! Crate-wide error type.
//!
//! Every failure path of the library is a [`TreeError`] value; nothing here
//! terminates the process. Callers that need the broad category of a failure
//! (contract violation on the tree structure, a failure tagged to one tree of a
//! stream, a missing precomputation, bad input) use [`TreeError::kind`].

use thiserror::Error;

use crate::tree::{EdgeId, NodeId};

/// Broad category of a [`TreeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing tip/node/edge, mismatched tip universes, wrong node degree.
    Structural,
    /// An error tagged to one entry of a tree stream.
    Stream,
    /// Tip index or bitsets were not built before use.
    Precondition,
    /// Unparsable text, I/O failure or an out-of-range argument.
    Input,
}

/// Errors produced while building, editing and comparing trees.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("no tip named `{0}` in the tree")]
    TipNotFound(String),
    #[error("tip name `{0}` is duplicated")]
    DuplicateTip(String),
    #[error("all tips must be named, tip node {0} has no name")]
    UnnamedTip(NodeId),
    #[error("node {0} is not part of the tree")]
    NodeNotFound(NodeId),
    #[error("edge {0} is not part of the tree")]
    EdgeNotFound(EdgeId),
    #[error("trees do not share the same tip set")]
    TipSetMismatch,
    #[error("node {node} has {degree} neighbors, exactly 3 are required")]
    NotBifurcating { node: NodeId, degree: usize },
    #[error("the tree would be left with {0} tips, at least 2 are required")]
    TooFewTips(usize),
    #[error("the tree has no root")]
    NoRoot,
    #[error("the outgroup is not monophyletic")]
    OutgroupNotMonophyletic,
    #[error("inconsistent tree structure: {0}")]
    Inconsistent(String),

    #[error("tree {id} of the stream: {source}")]
    Stream {
        id: usize,
        #[source]
        source: Box<TreeError>,
    },

    #[error("the tip index has not been built")]
    TipIndexNotBuilt,
    #[error("edge bitsets are not up to date")]
    BitsetsNotBuilt,

    #[error("could not parse tree: {0}")]
    Parse(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("the tree stream did not provide any usable tree")]
    EmptyStream,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TreeError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::TipNotFound(_)
            | TreeError::DuplicateTip(_)
            | TreeError::UnnamedTip(_)
            | TreeError::NodeNotFound(_)
            | TreeError::EdgeNotFound(_)
            | TreeError::TipSetMismatch
            | TreeError::NotBifurcating { .. }
            | TreeError::TooFewTips(_)
            | TreeError::NoRoot
            | TreeError::OutgroupNotMonophyletic
            | TreeError::Inconsistent(_) => ErrorKind::Structural,
            TreeError::Stream { .. } => ErrorKind::Stream,
            TreeError::TipIndexNotBuilt | TreeError::BitsetsNotBuilt => ErrorKind::Precondition,
            TreeError::Parse(_)
            | TreeError::InvalidArgument(_)
            | TreeError::EmptyStream
            | TreeError::Io(_) => ErrorKind::Input,
        }
    }

    /// Tags this error with the sequence id of the stream entry it belongs to.
    pub fn in_stream(self, id: usize) -> Self {
        match self {
            // already tagged by a nested consumer
            TreeError::Stream { .. } => self,
            other => TreeError::Stream { id, source: Box::new(other) },
        }
    }
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, TreeError>;
