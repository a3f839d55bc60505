//! Multi-tree streams.
//!
//! A stream is the receiving end of a bounded channel. Each entry carries a
//! sequence id (0, 1, 2, ... in production order) and either a tree or the
//! error met while producing it; a bad entry never ends the stream.
//! Consumers must read the channel to its end before returning, so that a
//! producer blocked on a full queue is always released.

use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use log::debug;

use crate::error::{Result, TreeError};
use crate::tree::{Tree, parse_newick};

/// Default capacity of the bounded queue between producer and consumers.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// One tree of a stream.
#[derive(Debug)]
pub struct TreeEntry {
    pub id: usize,
    pub tree: Result<Tree>,
}

pub type TreeStream = Receiver<TreeEntry>;

/// Spawns a producer thread feeding `items` into a new stream, numbering
/// them in order. The producer stops early if the stream is dropped.
pub fn stream_results<I>(items: I, capacity: usize) -> TreeStream
where
    I: IntoIterator<Item = Result<Tree>> + Send + 'static,
    I::IntoIter: Send,
{
    let (tx, rx) = sync_channel(capacity.max(1));
    thread::spawn(move || produce(tx, items));
    rx
}

fn produce<I: IntoIterator<Item = Result<Tree>>>(tx: SyncSender<TreeEntry>, items: I) {
    for (id, tree) in items.into_iter().enumerate() {
        if tx.send(TreeEntry { id, tree }).is_err() {
            debug!("stream consumer went away after {id} trees");
            return;
        }
    }
}

/// Stream over already built trees.
pub fn stream_trees(trees: Vec<Tree>, capacity: usize) -> TreeStream {
    stream_results(trees.into_iter().map(Ok), capacity)
}

/// Splits text holding several `;`-terminated Newick trees. Semicolons
/// inside `[...]` comments or quoted labels do not end a tree.
pub fn split_newick(text: &str) -> Vec<String> {
    let mut trees = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for ch in text.chars() {
        current.push(ch);
        match ch {
            q @ ('\'' | '"') if depth == 0 => match quote {
                Some(open) if open == q => quote = None,
                None => quote = Some(q),
                Some(_) => {}
            },
            _ if quote.is_some() => {}
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                let tree = current.trim();
                if tree != ";" {
                    trees.push(tree.to_string());
                }
                current.clear();
            }
            _ => {}
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        // unterminated tail, reported as a parse error downstream
        trees.push(rest.to_string());
    }
    trees
}

/// Stream over the Newick trees of `text`, parsed on the producer thread.
pub fn stream_newick(text: String, capacity: usize) -> TreeStream {
    let chunks = split_newick(&text);
    stream_results(chunks.into_iter().map(|nw| parse_newick(&nw)), capacity)
}

/// Reads a stream to its end, keeping the trees and the errors (tagged with
/// their sequence id) apart.
pub fn collect_stream(stream: TreeStream) -> (Vec<(usize, Tree)>, Vec<TreeError>) {
    let mut trees = Vec::new();
    let mut errors = Vec::new();
    for entry in stream {
        match entry.tree {
            Ok(t) => trees.push((entry.id, t)),
            Err(e) => errors.push(e.in_stream(entry.id)),
        }
    }
    (trees, errors)
}

/// Reads a stream to its end, failing with the first error (by sequence id).
pub fn read_all(stream: TreeStream) -> Result<Vec<Tree>> {
    let (trees, errors) = collect_stream(stream);
    if let Some(e) = first_error(errors) {
        return Err(e);
    }
    Ok(trees.into_iter().map(|(_, t)| t).collect())
}

/// Error with the lowest sequence id among stream-tagged errors.
pub(crate) fn first_error(errors: Vec<TreeError>) -> Option<TreeError> {
    errors.into_iter().min_by_key(|e| match e {
        TreeError::Stream { id, .. } => *id,
        _ => usize::MAX,
    })
}
