//! Canonical tree text and conversion from parsed Newick.
//!
//! Parsing itself is delegated to the `phylotree` crate; this module only maps
//! its node vector onto the arena model. Numeric labels on internal nodes are
//! read as branch supports, mirroring how [`Tree::to_newick`] writes them.
//! A bracketed comment is kept on the branch above its node (on the node
//! itself for the root).

use std::fmt::Write;

use phylotree::tree::Tree as PhyloTree;

use super::{NodeId, Tree};
use crate::error::{Result, TreeError};

/// Rewrites Newick text into the form the underlying parser reads:
/// whitespace outside labels and comments goes, comments ahead of the first
/// `(` (such as `[&R]`) are dropped, nested brackets are flattened and
/// single-quoted labels become double-quoted, with `''` unescaped.
fn normalize(newick: &str) -> String {
    let mut out = String::with_capacity(newick.len());
    let mut chars = newick.chars().peekable();
    let mut started = false;
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                let mut comment = String::new();
                let mut depth = 1usize;
                for c in chars.by_ref() {
                    match c {
                        '[' => depth += 1,
                        ']' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        c => comment.push(c),
                    }
                }
                if started {
                    out.push('[');
                    out.push_str(&comment);
                    out.push(']');
                }
            }
            '\'' => {
                out.push('"');
                while let Some(c) = chars.next() {
                    if c == '\'' {
                        if chars.peek() != Some(&'\'') {
                            break;
                        }
                        chars.next();
                    }
                    out.push(c);
                }
                out.push('"');
            }
            '"' => {
                out.push('"');
                for c in chars.by_ref() {
                    out.push(c);
                    if c == '"' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {}
            c => {
                started |= c == '(';
                out.push(c);
            }
        }
    }
    out
}

/// Rejects text whose parentheses do not enclose the whole tree, which the
/// underlying parser does not report as an error. Quoted labels and
/// comments are skipped.
fn check_nesting(newick: &str) -> Result<()> {
    let body = newick
        .strip_suffix(';')
        .ok_or_else(|| TreeError::Parse("missing closing semicolon".to_string()))?;
    if !body.starts_with('(') {
        return Err(TreeError::Parse("a tree must start with `(`".to_string()));
    }
    let mut depth = 0usize;
    let mut closed = false;
    let mut quoted = false;
    let mut in_comment = false;
    for (i, ch) in body.char_indices() {
        match ch {
            '"' if !in_comment => quoted = !quoted,
            _ if quoted => {}
            '[' => in_comment = true,
            ']' if in_comment => in_comment = false,
            _ if in_comment => {}
            '(' | ')' | ',' if closed => {
                return Err(TreeError::Parse(format!("text after the root at {i}")));
            }
            ';' => return Err(TreeError::Parse(format!("unexpected `;` at {i}"))),
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| TreeError::Parse(format!("unbalanced `)` at {i}")))?;
                closed = depth == 0;
            }
            _ => {}
        }
    }
    if quoted {
        return Err(TreeError::Parse("unclosed quote".to_string()));
    }
    if in_comment {
        return Err(TreeError::Parse("unclosed `[`".to_string()));
    }
    if depth != 0 {
        return Err(TreeError::Parse("unclosed `(`".to_string()));
    }
    Ok(())
}

/// Label written as is, or single-quoted when it holds Newick punctuation
/// or whitespace.
fn quote_label(name: &str) -> std::borrow::Cow<'_, str> {
    if name.chars().any(|c| c.is_whitespace() || "()[]{}:;,'\"".contains(c)) {
        format!("'{}'", name.replace('\'', "''")).into()
    } else {
        name.into()
    }
}

/// Parses one Newick tree.
pub fn parse_newick(newick: &str) -> Result<Tree> {
    let cleaned = normalize(newick);
    check_nesting(&cleaned)?;
    let parsed = PhyloTree::from_newick(&cleaned).map_err(|e| TreeError::Parse(e.to_string()))?;
    from_phylotree(&parsed)
}

/// Converts a `phylotree` tree into the arena model, keeping child order.
pub fn from_phylotree(src: &PhyloTree) -> Result<Tree> {
    let root = src.get_root().map_err(|e| TreeError::Parse(e.to_string()))?;
    let mut tree = Tree::new();
    let mut stack: Vec<(usize, Option<NodeId>)> = vec![(root, None)];

    while let Some((id, parent)) = stack.pop() {
        let node = src.get(&id).map_err(|e| TreeError::Parse(e.to_string()))?;
        let raw = node.name.as_deref().unwrap_or_default();
        let unquoted = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"'));
        let internal = !node.children.is_empty();
        let support = match unquoted {
            None if internal && parent.is_some() => raw.parse::<f64>().ok(),
            _ => None,
        };
        let name = if support.is_some() { "" } else { unquoted.unwrap_or(raw) };
        let comment = node.comment.clone().filter(|c| !c.is_empty());

        let n = tree.new_node(name);
        match parent {
            Some(p) => {
                let e = tree.connect_nodes(p, n)?;
                let edge = tree.edge_mut(e)?;
                edge.length = node.parent_edge;
                edge.support = support;
                edge.comments.extend(comment);
            }
            None => tree.node_mut(n)?.comments.extend(comment),
        }
        for &child in node.children.iter().rev() {
            stack.push((child, Some(n)));
        }
    }
    Ok(tree)
}

enum Step {
    Enter(NodeId),
    Separator,
    Close(NodeId),
}

impl Tree {
    /// Canonical Newick text of the tree.
    ///
    /// Branch lengths are written with full precision, the support of an
    /// edge becomes the label of its (unnamed) child node and comments are
    /// written as `[...]` suffixes of the label and of the branch length.
    pub fn to_newick(&self) -> Result<String> {
        let root = self.root()?;
        let mut out = String::new();
        let mut stack = vec![Step::Enter(root)];

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(node) => {
                    let children: Vec<NodeId> = self.children(node).map(|(_, c)| c).collect();
                    if children.is_empty() {
                        self.write_label(node, &mut out);
                        continue;
                    }
                    out.push('(');
                    stack.push(Step::Close(node));
                    for (i, &c) in children.iter().enumerate().rev() {
                        stack.push(Step::Enter(c));
                        if i > 0 {
                            stack.push(Step::Separator);
                        }
                    }
                }
                Step::Separator => out.push(','),
                Step::Close(node) => {
                    out.push(')');
                    self.write_label(node, &mut out);
                }
            }
        }
        out.push(';');
        Ok(out)
    }

    fn write_label(&self, node: NodeId, out: &mut String) {
        let n = &self.nodes[node];
        let parent_edge = self.parent_edge(node).map(|e| &self.edges[e]);

        if !n.name.is_empty() {
            out.push_str(&quote_label(&n.name));
        } else if let Some(support) = parent_edge.and_then(|e| e.support) {
            // writing into a String cannot fail
            let _ = write!(out, "{support}");
        }
        for c in &n.comments {
            let _ = write!(out, "[{c}]");
        }
        if let Some(edge) = parent_edge {
            if let Some(length) = edge.length {
                let _ = write!(out, ":{length}");
            }
            for c in &edge.comments {
                let _ = write!(out, "[{c}]");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_shapes() {
        let trees = [
            // star
            "(t1:1,t2:2,t3:3,t4:4,t5:0.5);",
            // caterpillar
            "(t1:0.1,(t2:0.2,(t3:0.3,(t4:0.4,t5:0.5)0.7:0.1)0.8:0.2)0.9:0.3);",
            // balanced binary
            "((t1:1,t2:1)1:1,(t3:1,t4:1)0.5:1);",
            // single bifurcation
            "(t1:0.5,t2:0.25);",
            // no lengths, named internal nodes
            "(t1,(t2,t3)n1,(t4,t5)n2)root;",
        ];
        for nw in trees {
            let tree = parse_newick(nw).unwrap();
            assert_eq!(tree.to_newick().unwrap(), nw);
            let again = parse_newick(&tree.to_newick().unwrap()).unwrap();
            assert_eq!(again.to_newick().unwrap(), nw);
        }
    }

    #[test]
    fn test_numeric_internal_label_is_support() {
        let tree = parse_newick("((A:1,B:1)0.95:2,C:1,D:1);").unwrap();
        let internal = tree.internal_edges();
        assert_eq!(internal.len(), 1);
        let edge = tree.edge(internal[0]);
        assert_eq!(edge.support, Some(0.95));
        assert_eq!(edge.length, Some(2.0));
        assert!(tree.node(edge.right()).name.is_empty());
    }

    #[test]
    fn test_comments_kept_whitespace_dropped() {
        let tree = parse_newick("[&R] ((A:1[&rate=0.5],B:1) : 2, C:1 [x y]);\n").unwrap();
        assert_eq!(tree.to_newick().unwrap(), "((A:1[&rate=0.5],B:1):2,C:1[x y]);");
        let a = tree.node_by_name("A").unwrap();
        let e = tree.parent_edge(a).unwrap();
        assert_eq!(tree.edge(e).comments, vec!["&rate=0.5".to_string()]);
        assert!(tree.node(tree.root().unwrap()).comments.is_empty());
    }

    #[test]
    fn test_quoted_labels() {
        let tree = parse_newick("('Homo sapiens':1,'Pan (chimp)':1,'O''Brien':2,Gorilla);").unwrap();
        let mut names = tree.tip_names();
        names.sort();
        assert_eq!(names, vec!["Gorilla", "Homo sapiens", "O'Brien", "Pan (chimp)"]);
        let nw = tree.to_newick().unwrap();
        assert_eq!(nw, "('Homo sapiens':1,'Pan (chimp)':1,'O''Brien':2,Gorilla);");
        assert_eq!(parse_newick(&nw).unwrap().to_newick().unwrap(), nw);

        // a quoted number on an internal node stays a name
        let tree = parse_newick("((A,B)'42',C,D);").unwrap();
        assert!(tree.node_by_name("42").is_some());
        assert!(tree.internal_edges().iter().all(|&e| tree.edge(e).support.is_none()));
    }

    #[test]
    fn test_comments_written_as_suffixes() {
        let mut tree = parse_newick("(A:1,B:2);").unwrap();
        let a = tree.node_by_name("A").unwrap();
        tree.node_mut(a).unwrap().comments.push("tip".into());
        let e = tree.parent_edge(a).unwrap();
        tree.edge_mut(e).unwrap().comments.push("&len".into());
        assert_eq!(tree.to_newick().unwrap(), "(A[tip]:1[&len],B:2);");
    }

    #[test]
    fn test_missing_semicolon() {
        assert!(matches!(parse_newick("(A,B)"), Err(TreeError::Parse(_))));
    }

    #[test]
    fn test_malformed_nesting() {
        for bad in ["A;", ";", "(A,B;", "(A),B;", "(A,B));", "(A,B)(C,D);", "(A;B);", "('A,B);", "(A[x,B);"] {
            assert!(matches!(parse_newick(bad), Err(TreeError::Parse(_))), "{bad}");
        }
    }

    #[test]
    fn test_full_precision_lengths() {
        let nw = "(A:0.123456789012345,B:0.0000001,C:1234.5);";
        assert_eq!(parse_newick(nw).unwrap().to_newick().unwrap(), nw);
    }
}
