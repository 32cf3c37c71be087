//! Rooted phylogenetic tree with Newick I/O
//!
//! The tree is carried alongside the abundance data and kept consistent with
//! the feature set; no statistic is computed from it.

use std::collections::{HashMap, HashSet};

use crate::error::{DaaError, Result};

/// A node in the array-backed tree
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// Parent index (`None` for the root)
    pub parent: Option<usize>,
    /// Branch length to the parent, if given
    pub branch_length: Option<f64>,
    /// Leaf label (feature key) or internal node name
    pub label: String,
    pub children: Vec<usize>,
}

/// Rooted tree whose leaves are labelled by feature key
#[derive(Debug, Clone, PartialEq)]
pub struct PhyloTree {
    nodes: Vec<TreeNode>,
    root: usize,
    leaf_index: HashMap<String, usize>,
}

/// Owned subtree used while rebuilding a pruned tree
struct Subtree {
    label: String,
    branch_length: Option<f64>,
    children: Vec<Subtree>,
}

fn add_lengths(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        _ => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

fn invalid(reason: impl Into<String>) -> DaaError {
    DaaError::InvalidTree {
        reason: reason.into(),
    }
}

struct NewickParser<'a> {
    chars: Vec<char>,
    pos: usize,
    nodes: &'a mut Vec<TreeNode>,
}

impl NewickParser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.get(self.pos).copied()
    }

    fn parse_subtree(&mut self, parent: Option<usize>) -> Result<usize> {
        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            parent,
            branch_length: None,
            label: String::new(),
            children: Vec::new(),
        });

        if self.peek() == Some('(') {
            self.pos += 1;
            loop {
                let child = self.parse_subtree(Some(idx))?;
                self.nodes[idx].children.push(child);
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    other => {
                        return Err(invalid(format!(
                            "expected ',' or ')' at position {}, found {:?}",
                            self.pos, other
                        )))
                    }
                }
            }
        }

        self.nodes[idx].label = self.parse_label()?;
        if self.peek() == Some(':') {
            self.pos += 1;
            self.nodes[idx].branch_length = Some(self.parse_length()?);
        }
        Ok(idx)
    }

    fn parse_label(&mut self) -> Result<String> {
        if self.peek() == Some('\'') {
            self.pos += 1;
            let mut label = String::new();
            loop {
                match self.chars.get(self.pos) {
                    Some('\'') if self.chars.get(self.pos + 1) == Some(&'\'') => {
                        label.push('\'');
                        self.pos += 2;
                    }
                    Some('\'') => {
                        self.pos += 1;
                        return Ok(label);
                    }
                    Some(&c) => {
                        label.push(c);
                        self.pos += 1;
                    }
                    None => return Err(invalid("unterminated quoted label")),
                }
            }
        }

        let mut label = String::new();
        while let Some(&c) = self.chars.get(self.pos) {
            if matches!(c, '(' | ')' | ',' | ':' | ';') {
                break;
            }
            label.push(c);
            self.pos += 1;
        }
        Ok(label.trim().to_string())
    }

    fn parse_length(&mut self) -> Result<f64> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(&c) = self.chars.get(self.pos) {
            if matches!(c, '(' | ')' | ',' | ';') || c.is_whitespace() {
                break;
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| invalid(format!("invalid branch length '{}'", text)))
    }
}

fn format_label(label: &str) -> String {
    if label
        .chars()
        .any(|c| matches!(c, '(' | ')' | ',' | ':' | ';' | '\'' | '[' | ']') || c.is_whitespace())
    {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

impl PhyloTree {
    /// Parse a Newick string such as `((A:0.1,B:0.2):0.3,C:0.4);`
    pub fn from_newick(newick: &str) -> Result<Self> {
        let mut nodes = Vec::new();
        let mut parser = NewickParser {
            chars: newick.chars().collect(),
            pos: 0,
            nodes: &mut nodes,
        };

        if parser.peek().is_none() {
            return Err(invalid("empty Newick string"));
        }
        let root = parser.parse_subtree(None)?;

        match parser.peek() {
            Some(';') => parser.pos += 1,
            None => {}
            Some(c) => return Err(invalid(format!("unexpected '{}' after tree", c))),
        }
        if let Some(c) = parser.peek() {
            return Err(invalid(format!("unexpected '{}' after ';'", c)));
        }

        Self::from_nodes(nodes, root)
    }

    fn from_nodes(nodes: Vec<TreeNode>, root: usize) -> Result<Self> {
        let mut leaf_index = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            if !node.children.is_empty() {
                continue;
            }
            if node.label.is_empty() {
                return Err(invalid("unlabelled leaf"));
            }
            if leaf_index.insert(node.label.clone(), idx).is_some() {
                return Err(invalid(format!("duplicate leaf label '{}'", node.label)));
            }
        }
        Ok(Self {
            nodes,
            root,
            leaf_index,
        })
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn n_leaves(&self) -> usize {
        self.leaf_index.len()
    }

    pub fn has_leaf(&self, label: &str) -> bool {
        self.leaf_index.contains_key(label)
    }

    /// Leaf labels in depth-first order
    pub fn leaf_labels(&self) -> Vec<&str> {
        let mut labels = Vec::with_capacity(self.leaf_index.len());
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.children.is_empty() {
                labels.push(node.label.as_str());
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        labels
    }

    /// Total branch length of the tree
    pub fn total_branch_length(&self) -> f64 {
        self.nodes.iter().filter_map(|n| n.branch_length).sum()
    }

    fn prune_node(&self, idx: usize, keep: &HashSet<&str>) -> Option<Subtree> {
        let node = &self.nodes[idx];
        if node.children.is_empty() {
            return keep.contains(node.label.as_str()).then(|| Subtree {
                label: node.label.clone(),
                branch_length: node.branch_length,
                children: Vec::new(),
            });
        }

        let mut children: Vec<Subtree> = node
            .children
            .iter()
            .filter_map(|&c| self.prune_node(c, keep))
            .collect();

        match children.len() {
            0 => None,
            1 => {
                // Collapse the now unary node into its child
                let mut child = children.remove(0);
                child.branch_length = add_lengths(child.branch_length, node.branch_length);
                Some(child)
            }
            _ => Some(Subtree {
                label: node.label.clone(),
                branch_length: node.branch_length,
                children,
            }),
        }
    }

    /// Restrict the tree to the given leaf labels.
    ///
    /// Internal nodes left with one child are collapsed and their branch
    /// lengths summed. Labels not present in the tree are ignored.
    pub fn prune<S: AsRef<str>>(&self, keep: &[S]) -> Result<Self> {
        let keep: HashSet<&str> = keep.iter().map(|s| s.as_ref()).collect();
        let subtree = self
            .prune_node(self.root, &keep)
            .ok_or_else(|| invalid("pruning removed every leaf"))?;

        let mut nodes = Vec::new();
        let root = flatten(subtree, None, &mut nodes);
        Self::from_nodes(nodes, root)
    }

    /// Serialise back to Newick
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_node(self.root, &mut out);
        out.push(';');
        out
    }

    fn write_node(&self, idx: usize, out: &mut String) {
        let node = &self.nodes[idx];
        if !node.children.is_empty() {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_node(child, out);
            }
            out.push(')');
        }
        out.push_str(&format_label(&node.label));
        if let Some(bl) = node.branch_length {
            out.push(':');
            out.push_str(&bl.to_string());
        }
    }
}

fn flatten(subtree: Subtree, parent: Option<usize>, nodes: &mut Vec<TreeNode>) -> usize {
    let idx = nodes.len();
    nodes.push(TreeNode {
        parent,
        branch_length: subtree.branch_length,
        label: subtree.label,
        children: Vec::new(),
    });
    for child in subtree.children {
        let child_idx = flatten(child, Some(idx), nodes);
        nodes[idx].children.push(child_idx);
    }
    idx
}
