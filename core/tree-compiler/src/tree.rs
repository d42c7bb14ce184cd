//! Decision tree arena.
//!
//! Nodes live in a flat vector and reference their children by [`NodeId`].
//! Thresholds are already quantized; a row goes left when
//! `row[feature_index] <= threshold`.

use pipeline_format::{ClassLabel, NodeId};
use quantizer::QuantizedValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structural errors of a decision tree
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("tree has no nodes")]
    EmptyTree,

    #[error("node id {0} is used more than once")]
    DuplicateNodeId(NodeId),

    #[error("root {0} is not in the tree")]
    MissingRoot(NodeId),

    #[error("node {parent}: {side} child {child} is not in the tree")]
    MissingChild {
        parent: NodeId,
        side: &'static str,
        child: NodeId,
    },

    #[error("cycle through node {node}")]
    Cycle { node: NodeId },

    #[error("node {node} is the child of more than one parent")]
    SharedChild { node: NodeId },

    #[error("node {0} is unreachable from the root")]
    UnreachableNode(NodeId),

    #[error("node {node} splits on feature {feature_index}, only {feature_count} features have bounds")]
    UnknownFeature {
        node: NodeId,
        feature_index: usize,
        feature_count: usize,
    },

    #[error("node {node}: threshold {threshold} outside feature {feature_index} domain [0, {max}]")]
    ThresholdOutOfDomain {
        node: NodeId,
        feature_index: usize,
        threshold: QuantizedValue,
        max: QuantizedValue,
    },

    #[error("node {node} reads feature {feature_index}, row has {row_len} values")]
    FeatureOutOfRow {
        node: NodeId,
        feature_index: usize,
        row_len: usize,
    },
}

/// Tree node: a quantized split or a class leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionNode {
    Internal {
        id: NodeId,
        feature_index: usize,
        threshold: QuantizedValue,
        left: NodeId,
        right: NodeId,
    },
    Leaf {
        id: NodeId,
        class_label: ClassLabel,
    },
}

impl DecisionNode {
    pub fn split(id: NodeId, feature_index: usize, threshold: QuantizedValue, left: NodeId, right: NodeId) -> Self {
        DecisionNode::Internal {
            id,
            feature_index,
            threshold,
            left,
            right,
        }
    }

    pub fn leaf(id: NodeId, class_label: ClassLabel) -> Self {
        DecisionNode::Leaf { id, class_label }
    }

    pub fn id(&self) -> NodeId {
        match *self {
            DecisionNode::Internal { id, .. } | DecisionNode::Leaf { id, .. } => id,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, DecisionNode::Leaf { .. })
    }

    /// `(left, right)` for internal nodes
    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        match *self {
            DecisionNode::Internal { left, right, .. } => Some((left, right)),
            DecisionNode::Leaf { .. } => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TreeSpec {
    root: NodeId,
    nodes: Vec<DecisionNode>,
}

/// Decision tree as an arena of nodes addressed by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TreeSpec", into = "TreeSpec")]
pub struct DecisionTree {
    root: NodeId,
    nodes: Vec<DecisionNode>,
    index: HashMap<NodeId, usize>,
}

impl TryFrom<TreeSpec> for DecisionTree {
    type Error = TreeError;

    fn try_from(spec: TreeSpec) -> Result<Self, TreeError> {
        DecisionTree::new(spec.root, spec.nodes)
    }
}

impl From<DecisionTree> for TreeSpec {
    fn from(tree: DecisionTree) -> Self {
        TreeSpec {
            root: tree.root,
            nodes: tree.nodes,
        }
    }
}

impl DecisionTree {
    /// Build the arena; only id uniqueness is checked here, the graph
    /// shape is checked by [`DecisionTree::validate`].
    pub fn new(root: NodeId, nodes: Vec<DecisionNode>) -> Result<Self, TreeError> {
        if nodes.is_empty() {
            return Err(TreeError::EmptyTree);
        }
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id(), i).is_some() {
                return Err(TreeError::DuplicateNodeId(node.id()));
            }
        }
        Ok(Self { root, nodes, index })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn nodes(&self) -> &[DecisionNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&DecisionNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn internal_count(&self) -> usize {
        self.nodes.len() - self.leaf_count()
    }

    /// Check that the nodes form one finite rooted binary tree.
    pub fn validate(&self) -> Result<(), TreeError> {
        let n_nodes = self.nodes.len();
        let root = *self.index.get(&self.root).ok_or(TreeError::MissingRoot(self.root))?;

        // Iterative DFS with color marking.
        // 0 = unvisited, 1 = on the current path, 2 = done
        let mut color = vec![0u8; n_nodes];
        let mut stack: Vec<(usize, bool)> = vec![(root, false)];

        while let Some((idx, finished)) = stack.pop() {
            if finished {
                color[idx] = 2;
                continue;
            }
            let node = &self.nodes[idx];
            match color[idx] {
                1 => return Err(TreeError::Cycle { node: node.id() }),
                2 => return Err(TreeError::SharedChild { node: node.id() }),
                _ => {}
            }
            color[idx] = 1;
            stack.push((idx, true));

            if let Some((left, right)) = node.children() {
                for (side, child) in [("right", right), ("left", left)] {
                    let child_idx = *self.index.get(&child).ok_or(TreeError::MissingChild {
                        parent: node.id(),
                        side,
                        child,
                    })?;
                    stack.push((child_idx, false));
                }
            }
        }

        if let Some(i) = color.iter().position(|&c| c == 0) {
            return Err(TreeError::UnreachableNode(self.nodes[i].id()));
        }
        Ok(())
    }

    /// Nodes grouped by depth, root first. Validates the tree.
    pub fn levels(&self) -> Result<Vec<Vec<&DecisionNode>>, TreeError> {
        self.validate()?;

        let mut levels = Vec::new();
        let mut frontier: Vec<&DecisionNode> = self.node(self.root).into_iter().collect();
        while !frontier.is_empty() {
            let next = frontier
                .iter()
                .filter_map(|n| n.children())
                .flat_map(|(left, right)| [left, right])
                .filter_map(|id| self.node(id))
                .collect();
            levels.push(frontier);
            frontier = next;
        }
        Ok(levels)
    }

    /// Edges from the root to the deepest leaf. Validates the tree.
    pub fn depth(&self) -> Result<usize, TreeError> {
        Ok(self.levels()?.len().saturating_sub(1))
    }

    /// Classify a quantized row by walking the tree directly.
    pub fn evaluate(&self, row: &[QuantizedValue]) -> Result<ClassLabel, TreeError> {
        let mut id = self.root;
        let mut node = self.node(id).ok_or(TreeError::MissingRoot(id))?;
        // a walk longer than the node count must have looped
        for _ in 0..=self.nodes.len() {
            match *node {
                DecisionNode::Leaf { class_label, .. } => return Ok(class_label),
                DecisionNode::Internal {
                    id: parent,
                    feature_index,
                    threshold,
                    left,
                    right,
                } => {
                    let value = *row.get(feature_index).ok_or(TreeError::FeatureOutOfRow {
                        node: parent,
                        feature_index,
                        row_len: row.len(),
                    })?;
                    let (side, child) = if value <= threshold {
                        ("left", left)
                    } else {
                        ("right", right)
                    };
                    node = self.node(child).ok_or(TreeError::MissingChild {
                        parent,
                        side,
                        child,
                    })?;
                    id = child;
                }
            }
        }
        Err(TreeError::Cycle { node: id })
    }
}
