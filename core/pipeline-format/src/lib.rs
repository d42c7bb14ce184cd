//! Switch Pipeline Format
//!
//! Stage-ordered range-match tables produced from a decision tree, plus the
//! action map resolving leaf nodes to class labels.
//! Each stage matches on `(current node, feature value)`; the matched rule
//! writes the next node into the per-packet token.

use quantizer::QuantizedValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

mod image;

pub use image::{FormatError, ImageHeader, ImageMetadata, PipelineImage, MAGIC, VERSION};

/// Decision node identifier, unique within one tree
pub type NodeId = u32;

/// Leaf outcomes: node id -> class label
pub type ActionMap = BTreeMap<NodeId, ClassLabel>;

/// Binary classification outcome
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ClassLabel {
    /// Class 0: benign traffic, forwarded
    Accept = 0,
    /// Class 1: attack traffic, dropped
    Reject = 1,
}

impl ClassLabel {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ClassLabel {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ClassLabel::Accept),
            1 => Ok(ClassLabel::Reject),
            other => Err(format!("class label must be 0 or 1, got {}", other)),
        }
    }
}

impl From<ClassLabel> for u8 {
    fn from(label: ClassLabel) -> u8 {
        label.code()
    }
}

/// Pipeline structural and evaluation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("table at position {position} has stage index {stage_index}")]
    NonContiguousStage { position: usize, stage_index: usize },

    #[error("stage {stage}, node {match_node}: empty range {low}..={high}")]
    EmptyRange {
        stage: usize,
        match_node: NodeId,
        low: QuantizedValue,
        high: QuantizedValue,
    },

    #[error("stage {stage}, node {match_node}: range ends at {high}, domain max is {max}")]
    RangeOutOfDomain {
        stage: usize,
        match_node: NodeId,
        high: QuantizedValue,
        max: QuantizedValue,
    },

    #[error("stage {stage}, node {match_node}: ranges overlap at {at}")]
    OverlappingRanges {
        stage: usize,
        match_node: NodeId,
        at: QuantizedValue,
    },

    #[error("stage {stage}, node {match_node}: value {gap} is not covered")]
    IncompleteCoverage {
        stage: usize,
        match_node: NodeId,
        gap: u64,
    },

    #[error("stage {stage}, node {match_node}: feature {feature_index} has no bit width")]
    UnknownFeature {
        stage: usize,
        match_node: NodeId,
        feature_index: usize,
    },

    #[error("stage {stage}, node {match_node}: rules test more than one feature")]
    MixedFeatures { stage: usize, match_node: NodeId },

    #[error("stage {stage}: result {node} is neither a leaf nor matched by the next stage")]
    UnresolvedResult { stage: usize, node: NodeId },

    #[error("entry node {0} is neither a leaf nor matched by stage 0")]
    UnmatchedEntry(NodeId),

    #[error("rule reads feature {feature_index}, row has {row_len} values")]
    FeatureOutOfRow { feature_index: usize, row_len: usize },

    #[error("stage {stage}: no rule for node {node} at value {value}")]
    NoMatchingRule {
        stage: usize,
        node: NodeId,
        value: QuantizedValue,
    },

    #[error("node {0} reached the end of the pipeline without a class")]
    UnresolvedNode(NodeId),
}

/// One range entry: `low..=high` on `feature_index` while the token is
/// `match_node` writes `result` into the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRule {
    pub feature_index: usize,
    pub low: QuantizedValue,
    pub high: QuantizedValue,
    pub match_node: NodeId,
    pub result: NodeId,
}

impl RangeRule {
    pub fn contains(&self, value: QuantizedValue) -> bool {
        self.low <= value && value <= self.high
    }
}

/// Range-match table for one pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchActionTable {
    pub stage_index: usize,
    pub rules: Vec<RangeRule>,
}

impl MatchActionTable {
    pub fn new(stage_index: usize) -> Self {
        Self {
            stage_index,
            rules: Vec::new(),
        }
    }

    /// Distinct features read at this stage, ascending
    pub fn features(&self) -> Vec<usize> {
        let set: BTreeSet<usize> = self.rules.iter().map(|r| r.feature_index).collect();
        set.into_iter().collect()
    }

    /// Distinct current-node tokens this stage matches on
    pub fn match_nodes(&self) -> BTreeSet<NodeId> {
        self.rules.iter().map(|r| r.match_node).collect()
    }

    /// Find the rule for `node` whose range holds the row's feature value
    pub fn lookup(
        &self,
        node: NodeId,
        row: &[QuantizedValue],
    ) -> Result<Option<&RangeRule>, PipelineError> {
        for rule in self.rules.iter().filter(|r| r.match_node == node) {
            let value = *row.get(rule.feature_index).ok_or(PipelineError::FeatureOutOfRow {
                feature_index: rule.feature_index,
                row_len: row.len(),
            })?;
            if rule.contains(value) {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }
}

/// Compiled pipeline: tables in stage order plus leaf actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Match-field width per feature index
    pub bit_widths: Vec<u8>,
    /// Token value every packet enters stage 0 with (the tree root)
    pub entry_node: NodeId,
    pub tables: Vec<MatchActionTable>,
    pub actions: ActionMap,
}

impl Pipeline {
    pub fn stage_count(&self) -> usize {
        self.tables.len()
    }

    pub fn rule_count(&self) -> usize {
        self.tables.iter().map(|t| t.rules.len()).sum()
    }

    /// Widest match field, 0 when no feature is declared
    pub fn max_bit_width(&self) -> u8 {
        self.bit_widths.iter().copied().max().unwrap_or(0)
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.actions.contains_key(&node)
    }

    /// Thread a quantized row through the stages.
    ///
    /// Returns the sequence of tokens, starting with the entry node and
    /// ending at the leaf that classified the row.
    pub fn trace(&self, row: &[QuantizedValue]) -> Result<Vec<NodeId>, PipelineError> {
        let mut token = self.entry_node;
        let mut path = vec![token];

        for table in &self.tables {
            // leaf reached earlier: later stages pass the token through
            if self.is_leaf(token) {
                break;
            }
            let rule = table.lookup(token, row)?.ok_or_else(|| {
                let value = table
                    .rules
                    .iter()
                    .find(|r| r.match_node == token)
                    .and_then(|r| row.get(r.feature_index).copied())
                    .unwrap_or_default();
                PipelineError::NoMatchingRule {
                    stage: table.stage_index,
                    node: token,
                    value,
                }
            })?;
            token = rule.result;
            path.push(token);
        }

        if self.is_leaf(token) {
            Ok(path)
        } else {
            Err(PipelineError::UnresolvedNode(token))
        }
    }

    /// Classify a quantized row.
    pub fn classify(&self, row: &[QuantizedValue]) -> Result<ClassLabel, PipelineError> {
        let path = self.trace(row)?;
        let leaf = *path.last().unwrap_or(&self.entry_node);
        self.actions
            .get(&leaf)
            .copied()
            .ok_or(PipelineError::UnresolvedNode(leaf))
    }

    /// Check the structural invariants of a pipeline:
    /// contiguous stages, per-node disjoint ranges covering the tested
    /// feature's whole domain, and every result resolvable by the next
    /// stage or a leaf.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (position, table) in self.tables.iter().enumerate() {
            if table.stage_index != position {
                return Err(PipelineError::NonContiguousStage {
                    position,
                    stage_index: table.stage_index,
                });
            }
            validate_coverage(table, &self.bit_widths)?;
        }

        match self.tables.first() {
            None if !self.is_leaf(self.entry_node) => {
                return Err(PipelineError::UnmatchedEntry(self.entry_node));
            }
            Some(first) if !self.is_leaf(self.entry_node) => {
                if !first.match_nodes().contains(&self.entry_node) {
                    return Err(PipelineError::UnmatchedEntry(self.entry_node));
                }
            }
            _ => {}
        }

        for (position, table) in self.tables.iter().enumerate() {
            let next = self.tables.get(position + 1).map(MatchActionTable::match_nodes);
            for rule in &table.rules {
                let handed_on = next.as_ref().is_some_and(|n| n.contains(&rule.result));
                if !self.is_leaf(rule.result) && !handed_on {
                    return Err(PipelineError::UnresolvedResult {
                        stage: table.stage_index,
                        node: rule.result,
                    });
                }
            }
        }

        Ok(())
    }
}

fn validate_coverage(table: &MatchActionTable, bit_widths: &[u8]) -> Result<(), PipelineError> {
    let stage = table.stage_index;
    let mut by_node: BTreeMap<NodeId, Vec<&RangeRule>> = BTreeMap::new();
    for rule in &table.rules {
        by_node.entry(rule.match_node).or_default().push(rule);
    }

    for (match_node, mut rules) in by_node {
        let feature_index = rules[0].feature_index;
        if rules.iter().any(|r| r.feature_index != feature_index) {
            return Err(PipelineError::MixedFeatures { stage, match_node });
        }
        let max = match bit_widths.get(feature_index) {
            Some(&bit_width) => quantizer::max_code(bit_width),
            None => {
                return Err(PipelineError::UnknownFeature {
                    stage,
                    match_node,
                    feature_index,
                })
            }
        };
        rules.sort_by_key(|r| r.low);

        // next value that must be covered
        let mut expected: u64 = 0;
        for rule in rules {
            if rule.low > rule.high {
                return Err(PipelineError::EmptyRange {
                    stage,
                    match_node,
                    low: rule.low,
                    high: rule.high,
                });
            }
            if rule.high > max {
                return Err(PipelineError::RangeOutOfDomain {
                    stage,
                    match_node,
                    high: rule.high,
                    max,
                });
            }
            let low = u64::from(rule.low);
            if low < expected {
                return Err(PipelineError::OverlappingRanges {
                    stage,
                    match_node,
                    at: rule.low,
                });
            }
            if low > expected {
                return Err(PipelineError::IncompleteCoverage {
                    stage,
                    match_node,
                    gap: expected,
                });
            }
            expected = u64::from(rule.high) + 1;
        }
        if expected <= u64::from(max) {
            return Err(PipelineError::IncompleteCoverage {
                stage,
                match_node,
                gap: expected,
            });
        }
    }
    Ok(())
}
