//! Tree-to-pipeline compilation.
//!
//! Depth `d` of the tree becomes stage `d`. Every internal node at that
//! depth owns two rules keyed by its own id: `[0, t]` hands the token to the
//! left child and `[t + 1, max]` to the right child, where `max` is the top
//! of that node's feature domain. Rules of different
//! nodes never merge, so several nodes can split the same feature at
//! different thresholds within one stage.

use crate::tree::{DecisionNode, DecisionTree, TreeError};
use log::{debug, info};
use pipeline_format::{ActionMap, MatchActionTable, Pipeline, RangeRule};
use quantizer::FeatureBounds;
use serde::{Deserialize, Serialize};

/// Default pipeline-stage budget
pub const DEFAULT_MAX_STAGES: usize = 5;

/// Compilation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("tree depth {depth} exceeds the {max_stages}-stage pipeline budget")]
    StageBudgetExceeded { depth: usize, max_stages: usize },

    #[error("malformed tree: {0}")]
    MalformedTree(#[from] TreeError),
}

/// Compilation settings, passed explicitly per compile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub max_stages: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            max_stages: DEFAULT_MAX_STAGES,
        }
    }
}

fn check_thresholds(tree: &DecisionTree, bounds: &[FeatureBounds]) -> Result<(), TreeError> {
    for node in tree.nodes() {
        if let DecisionNode::Internal {
            id,
            feature_index,
            threshold,
            ..
        } = *node
        {
            let feature = bounds.get(feature_index).ok_or(TreeError::UnknownFeature {
                node: id,
                feature_index,
                feature_count: bounds.len(),
            })?;
            if !feature.contains(threshold) {
                return Err(TreeError::ThresholdOutOfDomain {
                    node: id,
                    feature_index,
                    threshold,
                    max: feature.max_code(),
                });
            }
        }
    }
    Ok(())
}

/// Compile a tree into stage-ordered range tables.
///
/// `bounds[i]` describes feature `i`. Each feature keeps its own bit width,
/// so its rules span exactly its own domain.
pub fn compile(
    tree: &DecisionTree,
    bounds: &[FeatureBounds],
    config: CompileConfig,
) -> Result<Pipeline, CompileError> {
    let levels = tree.levels()?;
    let depth = levels.len().saturating_sub(1);
    if depth > config.max_stages {
        return Err(CompileError::StageBudgetExceeded {
            depth,
            max_stages: config.max_stages,
        });
    }
    check_thresholds(tree, bounds)?;

    let mut actions = ActionMap::new();
    let mut tables = Vec::with_capacity(depth);

    for (stage, level) in levels.iter().enumerate() {
        for node in level {
            if let DecisionNode::Leaf { id, class_label } = **node {
                actions.insert(id, class_label);
            }
        }

        // (feature, threshold, node, left, right), grouped by feature and
        // ordered by threshold within a group
        let mut splits: Vec<_> = level
            .iter()
            .filter_map(|node| match **node {
                DecisionNode::Internal {
                    id,
                    feature_index,
                    threshold,
                    left,
                    right,
                } => Some((feature_index, threshold, id, left, right)),
                DecisionNode::Leaf { .. } => None,
            })
            .collect();
        if splits.is_empty() {
            break;
        }
        splits.sort_unstable();

        let mut table = MatchActionTable::new(stage);
        for (feature_index, threshold, id, left, right) in splits {
            // feature_index was checked against bounds above
            let max = bounds[feature_index].max_code();
            table.rules.push(RangeRule {
                feature_index,
                low: 0,
                high: threshold,
                match_node: id,
                result: left,
            });
            // a threshold at the domain top leaves the right branch unreachable
            if threshold < max {
                table.rules.push(RangeRule {
                    feature_index,
                    low: threshold + 1,
                    high: max,
                    match_node: id,
                    result: right,
                });
            }
        }

        debug!(
            "stage {}: {} nodes, features {:?}, {} rules",
            stage,
            table.match_nodes().len(),
            table.features(),
            table.rules.len()
        );
        tables.push(table);
    }

    let pipeline = Pipeline {
        bit_widths: bounds.iter().map(FeatureBounds::bit_width).collect(),
        entry_node: tree.root(),
        tables,
        actions,
    };
    info!(
        "compiled tree of depth {} into {} stages, {} rules, {} leaves",
        depth,
        pipeline.stage_count(),
        pipeline.rule_count(),
        pipeline.actions.len()
    );
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_format::ClassLabel::{self, Accept, Reject};
    use quantizer::QuantizerConfig;

    fn bounds8(names: &[&str]) -> Vec<FeatureBounds> {
        names
            .iter()
            .map(|n| FeatureBounds::new(*n, 0.0, 255.0, 8).unwrap())
            .collect()
    }

    fn stump(feature: usize, threshold: u32, left: ClassLabel, right: ClassLabel) -> DecisionTree {
        DecisionTree::new(
            0,
            vec![
                DecisionNode::split(0, feature, threshold, 1, 2),
                DecisionNode::leaf(1, left),
                DecisionNode::leaf(2, right),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_sttl_stump() {
        let tree = stump(0, 64, Accept, Reject);
        let pipeline = compile(&tree, &bounds8(&["sttl"]), CompileConfig::default()).unwrap();
        pipeline.validate().unwrap();

        assert_eq!(pipeline.stage_count(), 1);
        let rules = &pipeline.tables[0].rules;
        assert_eq!(rules.len(), 2);
        assert_eq!((rules[0].low, rules[0].high, rules[0].result), (0, 64, 1));
        assert_eq!((rules[1].low, rules[1].high, rules[1].result), (65, 255, 2));
        assert_eq!(pipeline.actions[&1], Accept);
        assert_eq!(pipeline.actions[&2], Reject);

        assert_eq!(pipeline.classify(&[64]).unwrap(), Accept);
        assert_eq!(pipeline.classify(&[65]).unwrap(), Reject);
    }

    #[test]
    fn test_single_leaf() {
        let tree = DecisionTree::new(3, vec![DecisionNode::leaf(3, Reject)]).unwrap();
        let pipeline = compile(&tree, &[], CompileConfig::default()).unwrap();

        assert!(pipeline.tables.is_empty());
        assert_eq!(pipeline.actions.len(), 1);
        assert_eq!(pipeline.classify(&[]).unwrap(), Reject);
        pipeline.validate().unwrap();
    }

    #[test]
    fn test_same_class_leaves_keep_two_ranges() {
        let tree = stump(0, 10, Accept, Accept);
        let pipeline = compile(&tree, &bounds8(&["sport"]), CompileConfig::default()).unwrap();
        assert_eq!(pipeline.rule_count(), 2);
        assert_eq!(pipeline.actions.len(), 2);
    }

    #[test]
    fn test_threshold_at_domain_top() {
        let tree = stump(0, 255, Accept, Reject);
        let pipeline = compile(&tree, &bounds8(&["sttl"]), CompileConfig::default()).unwrap();
        pipeline.validate().unwrap();
        assert_eq!(pipeline.rule_count(), 1);
        assert_eq!(pipeline.classify(&[255]).unwrap(), Accept);
    }

    #[test]
    fn test_degenerate_feature_routes_one_way() {
        let config = QuantizerConfig::default();
        let dsport = quantizer::fit("dsport", &[10.0, 10.0], config).unwrap();
        let tree = stump(0, 3, Accept, Reject);
        let pipeline = compile(&tree, &[dsport.clone()], CompileConfig::default()).unwrap();

        for raw in [10.0, 0.0, 80.0, 65535.0, f64::NAN] {
            let q = dsport.transform(raw);
            assert_eq!(q, 0);
            assert_eq!(pipeline.classify(&[q]).unwrap(), Accept);
        }
    }

    #[test]
    fn test_shared_feature_at_one_depth() {
        // both depth-1 nodes split sport, at different thresholds
        let tree = DecisionTree::new(
            0,
            vec![
                DecisionNode::split(0, 0, 100, 1, 2),
                DecisionNode::split(1, 1, 30, 3, 4),
                DecisionNode::split(2, 1, 200, 5, 6),
                DecisionNode::leaf(3, Accept),
                DecisionNode::leaf(4, Reject),
                DecisionNode::leaf(5, Reject),
                DecisionNode::leaf(6, Accept),
            ],
        )
        .unwrap();
        let pipeline = compile(&tree, &bounds8(&["sttl", "sport"]), CompileConfig::default()).unwrap();
        pipeline.validate().unwrap();

        let stage1 = &pipeline.tables[1];
        assert_eq!(stage1.features(), vec![1]);
        assert_eq!(stage1.rules.len(), 4);
        assert_eq!(stage1.rules[0].match_node, 1);
        assert_eq!(stage1.rules[2].match_node, 2);

        // sport=100 lands on opposite sides of the two thresholds
        assert_eq!(pipeline.classify(&[0, 100]).unwrap(), Reject);
        assert_eq!(pipeline.classify(&[101, 100]).unwrap(), Reject);
        assert_eq!(pipeline.classify(&[0, 30]).unwrap(), Accept);
        assert_eq!(pipeline.classify(&[101, 201]).unwrap(), Accept);
    }

    #[test]
    fn test_stage_budget() {
        // chain of depth 3 down the left spine
        let tree = DecisionTree::new(
            0,
            vec![
                DecisionNode::split(0, 0, 10, 1, 2),
                DecisionNode::split(1, 0, 5, 3, 4),
                DecisionNode::split(3, 0, 2, 5, 6),
                DecisionNode::leaf(2, Reject),
                DecisionNode::leaf(4, Accept),
                DecisionNode::leaf(5, Accept),
                DecisionNode::leaf(6, Reject),
            ],
        )
        .unwrap();
        let bounds = bounds8(&["sttl"]);

        let pipeline = compile(&tree, &bounds, CompileConfig { max_stages: 3 }).unwrap();
        assert_eq!(pipeline.stage_count(), 3);
        // leaf 2 is resolved at stage 0 and passes through later stages
        assert_eq!(pipeline.classify(&[11]).unwrap(), Reject);

        assert_eq!(
            compile(&tree, &bounds, CompileConfig { max_stages: 2 }),
            Err(CompileError::StageBudgetExceeded {
                depth: 3,
                max_stages: 2
            })
        );
    }

    #[test]
    fn test_threshold_out_of_domain() {
        let tree = stump(0, 256, Accept, Reject);
        assert_eq!(
            compile(&tree, &bounds8(&["sttl"]), CompileConfig::default()),
            Err(CompileError::MalformedTree(TreeError::ThresholdOutOfDomain {
                node: 0,
                feature_index: 0,
                threshold: 256,
                max: 255
            }))
        );
    }

    #[test]
    fn test_unknown_feature() {
        let tree = stump(2, 1, Accept, Reject);
        assert!(matches!(
            compile(&tree, &bounds8(&["sttl"]), CompileConfig::default()),
            Err(CompileError::MalformedTree(TreeError::UnknownFeature { feature_index: 2, .. }))
        ));
    }

    #[test]
    fn test_malformed_structure() {
        let tree = DecisionTree::new(0, vec![DecisionNode::split(0, 0, 1, 1, 2), DecisionNode::leaf(1, Accept)]).unwrap();
        assert!(matches!(
            compile(&tree, &bounds8(&["sttl"]), CompileConfig::default()),
            Err(CompileError::MalformedTree(TreeError::MissingChild { child: 2, .. }))
        ));
    }

    #[test]
    fn test_unused_wider_feature() {
        let bounds = vec![
            FeatureBounds::new("sttl", 0.0, 255.0, 8).unwrap(),
            FeatureBounds::new("sport", 0.0, 65535.0, 16).unwrap(),
        ];
        let tree = stump(0, 64, Accept, Reject);
        let pipeline = compile(&tree, &bounds, CompileConfig::default()).unwrap();
        pipeline.validate().unwrap();

        assert_eq!(pipeline.bit_widths, vec![8, 16]);
        assert_eq!(pipeline.tables[0].rules[1].high, 255);
        assert_eq!(pipeline.classify(&[64, 65535]).unwrap(), Accept);
        assert_eq!(pipeline.classify(&[65, 0]).unwrap(), Reject);
    }

    #[test]
    fn test_mixed_bit_widths() {
        // 8-bit sttl at the root, 16-bit sport below it
        let bounds = vec![
            FeatureBounds::new("sttl", 0.0, 255.0, 8).unwrap(),
            FeatureBounds::new("sport", 0.0, 65535.0, 16).unwrap(),
        ];
        let tree = DecisionTree::new(
            0,
            vec![
                DecisionNode::split(0, 0, 100, 1, 2),
                DecisionNode::split(1, 1, 1024, 3, 4),
                DecisionNode::leaf(2, Reject),
                DecisionNode::leaf(3, Accept),
                DecisionNode::leaf(4, Reject),
            ],
        )
        .unwrap();
        let pipeline = compile(&tree, &bounds, CompileConfig::default()).unwrap();
        pipeline.validate().unwrap();

        let stage0 = &pipeline.tables[0].rules;
        assert_eq!((stage0[1].low, stage0[1].high), (101, 255));
        let stage1 = &pipeline.tables[1].rules;
        assert_eq!((stage1[1].low, stage1[1].high), (1025, 65535));

        let sttl = &bounds[0];
        let sport = &bounds[1];
        let raw = [
            (30.0, 80.0),
            (30.0, 1024.0),
            (30.0, 1025.0),
            (30.0, 65535.0),
            (254.0, 80.0),
        ];
        for (raw_sttl, raw_sport) in raw {
            let row = [sttl.transform(raw_sttl), sport.transform(raw_sport)];
            assert_eq!(pipeline.classify(&row).unwrap(), tree.evaluate(&row).unwrap());
        }
        assert_eq!(pipeline.classify(&[30, 1025]).unwrap(), Reject);
        assert_eq!(pipeline.classify(&[30, 1024]).unwrap(), Accept);
    }
}
