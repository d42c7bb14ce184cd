//! Compilation summary and held-out evaluation

use crate::dataset::QuantizedSet;
use crate::error::{PlanterError, Result};
use pipeline_format::{ClassLabel, Pipeline};
use std::fmt;
use tree_compiler::DecisionTree;

/// Shape of a tree and the pipeline it compiled to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub tree_depth: usize,
    pub leaf_count: usize,
    pub internal_count: usize,
    pub stages: usize,
    pub rules: usize,
    pub stage_features: Vec<Vec<usize>>,
}

impl PipelineSummary {
    pub fn new(tree: &DecisionTree, pipeline: &Pipeline) -> Result<Self> {
        Ok(Self {
            tree_depth: tree.depth()?,
            leaf_count: tree.leaf_count(),
            internal_count: tree.internal_count(),
            stages: pipeline.stage_count(),
            rules: pipeline.rule_count(),
            stage_features: pipeline.tables.iter().map(|t| t.features()).collect(),
        })
    }
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tree depth: {} (= pipeline stages)", self.tree_depth)?;
        writeln!(f, "Leaves: {}", self.leaf_count)?;
        writeln!(f, "Decision nodes: {}", self.internal_count)?;
        writeln!(f, "Stages: {}", self.stages)?;
        writeln!(f, "Table entries: {}", self.rules)?;
        for (stage, features) in self.stage_features.iter().enumerate() {
            writeln!(f, "  stage {}: features {:?}", stage, features)?;
        }
        Ok(())
    }
}

/// Confusion counts of the pipeline against true labels, plus agreement
/// with direct tree evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub samples: usize,
    pub true_accept: usize,
    pub false_accept: usize,
    pub true_reject: usize,
    pub false_reject: usize,
    /// Rows where pipeline and tree gave the same class
    pub agreements: usize,
}

impl Evaluation {
    pub fn record(&mut self, truth: ClassLabel, predicted: ClassLabel, tree: ClassLabel) {
        self.samples += 1;
        match (truth, predicted) {
            (ClassLabel::Accept, ClassLabel::Accept) => self.true_accept += 1,
            (ClassLabel::Reject, ClassLabel::Accept) => self.false_accept += 1,
            (ClassLabel::Reject, ClassLabel::Reject) => self.true_reject += 1,
            (ClassLabel::Accept, ClassLabel::Reject) => self.false_reject += 1,
        }
        if predicted == tree {
            self.agreements += 1;
        }
    }

    fn ratio(num: usize, den: usize) -> f64 {
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    }

    pub fn accuracy(&self) -> f64 {
        Self::ratio(self.true_accept + self.true_reject, self.samples)
    }

    /// Fraction of rejected rows that were attacks
    pub fn precision(&self) -> f64 {
        Self::ratio(self.true_reject, self.true_reject + self.false_reject)
    }

    /// Fraction of attacks that were rejected
    pub fn recall(&self) -> f64 {
        Self::ratio(self.true_reject, self.true_reject + self.false_accept)
    }

    pub fn agreement(&self) -> f64 {
        Self::ratio(self.agreements, self.samples)
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Samples: {}", self.samples)?;
        writeln!(f, "Accuracy: {:.4}", self.accuracy())?;
        writeln!(f, "Attack precision: {:.4}", self.precision())?;
        writeln!(f, "Attack recall: {:.4}", self.recall())?;
        writeln!(
            f,
            "Confusion: TA={} FA={} TR={} FR={}",
            self.true_accept, self.false_accept, self.true_reject, self.false_reject
        )?;
        writeln!(f, "Pipeline/tree agreement: {:.4}", self.agreement())
    }
}

/// Classify every row through the pipeline and the tree.
pub fn evaluate(tree: &DecisionTree, pipeline: &Pipeline, set: &QuantizedSet) -> Result<Evaluation> {
    if set.rows.len() != set.labels.len() {
        return Err(PlanterError::LengthMismatch {
            what: "labels per row",
            expected: set.rows.len(),
            actual: set.labels.len(),
        });
    }
    let mut eval = Evaluation::default();
    for (row, &truth) in set.rows.iter().zip(&set.labels) {
        let predicted = pipeline.classify(row)?;
        let direct = tree.evaluate(row)?;
        eval.record(truth, predicted, direct);
    }
    Ok(eval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantizer::FeatureBounds;
    use tree_compiler::{compile, CompileConfig, DecisionNode};

    fn stump() -> DecisionTree {
        DecisionTree::new(
            0,
            vec![
                DecisionNode::split(0, 0, 64, 1, 2),
                DecisionNode::leaf(1, ClassLabel::Accept),
                DecisionNode::leaf(2, ClassLabel::Reject),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_evaluate_stump() {
        let tree = stump();
        let bounds = vec![FeatureBounds::new("sttl", 0.0, 255.0, 8).unwrap()];
        let pipeline = compile(&tree, &bounds, CompileConfig::default()).unwrap();

        let set = QuantizedSet {
            feature_names: vec!["sttl".to_string()],
            rows: vec![vec![10], vec![64], vec![65], vec![254], vec![30]],
            labels: vec![
                ClassLabel::Accept,
                ClassLabel::Reject,
                ClassLabel::Reject,
                ClassLabel::Reject,
                ClassLabel::Accept,
            ],
        };
        let eval = evaluate(&tree, &pipeline, &set).unwrap();

        assert_eq!(eval.samples, 5);
        assert_eq!(eval.true_accept, 2);
        assert_eq!(eval.false_accept, 1);
        assert_eq!(eval.true_reject, 2);
        assert_eq!(eval.false_reject, 0);
        assert_eq!(eval.accuracy(), 0.8);
        assert_eq!(eval.precision(), 1.0);
        assert_eq!(eval.agreement(), 1.0);

        let summary = PipelineSummary::new(&tree, &pipeline).unwrap();
        assert_eq!(summary.tree_depth, 1);
        assert_eq!(summary.rules, 2);
        assert_eq!(summary.stage_features, vec![vec![0]]);
        assert!(summary.to_string().contains("Table entries: 2"));
    }

    #[test]
    fn test_empty_evaluation() {
        let eval = Evaluation::default();
        assert_eq!(eval.accuracy(), 0.0);
        assert_eq!(eval.recall(), 0.0);
    }
}
