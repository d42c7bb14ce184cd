//! Tree Compiler
//!
//! Flattens a quantized binary decision tree into stage-ordered
//! match-action tables for a fixed-pipeline switch.

mod compile;
mod tree;

pub use compile::{compile, CompileConfig, CompileError, DEFAULT_MAX_STAGES};
pub use tree::{DecisionNode, DecisionTree, TreeError};
