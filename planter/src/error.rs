//! Tool-level error type

use pipeline_format::{FormatError, PipelineError};
use quantizer::QuantizeError;
use std::io;
use tree_compiler::{CompileError, TreeError};

#[derive(Debug, thiserror::Error)]
pub enum PlanterError {
    #[error("I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Quantize(#[from] QuantizeError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no label column found (expected `attack_cat` or `Label`)")]
    NoLabelColumn,

    #[error("only {found} usable feature columns, need at least {needed}")]
    NotEnoughFeatures { found: usize, needed: usize },

    #[error("column `{0}` not found")]
    MissingColumn(String),

    #[error("row {row}, column `{column}`: `{value}` is not a valid value")]
    BadCell {
        row: usize,
        column: String,
        value: String,
    },

    #[error("{what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, PlanterError>;
