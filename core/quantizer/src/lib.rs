//! Feature Quantizer
//!
//! Maps continuous feature columns onto the fixed-width unsigned integer
//! domain that a switch stage can range-match against.
//! Bounds are fitted once on the training columns and reused verbatim for
//! every later row (test rows included).

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

#[cfg(test)]
mod proptests;

/// Default quantization width (0-255)
pub const DEFAULT_BIT_WIDTH: u8 = 8;

/// Widest domain a `QuantizedValue` can carry
pub const MAX_BIT_WIDTH: u8 = 32;

/// Rows per parallel chunk when fitting row-major data
const ROW_CHUNK: usize = 4096;

/// Quantized feature value, always inside `[0, 2^bit_width - 1]`
pub type QuantizedValue = u32;

/// Quantization errors
#[derive(Debug, thiserror::Error)]
pub enum QuantizeError {
    #[error("feature `{feature}` has no finite values to fit bounds on")]
    EmptyColumn { feature: String },

    #[error("invalid bit width: {0} (must be in 1..=32)")]
    InvalidBitWidth(u8),

    #[error("invalid bounds for feature `{feature}`: min={min}, max={max}")]
    InvalidBounds { feature: String, min: f64, max: f64 },

    #[error("expected {expected} feature columns, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("bounds file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("bounds file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QuantizeError>;

/// Largest code representable in `bit_width` bits.
pub fn max_code(bit_width: u8) -> QuantizedValue {
    let bits = u32::from(bit_width.min(MAX_BIT_WIDTH));
    ((1u64 << bits) - 1) as QuantizedValue
}

/// Quantization settings, passed explicitly into every fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizerConfig {
    pub bit_width: u8,
}

impl QuantizerConfig {
    pub fn new(bit_width: u8) -> Result<Self> {
        if bit_width == 0 || bit_width > MAX_BIT_WIDTH {
            return Err(QuantizeError::InvalidBitWidth(bit_width));
        }
        Ok(Self { bit_width })
    }

    pub fn max_code(&self) -> QuantizedValue {
        max_code(self.bit_width)
    }
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            bit_width: DEFAULT_BIT_WIDTH,
        }
    }
}

/// Observed range of one feature column.
///
/// Immutable once fitted. Deserialization goes through the same checks as
/// [`FeatureBounds::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds")]
pub struct FeatureBounds {
    name: String,
    min: f64,
    max: f64,
    bit_width: u8,
}

#[derive(Deserialize)]
struct RawBounds {
    name: String,
    min: f64,
    max: f64,
    bit_width: u8,
}

impl TryFrom<RawBounds> for FeatureBounds {
    type Error = QuantizeError;

    fn try_from(raw: RawBounds) -> Result<Self> {
        FeatureBounds::new(raw.name, raw.min, raw.max, raw.bit_width)
    }
}

impl FeatureBounds {
    pub fn new(name: impl Into<String>, min: f64, max: f64, bit_width: u8) -> Result<Self> {
        let name = name.into();
        QuantizerConfig::new(bit_width)?;
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(QuantizeError::InvalidBounds { feature: name, min, max });
        }
        Ok(Self {
            name,
            min,
            max,
            bit_width,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn bit_width(&self) -> u8 {
        self.bit_width
    }

    /// Largest quantized code for this feature
    pub fn max_code(&self) -> QuantizedValue {
        max_code(self.bit_width)
    }

    /// Constant column: every value quantizes to 0
    pub fn is_degenerate(&self) -> bool {
        self.min == self.max
    }

    /// Whether `value` lies in this feature's quantized domain
    pub fn contains(&self, value: QuantizedValue) -> bool {
        value <= self.max_code()
    }

    pub fn transform(&self, value: f64) -> QuantizedValue {
        transform(value, self)
    }
}

/// Running min/max over a column; mergeable for parallel reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningBounds {
    min: f64,
    max: f64,
    finite: usize,
    skipped: usize,
}

impl RunningBounds {
    pub fn new() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            finite: 0,
            skipped: 0,
        }
    }

    /// Update bounds from a value; non-finite values are counted, not used
    pub fn observe(&mut self, value: f64) {
        if value.is_finite() {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
            self.finite += 1;
        } else {
            self.skipped += 1;
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            finite: self.finite + other.finite,
            skipped: self.skipped + other.skipped,
        }
    }

    pub fn finite_count(&self) -> usize {
        self.finite
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped
    }

    pub fn finish(self, name: &str, config: QuantizerConfig) -> Result<FeatureBounds> {
        if self.finite == 0 {
            return Err(QuantizeError::EmptyColumn {
                feature: name.to_string(),
            });
        }
        if self.skipped > 0 {
            warn!(
                "feature `{}`: {} non-finite values excluded from bounds",
                name, self.skipped
            );
        }
        let bounds = FeatureBounds::new(name, self.min, self.max, config.bit_width)?;
        if bounds.is_degenerate() {
            warn!(
                "feature `{}` is constant ({}); it quantizes to 0",
                name, bounds.min
            );
        }
        debug!(
            "fitted `{}`: [{}, {}] over {} values",
            name, bounds.min, bounds.max, self.finite
        );
        Ok(bounds)
    }
}

impl Default for RunningBounds {
    fn default() -> Self {
        Self::new()
    }
}

/// Fit bounds over the finite values of a column.
pub fn fit(name: &str, column: &[f64], config: QuantizerConfig) -> Result<FeatureBounds> {
    let mut running = RunningBounds::new();
    for &value in column {
        running.observe(value);
    }
    running.finish(name, config)
}

/// Same as [`fit`], reducing per-chunk bounds computed in parallel.
pub fn fit_parallel(
    name: &str,
    column: &[f64],
    config: QuantizerConfig,
    chunk_size: usize,
) -> Result<FeatureBounds> {
    column
        .par_chunks(chunk_size.max(1))
        .map(|chunk| {
            let mut running = RunningBounds::new();
            for &value in chunk {
                running.observe(value);
            }
            running
        })
        .reduce(RunningBounds::new, RunningBounds::merge)
        .finish(name, config)
}

/// Quantize one value against fitted bounds.
///
/// Min-max scale, truncate toward zero, clamp to `[0, 2^bit_width - 1]`.
/// Non-finite input is replaced by 0.0 before scaling. Never fails.
pub fn transform(value: f64, bounds: &FeatureBounds) -> QuantizedValue {
    if bounds.is_degenerate() {
        return 0;
    }
    let value = if value.is_finite() { value } else { 0.0 };
    let top = bounds.max_code();
    let span = bounds.max - bounds.min;
    let fraction = if span.is_finite() {
        (value - bounds.min) / span
    } else {
        // span past f64::MAX: halving is exact and brings it back in range
        (value / 2.0 - bounds.min / 2.0) / (bounds.max / 2.0 - bounds.min / 2.0)
    };
    let scaled = fraction * f64::from(top);

    if scaled.is_nan() || scaled <= 0.0 {
        0
    } else if scaled >= f64::from(top) {
        top
    } else {
        scaled.trunc() as QuantizedValue
    }
}

/// Fitted bounds for every feature of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantizer {
    bounds: Vec<FeatureBounds>,
}

impl Quantizer {
    pub fn from_bounds(bounds: Vec<FeatureBounds>) -> Self {
        Self { bounds }
    }

    /// Fit column-major data, one rayon task per column
    pub fn fit_columns<S>(names: &[S], columns: &[Vec<f64>], config: QuantizerConfig) -> Result<Self>
    where
        S: AsRef<str> + Sync,
    {
        if names.len() != columns.len() {
            return Err(QuantizeError::ColumnCountMismatch {
                expected: names.len(),
                actual: columns.len(),
            });
        }
        let bounds = names
            .par_iter()
            .zip(columns.par_iter())
            .map(|(name, column)| fit(name.as_ref(), column, config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { bounds })
    }

    /// Fit row-major data: each chunk of rows keeps local running bounds,
    /// merged at the end
    pub fn fit_rows<S>(names: &[S], rows: &[Vec<f64>], config: QuantizerConfig) -> Result<Self>
    where
        S: AsRef<str> + Sync,
    {
        let width = names.len();
        if let Some(row) = rows.iter().find(|row| row.len() != width) {
            return Err(QuantizeError::ColumnCountMismatch {
                expected: width,
                actual: row.len(),
            });
        }

        let running = rows
            .par_chunks(ROW_CHUNK)
            .map(|chunk| {
                let mut local = vec![RunningBounds::new(); width];
                for row in chunk {
                    for (acc, &value) in local.iter_mut().zip(row) {
                        acc.observe(value);
                    }
                }
                local
            })
            .reduce(
                || vec![RunningBounds::new(); width],
                |a, b| a.into_iter().zip(b).map(|(x, y)| x.merge(y)).collect(),
            );

        let bounds = names
            .iter()
            .zip(running)
            .map(|(name, acc)| acc.finish(name.as_ref(), config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { bounds })
    }

    pub fn bounds(&self) -> &[FeatureBounds] {
        &self.bounds
    }

    pub fn feature_count(&self) -> usize {
        self.bounds.len()
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.bounds.iter().map(FeatureBounds::name).collect()
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<QuantizedValue>> {
        if row.len() != self.bounds.len() {
            return Err(QuantizeError::ColumnCountMismatch {
                expected: self.bounds.len(),
                actual: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(&self.bounds)
            .map(|(&value, bounds)| transform(value, bounds))
            .collect())
    }

    /// Quantize a row-major matrix in parallel with the fitted bounds.
    pub fn transform_matrix(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<QuantizedValue>>> {
        let quantized = rows
            .par_iter()
            .map(|row| self.transform_row(row))
            .collect::<Result<Vec<_>>>()?;

        let non_finite = rows
            .par_iter()
            .map(|row| row.iter().filter(|v| !v.is_finite()).count())
            .sum::<usize>();
        if non_finite > 0 {
            warn!("{} non-finite values quantized as 0.0", non_finite);
        }
        Ok(quantized)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.bounds)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let bounds: Vec<FeatureBounds> = serde_json::from_reader(reader)?;
        Ok(Self { bounds })
    }
}
