//! Flow-record CSV handling
//!
//! Reads the configured feature columns (unparseable cells become NaN and
//! are later quantized as 0), derives binary labels, and writes/reads the
//! quantized train/test files.

use crate::config::{PlanterConfig, UNSW_COLUMNS};
use crate::error::{PlanterError, Result};
use log::{info, warn};
use pipeline_format::ClassLabel;
use quantizer::QuantizedValue;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::io;

/// Fewer configured features than this triggers the numeric-column fallback
const MIN_FEATURES: usize = 3;

/// Columns taken by the numeric-column fallback
const FALLBACK_FEATURES: usize = 5;

const LABEL_COLUMNS: [&str; 2] = ["attack_cat", "Label"];

/// Raw feature rows with binary labels
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<ClassLabel>,
}

/// Quantized feature rows with binary labels
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedSet {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<QuantizedValue>>,
    pub labels: Vec<ClassLabel>,
}

fn parse_cell(cell: &str) -> f64 {
    cell.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// `attack_cat`: blank or anything mentioning "normal" is benign
fn label_from_category(cell: &str) -> ClassLabel {
    let category = cell.trim();
    if category.is_empty() || category.to_lowercase().contains("normal") {
        ClassLabel::Accept
    } else {
        ClassLabel::Reject
    }
}

/// `Label`: 1 is an attack, anything else is benign
fn label_from_flag(cell: &str) -> ClassLabel {
    match cell.trim().parse::<f64>() {
        Ok(v) if v == 1.0 => ClassLabel::Reject,
        _ => ClassLabel::Accept,
    }
}

fn is_numeric_column(records: &[csv::StringRecord], column: usize) -> bool {
    let mut parsed = 0;
    for record in records {
        let cell = record.get(column).unwrap_or("").trim();
        if cell.is_empty() {
            continue;
        }
        if cell.parse::<f64>().is_err() {
            return false;
        }
        parsed += 1;
    }
    parsed > 0
}

impl Dataset {
    pub fn read_csv<R: io::Read>(reader: R, config: &PlanterConfig) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(config.has_headers)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = if config.has_headers {
            rdr.headers()?.iter().map(|h| h.trim().to_string()).collect()
        } else {
            UNSW_COLUMNS.iter().map(|h| h.to_string()).collect()
        };
        let records = rdr.records().collect::<std::result::Result<Vec<_>, _>>()?;
        let position = |name: &str| headers.iter().position(|h| h == name);

        let mut features: Vec<usize> = config
            .p4_features
            .iter()
            .filter_map(|name| position(name.as_str()))
            .collect();
        if features.len() < MIN_FEATURES {
            warn!(
                "only {} configured features present, falling back to numeric columns",
                features.len()
            );
            features = (0..headers.len())
                .filter(|&c| !LABEL_COLUMNS.contains(&headers[c].as_str()))
                .filter(|&c| is_numeric_column(&records, c))
                .take(FALLBACK_FEATURES)
                .collect();
        }
        if features.is_empty() {
            return Err(PlanterError::NotEnoughFeatures {
                found: 0,
                needed: 1,
            });
        }

        let labeler: (usize, fn(&str) -> ClassLabel) = match (position("attack_cat"), position("Label")) {
            (Some(c), _) => (c, label_from_category),
            (None, Some(c)) => (c, label_from_flag),
            (None, None) => return Err(PlanterError::NoLabelColumn),
        };

        let mut rows = Vec::with_capacity(records.len());
        let mut labels = Vec::with_capacity(records.len());
        for record in &records {
            rows.push(
                features
                    .iter()
                    .map(|&c| parse_cell(record.get(c).unwrap_or("")))
                    .collect(),
            );
            labels.push((labeler.1)(record.get(labeler.0).unwrap_or("")));
        }

        let feature_names: Vec<String> = features.iter().map(|&c| headers[c].clone()).collect();
        info!(
            "loaded {} samples with features {:?}",
            rows.len(),
            feature_names
        );
        Ok(Self {
            feature_names,
            rows,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(benign, attack)` counts
    pub fn label_counts(&self) -> (usize, usize) {
        let attacks = self.labels.iter().filter(|&&l| l == ClassLabel::Reject).count();
        (self.labels.len() - attacks, attacks)
    }
}

/// Split row indices into `(train, test)`, keeping the class ratio in both.
pub fn stratified_split(labels: &[ClassLabel], test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [ClassLabel::Accept, ClassLabel::Reject] {
        let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        members.shuffle(&mut rng);
        let n_test = ((members.len() as f64) * test_size).round() as usize;
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

impl QuantizedSet {
    pub fn select(feature_names: &[String], rows: &[Vec<QuantizedValue>], labels: &[ClassLabel], idx: &[usize]) -> Self {
        Self {
            feature_names: feature_names.to_vec(),
            rows: idx.iter().map(|&i| rows[i].clone()).collect(),
            labels: idx.iter().map(|&i| labels[i]).collect(),
        }
    }

    /// Feature columns followed by a `label` column
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header: Vec<&str> = self.feature_names.iter().map(String::as_str).collect();
        header.push("label");
        wtr.write_record(&header)?;

        for (row, label) in self.rows.iter().zip(&self.labels) {
            let mut record: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            record.push(label.code().to_string());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn read_csv<R: io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if headers.last().map(String::as_str) != Some("label") {
            return Err(PlanterError::MissingColumn("label".to_string()));
        }
        let feature_names = headers[..headers.len() - 1].to_vec();

        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            if record.len() != headers.len() {
                return Err(PlanterError::LengthMismatch {
                    what: "quantized CSV record width",
                    expected: headers.len(),
                    actual: record.len(),
                });
            }
            let mut row = Vec::with_capacity(feature_names.len());
            for (cell, name) in record.iter().zip(&headers) {
                let bad = || PlanterError::BadCell {
                    row: i,
                    column: name.clone(),
                    value: cell.to_string(),
                };
                if name == "label" {
                    let code = cell.trim().parse::<u8>().map_err(|_| bad())?;
                    labels.push(ClassLabel::try_from(code).map_err(|_| bad())?);
                } else {
                    row.push(cell.trim().parse::<QuantizedValue>().map_err(|_| bad())?);
                }
            }
            rows.push(row);
        }

        Ok(Self {
            feature_names,
            rows,
            labels,
        })
    }
}
