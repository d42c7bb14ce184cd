//! Tool configuration
//!
//! Loaded from an optional JSON file; every field has a default.

use crate::error::{PlanterError, Result};
use quantizer::QuantizerConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tree_compiler::CompileConfig;

/// UNSW-NB15 column names, used for header-less CSV files
pub const UNSW_COLUMNS: [&str; 49] = [
    "srcip", "sport", "dstip", "dsport", "proto", "state", "dur", "sbytes",
    "dbytes", "sttl", "dttl", "sloss", "dloss", "service", "Sload", "Dload",
    "Spkts", "Dpkts", "swin", "dwin", "stcpb", "dtcpb", "smeansz", "dmeansz",
    "trans_depth", "res_bdy_len", "Sjit", "Djit", "Stime", "Ltime", "Sintpkt",
    "Dintpkt", "tcprtt", "synack", "ackdat", "is_sm_ips_ports", "ct_state_ttl",
    "ct_flw_http_mthd", "is_ftp_login", "ct_ftp_cmd", "ct_srv_src", "ct_srv_dst",
    "ct_dst_ltm", "ct_src_ltm", "ct_src_dport_ltm", "ct_dst_sport_ltm",
    "ct_dst_src_ltm", "attack_cat", "Label",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanterConfig {
    /// Features extractable from packet headers or counters
    pub p4_features: Vec<String>,
    /// Tree depth limit, one pipeline stage per level
    pub max_tree_depth: usize,
    pub quantize_bits: u8,
    pub test_size: f64,
    pub random_state: u64,
    pub binary_classification: bool,
    /// When false, raw UNSW-NB15 column names are assumed
    pub has_headers: bool,
}

impl Default for PlanterConfig {
    fn default() -> Self {
        Self {
            p4_features: ["sttl", "sport", "dsport", "sbytes", "dbytes"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_tree_depth: 5,
            quantize_bits: 8,
            test_size: 0.2,
            random_state: 42,
            binary_classification: true,
            has_headers: true,
        }
    }
}

impl PlanterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        QuantizerConfig::new(self.quantize_bits)?;
        if !self.binary_classification {
            return Err(PlanterError::Config(
                "only binary classification is supported".to_string(),
            ));
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(PlanterError::Config(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        if self.p4_features.is_empty() {
            return Err(PlanterError::Config("p4_features is empty".to_string()));
        }
        Ok(())
    }

    pub fn quantizer_config(&self) -> Result<QuantizerConfig> {
        Ok(QuantizerConfig::new(self.quantize_bits)?)
    }

    pub fn compile_config(&self) -> CompileConfig {
        CompileConfig {
            max_stages: self.max_tree_depth,
        }
    }
}

/// Pull `--config <path>` out of the argument list.
pub fn split_config_arg(args: &[String]) -> Result<(Option<String>, Vec<String>)> {
    let mut config = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter
                .next()
                .ok_or_else(|| PlanterError::Config("--config needs a path".to_string()))?;
            config = Some(path.clone());
        } else {
            rest.push(arg.clone());
        }
    }
    Ok((config, rest))
}

/// Load the config named on the command line, or the defaults.
pub fn config_from_args(args: &[String]) -> Result<(PlanterConfig, Vec<String>)> {
    let (path, rest) = split_config_arg(args)?;
    let config = match path {
        Some(path) => PlanterConfig::load(path)?,
        None => PlanterConfig::default(),
    };
    Ok((config, rest))
}
