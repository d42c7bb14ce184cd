//! Quantize a flow-record CSV
//!
//! Fits per-feature bounds once over the whole dataset, quantizes every row
//! with them and writes a stratified train/test split.

use log::{error, info};
use planter::config::split_config_arg;
use planter::{config_from_args, stratified_split, Dataset, QuantizedSet};
use quantizer::Quantizer;
use serde_json::json;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;

fn run(args: &[String]) -> planter::Result<()> {
    let (config, args) = config_from_args(args)?;
    let (input, out_dir) = (&args[0], Path::new(&args[1]));

    println!("Loading {}...", input);
    let dataset = Dataset::read_csv(File::open(input)?, &config)?;
    let (benign, attacks) = dataset.label_counts();
    println!("  {} samples, features {:?}", dataset.len(), dataset.feature_names);
    println!("  Labels: Normal={}, Attack={}", benign, attacks);

    println!("Quantizing features to {}-bit...", config.quantize_bits);
    let quantizer = Quantizer::fit_rows(dataset.feature_names.as_slice(), &dataset.rows, config.quantizer_config()?)?;
    let quantized = quantizer.transform_matrix(&dataset.rows)?;

    let (train_idx, test_idx) = stratified_split(&dataset.labels, config.test_size, config.random_state);
    let train = QuantizedSet::select(&dataset.feature_names, &quantized, &dataset.labels, &train_idx);
    let test = QuantizedSet::select(&dataset.feature_names, &quantized, &dataset.labels, &test_idx);
    println!("  Train: {}, Test: {}", train.rows.len(), test.rows.len());

    fs::create_dir_all(out_dir)?;
    quantizer.save_json(out_dir.join("bounds.json"))?;
    train.write_csv(BufWriter::new(File::create(out_dir.join("train.csv"))?))?;
    test.write_csv(BufWriter::new(File::create(out_dir.join("test.csv"))?))?;

    let metadata = json!({
        "features": dataset.feature_names,
        "label_mapping": { "Normal": 0, "Attack": 1 },
        "config": {
            "binary": config.binary_classification,
            "quantize_bits": config.quantize_bits,
            "num_classes": 2,
        },
        "train_samples": train.rows.len(),
        "test_samples": test.rows.len(),
    });
    serde_json::to_writer_pretty(File::create(out_dir.join("metadata.json"))?, &metadata)?;

    info!("wrote bounds, splits and metadata to {}", out_dir.display());
    println!("Saved dataset to {}", out_dir.display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let positional = split_config_arg(&args).map_or(0, |(_, rest)| rest.len());
    if positional < 2 {
        eprintln!("Usage: quantize <flows.csv> <out_dir> [--config <config.json>]");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
