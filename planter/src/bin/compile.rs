//! Compile a trained tree into a switch pipeline
//!
//! Writes the pipeline image and the runtime CLI commands, and optionally
//! evaluates the pipeline on a quantized test split.

use log::{error, info};
use pipeline_format::{ImageMetadata, PipelineImage};
use planter::config::split_config_arg;
use planter::{config_from_args, evaluate, render_commands, PipelineSummary, PlanterError, QuantizedSet};
use quantizer::Quantizer;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;
use tree_compiler::{compile, CompileError, DecisionTree};

fn run(args: &[String]) -> planter::Result<()> {
    let (config, args) = config_from_args(args)?;
    let out_dir = Path::new(&args[2]);

    let tree: DecisionTree = serde_json::from_reader(BufReader::new(File::open(&args[0])?))?;
    let quantizer = Quantizer::load_json(&args[1])?;
    let feature_names: Vec<String> = quantizer.feature_names().into_iter().map(String::from).collect();

    let pipeline = match compile(&tree, quantizer.bounds(), config.compile_config()) {
        Ok(p) => p,
        Err(CompileError::StageBudgetExceeded { depth, max_stages }) => {
            error!(
                "tree depth {} does not fit {} stages; retrain with max_depth <= {}",
                depth, max_stages, max_stages
            );
            return Err(CompileError::StageBudgetExceeded { depth, max_stages }.into());
        }
        Err(e) => return Err(e.into()),
    };

    let summary = PipelineSummary::new(&tree, &pipeline)?;
    println!("\n=== Pipeline ===");
    print!("{}", summary);

    fs::create_dir_all(out_dir)?;
    let commands = render_commands(&pipeline, &feature_names);
    let mut out = BufWriter::new(File::create(out_dir.join("commands.txt"))?);
    for line in &commands {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;

    let created_at_unix = planter::unix_now();
    let metadata = ImageMetadata {
        created_at: format!("unix:{}", created_at_unix),
        tree_depth: summary.tree_depth,
        leaf_count: summary.leaf_count,
        notes: format!("compiled from {}", args[0]),
    };
    let image = PipelineImage::new(pipeline, quantizer.bounds().to_vec(), metadata, created_at_unix)?;
    image.write_to(out_dir.join("model.pipeline"))?;
    info!("wrote {} commands and pipeline image to {}", commands.len(), out_dir.display());

    println!("\nSample commands:");
    for line in commands.iter().take(6) {
        println!("  {}", line);
    }

    if let Some(test_path) = args.get(3) {
        let test = QuantizedSet::read_csv(BufReader::new(File::open(test_path)?))?;
        if test.feature_names != feature_names {
            return Err(PlanterError::Config(format!(
                "test features {:?} do not match bounds {:?}",
                test.feature_names, feature_names
            )));
        }
        let eval = evaluate(&tree, &image.pipeline, &test)?;
        println!("\n=== Evaluation ===");
        print!("{}", eval);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let positional = split_config_arg(&args).map_or(0, |(_, rest)| rest.len());
    if positional < 3 {
        eprintln!("Usage: compile <tree.json> <bounds.json> <out_dir> [test.csv] [--config <config.json>]");
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
