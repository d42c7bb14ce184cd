//! Inspect a .pipeline image

use log::error;
use pipeline_format::PipelineImage;
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: inspect <pipeline_file> [raw feature values...]");
        return ExitCode::FAILURE;
    }

    let path = &args[1];
    println!("Loading {}...", path);

    let image = match PipelineImage::read_from(path) {
        Ok(image) => image,
        Err(e) => {
            error!("failed to load {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    println!("\n=== Header ===");
    println!("Magic: {:?}", std::str::from_utf8(&image.header.magic).unwrap_or("???"));
    println!("Version: {}", image.header.version);
    println!("Widest match field: {} bits", image.header.bit_width);
    println!("Stages: {}", image.header.stage_count);
    println!("Features: {}", image.header.feature_count);
    println!("Created: {}", image.header.created_at_unix);

    println!("\n=== Bounds ===");
    for (i, b) in image.bounds.iter().enumerate() {
        println!("f{} {:<12} [{}, {}]{}", i, b.name(), b.min(), b.max(),
                 if b.is_degenerate() { " (constant)" } else { "" });
    }

    println!("\n=== Stages ===");
    for table in &image.pipeline.tables {
        println!("Stage {}: {} rules, {} nodes, features {:?}",
                 table.stage_index,
                 table.rules.len(),
                 table.match_nodes().len(),
                 table.features());
    }
    println!("Leaves: {}", image.pipeline.actions.len());

    println!("\n=== Metadata ===");
    println!("{:#?}", image.metadata);

    if args.len() > 2 {
        let features: Result<Vec<f64>, _> = args[2..].iter().map(|a| a.parse::<f64>()).collect();
        let features = match features {
            Ok(f) => f,
            Err(e) => {
                error!("feature values must be numbers: {}", e);
                return ExitCode::FAILURE;
            }
        };

        println!("\n=== Test Classification ===");
        match image.classify_raw(&features) {
            Ok(label) => println!("Input: {:?} -> class {} ({:?})", features, label.code(), label),
            Err(e) => {
                error!("classification failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
