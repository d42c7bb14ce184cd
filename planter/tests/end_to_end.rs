//! Flow CSV -> bounds -> compiled pipeline -> image -> evaluation

use pipeline_format::{ClassLabel, ImageMetadata, PipelineImage};
use planter::{evaluate, render_commands, stratified_split, Dataset, PlanterConfig, QuantizedSet};
use quantizer::Quantizer;
use tree_compiler::{compile, DecisionTree};

fn flows() -> String {
    let mut csv = String::from("sttl,sport,dsport,sbytes,dbytes,attack_cat\n");
    for i in 0..200u32 {
        let attack = i % 3 == 0;
        let sttl = if attack { 254 } else { 31 + i % 30 };
        let category = if attack { "Exploits" } else { "" };
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            sttl,
            1024 + i,
            if attack { 80 } else { 53 },
            100 + i * 10,
            i,
            category
        ));
    }
    csv
}

const TREE: &str = r#"{
    "root": 0,
    "nodes": [
        {"kind": "internal", "id": 0, "feature_index": 0, "threshold": 100, "left": 1, "right": 2},
        {"kind": "leaf", "id": 1, "class_label": 0},
        {"kind": "internal", "id": 2, "feature_index": 2, "threshold": 255, "left": 3, "right": 4},
        {"kind": "leaf", "id": 3, "class_label": 1},
        {"kind": "leaf", "id": 4, "class_label": 0}
    ]
}"#;

#[test]
fn test_full_flow() {
    let config = PlanterConfig::default();
    let dataset = Dataset::read_csv(flows().as_bytes(), &config).unwrap();
    assert_eq!(dataset.label_counts(), (133, 67));

    let quantizer = Quantizer::fit_rows(
        dataset.feature_names.as_slice(),
        &dataset.rows,
        config.quantizer_config().unwrap(),
    )
    .unwrap();
    let quantized = quantizer.transform_matrix(&dataset.rows).unwrap();
    // sttl spans [31, 254]: attacks sit at the top of the domain
    assert!(quantized
        .iter()
        .zip(&dataset.labels)
        .all(|(row, &l)| (row[0] == 255) == (l == ClassLabel::Reject)));

    let (train_idx, test_idx) = stratified_split(&dataset.labels, config.test_size, config.random_state);
    let test = QuantizedSet::select(&dataset.feature_names, &quantized, &dataset.labels, &test_idx);
    assert_eq!(train_idx.len() + test_idx.len(), 200);

    let tree: DecisionTree = serde_json::from_str(TREE).unwrap();
    let pipeline = compile(&tree, quantizer.bounds(), config.compile_config()).unwrap();
    assert_eq!(pipeline.stage_count(), 2);

    let names: Vec<String> = quantizer.feature_names().into_iter().map(String::from).collect();
    let commands = render_commands(&pipeline, &names);
    assert_eq!(commands.len(), pipeline.rule_count());
    assert_eq!(commands[0], "table_add stage0_sttl set_class 0 0->100 => 1 0 1");
    assert!(commands.iter().any(|c| c.starts_with("table_add stage1_dsport")));

    let metadata = ImageMetadata {
        created_at: "unix:0".to_string(),
        tree_depth: tree.depth().unwrap(),
        leaf_count: tree.leaf_count(),
        notes: String::new(),
    };
    let image = PipelineImage::new(pipeline, quantizer.bounds().to_vec(), metadata, 0).unwrap();
    let image = PipelineImage::from_bytes(&image.to_bytes().unwrap()).unwrap();

    let eval = evaluate(&tree, &image.pipeline, &test).unwrap();
    assert_eq!(eval.samples, test.rows.len());
    assert_eq!(eval.accuracy(), 1.0);
    assert_eq!(eval.agreement(), 1.0);

    assert_eq!(
        image.classify_raw(&[254.0, 2000.0, 80.0, 500.0, 1.0]).unwrap(),
        ClassLabel::Reject
    );
    assert_eq!(
        image.classify_raw(&[40.0, 2000.0, 53.0, 500.0, 1.0]).unwrap(),
        ClassLabel::Accept
    );
}
