//! BMv2 runtime CLI rendering
//!
//! One `table_add` per range rule. Each stage gets one table per feature it
//! reads, keyed on `(current node, feature value)`:
//!
//! ```text
//! table_add stage0_sttl set_node 0 0->64 => 1 1
//! table_add stage0_sttl set_class 0 65->255 => 2 1 2
//! ```
//!
//! `set_node` writes the next node into the token; `set_class` writes the
//! leaf id and its class. The trailing number is the entry priority that
//! range tables require.

use pipeline_format::{Pipeline, RangeRule};

fn table_name(stage: usize, rule: &RangeRule, feature_names: &[String]) -> String {
    match feature_names.get(rule.feature_index) {
        Some(name) => format!("stage{}_{}", stage, name),
        None => format!("stage{}_f{}", stage, rule.feature_index),
    }
}

/// Render every rule of the pipeline as runtime CLI commands.
pub fn render_commands(pipeline: &Pipeline, feature_names: &[String]) -> Vec<String> {
    let mut lines = Vec::with_capacity(pipeline.rule_count() + 1);

    if let Some(&label) = pipeline.actions.get(&pipeline.entry_node) {
        // no split at all: the class is a constant
        lines.push(format!(
            "table_set_default classify set_class {} {}",
            pipeline.entry_node,
            label.code()
        ));
        return lines;
    }

    for table in &pipeline.tables {
        for (priority, rule) in table.rules.iter().enumerate() {
            let name = table_name(table.stage_index, rule, feature_names);
            let (verb, params) = match pipeline.actions.get(&rule.result) {
                Some(label) => ("set_class", format!("{} {}", rule.result, label.code())),
                None => ("set_node", rule.result.to_string()),
            };
            lines.push(format!(
                "table_add {} {} {} {}->{} => {} {}",
                name,
                verb,
                rule.match_node,
                rule.low,
                rule.high,
                params,
                priority + 1
            ));
        }
    }
    lines
}
