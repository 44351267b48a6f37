use crate::output::{opt, print_json, print_table, ts};
use anyhow::Context;
use regen_core::trigger::{RuleOutcome, TriggerEvent};
use std::io::Read;
use std::path::Path;

pub fn run(root: &Path, event_path: &Path, json: bool) -> anyhow::Result<()> {
    let raw = if event_path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(event_path)
            .with_context(|| format!("failed to read {}", event_path.display()))?
    };
    let event: TriggerEvent = serde_json::from_str(&raw).context("failed to parse event")?;

    let pipeline = super::open_pipeline(root)?;
    let rt = super::runtime()?;
    let result = rt
        .block_on(pipeline.process_event(&event))
        .context("failed to save trigger state")?;
    let stats = pipeline.triggers().get_trigger_stats();

    if json {
        print_json(&serde_json::json!({
            "result": result,
            "stats": stats,
        }))?;
    } else {
        println!("event {}: {}", result.event_id, result.message);
        for eval in &result.rules {
            match &eval.outcome {
                RuleOutcome::Fired { actions } => {
                    println!("  {}: fired", eval.rule_id);
                    for a in actions {
                        let mark = if a.success { "ok" } else { "FAILED" };
                        println!("    [{mark}] {} {}", a.kind, a.message);
                    }
                }
                RuleOutcome::CoolingDown { remaining_secs } => {
                    println!("  {}: cooling down, {remaining_secs}s remaining", eval.rule_id)
                }
                RuleOutcome::ConditionFailed {
                    index,
                    condition,
                    reason,
                } => println!(
                    "  {}: condition #{index} ({condition}) not met: {reason}",
                    eval.rule_id
                ),
            }
        }
        if !stats.rules.is_empty() {
            println!();
            let rows = stats
                .rules
                .iter()
                .map(|r| {
                    vec![
                        r.rule_id.clone(),
                        r.fire_count.to_string(),
                        opt(r.last_fired.map(ts)),
                        opt(r.cooldown_remaining_secs.map(|s| format!("{s}s"))),
                    ]
                })
                .collect();
            print_table(&["RULE", "FIRED", "LAST FIRED", "COOLDOWN"], rows);
        }
    }

    if !result.success {
        anyhow::bail!("one or more actions failed");
    }
    Ok(())
}
