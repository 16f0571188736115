use std::sync::Arc;

use spendshield_engine::{JsonExtractor, Pipeline};
use spendshield_ledger::Ledger;

use crate::commands::{print_json, print_report};
use crate::{config, store, Context, OutputFormat};

pub(crate) async fn cmd_audit(ctx: &Context, thread_id: &str) -> Result<i32, String> {
    let config = config::load(&ctx.config)?;
    let ledger = store::open(&ctx.ledger)?;
    let pipeline = Pipeline::new(
        ledger.clone(),
        ledger.clone(),
        Arc::new(JsonExtractor::new()),
        config,
    )
    .map_err(|e| e.to_string())?;

    let report = pipeline
        .report(thread_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no audit found for thread '{thread_id}'"))?;
    let flags = ledger
        .flags_for_thread(thread_id)
        .await
        .map_err(|e| e.to_string())?;

    match ctx.output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "report": report,
            "flags": flags,
        }))?,
        OutputFormat::Text => {
            print_report(&report);
            if !flags.is_empty() {
                println!("persisted flags:");
                for f in &flags {
                    let reviewed = if f.reviewed { "reviewed" } else { "open" };
                    println!(
                        "  #{} [{}] {} ({reviewed}) at {}",
                        f.flag_id, f.severity, f.flag_type, f.flagged_at
                    );
                    if let Some(notes) = &f.reviewer_notes {
                        println!("      notes: {notes}");
                    }
                }
            }
        }
    }
    Ok(0)
}
