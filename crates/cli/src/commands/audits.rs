use spendshield_ledger::Ledger;

use crate::commands::print_json;
use crate::{store, Context, OutputFormat};

pub(crate) async fn cmd_audits(ctx: &Context, limit: usize) -> Result<i32, String> {
    let ledger = store::open(&ctx.ledger)?;
    let audits = ledger.list_audits(limit).await.map_err(|e| e.to_string())?;

    match ctx.output {
        OutputFormat::Json => print_json(&audits)?,
        OutputFormat::Text => {
            if audits.is_empty() {
                if !ctx.quiet {
                    println!("no audits recorded");
                }
                return Ok(0);
            }
            println!("{:<38} {:>7} {:>6}  FLAGGED AT", "THREAD", "SCORE", "FLAGS");
            for a in &audits {
                println!(
                    "{:<38} {:>7} {:>6}  {}",
                    a.thread_id,
                    a.fraud_risk_score.to_string(),
                    a.anomaly_count,
                    a.flagged_at
                );
            }
        }
    }
    Ok(0)
}
