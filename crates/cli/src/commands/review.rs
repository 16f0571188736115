use spendshield_ledger::Ledger;

use crate::commands::print_json;
use crate::{store, Context, OutputFormat};

pub(crate) async fn cmd_review(
    ctx: &Context,
    flag_id: u64,
    notes: Option<&str>,
) -> Result<i32, String> {
    let ledger = store::open(&ctx.ledger)?;
    let flag = ledger
        .review_flag(flag_id, notes)
        .await
        .map_err(|e| e.to_string())?;
    store::save(&ctx.ledger, &ledger).await?;

    match ctx.output {
        OutputFormat::Json => print_json(&flag)?,
        OutputFormat::Text => {
            if !ctx.quiet {
                println!(
                    "flag #{} ({} on thread {}) marked reviewed",
                    flag.flag_id, flag.flag_type, flag.thread_id
                );
            }
        }
    }
    Ok(0)
}
