use std::path::Path;

use spendshield_ledger::MemoryLedger;

use crate::commands::print_json;
use crate::{seed, store, Context, OutputFormat};

pub(crate) async fn cmd_seed(ctx: &Context, path: &Path, force: bool) -> Result<i32, String> {
    if path.exists() && !force {
        return Err(format!(
            "'{}' already exists; pass --force to overwrite",
            path.display()
        ));
    }
    let snapshot = seed::demo_snapshot();
    let (vendors, expenditures) = (snapshot.vendors.len(), snapshot.expenditures.len());
    let ledger = MemoryLedger::from_snapshot(snapshot).map_err(|e| e.to_string())?;
    store::save(path, &ledger).await?;

    match ctx.output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "vendors": vendors,
            "expenditures": expenditures,
        }))?,
        OutputFormat::Text => {
            if !ctx.quiet {
                println!(
                    "wrote demo ledger to {} ({vendors} vendors, {expenditures} expenditures)",
                    path.display()
                );
            }
        }
    }
    Ok(0)
}
