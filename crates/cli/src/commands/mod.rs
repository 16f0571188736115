pub(crate) mod analyze;
pub(crate) mod audit;
pub(crate) mod audits;
pub(crate) mod review;
pub(crate) mod seed;

use serde::Serialize;
use spendshield_engine::{AuditReport, RunStatus};

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

pub(crate) fn print_report(report: &AuditReport) {
    let status = match report.status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
    };
    println!("thread:    {}", report.thread_id);
    println!("document:  {}", report.document_name);
    println!("status:    {status} ({})", report.outcome);
    match (report.fraud_risk_score, report.risk_level) {
        (Some(score), Some(level)) => println!("risk:      {score} ({level})"),
        _ => println!("risk:      not assessed"),
    }

    if !report.anomalies.is_empty() {
        println!("anomalies:");
        for a in &report.anomalies {
            println!("  [{}] {}: {}", a.severity, a.flag_type, a.description);
        }
    }
    if !report.recommendations.is_empty() {
        println!("recommendations:");
        for r in &report.recommendations {
            println!("  - {r}");
        }
    }
    if !report.errors.is_empty() {
        println!("errors:");
        for e in &report.errors {
            println!("  - {e}");
        }
    }
}
