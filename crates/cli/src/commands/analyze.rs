use std::path::PathBuf;
use std::sync::Arc;

use spendshield_engine::extractor::DocumentFormat;
use spendshield_engine::{
    cancellation, AuditReport, DocumentExtractor, JsonExtractor, Pipeline, RawDocument, RiskLevel,
    RunOptions,
};
use spendshield_ledger::date::parse_date;
use spendshield_ledger::PooledLedger;
use tracing::warn;

use crate::commands::{print_json, print_report};
use crate::{config, store, Context, ExtractorKind, FailLevel, OutputFormat};

pub(crate) struct AnalyzeArgs {
    pub document: PathBuf,
    pub thread_id: Option<String>,
    pub extractor: Option<ExtractorKind>,
    pub as_of: Option<String>,
    pub fail_on: Option<FailLevel>,
}

pub(crate) async fn cmd_analyze(ctx: &Context, args: AnalyzeArgs) -> Result<i32, String> {
    let config = config::load(&ctx.config)?;
    let as_of = args
        .as_of
        .as_deref()
        .map(parse_date)
        .transpose()
        .map_err(|e| format!("invalid --as-of date: {e}"))?;

    let bytes = std::fs::read(&args.document)
        .map_err(|e| format!("error reading '{}': {e}", args.document.display()))?;
    let name = args
        .document
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.document.display().to_string());
    let raw = RawDocument::new(name, bytes);
    let extractor = build_extractor(args.extractor, &raw);

    let memory = store::open(&ctx.ledger)?;
    let pooled = Arc::new(PooledLedger::new(memory.clone(), &config.pool));
    let pipeline =
        Pipeline::new(pooled.clone(), pooled, extractor, config).map_err(|e| e.to_string())?;

    // Ctrl-C stops the run at the current stage; the checkpoint is kept.
    let (handle, signal) = cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    let options = RunOptions {
        as_of,
        cancel: signal,
    };
    let result = match &args.thread_id {
        Some(thread_id) => pipeline.run(thread_id, &raw, options).await,
        None => pipeline.analyze(&raw, options).await,
    };
    interrupt.abort();

    store::save(&ctx.ledger, &memory).await?;
    let state = result.map_err(|e| e.to_string())?;
    let report = AuditReport::from(&state);

    match ctx.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&report),
    }
    Ok(exit_code(report.risk_level, args.fail_on))
}

/// 2 when the risk level meets `--fail-on`. A run that produced no
/// assessment meets every threshold.
fn exit_code(level: Option<RiskLevel>, fail_on: Option<FailLevel>) -> i32 {
    let Some(threshold) = fail_on else {
        return 0;
    };
    let threshold = match threshold {
        FailLevel::Low => RiskLevel::Low,
        FailLevel::Medium => RiskLevel::Medium,
        FailLevel::High => RiskLevel::High,
        FailLevel::Critical => RiskLevel::Critical,
    };
    match level {
        Some(level) if level < threshold => 0,
        _ => 2,
    }
}

fn build_extractor(kind: Option<ExtractorKind>, raw: &RawDocument) -> Arc<dyn DocumentExtractor> {
    let kind = kind.unwrap_or(match raw.format() {
        Some(DocumentFormat::Json) => ExtractorKind::Json,
        _ => ExtractorKind::Llm,
    });
    match kind {
        ExtractorKind::Json => Arc::new(JsonExtractor::new()),
        ExtractorKind::Llm => llm_extractor(),
    }
}

#[cfg(feature = "anthropic")]
fn llm_extractor() -> Arc<dyn DocumentExtractor> {
    use spendshield_engine::extractor::{AnthropicClient, DEFAULT_MODEL};
    use spendshield_engine::LlmExtractor;

    match AnthropicClient::from_env() {
        Ok(client) => {
            let model =
                std::env::var("SPENDSHIELD_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
            Arc::new(LlmExtractor::new(Box::new(client), model))
        }
        Err(e) => unavailable(e.to_string()),
    }
}

#[cfg(not(feature = "anthropic"))]
fn llm_extractor() -> Arc<dyn DocumentExtractor> {
    unavailable("this build has no LLM client; rebuild with --features anthropic".to_string())
}

/// The run still goes ahead and records the extraction failure.
fn unavailable(reason: String) -> Arc<dyn DocumentExtractor> {
    use spendshield_engine::{ExtractionError, StaticExtractor};

    warn!(%reason, "LLM extractor unavailable");
    Arc::new(StaticExtractor::failing(ExtractionError::Unavailable(reason)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_on_thresholds() {
        assert_eq!(exit_code(Some(RiskLevel::High), None), 0);
        assert_eq!(exit_code(Some(RiskLevel::Medium), Some(FailLevel::High)), 0);
        assert_eq!(exit_code(Some(RiskLevel::High), Some(FailLevel::High)), 2);
        assert_eq!(exit_code(Some(RiskLevel::Critical), Some(FailLevel::High)), 2);
        assert_eq!(exit_code(None, Some(FailLevel::Critical)), 2);
    }
}
