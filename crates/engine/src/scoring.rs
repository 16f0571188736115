//! Fraud-risk score, risk level and recommendations.

use rust_decimal::Decimal;

use crate::config::ScoringConfig;
use crate::types::{AnomalyFlag, FlagType, RiskAssessment, RiskLevel, Severity, VerificationResult};

const REJECT: &str = "Reject the document and open a fraud investigation.";
const HOLD: &str = "Hold payment pending manual review by an auditor.";
const REQUEST_DOCS: &str = "Request supporting documentation from the vendor before approval.";
const PROCEED: &str = "No blocking issues found; proceed with standard approval.";
const VERIFY_VENDOR: &str = "Verify vendor registration and business credentials.";
const JUSTIFY_PRICING: &str =
    "Obtain competitive quotes and justify pricing against historical averages.";
const CHECK_PAYMENT: &str = "Confirm the reference number has not already been paid.";
const ESCALATE_VENDOR: &str =
    "Escalate to procurement compliance given the vendor's risk history.";
const NO_VERIFICATION: &str =
    "Vendor and pricing could not be verified against the ledger; verify manually.";

/// Score a set of flags.
///
/// The base score is the sum of severity weights, multiplied when the
/// vendor's risk score is above the threshold, then capped at `max_score`.
/// `verification` is `None` when that stage failed; the vendor multiplier
/// then does not apply and a manual-verification recommendation is added.
pub fn score(
    anomalies: &[AnomalyFlag],
    verification: Option<&VerificationResult>,
    config: &ScoringConfig,
) -> RiskAssessment {
    let mut base: Decimal = anomalies
        .iter()
        .map(|a| severity_weight(a.severity, config))
        .sum();

    let vendor_risk = verification.map_or(Decimal::ZERO, |v| v.vendor_risk_score);
    if vendor_risk > config.vendor_risk_threshold {
        base *= config.vendor_risk_multiplier;
    }

    let fraud_risk_score = base.min(config.max_score).max(Decimal::ZERO).normalize();
    let risk_level = risk_level(fraud_risk_score, config);

    RiskAssessment {
        fraud_risk_score,
        risk_level,
        recommendations: recommendations(risk_level, anomalies, verification.is_some()),
    }
}

pub fn severity_weight(severity: Severity, config: &ScoringConfig) -> Decimal {
    match severity {
        Severity::Critical => config.critical_weight,
        Severity::High => config.high_weight,
        Severity::Medium => config.medium_weight,
        Severity::Low => config.low_weight,
    }
}

pub fn risk_level(score: Decimal, config: &ScoringConfig) -> RiskLevel {
    if score >= config.critical_band {
        RiskLevel::Critical
    } else if score >= config.high_band {
        RiskLevel::High
    } else if score >= config.medium_band {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Band entry first, then one entry per flag type present (in flag-type
/// order), then the unverified note. No duplicates.
fn recommendations(level: RiskLevel, anomalies: &[AnomalyFlag], verified: bool) -> Vec<String> {
    let band = match level {
        RiskLevel::Critical => REJECT,
        RiskLevel::High => HOLD,
        RiskLevel::Medium => REQUEST_DOCS,
        RiskLevel::Low => PROCEED,
    };
    let mut out = vec![band.to_string()];

    let present = |t: FlagType| anomalies.iter().any(|a| a.flag_type == t);
    for (flag_type, text) in [
        (FlagType::GhostVendor, VERIFY_VENDOR),
        (FlagType::PriceInflation, JUSTIFY_PRICING),
        (FlagType::DuplicateInvoice, CHECK_PAYMENT),
        (FlagType::HighRiskVendor, ESCALATE_VENDOR),
    ] {
        if present(flag_type) {
            out.push(text.to_string());
        }
    }
    if !verified {
        out.push(NO_VERIFICATION.to_string());
    }
    out
}
