//! Engine configuration.
//!
//! Every section defaults independently, so a TOML file only needs to name
//! the values it changes. Loading the file is the caller's business; the
//! engine only validates what it is handed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendshield_ledger::PoolConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub verification: VerificationConfig,
    pub anomaly: AnomalyConfig,
    pub scoring: ScoringConfig,
    pub pipeline: PipelineConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Pricing history window ending at the reference date.
    pub lookback_months: u32,
    pub recent_transaction_limit: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            lookback_months: 24,
            recent_transaction_limit: 10,
        }
    }
}

/// Thresholds for the anomaly rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// A vendor registered fewer than this many days ago counts as new.
    pub new_vendor_days: i64,
    /// A new vendor is only flagged above this document amount.
    pub new_vendor_amount: Decimal,
    /// Unit price must exceed `avg * inflation_trigger` to be flagged.
    pub inflation_trigger: Decimal,
    pub inflation_critical_pct: Decimal,
    pub inflation_high_pct: Decimal,
    pub high_risk_vendor_score: Decimal,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            new_vendor_days: 180,
            new_vendor_amount: Decimal::from(50_000),
            inflation_trigger: Decimal::new(120, 2),
            inflation_critical_pct: Decimal::from(50),
            inflation_high_pct: Decimal::from(30),
            high_risk_vendor_score: Decimal::new(7, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub critical_weight: Decimal,
    pub high_weight: Decimal,
    pub medium_weight: Decimal,
    pub low_weight: Decimal,
    /// Vendor risk above this multiplies the base score.
    pub vendor_risk_threshold: Decimal,
    pub vendor_risk_multiplier: Decimal,
    pub max_score: Decimal,
    pub critical_band: Decimal,
    pub high_band: Decimal,
    pub medium_band: Decimal,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            critical_weight: Decimal::from(40),
            high_weight: Decimal::from(25),
            medium_weight: Decimal::from(15),
            low_weight: Decimal::from(5),
            vendor_risk_threshold: Decimal::new(7, 1),
            vendor_risk_multiplier: Decimal::new(15, 1),
            max_score: Decimal::from(100),
            critical_band: Decimal::from(70),
            high_band: Decimal::from(40),
            medium_band: Decimal::from(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction_timeout_ms: u64,
    /// Applies to each ledger-backed stage.
    pub stage_timeout_ms: u64,
    /// Insert the analyzed document into the ledger at reporting time.
    pub record_expenditure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction_timeout_ms: 60_000,
            stage_timeout_ms: 10_000,
            record_expenditure: false,
        }
    }
}

/// A configuration value that makes no sense.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration: {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.verification;
        if v.lookback_months == 0 {
            return Err(ConfigError::new(
                "verification.lookback_months",
                "must be at least 1",
            ));
        }

        let a = &self.anomaly;
        if a.new_vendor_days < 0 {
            return Err(ConfigError::new("anomaly.new_vendor_days", "must not be negative"));
        }
        if a.inflation_trigger < Decimal::ONE {
            return Err(ConfigError::new(
                "anomaly.inflation_trigger",
                format!("{} would flag prices at or below average", a.inflation_trigger),
            ));
        }
        if a.inflation_high_pct >= a.inflation_critical_pct {
            return Err(ConfigError::new(
                "anomaly.inflation_high_pct",
                format!(
                    "{} must be below inflation_critical_pct ({})",
                    a.inflation_high_pct, a.inflation_critical_pct
                ),
            ));
        }
        if a.high_risk_vendor_score < Decimal::ZERO || a.high_risk_vendor_score > Decimal::ONE {
            return Err(ConfigError::new(
                "anomaly.high_risk_vendor_score",
                "must be within [0, 1]",
            ));
        }

        let s = &self.scoring;
        for (field, weight) in [
            ("scoring.critical_weight", s.critical_weight),
            ("scoring.high_weight", s.high_weight),
            ("scoring.medium_weight", s.medium_weight),
            ("scoring.low_weight", s.low_weight),
        ] {
            if weight < Decimal::ZERO {
                return Err(ConfigError::new(field, "must not be negative"));
            }
        }
        if s.vendor_risk_multiplier < Decimal::ONE {
            return Err(ConfigError::new(
                "scoring.vendor_risk_multiplier",
                "must be at least 1",
            ));
        }
        if s.max_score <= Decimal::ZERO {
            return Err(ConfigError::new("scoring.max_score", "must be positive"));
        }
        if !(s.medium_band < s.high_band && s.high_band < s.critical_band) {
            return Err(ConfigError::new(
                "scoring.high_band",
                format!(
                    "bands must increase: medium {} < high {} < critical {}",
                    s.medium_band, s.high_band, s.critical_band
                ),
            ));
        }

        let p = &self.pipeline;
        if p.extraction_timeout_ms == 0 || p.stage_timeout_ms == 0 {
            return Err(ConfigError::new("pipeline", "timeouts must be non-zero"));
        }

        if self.pool.max_connections == 0 {
            return Err(ConfigError::new("pool.max_connections", "must be at least 1"));
        }
        if self.pool.acquire_timeout_ms == 0 {
            return Err(ConfigError::new("pool.acquire_timeout_ms", "must be non-zero"));
        }

        Ok(())
    }
}
