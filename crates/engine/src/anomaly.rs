//! Rule-based anomaly detection.
//!
//! [`detect`] is a pure function of its inputs: the same document,
//! verification result, duplicate lookup and reference date always yield the
//! same flags in the same order. [`detect_with_ledger`] does the single
//! ledger lookup the duplicate rule needs and then calls [`detect`].

use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use spendshield_ledger::date::parse_date;
use spendshield_ledger::{ExpenditureRecord, Ledger};
use time::Date;
use tracing::{debug, instrument};

use crate::config::AnomalyConfig;
use crate::error::AnomalyDetectionError;
use crate::types::{AnomalyFlag, ExtractedDocument, FlagType, Severity, VerificationResult};

/// Run every rule. Flags come out ghost vendor first, then price inflation in
/// line-item order, then duplicate invoice, then high-risk vendor.
pub fn detect(
    extracted: &ExtractedDocument,
    verification: &VerificationResult,
    duplicate_of: Option<&ExpenditureRecord>,
    today: Date,
    config: &AnomalyConfig,
) -> Vec<AnomalyFlag> {
    let mut flags = Vec::new();
    flags.extend(ghost_vendor(extracted, verification, today, config));
    flags.extend(price_inflation(extracted, verification, config));
    flags.extend(duplicate_invoice(extracted, duplicate_of));
    flags.extend(high_risk_vendor(extracted, verification, config));
    flags
}

/// Look up the reference number, then [`detect`].
#[instrument(skip_all, fields(reference = %extracted.reference_number))]
pub async fn detect_with_ledger<L: Ledger + ?Sized>(
    ledger: &L,
    extracted: &ExtractedDocument,
    verification: &VerificationResult,
    today: Date,
    config: &AnomalyConfig,
) -> Result<Vec<AnomalyFlag>, AnomalyDetectionError> {
    let duplicate_of = ledger
        .reference_number_exists(&extracted.reference_number)
        .await?;
    let flags = detect(extracted, verification, duplicate_of.as_ref(), today, config);
    debug!(flag_count = flags.len(), "anomaly rules applied");
    Ok(flags)
}

fn evidence(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn ghost_vendor(
    extracted: &ExtractedDocument,
    verification: &VerificationResult,
    today: Date,
    config: &AnomalyConfig,
) -> Option<AnomalyFlag> {
    if !verification.vendor_exists {
        return Some(AnomalyFlag {
            flag_type: FlagType::GhostVendor,
            severity: Severity::Critical,
            description: format!("Vendor '{}' not found in ledger", extracted.vendor_name),
            evidence: evidence(json!({
                "vendor_name": extracted.vendor_name,
                "vendor_id": extracted.vendor_id,
                "amount": extracted.amount,
            })),
        });
    }

    // An unparseable registration date skips the new-vendor check.
    let registered = verification.vendor_registration_date.as_deref()?;
    let registered_on = parse_date(registered).ok()?;
    let days_since = (today - registered_on).whole_days();
    if days_since < config.new_vendor_days && extracted.amount > config.new_vendor_amount {
        return Some(AnomalyFlag {
            flag_type: FlagType::GhostVendor,
            severity: Severity::High,
            description: format!(
                "Recently registered vendor ({registered}) with large contract"
            ),
            evidence: evidence(json!({
                "registration_date": registered,
                "contract_amount": extracted.amount,
                "days_since_registration": days_since,
            })),
        });
    }
    None
}

fn price_inflation(
    extracted: &ExtractedDocument,
    verification: &VerificationResult,
    config: &AnomalyConfig,
) -> Vec<AnomalyFlag> {
    let mut flags = Vec::new();
    for (item, history) in extracted.line_items.iter().zip(&verification.price_history) {
        let Some(stats) = &history.stats else {
            continue;
        };
        let avg = stats.avg;
        if avg <= Decimal::ZERO {
            continue;
        }
        // A trigger price past the decimal range is beyond any unit price.
        match avg.checked_mul(config.inflation_trigger) {
            Some(trigger) if item.unit_price > trigger => {}
            _ => continue,
        }

        // `None` means the percentage itself is out of range: critical.
        let inflation_pct = inflation_percentage(item.unit_price, avg);
        let severity = match inflation_pct {
            Some(pct) if pct <= config.inflation_high_pct => Severity::Medium,
            Some(pct) if pct <= config.inflation_critical_pct => Severity::High,
            _ => Severity::Critical,
        };
        let above = match inflation_pct {
            Some(pct) => format!("{}% above", pct.round_dp(1)),
            None => format!("{} against", item.unit_price),
        };

        flags.push(AnomalyFlag {
            flag_type: FlagType::PriceInflation,
            severity,
            description: format!(
                "Price inflation detected for '{}': {above} historical average",
                item.description,
            ),
            evidence: evidence(json!({
                "item": item.description,
                "current_price": item.unit_price,
                "historical_avg_price": avg,
                "inflation_percentage": inflation_pct,
            })),
        });
    }
    flags
}

/// `(unit_price - avg) / avg * 100`, with trailing zeros dropped, or `None`
/// when the result does not fit in a `Decimal`. The caller guarantees
/// `avg > 0`.
pub fn inflation_percentage(unit_price: Decimal, avg: Decimal) -> Option<Decimal> {
    unit_price
        .checked_sub(avg)?
        .checked_div(avg)?
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|pct| pct.normalize())
}

fn duplicate_invoice(
    extracted: &ExtractedDocument,
    duplicate_of: Option<&ExpenditureRecord>,
) -> Option<AnomalyFlag> {
    let original = duplicate_of?;
    Some(AnomalyFlag {
        flag_type: FlagType::DuplicateInvoice,
        severity: Severity::Critical,
        description: format!(
            "Duplicate reference number found: {}",
            extracted.reference_number
        ),
        evidence: evidence(json!({
            "reference_number": extracted.reference_number,
            "original_date": original.transaction_date,
            "original_amount": original.amount,
        })),
    })
}

fn high_risk_vendor(
    extracted: &ExtractedDocument,
    verification: &VerificationResult,
    config: &AnomalyConfig,
) -> Option<AnomalyFlag> {
    if verification.vendor_risk_score <= config.high_risk_vendor_score {
        return None;
    }
    Some(AnomalyFlag {
        flag_type: FlagType::HighRiskVendor,
        severity: Severity::High,
        description: format!(
            "Vendor has high risk score: {}",
            verification.vendor_risk_score.round_dp(2)
        ),
        evidence: evidence(json!({
            "vendor_name": extracted.vendor_name,
            "risk_score": verification.vendor_risk_score,
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentType, ItemPriceHistory, LineItem};
    use spendshield_ledger::PriceStats;
    use time::macros::date;

    const TODAY: Date = date!(2025 - 01 - 15);

    fn document(amount: i64, items: &[(&str, Decimal)]) -> ExtractedDocument {
        ExtractedDocument {
            document_type: DocumentType::Invoice,
            vendor_name: "Reliable Office Supplies Inc".to_string(),
            vendor_id: Some("VND001".to_string()),
            amount: Decimal::from(amount),
            date: "2025-01-10".to_string(),
            line_items: items
                .iter()
                .map(|(d, p)| LineItem {
                    description: d.to_string(),
                    quantity: Decimal::ONE,
                    unit_price: *p,
                })
                .collect(),
            approval_authority: None,
            reference_number: "INV-2025-001".to_string(),
        }
    }

    fn known_vendor(registered: &str, risk: Decimal, avgs: &[Option<i64>]) -> VerificationResult {
        VerificationResult {
            vendor_exists: true,
            vendor_id: Some("VND001".to_string()),
            vendor_registration_date: Some(registered.to_string()),
            price_history: avgs
                .iter()
                .map(|avg| ItemPriceHistory {
                    description: "item".to_string(),
                    stats: avg.map(|a| PriceStats {
                        avg: Decimal::from(a),
                        min: Decimal::from(a),
                        max: Decimal::from(a),
                        count: 1,
                    }),
                })
                .collect(),
            similar_transactions: Vec::new(),
            vendor_risk_score: risk,
        }
    }

    fn run(doc: &ExtractedDocument, v: &VerificationResult) -> Vec<AnomalyFlag> {
        detect(doc, v, None, TODAY, &AnomalyConfig::default())
    }

    #[test]
    fn unknown_vendor_is_critical_ghost() {
        let doc = document(10_000, &[]);
        let mut v = known_vendor("2020-01-01", Decimal::ZERO, &[]);
        v.vendor_exists = false;
        v.vendor_registration_date = None;

        let flags = run(&doc, &v);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].flag_type, FlagType::GhostVendor);
        assert_eq!(flags[0].severity, Severity::Critical);
        assert_eq!(flags[0].evidence["vendor_name"], "Reliable Office Supplies Inc");
        assert_eq!(flags[0].evidence["vendor_id"], "VND001");
        assert!(flags[0].evidence.contains_key("amount"));
    }

    #[test]
    fn new_vendor_with_large_contract_is_high_ghost() {
        let doc = document(75_000, &[]);
        let v = known_vendor("2024-11-01", Decimal::ZERO, &[]);
        let flags = run(&doc, &v);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].severity, Severity::High);
        assert_eq!(flags[0].evidence["days_since_registration"], 75);
    }

    #[test]
    fn new_vendor_boundaries() {
        // 180 days is no longer new.
        let v = known_vendor("2024-07-19", Decimal::ZERO, &[]);
        assert_eq!((TODAY - date!(2024 - 07 - 19)).whole_days(), 180);
        assert!(run(&document(75_000, &[]), &v).is_empty());

        // Exactly 50,000 is not above the amount threshold.
        let v = known_vendor("2024-12-01", Decimal::ZERO, &[]);
        assert!(run(&document(50_000, &[]), &v).is_empty());
        assert_eq!(run(&document(50_001, &[]), &v).len(), 1);
    }

    #[test]
    fn unparseable_registration_date_skips_new_vendor_rule() {
        let v = known_vendor("sometime last year", Decimal::ZERO, &[]);
        assert!(run(&document(1_000_000, &[]), &v).is_empty());
    }

    #[test]
    fn inflation_percentage_is_exact() {
        assert_eq!(
            inflation_percentage(Decimal::from(50), Decimal::from(40)),
            Some(Decimal::from(25))
        );
        let pct = inflation_percentage(Decimal::new(4999, 2), Decimal::from(30));
        assert_eq!(
            pct,
            Some(
                ((Decimal::new(4999, 2) - Decimal::from(30)) / Decimal::from(30)
                    * Decimal::from(100))
                .normalize()
            )
        );
    }

    #[test]
    fn out_of_range_inflation_is_critical() {
        let huge = Decimal::from_i128_with_scale(10_i128.pow(25), 0);
        let tiny = Decimal::new(1, 4);
        assert_eq!(inflation_percentage(huge, tiny), None);

        let doc = document(1_000, &[("Resistor", huge)]);
        let mut v = known_vendor("2020-01-15", Decimal::ZERO, &[Some(1)]);
        v.price_history[0].stats.as_mut().unwrap().avg = tiny;
        let flags = run(&doc, &v);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].flag_type, FlagType::PriceInflation);
        assert_eq!(flags[0].severity, Severity::Critical);
        assert!(flags[0].evidence["inflation_percentage"].is_null());
    }

    #[test]
    fn trigger_past_decimal_range_raises_nothing() {
        let doc = document(1_000, &[("Resistor", Decimal::MAX)]);
        let mut v = known_vendor("2020-01-15", Decimal::ZERO, &[Some(1)]);
        v.price_history[0].stats.as_mut().unwrap().avg = Decimal::MAX;
        assert!(run(&doc, &v).is_empty());
    }

    #[test]
    fn inflation_severity_follows_thresholds() {
        let v = known_vendor("2020-01-01", Decimal::ZERO, &[Some(40), Some(40), Some(40), Some(40)]);
        let doc = document(
            10_000,
            &[
                ("at trigger", Decimal::from(48)), // exactly 20%, not flagged
                ("medium", Decimal::from(50)),
                ("high", Decimal::from(53)),
                ("critical", Decimal::new(6001, 2)),
            ],
        );
        let flags = run(&doc, &v);
        let got: Vec<(&str, Severity)> = flags
            .iter()
            .map(|f| (f.evidence["item"].as_str().unwrap_or(""), f.severity))
            .collect();
        assert_eq!(
            got,
            [
                ("medium", Severity::Medium),
                ("high", Severity::High),
                ("critical", Severity::Critical),
            ]
        );
    }

    #[test]
    fn exactly_fifty_and_thirty_percent_round_down_a_level() {
        let v = known_vendor("2020-01-01", Decimal::ZERO, &[Some(100), Some(100)]);
        let doc = document(
            10_000,
            &[("thirty", Decimal::from(130)), ("fifty", Decimal::from(150))],
        );
        let severities: Vec<Severity> = run(&doc, &v).iter().map(|f| f.severity).collect();
        assert_eq!(severities, [Severity::Medium, Severity::High]);
    }

    #[test]
    fn items_without_history_are_skipped() {
        let v = known_vendor("2020-01-01", Decimal::ZERO, &[None, Some(10)]);
        let doc = document(
            10_000,
            &[("no history", Decimal::from(1000)), ("doubled", Decimal::from(20))],
        );
        let flags = run(&doc, &v);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].evidence["item"], "doubled");
        assert_eq!(flags[0].severity, Severity::Critical);
    }

    #[test]
    fn inflation_evidence_carries_exact_values() {
        let v = known_vendor("2020-01-01", Decimal::ZERO, &[Some(40)]);
        let doc = document(50_000, &[("Office supplies", Decimal::from(50))]);
        let flags = run(&doc, &v);
        assert_eq!(flags.len(), 1);
        let ev = &flags[0].evidence;
        assert_eq!(ev["item"], "Office supplies");
        assert_eq!(ev["current_price"], "50");
        assert_eq!(ev["historical_avg_price"], "40");
        assert_eq!(ev["inflation_percentage"], "25");
    }

    #[test]
    fn duplicate_reference_is_critical() {
        let doc = document(40_000, &[]);
        let v = known_vendor("2020-01-01", Decimal::ZERO, &[]);
        let original = ExpenditureRecord {
            vendor_id: Some("VND001".to_string()),
            document_type: "invoice".to_string(),
            reference_number: "INV-2025-001".to_string(),
            transaction_date: "2023-01-15".to_string(),
            amount: Decimal::from(40_000),
            item_description: None,
            quantity: None,
            unit_price: None,
            approval_authority: None,
            department: None,
            fiscal_year: None,
            thread_id: None,
        };
        let flags = detect(&doc, &v, Some(&original), TODAY, &AnomalyConfig::default());
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].flag_type, FlagType::DuplicateInvoice);
        assert_eq!(flags[0].severity, Severity::Critical);
        assert_eq!(flags[0].evidence["original_date"], "2023-01-15");
    }

    #[test]
    fn risk_above_threshold_is_high_risk_vendor() {
        let doc = document(1_000, &[]);
        assert!(run(&doc, &known_vendor("2020-01-01", Decimal::new(7, 1), &[])).is_empty());

        let flags = run(&doc, &known_vendor("2020-01-01", Decimal::new(71, 2), &[]));
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].flag_type, FlagType::HighRiskVendor);
        assert_eq!(flags[0].severity, Severity::High);
    }

    #[test]
    fn flag_order_is_fixed() {
        let doc = document(75_000, &[("paper", Decimal::from(100))]);
        let v = known_vendor("2024-11-01", Decimal::new(8, 1), &[Some(40)]);
        let original = ExpenditureRecord {
            vendor_id: None,
            document_type: "invoice".to_string(),
            reference_number: "INV-2025-001".to_string(),
            transaction_date: "2024-12-01".to_string(),
            amount: Decimal::from(75_000),
            item_description: None,
            quantity: None,
            unit_price: None,
            approval_authority: None,
            department: None,
            fiscal_year: None,
            thread_id: None,
        };
        let types: Vec<FlagType> = detect(&doc, &v, Some(&original), TODAY, &AnomalyConfig::default())
            .iter()
            .map(|f| f.flag_type)
            .collect();
        assert_eq!(
            types,
            [
                FlagType::GhostVendor,
                FlagType::PriceInflation,
                FlagType::DuplicateInvoice,
                FlagType::HighRiskVendor,
            ]
        );
    }

    #[test]
    fn detection_is_deterministic() {
        let doc = document(75_000, &[("paper", Decimal::from(55)), ("pens", Decimal::from(9))]);
        let v = known_vendor("2024-12-20", Decimal::new(9, 1), &[Some(40), Some(5)]);
        let first = run(&doc, &v);
        for _ in 0..5 {
            assert_eq!(run(&doc, &v), first);
        }
    }
}
