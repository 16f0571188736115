//! Vendor resolution and historical context for an extracted document.

use rust_decimal::Decimal;
use spendshield_ledger::{Ledger, Vendor};
use time::Date;
use tracing::{debug, instrument};

use crate::config::VerificationConfig;
use crate::error::VerificationError;
use crate::types::{ExtractedDocument, ItemPriceHistory, VerificationResult};

/// Cross-reference `extracted` against the ledger. Read-only.
///
/// The vendor is resolved by id first, then by name. Pricing history is
/// looked up per line item over `config.lookback_months` ending at `as_of`.
#[instrument(
    skip(ledger, extracted, config),
    fields(vendor = %extracted.vendor_name, reference = %extracted.reference_number)
)]
pub async fn verify<L: Ledger + ?Sized>(
    ledger: &L,
    extracted: &ExtractedDocument,
    config: &VerificationConfig,
    as_of: Date,
) -> Result<VerificationResult, VerificationError> {
    let vendor = resolve_vendor(ledger, extracted).await?;
    if let Some(v) = &vendor {
        check_vendor(v)?;
    }

    let as_of = as_of.to_string();
    let mut price_history = Vec::with_capacity(extracted.line_items.len());
    for item in &extracted.line_items {
        let stats = ledger
            .historical_price_stats(&item.description, config.lookback_months, &as_of)
            .await?;
        debug!(item = %item.description, matched = stats.as_ref().map_or(0, |s| s.count), "price history");
        price_history.push(ItemPriceHistory {
            description: item.description.clone(),
            stats,
        });
    }

    let result = match vendor {
        Some(vendor) => {
            let similar_transactions = ledger
                .recent_transactions(&vendor.vendor_id, config.recent_transaction_limit)
                .await?;
            VerificationResult {
                vendor_exists: true,
                vendor_id: Some(vendor.vendor_id),
                vendor_registration_date: Some(vendor.registration_date),
                price_history,
                similar_transactions,
                vendor_risk_score: vendor.risk_score,
            }
        }
        None => VerificationResult {
            vendor_exists: false,
            vendor_id: None,
            vendor_registration_date: None,
            price_history,
            similar_transactions: Vec::new(),
            vendor_risk_score: Decimal::ZERO,
        },
    };

    debug!(
        vendor_exists = result.vendor_exists,
        vendor_id = ?result.vendor_id,
        similar = result.similar_transactions.len(),
        "verification complete"
    );
    Ok(result)
}

async fn resolve_vendor<L: Ledger + ?Sized>(
    ledger: &L,
    extracted: &ExtractedDocument,
) -> Result<Option<Vendor>, VerificationError> {
    if let Some(id) = extracted.vendor_id.as_deref().map(str::trim) {
        if !id.is_empty() {
            if let Some(vendor) = ledger.find_vendor_by_id(id).await? {
                return Ok(Some(vendor));
            }
            debug!(vendor_id = id, "vendor id not in ledger, falling back to name");
        }
    }
    Ok(ledger.find_vendor_by_name(&extracted.vendor_name).await?)
}

fn check_vendor(vendor: &Vendor) -> Result<(), VerificationError> {
    if vendor.risk_score < Decimal::ZERO || vendor.risk_score > Decimal::ONE {
        return Err(VerificationError::MalformedVendor {
            vendor_id: vendor.vendor_id.clone(),
            reason: format!("risk score {} outside [0, 1]", vendor.risk_score),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentType, LineItem};
    use spendshield_ledger::{ExpenditureRecord, LedgerSnapshot, MemoryLedger, StorageError};
    use time::macros::date;

    fn vendor(id: &str, name: &str, risk: Decimal) -> Vendor {
        Vendor {
            vendor_id: id.to_string(),
            vendor_name: name.to_string(),
            registration_date: "2020-01-15".to_string(),
            business_type: None,
            risk_score: risk,
            total_contracts: 3,
            total_value: Decimal::from(100_000),
            is_blacklisted: false,
        }
    }

    fn record(reference: &str, vendor_id: &str, date: &str, price: i64) -> ExpenditureRecord {
        ExpenditureRecord {
            vendor_id: Some(vendor_id.to_string()),
            document_type: "invoice".to_string(),
            reference_number: reference.to_string(),
            transaction_date: date.to_string(),
            amount: Decimal::from(price * 1000),
            item_description: Some("Office supplies - paper, pens, folders".to_string()),
            quantity: Some(1000),
            unit_price: Some(Decimal::from(price)),
            approval_authority: None,
            department: None,
            fiscal_year: None,
            thread_id: None,
        }
    }

    fn ledger() -> MemoryLedger {
        MemoryLedger::from_snapshot(LedgerSnapshot {
            vendors: vec![
                vendor("VND001", "Reliable Office Supplies Inc", Decimal::new(1, 1)),
                vendor("VND003", "Budget Office Furniture", Decimal::new(3, 1)),
                vendor("VND666", "Broken Records Ltd", Decimal::from(7)),
            ],
            expenditures: vec![
                record("INV-2023-001", "VND001", "2023-01-15", 40),
                record("INV-2023-045", "VND001", "2023-06-20", 38),
                record("INV-2024-012", "VND001", "2024-02-10", 42),
            ],
            ..LedgerSnapshot::default()
        })
        .unwrap()
    }

    fn document(vendor_name: &str, vendor_id: Option<&str>) -> ExtractedDocument {
        ExtractedDocument {
            document_type: DocumentType::Invoice,
            vendor_name: vendor_name.to_string(),
            vendor_id: vendor_id.map(str::to_string),
            amount: Decimal::from(50_000),
            date: "2024-06-01".to_string(),
            line_items: vec![
                LineItem {
                    description: "Office supplies".to_string(),
                    quantity: Decimal::from(1000),
                    unit_price: Decimal::from(50),
                },
                LineItem {
                    description: "Toner cartridges".to_string(),
                    quantity: Decimal::from(10),
                    unit_price: Decimal::from(80),
                },
            ],
            approval_authority: None,
            reference_number: "INV-2024-100".to_string(),
        }
    }

    #[tokio::test]
    async fn resolves_by_id_and_collects_history() {
        let result = verify(
            &ledger(),
            &document("whatever the OCR said", Some("VND001")),
            &VerificationConfig::default(),
            date!(2024 - 06 - 01),
        )
        .await
        .unwrap();

        assert!(result.vendor_exists);
        assert_eq!(result.vendor_id.as_deref(), Some("VND001"));
        assert_eq!(result.vendor_risk_score, Decimal::new(1, 1));
        assert_eq!(result.historical_avg_price(), Some(Decimal::from(40)));
        assert_eq!(result.price_history.len(), 2);
        assert!(result.price_history[1].stats.is_none());
        let refs: Vec<&str> = result
            .similar_transactions
            .iter()
            .map(|r| r.reference_number.as_str())
            .collect();
        assert_eq!(refs, ["INV-2024-012", "INV-2023-045", "INV-2023-001"]);
    }

    #[tokio::test]
    async fn unknown_id_falls_back_to_name() {
        let result = verify(
            &ledger(),
            &document("reliable office supplies", Some("VND999")),
            &VerificationConfig::default(),
            date!(2024 - 06 - 01),
        )
        .await
        .unwrap();
        assert_eq!(result.vendor_id.as_deref(), Some("VND001"));
    }

    #[tokio::test]
    async fn unknown_vendor_has_zero_risk_and_no_transactions() {
        let result = verify(
            &ledger(),
            &document("Phantom Trading Co", None),
            &VerificationConfig::default(),
            date!(2024 - 06 - 01),
        )
        .await
        .unwrap();
        assert!(!result.vendor_exists);
        assert!(result.vendor_id.is_none());
        assert_eq!(result.vendor_risk_score, Decimal::ZERO);
        assert!(result.similar_transactions.is_empty());
        // Pricing is still looked up for the items themselves.
        assert_eq!(result.historical_record_count(), 3);
    }

    #[tokio::test]
    async fn ambiguous_name_is_an_error() {
        let err = verify(
            &ledger(),
            &document("Office", None),
            &VerificationConfig::default(),
            date!(2024 - 06 - 01),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::Ledger(StorageError::AmbiguousVendor { .. })
        ));
    }

    #[tokio::test]
    async fn out_of_range_risk_score_is_malformed() {
        let err = verify(
            &ledger(),
            &document("Broken Records Ltd", None),
            &VerificationConfig::default(),
            date!(2024 - 06 - 01),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VerificationError::MalformedVendor { .. }));
    }

    #[tokio::test]
    async fn lookback_window_is_configurable() {
        let config = VerificationConfig {
            lookback_months: 6,
            ..VerificationConfig::default()
        };
        let result = verify(
            &ledger(),
            &document("Reliable Office Supplies Inc", None),
            &config,
            date!(2024 - 06 - 01),
        )
        .await
        .unwrap();
        assert_eq!(result.historical_record_count(), 1);
        assert_eq!(result.historical_avg_price(), Some(Decimal::from(42)));
    }
}
