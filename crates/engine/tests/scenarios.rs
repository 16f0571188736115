//! End-to-end analyses against a seeded in-memory ledger.

use std::sync::Arc;

use rust_decimal::Decimal;
use spendshield_engine::{
    AuditState, DocumentType, EngineConfig, ExtractedDocument, FlagType, LineItem, Pipeline,
    RawDocument, RiskLevel, RunOptions, RunOutcome, Severity, StaticExtractor,
};
use spendshield_ledger::{
    ExpenditureRecord, Ledger, LedgerSnapshot, MemoryLedger, PoolConfig, PooledLedger, Vendor,
};
use time::macros::date;
use time::Date;

const AS_OF: Date = date!(2025 - 01 - 15);

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn vendor(id: &str, name: &str, registered: &str, risk: Decimal) -> Vendor {
    Vendor {
        vendor_id: id.to_string(),
        vendor_name: name.to_string(),
        registration_date: registered.to_string(),
        business_type: None,
        risk_score: risk,
        total_contracts: 0,
        total_value: Decimal::ZERO,
        is_blacklisted: false,
    }
}

fn past(reference: &str, vendor_id: &str, date: &str, item: &str, unit_price: i64) -> ExpenditureRecord {
    ExpenditureRecord {
        vendor_id: Some(vendor_id.to_string()),
        document_type: "invoice".to_string(),
        reference_number: reference.to_string(),
        transaction_date: date.to_string(),
        amount: Decimal::from(unit_price * 100),
        item_description: Some(item.to_string()),
        quantity: Some(100),
        unit_price: Some(Decimal::from(unit_price)),
        approval_authority: None,
        department: Some("Administration".to_string()),
        fiscal_year: Some(2024),
        thread_id: None,
    }
}

fn ledger() -> Arc<MemoryLedger> {
    let snapshot = LedgerSnapshot {
        vendors: vec![
            vendor("VND001", "Reliable Office Supplies Inc", "2020-01-15", Decimal::new(1, 1)),
            vendor("VND003", "QuickBuild Contractors", "2024-11-01", Decimal::new(8, 1)),
        ],
        expenditures: vec![
            past("INV-2023-001", "VND001", "2023-06-10", "Desk chairs", 120),
            past("INV-2024-010", "VND001", "2024-03-01", "Office supplies", 35),
            past("INV-2024-011", "VND001", "2024-06-01", "Office supplies", 45),
        ],
        ..LedgerSnapshot::default()
    };
    Arc::new(MemoryLedger::from_snapshot(snapshot).unwrap())
}

fn document(vendor_name: &str, vendor_id: Option<&str>, reference: &str) -> ExtractedDocument {
    ExtractedDocument {
        document_type: DocumentType::Invoice,
        vendor_name: vendor_name.to_string(),
        vendor_id: vendor_id.map(str::to_string),
        amount: Decimal::from(10_000),
        date: "2025-01-10".to_string(),
        line_items: Vec::new(),
        approval_authority: None,
        reference_number: reference.to_string(),
    }
}

fn item(description: &str, unit_price: i64) -> LineItem {
    LineItem {
        description: description.to_string(),
        quantity: Decimal::from(100),
        unit_price: Decimal::from(unit_price),
    }
}

async fn analyze(ledger: &Arc<MemoryLedger>, doc: ExtractedDocument) -> AuditState {
    let pipeline = Pipeline::new(
        ledger.clone(),
        ledger.clone(),
        Arc::new(StaticExtractor::document(doc)),
        EngineConfig::default(),
    )
    .unwrap();
    let raw = RawDocument::new("doc.json", b"{}".to_vec());
    pipeline
        .analyze(
            &raw,
            RunOptions {
                as_of: Some(AS_OF),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_price_inflation() {
    let ledger = ledger();
    let mut doc = document("Reliable Office Supplies Inc", Some("VND001"), "INV-2025-100");
    doc.line_items.push(item("Office supplies", 50));

    let state = analyze(&ledger, doc).await;
    let verification = state.verification.as_ref().unwrap();
    assert_eq!(verification.historical_avg_price(), Some(Decimal::from(40)));
    assert_eq!(verification.historical_record_count(), 2);

    assert_eq!(state.anomalies.len(), 1);
    let flag = &state.anomalies[0];
    assert_eq!(flag.flag_type, FlagType::PriceInflation);
    assert_eq!(flag.severity, Severity::Medium);
    assert_eq!(flag.evidence["inflation_percentage"], "25");
    assert_eq!(flag.evidence["historical_avg_price"], "40");

    let assessment = state.assessment.as_ref().unwrap();
    assert_eq!(assessment.fraud_risk_score, Decimal::from(15));
    assert_eq!(assessment.risk_level, RiskLevel::Low);
}

#[tokio::test]
async fn huge_price_against_tiny_average_completes() {
    let ledger = ledger();
    let mut resistors = past("INV-2024-200", "VND001", "2024-09-01", "Resistor", 0);
    resistors.unit_price = Some(Decimal::new(1, 4));
    ledger.insert_expenditure(resistors).await.unwrap();

    let mut doc = document("Reliable Office Supplies Inc", Some("VND001"), "INV-2025-200");
    doc.line_items.push(LineItem {
        description: "Resistor".to_string(),
        quantity: Decimal::ONE,
        unit_price: Decimal::from_i128_with_scale(10_i128.pow(25), 0),
    });

    let state = analyze(&ledger, doc).await;
    assert_eq!(state.outcome(), RunOutcome::Clean, "{:?}", state.errors);
    assert_eq!(state.anomalies.len(), 1);
    assert_eq!(state.anomalies[0].flag_type, FlagType::PriceInflation);
    assert_eq!(state.anomalies[0].severity, Severity::Critical);
    assert!(state.assessment.is_some());
}

#[tokio::test]
async fn scenario_b_unknown_vendor() {
    let ledger = ledger();
    let state = analyze(&ledger, document("Shadow Holdings Ltd", None, "INV-2025-200")).await;

    assert!(!state.verification.as_ref().unwrap().vendor_exists);
    assert_eq!(state.anomalies.len(), 1);
    assert_eq!(state.anomalies[0].flag_type, FlagType::GhostVendor);
    assert_eq!(state.anomalies[0].severity, Severity::Critical);

    let assessment = state.assessment.as_ref().unwrap();
    assert_eq!(assessment.fraud_risk_score, Decimal::from(40));
    assert_eq!(assessment.risk_level, RiskLevel::High);

    let rows = ledger.flags_for_thread(&state.thread_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].fraud_risk_score, Decimal::from(40));
    assert_eq!(rows[0].reference_number.as_deref(), Some("INV-2025-200"));
    assert!(rows[0].vendor_id.is_none());
    assert!(!rows[0].reviewed);
}

#[tokio::test]
async fn scenario_c_high_risk_vendor_multiplier() {
    let ledger = ledger();
    // Small contract so the new-vendor rule stays quiet.
    let state = analyze(&ledger, document("QuickBuild Contractors", Some("VND003"), "INV-2025-300")).await;

    assert_eq!(state.anomalies.len(), 1);
    assert_eq!(state.anomalies[0].flag_type, FlagType::HighRiskVendor);
    assert_eq!(state.anomalies[0].severity, Severity::High);

    let assessment = state.assessment.as_ref().unwrap();
    assert_eq!(assessment.fraud_risk_score, Decimal::new(375, 1));
    assert_eq!(assessment.risk_level, RiskLevel::Medium);
}

#[tokio::test]
async fn scenario_d_duplicate_reference() {
    let ledger = ledger();
    let state = analyze(&ledger, document("Reliable Office Supplies Inc", Some("VND001"), "INV-2023-001")).await;

    let duplicate = state
        .anomalies
        .iter()
        .find(|a| a.flag_type == FlagType::DuplicateInvoice)
        .unwrap();
    assert_eq!(duplicate.severity, Severity::Critical);
    assert_eq!(duplicate.evidence["reference_number"], "INV-2023-001");
    assert_eq!(duplicate.evidence["original_date"], "2023-06-10");
    assert_eq!(state.outcome(), RunOutcome::Clean);
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_rule_at_once_is_capped_at_100() {
    let ledger = ledger();
    let mut doc = document("QuickBuild Contractors", Some("VND003"), "INV-2023-001");
    doc.amount = Decimal::from(250_000);
    doc.line_items.push(item("Office supplies", 100));

    let state = analyze(&ledger, doc).await;
    let types: Vec<FlagType> = state.anomalies.iter().map(|a| a.flag_type).collect();
    assert_eq!(
        types,
        [
            FlagType::GhostVendor,
            FlagType::PriceInflation,
            FlagType::DuplicateInvoice,
            FlagType::HighRiskVendor
        ]
    );
    let assessment = state.assessment.as_ref().unwrap();
    assert_eq!(assessment.fraud_risk_score, Decimal::from(100));
    assert_eq!(assessment.risk_level, RiskLevel::Critical);

    let rows = ledger.flags_for_thread(&state.thread_id).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.fraud_risk_score == Decimal::from(100)));
}

#[tokio::test]
async fn same_document_same_result() {
    let ledger = ledger();
    let mut doc = document("Reliable Office", None, "INV-2025-400");
    doc.line_items.push(item("office SUPPLIES", 60));

    let first = analyze(&ledger, doc.clone()).await;
    let second = analyze(&ledger, doc).await;
    assert_ne!(first.thread_id, second.thread_id);
    assert_eq!(first.anomalies, second.anomalies);
    assert_eq!(first.assessment, second.assessment);
}

#[tokio::test]
async fn concurrent_analyses_through_a_small_pool() {
    let memory = ledger();
    let config = EngineConfig {
        pool: PoolConfig {
            max_connections: 2,
            ..PoolConfig::default()
        },
        ..EngineConfig::default()
    };
    let pooled = Arc::new(PooledLedger::new(memory.clone(), &config.pool));

    let mut tasks = Vec::new();
    for n in 0..8 {
        let pooled = pooled.clone();
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            let doc = document("Shadow Holdings Ltd", None, &format!("INV-2025-9{n:02}"));
            let pipeline = Pipeline::new(
                pooled.clone(),
                pooled,
                Arc::new(StaticExtractor::document(doc)),
                config,
            )
            .unwrap();
            let raw = RawDocument::new("doc.json", format!("doc {n}").into_bytes());
            pipeline
                .analyze(
                    &raw,
                    RunOptions {
                        as_of: Some(AS_OF),
                        ..RunOptions::default()
                    },
                )
                .await
        }));
    }
    for task in tasks {
        let state = task.await.unwrap().unwrap();
        assert_eq!(state.outcome(), RunOutcome::Clean);
    }

    assert_eq!(memory.list_audits(0).await.unwrap().len(), 8);
    assert_eq!(pooled.available(), 2);
}
