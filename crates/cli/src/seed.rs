//! Demonstration ledger contents.

use rust_decimal::Decimal;
use spendshield_ledger::{ExpenditureRecord, LedgerSnapshot, Vendor};

fn vendor(
    id: &str,
    name: &str,
    registered: &str,
    business_type: &str,
    risk_tenths: i64,
    contracts: i64,
    value: i64,
) -> Vendor {
    Vendor {
        vendor_id: id.to_string(),
        vendor_name: name.to_string(),
        registration_date: registered.to_string(),
        business_type: Some(business_type.to_string()),
        risk_score: Decimal::new(risk_tenths, 1),
        total_contracts: contracts,
        total_value: Decimal::from(value),
        is_blacklisted: false,
    }
}

#[allow(clippy::too_many_arguments)]
fn expenditure(
    vendor_id: &str,
    reference: &str,
    date: &str,
    item: &str,
    quantity: i64,
    unit_price: i64,
    approver: &str,
    department: &str,
) -> ExpenditureRecord {
    ExpenditureRecord {
        vendor_id: Some(vendor_id.to_string()),
        document_type: "invoice".to_string(),
        reference_number: reference.to_string(),
        transaction_date: date.to_string(),
        amount: Decimal::from(quantity * unit_price),
        item_description: Some(item.to_string()),
        quantity: Some(quantity),
        unit_price: Some(Decimal::from(unit_price)),
        approval_authority: Some(approver.to_string()),
        department: Some(department.to_string()),
        fiscal_year: date.get(..4).and_then(|y| y.parse().ok()),
        thread_id: None,
    }
}

pub(crate) fn demo_snapshot() -> LedgerSnapshot {
    const SUPPLIES: &str = "Office supplies - paper, pens, folders";
    LedgerSnapshot {
        vendors: vec![
            vendor("VND001", "Reliable Office Supplies Inc", "2020-01-15", "Office Supplies", 1, 45, 250_000),
            vendor("VND002", "TechPro Solutions", "2019-06-20", "IT Services", 2, 30, 500_000),
            vendor("VND003", "Budget Furniture Co", "2021-03-10", "Furniture", 3, 20, 150_000),
            vendor("VND004", "Shady Enterprises LLC", "2024-11-01", "General Supplies", 8, 2, 75_000),
        ],
        expenditures: vec![
            expenditure("VND001", "INV-2023-001", "2023-01-15", SUPPLIES, 1000, 40, "John Smith", "Administration"),
            expenditure("VND001", "INV-2023-045", "2023-06-20", SUPPLIES, 1000, 38, "Jane Doe", "Administration"),
            expenditure("VND001", "INV-2024-012", "2024-02-10", SUPPLIES, 1000, 42, "John Smith", "Administration"),
            expenditure("VND002", "INV-2023-078", "2023-08-15", "IT consulting services", 1, 120_000, "CTO Office", "IT"),
            expenditure("VND003", "INV-2023-090", "2023-09-01", "Office desks and chairs", 50, 500, "Facilities Manager", "Facilities"),
        ],
        ..LedgerSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spendshield_ledger::MemoryLedger;

    #[test]
    fn demo_data_is_a_valid_ledger() {
        let snapshot = demo_snapshot();
        assert_eq!(snapshot.vendors.len(), 4);
        assert_eq!(snapshot.expenditures.len(), 5);
        assert_eq!(snapshot.expenditures[0].amount, Decimal::from(40_000));
        assert_eq!(snapshot.expenditures[0].fiscal_year, Some(2023));
        assert!(MemoryLedger::from_snapshot(snapshot).is_ok());
    }
}
