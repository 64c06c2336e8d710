//! Immutable calculation records for compliance reporting.
//!
//! Writes are fire-and-forget: a failed audit insert is logged and never
//! fails the parent calculation. Bundle allocations write one summary
//! record covering the whole bundle.

use chrono::NaiveDate;

use crate::allocation::{AllocateOptions, AllocationResult, BundleItem, CustomerInfo};
use crate::calculator::{CalcRequest, TaxResult};
use crate::db::{CalculationRecord, Db, DbError};

/// Records a single-line calculation. Never propagates failure.
pub fn record_calculation(db: &Db, tenant: &str, req: &CalcRequest, result: &TaxResult) {
    let engine = if result.estimated {
        "estimated"
    } else if result.fallback_used {
        "provider"
    } else {
        "local"
    };

    let input = serde_json::json!({
        "amount": req.amount,
        "service_type": req.service_type,
        "address": req.address,
        "client_id": req.client_id,
    });
    let breakdown = serde_json::to_value(&result.breakdown).unwrap_or_default();
    let jurisdictions = serde_json::to_value(&result.jurisdictions).unwrap_or_default();

    if let Err(e) = db.insert_calculation(
        tenant,
        req.subject_ref.as_deref(),
        req.calculation_type.as_str(),
        engine,
        &input,
        &breakdown,
        &jurisdictions,
        result.total_tax,
        result.effective_rate,
    ) {
        tracing::warn!("audit write failed (calculation continues): {}", e);
    }
}

/// Records one summary row for a bundle allocation. Never propagates
/// failure.
pub fn record_allocation(
    db: &Db,
    tenant: &str,
    items: &[BundleItem],
    customer: &CustomerInfo,
    options: &AllocateOptions,
    result: &AllocationResult,
) {
    let engine = if result.fallback_used {
        "fallback"
    } else {
        "allocator"
    };

    let input = serde_json::json!({
        "items": items,
        "customer": customer,
        "requested_method": options.method.map(|m| m.as_str()),
    });
    let breakdown = serde_json::to_value(&result.item_allocations).unwrap_or_default();
    let jurisdictions = serde_json::to_value(&result.jurisdiction_summary).unwrap_or_default();

    if let Err(e) = db.insert_calculation(
        tenant,
        None,
        options.calculation_type.as_str(),
        engine,
        &input,
        &breakdown,
        &jurisdictions,
        result.bundle_totals.total_tax,
        result.bundle_totals.effective_tax_rate,
    ) {
        tracing::warn!("audit write failed (allocation continues): {}", e);
    }
}

/// Compliance reporting: calculation records for a tenant and date range.
pub fn query(
    db: &Db,
    tenant: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<CalculationRecord>, DbError> {
    db.query_calculations(tenant, from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::calculator::CalcType;

    fn sample_result() -> TaxResult {
        TaxResult {
            total_tax: 7.75,
            effective_rate: 7.75,
            breakdown: Vec::new(),
            jurisdictions: Vec::new(),
            exemptions_applied: Vec::new(),
            success: true,
            estimated: false,
            fallback_used: false,
            error: None,
        }
    }

    fn sample_request() -> CalcRequest {
        CalcRequest {
            amount: 100.0,
            service_type: "voip".into(),
            address: Address::new("1100 Congress Ave", "Austin", "TX", "78701"),
            client_id: None,
            subject_ref: Some("invoice-42".into()),
            calculation_type: CalcType::Final,
            include_federal_excise: false,
            include_usf: false,
        }
    }

    #[test]
    fn record_and_query_round_trip() {
        let db = Db::open_in_memory().unwrap();
        db.init().unwrap();

        record_calculation(&db, "t1", &sample_request(), &sample_result());

        let records = query(&db, "t1", None, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].calculation_type, "final");
        assert_eq!(records[0].subject_ref.as_deref(), Some("invoice-42"));
        assert_eq!(records[0].engine, "local");
        assert!((records[0].total_tax - 7.75).abs() < 1e-9);

        // Other tenants see nothing.
        assert!(query(&db, "t2", None, None).unwrap().is_empty());
    }

    #[test]
    fn date_range_filters() {
        let db = Db::open_in_memory().unwrap();
        db.init().unwrap();
        record_calculation(&db, "t1", &sample_request(), &sample_result());

        let tomorrow = chrono::Utc::now().date_naive() + chrono::Duration::days(1);
        let yesterday = chrono::Utc::now().date_naive() - chrono::Duration::days(1);
        assert_eq!(query(&db, "t1", Some(yesterday), Some(tomorrow)).unwrap().len(), 1);
        assert!(query(&db, "t1", Some(tomorrow), None).unwrap().is_empty());
        assert!(query(&db, "t1", None, Some(yesterday)).unwrap().is_empty());
    }

    #[test]
    fn write_failure_is_swallowed() {
        let db = Db::open_in_memory().unwrap();
        // Schema never initialized: the insert fails, but the call
        // must not panic or propagate.
        record_calculation(&db, "t1", &sample_request(), &sample_result());
    }
}
