use anyhow::Result;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use taxroll_lib::allocation::AllocationResult;
use taxroll_lib::calculator::TaxResult;
use taxroll_lib::db::CalculationRecord;
use taxroll_lib::jurisdiction::{Jurisdiction, Provenance};

#[derive(Clone, Debug)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Tabled, Serialize)]
struct BreakdownRow {
    #[tabled(rename = "Jurisdiction")]
    #[serde(rename = "Jurisdiction")]
    jurisdiction: String,
    #[tabled(rename = "Type")]
    #[serde(rename = "Type")]
    jurisdiction_type: String,
    #[tabled(rename = "Tax")]
    #[serde(rename = "Tax")]
    tax_type: String,
    #[tabled(rename = "Rate")]
    #[serde(rename = "Rate")]
    rate: String,
    #[tabled(rename = "Amount")]
    #[serde(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Estimated")]
    #[serde(rename = "Estimated")]
    estimated: String,
}

#[derive(Tabled, Serialize)]
struct JurisdictionRow {
    #[tabled(rename = "Code")]
    #[serde(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    #[serde(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    #[serde(rename = "Type")]
    jurisdiction_type: String,
    #[tabled(rename = "State")]
    #[serde(rename = "State")]
    state: String,
    #[tabled(rename = "Source")]
    #[serde(rename = "Source")]
    source: String,
}

#[derive(Tabled, Serialize)]
struct ItemRow {
    #[tabled(rename = "Item")]
    #[serde(rename = "Item")]
    item: String,
    #[tabled(rename = "Service")]
    #[serde(rename = "Service")]
    service: String,
    #[tabled(rename = "Class")]
    #[serde(rename = "Class")]
    class: String,
    #[tabled(rename = "Subtotal")]
    #[serde(rename = "Subtotal")]
    subtotal: String,
    #[tabled(rename = "Rate")]
    #[serde(rename = "Rate")]
    rate: String,
    #[tabled(rename = "Tax")]
    #[serde(rename = "Tax")]
    tax: String,
}

#[derive(Tabled, Serialize)]
struct AuditRow {
    #[tabled(rename = "Id")]
    #[serde(rename = "Id")]
    id: i64,
    #[tabled(rename = "Date")]
    #[serde(rename = "Date")]
    date: String,
    #[tabled(rename = "Type")]
    #[serde(rename = "Type")]
    calculation_type: String,
    #[tabled(rename = "Engine")]
    #[serde(rename = "Engine")]
    engine: String,
    #[tabled(rename = "Total Tax")]
    #[serde(rename = "Total Tax")]
    total_tax: String,
    #[tabled(rename = "Eff. Rate")]
    #[serde(rename = "Eff. Rate")]
    effective_rate: String,
}

fn provenance_label(p: Provenance) -> &'static str {
    match p {
        Provenance::Index => "index",
        Provenance::Geocoded => "geocoded",
        Provenance::Estimated => "estimated",
    }
}

fn render<T: Tabled + Serialize>(rows: Vec<T>, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new(&rows);
            table.with(Style::sharp());
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for row in &rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}

pub fn print_tax_result(result: &TaxResult, format: &OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let rows: Vec<BreakdownRow> = result
        .breakdown
        .iter()
        .map(|c| BreakdownRow {
            jurisdiction: c.jurisdiction_name.clone(),
            jurisdiction_type: c.jurisdiction_type.as_str().to_string(),
            tax_type: c.tax_type.clone(),
            rate: format!("{:.4}%", c.rate),
            amount: format!("{:.2}", c.tax_amount),
            estimated: if c.estimated { "yes" } else { "" }.to_string(),
        })
        .collect();
    render(rows, format)?;

    if matches!(format, OutputFormat::Table) {
        eprintln!(
            "Total tax: {:.2}  (effective rate {:.4}%){}{}",
            result.total_tax,
            result.effective_rate,
            if result.estimated { "  [estimated]" } else { "" },
            if !result.success { "  [failed]" } else { "" },
        );
        for exemption in &result.exemptions_applied {
            eprintln!(
                "Exemption applied: {} ({}%)",
                exemption.exemption_type, exemption.percentage
            );
        }
        if let Some(ref error) = result.error {
            eprintln!("Error: {}", error);
        }
    }
    Ok(())
}

pub fn print_allocation(result: &AllocationResult, format: &OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let rows: Vec<ItemRow> = result
        .item_allocations
        .iter()
        .enumerate()
        .map(|(i, a)| ItemRow {
            item: a
                .description
                .clone()
                .unwrap_or_else(|| format!("#{}", i + 1)),
            service: a.service_type.as_str().to_string(),
            class: a.tax_class.as_str().to_string(),
            subtotal: format!("{:.2}", a.subtotal),
            rate: format!("{:.4}%", a.tax_rate),
            tax: format!("{:.2}", a.tax_amount),
        })
        .collect();
    render(rows, format)?;

    if matches!(format, OutputFormat::Table) {
        eprintln!(
            "Method: {}  Subtotal: {:.2}  Tax: {:.2}  Grand total: {:.2}  ({:.4}%)",
            result.allocation_method.as_str(),
            result.bundle_totals.subtotal,
            result.bundle_totals.total_tax,
            result.bundle_totals.grand_total,
            result.bundle_totals.effective_tax_rate,
        );
    }
    Ok(())
}

pub fn print_jurisdictions(jurisdictions: &[Jurisdiction], format: &OutputFormat) -> Result<()> {
    let rows: Vec<JurisdictionRow> = jurisdictions
        .iter()
        .map(|j| JurisdictionRow {
            code: j.code.clone(),
            name: j.name.clone(),
            jurisdiction_type: j.jurisdiction_type.as_str().to_string(),
            state: j.state_code.clone(),
            source: provenance_label(j.provenance).to_string(),
        })
        .collect();
    render(rows, format)
}


pub fn print_audit_records(records: &[CalculationRecord], format: &OutputFormat) -> Result<()> {
    let rows: Vec<AuditRow> = records
        .iter()
        .map(|r| AuditRow {
            id: r.calculation_id,
            date: r.created_at.clone(),
            calculation_type: r.calculation_type.clone(),
            engine: r.engine.clone(),
            total_tax: format!("{:.2}", r.total_tax),
            effective_rate: format!("{:.4}%", r.effective_rate),
        })
        .collect();
    render(rows, format)
}
