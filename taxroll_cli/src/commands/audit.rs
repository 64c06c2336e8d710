//! The `audit` subcommand: compliance report of calculation records.

use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use taxroll_lib::calculator::TaxService;

use crate::output::{print_audit_records, OutputFormat};

#[derive(Args)]
pub struct AuditArgs {
    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,

    /// End date (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub to: Option<String>,
}

pub fn run(args: &AuditArgs, service: &TaxService, format: &OutputFormat) -> Result<()> {
    let from = args
        .from
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()?;
    let to = args
        .to
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()?;

    let records = taxroll_lib::audit::query(service.db(), service.tenant(), from, to)?;
    if records.is_empty() {
        eprintln!("No calculation records in range");
        return Ok(());
    }
    print_audit_records(&records, format)
}
