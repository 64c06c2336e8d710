//! The `jurisdictions` subcommand: list stored taxing authorities.

use anyhow::{anyhow, Result};
use clap::Args;
use taxroll_lib::calculator::TaxService;
use taxroll_lib::jurisdiction::JurisdictionType;

use crate::output::{print_jurisdictions, OutputFormat};

#[derive(Args)]
pub struct JurisdictionsArgs {
    /// Two-letter state code
    #[arg(long)]
    pub state: String,

    /// Filter by type (state, county, city, transit_authority,
    /// special_district)
    #[arg(long)]
    pub r#type: Option<String>,
}

pub fn run(args: &JurisdictionsArgs, service: &TaxService, format: &OutputFormat) -> Result<()> {
    let jurisdiction_type = match &args.r#type {
        Some(name) => Some(
            JurisdictionType::parse(name)
                .ok_or_else(|| anyhow!("unknown jurisdiction type '{}'", name))?,
        ),
        None => None,
    };

    let jurisdictions = service
        .db()
        .query_jurisdictions(&args.state.to_uppercase(), jurisdiction_type)?;
    if jurisdictions.is_empty() {
        eprintln!("No jurisdictions stored for {}", args.state.to_uppercase());
        return Ok(());
    }
    print_jurisdictions(&jurisdictions, format)
}
