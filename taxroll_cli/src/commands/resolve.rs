//! The `resolve` subcommand: show which jurisdictions apply to an address.

use anyhow::Result;
use clap::Args;
use taxroll_lib::calculator::TaxService;
use taxroll_lib::Address;

use crate::output::{print_jurisdictions, OutputFormat};

#[derive(Args)]
pub struct ResolveArgs {
    #[arg(long)]
    pub line1: String,

    #[arg(long)]
    pub city: String,

    /// Two-letter state code
    #[arg(long)]
    pub state: String,

    #[arg(long)]
    pub zip: String,
}

pub async fn run(args: &ResolveArgs, service: &TaxService, format: &OutputFormat) -> Result<()> {
    let address = Address::new(&args.line1, &args.city, &args.state, &args.zip);
    let jurisdictions = service.resolve_jurisdictions(&address).await;
    if jurisdictions.is_empty() {
        eprintln!("No jurisdictions found (unrecognized state?)");
        return Ok(());
    }
    print_jurisdictions(&jurisdictions, format)
}
