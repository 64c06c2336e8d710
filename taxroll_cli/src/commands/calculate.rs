//! The `calculate` subcommand: single-line tax with a full breakdown.

use anyhow::Result;
use clap::Args;
use taxroll_lib::calculator::{CalcRequest, CalcType, TaxService};
use taxroll_lib::Address;

use crate::output::{print_tax_result, OutputFormat};

#[derive(Args)]
pub struct CalculateArgs {
    /// Taxable amount in dollars
    #[arg(long)]
    pub amount: f64,

    /// Service classification (free-form; normalized internally)
    #[arg(long, default_value = "managed_services")]
    pub service_type: String,

    /// Street line of the service address
    #[arg(long)]
    pub line1: String,

    #[arg(long)]
    pub city: String,

    /// Two-letter state code
    #[arg(long)]
    pub state: String,

    #[arg(long)]
    pub zip: String,

    /// Client identifier for exemption lookup
    #[arg(long)]
    pub client_id: Option<String>,

    /// Reference to the invoice/contract this calculation belongs to
    #[arg(long)]
    pub subject: Option<String>,

    /// Record as a final calculation instead of a preview
    #[arg(long)]
    pub r#final: bool,

    /// Apply the federal excise threshold rule (telecom)
    #[arg(long)]
    pub federal_excise: bool,

    /// Apply the universal-service contribution (telecom)
    #[arg(long)]
    pub usf: bool,
}

pub async fn run(args: &CalculateArgs, service: &TaxService, format: &OutputFormat) -> Result<()> {
    let request = CalcRequest {
        amount: args.amount,
        service_type: args.service_type.clone(),
        address: Address::new(&args.line1, &args.city, &args.state, &args.zip),
        client_id: args.client_id.clone(),
        subject_ref: args.subject.clone(),
        calculation_type: if args.r#final {
            CalcType::Final
        } else {
            CalcType::Preview
        },
        include_federal_excise: args.federal_excise,
        include_usf: args.usf,
    };

    let result = service.calculate(&request).await?;
    print_tax_result(&result, format)
}
