//! The `allocate` subcommand: bundle allocation from a JSON items file.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Args;
use taxroll_lib::allocation::{AllocateOptions, AllocationMethod, BundleItem, CustomerInfo};
use taxroll_lib::calculator::{CalcType, TaxService};
use taxroll_lib::Address;

use crate::output::{print_allocation, OutputFormat};

#[derive(Args)]
pub struct AllocateArgs {
    /// Path to a JSON array of bundle items
    #[arg(long)]
    pub items: PathBuf,

    /// Bundle service address
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

    /// Allocation method (proportional, priority_based, service_type,
    /// tax_class, jurisdiction); automatic when omitted
    #[arg(long)]
    pub method: Option<String>,

    /// Record as a final calculation instead of a preview
    #[arg(long)]
    pub r#final: bool,

    /// Print advisory recommendations instead of allocating
    #[arg(long)]
    pub recommend: bool,
}

pub async fn run(args: &AllocateArgs, service: &TaxService, format: &OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(&args.items)?;
    let items: Vec<BundleItem> = serde_json::from_str(&content)?;

    let customer = CustomerInfo {
        client_id: args.client_id.clone(),
        address: Address::new(&args.line1, &args.city, &args.state, &args.zip),
    };

    if args.recommend {
        let recs = service.bundle_recommendations(&items, &customer)?;
        println!("{}", serde_json::to_string_pretty(&recs)?);
        return Ok(());
    }

    let method = match &args.method {
        Some(name) => Some(
            AllocationMethod::parse(name)
                .ok_or_else(|| anyhow!("unknown allocation method '{}'", name))?,
        ),
        None => None,
    };

    let options = AllocateOptions {
        method,
        calculation_type: if args.r#final {
            CalcType::Final
        } else {
            CalcType::Preview
        },
    };

    let result = service.allocate(&items, &customer, &options).await?;
    print_allocation(&result, format)
}
