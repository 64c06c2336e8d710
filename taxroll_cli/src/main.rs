mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use taxroll_lib::calculator::TaxService;
use taxroll_lib::db::Db;
use taxroll_lib::geocode::GeocodeClient;

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "taxroll")]
#[command(about = "US sales/VoIP tax determination and bundle allocation")]
struct Cli {
    /// SQLite database path
    #[arg(long, default_value = "taxroll.db", global = true)]
    db: PathBuf,

    /// Tenant identifier for cache scoping and audit records
    #[arg(long, default_value = "default", global = true)]
    tenant: String,

    /// Output format: table, json, or csv
    #[arg(long, default_value = "table", global = true)]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate tax for a single line
    Calculate(commands::calculate::CalculateArgs),
    /// Allocate taxes across a bundle of line items
    Allocate(commands::allocate::AllocateArgs),
    /// Resolve the jurisdictions for an address
    Resolve(commands::resolve::ResolveArgs),
    /// Import official rate or address data
    Import(commands::import::ImportArgs),
    /// List stored jurisdictions
    Jurisdictions(commands::jurisdictions::JurisdictionsArgs),
    /// Compliance report of calculation records
    Audit(commands::audit::AuditArgs),
    /// Sweep expired query-cache entries
    CacheSweep,
}

/// Builds the service from CLI options and environment configuration.
fn build_service(cli: &Cli) -> Result<TaxService> {
    let db = Db::open(&cli.db)?;
    db.init()?;
    let mut service = TaxService::new(db, &cli.tenant);

    if let Ok(key) = std::env::var("SALESTAX_API_KEY") {
        service = service.with_rates_api_key(&key)?;
    }
    if let Ok(agent) = std::env::var("GEOCODER_USER_AGENT") {
        service = service.with_geocoder(GeocodeClient::new(&agent)?);
    }
    Ok(service)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taxroll=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let format = match cli.output.as_str() {
        "json" => OutputFormat::Json,
        "csv" => OutputFormat::Csv,
        _ => OutputFormat::Table,
    };

    match &cli.command {
        Commands::Calculate(args) => {
            let service = build_service(&cli)?;
            commands::calculate::run(args, &service, &format).await?
        }
        Commands::Allocate(args) => {
            let service = build_service(&cli)?;
            commands::allocate::run(args, &service, &format).await?
        }
        Commands::Resolve(args) => {
            let service = build_service(&cli)?;
            commands::resolve::run(args, &service, &format).await?
        }
        Commands::Import(args) => {
            let mut service = build_service(&cli)?;
            commands::import::run(args, &mut service).await?
        }
        Commands::Jurisdictions(args) => {
            let service = build_service(&cli)?;
            commands::jurisdictions::run(args, &service, &format)?
        }
        Commands::Audit(args) => {
            let service = build_service(&cli)?;
            commands::audit::run(args, &service, &format)?
        }
        Commands::CacheSweep => {
            let service = build_service(&cli)?;
            let swept =
                taxroll_lib::query_cache::QueryCache::new(service.db(), service.tenant()).sweep()?;
            eprintln!("Removed {} expired cache entries", swept);
        }
    }

    Ok(())
}
