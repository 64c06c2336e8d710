//! The `import` subcommand: ingest official rate/address data, either
//! from local files or fetched from the comptroller's data service.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use taxroll_lib::calculator::TaxService;
use taxroll_lib::comptroller::{
    parse_address_file, parse_rates_csv, ComptrollerClient,
};

#[derive(Args)]
pub struct ImportArgs {
    /// Dataset to import: "rates" or "addresses"
    #[arg(long)]
    pub dataset: String,

    /// Two-letter state code the data belongs to
    #[arg(long)]
    pub state: String,

    /// Local file to import instead of fetching
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Fetch the latest files from the data service
    #[arg(long)]
    pub fetch: bool,

    /// Effective date for imported rates (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub effective: Option<String>,

    /// Provenance tag stored with the imported rows
    #[arg(long, default_value = "comptroller")]
    pub source: String,

    /// Override the data service base URL
    #[arg(long)]
    pub base_url: Option<String>,
}

pub async fn run(args: &ImportArgs, service: &mut TaxService) -> Result<()> {
    let state = args.state.to_uppercase();
    let effective = match &args.effective {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")?,
        None => chrono::Utc::now().date_naive(),
    };

    let payloads: Vec<Vec<u8>> = if let Some(ref file) = args.file {
        vec![std::fs::read(file)?]
    } else if args.fetch {
        fetch_payloads(args).await?
    } else {
        bail!("provide --file or --fetch");
    };

    match args.dataset.as_str() {
        "rates" => {
            let mut total = 0usize;
            for payload in &payloads {
                let records = parse_rates_csv(payload)?;
                let summary =
                    service.import_rate_records(&state, &records, &args.source, effective)?;
                total += summary.rates_imported;
                eprintln!(
                    "Imported {} rates ({} new jurisdictions, {} unresolved)",
                    summary.rates_imported, summary.jurisdictions_created, summary.unresolved
                );
            }
            eprintln!("Done: {} rates total", total);
        }
        "addresses" => {
            let mut total = 0usize;
            for payload in &payloads {
                let text = String::from_utf8_lossy(payload);
                let records = parse_address_file(&text)?;
                let summary = service.import_address_records(&state, &records, &args.source)?;
                total += summary.ranges_imported;
                eprintln!(
                    "Imported {} address ranges across {} counties",
                    summary.ranges_imported, summary.counties
                );
            }
            eprintln!("Done: {} ranges total", total);
        }
        other => return Err(anyhow!("unknown dataset '{}'", other)),
    }

    Ok(())
}

async fn fetch_payloads(args: &ImportArgs) -> Result<Vec<Vec<u8>>> {
    let client = match &args.base_url {
        Some(url) => ComptrollerClient::with_base_url(url)?,
        None => ComptrollerClient::new()?,
    };

    let files = client.list_files(&args.dataset).await?;
    if files.is_empty() {
        bail!("data service listed no files for dataset '{}'", args.dataset);
    }

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .expect("static progress template"),
    );

    let mut payloads = Vec::with_capacity(files.len());
    for entry in &files {
        bar.set_message(entry.file_path.clone());
        payloads.push(client.download(&entry.file_path).await?);
        bar.inc(1);
    }
    bar.finish_and_clear();
    Ok(payloads)
}
