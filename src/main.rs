use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parcel_docs::pipeline::validate_address;
use parcel_docs::{FetchConfig, Pipeline, TieBreak};

#[derive(Parser)]
#[command(name = "parcel-docs")]
#[command(about = "Fetch deed, tax bill and property record card PDFs for a property address")]
#[command(version)]
struct Cli {
    /// Log level: error, warn, info, debug, trace (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info", value_enum)]
    log_level: LogLevel,

    /// Property search page of the mapping portal
    #[arg(long, global = true, env = "PARCEL_DOCS_PORTAL_URL")]
    portal_url: Option<String>,

    /// Chrome/Chromium executable (found on PATH when omitted)
    #[arg(long, global = true, env = "CHROME_PATH")]
    chrome_path: Option<String>,

    /// Show the browser window instead of running headless
    #[arg(long, global = true)]
    headful: bool,

    /// Seconds to wait for required portal elements
    #[arg(long, global = true, default_value_t = 45)]
    timeout: u64,

    /// Which tax bill wins when several rows share the latest year
    #[arg(long, global = true, default_value = "last", value_enum)]
    tie_break: TieBreakArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum TieBreakArg {
    First,
    Last,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve every available document and write them as a zip archive
    Fetch {
        /// Street address, e.g. "133 Manorly Ln, Mooresville, NC"
        address: String,

        /// Output path for the zip archive
        #[arg(short, long, default_value = "property_docs.zip")]
        output: PathBuf,

        /// Print a JSON report of which documents were obtained
        #[arg(long)]
        report: bool,
    },

    /// Open the property's details and print the extracted links as JSON
    Links {
        /// Street address, e.g. "133 Manorly Ln, Mooresville, NC"
        address: String,
    },
}

impl Cli {
    fn fetch_config(&self) -> FetchConfig {
        let mut builder = FetchConfig::builder()
            .headless(!self.headful)
            .required_timeout(Duration::from_secs(self.timeout))
            .tie_break(match self.tie_break {
                TieBreakArg::First => TieBreak::FirstWins,
                TieBreakArg::Last => TieBreak::LastWins,
            })
            .max_sessions(1);
        if let Some(ref url) = self.portal_url {
            builder = builder.portal_url(url.as_str());
        }
        if let Some(ref path) = self.chrome_path {
            builder = builder.chrome_path(path.as_str());
        }
        builder.build_config()
    }
}

fn init_tracing(level: &LogLevel) {
    // chromiumoxide logs every unrecognised CDP message at debug and below
    let level = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug,chromiumoxide=warn",
        LogLevel::Trace => "trace,chromiumoxide=warn,tungstenite=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let pipeline = Pipeline::chromium(cli.fetch_config());

    let outcome = match cli.command {
        Commands::Fetch {
            address,
            output,
            report,
        } => fetch(&pipeline, &address, &output, report).await,
        Commands::Links { address } => links(&pipeline, &address).await,
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<parcel_docs::Error>() {
            Some(err) if err.is_not_found() => {
                error!("{err}");
                Ok(ExitCode::from(2))
            }
            _ => Err(e),
        },
    }
}

async fn fetch(pipeline: &Pipeline, address: &str, output: &Path, report: bool) -> Result<()> {
    let address = validate_address(address)?;
    let retrieval = pipeline.retrieve_with_report(address).await?;
    if report {
        println!("{}", serde_json::to_string_pretty(&retrieval.report)?);
    }

    let archive = pipeline.package(&retrieval.bundle)?;
    tokio::fs::write(output, &archive)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    info!(
        path = %output.display(),
        documents = ?retrieval.bundle.file_names(),
        bytes = archive.len(),
        "archive written"
    );
    Ok(())
}

async fn links(pipeline: &Pipeline, address: &str) -> Result<()> {
    let address = validate_address(address)?;
    let links = pipeline.links(address).await?;
    println!("{}", serde_json::to_string_pretty(&links)?);
    Ok(())
}
