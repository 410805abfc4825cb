//! Thin CLI collaborator around the archival pipeline
//!
//! All the real behavior lives in the library; this binary only loads
//! configuration, wires authentication, and invokes the pipeline's
//! collaborator-facing operations.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mailvault::auth::{self, SharedTokenProvider, TokenProvider};
use mailvault::config::Config;
use mailvault::drive::DriveArchiveStore;
use mailvault::gmail::GmailMessageSource;
use mailvault::hubs;
use mailvault::ledger::ArchiveLedger;
use mailvault::pipeline::ArchivePipeline;

#[derive(Parser)]
#[command(name = "mailvault", about = "Archive labeled Gmail attachments to Drive")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "mailvault.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one archival batch
    Run,
    /// Print the last run report and token status
    Status,
    /// First-time authorization (prints the consent URL, reads the code)
    Login,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls; multiple dependencies use
    // different providers
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mailvault=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mailvault=info,warn,error"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(&cli.config).await?;
    let secret = auth::load_application_secret(&config.auth.credentials_path).await?;
    let provider = Arc::new(TokenProvider::new(secret, &config.auth.token_path).await?);

    match cli.command {
        Commands::Run => {
            let (gmail, drive) = hubs::build(SharedTokenProvider(Arc::clone(&provider)))?;
            let ledger = ArchiveLedger::load(&config.archive.ledger_path).await?;
            let mut pipeline = ArchivePipeline::new(
                config,
                GmailMessageSource::new(gmail),
                DriveArchiveStore::new(drive),
                ledger,
            );

            let report = pipeline.run_batch().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status => {
            let ledger = ArchiveLedger::load(&config.archive.ledger_path).await?;
            let token = provider.validate().await;
            let status = serde_json::json!({
                "token": token,
                "lastRun": ledger.last_run(),
                "lastReport": ledger.last_report(),
                "recentErrorCount": ledger.get_recent_errors(usize::MAX).len(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Login => {
            let url = provider.authorization_url(&config.auth.redirect_uri);
            println!("Open this URL in a browser and authorize access:\n\n{}\n", url);
            print!("Paste the authorization code: ");
            std::io::stdout().flush()?;

            let mut code = String::new();
            std::io::stdin().lock().read_line(&mut code)?;
            let code = code.trim();
            if code.is_empty() {
                anyhow::bail!("no authorization code provided");
            }

            provider
                .exchange_authorization_code(code, &config.auth.redirect_uri)
                .await?;
            println!("Authorization complete; credential stored.");
        }
    }

    Ok(())
}
