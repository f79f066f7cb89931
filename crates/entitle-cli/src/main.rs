//! Entitle CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands, LicenseCommands};
use config::{CliConfig, OutputFormat};
use entitle_licensing::LicensingContext;

#[derive(Parser)]
#[command(name = "entitle")]
#[command(author, version, about = "Entitle license validation and activation", long_about = None)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Licensing configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let builder = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,entitle=info")),
        )
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cli_config = CliConfig::load().unwrap_or_default();
    let json = cli.json || cli_config.output_format == OutputFormat::Json;
    let licensing = cli_config.licensing_config(cli.config.as_deref())?;

    if let Commands::Config { command } = &cli.command {
        return match command {
            ConfigCommands::Show => handlers::show_config(&cli_config, &licensing, json),
            ConfigCommands::Set { key, value } => handlers::set_config(key, value),
        };
    }

    let ctx = LicensingContext::open(licensing).await?;

    let code = match cli.command {
        Commands::Status => handlers::status(&ctx, json).await,
        Commands::Validate {
            key,
            strict,
            online,
        } => handlers::validate(&ctx, &key, strict, online, json).await,
        Commands::Activate { key, offline } => handlers::activate(&ctx, &key, offline, json).await,
        Commands::Trial => handlers::trial(&ctx, json).await,
        Commands::Fingerprint => handlers::fingerprint(&ctx, json),
        Commands::Stats => handlers::stats(&ctx, json).await,
        Commands::License { command } => match command {
            LicenseCommands::Show { key } => handlers::show_license(&ctx, key.as_deref(), json).await,
            LicenseCommands::SetStatus { key, status } => {
                handlers::set_license_status(&ctx, &key, &status).await
            }
            LicenseCommands::Deactivate { key } => handlers::deactivate(&ctx, &key).await,
            LicenseCommands::Remove { key, yes } => handlers::remove_license(&ctx, &key, yes).await,
        },
        Commands::Config { .. } => Ok(ExitCode::SUCCESS),
    };

    ctx.close().await;
    code
}
