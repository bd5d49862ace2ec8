//! Service Manager CLI entry point

use std::path::Path;

use clap::Parser;
use tracing::{error, info};

use svcmgr_cli::{
    app::DemoApp,
    cli::{Cli, Commands},
    config::AppConfig,
    error::{CliError, Result},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = execute(cli).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Config => {
            print!("{}", AppConfig::default().to_toml()?);
            Ok(())
        }
        Commands::Check => {
            let path = cli
                .config
                .ok_or_else(|| CliError::Config("check needs --config <path>".to_string()))?;
            let config = AppConfig::load_from_file(&path)?;
            config.validate()?;
            println!("{}: ok (manager {})", path.display(), config.manager.manager_id);
            Ok(())
        }
        Commands::Demo { file } => {
            let config = load_configuration(cli.config.as_deref())?;
            run_demo(config, &file).await
        }
    }
}

async fn run_demo(config: AppConfig, file: &Path) -> Result<()> {
    let app = DemoApp::start(config).await?;
    let outcome = app.run(file).await;
    let pending = app.shutdown().await?;
    let summary = outcome?;
    info!(pending, "Demo finished");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from the given file, the per-user file, or the demo preset
fn load_configuration(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        info!("Loading configuration from: {}", path.display());
        return AppConfig::load_from_file(path);
    }
    if let Some(path) = AppConfig::default_path().filter(|path| path.exists()) {
        info!("Loading configuration from: {}", path.display());
        return AppConfig::load_from_file(&path);
    }
    info!("Using demo configuration");
    Ok(AppConfig::demo())
}
