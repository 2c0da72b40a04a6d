use anyhow::Result;
use charm_recipe_sync::cli::{run, Cli, LogLevel};
use charm_recipe_sync::load_config;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli);
    tracing::info!("CLI arguments parsed, invoking run");

    let result = run(cli).await;
    match &result {
        Ok(_) => tracing::info!("CLI completed successfully"),
        Err(e) => tracing::error!(error = %e, "CLI exited with error"),
    }
    result
}

/// Initialise tracing for the CLI. The level comes from `--log`, falling
/// back to the user config file, with `RUST_LOG` overriding both.
fn init_tracing(cli: &Cli) {
    let file_config = load_config::file_config();
    let level = cli
        .log
        .or_else(|| file_config.log_level.as_deref().and_then(LogLevel::parse_name))
        .unwrap_or(LogLevel::Error);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
