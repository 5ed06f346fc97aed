use benchblock::{
    Cli, Command, LogFormat, run_collect, run_load_test, run_single_transaction,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(format: LogFormat, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    match format {
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt().json().with_env_filter(filter).try_init();
        }
        LogFormat::Text => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_format, &cli.log_level);
    let config = cli.run_config()?;

    match cli.command {
        Command::Load(_) if config.load.run_one => {
            let hash = run_single_transaction(config).await?;
            info!(tx_hash = %hash, "Single transaction complete");
        }
        Command::Load(_) => run_load_test(config).await?.log(),
        Command::Collect(_) => run_collect(config).await?.log(),
    }
    Ok(())
}
