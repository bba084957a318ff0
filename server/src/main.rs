use {
    anyhow::Result,
    clap::Parser,
    rangecrypt_server::{Config, run, setup_logger},
    std::path::PathBuf,
};

/// Streams byte ranges of archived files over HTTP.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the json5 config file.
    #[arg(long, short)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    setup_logger(config.log_file.as_deref(), &config.log_filter)?;
    run(config).await
}
