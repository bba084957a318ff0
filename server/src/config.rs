use {
    anyhow::{Context as _, Result, ensure},
    rangecrypt_protocol::AccessToken,
    rangecrypt_sdk::{EngineConfig, fetch::FetchConfig, metadata::CatalogEntry},
    serde::Deserialize,
    std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration},
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Log to this file instead of stdout.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    pub access_tokens: Vec<AccessToken>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
    /// How long open transfers may continue after a shutdown signal.
    #[serde(with = "humantime_serde", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

fn default_log_filter() -> String {
    "info".into()
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs_err::read_to_string(path)?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.access_tokens.is_empty(),
            "at least one access token is required"
        );
        self.engine.validate().context("invalid engine config")
    }
}
