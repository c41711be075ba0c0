use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config as cfg;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

/// Legacy address variables; they win over every other source.
pub const SNA_ADDR_VAR: &str = "SNA_ADDR";
pub const DNA_ADDR_VAR: &str = "DNA_ADDR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the software network analysis service.
    pub sna_url: String,
    /// Base URL of the dependency network analysis service.
    pub dna_url: String,
    /// Per-request HTTP timeout; 0 disables it.
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            sna_url: "http://localhost:8080".into(),
            dna_url: "http://localhost:8090".into(),
            request_timeout_secs: 0,
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Deadline for one background fetch; 0 disables it.
    #[serde(default = "CoordinatorConfig::default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "CoordinatorConfig::default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Ask the SNA service for stored results and target validity before triggering analysis.
    #[serde(default)]
    pub precheck_projects: bool,
}

impl CoordinatorConfig {
    fn default_fetch_timeout_secs() -> u64 {
        600
    }

    fn default_max_concurrent_fetches() -> usize {
        32
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: Self::default_fetch_timeout_secs(),
            max_concurrent_fetches: Self::default_max_concurrent_fetches(),
            precheck_projects: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewaySettings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewaySettings {
    pub fn default_env() -> String {
        env::var("APP_ENV")
            .ok()
            .or_else(|| env::var("RUST_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn default_config_dir() -> PathBuf {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            project_config
        } else {
            cwd
        }
    }

    /// Loads settings from `config_dir` and the process environment, then validates them.
    pub fn load(config_dir: &Path, env_name: &str) -> Result<Self> {
        info!("Loading gateway configuration from {:?} ({})", config_dir, env_name);
        let settings = Self::load_from_sources(config_dir, env_name, None)?;
        settings.validate()?;
        Ok(settings)
    }

    /// `vars` replaces the process environment when given.
    pub fn load_from_sources(
        config_dir: &Path,
        env_name: &str,
        vars: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let lookup = |name: &str| match &vars {
            Some(vars) => vars.get(name).cloned(),
            None => env::var(name).ok(),
        };
        let sna_addr = lookup(SNA_ADDR_VAR).filter(|v| !v.trim().is_empty());
        let dna_addr = lookup(DNA_ADDR_VAR).filter(|v| !v.trim().is_empty());

        let settings: GatewaySettings = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                cfg::Environment::with_prefix("SNA_GATEWAY")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars.clone()),
            )
            .set_override_option("upstream.sna_url", sna_addr)
            .context("applying SNA_ADDR")?
            .set_override_option("upstream.dna_url", dna_addr)
            .context("applying DNA_ADDR")?
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.server.host.trim().is_empty(),
            "server.host cannot be empty"
        );
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        Url::parse(&self.upstream.sna_url)
            .with_context(|| format!("upstream.sna_url is not a URL: {}", self.upstream.sna_url))?;
        Url::parse(&self.upstream.dna_url)
            .with_context(|| format!("upstream.dna_url is not a URL: {}", self.upstream.dna_url))?;
        anyhow::ensure!(
            self.coordinator.max_concurrent_fetches > 0,
            "coordinator.max_concurrent_fetches must be > 0"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn vars(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_without_any_source() {
        let dir = tempfile::tempdir().unwrap();
        let settings =
            GatewaySettings::load_from_sources(dir.path(), "test", vars(&[])).unwrap();
        assert_eq!(settings.server.port, 8070);
        assert_eq!(settings.coordinator.fetch_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(settings.upstream.request_timeout(), None);
        assert!(!settings.coordinator.precheck_projects);
        settings.validate().unwrap();
    }

    #[test]
    fn files_layer_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[server]\nhost = \"127.0.0.1\"\nport = 9000\n[coordinator]\nprecheck_projects = true\n",
        )
        .unwrap();
        fs::write(dir.path().join("test.toml"), "[server]\nport = 9100\n").unwrap();

        let settings =
            GatewaySettings::load_from_sources(dir.path(), "test", vars(&[])).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9100);
        assert!(settings.coordinator.precheck_projects);
    }

    #[test]
    fn legacy_addr_variables_override_files_and_prefixed_env() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[upstream]\nsna_url = \"http://file-sna\"\ndna_url = \"http://file-dna\"\n",
        )
        .unwrap();

        let settings = GatewaySettings::load_from_sources(
            dir.path(),
            "test",
            vars(&[
                ("SNA_GATEWAY__UPSTREAM__SNA_URL", "http://env-sna"),
                ("SNA_GATEWAY__COORDINATOR__FETCH_TIMEOUT_SECS", "0"),
                ("DNA_ADDR", "http://dna:8090"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.upstream.sna_url, "http://env-sna");
        assert_eq!(settings.upstream.dna_url, "http://dna:8090");
        assert_eq!(settings.coordinator.fetch_timeout(), None);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut settings = GatewaySettings::default();
        settings.upstream.dna_url = "not a url".into();
        assert!(settings.validate().is_err());

        let mut settings = GatewaySettings::default();
        settings.coordinator.max_concurrent_fetches = 0;
        assert!(settings.validate().is_err());

        let mut settings = GatewaySettings::default();
        settings.server.host = " ".into();
        assert!(settings.validate().is_err());
    }
}
