use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Main configuration structure for the merge gate
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MergeGateConfig {
    /// Managed working copy
    pub repository: RepositoryConfig,
    /// Merge requirement settings
    pub requirements: RequirementsConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Path of the local working copy
    pub path: PathBuf,
    /// Remote pull requests are fetched from and landed to
    pub remote: String,
    /// URL to clone from when the working copy does not exist yet
    pub remote_url: Option<String>,
    /// Default integration branch
    pub integration_branch: String,
    /// Token used in place of a password (can be set via env var)
    pub token: Option<String>,
    pub committer_name: String,
    pub committer_email: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".merge-gate/repository"),
            remote: "origin".to_string(),
            remote_url: None,
            integration_branch: "main".to_string(),
            token: None,
            committer_name: "Merge Gate".to_string(),
            committer_email: "merge-gate@users.noreply.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequirementsConfig {
    /// Re-check delay for a requirement whose evaluation failed
    pub failure_reevaluate_seconds: u64,
    /// Requirement ids that start disabled
    pub disabled: Vec<Uuid>,
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self {
            failure_reevaluate_seconds: crate::requirements::aggregator::DEFAULT_FAILURE_REEVALUATE_SECONDS,
            disabled: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level, used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON structured logs
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: true,
        }
    }
}

impl MergeGateConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (merge-gate.toml, .merge-gate-rc)
    /// 3. Environment variables (prefixed with MERGE_GATE__, e.g.
    ///    MERGE_GATE__REPOSITORY__PATH)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`load`](Self::load), reading files from `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&MergeGateConfig::default())
                .context("Failed to serialize default configuration")?,
        );

        let toml_path = dir.join("merge-gate.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".merge-gate-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("MERGE_GATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut merge_gate_config: MergeGateConfig = builder
            .build()?
            .try_deserialize()
            .context("Invalid merge-gate configuration")?;

        // Special handling for the push token - check the usual env var too
        if merge_gate_config.repository.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                merge_gate_config.repository.token = Some(token);
            }
        }

        Ok(merge_gate_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<MergeGateConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = MergeGateConfig::load_env_file();
        MergeGateConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static MergeGateConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}
