//! Application configuration for cncflow.
//!
//! User config lives at `~/.cncflow/cncflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CncFlowError, Result};
use crate::types::Stage;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "cncflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".cncflow";

// ---------------------------------------------------------------------------
// Config structs (matching cncflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source tree watching.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Remote stage services.
    #[serde(default)]
    pub services: ServicesConfig,

    /// Rule set location.
    #[serde(default)]
    pub rules: RulesConfig,
}

/// `[watch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Root of the source data tree.
    #[serde(default = "default_source_path")]
    pub source_path: String,

    /// Seconds between timer-driven cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Only files ending with this suffix count as new work.
    #[serde(default = "default_data_extension")]
    pub data_extension: String,

    /// Deepest directory level the change walk descends into.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Upper bound on directory entries visited per walk.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            source_path: default_source_path(),
            interval_secs: default_interval_secs(),
            data_extension: default_data_extension(),
            max_depth: default_max_depth(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_source_path() -> String {
    "test-data/source_data".into()
}
fn default_interval_secs() -> u64 {
    60
}
fn default_data_extension() -> String {
    ".json".into()
}
fn default_max_depth() -> usize {
    32
}
fn default_max_entries() -> usize {
    200_000
}

/// `[services]` section: one entry per pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_primary_scan")]
    pub primary_scan: ServiceConfig,

    #[serde(default = "default_analysis")]
    pub analysis: ServiceConfig,

    #[serde(default = "default_tool_scan")]
    pub tool_scan: ServiceConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            primary_scan: default_primary_scan(),
            analysis: default_analysis(),
            tool_scan: default_tool_scan(),
        }
    }
}

impl ServicesConfig {
    /// The service entry backing a stage.
    pub fn for_stage(&self, stage: Stage) -> &ServiceConfig {
        match stage {
            Stage::PrimaryScan => &self.primary_scan,
            Stage::Analysis => &self.analysis,
            Stage::ToolScan => &self.tool_scan,
        }
    }
}

fn default_primary_scan() -> ServiceConfig {
    ServiceConfig::local(3001)
}
fn default_analysis() -> ServiceConfig {
    ServiceConfig::local(3005)
}
fn default_tool_scan() -> ServiceConfig {
    ServiceConfig::local(3002)
}

/// `[services.<stage>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base address, e.g. `http://localhost:3001`.
    pub address: String,

    /// Disabled stages are skipped without any network traffic.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on a single invocation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServiceConfig {
    fn local(port: u16) -> Self {
        Self {
            address: format!("http://localhost:{port}"),
            enabled: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    300
}

/// `[rules]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Rule set TOML file. The built-in rule set is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.cncflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CncFlowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.cncflow/cncflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CncFlowError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CncFlowError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    if config.watch.interval_secs == 0 {
        return Err(CncFlowError::config("watch.interval_secs must be at least 1"));
    }

    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CncFlowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CncFlowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CncFlowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
