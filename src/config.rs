//! Configuration loading for moktrust.
//!
//! Loads `/etc/moktrust.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so an absent or empty config file is valid. No
//! setting alters the reconciliation logic itself — only which modules are
//! managed and where host files live.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Default location of the optional configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/moktrust.toml";

/// Top-level moktrust configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MoktrustConfig {
    /// Managed kernel module set.
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Signing identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Host file locations.
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Managed kernel module set.
#[derive(Debug, Clone, Deserialize)]
pub struct ModulesConfig {
    /// Module names this host is responsible for keeping built, signed,
    /// and loadable (one `.ko` per name per kernel version).
    #[serde(default = "default_module_names")]
    pub names: Vec<String>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            names: default_module_names(),
        }
    }
}

/// Signing identity settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Directory holding the private key and DER certificate. Must be
    /// root-only; created with mode 0700 when missing.
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    /// X.509 common name embedded in the certificate. Also used to match
    /// against the firmware's enrolled-key listing.
    #[serde(default = "default_common_name")]
    pub common_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_dir: default_key_dir(),
            common_name: default_common_name(),
        }
    }
}

/// Host file locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Root of per-kernel module trees (`/lib/modules`).
    #[serde(default = "default_modules_root")]
    pub modules_root: PathBuf,

    /// Root of installed kernel header trees (`/usr/src`), where the
    /// per-kernel `sign-file` tool lives.
    #[serde(default = "default_headers_root")]
    pub headers_root: PathBuf,

    /// Boot-time autoload declaration, one module name per line.
    #[serde(default = "default_autoload_conf")]
    pub autoload_conf: PathBuf,

    /// Kernel post-install hook destination.
    #[serde(default = "default_hook_path")]
    pub hook_path: PathBuf,

    /// Directory for JSON log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            modules_root: default_modules_root(),
            headers_root: default_headers_root(),
            autoload_conf: default_autoload_conf(),
            hook_path: default_hook_path(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_module_names() -> Vec<String> {
    vec!["wl".to_owned()]
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("/var/lib/moktrust")
}

fn default_common_name() -> String {
    "moktrust kernel module signing".to_owned()
}

fn default_modules_root() -> PathBuf {
    PathBuf::from("/lib/modules")
}

fn default_headers_root() -> PathBuf {
    PathBuf::from("/usr/src")
}

fn default_autoload_conf() -> PathBuf {
    PathBuf::from("/etc/modules-load.d/moktrust.conf")
}

fn default_hook_path() -> PathBuf {
    PathBuf::from("/etc/kernel/postinst.d/zz-moktrust")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/moktrust")
}

/// Resolved host file locations used by every pipeline stage.
///
/// Derived from [`MoktrustConfig`] once at startup; tests construct this
/// directly against fixture directories.
#[derive(Debug, Clone)]
pub struct HostPaths {
    /// PEM private key of the signing identity.
    pub key_file: PathBuf,
    /// DER self-signed certificate of the signing identity.
    pub cert_file: PathBuf,
    /// Root of per-kernel module trees.
    pub modules_root: PathBuf,
    /// Root of installed kernel header trees.
    pub headers_root: PathBuf,
    /// Boot-time autoload declaration.
    pub autoload_conf: PathBuf,
    /// Kernel post-install hook destination.
    pub hook_path: PathBuf,
    /// Directory for JSON log files.
    pub log_dir: PathBuf,
}

impl HostPaths {
    /// Derive concrete host paths from loaded configuration.
    pub fn from_config(config: &MoktrustConfig) -> Self {
        Self {
            key_file: config.identity.key_dir.join("moktrust.key"),
            cert_file: config.identity.key_dir.join("moktrust.der"),
            modules_root: config.paths.modules_root.clone(),
            headers_root: config.paths.headers_root.clone(),
            autoload_conf: config.paths.autoload_conf.clone(),
            hook_path: config.paths.hook_path.clone(),
            log_dir: config.paths.log_dir.clone(),
        }
    }
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<MoktrustConfig> {
    if !path.exists() {
        return Ok(MoktrustConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    parse_config(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Parse configuration from TOML text. Exported for testing.
///
/// # Errors
///
/// Returns an error when the TOML is malformed or fields have wrong types.
pub fn parse_config(content: &str) -> anyhow::Result<MoktrustConfig> {
    let config: MoktrustConfig = toml::from_str(content)?;

    anyhow::ensure!(
        !config.modules.names.is_empty(),
        "managed module set must not be empty"
    );
    anyhow::ensure!(
        !config.identity.common_name.trim().is_empty(),
        "identity common name must not be empty"
    );

    Ok(config)
}
