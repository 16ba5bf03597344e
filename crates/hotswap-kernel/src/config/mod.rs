//! Host configuration loading
//!
//! Reads host configuration in any format the `config` crate understands:
//! YAML, TOML, JSON, INI, RON, JSON5.
//!
//! ## Features
//!
//! - Format detected from the file extension
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - Layering of several sources, later ones overriding earlier ones
//! - `PREFIX__FIELD` environment overrides

use std::path::Path;
use std::sync::LazyLock;

use config::{Config as Cfg, Environment, File, FileFormat};
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::debug;

pub use config::FileFormat as Format;


/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

static BRACED_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());
static BARE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").unwrap());

/// Detect configuration format from file extension
///
/// # Supported Extensions
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
/// - INI: `.ini`
/// - RON: `.ron`
/// - JSON5: `.json5`
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string
///
/// `${VAR_NAME}` is replaced first, then `$VAR_NAME`. References to unset
/// variables are left untouched.
///
/// ```rust,ignore
/// use hotswap_kernel::config::substitute_env_vars;
///
/// // HOTSWAP_OUT=target/debug
/// let result = substitute_env_vars("source_dir = \"${HOTSWAP_OUT}\"");
/// assert_eq!(result, "source_dir = \"target/debug\"");
/// ```
pub fn substitute_env_vars(content: &str) -> String {
    let braced = BRACED_VAR.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    BARE_VAR
        .replace_all(&braced, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn deserialize<T: DeserializeOwned>(builder: config::ConfigBuilder<config::builder::DefaultState>) -> ConfigResult<T> {
    let config = builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load configuration from a file
///
/// ```rust,ignore
/// use hotswap_kernel::config::load_config;
///
/// #[derive(serde::Deserialize)]
/// struct HostConfig {
///     source_dir: String,
///     modules: Vec<String>,
/// }
///
/// let config: HostConfig = load_config("hotswap.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    debug!("Loading config from {} as {:?}", path, format);

    from_str(&content, format)
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted_content = substitute_env_vars(content);

    deserialize(Cfg::builder().add_source(File::from_str(&substituted_content, format)))
}

/// Merge multiple configuration sources
///
/// Later sources override earlier ones (defaults -> file -> local overrides).
pub fn merge_configs<T>(sources: &[(&str, FileFormat)]) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();

    for (content, format) in sources {
        let substituted = substitute_env_vars(content);
        builder = builder.add_source(File::from_str(&substituted, *format));
    }

    deserialize(builder)
}

/// Load configuration with environment variable overrides
///
/// Variables are named `<PREFIX>_<FIELD>`, with `__` separating nested
/// fields: `HOTSWAP_DRAIN_INTERVAL_MS=100`, `HOTSWAP_FAILURE_POLICY=rollback`.
pub fn load_with_env<T>(path: &str, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content);

    deserialize(
        Cfg::builder()
            .add_source(File::from_str(&substituted, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            ),
    )
}
