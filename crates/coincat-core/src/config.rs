// Configuration loading and parsing (coincat.toml, credentials.toml).

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub deep_link: DeepLinkConfig,
    pub valuation: ValuationConfig,
    pub prices: PricesConfig,
    pub sync: SyncConfig,
    pub credentials: CredentialsConfig,
}

/// Raw deserialization target for coincat.toml.
#[derive(Debug, Clone, Deserialize)]
struct CoincatFile {
    storage: StorageConfig,
    deep_link: DeepLinkConfig,
    #[serde(default)]
    valuation: ValuationConfig,
    prices: PricesConfig,
    #[serde(default)]
    sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file. Empty means the platform data directory.
    #[serde(default)]
    pub db_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeepLinkConfig {
    /// Prefix of every coin's deep link, e.g. `https://coins.example/app`.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValuationConfig {
    #[serde(default = "default_lookup_delay_ms")]
    pub lookup_delay_ms: u64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            lookup_delay_ms: default_lookup_delay_ms(),
        }
    }
}

fn default_lookup_delay_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricesConfig {
    /// Page the spot prices are scraped from.
    pub source_url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncConfig {
    /// Realtime Database root URL. Empty disables cloud sync.
    #[serde(default)]
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub sync_auth_token: Option<String>,
}

impl Config {
    pub fn lookup_delay(&self) -> Duration {
        Duration::from_millis(self.valuation.lookup_delay_ms)
    }

    /// Whether a remote database is configured at all.
    pub fn sync_available(&self) -> bool {
        !self.sync.database_url.trim().is_empty()
    }

    /// Resolve the SQLite path: the configured one, or `coincat.db` in the
    /// platform data directory.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        let configured = self.storage.db_path.trim();
        if !configured.is_empty() {
            return Ok(PathBuf::from(configured));
        }
        let dirs = directories::ProjectDirs::from("", "", "coincat").ok_or_else(|| {
            ConfigError::ValidationError {
                field: "storage.db_path".into(),
                message: "no platform data directory available; set an explicit path".into(),
            }
        })?;
        Ok(dirs.data_dir().join("coincat.db"))
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

const MAIN_FILE: &str = "coincat.toml";
const CREDENTIALS_FILE: &str = "credentials.toml";

/// Load and validate `config/coincat.toml` and (optionally)
/// `config/credentials.toml` relative to `base_dir`. Does not copy defaults.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    let file: CoincatFile = read_toml(&config_dir.join(MAIN_FILE))?;
    let credentials_path = config_dir.join(CREDENTIALS_FILE);
    let credentials = if credentials_path.exists() {
        read_toml(&credentials_path)?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        storage: file.storage,
        deep_link: file.deep_link,
        valuation: file.valuation,
        prices: file.prices,
        sync: file.sync,
        credentials,
    };
    validate(&config)?;
    Ok(config)
}

/// Seed `config/coincat.toml` from `defaults/coincat.toml` on first run.
/// Returns the created path, or `None` when the config already existed.
/// Credentials are never seeded; `defaults/credentials.toml.example` is a
/// template to copy by hand.
pub fn ensure_config_files(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(MAIN_FILE);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(MAIN_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no config/{MAIN_FILE} and no defaults/{MAIN_FILE} in {}",
                base_dir.display()
            ),
        });
    }

    let copy_error = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to create {}: {e}", target.display()),
    };
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(copy_error)?;
    }
    std::fs::copy(&source, &target).map_err(copy_error)?;
    info!("created {} from defaults", target.display());
    Ok(Some(target))
}

/// Load config relative to the current directory, seeding defaults first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("cannot determine the working directory: {e}"),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let required: &[(&str, &str)] = &[
        ("deep_link.base_url", config.deep_link.base_url.as_str()),
        ("prices.source_url", config.prices.source_url.as_str()),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: field.to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    let db_url = config.sync.database_url.trim();
    if !db_url.is_empty() && !db_url.starts_with("https://") {
        return Err(ConfigError::ValidationError {
            field: "sync.database_url".into(),
            message: format!("must start with https://, got {db_url}"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const VALID: &str = r#"
[storage]
db_path = "coins.db"

[deep_link]
base_url = "https://coins.example/app"

[valuation]
lookup_delay_ms = 10

[prices]
source_url = "https://www.kitco.com/market/"

[sync]
database_url = "https://demo.firebaseio.com"
"#;

    /// Fresh scratch directory with `config/coincat.toml` holding `main`.
    fn scratch(name: &str, main: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/coincat.toml"), main).unwrap();
        tmp
    }

    #[test]
    fn loads_valid_config() {
        let tmp = scratch("coincat_config_valid", VALID);
        let config = load_config_from(&tmp).expect("should load");
        assert_eq!(config.deep_link.base_url, "https://coins.example/app");
        assert_eq!(config.lookup_delay(), Duration::from_millis(10));
        assert_eq!(config.db_path().unwrap(), PathBuf::from("coins.db"));
        assert!(config.sync_available());
        assert!(config.credentials.sync_auth_token.is_none());
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn optional_sections_default() {
        let tmp = scratch(
            "coincat_config_minimal",
            "[storage]\n[deep_link]\nbase_url = \"https://x\"\n[prices]\nsource_url = \"https://y\"\n",
        );
        let config = load_config_from(&tmp).expect("should load");
        assert_eq!(config.valuation.lookup_delay_ms, 1500);
        assert!(!config.sync_available());
        if let Ok(path) = config.db_path() {
            assert!(path.ends_with("coincat.db"));
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn reads_credentials_when_present() {
        let tmp = scratch("coincat_config_creds", VALID);
        fs::write(
            tmp.join("config/credentials.toml"),
            "sync_auth_token = \"secret\"\n",
        )
        .unwrap();
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.credentials.sync_auth_token.as_deref(), Some("secret"));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_base_url() {
        let tmp = scratch(
            "coincat_config_empty_base",
            &VALID.replace("https://coins.example/app", ""),
        );
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "deep_link.base_url"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_plain_http_database() {
        let tmp = scratch(
            "coincat_config_http_db",
            &VALID.replace("https://demo.firebaseio.com", "http://demo.firebaseio.com"),
        );
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "sync.database_url"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_main_file_and_bad_toml() {
        let tmp = std::env::temp_dir().join("coincat_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::FileNotFound { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);

        let tmp = scratch("coincat_config_bad_toml", "[deep_link\nbase_url = ");
        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::ParseError { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn first_run_seeds_main_config_only() {
        let tmp = std::env::temp_dir().join("coincat_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        let defaults = tmp.join("defaults");
        fs::create_dir_all(&defaults).unwrap();
        fs::write(defaults.join("coincat.toml"), VALID).unwrap();
        fs::write(defaults.join("credentials.toml.example"), "sync_auth_token = \"\"\n").unwrap();

        let created = ensure_config_files(&tmp).expect("should succeed");
        assert_eq!(created, Some(tmp.join("config/coincat.toml")));
        assert!(!tmp.join("config/credentials.toml").exists());
        assert!(load_config_from(&tmp).is_ok());

        // An edited config is never overwritten.
        fs::write(tmp.join("config/coincat.toml"), "# edited\n").unwrap();
        assert_eq!(ensure_config_files(&tmp).unwrap(), None);
        assert_eq!(
            fs::read_to_string(tmp.join("config/coincat.toml")).unwrap(),
            "# edited\n"
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_errors_when_both_dirs_missing() {
        let tmp = std::env::temp_dir().join("coincat_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        let err = ensure_config_files(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }
}
