//! Configuration file handling for bills.
//!
//! The configuration file is stored at `$BILLS_HOME/config.json` and holds the backend URL and the
//! tunables of the sync engine. The session token lives in `$BILLS_HOME/.secrets/token.json` and
//! queued writes that did not reach the backend yet in `$BILLS_HOME/pending.json`.

use crate::error::{ErrorType, IntoResult};
use crate::model::StatusTiers;
use crate::sync::{RetryPolicy, SyncSettings};
use crate::{utils, Res, Result};
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const APP_NAME: &str = "bills";
const CONFIG_VERSION: u8 = 1;
const SECRETS: &str = ".secrets";
const TOKEN_JSON: &str = "token.json";
const CONFIG_JSON: &str = "config.json";
const PENDING_JSON: &str = "pending.json";

pub const DEFAULT_API_URL: &str = "http://localhost:3000/";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$BILLS_HOME` and from there it loads `$BILLS_HOME/config.json`. It provides paths
/// to the other files that are expected in a certain location within the bills home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    secrets: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    api_url: Url,
}

impl Config {
    /// Creates the data directory, its secrets subdirectory and an initial `config.json` pointing
    /// at `api_url` with default settings.
    ///
    /// # Errors
    /// - Returns an error if `api_url` is not a URL or if any file operation fails.
    pub async fn create(dir: impl Into<PathBuf>, api_url: &str) -> Result<Self> {
        Self::create_inner(dir.into(), api_url)
            .await
            .pub_result(ErrorType::Config)
    }

    async fn create_inner(maybe_relative: PathBuf, api_url: &str) -> Res<Self> {
        let api_url = parse_api_url(api_url)?;
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the bills home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;
        let secrets = root.join(SECRETS);
        utils::make_dir(&secrets).await?;

        let config_path = root.join(CONFIG_JSON);
        if config_path.is_file() {
            bail!(
                "A config file already exists at '{}'",
                config_path.display()
            )
        }
        let config_file = ConfigFile {
            api_url: api_url.to_string(),
            ..ConfigFile::default()
        };
        config_file.save(&config_path).await?;

        Ok(Self {
            root,
            secrets,
            config_path,
            config_file,
            api_url,
        })
    }

    /// This will
    /// - validate that `bills_home` exists and that the config file exists
    /// - load the config file
    /// - validate that the secrets directory exists
    /// - return the loaded configuration object
    pub async fn load(bills_home: impl Into<PathBuf>) -> Result<Self> {
        Self::load_inner(bills_home.into())
            .await
            .pub_result(ErrorType::Config)
    }

    async fn load_inner(maybe_relative: PathBuf) -> Res<Self> {
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("Bills home is missing, run 'bills init' first")?;
        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;
        let api_url = parse_api_url(&config_file.api_url)?;
        let secrets = root.join(SECRETS);
        if !secrets.is_dir() {
            bail!("The secrets directory is missing '{}'", secrets.display())
        }
        Ok(Self {
            root,
            secrets,
            config_path,
            config_file,
            api_url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    /// The base URL of the backend. It always ends with a slash.
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config_file.request_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.config_file.probe_interval_secs.max(1))
    }

    pub fn status_tiers(&self) -> StatusTiers {
        StatusTiers::new(self.config_file.due_soon_days)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            batch_size: self.config_file.batch_size.max(1),
            retry: RetryPolicy {
                max_attempts: self.config_file.max_attempts.max(1),
                backoff_step: Duration::from_millis(self.config_file.backoff_step_ms),
            },
            tiers: self.status_tiers(),
            probe_interval: self.probe_interval(),
        }
    }

    pub fn token_path(&self) -> PathBuf {
        self.secrets.join(TOKEN_JSON)
    }

    /// Where queued writes are kept between runs.
    pub fn journal_path(&self) -> PathBuf {
        self.root.join(PENDING_JSON)
    }

    /// Stores the session token, readable only by the owner.
    pub(crate) async fn save_token(&self, token: &str) -> Res<()> {
        let path = self.token_path();
        let file = TokenFile {
            token: token.to_string(),
            saved_at: Utc::now(),
        };
        utils::serialize(&path, &file).await?;
        utils::make_private(&path).await
    }

    /// The stored session token, `None` if the user has not logged in.
    pub(crate) async fn load_token(&self) -> Res<Option<String>> {
        let path = self.token_path();
        let Some(content) = utils::read_optional(&path).await? else {
            return Ok(None);
        };
        let file: TokenFile = serde_json::from_str(&content)
            .with_context(|| format!("Unable to parse the token file at {}", path.display()))?;
        Ok(Some(file.token).filter(|t| !t.trim().is_empty()))
    }

    pub(crate) async fn remove_token(&self) -> Res<()> {
        utils::remove(&self.token_path()).await
    }
}

fn parse_api_url(s: &str) -> Res<Url> {
    let mut url = Url::parse(s).with_context(|| format!("Invalid backend URL '{s}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("The backend URL must be http or https, got '{s}'")
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "bills",
///   "config_version": 1,
///   "api_url": "http://localhost:3000/",
///   "probe_interval_secs": 15,
///   "batch_size": 5,
///   "max_attempts": 3,
///   "backoff_step_ms": 1000,
///   "due_soon_days": 15,
///   "request_timeout_secs": 10
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
struct ConfigFile {
    /// Application name, should always be "bills"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    /// Base URL of the bills backend
    api_url: String,

    /// Seconds between connectivity probes while watching
    probe_interval_secs: u64,

    /// Writes sent to the backend at the same time
    batch_size: usize,

    /// Attempts before a failing write is undone
    max_attempts: u32,

    /// Retry `n` waits `n` times this many milliseconds
    backoff_step_ms: u64,

    /// Days ahead in which an open bill counts as due soon, `null` to turn the tier off
    due_soon_days: Option<u32>,

    request_timeout_secs: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let settings = SyncSettings::default();
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            api_url: DEFAULT_API_URL.to_string(),
            probe_interval_secs: settings.probe_interval.as_secs(),
            batch_size: settings.batch_size,
            max_attempts: settings.retry.max_attempts,
            backoff_step_ms: settings.retry.backoff_step.as_millis() as u64,
            due_soon_days: settings.tiers.due_soon_days,
            request_timeout_secs: 10,
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile asynchronously from the specified path. Missing settings take their
    /// defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path)
            .await
            .context("Unable to load the config file")?;

        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        Ok(config)
    }

    /// Saves the ConfigFile to the specified path.
    async fn save(&self, path: impl AsRef<Path>) -> Res<()> {
        utils::serialize(path.as_ref(), self)
            .await
            .context("Unable to write config file")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    token: String,
    saved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_create() {
        let dir = TempDir::new().unwrap();
        let home_dir = dir.path().join("bills_home");
        let config = Config::create(&home_dir, "https://bills.example.com/v1")
            .await
            .unwrap();

        assert_eq!(config.api_url().as_str(), "https://bills.example.com/v1/");
        assert!(config.secrets().is_dir());
        assert!(config.config_path().is_file());
        assert_eq!(config.sync_settings(), SyncSettings::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));

        let loaded = Config::load(&home_dir).await.unwrap();
        assert_eq!(loaded.api_url(), config.api_url());
        assert_eq!(loaded.journal_path(), loaded.root().join("pending.json"));
    }

    #[tokio::test]
    async fn test_config_create_twice() {
        let dir = TempDir::new().unwrap();
        Config::create(dir.path(), DEFAULT_API_URL).await.unwrap();
        let e = Config::create(dir.path(), DEFAULT_API_URL)
            .await
            .unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Config);
    }

    #[tokio::test]
    async fn test_config_rejects_bad_url() {
        let dir = TempDir::new().unwrap();
        assert!(Config::create(dir.path(), "not a url").await.is_err());
        assert!(Config::create(dir.path(), "ftp://example.com").await.is_err());
    }

    #[tokio::test]
    async fn test_config_load_missing() {
        let dir = TempDir::new().unwrap();
        let e = Config::load(dir.path().join("nope")).await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Config);
        let e = Config::load(dir.path()).await.unwrap_err();
        assert!(e.to_string().contains("config file is missing"));
    }

    #[tokio::test]
    async fn test_config_file_load_with_minimal_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let json = r#"{
            "app_name": "bills",
            "api_url": "http://127.0.0.1:8080",
            "batch_size": 2,
            "due_soon_days": null
        }"#;
        utils::write(&path, json).await.unwrap();

        let config = ConfigFile::load(&path).await.unwrap();
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.due_soon_days, None);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.config_version, CONFIG_VERSION);
    }

    #[tokio::test]
    async fn test_config_file_load_invalid_app_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        utils::write(&path, r#"{"app_name": "wrong_app"}"#)
            .await
            .unwrap();

        let result = ConfigFile::load(&path).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid app_name"));
    }

    #[tokio::test]
    async fn test_config_file_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let original = ConfigFile {
            batch_size: 9,
            due_soon_days: Some(7),
            ..ConfigFile::default()
        };
        original.save(&path).await.unwrap();
        assert_eq!(ConfigFile::load(&path).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_token_roundtrip() {
        let dir = TempDir::new().unwrap();
        let config = Config::create(dir.path(), DEFAULT_API_URL).await.unwrap();
        assert_eq!(config.load_token().await.unwrap(), None);

        config.save_token("s3cret").await.unwrap();
        assert_eq!(config.load_token().await.unwrap().as_deref(), Some("s3cret"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(config.token_path())
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        config.remove_token().await.unwrap();
        assert_eq!(config.load_token().await.unwrap(), None);
    }
}
