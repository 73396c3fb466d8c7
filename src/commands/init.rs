use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the data directory, its secrets directory and an initial `config.json` pointing at
/// `api_url` along with default settings.
///
/// # Arguments
/// - `bills_home` - The directory that will be the root of data directory, e.g. `$HOME/bills`
/// - `api_url` - The base URL of the bills backend, e.g. `http://localhost:3000/`
///
/// # Errors
/// - Returns an error if the directory already holds a config, if `api_url` is not an http(s) URL
///   or if any file operations fail.
pub async fn init(bills_home: &Path, api_url: &str) -> Result<Out<()>> {
    let config = Config::create(bills_home, api_url)
        .await
        .context("Unable to create the data directory and configs")
        .pub_result(ErrorType::Config)?;
    Ok(format!(
        "Created {} for the backend at {}, now run 'bills login --token <TOKEN>'",
        config.root().display(),
        config.api_url()
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_twice() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("bills");
        let out = init(&home, "http://example.com/api").await.unwrap();
        assert!(out.message().contains("http://example.com/api/"), "{}", out.message());
        let config = Config::load(&home).await.unwrap();
        assert_eq!(config.api_url().as_str(), "http://example.com/api/");

        let err = init(&home, "http://example.com/api").await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Config);
    }

    #[tokio::test]
    async fn test_init_rejects_bad_url() {
        let dir = TempDir::new().unwrap();
        let err = init(&dir.path().join("bills"), "ftp://example.com").await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Config);
    }
}
