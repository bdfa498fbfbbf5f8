use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3001/pantry";

/// How long the cache flusher waits after a change before writing.
const FLUSH_INTERVAL: Duration = Duration::from_millis(250);

pub struct Config {
    pub data_dir: PathBuf,
    /// Client-side cache mirror.
    pub cache_path: PathBuf,
    /// Catalog served by `pantry serve`.
    pub server_db_path: PathBuf,
    pub api_url: String,
    pub flush_interval: Duration,
}

impl Config {
    /// Resolve paths under the platform data directory, or `data_dir` when given.
    pub fn load(data_dir: Option<PathBuf>, api_url: &str) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => ProjectDirs::from("", "", "pantry")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config {
            cache_path: data_dir.join("cache.db"),
            server_db_path: data_dir.join("server.db"),
            api_url: normalize_api_url(api_url)?,
            data_dir,
            flush_interval: FLUSH_INTERVAL,
        })
    }
}

fn normalize_api_url(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!("Invalid API URL '{url}'. Use http://host:port/path");
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_explicit_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let config = Config::load(Some(nested.clone()), DEFAULT_API_URL).unwrap();
        assert!(nested.is_dir());
        assert_eq!(config.cache_path, nested.join("cache.db"));
        assert_eq!(config.server_db_path, nested.join("server.db"));
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_api_url_trailing_slash_trimmed() {
        assert_eq!(
            normalize_api_url(" http://localhost:3001/pantry/ ").unwrap(),
            "http://localhost:3001/pantry"
        );
    }

    #[test]
    fn test_api_url_requires_scheme() {
        assert!(normalize_api_url("localhost:3001").is_err());
    }
}
