// Configuration loader
// Loads ~/.herald/config.toml (or an explicit path) and applies env overrides

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::{herald_home, Config};

/// `~/.herald/config.toml`
pub fn default_config_path() -> PathBuf {
    herald_home().join("config.toml")
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, `~/.herald/config.toml` is used
/// when present and built-in defaults otherwise. Environment overrides
/// (`HERALD_SERVER_URL`, `HERALD_STORAGE_DIR`, `HERALD_POLL_INTERVAL_MS`) are
/// applied last, then the result is validated.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file not found: {}", path.display());
            }
            read_config_file(path)?
        }
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                read_config_file(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    config
        .validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(url) = lookup("HERALD_SERVER_URL").filter(|v| !v.is_empty()) {
        config.client.server_url = url;
    }
    if let Some(dir) = lookup("HERALD_STORAGE_DIR").filter(|v| !v.is_empty()) {
        config.server.storage_dir = PathBuf::from(dir);
    }
    if let Some(ms) = lookup("HERALD_POLL_INTERVAL_MS").filter(|v| !v.is_empty()) {
        config.client.poll_interval_ms = ms
            .trim()
            .parse()
            .with_context(|| format!("HERALD_POLL_INTERVAL_MS is not a number: '{}'", ms))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(Some(missing.as_path())).is_err());
    }

    #[test]
    fn test_explicit_path_is_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("herald.toml");
        fs::write(
            &path,
            "[server]\nport = 18080\nstorage_dir = \"/tmp/herald-test\"\n",
        )
        .unwrap();

        let config = read_config_file(&path).unwrap();
        assert_eq!(config.server.port, 18080);
        assert_eq!(config.server.storage_dir, PathBuf::from("/tmp/herald-test"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[server\nport = ").unwrap();
        assert!(read_config_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HERALD_SERVER_URL", "http://10.0.0.5:8080"),
            ("HERALD_STORAGE_DIR", "/srv/herald"),
            ("HERALD_POLL_INTERVAL_MS", "1500"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.client.server_url, "http://10.0.0.5:8080");
        assert_eq!(config.server.storage_dir, PathBuf::from("/srv/herald"));
        assert_eq!(config.client.poll_interval_ms, 1500);
    }

    #[test]
    fn test_bad_interval_override() {
        let mut config = Config::default();
        let result = apply_env_overrides(&mut config, |k| {
            (k == "HERALD_POLL_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}
