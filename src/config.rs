//! Process configuration: a JSON file, then environment variables, then
//! command line flags (applied by the binary).

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::jail::Jail;
use crate::lookup::LookupConfig;

pub const DEFAULT_CONFIG_PATH: &str = "~/.burrow.json";

pub const ENV_JAIL_ROOT: &str = "BURROW_JAIL_ROOT";
pub const ENV_INCLUDE_DOTFILES: &str = "BURROW_INCLUDE_DOTFILES";
pub const ENV_LOOKUP_ENDPOINT: &str = "BURROW_LOOKUP_ENDPOINT";
pub const ENV_LOOKUP_TIMEOUT_SECS: &str = "BURROW_LOOKUP_TIMEOUT_SECS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory all file operations are restricted to.
    pub jail_root: Option<PathBuf>,
    /// List entries whose name starts with `.`. Hidden directories can be
    /// entered either way.
    pub include_dotfiles: bool,
    pub lookup: LookupConfig,
}

impl Config {
    /// Read the configuration file at `path`. A missing file gives defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse configuration in {}", path.display()))
    }

    /// Apply `BURROW_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = var(ENV_JAIL_ROOT).filter(|root| !root.is_empty()) {
            self.jail_root = Some(expand_home(&root));
        }
        if let Some(value) = var(ENV_INCLUDE_DOTFILES) {
            self.include_dotfiles = parse_flag(&value)
                .with_context(|| format!("Invalid value for {ENV_INCLUDE_DOTFILES}"))?;
        }
        if let Some(endpoint) = var(ENV_LOOKUP_ENDPOINT).filter(|endpoint| !endpoint.is_empty()) {
            self.lookup.endpoint = endpoint;
        }
        if let Some(timeout) = var(ENV_LOOKUP_TIMEOUT_SECS) {
            self.lookup.timeout_secs = timeout
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {ENV_LOOKUP_TIMEOUT_SECS}"))?;
        }
        Ok(())
    }

    pub fn jail(&self) -> Result<Jail> {
        let root = self
            .jail_root
            .as_ref()
            .context("No jail root configured")?;
        Ok(Jail::new(root, self.include_dotfiles)?)
    }
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => {
            let mut expanded = PathBuf::from(home);
            expanded.push(rest.trim_start_matches('/'));
            expanded
        }
        _ => PathBuf::from(path),
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("expected a boolean, got {other:?}")),
    }
}

/// Reject configurations the binary cannot start with.
pub fn ensure_usable(config: &Config) -> Result<()> {
    if config.lookup.timeout_secs == 0 {
        bail!("Lookup timeout must be at least one second");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&temp_dir.path().join("missing.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.lookup, LookupConfig::default());
    }

    #[test]
    fn test_load_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("burrow.json");
        fs::write(
            &path,
            r#"{
                "jail_root": "/srv/media",
                "include_dotfiles": true,
                "lookup": { "timeout_secs": 5 }
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.jail_root, Some(PathBuf::from("/srv/media")));
        assert!(config.include_dotfiles);
        assert_eq!(config.lookup.timeout_secs, 5);
        assert_eq!(config.lookup.endpoint, crate::lookup::DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_load_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("burrow.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_vars(vars(&[
                (ENV_JAIL_ROOT, "/srv/tv"),
                (ENV_INCLUDE_DOTFILES, "yes"),
                (ENV_LOOKUP_ENDPOINT, "http://localhost:8080/info"),
                (ENV_LOOKUP_TIMEOUT_SECS, "7"),
            ]))
            .unwrap();
        assert_eq!(config.jail_root, Some(PathBuf::from("/srv/tv")));
        assert!(config.include_dotfiles);
        assert_eq!(config.lookup.endpoint, "http://localhost:8080/info");
        assert_eq!(config.lookup.timeout_secs, 7);
    }

    #[test]
    fn test_env_invalid_flag() {
        let mut config = Config::default();
        let result = config.apply_vars(vars(&[(ENV_INCLUDE_DOTFILES, "maybe")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_jail_requires_root() {
        assert!(Config::default().jail().is_err());
    }

    #[test]
    fn test_jail_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            jail_root: Some(temp_dir.path().to_path_buf()),
            include_dotfiles: true,
            ..Config::default()
        };
        let jail = config.jail().unwrap();
        assert!(jail.include_dotfiles());
        assert_eq!(jail.root(), temp_dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_ensure_usable_rejects_zero_timeout() {
        let mut config = Config::default();
        config.lookup.timeout_secs = 0;
        assert!(ensure_usable(&config).is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(parse_flag("1").unwrap());
        assert!(!parse_flag("off").unwrap());
        assert!(parse_flag("2").is_err());
    }
}
