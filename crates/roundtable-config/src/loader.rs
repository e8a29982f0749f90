use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::Config;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "ROUNDTABLE_CONFIG";

const CONFIG_FILE: &str = "config.json";
const HOME_DIR: &str = ".roundtable";

/// Resolve a user-supplied path, expanding ~ to the home directory.
pub fn resolve_path(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}

/// Locate the config file: `$ROUNDTABLE_CONFIG`, then `./config.json`,
/// then `~/.roundtable/config.json`. The last one is returned even when it
/// does not exist yet, so `onboard` knows where to write.
pub fn find_config_path() -> PathBuf {
    let env = std::env::var(CONFIG_ENV).ok();
    pick_config_path(env.as_deref(), Path::new(CONFIG_FILE), dirs::home_dir())
}

fn pick_config_path(env: Option<&str>, local: &Path, home: Option<PathBuf>) -> PathBuf {
    if let Some(explicit) = env.map(str::trim).filter(|p| !p.is_empty()) {
        return resolve_path(explicit);
    }
    if local.exists() {
        return local.to_path_buf();
    }
    match home {
        Some(home) => home.join(HOME_DIR).join(CONFIG_FILE),
        None => local.to_path_buf(),
    }
}

/// Load configuration from a JSON file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

/// Save configuration to a JSON file.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let contents = serde_json::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg.discussion.agents, 3);
        assert_eq!(cfg.discussion.requests_per_minute, 20);
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut cfg = Config::default();
        cfg.model.provider = "ollama".into();
        cfg.model.model = "llama3".into();
        cfg.discussion.turns = 7;
        save_config(&path, &cfg).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.model.provider, "ollama");
        assert_eq!(loaded.model.model, "llama3");
        assert_eq!(loaded.discussion.turns, 7);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err}").contains("config.json"));
    }

    #[test]
    fn env_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("config.json");
        std::fs::write(&local, "{}").unwrap();

        let picked = pick_config_path(Some("/etc/roundtable.json"), &local, None);
        assert_eq!(picked, PathBuf::from("/etc/roundtable.json"));

        // Blank override is ignored
        assert_eq!(pick_config_path(Some("  "), &local, None), local);
    }

    #[test]
    fn falls_back_to_home_config() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("absent.json");
        let home = dir.path().join("home");

        let picked = pick_config_path(None, &local, Some(home.clone()));
        assert_eq!(picked, home.join(".roundtable").join("config.json"));
        assert_eq!(pick_config_path(None, &local, None), local);
    }

    #[test]
    fn resolve_path_expands_home() {
        let resolved = resolve_path("~/db.sqlite");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolved, home.join("db.sqlite"));
        }
        assert_eq!(resolve_path("/tmp/x.sqlite"), PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(resolve_path("~user/x"), PathBuf::from("~user/x"));
    }
}
