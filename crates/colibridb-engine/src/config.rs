use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use colibridb_common::{ColibriError, Result};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory collection snapshots are written to (created if missing)
    pub storage_path: PathBuf,
    /// Debounce delay between a mutation and its snapshot, in milliseconds
    pub save_delay_ms: u64,
    /// Emit a structured debug log line per public operation
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./storage"),
            save_delay_ms: 50,
            debug: false,
        }
    }
}

impl Config {
    /// The debounce delay as a Duration.
    pub fn save_delay(&self) -> Duration {
        Duration::from_millis(self.save_delay_ms)
    }

    /// Load config from a TOML file, with environment variable overrides.
    /// Falls back to defaults if the file is not found.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        match fs::read_to_string(path.as_ref()) {
            Ok(s) => {
                let mut cfg: Config = toml::from_str(&s)
                    .map_err(|e| ColibriError::Validation(format!("invalid config: {e}")))?;
                Self::apply_env_overrides(&mut cfg);
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut cfg = Config::default();
                Self::apply_env_overrides(&mut cfg);
                Ok(cfg)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply COLIBRIDB_* environment variable overrides.
    fn apply_env_overrides(cfg: &mut Config) {
        if let Ok(v) = env::var("COLIBRIDB_STORAGE_PATH") {
            cfg.storage_path = PathBuf::from(v);
        }

        if let Ok(v) = env::var("COLIBRIDB_SAVE_DELAY_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.save_delay_ms = ms;
            }
        }

        if let Ok(v) = env::var("COLIBRIDB_DEBUG") {
            cfg.debug = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.storage_path, PathBuf::from("./storage"));
        assert_eq!(cfg.save_delay(), Duration::from_millis(50));
        assert!(!cfg.debug);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load_from_path("/definitely/not/a/config.toml").unwrap();
        assert_eq!(cfg.save_delay_ms, 50);
    }

    #[test]
    fn toml_round_trip() {
        let text = "storage_path = \"/tmp/colibri\"\nsave_delay_ms = 10\ndebug = true\n";
        let cfg: Config = toml::from_str(text).unwrap();
        assert_eq!(cfg.storage_path, PathBuf::from("/tmp/colibri"));
        assert_eq!(cfg.save_delay_ms, 10);
        assert!(cfg.debug);
    }
}
