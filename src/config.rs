use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sled,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    /// Database directory; `None` means a temporary database.
    pub db_path: Option<PathBuf>,
    pub backend: Backend,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: DEFAULT_BIND.to_owned(),
            db_path: None,
            backend: Backend::Sled,
        }
    }
}

impl Config {
    /// Reads `FILMRATE_BIND`, `FILMRATE_DB` and `FILMRATE_BACKEND`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Config::default();
        if let Some(bind) = lookup("FILMRATE_BIND") {
            config.bind = bind;
        }
        config.db_path = lookup("FILMRATE_DB")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        if let Some(backend) = lookup("FILMRATE_BACKEND") {
            config.backend = match backend.to_ascii_lowercase().as_str() {
                "sled" => Backend::Sled,
                "memory" => Backend::Memory,
                other => {
                    return Err(Error::invalid(format!(
                        "unknown backend {:?}, expected \"sled\" or \"memory\"",
                        other
                    )))
                }
            };
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("FILMRATE_BIND", "0.0.0.0:9000"),
            ("FILMRATE_DB", "/var/lib/filmrate"),
            ("FILMRATE_BACKEND", "Memory"),
        ]))
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.db_path, Some(PathBuf::from("/var/lib/filmrate")));
        assert_eq!(config.backend, Backend::Memory);
    }

    #[test]
    fn unknown_backend() {
        let err = Config::from_lookup(lookup(&[("FILMRATE_BACKEND", "postgres")])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
