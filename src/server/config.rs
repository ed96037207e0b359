use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

use crate::core::constants;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory request paths are resolved against
    pub doc_root: PathBuf,
    /// Admission ceiling; also the size of the connection table
    pub max_connections: usize,
    /// Capacity of the worker queue before submissions are shed
    pub max_queue_depth: usize,
    /// Number of worker threads running request processing
    pub worker_count: usize,
    /// Readiness events fetched per `epoll_wait`
    pub max_events: usize,
    pub pin_workers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            doc_root: PathBuf::from(constants::DEFAULT_DOC_ROOT),
            max_connections: constants::MAX_CONNECTIONS,
            max_queue_depth: constants::DEFAULT_QUEUE_DEPTH,
            worker_count: constants::DEFAULT_WORKERS,
            max_events: constants::MAX_EVENTS,
            pin_workers: false,
        }
    }
}

impl ServerConfig {
    /// Build a config from `FLINT_*` environment variables, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(root) = lookup("FLINT_DOC_ROOT") {
            cfg.doc_root = PathBuf::from(root);
        }
        if let Some(n) = parse_var(&lookup, "FLINT_MAX_CONNECTIONS")? {
            cfg.max_connections = n;
        }
        if let Some(n) = parse_var(&lookup, "FLINT_MAX_QUEUE_DEPTH")? {
            cfg.max_queue_depth = n;
        }
        if let Some(n) = parse_var(&lookup, "FLINT_WORKERS")? {
            cfg.worker_count = n;
        }
        if let Some(n) = parse_var(&lookup, "FLINT_MAX_EVENTS")? {
            cfg.max_events = n;
        }
        if let Some(flag) = parse_var::<u8, _>(&lookup, "FLINT_PIN_WORKERS")? {
            cfg.pin_workers = flag != 0;
        }
        anyhow::ensure!(cfg.max_connections > 0, "FLINT_MAX_CONNECTIONS must be positive");
        Ok(cfg)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value {raw:?} for {key}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.max_connections, 65535);
        assert_eq!(cfg.max_queue_depth, 10000);
        assert_eq!(cfg.worker_count, 8);
        assert_eq!(cfg.doc_root, PathBuf::from("root"));
        assert!(!cfg.pin_workers);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[
            ("FLINT_DOC_ROOT", "/srv/www"),
            ("FLINT_MAX_CONNECTIONS", "128"),
            ("FLINT_MAX_QUEUE_DEPTH", " 16 "),
            ("FLINT_WORKERS", "2"),
            ("FLINT_PIN_WORKERS", "1"),
        ]))
        .unwrap();
        assert_eq!(cfg.doc_root, PathBuf::from("/srv/www"));
        assert_eq!(cfg.max_connections, 128);
        assert_eq!(cfg.max_queue_depth, 16);
        assert_eq!(cfg.worker_count, 2);
        assert!(cfg.pin_workers);
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let err = ServerConfig::from_lookup(lookup_from(&[("FLINT_WORKERS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("FLINT_WORKERS"));

        assert!(
            ServerConfig::from_lookup(lookup_from(&[("FLINT_MAX_CONNECTIONS", "0")])).is_err()
        );
    }
}
