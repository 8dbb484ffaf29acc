use std::net::SocketAddr;

use anyhow::Context;

pub const DEFAULT_BIND: &str = "127.0.0.1:4010";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Runtime settings for a server embedding the family tree routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `None` means run against the in-memory store.
    pub database_url: Option<String>,
    pub bind: SocketAddr,
    pub max_connections: u32,
    /// Reject requests that carry no developer identity header.
    pub require_dev_header: bool,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let bind = lookup("FAMILY_TREE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind
            .trim()
            .parse()
            .with_context(|| format!("invalid FAMILY_TREE_BIND '{}'", bind))?;

        let max_connections = match lookup("FAMILY_TREE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|count| *count > 0)
                .with_context(|| format!("invalid FAMILY_TREE_MAX_CONNECTIONS '{}'", raw))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let require_dev_header = lookup("FAMILY_TREE_REQUIRE_DEV_HEADER")
            .map(|value| env_flag(&value))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            bind,
            max_connections,
            require_dev_header,
        })
    }
}

pub fn env_flag(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes"
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_without_env() {
        let config = config(&[]).expect("defaults");
        assert_eq!(config.database_url, None);
        assert_eq!(config.bind, DEFAULT_BIND.parse::<SocketAddr>().expect("addr"));
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(!config.require_dev_header);
    }

    #[test]
    fn env_values_override_defaults() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/family"),
            ("FAMILY_TREE_BIND", "0.0.0.0:8080"),
            ("FAMILY_TREE_MAX_CONNECTIONS", "12"),
            ("FAMILY_TREE_REQUIRE_DEV_HEADER", "Yes"),
        ])
        .expect("config");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/family"));
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.max_connections, 12);
        assert!(config.require_dev_header);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = config(&[("FAMILY_TREE_BIND", "nowhere")]).expect_err("bad bind");
        assert!(err.to_string().contains("FAMILY_TREE_BIND"));

        let err = config(&[("FAMILY_TREE_MAX_CONNECTIONS", "0")]).expect_err("zero pool");
        assert!(err.to_string().contains("FAMILY_TREE_MAX_CONNECTIONS"));

        let config = config(&[("DATABASE_URL", "  ")]).expect("blank url");
        assert_eq!(config.database_url, None);
    }
}
