use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct FrameworkSettings {
    pub bind_addr: SocketAddr,
    pub default_locale: String,
    pub dispatch_timeout: Option<Duration>,
}

impl FrameworkSettings {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_string("UMI_BIND_ADDR", "127.0.0.1:8080")
            .parse::<SocketAddr>()
            .context("UMI_BIND_ADDR must be a valid host:port")?;

        let default_locale = env_string("UMI_DEFAULT_LOCALE", "en-US");

        let timeout_ms = env_string("UMI_DISPATCH_TIMEOUT_MS", "0")
            .parse::<u64>()
            .context("UMI_DISPATCH_TIMEOUT_MS must be a number of milliseconds")?;
        let dispatch_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));

        Ok(Self {
            bind_addr,
            default_locale,
            dispatch_timeout,
        })
    }
}

impl Default for FrameworkSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            default_locale: "en-US".to_string(),
            dispatch_timeout: None,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_environment() {
        let settings = FrameworkSettings::from_env().unwrap();
        if std::env::var("UMI_DEFAULT_LOCALE").is_err() {
            assert_eq!(settings.default_locale, "en-US");
        }
        assert_eq!(FrameworkSettings::default().dispatch_timeout, None);
    }
}
