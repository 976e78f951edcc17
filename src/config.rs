// src/config.rs
//
// Turns parsed CLI flags into validated runtime configuration: normalized,
// deduplicated backend origins and the listener/health/timeout settings.
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::cli::Cli;

#[derive(Debug, Clone)]
pub struct Config {
    pub backends: Vec<Url>,
    pub port: u16,
    pub health_check_interval: Duration,
    pub timeout: Duration,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.backends.is_empty() {
            anyhow::bail!("at least one --backends URL is required");
        }

        let mut backends = Vec::with_capacity(cli.backends.len());
        for raw in cli.backends {
            let url = normalize_backend(&raw)
                .with_context(|| format!("invalid backend URL: {raw}"))?;
            if !backends.contains(&url) {
                backends.push(url);
            }
        }

        Ok(Self {
            backends,
            port: cli.port,
            health_check_interval: cli.health_check_interval.into(),
            timeout: cli.timeout.into(),
        })
    }
}

/// Normalize an operator-supplied backend origin. A bare `host:port` (no
/// scheme) defaults to `http://`, per spec.md §3.
fn normalize_backend(raw: &str) -> Result<Url> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    let url = Url::parse(&with_scheme)?;
    if url.host_str().is_none() {
        anyhow::bail!("URL has no host");
    }
    Ok(url)
}
