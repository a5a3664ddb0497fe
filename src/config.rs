//! Configuration management for Gauntlet

use crate::error::{GauntletError, Result};
use crate::http::RedirectPolicy;
use crate::models::{BlindHostConfig, PayloadStrategy, ScanConfig};
use serde::Deserialize;
use std::path::Path;

/// File-based configuration structure
#[derive(Debug, Deserialize)]
struct FileConfig {
    scan: Option<ScanSection>,
    blind_host: Option<BlindHostConfig>,
    output: Option<OutputSection>,
}

#[derive(Debug, Deserialize)]
struct ScanSection {
    concurrency: Option<usize>,
    max_connections: Option<usize>,
    rps: Option<u32>,
    payload_strategy: Option<PayloadStrategy>,
    timeout_secs: Option<u64>,
    redirect: Option<RedirectPolicy>,
    max_redirects: Option<u32>,
    user_agent: Option<String>,
    email: Option<String>,
    passive_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct OutputSection {
    dir: Option<String>,
    save_on_stop: Option<bool>,
}

/// Parses TOML configuration and merges it with defaults
pub fn parse_config(content: &str) -> Result<ScanConfig> {
    let file_config: FileConfig = toml::from_str(content)?;
    let mut config = ScanConfig::default();

    if let Some(scan) = file_config.scan {
        if let Some(concurrency) = scan.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(max) = scan.max_connections {
            config.max_connections = max;
        }
        if let Some(rps) = scan.rps {
            config.rps = rps;
        }
        if let Some(strategy) = scan.payload_strategy {
            config.payload_strategy = strategy;
        }
        if let Some(timeout) = scan.timeout_secs {
            config.timeout_secs = timeout;
        }
        if let Some(redirect) = scan.redirect {
            config.redirect = redirect;
        }
        if let Some(max) = scan.max_redirects {
            config.max_redirects = max;
        }
        if scan.user_agent.is_some() {
            config.user_agent = scan.user_agent;
        }
        if scan.email.is_some() {
            config.email = scan.email;
        }
        if let Some(passive) = scan.passive_only {
            config.passive_only = passive;
        }
    }

    if let Some(blind_host) = file_config.blind_host {
        if blind_host.host.trim().is_empty() {
            return Err(GauntletError::ConfigError(
                "[blind_host] requires a non-empty host".to_string(),
            ));
        }
        config.blind_host = Some(blind_host);
    }

    if let Some(output) = file_config.output {
        if output.dir.is_some() {
            config.output_dir = output.dir;
        }
        if let Some(save) = output.save_on_stop {
            config.save_on_stop = save;
        }
    }

    Ok(config)
}

/// Loads configuration from a TOML file and merges with defaults
pub fn load_config(path: &Path) -> Result<ScanConfig> {
    let content = std::fs::read_to_string(path).map_err(GauntletError::IoError)?;
    parse_config(&content)
}

/// Command-line overrides; `None` keeps the configured value
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub concurrency: Option<usize>,
    pub max_connections: Option<usize>,
    pub rps: Option<u32>,
    pub payload_strategy: Option<PayloadStrategy>,
    pub timeout_secs: Option<u64>,
    pub blind_host: Option<String>,
    pub email: Option<String>,
    pub output_dir: Option<String>,
    pub passive_only: bool,
}

/// Merges CLI arguments into an existing ScanConfig
pub fn merge_cli_args(config: &mut ScanConfig, cli: CliOverrides) {
    if let Some(c) = cli.concurrency {
        config.concurrency = c;
    }
    if let Some(m) = cli.max_connections {
        config.max_connections = m;
    }
    if let Some(r) = cli.rps {
        config.rps = r;
    }
    if let Some(s) = cli.payload_strategy {
        config.payload_strategy = s;
    }
    if let Some(t) = cli.timeout_secs {
        config.timeout_secs = t;
    }
    if let Some(host) = cli.blind_host {
        match config.blind_host.as_mut() {
            Some(existing) => existing.host = host,
            None => config.blind_host = Some(BlindHostConfig::new(host)),
        }
    }
    if cli.email.is_some() {
        config.email = cli.email;
    }
    if cli.output_dir.is_some() {
        config.output_dir = cli.output_dir;
    }
    if cli.passive_only {
        config.passive_only = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        let config = parse_config(
            r#"
[scan]
concurrency = 4
rps = 50
payload_strategy = "only_once"
redirect = "on_site"

[blind_host]
host = "oob.example.com"
dns_port = 5353

[output]
dir = "out"
save_on_stop = false
"#,
        )
        .expect("valid config");

        assert_eq!(config.concurrency, 4);
        assert_eq!(config.rps, 50);
        assert_eq!(config.payload_strategy, PayloadStrategy::OnlyOnce);
        assert_eq!(config.redirect, RedirectPolicy::OnSite);
        assert_eq!(config.max_connections, 20);
        let blind = config.blind_host.expect("blind host section");
        assert_eq!(blind.dns_port, Some(5353));
        assert_eq!(blind.listen_port, 8888);
        assert_eq!(config.output_dir.as_deref(), Some("out"));
        assert!(!config.save_on_stop);
    }

    #[test]
    fn test_empty_blind_host_rejected() {
        let err = parse_config("[blind_host]\nhost = \"\"\n");
        assert!(matches!(err, Err(GauntletError::ConfigError(_))));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = ScanConfig::default();
        merge_cli_args(
            &mut config,
            CliOverrides {
                concurrency: Some(2),
                blind_host: Some("cb.example.com".to_string()),
                ..CliOverrides::default()
            },
        );
        assert_eq!(config.concurrency, 2);
        assert_eq!(
            config.blind_host.map(|b| b.host),
            Some("cb.example.com".to_string())
        );
        assert_eq!(config.timeout_secs, 20);
    }
}
