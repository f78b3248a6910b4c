use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Top-level config, loaded from `gotel.toml` if present and overridden by
/// CLI flags, then by the two named environment variables last (spec §6).
/// Mirrors the teacher's `WideConfig`/`WideConfig::load` shape in
/// `config.rs`, adapted to this appliance's flat field list.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GotelConfig {
    pub db_path: PathBuf,
    pub prefix: String,
    pub namespace: Option<String>,
    pub send_metrics: bool,
    pub store_traces: bool,
    #[serde(with = "humantime_secs")]
    pub retention: Duration,
    #[serde(with = "humantime_secs")]
    pub cleanup_interval: Duration,
    pub query_port: u16,
    pub tag_support: bool,
}

impl Default for GotelConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("gotel.db"),
            prefix: "otel".to_string(),
            namespace: None,
            send_metrics: true,
            store_traces: true,
            retention: Duration::from_secs(168 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            query_port: 3200,
            tag_support: false,
        }
    }
}

impl GotelConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't
    /// exist — same contract as the teacher's `WideConfig::load`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: GotelConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply CLI flag overrides on top of a loaded config.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(db_path) = &cli.db_path {
            self.db_path = db_path.clone();
        }
        if let Some(prefix) = &cli.prefix {
            self.prefix = prefix.clone();
        }
        if cli.namespace.is_some() {
            self.namespace = cli.namespace.clone();
        }
        if let Some(v) = cli.send_metrics {
            self.send_metrics = v;
        }
        if let Some(v) = cli.store_traces {
            self.store_traces = v;
        }
        if let Some(secs) = cli.retention_secs {
            self.retention = Duration::from_secs(secs);
        }
        if let Some(secs) = cli.cleanup_interval_secs {
            self.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(port) = cli.query_port {
            self.query_port = port;
        }
        self
    }

    /// Apply the two named environment-variable overrides (spec §6).
    /// `GOTEL_RETENTION` is parsed as a plain integer number of seconds;
    /// a malformed value is fatal, per spec.
    pub fn apply_env(mut self) -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("GOTEL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var("GOTEL_RETENTION") {
            let secs: u64 = raw
                .parse()
                .map_err(|e| anyhow::anyhow!("GOTEL_RETENTION malformed ({raw:?}): {e}"))?;
            self.retention = Duration::from_secs(secs);
        }
        Ok(self)
    }

    pub fn metric_prefix(&self, service_name_metric: &str, span_name_metric: &str) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => {
                format!("{}.{ns}.{service_name_metric}.{span_name_metric}", self.prefix)
            }
            _ => format!("{}.{service_name_metric}.{span_name_metric}", self.prefix),
        }
    }
}

/// CLI flags mirroring the config field names. A deployable binary needs a
/// CLI surface even though spec.md doesn't name one; flag names are chosen
/// to map directly onto `GotelConfig`'s fields.
#[derive(Debug, Parser)]
#[command(name = "gotel", about = "Self-contained trace/metric appliance")]
pub struct Cli {
    /// Path to a gotel.toml config file.
    #[arg(long, default_value = "gotel.toml")]
    pub config: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub prefix: Option<String>,

    #[arg(long)]
    pub namespace: Option<String>,

    #[arg(long)]
    pub send_metrics: Option<bool>,

    #[arg(long)]
    pub store_traces: Option<bool>,

    #[arg(long = "retention-secs")]
    pub retention_secs: Option<u64>,

    #[arg(long = "cleanup-interval-secs")]
    pub cleanup_interval_secs: Option<u64>,

    #[arg(long)]
    pub query_port: Option<u16>,
}

/// `serde(with)` module for (de)serialising a `Duration` as a plain integer
/// number of seconds in TOML.
mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = GotelConfig::default();
        assert_eq!(cfg.db_path, PathBuf::from("gotel.db"));
        assert_eq!(cfg.prefix, "otel");
        assert!(cfg.send_metrics);
        assert!(cfg.store_traces);
        assert_eq!(cfg.retention, Duration::from_secs(168 * 3600));
        assert_eq!(cfg.cleanup_interval, Duration::from_secs(3600));
        assert_eq!(cfg.query_port, 3200);
    }

    #[test]
    fn metric_prefix_without_namespace() {
        let cfg = GotelConfig::default();
        assert_eq!(cfg.metric_prefix("checkout", "get_cart"), "otel.checkout.get_cart");
    }

    #[test]
    fn metric_prefix_with_namespace() {
        let mut cfg = GotelConfig::default();
        cfg.namespace = Some("prod".to_string());
        assert_eq!(cfg.metric_prefix("checkout", "get_cart"), "otel.prod.checkout.get_cart");
    }

    #[test]
    fn env_override_retention_rejects_malformed() {
        // SAFETY: test runs single-threaded w.r.t. this env var.
        unsafe { std::env::set_var("GOTEL_RETENTION", "not-a-number") };
        let res = GotelConfig::default().apply_env();
        unsafe { std::env::remove_var("GOTEL_RETENTION") };
        assert!(res.is_err());
    }
}
