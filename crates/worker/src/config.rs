use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::runner::RunnerConfig;

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => bail!("unknown log format '{other}', expected 'text' or 'json'"),
        }
    }
}

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding the collection files (default: `./data`).
    pub data_dir: PathBuf,
    /// Jobs analysed at once (default: `4`).
    pub concurrency: usize,
    /// Jobs waiting before `submit` reports backpressure (default: `256`).
    pub queue_capacity: usize,
    /// Upper bound on one analyzer call (default: `120` s).
    pub analysis_timeout: Duration,
    /// Age after which a `processing` job is failed by the sweeper (default: `900` s).
    pub stale_processing_timeout: Duration,
    /// How often the sweeper runs (default: `60` s).
    pub stale_sweep_interval: Duration,
    /// Request counter window (default: `60` s).
    pub rate_limit_window: Duration,
    /// Requests allowed per window and key (default: `100`).
    pub rate_limit_max_requests: u32,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                         | Default  |
    /// |---------------------------------|----------|
    /// | `DATA_DIR`                      | `./data` |
    /// | `RUNNER_CONCURRENCY`            | `4`      |
    /// | `RUNNER_QUEUE_CAPACITY`         | `256`    |
    /// | `ANALYSIS_TIMEOUT_SECS`         | `120`    |
    /// | `STALE_PROCESSING_TIMEOUT_SECS` | `900`    |
    /// | `STALE_SWEEP_INTERVAL_SECS`     | `60`     |
    /// | `RATE_LIMIT_WINDOW_SECS`        | `60`     |
    /// | `RATE_LIMIT_MAX_REQUESTS`       | `100`    |
    /// | `LOG_FORMAT`                    | `text`   |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let concurrency: usize = parse(&get, "RUNNER_CONCURRENCY", "4")?;
        if concurrency == 0 {
            bail!("RUNNER_CONCURRENCY must be at least 1");
        }
        let queue_capacity: usize = parse(&get, "RUNNER_QUEUE_CAPACITY", "256")?;
        if queue_capacity == 0 {
            bail!("RUNNER_QUEUE_CAPACITY must be at least 1");
        }

        Ok(Self {
            data_dir: PathBuf::from(get("DATA_DIR", "./data")),
            concurrency,
            queue_capacity,
            analysis_timeout: secs(&get, "ANALYSIS_TIMEOUT_SECS", "120")?,
            stale_processing_timeout: secs(&get, "STALE_PROCESSING_TIMEOUT_SECS", "900")?,
            stale_sweep_interval: secs(&get, "STALE_SWEEP_INTERVAL_SECS", "60")?,
            rate_limit_window: secs(&get, "RATE_LIMIT_WINDOW_SECS", "60")?,
            rate_limit_max_requests: parse(&get, "RATE_LIMIT_MAX_REQUESTS", "100")?,
            log_format: parse(&get, "LOG_FORMAT", "text")?,
        })
    }

    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig {
            concurrency: self.concurrency,
            queue_capacity: self.queue_capacity,
            analysis_timeout: self.analysis_timeout,
        }
    }
}

fn parse<T>(get: &impl Fn(&str, &str) -> String, key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get(key, default);
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("{key} has invalid value '{raw}'"))
}

/// A whole number of seconds, at least one.
fn secs(get: &impl Fn(&str, &str) -> String, key: &str, default: &str) -> anyhow::Result<Duration> {
    let secs: u64 = parse(get, key, default)?;
    if secs == 0 {
        bail!("{key} must be at least 1");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<WorkerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.analysis_timeout, Duration::from_secs(120));
        assert_eq!(config.stale_processing_timeout, Duration::from_secs(900));
        assert_eq!(config.stale_sweep_interval, Duration::from_secs(60));
        assert_eq!(config.rate_limit_max_requests, 100);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATA_DIR", "/var/lib/occtrack"),
            ("RUNNER_CONCURRENCY", "8"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/occtrack"));
        assert_eq!(config.runner().concurrency, 8);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn malformed_value_names_the_variable() {
        let err = load(&[("ANALYSIS_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(format!("{err:#}").contains("ANALYSIS_TIMEOUT_SECS"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(load(&[("RUNNER_CONCURRENCY", "0")]).is_err());
        assert!(load(&[("RUNNER_QUEUE_CAPACITY", "0")]).is_err());
    }

    #[test]
    fn zero_durations_are_rejected() {
        for key in [
            "ANALYSIS_TIMEOUT_SECS",
            "STALE_PROCESSING_TIMEOUT_SECS",
            "STALE_SWEEP_INTERVAL_SECS",
            "RATE_LIMIT_WINDOW_SECS",
        ] {
            let err = load(&[(key, "0")]).unwrap_err();
            assert!(format!("{err:#}").contains(key), "{key} accepted zero");
        }
    }
}
