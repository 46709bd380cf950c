use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

const DEFAULT_PARALLEL_WORKERS: usize = 1;
const DEFAULT_POLL_MIN_DELAY_SECS: u64 = 120;
const DEFAULT_MANIFEST_IMPORT_DELAY_SECS: u64 = 120;
const DEFAULT_MANIFEST_START_DELAY_SECS: u64 = 60;
const DEFAULT_FORK_WALK_LIMIT: usize = 50;
const DEFAULT_DRAIN_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Runtime configuration for the gateway sync engine.
///
/// All instances must be constructed via [`GatewayConfig::builder`] or
/// [`GatewayConfig::from_env`] so invariants are validated before any
/// consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    node_url: String,
    parallel_workers: usize,
    poll_min_delay: Duration,
    manifest_import_delay: Duration,
    manifest_start_delay: Duration,
    fork_walk_limit: usize,
    drain_poll_interval: Duration,
    request_timeout: Duration,
    metrics_interval: Duration,
    development_sync_length: Option<usize>,
}

impl GatewayConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Builds a configuration from `PERMAGATE_*` environment variables.
    ///
    /// `PERMAGATE_NODE_URL` is required; every other variable falls back to
    /// its default when absent or empty.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder()
            .node_url(env::var("PERMAGATE_NODE_URL").context("PERMAGATE_NODE_URL is required")?);

        if let Some(workers) = env_parse::<usize>("PERMAGATE_PARALLEL_WORKERS")? {
            builder = builder.parallel_workers(workers);
        }
        if let Some(secs) = env_parse::<u64>("PERMAGATE_POLL_DELAY_SECS")? {
            builder = builder.poll_min_delay(Duration::from_secs(secs));
        }
        if let Some(secs) = env_parse::<u64>("PERMAGATE_MANIFEST_DELAY_SECS")? {
            builder = builder.manifest_import_delay(Duration::from_secs(secs));
        }
        if let Some(limit) = env_parse::<usize>("PERMAGATE_FORK_WALK_LIMIT")? {
            builder = builder.fork_walk_limit(limit);
        }
        if let Some(length) = env_parse::<usize>("PERMAGATE_DEV_SYNC_LENGTH")? {
            builder = builder.development_sync_length(length);
        }

        builder.build()
    }

    /// Base URL of the remote chain node.
    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    /// Size of the import worker pool.
    pub fn parallel_workers(&self) -> usize {
        self.parallel_workers
    }

    /// Minimum delay between poll scheduler iterations.
    pub fn poll_min_delay(&self) -> Duration {
        self.poll_min_delay
    }

    /// Delay between manifest import passes.
    pub fn manifest_import_delay(&self) -> Duration {
        self.manifest_import_delay
    }

    /// Delay before the first manifest import pass.
    pub fn manifest_start_delay(&self) -> Duration {
        self.manifest_start_delay
    }

    /// Maximum generations the fork resolver walks back looking for a stored
    /// ancestor before failing fatally.
    pub fn fork_walk_limit(&self) -> usize {
        self.fork_walk_limit
    }

    /// Interval at which the fork resolver re-checks the in-flight
    /// transaction count while waiting for imports to settle.
    pub fn drain_poll_interval(&self) -> Duration {
        self.drain_poll_interval
    }

    /// Per-request timeout applied to the chain HTTP client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Number of unsynced heights skipped at startup for development runs.
    pub fn development_sync_length(&self) -> Option<usize> {
        self.development_sync_length
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        let url = self.node_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("node_url must start with http:// or https://");
        }

        if self.parallel_workers == 0 {
            bail!("parallel_workers must be greater than 0");
        }

        if self.poll_min_delay.is_zero() {
            bail!("poll_min_delay must be greater than 0");
        }

        if self.manifest_import_delay.is_zero() {
            bail!("manifest_import_delay must be greater than 0");
        }

        if self.fork_walk_limit == 0 {
            bail!("fork_walk_limit must be greater than 0");
        }

        if self.drain_poll_interval.is_zero() {
            bail!("drain_poll_interval must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            let parsed = value
                .trim()
                .parse::<T>()
                .with_context(|| format!("{name} could not be parsed"))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

#[derive(Debug, Default, Clone)]
pub struct GatewayConfigBuilder {
    node_url: Option<String>,
    parallel_workers: Option<usize>,
    poll_min_delay: Option<Duration>,
    manifest_import_delay: Option<Duration>,
    manifest_start_delay: Option<Duration>,
    fork_walk_limit: Option<usize>,
    drain_poll_interval: Option<Duration>,
    request_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    development_sync_length: Option<usize>,
}

impl GatewayConfigBuilder {
    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.node_url = Some(url.into());
        self
    }

    pub fn parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = Some(workers);
        self
    }

    pub fn poll_min_delay(mut self, delay: Duration) -> Self {
        self.poll_min_delay = Some(delay);
        self
    }

    pub fn manifest_import_delay(mut self, delay: Duration) -> Self {
        self.manifest_import_delay = Some(delay);
        self
    }

    pub fn manifest_start_delay(mut self, delay: Duration) -> Self {
        self.manifest_start_delay = Some(delay);
        self
    }

    pub fn fork_walk_limit(mut self, limit: usize) -> Self {
        self.fork_walk_limit = Some(limit);
        self
    }

    pub fn drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = Some(interval);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn development_sync_length(mut self, length: usize) -> Self {
        self.development_sync_length = Some(length);
        self
    }

    pub fn build(self) -> Result<GatewayConfig> {
        let config = GatewayConfig {
            node_url: self
                .node_url
                .map(|url| url.trim().to_owned())
                .context("node_url is required")?,
            parallel_workers: self.parallel_workers.unwrap_or(DEFAULT_PARALLEL_WORKERS),
            poll_min_delay: self
                .poll_min_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_MIN_DELAY_SECS)),
            manifest_import_delay: self
                .manifest_import_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_MANIFEST_IMPORT_DELAY_SECS)),
            manifest_start_delay: self
                .manifest_start_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_MANIFEST_START_DELAY_SECS)),
            fork_walk_limit: self.fork_walk_limit.unwrap_or(DEFAULT_FORK_WALK_LIMIT),
            drain_poll_interval: self
                .drain_poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_DRAIN_POLL_INTERVAL_MS)),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            development_sync_length: self.development_sync_length,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> GatewayConfigBuilder {
        GatewayConfig::builder().node_url("http://localhost:1984")
    }

    #[test]
    fn builder_produces_valid_config_with_defaults() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.parallel_workers(), DEFAULT_PARALLEL_WORKERS);
        assert_eq!(
            config.poll_min_delay(),
            Duration::from_secs(DEFAULT_POLL_MIN_DELAY_SECS)
        );
        assert_eq!(config.fork_walk_limit(), DEFAULT_FORK_WALK_LIMIT);
        assert_eq!(
            config.drain_poll_interval(),
            Duration::from_millis(DEFAULT_DRAIN_POLL_INTERVAL_MS)
        );
        assert_eq!(
            config.metrics_interval(),
            telemetry::DEFAULT_METRICS_INTERVAL
        );
        assert_eq!(config.development_sync_length(), None);
    }

    #[test]
    fn node_url_is_required() {
        let err = GatewayConfig::builder().build().unwrap_err();
        assert!(
            format!("{err}").contains("node_url"),
            "error should mention missing node_url"
        );
    }

    #[test]
    fn validation_catches_invalid_values() {
        let err = base_builder()
            .node_url("ftp://invalid")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("http:// or https://"));

        let err = base_builder().parallel_workers(0).build().unwrap_err();
        assert!(format!("{err}").contains("parallel_workers"));

        let err = base_builder()
            .poll_min_delay(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("poll_min_delay"));

        let err = base_builder().fork_walk_limit(0).build().unwrap_err();
        assert!(format!("{err}").contains("fork_walk_limit"));

        let err = base_builder()
            .drain_poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("drain_poll_interval"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = base_builder()
            .parallel_workers(4)
            .poll_min_delay(Duration::from_secs(5))
            .manifest_import_delay(Duration::from_secs(30))
            .manifest_start_delay(Duration::from_secs(1))
            .fork_walk_limit(12)
            .drain_poll_interval(Duration::from_millis(50))
            .development_sync_length(100)
            .build()
            .unwrap();

        assert_eq!(config.parallel_workers(), 4);
        assert_eq!(config.poll_min_delay(), Duration::from_secs(5));
        assert_eq!(config.manifest_import_delay(), Duration::from_secs(30));
        assert_eq!(config.manifest_start_delay(), Duration::from_secs(1));
        assert_eq!(config.fork_walk_limit(), 12);
        assert_eq!(config.development_sync_length(), Some(100));
    }
}
