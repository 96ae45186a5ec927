//! Suite configuration.
//!
//! [`SuiteConfig`] is built with `with_*` methods and may be overridden from
//! `KISPEC_*` environment variables through [`SuiteConfig::from_env`].

use std::{
    env,
    net::SocketAddr,
    num::NonZeroUsize,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, filter::FilterConfig, order::OrderConfig};

/// Environment variable prefix
const ENV_PREFIX: &str = "KISPEC";

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);
const DEFAULT_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub description: String,
    pub random_seed: u64,
    pub randomize_all_specs: bool,
    pub filter: FilterConfig,
    /// Abort the suite after the first failing spec.
    pub fail_fast: bool,
    pub fail_on_pending: bool,
    /// Fail the suite when no spec runs.
    pub fail_on_empty: bool,
    /// Walk the specs and report them as passed without running any body.
    pub dry_run: bool,
    /// Applied to specs that do not declare their own retry policy.
    pub flake_attempts: Option<u32>,
    pub must_pass_repeatedly: Option<u32>,
    /// Suite timeout.
    pub timeout: Option<Duration>,
    pub grace_period: Duration,
    pub poll_progress_after: Option<Duration>,
    pub poll_progress_interval: Option<Duration>,
    pub parallel_process: usize,
    pub parallel_total: usize,
    pub sync_poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub liveness_timeout: Duration,
    pub sync_server_address: Option<SocketAddr>,
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            description: String::from("suite"),
            random_seed: time_seed(),
            randomize_all_specs: false,
            filter: FilterConfig::default(),
            fail_fast: false,
            fail_on_pending: false,
            fail_on_empty: false,
            dry_run: false,
            flake_attempts: None,
            must_pass_repeatedly: None,
            timeout: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_progress_after: None,
            poll_progress_interval: None,
            parallel_process: 1,
            parallel_total: 1,
            sync_poll_interval: DEFAULT_SYNC_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            sync_server_address: None,
        }
    }
}

impl SuiteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by the `KISPEC_*` environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|key| env::var(key).ok())
    }

    /// Apply overrides read through `lookup`, which receives the full
    /// variable name (for example `KISPEC_SEED`).
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = EnvLookup(lookup);

        if let Some(description) = env.get("DESCRIPTION") {
            self.description = description;
        }
        if let Some(seed) = env.parse("SEED")? {
            self.random_seed = seed;
        }
        if let Some(randomize) = env.flag("RANDOMIZE_ALL")? {
            self.randomize_all_specs = randomize;
        }
        self.filter.focus_strings.extend(env.list("FOCUS"));
        self.filter.skip_strings.extend(env.list("SKIP"));
        self.filter.focus_files.extend(env.list("FOCUS_FILE"));
        self.filter.skip_files.extend(env.list("SKIP_FILE"));
        if let Some(labels) = env.get("LABEL_FILTER") {
            self.filter.label_filter = Some(labels);
        }
        if let Some(version) = env.get("SEMVER_FILTER") {
            self.filter.semver_filter = Some(version);
        }
        if let Some(fail_fast) = env.flag("FAIL_FAST")? {
            self.fail_fast = fail_fast;
        }
        if let Some(fail_on_pending) = env.flag("FAIL_ON_PENDING")? {
            self.fail_on_pending = fail_on_pending;
        }
        if let Some(fail_on_empty) = env.flag("FAIL_ON_EMPTY")? {
            self.fail_on_empty = fail_on_empty;
        }
        if let Some(dry_run) = env.flag("DRY_RUN")? {
            self.dry_run = dry_run;
        }
        if let Some(attempts) = env.parse("FLAKE_ATTEMPTS")? {
            self.flake_attempts = Some(attempts);
        }
        if let Some(repeat) = env.parse("MUST_PASS_REPEATEDLY")? {
            self.must_pass_repeatedly = Some(repeat);
        }
        if let Some(timeout) = env.duration("TIMEOUT")? {
            self.timeout = Some(timeout);
        }
        if let Some(grace) = env.duration("GRACE_PERIOD")? {
            self.grace_period = grace;
        }
        if let Some(after) = env.duration("POLL_PROGRESS_AFTER")? {
            self.poll_progress_after = Some(after);
        }
        if let Some(interval) = env.duration("POLL_PROGRESS_INTERVAL")? {
            self.poll_progress_interval = Some(interval);
        }
        if let Some(process) = env.parse("PARALLEL_PROCESS")? {
            self.parallel_process = process;
        }
        if let Some(total) = env.parse("PARALLEL_TOTAL")? {
            self.parallel_total = total;
        }
        if let Some(addr) = env.parse("SYNC_SERVER")? {
            self.sync_server_address = Some(addr);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel_total == 0 {
            return Err(ConfigError::NoParallelProcesses);
        }
        if self.parallel_process == 0 || self.parallel_process > self.parallel_total {
            return Err(ConfigError::InvalidParallelProcess {
                process: self.parallel_process,
                total: self.parallel_total,
            });
        }
        if self.flake_attempts.is_some() && self.must_pass_repeatedly.is_some() {
            return Err(ConfigError::ConflictingRetryPolicies);
        }
        let durations = [
            ("timeout", self.timeout),
            ("poll_progress_interval", self.poll_progress_interval),
            ("sync_poll_interval", Some(self.sync_poll_interval)),
            ("heartbeat_interval", Some(self.heartbeat_interval)),
            ("liveness_timeout", Some(self.liveness_timeout)),
        ];
        for (name, value) in durations {
            if let Some(value) = value.filter(Duration::is_zero) {
                return Err(ConfigError::ZeroDuration { name, value });
            }
        }
        Ok(())
    }

    pub(crate) fn order(&self) -> OrderConfig {
        OrderConfig {
            seed: self.random_seed,
            randomize_all: self.randomize_all_specs,
        }
    }

    pub(crate) fn parallel_total(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.parallel_total).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..self
        }
    }

    pub fn with_seed(self, random_seed: u64) -> Self {
        Self {
            random_seed,
            ..self
        }
    }

    pub fn with_randomize_all_specs(self, randomize_all_specs: bool) -> Self {
        Self {
            randomize_all_specs,
            ..self
        }
    }

    pub fn with_filter(self, filter: FilterConfig) -> Self {
        Self { filter, ..self }
    }

    pub fn with_fail_fast(self, fail_fast: bool) -> Self {
        Self { fail_fast, ..self }
    }

    pub fn with_fail_on_pending(self, fail_on_pending: bool) -> Self {
        Self {
            fail_on_pending,
            ..self
        }
    }

    pub fn with_fail_on_empty(self, fail_on_empty: bool) -> Self {
        Self {
            fail_on_empty,
            ..self
        }
    }

    pub fn with_dry_run(self, dry_run: bool) -> Self {
        Self { dry_run, ..self }
    }

    pub fn with_flake_attempts(self, attempts: u32) -> Self {
        Self {
            flake_attempts: Some(attempts),
            ..self
        }
    }

    pub fn with_must_pass_repeatedly(self, repeat: u32) -> Self {
        Self {
            must_pass_repeatedly: Some(repeat),
            ..self
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_grace_period(self, grace_period: Duration) -> Self {
        Self {
            grace_period,
            ..self
        }
    }

    pub fn with_poll_progress(self, after: Duration, interval: Duration) -> Self {
        Self {
            poll_progress_after: Some(after),
            poll_progress_interval: Some(interval),
            ..self
        }
    }

    /// This process is `process` of `total`, 1 based.
    pub fn with_parallel(self, process: usize, total: usize) -> Self {
        Self {
            parallel_process: process,
            parallel_total: total,
            ..self
        }
    }

    pub fn with_sync_poll_interval(self, sync_poll_interval: Duration) -> Self {
        Self {
            sync_poll_interval,
            ..self
        }
    }

    pub fn with_heartbeat_interval(self, heartbeat_interval: Duration) -> Self {
        Self {
            heartbeat_interval,
            ..self
        }
    }

    pub fn with_liveness_timeout(self, liveness_timeout: Duration) -> Self {
        Self {
            liveness_timeout,
            ..self
        }
    }

    pub fn with_sync_server_address(self, addr: SocketAddr) -> Self {
        Self {
            sync_server_address: Some(addr),
            ..self
        }
    }
}

struct EnvLookup<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvLookup<F> {
    fn key(name: &str) -> String {
        format!("{ENV_PREFIX}_{name}")
    }

    fn get(&self, name: &str) -> Option<String> {
        (self.0)(&Self::key(name)).filter(|value| !value.is_empty())
    }

    fn invalid(name: &str, value: String) -> ConfigError {
        ConfigError::InvalidEnv {
            key: Self::key(name),
            value,
        }
    }

    fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        self.get(name)
            .map(|value| value.trim().parse().map_err(|_| Self::invalid(name, value)))
            .transpose()
    }

    fn flag(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        self.get(name)
            .map(|value| match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Self::invalid(name, value)),
            })
            .transpose()
    }

    /// Comma separated values.
    fn list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn duration(&self, name: &str) -> Result<Option<Duration>, ConfigError> {
        self.get(name)
            .map(|value| parse_duration(&value).ok_or_else(|| Self::invalid(name, value)))
            .transpose()
    }
}

/// `"250ms"`, `"30s"`, `"5m"`, `"1h"`, or a bare number of seconds.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount.parse().ok()?;
    match unit.trim() {
        "ms" => Some(Duration::from_millis(amount)),
        "" | "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount * 60)),
        "h" => Some(Duration::from_secs(amount * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = SuiteConfig::new()
            .with_seed(1)
            .apply_env_from(env(&[
                ("KISPEC_SEED", "99"),
                ("KISPEC_FOCUS", "net, db"),
                ("KISPEC_LABEL_FILTER", "fast"),
                ("KISPEC_DRY_RUN", "yes"),
                ("KISPEC_TIMEOUT", "2m"),
                ("KISPEC_GRACE_PERIOD", "250ms"),
                ("KISPEC_PARALLEL_PROCESS", "2"),
                ("KISPEC_PARALLEL_TOTAL", "4"),
                ("KISPEC_SYNC_SERVER", "127.0.0.1:4000"),
            ]))
            .unwrap();

        assert_eq!(config.random_seed, 99);
        assert_eq!(config.filter.focus_strings, vec!["net", "db"]);
        assert_eq!(config.filter.label_filter.as_deref(), Some("fast"));
        assert!(config.dry_run);
        assert_eq!(config.timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.grace_period, Duration::from_millis(250));
        assert_eq!((config.parallel_process, config.parallel_total), (2, 4));
        assert_eq!(config.sync_server_address.map(|a| a.port()), Some(4000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = SuiteConfig::new()
            .apply_env_from(env(&[("KISPEC_FAIL_FAST", "maybe")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                key: "KISPEC_FAIL_FAST".into(),
                value: "maybe".into()
            }
        );
        assert!(
            SuiteConfig::new()
                .apply_env_from(env(&[("KISPEC_TIMEOUT", "soon")]))
                .is_err()
        );
    }

    #[test]
    fn validation() {
        assert_eq!(
            SuiteConfig::new().with_parallel(3, 2).validate(),
            Err(ConfigError::InvalidParallelProcess {
                process: 3,
                total: 2
            })
        );
        assert_eq!(
            SuiteConfig::new().with_parallel(1, 0).validate(),
            Err(ConfigError::NoParallelProcesses)
        );
        assert_eq!(
            SuiteConfig::new()
                .with_flake_attempts(2)
                .with_must_pass_repeatedly(2)
                .validate(),
            Err(ConfigError::ConflictingRetryPolicies)
        );
        assert!(matches!(
            SuiteConfig::new().with_timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroDuration { name: "timeout", .. })
        ));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: SuiteConfig =
            serde_json::from_str(r#"{"random_seed": 5, "fail_fast": true}"#).unwrap();
        assert_eq!(config.random_seed, 5);
        assert!(config.fail_fast);
        assert_eq!(config.grace_period, DEFAULT_GRACE_PERIOD);
    }
}
