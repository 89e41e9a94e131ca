// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;
use crate::registry::CreationFailurePolicy;
use crate::sink::http::{IntakeConfig, RetryStrategy};

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
const DEFAULT_FLUSH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FLUSH_RETRIES: u64 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: SocketAddr,
    /// Basic auth credentials every ingestion request must present.
    pub user: String,
    pub pass: String,
    pub strip_ansi_codes: bool,
    pub creation_failure_policy: CreationFailurePolicy,
    pub log_level: String,
    pub intake: IntakeConfig,
    /// How long in-flight requests may run once shutdown starts.
    pub shutdown_grace_period: Duration,
    /// Deadline for closing every sink, `None` waits indefinitely.
    pub drain_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            user: String::new(),
            pass: String::new(),
            strip_ansi_codes: false,
            creation_failure_policy: CreationFailurePolicy::CacheFailure,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            intake: IntakeConfig::default(),
            shutdown_grace_period: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            drain_timeout: Some(Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS)),
        }
    }
}

impl Config {
    /// Reads the configuration from `LOG_DRAIN_*` environment variables.
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_value = lookup("LOG_DRAIN_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = parse_bind(&bind_value)?;

        let retention_days: u32 = parse_or("LOG_DRAIN_RETENTION_DAYS", &lookup, 0)?;
        let user = lookup("LOG_DRAIN_USER").unwrap_or_default();
        let pass = lookup("LOG_DRAIN_PASS").unwrap_or_default();
        let strip_ansi_codes = parse_bool("LOG_DRAIN_STRIP_ANSI_CODES", &lookup, false)?;
        let creation_failure_policy =
            if parse_bool("LOG_DRAIN_CACHE_FAILED_SINKS", &lookup, true)? {
                CreationFailurePolicy::CacheFailure
            } else {
                CreationFailurePolicy::RetryNextRequest
            };
        let log_level = lookup("LOG_DRAIN_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let url = lookup("LOG_DRAIN_INTAKE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("LOG_DRAIN_INTAKE_URL"))?;
        let api_key = lookup("LOG_DRAIN_INTAKE_API_KEY").filter(|key| !key.is_empty());
        let https_proxy = lookup("LOG_DRAIN_HTTPS_PROXY").or_else(|| lookup("HTTPS_PROXY"));
        let flush_interval_secs: u64 = parse_or(
            "LOG_DRAIN_FLUSH_INTERVAL_SECS",
            &lookup,
            DEFAULT_FLUSH_INTERVAL_SECS,
        )?;
        let flush_timeout_secs: u64 = parse_or(
            "LOG_DRAIN_FLUSH_TIMEOUT_SECS",
            &lookup,
            DEFAULT_FLUSH_TIMEOUT_SECS,
        )?;
        let flush_retries: u64 = parse_or("LOG_DRAIN_FLUSH_RETRIES", &lookup, DEFAULT_FLUSH_RETRIES)?;
        let use_compression = parse_bool("LOG_DRAIN_USE_COMPRESSION", &lookup, false)?;
        let compression_level: i32 = parse_or(
            "LOG_DRAIN_COMPRESSION_LEVEL",
            &lookup,
            DEFAULT_COMPRESSION_LEVEL,
        )?;

        let shutdown_grace_secs: u64 = parse_or(
            "LOG_DRAIN_SHUTDOWN_GRACE_SECS",
            &lookup,
            DEFAULT_SHUTDOWN_GRACE_SECS,
        )?;
        let drain_timeout_secs: u64 = parse_or(
            "LOG_DRAIN_DRAIN_TIMEOUT_SECS",
            &lookup,
            DEFAULT_DRAIN_TIMEOUT_SECS,
        )?;

        let config = Config {
            bind,
            user,
            pass,
            strip_ansi_codes,
            creation_failure_policy,
            log_level,
            intake: IntakeConfig {
                url: url.trim_end_matches('/').to_string(),
                api_key,
                https_proxy,
                retention_days,
                flush_interval: Duration::from_secs(flush_interval_secs),
                flush_timeout: Duration::from_secs(flush_timeout_secs),
                retry_strategy: RetryStrategy::LinearBackoff(flush_retries, DEFAULT_RETRY_BACKOFF_MS),
                compression_level: use_compression.then_some(compression_level),
            },
            shutdown_grace_period: Duration::from_secs(shutdown_grace_secs),
            drain_timeout: (drain_timeout_secs > 0).then(|| Duration::from_secs(drain_timeout_secs)),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if !(self.intake.url.starts_with("http://") || self.intake.url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "intake URL must start with http:// or https://, got '{}'",
                self.intake.url
            )));
        }

        if self.intake.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush interval must be greater than 0".to_string(),
            ));
        }

        if let Some(level) = self.intake.compression_level {
            if !(1..=22).contains(&level) {
                return Err(ConfigError::Invalid(format!(
                    "compression level must be between 1 and 22, got {level}"
                )));
            }
        }

        if self.user.is_empty() || self.pass.is_empty() {
            warn!("Basic auth user or password is empty; every ingestion request will be rejected");
        }

        Ok(())
    }
}

fn parse_bind(value: &str) -> Result<SocketAddr, ConfigError> {
    // ":8080" binds every interface
    let value = if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    };
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("invalid bind address '{value}'")))
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid(format!("{key} has invalid value '{raw}'"))),
    }
}

fn parse_bool<F>(key: &str, lookup: &F, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|val| val.trim().to_lowercase()) {
        None => Ok(default),
        Some(val) => match val.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid(format!(
                "{key} has invalid value '{val}'"
            ))),
        },
    }
}
