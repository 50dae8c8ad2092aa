// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use std::path::Path;
use tokio::time::Duration;

pub const CONFIG_ENV: &str = "DD_CLITEST_CONFIG";
pub const ERROR_DEBOUNCE_ENV: &str = "DD_CLITEST_ERROR_DEBOUNCE_TIMEOUT";

const DEFAULT_ERROR_DEBOUNCE_TIMEOUT_MS: u64 = 100;
const DEFAULT_KILL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_FIND_TIMEOUT_MS: u64 = 1000;

fn default_error_debounce_timeout_ms() -> u64 {
    DEFAULT_ERROR_DEBOUNCE_TIMEOUT_MS
}

fn default_kill_timeout_ms() -> u64 {
    DEFAULT_KILL_TIMEOUT_MS
}

fn default_find_timeout_ms() -> u64 {
    DEFAULT_FIND_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Quiet period after the last error fragment before readiness fails.
    #[serde(default = "default_error_debounce_timeout_ms")]
    pub error_debounce_timeout_ms: u64,
    /// Upper bound on how long `render` waits for readiness. Unbounded if unset.
    #[serde(default)]
    pub ready_timeout_ms: Option<u64>,
    /// How long cleanup waits for a killed process to exit.
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
    /// How long `find_by_text` waits for matching output.
    #[serde(default = "default_find_timeout_ms")]
    pub find_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            error_debounce_timeout_ms: DEFAULT_ERROR_DEBOUNCE_TIMEOUT_MS,
            ready_timeout_ms: None,
            kill_timeout_ms: DEFAULT_KILL_TIMEOUT_MS,
            find_timeout_ms: DEFAULT_FIND_TIMEOUT_MS,
        }
    }
}

impl Config {
    pub fn error_debounce_timeout(&self) -> Duration {
        Duration::from_millis(self.error_debounce_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_ms.map(Duration::from_millis)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn find_timeout(&self) -> Duration {
        Duration::from_millis(self.find_timeout_ms)
    }

    /// Defaults, overlaid with the file named by `DD_CLITEST_CONFIG` and then
    /// `DD_CLITEST_ERROR_DEBOUNCE_TIMEOUT`.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => load_config(Path::new(&path))?,
            None => Config::default(),
        };
        if let Ok(raw) = std::env::var(ERROR_DEBOUNCE_ENV) {
            config.error_debounce_timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("parsing {ERROR_DEBOUNCE_ENV}={raw}"))?;
        }
        debug!("using {config:?}");
        Ok(config)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    // An empty document means "all defaults".
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}
