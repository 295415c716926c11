// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Runtime parameters of the observation core, loaded from YAML.
///
/// Everything has a working default, so an empty document is a valid
/// configuration.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Scheduler parameters shared by both runner flavours.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Defaults applied to newly built connections.
    #[serde(default)]
    pub connection: ConnectionDefaults,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    /// Polling period of timeout watchers and waiting APIs.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Observer lifetime when none is set explicitly.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,
}

impl RuntimeConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.default_timeout_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ConnectionDefaults {
    /// Line terminator observers split inbound text on.
    #[serde(default = "default_newline")]
    pub newline: String,
    /// Prefix of autogenerated connection names.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            newline: default_newline(),
            name_prefix: default_name_prefix(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    10
}

fn default_timeout_secs() -> f64 {
    10.0
}

fn default_newline() -> String {
    "\n".to_string()
}

fn default_name_prefix() -> String {
    "conn".to_string()
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let cfg: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path:?}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.runtime.tick_interval_ms > 0,
            "runtime.tick_interval_ms must be > 0"
        );
        ensure!(
            self.runtime.default_timeout_secs > 0.0,
            "runtime.default_timeout_secs must be > 0"
        );
        ensure!(
            !self.connection.newline.is_empty(),
            "connection.newline must not be empty"
        );
        Ok(())
    }
}
