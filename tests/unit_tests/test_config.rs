// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use linewatch_rs::cfg::{cli::resolve_config_path, config::Config};

#[test]
fn test_load_from_file() -> Result<()> {
    let cfg = resolve_config_path("tests/config.yaml").and_then(Config::load_from_file)?;

    assert_eq!(cfg.runtime.tick(), Duration::from_millis(10));
    assert_eq!(cfg.runtime.default_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.connection.newline, "\n");
    assert_eq!(cfg.connection.name_prefix, "test-conn");
    Ok(())
}

#[test]
fn test_defaults_are_usable() {
    let cfg = Config::default();

    assert_eq!(cfg.runtime.tick(), Duration::from_millis(10));
    assert_eq!(cfg.runtime.default_timeout(), Duration::from_secs(10));
    assert_eq!(cfg.connection.newline, "\n");
    assert_eq!(cfg.connection.name_prefix, "conn");
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(Config::load_from_file("tests/definitely-not-there.yaml").is_err());
}
