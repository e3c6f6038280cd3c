// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::EnvironmentFile;
use crate::error::Result;
use std::io;
use std::path::Path;

/// Parse systemd-style environment file contents into key-value pairs.
/// Supports `KEY=VALUE`, `KEY="VALUE"`, `KEY='VALUE'`, an optional `export`
/// prefix, comments (#), and blank lines.
pub fn parse_environment(contents: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        if let Some((key, raw_val)) = trimmed.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            vars.push((key.to_string(), unquote(raw_val.trim()).to_string()));
        }
    }
    vars
}

fn unquote(val: &str) -> &str {
    for quote in ['"', '\''] {
        if val.len() >= 2 && val.starts_with(quote) && val.ends_with(quote) {
            return &val[1..val.len() - 1];
        }
    }
    val
}

pub fn parse_environment_file(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(parse_environment(&contents))
}

/// Load a configured environment file. A missing optional file yields no
/// variables.
pub fn load_environment_file(file: &EnvironmentFile) -> Result<Vec<(String, String)>> {
    match parse_environment_file(&file.path) {
        Err(crate::error::SupervisorError::Io(e))
            if file.optional && e.kind() == io::ErrorKind::NotFound =>
        {
            Ok(Vec::new())
        }
        other => other,
    }
}
