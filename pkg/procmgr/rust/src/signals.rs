// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{Result, SupervisorError};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::str::FromStr;

/// Resolve a signal name such as `TERM`, `SIGTERM`, `term` or `15`.
pub fn parse_signal(name: &str) -> Result<Signal> {
    let trimmed = name.trim();
    if let Ok(num) = trimmed.parse::<i32>() {
        return Signal::try_from(num).map_err(|_| SupervisorError::UnknownSignal(name.to_string()));
    }
    let upper = trimmed.to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full).map_err(|_| SupervisorError::UnknownSignal(name.to_string()))
}

/// Deliver `sig` to `pid`, or to the whole process group led by `pid`.
pub fn kill(pid: u32, sig: Signal, to_group: bool) -> Result<()> {
    let raw = pid as i32;
    let target = if to_group {
        Pid::from_raw(-raw)
    } else {
        Pid::from_raw(raw)
    };
    signal::kill(target, sig)?;
    Ok(())
}

/// Signal-0 liveness probe.
pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
