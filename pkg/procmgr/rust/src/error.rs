// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Supervisor errors.
//!
//! Only registry-level operations surface these to callers. Failures inside a
//! program's control loop are turned into state transitions instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no process matches '{0}'")]
    NotFound(String),

    #[error("program '{0}' is not started")]
    NotStarted(String),

    #[error("circular dependency between programs: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("failed to spawn program '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot run program '{program}' as '{user}': {reason}")]
    Credentials {
        program: String,
        user: String,
        reason: String,
    },

    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to deliver signal: {0}")]
    Signal(#[from] nix::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// True for the "nothing matched that name" outcome, which control
    /// surfaces report with their own not-found status.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SupervisorError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
