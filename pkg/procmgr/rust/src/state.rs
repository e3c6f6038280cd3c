// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ProcessState {
    /// Never started, or stopped on request.
    #[default]
    Stopped,
    /// Spawned, waiting out the start window.
    Starting,
    /// Survived the start window.
    Running,
    /// A start attempt failed; another attempt is pending.
    Backoff,
    /// Stop escalation in progress.
    Stopping,
    /// Exited on its own after reaching Running.
    Exited,
    /// Start retries exhausted. Only an explicit start leaves this state.
    Fatal,
    /// Reporting only.
    Unknown,
}

impl ProcessState {
    /// Numeric code used by supervisor-style status listings.
    pub fn code(self) -> i32 {
        match self {
            ProcessState::Stopped => 0,
            ProcessState::Starting => 10,
            ProcessState::Running => 20,
            ProcessState::Backoff => 30,
            ProcessState::Stopping => 40,
            ProcessState::Exited => 100,
            ProcessState::Fatal => 200,
            ProcessState::Unknown => 1000,
        }
    }

    /// States during which a child may hold an OS process handle.
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }

    pub(crate) fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Exited, Starting)
                | (Fatal, Starting)
                | (Backoff, Starting)
                | (Starting, Running)
                | (Starting, Backoff)
                | (Starting, Fatal)
                | (Starting, Stopping)
                | (Backoff, Fatal)
                | (Backoff, Stopped)
                | (Running, Stopping)
                | (Running, Exited)
                | (Stopping, Stopped)
                | (Stopping, Exited)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessState::Stopped => "STOPPED",
            ProcessState::Starting => "STARTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Backoff => "BACKOFF",
            ProcessState::Stopping => "STOPPING",
            ProcessState::Exited => "EXITED",
            ProcessState::Fatal => "FATAL",
            ProcessState::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}
