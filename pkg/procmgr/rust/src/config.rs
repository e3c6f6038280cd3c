// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{Result, SupervisorError};
use crate::signals::parse_signal;
use nix::sys::signal::Signal;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_DIR: &str = "/etc/procvisor/programs.d";

pub const DEFAULT_PRIORITY: i32 = 999;
pub const DEFAULT_START_RETRIES: u32 = 3;
pub const DEFAULT_START_SECS: Duration = Duration::from_secs(1);
pub const DEFAULT_STOP_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_KILL_WAIT: Duration = Duration::from_secs(2);
pub const DEFAULT_EXIT_CODES: [i32; 2] = [0, 2];

/// When a program that exited on its own gets spawned again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AutoRestart {
    Always,
    Never,
    /// Restart only when the exit code is not one of the expected codes.
    #[default]
    Unexpected,
}

impl AutoRestart {
    pub fn should_restart(&self, exit_code: Option<i32>, expected_codes: &[i32]) -> bool {
        match self {
            AutoRestart::Always => true,
            AutoRestart::Never => false,
            // Killed by a signal counts as unexpected.
            AutoRestart::Unexpected => exit_code.is_none_or(|c| !expected_codes.contains(&c)),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "always" | "true" => Some(AutoRestart::Always),
            "never" | "false" => Some(AutoRestart::Never),
            "unexpected" => Some(AutoRestart::Unexpected),
            _ => None,
        }
    }
}

impl fmt::Display for AutoRestart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoRestart::Always => write!(f, "always"),
            AutoRestart::Never => write!(f, "never"),
            AutoRestart::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// A systemd-style environment file reference. A leading `-` in the
/// configured path makes a missing file acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentFile {
    pub path: PathBuf,
    pub optional: bool,
}

impl EnvironmentFile {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(rest) => Self {
                path: PathBuf::from(rest),
                optional: true,
            },
            None => Self {
                path: PathBuf::from(raw),
                optional: false,
            },
        }
    }
}

/// Fully resolved description of one managed program. Defaults are applied
/// when the program spec is built, so readers never consult fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSpec {
    pub name: String,
    pub group: String,
    pub command: String,
    pub args: Vec<String>,
    pub directory: Option<PathBuf>,
    /// `user` or `user:group`.
    pub user: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub environment_file: Option<EnvironmentFile>,
    pub priority: i32,
    pub exit_codes: Vec<i32>,
    pub auto_start: bool,
    pub auto_restart: AutoRestart,
    pub start_retries: u32,
    pub start_secs: Duration,
    pub restart_pause: Duration,
    pub stop_signals: Vec<Signal>,
    pub stop_wait: Duration,
    pub kill_wait: Duration,
    pub stop_as_group: bool,
    pub kill_as_group: bool,
    pub cron: Option<String>,
    pub depends_on: Vec<String>,
    pub stdout_logfile: Option<PathBuf>,
    pub stderr_logfile: Option<PathBuf>,
    pub redirect_stderr: bool,
}

impl ProgramSpec {
    /// A spec with every optional field at its default.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            group: name.clone(),
            name,
            command: command.into(),
            args: Vec::new(),
            directory: None,
            user: None,
            environment: BTreeMap::new(),
            environment_file: None,
            priority: DEFAULT_PRIORITY,
            exit_codes: DEFAULT_EXIT_CODES.to_vec(),
            auto_start: true,
            auto_restart: AutoRestart::default(),
            start_retries: DEFAULT_START_RETRIES,
            start_secs: DEFAULT_START_SECS,
            restart_pause: Duration::ZERO,
            stop_signals: vec![Signal::SIGTERM],
            stop_wait: DEFAULT_STOP_WAIT,
            kill_wait: DEFAULT_KILL_WAIT,
            stop_as_group: false,
            kill_as_group: false,
            cron: None,
            depends_on: Vec::new(),
            stdout_logfile: None,
            stderr_logfile: None,
            redirect_stderr: false,
        }
    }

    pub fn is_expected_exit(&self, exit_code: Option<i32>) -> bool {
        exit_code.is_some_and(|c| self.exit_codes.contains(&c))
    }

    /// Dependency names with blank entries dropped.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.depends_on
            .iter()
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAutoRestart {
    Flag(bool),
    Policy(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProgram {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    group: Option<String>,
    directory: Option<PathBuf>,
    user: Option<String>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    environment_file: Option<String>,
    priority: Option<i32>,
    exit_codes: Option<Vec<i32>>,
    #[serde(default = "default_true")]
    auto_start: bool,
    auto_restart: Option<RawAutoRestart>,
    start_retries: Option<u32>,
    start_secs: Option<f64>,
    restart_pause: Option<f64>,
    stop_signals: Option<Vec<String>>,
    stop_wait_secs: Option<f64>,
    kill_wait_secs: Option<f64>,
    #[serde(default)]
    stop_as_group: bool,
    kill_as_group: Option<bool>,
    cron: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    stdout_logfile: Option<PathBuf>,
    stderr_logfile: Option<PathBuf>,
    #[serde(default)]
    redirect_stderr: bool,
}

fn seconds(key: &str, value: Option<f64>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
            SupervisorError::InvalidConfig(format!("{key} must be a non-negative number, got {secs}"))
        }),
    }
}

impl RawProgram {
    fn resolve(self, name: &str) -> Result<ProgramSpec> {
        let (command, args) = if self.args.is_empty() {
            let mut words = parse_command_line(&self.command)?.into_iter();
            match words.next() {
                Some(cmd) => (cmd, words.collect()),
                None => (String::new(), Vec::new()),
            }
        } else {
            (self.command.trim().to_string(), self.args)
        };
        if command.is_empty() {
            return Err(SupervisorError::InvalidConfig(format!(
                "program '{name}' has an empty command"
            )));
        }

        let auto_restart = match self.auto_restart {
            None => AutoRestart::default(),
            Some(RawAutoRestart::Flag(true)) => AutoRestart::Always,
            Some(RawAutoRestart::Flag(false)) => AutoRestart::Never,
            Some(RawAutoRestart::Policy(p)) => AutoRestart::parse(&p).ok_or_else(|| {
                SupervisorError::InvalidConfig(format!("unknown auto_restart policy '{p}'"))
            })?,
        };

        let stop_signals = match self.stop_signals {
            Some(names) if !names.is_empty() => names
                .iter()
                .map(|n| parse_signal(n))
                .collect::<Result<Vec<_>>>()?,
            _ => vec![Signal::SIGTERM],
        };

        let kill_as_group = self.kill_as_group.unwrap_or(self.stop_as_group);
        if self.stop_as_group && !kill_as_group {
            return Err(SupervisorError::InvalidConfig(
                "stop_as_group requires kill_as_group".to_string(),
            ));
        }

        let cron = match self.cron {
            Some(expr) if !expr.trim().is_empty() => {
                crate::cron::parse_schedule(&expr)?;
                Some(expr.trim().to_string())
            }
            _ => None,
        };

        Ok(ProgramSpec {
            name: name.to_string(),
            group: self
                .group
                .filter(|g| !g.trim().is_empty())
                .unwrap_or_else(|| name.to_string()),
            command,
            args,
            directory: self.directory,
            user: self.user.filter(|u| !u.trim().is_empty()),
            environment: self.environment,
            environment_file: self
                .environment_file
                .filter(|f| !f.trim().is_empty())
                .map(|f| EnvironmentFile::parse(f.trim())),
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            exit_codes: self
                .exit_codes
                .unwrap_or_else(|| DEFAULT_EXIT_CODES.to_vec()),
            auto_start: self.auto_start,
            auto_restart,
            start_retries: self.start_retries.unwrap_or(DEFAULT_START_RETRIES),
            start_secs: seconds("start_secs", self.start_secs, DEFAULT_START_SECS)?,
            restart_pause: seconds("restart_pause", self.restart_pause, Duration::ZERO)?,
            stop_signals,
            stop_wait: seconds("stop_wait_secs", self.stop_wait_secs, DEFAULT_STOP_WAIT)?,
            kill_wait: seconds("kill_wait_secs", self.kill_wait_secs, DEFAULT_KILL_WAIT)?,
            stop_as_group: self.stop_as_group,
            kill_as_group,
            cron,
            depends_on: self.depends_on,
            stdout_logfile: self.stdout_logfile,
            stderr_logfile: self.stderr_logfile,
            redirect_stderr: self.redirect_stderr,
        })
    }
}

/// Parse one program definition from YAML text.
pub fn parse_program(name: &str, yaml: &str) -> Result<ProgramSpec> {
    let raw: RawProgram = serde_yaml::from_str(yaml)
        .map_err(|e| SupervisorError::InvalidConfig(format!("parsing '{name}': {e}")))?;
    raw.resolve(name)
}

/// Split a command line into words. Single quotes are literal, double quotes
/// honour backslash escapes, and a bare backslash escapes the next character.
pub fn parse_command_line(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated(line)),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(unterminated(line)),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated(line)),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unterminated(line: &str) -> SupervisorError {
    SupervisorError::InvalidConfig(format!("unterminated quote in command: {line}"))
}

/// One configuration generation: every program keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ProgramSet {
    programs: BTreeMap<String, Arc<ProgramSpec>>,
}

impl ProgramSet {
    pub fn new(specs: impl IntoIterator<Item = ProgramSpec>) -> Self {
        let mut set = Self::default();
        for spec in specs {
            set.insert(spec);
        }
        set
    }

    /// Add or replace the program with this spec's name.
    pub fn insert(&mut self, spec: ProgramSpec) {
        self.programs.insert(spec.name.clone(), Arc::new(spec));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ProgramSpec>> {
        self.programs.get(name)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.programs.keys().cloned().collect()
    }

    /// Group name to member program names.
    pub fn groups(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for spec in self.programs.values() {
            groups
                .entry(spec.group.clone())
                .or_default()
                .insert(spec.name.clone());
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Specs in start order. The whole set is rejected if its dependencies
    /// form a cycle.
    pub fn ordered(&self) -> Result<Vec<Arc<ProgramSpec>>> {
        let specs: Vec<Arc<ProgramSpec>> = self.programs.values().cloned().collect();
        crate::sorter::sort_programs(&specs)
    }
}

/// Scan a directory for `*.yaml` files and parse each into a ProgramSpec.
/// The program name is derived from the filename (without extension).
/// Files that fail to parse or validate are logged and skipped.
pub fn load_configs(dir: &Path) -> anyhow::Result<ProgramSet> {
    use anyhow::Context;

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read config directory: {}", dir.display()))?;

    let mut yaml_files: Vec<_> = entries
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| {
            let is_yaml = e
                .path()
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                debug!(path = %e.path().display(), "skipping non-YAML file");
            }
            is_yaml
        })
        .collect();

    yaml_files.sort_by_key(|e| e.file_name());

    let mut set = ProgramSet::default();
    for entry in yaml_files {
        let path = entry.path();
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            warn!(path = %path.display(), "skipping file with a non UTF-8 name");
            continue;
        };

        let parsed = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))
            .and_then(|contents| {
                parse_program(name, &contents).with_context(|| format!("loading {}", path.display()))
            });
        match parsed {
            Ok(spec) => set.insert(spec),
            Err(e) => warn!(path = %path.display(), "skipping program: {e:#}"),
        }
    }

    Ok(set)
}
