// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const SPAWNED: &str = "Spawned program";

/// Handle to a running procvisord daemon.
pub struct DaemonHandle {
    child: Child,
    log_lines: Arc<Mutex<Vec<String>>>,
    _readers: Vec<std::thread::JoinHandle<()>>,
}

impl DaemonHandle {
    /// Start the daemon with `PROCVISOR_CONFIG_DIR` pointing to `config_dir`.
    pub fn start(config_dir: &Path) -> Self {
        let bin = env!("CARGO_BIN_EXE_procvisord");
        let mut child = Command::new(bin)
            .env("PROCVISOR_CONFIG_DIR", config_dir)
            .env("RUST_LOG", "info")
            .env("NO_COLOR", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start procvisord");

        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let readers = vec![
            collect_lines(stdout, "daemon", Arc::clone(&log_lines)),
            collect_lines(stderr, "daemon:err", Arc::clone(&log_lines)),
        ];

        Self {
            child,
            log_lines,
            _readers: readers,
        }
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        self.wait_for_log_count(pattern, 1, timeout)
    }

    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, DEFAULT_TIMEOUT)
    }

    /// Count log lines containing every one of `patterns`.
    pub fn count_log_matches_all(&self, patterns: &[&str]) -> usize {
        let lines = self.log_lines.lock().unwrap();
        lines
            .iter()
            .filter(|l| patterns.iter().all(|p| l.contains(p)))
            .count()
    }

    pub fn count_log_matches(&self, pattern: &str) -> usize {
        self.count_log_matches_all(&[pattern])
    }

    /// Wait until at least `n` log lines contain `pattern`.
    pub fn wait_for_log_count(&self, pattern: &str, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count_log_matches(pattern) >= n {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Number of spawns logged for `program`.
    pub fn spawn_count(&self, program: &str) -> usize {
        self.count_log_matches_all(&[SPAWNED, &format!("program={program} ")])
    }

    /// Wait until `program` has been spawned at least `n` times.
    pub fn wait_for_spawns(&self, program: &str, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.spawn_count(program) >= n {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to daemon");
    }

    /// Send SIGTERM and wait for the daemon to exit.
    pub fn stop(&mut self) -> std::process::ExitStatus {
        self.send_signal(Signal::SIGTERM);
        self.wait_with_timeout(Duration::from_secs(20))
    }

    /// Wait for the daemon to exit, killing it once `timeout` passes.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> std::process::ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .child
                .try_wait()
                .expect("failed to check daemon status")
            {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed daemon");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// `(program, pid)` from every "Spawned program" line, in log order.
    pub fn spawned(&self) -> Vec<(String, u32)> {
        let lines = self.log_lines.lock().unwrap();
        lines
            .iter()
            .filter(|l| l.contains(SPAWNED))
            .filter_map(|l| Some((field(l, "program")?.to_string(), field(l, "pid")?.parse().ok()?)))
            .collect()
    }

    pub fn spawned_pids(&self) -> Vec<u32> {
        self.spawned().into_iter().map(|(_, pid)| pid).collect()
    }

    pub fn pids_of(&self, program: &str) -> Vec<u32> {
        self.spawned()
            .into_iter()
            .filter(|(name, _)| name == program)
            .map(|(_, pid)| pid)
            .collect()
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn collect_lines(
    stream: impl Read + Send + 'static,
    tag: &'static str,
    sink: Arc<Mutex<Vec<String>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(l) => {
                    let l = strip_ansi(&l);
                    eprintln!("[{tag}] {l}");
                    sink.lock().unwrap().push(l);
                }
                Err(_) => break,
            }
        }
    })
}

/// Drop terminal escape sequences so field matching works with or without
/// colored output.
fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Value of a `key=value` field in a formatted log line.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let marker = format!(" {key}=");
    let start = line.find(&marker)? + marker.len();
    let rest = &line[start..];
    let end = rest.find(' ').unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Write `<name>.yaml` into `dir`.
pub fn write_config(dir: &Path, name: &str, yaml: &str) {
    let path = dir.join(format!("{name}.yaml"));
    std::fs::write(&path, yaml)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
}

pub fn remove_config(dir: &Path, name: &str) {
    let path = dir.join(format!("{name}.yaml"));
    std::fs::remove_file(&path)
        .unwrap_or_else(|e| panic!("failed to remove {}: {e}", path.display()));
}

pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Wait until a PID is no longer alive, or timeout.
pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pid_is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
