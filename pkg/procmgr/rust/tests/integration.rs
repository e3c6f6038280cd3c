// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

mod helpers;

use helpers::{
    DEFAULT_TIMEOUT, DaemonHandle, pid_is_alive, remove_config, wait_for_pid_gone, write_config,
};
use std::time::Duration;

const SLEEPER: &str = "command: /bin/sleep 300\nstart_secs: 0.2\n";

// ===========================================================================
// Group 1: Basic Lifecycle
// ===========================================================================

#[test]
fn test_daemon_starts_and_spawns_process() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "sleeper", SLEEPER);

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_spawns("sleeper", 1, DEFAULT_TIMEOUT),
        "daemon should spawn sleeper"
    );
    assert!(daemon.wait_for_log_default("program is running"));

    let pids = daemon.spawned_pids();
    assert_eq!(pids.len(), 1, "expected 1 spawned process");
    assert!(pid_is_alive(pids[0]), "managed process should be alive");

    let status = daemon.stop();
    assert!(status.success(), "daemon should exit cleanly");
    assert!(
        wait_for_pid_gone(pids[0], Duration::from_secs(5)),
        "managed process should be gone after shutdown"
    );
}

#[test]
fn test_daemon_no_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    let nonexistent = dir.path().join("nonexistent");

    let mut daemon = DaemonHandle::start(&nonexistent);
    assert!(
        daemon.wait_for_log_default("config directory does not exist"),
        "daemon should log missing config dir"
    );

    let status = daemon.stop();
    assert!(status.success(), "daemon should exit cleanly");
}

#[test]
fn test_daemon_empty_config_dir() {
    let dir = tempfile::tempdir().unwrap();

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_log_default("count=0"),
        "daemon should log zero configs"
    );

    let status = daemon.stop();
    assert!(status.success(), "daemon should exit cleanly");
}

// ===========================================================================
// Group 2: Graceful Shutdown
// ===========================================================================

#[test]
fn test_shutdown_stops_managed_processes() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "sleep1", SLEEPER);
    write_config(dir.path(), "sleep2", SLEEPER);

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_log("count=2", Duration::from_secs(5)),
        "daemon should load 2 configs"
    );
    assert!(daemon.wait_for_spawns("sleep1", 1, DEFAULT_TIMEOUT));
    assert!(daemon.wait_for_spawns("sleep2", 1, DEFAULT_TIMEOUT));

    let pids = daemon.spawned_pids();
    assert_eq!(pids.len(), 2);
    for &pid in &pids {
        assert!(pid_is_alive(pid), "pid {pid} should be alive before shutdown");
    }

    let status = daemon.stop();
    assert!(status.success(), "daemon should exit cleanly");
    assert!(daemon.wait_for_log("sending stop signal", Duration::from_secs(0)));

    for &pid in &pids {
        assert!(
            wait_for_pid_gone(pid, Duration::from_secs(5)),
            "pid {pid} should be gone after shutdown"
        );
    }
}

#[test]
fn test_shutdown_escalates_to_sigkill() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "stubborn",
        concat!(
            "command: /bin/sh\n",
            "args:\n  - '-c'\n  - 'trap \"\" TERM; while true; do sleep 1; done'\n",
            "start_secs: 0.2\n",
            "stop_wait_secs: 0.5\n",
            "kill_wait_secs: 2\n",
        ),
    );

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_log_default("program is running"));
    let pid = daemon.pids_of("stubborn")[0];

    let status = daemon.stop();
    assert!(status.success());
    assert!(
        daemon.wait_for_log("sending SIGKILL", Duration::from_secs(0)),
        "shutdown should escalate to SIGKILL"
    );
    assert!(wait_for_pid_gone(pid, Duration::from_secs(5)));
}

#[test]
fn test_shutdown_via_sigint() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "sleeper", SLEEPER);

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_spawns("sleeper", 1, DEFAULT_TIMEOUT));

    daemon.send_signal(nix::sys::signal::Signal::SIGINT);
    let status = daemon.wait_with_timeout(Duration::from_secs(20));

    assert!(
        daemon.wait_for_log("received SIGINT", Duration::from_secs(0)),
        "daemon should log received SIGINT"
    );
    assert!(status.success(), "daemon should exit cleanly on SIGINT");
}

// ===========================================================================
// Group 3: Restart Policies
// ===========================================================================

#[test]
fn test_auto_restart_always_restarts_after_success() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "looper",
        "command: /bin/sh -c 'exit 0'\nauto_restart: always\nstart_secs: 0\n",
    );

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_spawns("looper", 3, DEFAULT_TIMEOUT),
        "process should be restarted at least twice, got {} spawns",
        daemon.spawn_count("looper")
    );

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_auto_restart_never() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "once",
        "command: /bin/sh -c 'exit 1'\nauto_restart: never\nstart_secs: 0\n",
    );

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_log_default("program exited"));
    std::thread::sleep(Duration::from_secs(2));
    assert_eq!(daemon.spawn_count("once"), 1, "process should NOT be restarted");

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_auto_restart_unexpected_with_expected_exit() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "success",
        "command: /bin/sh -c 'exit 0'\nstart_secs: 0\n",
    );

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_log_default("exit_code=Some(0)"));
    std::thread::sleep(Duration::from_secs(2));
    assert_eq!(
        daemon.spawn_count("success"),
        1,
        "an expected exit code should not trigger a restart"
    );

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_auto_restart_unexpected_with_failure_exit() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "crasher",
        "command: /bin/sh -c 'exit 1'\nexit_codes: [0]\nstart_secs: 0\n",
    );

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_spawns("crasher", 3, DEFAULT_TIMEOUT),
        "an unexpected exit code should trigger restarts, got {} spawns",
        daemon.spawn_count("crasher")
    );

    let status = daemon.stop();
    assert!(status.success());
}

// ===========================================================================
// Group 4: Start retries
// ===========================================================================

#[test]
fn test_early_exits_exhaust_retries() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "flaky",
        "command: /bin/sh -c 'exit 1'\nstart_secs: 5\nstart_retries: 3\n",
    );

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_log("start retries exhausted", Duration::from_secs(15)),
        "daemon should give up on the program"
    );
    std::thread::sleep(Duration::from_secs(1));
    assert_eq!(daemon.spawn_count("flaky"), 3);

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_spawn_failure_logged_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "bad-bin",
        "command: /nonexistent/binary\nstart_retries: 2\n",
    );
    write_config(dir.path(), "good", SLEEPER);

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_log_default("failed to start program, giving up"),
        "daemon should log spawn failure"
    );
    assert!(daemon.wait_for_spawns("good", 1, DEFAULT_TIMEOUT));
    assert_eq!(daemon.spawn_count("bad-bin"), 0, "nothing should be spawned");

    let status = daemon.stop();
    assert!(
        status.success(),
        "daemon should keep running despite spawn failure"
    );
}

// ===========================================================================
// Group 5: Configuration
// ===========================================================================

#[test]
fn test_auto_start_false() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "disabled", &format!("{SLEEPER}auto_start: false\n"));

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_log_default("configuration reconciled"));
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(daemon.spawn_count("disabled"), 0, "process should NOT be spawned");

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_invalid_yaml_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "good", SLEEPER);
    write_config(dir.path(), "bad", "not: valid: yaml: [");
    write_config(dir.path(), "typo", "command: /bin/true\nauto_restrat: never\n");

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_log_default("count=1"),
        "daemon should load only the valid config"
    );
    assert_eq!(daemon.count_log_matches("skipping program"), 2);
    assert!(daemon.wait_for_spawns("good", 1, DEFAULT_TIMEOUT));

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_dependencies_start_first() {
    let dir = tempfile::tempdir().unwrap();
    // Alphabetical and priority order would both put "app" first.
    write_config(
        dir.path(),
        "app",
        &format!("{SLEEPER}priority: 1\ndepends_on: [zdb]\n"),
    );
    write_config(dir.path(), "zdb", &format!("{SLEEPER}priority: 50\n"));

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_spawns("app", 1, DEFAULT_TIMEOUT));
    let order: Vec<String> = daemon.spawned().into_iter().map(|(name, _)| name).collect();
    assert_eq!(order, vec!["zdb", "app"]);

    let status = daemon.stop();
    assert!(status.success());
}

// ===========================================================================
// Group 6: Reload
// ===========================================================================

#[test]
fn test_sighup_adds_and_removes_programs() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "old", SLEEPER);
    write_config(dir.path(), "kept", SLEEPER);

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_spawns("old", 1, DEFAULT_TIMEOUT));
    assert!(daemon.wait_for_spawns("kept", 1, DEFAULT_TIMEOUT));
    let old_pid = daemon.pids_of("old")[0];
    let kept_pid = daemon.pids_of("kept")[0];

    remove_config(dir.path(), "old");
    write_config(dir.path(), "new", SLEEPER);
    daemon.send_signal(nix::sys::signal::Signal::SIGHUP);

    assert!(daemon.wait_for_log_default("reload complete"));
    assert!(daemon.wait_for_spawns("new", 1, DEFAULT_TIMEOUT));
    assert!(
        wait_for_pid_gone(old_pid, Duration::from_secs(5)),
        "removed program should be stopped"
    );
    assert!(pid_is_alive(kept_pid), "unchanged program should keep running");
    assert_eq!(daemon.spawn_count("kept"), 1);

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_sighup_restarts_changed_program() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "api", SLEEPER);

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_spawns("api", 1, DEFAULT_TIMEOUT));
    let first = daemon.pids_of("api")[0];

    write_config(dir.path(), "api", "command: /bin/sleep 200\nstart_secs: 0.2\n");
    daemon.send_signal(nix::sys::signal::Signal::SIGHUP);

    assert!(daemon.wait_for_spawns("api", 2, DEFAULT_TIMEOUT));
    assert!(wait_for_pid_gone(first, Duration::from_secs(5)));

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_sighup_rejects_cyclic_configuration() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "a", SLEEPER);

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_spawns("a", 1, DEFAULT_TIMEOUT));
    let pid = daemon.pids_of("a")[0];

    write_config(dir.path(), "a", &format!("{SLEEPER}depends_on: [b]\n"));
    write_config(dir.path(), "b", &format!("{SLEEPER}depends_on: [a]\n"));
    daemon.send_signal(nix::sys::signal::Signal::SIGHUP);

    assert!(daemon.wait_for_log_default("reload failed"));
    assert!(pid_is_alive(pid), "existing program should be untouched");
    assert_eq!(daemon.spawn_count("b"), 0);

    let status = daemon.stop();
    assert!(status.success());
}

// ===========================================================================
// Group 7: Environment handling
// ===========================================================================

#[test]
fn test_environment_file_loading() {
    let dir = tempfile::tempdir().unwrap();
    let env_file = dir.path().join("test.env");
    std::fs::write(&env_file, "MY_VAR=from_file\n").unwrap();

    write_config(
        dir.path(),
        "env-test",
        &format!(
            concat!(
                "command: /bin/sh\n",
                "args:\n",
                "  - '-c'\n",
                "  - 'test \"$MY_VAR\" = \"from_file\" && exit 7 || exit 1'\n",
                "environment_file: {}\n",
                "auto_restart: never\n",
                "start_secs: 0\n",
            ),
            env_file.display()
        ),
    );

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_log_default("exit_code=Some(7)"),
        "child should see env var from environment_file"
    );

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_environment_overrides_environment_file() {
    let dir = tempfile::tempdir().unwrap();
    let env_file = dir.path().join("test.env");
    std::fs::write(&env_file, "MY_VAR=from_file\n").unwrap();

    write_config(
        dir.path(),
        "override-test",
        &format!(
            concat!(
                "command: /bin/sh\n",
                "args:\n",
                "  - '-c'\n",
                "  - 'test \"$MY_VAR\" = \"overridden\" && exit 7 || exit 1'\n",
                "environment_file: {}\n",
                "environment:\n",
                "  MY_VAR: overridden\n",
                "auto_restart: never\n",
                "start_secs: 0\n",
            ),
            env_file.display()
        ),
    );

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(
        daemon.wait_for_log_default("exit_code=Some(7)"),
        "environment should override environment_file"
    );

    let status = daemon.stop();
    assert!(status.success());
}

#[test]
fn test_child_sees_supervisor_identity() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        "whoami",
        concat!(
            "command: /bin/sh\n",
            "args:\n",
            "  - '-c'\n",
            "  - 'test \"$PROCVISOR_PROCESS_NAME:$PROCVISOR_GROUP_NAME\" = \"whoami:tools\" && exit 7 || exit 1'\n",
            "group: tools\n",
            "auto_restart: never\n",
            "start_secs: 0\n",
        ),
    );

    let mut daemon = DaemonHandle::start(dir.path());
    assert!(daemon.wait_for_log_default("exit_code=Some(7)"));

    let status = daemon.stop();
    assert!(status.success());
}
