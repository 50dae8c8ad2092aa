// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use dd_clitest::{Config, Harness};
use nix::sys::signal;
use nix::unistd::Pid;
use std::time::Duration;
use tokio::time::Instant;

/// A harness with a short debounce window so failing renders settle quickly.
pub fn harness() -> Harness {
    Harness::new(Config {
        error_debounce_timeout_ms: 50,
        ready_timeout_ms: Some(10_000),
        kill_timeout_ms: 5_000,
        find_timeout_ms: 5_000,
    })
}

/// Check if a PID is still alive.
pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Wait until a PID is no longer alive, or timeout.
pub async fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pid_is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
