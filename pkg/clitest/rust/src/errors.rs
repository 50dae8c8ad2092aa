// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::instance::InstanceId;
use std::io;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Error output settled before the process printed a trusted prompt.
    #[error("[{id}] process failed before becoming ready:\n{reason}")]
    NotReady {
        id: InstanceId,
        pid: Option<u32>,
        reason: String,
    },

    #[error("[{id}] process exited with code {exit_code} before producing any output")]
    ExitedBeforeReady { id: InstanceId, exit_code: i32 },

    #[error("[{id}] process did not become ready within {}ms", timeout.as_millis())]
    ReadyTimeout { id: InstanceId, timeout: Duration },

    #[error("[{id}] readiness tracking stopped before a decision was made")]
    Aborted { id: InstanceId },
}

impl RenderError {
    /// The registered instance the failure belongs to, if one was created.
    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            RenderError::Spawn { .. } => None,
            RenderError::NotReady { id, .. }
            | RenderError::ExitedBeforeReady { id, .. }
            | RenderError::ReadyTimeout { id, .. }
            | RenderError::Aborted { id } => Some(*id),
        }
    }
}

#[derive(Error, Debug)]
pub enum TerminationError {
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },

    #[error("pid {pid} still running {}s after SIGKILL", timeout.as_secs())]
    Timeout { pid: u32, timeout: Duration },
}

/// Every instance cleanup could not terminate. Each instance is listed once.
#[derive(Error, Debug)]
#[error("failed to terminate {} instance(s){}", .failures.len(), format_failures(.failures))]
pub struct CleanupError {
    pub failures: Vec<(InstanceId, TerminationError)>,
}

fn format_failures(failures: &[(InstanceId, TerminationError)]) -> String {
    failures
        .iter()
        .map(|(id, err)| format!("\n  [{id}] {err}"))
        .collect()
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(
        "[{id}] no output containing {needle:?} within {}ms; buffered output:\n{text}",
        timeout.as_millis()
    )]
    NotFound {
        id: InstanceId,
        needle: String,
        timeout: Duration,
        text: String,
    },
}
