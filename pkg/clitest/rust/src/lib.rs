// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Test harness for interactive command-line programs.
//!
//! [`render`] spawns a command and resolves once the process is ready: its
//! first clean line of stdout wins, while error output that arrives first
//! fails the render after a short debounce window. Every rendered process is
//! tracked until [`cleanup`] kills it.

pub mod config;
pub mod debounce;
pub mod errors;
pub mod harness;
pub mod instance;
pub mod observer;
pub mod output;
pub mod queries;
pub mod readiness;
pub mod registry;
pub mod spawner;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{Config, load_config};
pub use errors::{CleanupError, QueryError, RenderError, TerminationError};
pub use harness::{
    Harness, RenderOptions, RenderResult, cleanup, configure, default_harness, get_config, render,
};
pub use instance::{ExitInfo, Instance, InstanceId};
pub use observer::{ObserverId, Observers};
pub use queries::{LineQueries, Queries};
pub use readiness::{FailureReason, Readiness};
pub use registry::{Interaction, Registry, SignalInteraction};
pub use spawner::{ProcessSpawner, SpawnOptions, SpawnRequest, SpawnedProcess, TokioSpawner};
