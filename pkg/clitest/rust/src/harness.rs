// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! `render` and `cleanup`: the entry points test code uses.

use crate::config::Config;
use crate::errors::{CleanupError, QueryError, RenderError};
use crate::instance::{self, DriverOptions, Instance, ProcessIo};
use crate::observer::Observers;
use crate::queries::{self, LineQueries, Queries};
use crate::readiness::{FailureReason, Readiness};
use crate::registry::{self, Interaction, Registry, SignalInteraction};
use crate::spawner::{
    BoxedWriter, ProcessSpawner, SpawnOptions, SpawnRequest, SpawnedProcess, TokioSpawner,
};
use log::{info, warn};
use std::io;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::time::{Duration, timeout};

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Working directory. Defaults to the current directory of the host process.
    pub cwd: Option<PathBuf>,
    pub spawn_opts: SpawnOptions,
    /// Mirror the process's stdout to our own stdout as it arrives.
    pub debug: bool,
}

impl RenderOptions {
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn spawn_opts(mut self, spawn_opts: SpawnOptions) -> Self {
        self.spawn_opts = spawn_opts;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spawn_opts.env.insert(key.into(), value.into());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// A ready instance plus the process's stdin and the harness's queries.
pub struct RenderResult {
    instance: Instance,
    stdin: Option<BoxedWriter>,
    queries: Arc<dyn Queries>,
    observers: Observers,
    find_timeout: Duration,
}

impl Deref for RenderResult {
    type Target = Instance;

    fn deref(&self) -> &Instance {
        &self.instance
    }
}

impl std::fmt::Debug for RenderResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderResult")
            .field("instance", &self.instance)
            .field("stdin", &self.stdin.is_some())
            .finish()
    }
}

impl RenderResult {
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn stdin(&mut self) -> Option<&mut BoxedWriter> {
        self.stdin.as_mut()
    }

    pub async fn write(&mut self, data: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed"))?;
        stdin.write_all(data.as_bytes()).await?;
        stdin.flush().await
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.write(&format!("{line}\n")).await
    }

    /// Close stdin so the process sees end of input.
    pub async fn close_stdin(&mut self) -> io::Result<()> {
        match self.stdin.take() {
            Some(mut stdin) => stdin.shutdown().await,
            None => Ok(()),
        }
    }

    pub fn query_by_text(&self, needle: &str) -> Option<String> {
        self.queries.query_by_text(&self.instance, needle)
    }

    pub fn query_all_by_text(&self, needle: &str) -> Vec<String> {
        self.queries.query_all_by_text(&self.instance, needle)
    }

    /// Wait up to the configured find timeout for output containing `needle`.
    pub async fn find_by_text(&self, needle: &str) -> Result<String, QueryError> {
        self.find_by_text_within(needle, self.find_timeout).await
    }

    pub async fn find_by_text_within(
        &self,
        needle: &str,
        limit: Duration,
    ) -> Result<String, QueryError> {
        queries::find_by_text(
            self.queries.as_ref(),
            &self.instance,
            &self.observers,
            needle,
            limit,
        )
        .await
    }
}

pub struct Harness {
    config: RwLock<Config>,
    registry: Registry,
    observers: Observers,
    spawner: Arc<dyn ProcessSpawner>,
    interaction: Option<Arc<dyn Interaction>>,
    queries: Arc<dyn Queries>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self {
            config: RwLock::new(config),
            registry: Registry::new(),
            observers: Observers::default(),
            spawner: Arc::new(TokioSpawner),
            interaction: None,
            queries: Arc::new(LineQueries),
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Replace the `SIGKILL` interaction cleanup uses.
    pub fn with_interaction(mut self, interaction: Arc<dyn Interaction>) -> Self {
        self.interaction = Some(interaction);
        self
    }

    /// Replace the queries bound onto every [`RenderResult`].
    pub fn with_queries(mut self, queries: Arc<dyn Queries>) -> Self {
        self.queries = queries;
        self
    }

    pub fn config(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the configuration used by subsequent renders and cleanups.
    pub fn configure(&self, update: impl FnOnce(&mut Config)) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut config);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// Spawn `command` and wait until it is ready for interaction.
    ///
    /// The instance is registered before waiting; it stays registered when
    /// readiness fails, and only [`Harness::cleanup`] removes it.
    pub async fn render<I, S>(
        &self,
        command: &str,
        args: I,
        options: RenderOptions,
    ) -> Result<RenderResult, RenderError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = self.config();
        let cwd = match options.cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir().map_err(|source| RenderError::Spawn {
                command: command.to_string(),
                source,
            })?,
        };
        let request = SpawnRequest {
            command: command.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd,
            options: options.spawn_opts,
        };
        let command_line = request.command_line();

        let SpawnedProcess {
            pid,
            stdin,
            stdout,
            stderr,
            exit,
            terminator,
        } = self
            .spawner
            .spawn(&request)
            .map_err(|source| RenderError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let (instance, driver) = instance::start(
            pid,
            command_line,
            terminator,
            ProcessIo {
                stdout,
                stderr,
                exit,
            },
            DriverOptions {
                error_debounce_timeout: config.error_debounce_timeout(),
                debug: options.debug,
                observers: self.observers.clone(),
            },
        );
        let id = instance.id();
        self.registry.insert(instance.clone());
        info!(
            "[{id}] spawned `{}` (pid={})",
            instance.command(),
            pid.unwrap_or(0)
        );
        tokio::spawn(driver);

        let mut waiter = instance.readiness_waiter();
        let outcome = match config.ready_timeout() {
            Some(limit) => timeout(limit, waiter.wait()).await.map_err(|_| {
                warn!("[{id}] not ready after {}ms", limit.as_millis());
                RenderError::ReadyTimeout { id, timeout: limit }
            })?,
            None => waiter.wait().await,
        };

        match outcome {
            Some(Readiness::Ready) => Ok(RenderResult {
                instance,
                stdin,
                queries: Arc::clone(&self.queries),
                observers: self.observers.clone(),
                find_timeout: config.find_timeout(),
            }),
            Some(Readiness::Failed(FailureReason::Errored(reason))) => {
                Err(RenderError::NotReady { id, pid, reason })
            }
            Some(Readiness::Failed(FailureReason::ExitedSilently { exit_code })) => {
                Err(RenderError::ExitedBeforeReady { id, exit_code })
            }
            Some(Readiness::Pending) | None => Err(RenderError::Aborted { id }),
        }
    }

    /// Kill and forget every instance this harness rendered.
    pub async fn cleanup(&self) -> Result<(), CleanupError> {
        let interaction = match &self.interaction {
            Some(interaction) => Arc::clone(interaction),
            None => Arc::new(SignalInteraction::new(self.config().kill_timeout())),
        };
        registry::cleanup(&self.registry, interaction).await
    }
}

static DEFAULT_HARNESS: LazyLock<Harness> = LazyLock::new(|| {
    let config = Config::from_env().unwrap_or_else(|e| {
        warn!("ignoring invalid configuration: {e:#}");
        Config::default()
    });
    Harness::new(config)
});

/// The process-wide harness behind [`render`] and [`cleanup`].
pub fn default_harness() -> &'static Harness {
    &DEFAULT_HARNESS
}

pub async fn render<I, S>(
    command: &str,
    args: I,
    options: RenderOptions,
) -> Result<RenderResult, RenderError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    DEFAULT_HARNESS.render(command, args, options).await
}

pub async fn cleanup() -> Result<(), CleanupError> {
    DEFAULT_HARNESS.cleanup().await
}

pub fn configure(update: impl FnOnce(&mut Config)) {
    DEFAULT_HARNESS.configure(update)
}

pub fn get_config() -> Config {
    DEFAULT_HARNESS.config()
}
