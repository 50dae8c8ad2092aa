// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::observer::Observers;
use crate::output::{ChunkDecoder, OutputBuffer};
use crate::readiness::{Readiness, ReadinessMachine, ReadySignal, ReadyWaiter, ready_signal};
use crate::spawner::{BoxedReader, ExitHandle, Terminate};
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{Duration, Instant, sleep_until};
use uuid::Uuid;

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub exit_code: i32,
}

struct Shared {
    id: InstanceId,
    pid: Option<u32>,
    command: String,
    output: Mutex<OutputBuffer>,
    readiness: ReadyWaiter,
    exit_code: watch::Receiver<Option<i32>>,
    terminator: Arc<dyn Terminate>,
}

/// One spawned process and everything the engine tracks about it.
///
/// Cheap to clone; clones share the same output buffer and state.
#[derive(Clone)]
pub struct Instance {
    shared: Arc<Shared>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.shared.id)
            .field("pid", &self.shared.pid)
            .field("command", &self.shared.command)
            .field("readiness", &self.readiness())
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

impl Instance {
    pub fn id(&self) -> InstanceId {
        self.shared.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.pid
    }

    pub fn command(&self) -> &str {
        &self.shared.command
    }

    /// Buffered stdout, chunks joined by newline.
    pub fn text(&self) -> String {
        self.output().text()
    }

    pub fn chunks(&self) -> Vec<String> {
        self.output().chunks().to_vec()
    }

    /// Forget everything buffered so far. Readiness and exit code are untouched.
    pub fn clear(&self) {
        self.output().clear();
    }

    pub fn readiness(&self) -> Readiness {
        self.shared.readiness.current()
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.shared.exit_code.borrow()
    }

    pub fn has_exit(&self) -> Option<ExitInfo> {
        self.exit_code().map(|exit_code| ExitInfo { exit_code })
    }

    /// Send `sig` to the process.
    ///
    /// A process whose exit was already recorded is reported as `ESRCH`
    /// without signalling its pid, which may have been reused.
    pub fn send_signal(&self, sig: Signal) -> nix::Result<()> {
        if self.exit_code().is_some() {
            return Err(nix::Error::ESRCH);
        }
        debug!("[{}] sending {sig}", self.shared.id);
        self.shared.terminator.signal(sig)
    }

    pub fn kill(&self) -> nix::Result<()> {
        self.send_signal(Signal::SIGKILL)
    }

    /// Wait until the process exit is recorded.
    ///
    /// Returns `None` if tracking stopped without observing an exit.
    pub async fn wait_for_exit(&self) -> Option<ExitInfo> {
        let mut rx = self.shared.exit_code.clone();
        let code = rx.wait_for(Option::is_some).await.ok().and_then(|c| *c);
        code.map(|exit_code| ExitInfo { exit_code })
    }

    pub(crate) fn readiness_waiter(&self) -> ReadyWaiter {
        self.shared.readiness.clone()
    }

    fn output(&self) -> MutexGuard<'_, OutputBuffer> {
        self.shared
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stream and exit sources the driver consumes.
pub(crate) struct ProcessIo {
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
    pub exit: ExitHandle,
}

pub(crate) struct DriverOptions {
    pub error_debounce_timeout: Duration,
    pub debug: bool,
    pub observers: Observers,
}

/// Create an instance and the driver future that keeps it up to date.
///
/// The driver must be polled for the instance to make progress.
pub(crate) fn start(
    pid: Option<u32>,
    command: String,
    terminator: Arc<dyn Terminate>,
    io: ProcessIo,
    options: DriverOptions,
) -> (Instance, impl std::future::Future<Output = ()> + Send + 'static) {
    let (signal, waiter) = ready_signal();
    let (exit_tx, exit_rx) = watch::channel(None);
    let instance = Instance {
        shared: Arc::new(Shared {
            id: InstanceId::new(),
            pid,
            command,
            output: Mutex::new(OutputBuffer::new()),
            readiness: waiter,
            exit_code: exit_rx,
            terminator,
        }),
    };

    let driver = Driver {
        instance: instance.clone(),
        machine: ReadinessMachine::new(options.error_debounce_timeout),
        signal,
        exit_tx,
        observers: options.observers,
        debug: options.debug,
    };
    (instance, driver.run(io))
}

struct Driver {
    instance: Instance,
    machine: ReadinessMachine,
    signal: ReadySignal,
    exit_tx: watch::Sender<Option<i32>>,
    observers: Observers,
    debug: bool,
}

impl Driver {
    async fn run(mut self, io: ProcessIo) {
        let ProcessIo {
            mut stdout,
            mut stderr,
            mut exit,
        } = io;
        let mut stdout_buf = vec![0u8; READ_CHUNK];
        let mut stderr_buf = vec![0u8; READ_CHUNK];
        let mut stdout_text = ChunkDecoder::new();
        let mut stderr_text = ChunkDecoder::new();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut exited = false;

        loop {
            let deadline = self.machine.deadline();
            tokio::select! {
                res = stdout.read(&mut stdout_buf), if stdout_open => match res {
                    Ok(0) => {
                        stdout_open = false;
                        if let Some(chunk) = stdout_text.finish() {
                            self.on_stdout(chunk).await;
                        }
                    }
                    Ok(n) => {
                        if let Some(chunk) = stdout_text.push(&stdout_buf[..n]) {
                            self.on_stdout(chunk).await;
                        }
                    }
                    Err(e) => {
                        stdout_open = false;
                        if let Some(chunk) = stdout_text.finish() {
                            self.on_stdout(chunk).await;
                        }
                        self.on_error(&e.to_string());
                    }
                },
                res = stderr.read(&mut stderr_buf), if stderr_open => match res {
                    Ok(0) => {
                        stderr_open = false;
                        if let Some(chunk) = stderr_text.finish() {
                            self.on_error(&chunk);
                        }
                    }
                    Ok(n) => {
                        if let Some(chunk) = stderr_text.push(&stderr_buf[..n]) {
                            self.on_error(&chunk);
                        }
                    }
                    Err(e) => {
                        stderr_open = false;
                        debug!("[{}] stderr closed: {e}", self.instance.id());
                    }
                },
                status = &mut exit, if !exited => {
                    exited = true;
                    self.on_exit(status);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(next) = self.machine.on_timer(Instant::now()) {
                        self.publish(next);
                    }
                }
            }

            if exited && !stdout_open && !stderr_open {
                let exit_code = self.instance.exit_code().unwrap_or(0);
                if let Some(next) = self.machine.on_silent_exit(exit_code) {
                    self.publish(next);
                }
                if self.machine.deadline().is_none() {
                    break;
                }
            }
        }
        debug!("[{}] stopped tracking", self.instance.id());
    }

    async fn on_stdout(&mut self, chunk: String) {
        if self.debug {
            self.mirror(&chunk).await;
        }
        self.instance.output().append(&chunk);
        self.observers.notify();
        if let Some(next) = self.machine.on_stdout(&chunk) {
            self.publish(next);
        }
    }

    async fn mirror(&self, chunk: &str) {
        let mut host = tokio::io::stdout();
        let written = match host.write_all(chunk.as_bytes()).await {
            Ok(()) => host.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            debug!("[{}] failed to mirror output: {e}", self.instance.id());
        }
    }

    fn on_error(&mut self, fragment: &str) {
        debug!("[{}] error output: {fragment:?}", self.instance.id());
        self.machine.on_error(fragment, Instant::now());
    }

    fn on_exit(&mut self, status: std::io::Result<Option<i32>>) {
        let code = match status {
            Ok(code) => code.unwrap_or(0),
            Err(e) => {
                warn!("[{}] failed to wait for exit: {e}", self.instance.id());
                return;
            }
        };
        info!("[{}] exited with code {code}", self.instance.id());
        self.exit_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(code);
            true
        });
    }

    fn publish(&self, next: Readiness) {
        match &next {
            Readiness::Ready => info!(
                "[{}] ready (pid={})",
                self.instance.id(),
                self.instance.pid().unwrap_or(0)
            ),
            Readiness::Failed(reason) => warn!(
                "[{}] failed before becoming ready: {reason}",
                self.instance.id()
            ),
            Readiness::Pending => {}
        }
        self.signal.resolve(next);
    }
}
