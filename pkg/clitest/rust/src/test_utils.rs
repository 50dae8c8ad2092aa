// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! In-memory processes for exercising the engine without spawning anything.

use crate::instance::{DriverOptions, Instance, ProcessIo, start};
use crate::observer::Observers;
use crate::spawner::{ProcessSpawner, SpawnRequest, SpawnedProcess, Terminate};
use nix::sys::signal::Signal;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf, duplex};
use tokio::sync::oneshot;
use tokio::time::Duration;

const PIPE_CAPACITY: usize = 64 * 1024;

type ExitSender = Arc<Mutex<Option<oneshot::Sender<Option<i32>>>>>;

struct FakeTerminator {
    signals: Arc<Mutex<Vec<Signal>>>,
    exit: ExitSender,
    exits_on_kill: bool,
}

impl Terminate for FakeTerminator {
    fn signal(&self, signal: Signal) -> nix::Result<()> {
        self.signals.lock().unwrap().push(signal);
        if self.exits_on_kill
            && signal == Signal::SIGKILL
            && let Some(tx) = self.exit.lock().unwrap().take()
        {
            let _ = tx.send(None);
        }
        Ok(())
    }
}

/// The test's side of a fake process.
pub struct FakeControls {
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    pub stdin: DuplexStream,
    exit: ExitSender,
    signals: Arc<Mutex<Vec<Signal>>>,
}

impl FakeControls {
    pub async fn write_stdout(&mut self, data: &str) {
        let pipe = self.stdout.as_mut().expect("stdout already closed");
        pipe.write_all(data.as_bytes()).await.unwrap();
    }

    pub async fn write_stdout_bytes(&mut self, data: &[u8]) {
        let pipe = self.stdout.as_mut().expect("stdout already closed");
        pipe.write_all(data).await.unwrap();
    }

    pub async fn write_stderr(&mut self, data: &str) {
        let pipe = self.stderr.as_mut().expect("stderr already closed");
        pipe.write_all(data.as_bytes()).await.unwrap();
    }

    pub fn close_streams(&mut self) {
        self.stdout = None;
        self.stderr = None;
    }

    pub fn exit(&mut self, code: Option<i32>) {
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(code);
        }
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }
}

fn build(pid: u32, exits_on_kill: bool) -> (SpawnedProcess, FakeControls) {
    let (stdout_w, stdout_r) = duplex(PIPE_CAPACITY);
    let (stderr_w, stderr_r) = duplex(PIPE_CAPACITY);
    let (stdin_w, stdin_r) = duplex(PIPE_CAPACITY);
    let (exit_tx, exit_rx) = oneshot::channel();
    let exit = Arc::new(Mutex::new(Some(exit_tx)));
    let signals = Arc::new(Mutex::new(Vec::new()));

    let proc = SpawnedProcess {
        pid: Some(pid),
        stdin: Some(Box::new(stdin_w)),
        stdout: Box::new(stdout_r),
        stderr: Box::new(stderr_r),
        exit: Box::pin(async move {
            exit_rx
                .await
                .map_err(|_| io::Error::other("fake process dropped"))
        }),
        terminator: Arc::new(FakeTerminator {
            signals: Arc::clone(&signals),
            exit: Arc::clone(&exit),
            exits_on_kill,
        }),
    };
    let controls = FakeControls {
        stdout: Some(stdout_w),
        stderr: Some(stderr_w),
        stdin: stdin_r,
        exit,
        signals,
    };
    (proc, controls)
}

/// A fake process that exits (without a code) on `SIGKILL`.
pub fn fake_process(pid: u32) -> (SpawnedProcess, FakeControls) {
    build(pid, true)
}

fn spawn_driver(proc: SpawnedProcess) -> Instance {
    let io = ProcessIo {
        stdout: proc.stdout,
        stderr: proc.stderr,
        exit: proc.exit,
    };
    let (instance, driver) = start(
        proc.pid,
        "fake".to_string(),
        proc.terminator,
        io,
        DriverOptions {
            error_debounce_timeout: Duration::from_millis(100),
            debug: false,
            observers: Observers::default(),
        },
    );
    tokio::spawn(driver);
    instance
}

/// A tracked instance backed by a fake process. Requires a tokio runtime.
pub fn fake_instance(pid: u32) -> (Instance, FakeControls) {
    let (proc, controls) = fake_process(pid);
    (spawn_driver(proc), controls)
}

/// Like [`fake_instance`], but the process ignores every signal.
pub fn stubborn_instance(pid: u32) -> (Instance, FakeControls) {
    let (proc, controls) = build(pid, false);
    (spawn_driver(proc), controls)
}

/// A stdout pipe whose every read fails.
struct BrokenPipe(&'static str);

impl AsyncRead for BrokenPipe {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other(self.0)))
    }
}

/// Like [`fake_process`], but reading stdout fails with `message`.
pub fn broken_stdout_process(pid: u32, message: &'static str) -> (SpawnedProcess, FakeControls) {
    let (mut proc, controls) = build(pid, true);
    proc.stdout = Box::new(BrokenPipe(message));
    (proc, controls)
}

/// Hands out prepared fake processes in order.
#[derive(Default)]
pub struct FakeSpawner {
    queue: Mutex<VecDeque<SpawnedProcess>>,
    requests: Mutex<Vec<SpawnRequest>>,
}

impl FakeSpawner {
    pub fn push(&self, proc: SpawnedProcess) {
        self.queue.lock().unwrap().push_back(proc);
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedProcess> {
        self.requests.lock().unwrap().push(request.clone());
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no fake process queued"))
    }
}
