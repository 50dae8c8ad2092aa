// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process spawner port and its tokio implementation.

use log::debug;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Resolves with the exit code once the process terminates. `None` means the
/// process reported no code (killed by a signal).
pub type ExitHandle = Pin<Box<dyn Future<Output = io::Result<Option<i32>>> + Send>>;

/// Pass-through spawn configuration.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub env: HashMap<String, String>,
    /// Start from an empty environment instead of inheriting the host's.
    pub env_clear: bool,
    /// Run `command args...` through `sh -c`.
    pub shell: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            env_clear: false,
            shell: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub options: SpawnOptions,
}

impl SpawnRequest {
    /// Command line as the shell sees it.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Capability to signal a spawned process.
pub trait Terminate: Send + Sync {
    fn signal(&self, signal: Signal) -> nix::Result<()>;
}

/// A live process as handed to the engine.
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub stdin: Option<BoxedWriter>,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
    pub exit: ExitHandle,
    pub terminator: Arc<dyn Terminate>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .field("stdin", &self.stdin.is_some())
            .finish()
    }
}

pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedProcess>;
}

/// Signals a process by pid, or the whole process group it leads.
#[derive(Debug, Clone, Copy)]
pub struct PidTerminator {
    pid: u32,
    group: bool,
}

impl PidTerminator {
    pub fn new(pid: u32) -> Self {
        Self { pid, group: false }
    }

    /// Signal every process in the group led by `pid`.
    pub fn group(pid: u32) -> Self {
        Self { pid, group: true }
    }
}

impl Terminate for PidTerminator {
    fn signal(&self, sig: Signal) -> nix::Result<()> {
        let raw = i32::try_from(self.pid).map_err(|_| nix::Error::EINVAL)?;
        if self.group {
            signal::killpg(Pid::from_raw(raw), sig)
        } else {
            signal::kill(Pid::from_raw(raw), sig)
        }
    }
}

/// Terminator for a process that never got a pid.
struct Unsignalable;

impl Terminate for Unsignalable {
    fn signal(&self, _signal: Signal) -> nix::Result<()> {
        Err(nix::Error::ESRCH)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl TokioSpawner {
    fn command(request: &SpawnRequest) -> Command {
        let mut cmd = if request.options.shell {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(request.command_line());
            cmd
        } else {
            let mut cmd = Command::new(&request.command);
            cmd.args(&request.args);
            cmd
        };

        if request.options.env_clear {
            cmd.env_clear();
        }
        for (k, v) in &request.options.env {
            cmd.env(k, v);
        }

        // Own process group, so signals also reach whatever the shell started.
        cmd.current_dir(&request.cwd)
            .process_group(0)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedProcess> {
        let mut child = Self::command(request).spawn()?;

        let pid = child.id();
        let stdin = child.stdin.take().map(|s| Box::new(s) as BoxedWriter);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr was not captured"))?;

        let terminator: Arc<dyn Terminate> = match pid {
            Some(pid) => Arc::new(PidTerminator::group(pid)),
            None => Arc::new(Unsignalable),
        };
        debug!(
            "spawned `{}` (pid={}, cwd={})",
            request.command_line(),
            pid.unwrap_or(0),
            request.cwd.display()
        );

        Ok(SpawnedProcess {
            pid,
            stdin,
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit: Box::pin(async move { child.wait().await.map(|status| status.code()) }),
            terminator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::time::Duration;

    fn request(command: &str, args: &[&str]) -> SpawnRequest {
        SpawnRequest {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: std::env::temp_dir(),
            options: SpawnOptions::default(),
        }
    }

    #[test]
    fn test_command_line() {
        assert_eq!(request("ls", &[]).command_line(), "ls");
        assert_eq!(request("echo", &["a", "b"]).command_line(), "echo a b");
    }

    #[tokio::test]
    async fn test_spawn_through_shell() {
        let proc = TokioSpawner
            .spawn(&request("echo", &["hello", "&&", "exit 3"]))
            .unwrap();
        assert!(proc.pid.is_some());

        let mut stdout = proc.stdout;
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello\n");
        assert_eq!(proc.exit.await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_spawn_without_shell() {
        let mut req = request("/bin/sh", &["-c", "echo $0"]);
        req.options.shell = false;
        let proc = TokioSpawner.spawn(&req).unwrap();

        let mut stdout = proc.stdout;
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "/bin/sh\n");
    }

    #[tokio::test]
    async fn test_spawn_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request("echo", &["$MY_VAR", "&&", "pwd"]);
        req.cwd = dir.path().to_path_buf();
        req.options.env.insert("MY_VAR".to_string(), "42".to_string());
        let proc = TokioSpawner.spawn(&req).unwrap();

        let mut stdout = proc.stdout;
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(out, format!("42\n{}\n", canonical.display()));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_without_shell() {
        let mut req = request("/nonexistent/binary", &[]);
        req.options.shell = false;
        assert!(TokioSpawner.spawn(&req).is_err());
    }

    #[tokio::test]
    async fn test_pid_terminator_kills() {
        let proc = TokioSpawner.spawn(&request("sleep", &["60"])).unwrap();
        proc.terminator.signal(Signal::SIGKILL).unwrap();
        assert_eq!(proc.exit.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_kill_reaches_shell_children() {
        // Without `exec`, `sleep` is a child of `sh` and holds stdout open.
        let proc = TokioSpawner
            .spawn(&request("sleep", &["60;", "echo", "unreachable"]))
            .unwrap();
        proc.terminator.signal(Signal::SIGKILL).unwrap();

        let mut stdout = proc.stdout;
        let mut out = String::new();
        tokio::time::timeout(Duration::from_secs(5), stdout.read_to_string(&mut out))
            .await
            .expect("stdout should close once the whole group is killed")
            .unwrap();
        assert_eq!(out, "");
        assert_eq!(proc.exit.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pid_terminator_single_process() {
        let mut req = request("sleep", &["60"]);
        req.options.shell = false;
        let proc = TokioSpawner.spawn(&req).unwrap();
        let pid = proc.pid.unwrap();

        PidTerminator::new(pid).signal(Signal::SIGKILL).unwrap();
        assert_eq!(proc.exit.await.unwrap(), None);
    }
}
