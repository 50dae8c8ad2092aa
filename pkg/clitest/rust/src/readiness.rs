// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Readiness: whether a freshly spawned process can be interacted with.
//!
//! The first clean chunk on stdout makes a process ready. Error output seen
//! before that (stderr data or a stdout read error) poisons the race: later
//! stdout is kept as error context and the instance fails once the
//! [`ErrorAggregator`] settles. Both outcomes are terminal.

use crate::debounce::ErrorAggregator;
use crate::output::strip_final_newline;
use std::fmt;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Aggregated error output, fragments joined by newline.
    Errored(String),
    /// The process exited and closed its streams without writing anything.
    ExitedSilently { exit_code: i32 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Errored(text) => write!(f, "{text}"),
            FailureReason::ExitedSilently { exit_code } => {
                write!(f, "exited with code {exit_code} without producing output")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Readiness {
    /// No decision yet.
    #[default]
    Pending,
    /// Clean stdout arrived before any error.
    Ready,
    /// Error output settled, or the process went away silently.
    Failed(FailureReason),
}

impl Readiness {
    pub fn is_pending(&self) -> bool {
        matches!(self, Readiness::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Readiness::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Pending => write!(f, "pending"),
            Readiness::Ready => write!(f, "ready"),
            Readiness::Failed(_) => write!(f, "failed"),
        }
    }
}

/// Transition table for one instance.
///
/// Every handler returns the new state when it caused the single terminal
/// transition, and `None` otherwise.
#[derive(Debug)]
pub struct ReadinessMachine {
    state: Readiness,
    error_has_occurred: bool,
    errors: ErrorAggregator,
}

impl ReadinessMachine {
    pub fn new(error_debounce_timeout: Duration) -> Self {
        Self {
            state: Readiness::Pending,
            error_has_occurred: false,
            errors: ErrorAggregator::new(error_debounce_timeout),
        }
    }

    pub fn state(&self) -> &Readiness {
        &self.state
    }

    /// Sticky: never resets once an error fragment was recorded.
    pub fn error_has_occurred(&self) -> bool {
        self.error_has_occurred
    }

    pub fn pending_errors(&self) -> &[String] {
        self.errors.fragments()
    }

    /// When the debounce timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.errors.deadline()
    }

    pub fn on_stdout(&mut self, chunk: &str) -> Option<Readiness> {
        if !self.state.is_pending() {
            return None;
        }
        if self.error_has_occurred {
            // stdout after an error is context for the failure, not a prompt
            self.errors.push_context(strip_final_newline(chunk));
            return None;
        }
        self.resolve(Readiness::Ready)
    }

    /// stderr data or a stdout stream error.
    ///
    /// Once terminal, error output is no longer recorded.
    pub fn on_error(&mut self, fragment: &str, now: Instant) {
        if !self.state.is_pending() {
            return;
        }
        self.error_has_occurred = true;
        self.errors.record(strip_final_newline(fragment), now);
    }

    pub fn on_timer(&mut self, now: Instant) -> Option<Readiness> {
        let reason = self.errors.poll(now)?;
        if !self.state.is_pending() {
            return None;
        }
        self.resolve(Readiness::Failed(FailureReason::Errored(reason)))
    }

    /// The process exited and both output streams closed.
    ///
    /// Pending error output still settles through the debounce timer; only a
    /// process that said nothing at all fails here.
    pub fn on_silent_exit(&mut self, exit_code: i32) -> Option<Readiness> {
        if !self.state.is_pending() || self.errors.is_armed() {
            return None;
        }
        self.resolve(Readiness::Failed(FailureReason::ExitedSilently {
            exit_code,
        }))
    }

    fn resolve(&mut self, next: Readiness) -> Option<Readiness> {
        assert!(
            self.state.is_pending(),
            "readiness resolved twice ({} -> {next})",
            self.state
        );
        debug_assert!(next.is_terminal());
        self.errors.cancel();
        self.state = next.clone();
        Some(next)
    }
}

/// Create a one-shot readiness signal.
pub fn ready_signal() -> (ReadySignal, ReadyWaiter) {
    let (tx, rx) = watch::channel(Readiness::Pending);
    (ReadySignal { tx }, ReadyWaiter { rx })
}

/// Publishing half of the readiness signal. Resolves at most once.
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<Readiness>,
}

impl ReadySignal {
    pub fn resolve(&self, state: Readiness) {
        assert!(state.is_terminal(), "cannot resolve readiness to pending");
        let previous = self.tx.send_replace(state);
        assert!(
            previous.is_pending(),
            "readiness signal already resolved as {previous}"
        );
    }
}

#[derive(Debug, Clone)]
pub struct ReadyWaiter {
    rx: watch::Receiver<Readiness>,
}

impl ReadyWaiter {
    pub fn current(&self) -> Readiness {
        self.rx.borrow().clone()
    }

    /// Wait for the terminal state.
    ///
    /// Returns `None` if the publishing side went away while still pending.
    pub async fn wait(&mut self) -> Option<Readiness> {
        self.rx
            .wait_for(Readiness::is_terminal)
            .await
            .ok()
            .map(|state| state.clone())
    }
}
