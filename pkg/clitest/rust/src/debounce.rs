// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Debounced aggregation of error output.
//!
//! Processes often write a single failure (a stack trace, a usage message)
//! across many small writes. `ErrorAggregator` collects the fragments and only
//! settles once no new fragment has been recorded for a full quiet window, so
//! a burst produces one failure instead of one per write.
//!
//! The aggregator owns its timer as a plain deadline. It never sleeps itself:
//! the caller passes the current time in and waits on [`ErrorAggregator::deadline`].

use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct ErrorAggregator {
    window: Duration,
    fragments: Vec<String>,
    deadline: Option<Instant>,
}

impl ErrorAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            fragments: Vec::new(),
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Append an error fragment and restart the quiet window.
    pub fn record(&mut self, fragment: impl Into<String>, now: Instant) {
        self.fragments.push(fragment.into());
        self.deadline = Some(now + self.window);
    }

    /// Append a fragment without touching the timer.
    pub fn push_context(&mut self, fragment: impl Into<String>) {
        self.fragments.push(fragment.into());
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn has_fragments(&self) -> bool {
        !self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Settle if the quiet window has elapsed.
    ///
    /// Returns the fragments joined by newline and disarms the timer. Returns
    /// `None` while the timer is unarmed or the deadline is still ahead.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(self.fragments.join("\n"))
            }
            _ => None,
        }
    }
}
