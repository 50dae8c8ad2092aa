// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Text queries over an instance's buffered output.

use crate::errors::QueryError;
use crate::instance::Instance;
use crate::observer::Observers;
use log::debug;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Duration, timeout};

/// Query capabilities bound onto every rendered instance.
pub trait Queries: Send + Sync {
    /// Every match for `needle`, in output order.
    fn query_all_by_text(&self, instance: &Instance, needle: &str) -> Vec<String>;

    fn query_by_text(&self, instance: &Instance, needle: &str) -> Option<String> {
        self.query_all_by_text(instance, needle).into_iter().next()
    }
}

/// Matches whole lines of buffered output that contain the needle.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineQueries;

impl Queries for LineQueries {
    fn query_all_by_text(&self, instance: &Instance, needle: &str) -> Vec<String> {
        instance
            .text()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

/// Wait until `queries` finds `needle` in the output of `instance`.
///
/// Re-checks whenever `observers` report new output, so it must be the set
/// the instance's driver notifies.
pub async fn find_by_text(
    queries: &dyn Queries,
    instance: &Instance,
    observers: &Observers,
    needle: &str,
    limit: Duration,
) -> Result<String, QueryError> {
    let changed = Arc::new(Notify::new());
    let wake = Arc::clone(&changed);
    let observer = observers.add(move || wake.notify_one());

    let found = timeout(limit, async {
        loop {
            if let Some(hit) = queries.query_by_text(instance, needle) {
                return hit;
            }
            changed.notified().await;
        }
    })
    .await;
    observers.remove(observer);

    found.map_err(|_| {
        debug!("[{}] gave up waiting for {needle:?}", instance.id());
        QueryError::NotFound {
            id: instance.id(),
            needle: needle.to_string(),
            timeout: limit,
            text: instance.text(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fake_instance;

    #[tokio::test(start_paused = true)]
    async fn test_line_queries_match_whole_lines() {
        let (instance, mut controls) = fake_instance(1);
        controls.write_stdout("Name: app\nPort: 80\n").await;
        instance.readiness_waiter().wait().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        controls.write_stdout("Port: 81").await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            LineQueries.query_all_by_text(&instance, "Port"),
            vec!["Port: 80", "Port: 81"]
        );
        assert_eq!(
            LineQueries.query_by_text(&instance, "Name").as_deref(),
            Some("Name: app")
        );
        assert_eq!(LineQueries.query_by_text(&instance, "missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_by_text_returns_existing_match() {
        let (instance, mut controls) = fake_instance(2);
        controls.write_stdout("ready>").await;
        instance.readiness_waiter().wait().await;

        let observers = Observers::default();
        let hit = find_by_text(
            &LineQueries,
            &instance,
            &observers,
            "ready",
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(hit, "ready>");
        assert!(observers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_by_text_times_out_with_buffered_output() {
        let (instance, mut controls) = fake_instance(3);
        controls.write_stdout("still working").await;
        instance.readiness_waiter().wait().await;

        let observers = Observers::default();
        let started = tokio::time::Instant::now();
        let err = find_by_text(
            &LineQueries,
            &instance,
            &observers,
            "done",
            Duration::from_millis(250),
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(250));
        let QueryError::NotFound { needle, text, .. } = err;
        assert_eq!(needle, "done");
        assert_eq!(text, "still working");
        assert!(observers.is_empty());
    }
}
