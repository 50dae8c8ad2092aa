// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Callbacks run after every chunk appended to an output buffer.
///
/// Clones share the same set of callbacks.
#[derive(Clone, Default)]
pub struct Observers {
    next_id: Arc<AtomicU64>,
    callbacks: Arc<Mutex<Vec<(ObserverId, Callback)>>>,
}

impl Observers {
    pub fn add(&self, callback: impl Fn() + Send + Sync + 'static) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        let mut callbacks = self.lock();
        let before = callbacks.len();
        callbacks.retain(|(other, _)| *other != id);
        callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn notify(&self) {
        // Snapshot so a callback may add or remove observers.
        let callbacks: Vec<Callback> = self
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ObserverId, Callback)>> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
