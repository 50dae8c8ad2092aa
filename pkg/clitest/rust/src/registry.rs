// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{CleanupError, TerminationError};
use crate::instance::{Instance, InstanceId};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tokio::time::{Duration, timeout};

pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Every instance created by a harness and not yet cleaned up.
///
/// Instances are inserted when created and removed only by cleanup.
#[derive(Debug, Default)]
pub struct Registry {
    instances: Mutex<HashMap<InstanceId, Instance>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, instance: Instance) {
        let previous = self.lock().insert(instance.id(), instance);
        debug_assert!(previous.is_none(), "instance registered twice");
    }

    pub(crate) fn remove(&self, id: InstanceId) -> Option<Instance> {
        self.lock().remove(&id)
    }

    pub fn get(&self, id: InstanceId) -> Option<Instance> {
        self.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InstanceId, Instance>> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Interaction with a running instance on behalf of the harness.
#[async_trait]
pub trait Interaction: Send + Sync {
    /// Forcefully terminate `instance` and wait until it is gone.
    async fn sigkill(&self, instance: &Instance) -> Result<(), TerminationError>;
}

/// Terminates instances with `SIGKILL` and waits for their exit.
///
/// An instance whose exit is already recorded is not signalled again, since
/// its pid may belong to another process by now.
#[derive(Debug, Clone, Copy)]
pub struct SignalInteraction {
    kill_timeout: Duration,
}

impl SignalInteraction {
    pub fn new(kill_timeout: Duration) -> Self {
        Self { kill_timeout }
    }
}

impl Default for SignalInteraction {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_TIMEOUT)
    }
}

#[async_trait]
impl Interaction for SignalInteraction {
    async fn sigkill(&self, instance: &Instance) -> Result<(), TerminationError> {
        if instance.has_exit().is_some() {
            debug!("[{}] already exited", instance.id());
            return Ok(());
        }
        let pid = instance.pid().unwrap_or(0);
        match instance.kill() {
            Ok(()) | Err(nix::Error::ESRCH) => {}
            Err(source) => return Err(TerminationError::Signal { pid, source }),
        }
        if timeout(self.kill_timeout, instance.wait_for_exit())
            .await
            .is_err()
        {
            return Err(TerminationError::Timeout {
                pid,
                timeout: self.kill_timeout,
            });
        }
        Ok(())
    }
}

/// Terminate every registered instance concurrently and forget it.
///
/// Each instance is handled independently: it is removed from the registry
/// once its termination has been attempted, whether or not that succeeded.
/// Failures are collected and reported together.
pub async fn cleanup(
    registry: &Registry,
    interaction: Arc<dyn Interaction>,
) -> Result<(), CleanupError> {
    let instances = registry.instances();
    if instances.is_empty() {
        return Ok(());
    }
    info!("cleaning up {} instance(s)", instances.len());
    let ids: Vec<InstanceId> = instances.iter().map(Instance::id).collect();

    let mut tasks = JoinSet::new();
    for instance in instances {
        let interaction = Arc::clone(&interaction);
        let id = instance.id();
        tasks.spawn(async move { (id, interaction.sigkill(&instance).await) });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (id, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                // Panicked tasks lose their id; the sweep below removes them.
                warn!("cleanup task failed: {e}");
                continue;
            }
        };
        if let Err(e) = result {
            warn!("[{id}] failed to terminate: {e}");
            failures.push((id, e));
        }
        if registry.remove(id).is_none() {
            debug!("[{id}] already removed by a concurrent cleanup");
        }
    }

    for id in ids {
        registry.remove(id);
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(CleanupError { failures })
    }
}
