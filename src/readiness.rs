use crate::common::*;
use crate::config::Timings;
use crate::platform::*;
use crate::status::{ConditionType, StatusUpdater};
use crate::waiter::check_workload;
use tokio::time::{sleep, Instant};
use tracing::*;

/// A component whose resources were applied but whose workload is not yet confirmed ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingComponent {
    pub name: &'static str,
    pub kind: ResourceKind,
    pub status_reason: &'static str,
}

impl PendingComponent {
    pub fn daemon_set(name: &'static str, status_reason: &'static str) -> Self {
        PendingComponent {
            name,
            kind: ResourceKind::DaemonSet,
            status_reason,
        }
    }

    pub fn deployment(name: &'static str, status_reason: &'static str) -> Self {
        PendingComponent {
            name,
            kind: ResourceKind::Deployment,
            status_reason,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PendingSet {
    items: Vec<PendingComponent>,
}

impl PendingSet {
    pub fn push(&mut self, component: PendingComponent) {
        if !self.items.iter().any(|c| c.name == component.name) {
            self.items.push(component);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|c| c.name).collect()
    }
}

/// Waits for every pending workload to become ready. Components still pending
/// when the timeout elapses are marked failed and the result is `false`. A
/// workload that is missing or cannot be read counts as not ready.
pub async fn drain(
    platform: &dyn Platform,
    status: &mut StatusUpdater,
    pending: &mut PendingSet,
    timings: &Timings,
) -> bool {
    status
        .start(COMPONENT_PENDING_STATUS, "Start reconcile of ComponentsPending").await;
    info!("Waiting for component statuses");
    let mut all_ready = true;
    if !pending.is_empty() {
        sleep(timings.initial_delay).await;
        let started = Instant::now();
        loop {
            if started.elapsed() >= timings.pending_timeout {
                warn!(pending = ?pending.names(), "Timeout waiting for component statuses");
                all_ready = false;
                for component in &pending.items {
                    error!(component = component.name, "Deploy of the component failed");
                    status
                        .update(
                            component.status_reason,
                            ConditionType::Failed,
                            false,
                            &format!("Reason: {} is not started", component.name),
                        ).await;
                }
                break;
            }

            let mut still_pending = Vec::new();
            for component in pending.items.drain(..) {
                match check_workload(platform, component.kind, component.name).await {
                    Ok(true) => {
                        info!(component = component.name, "Component is started");
                        status.remove(component.status_reason).await;
                    }
                    Ok(false) => still_pending.push(component),
                    Err(e) => {
                        warn!(component = component.name, error = %e, "Failed to check component");
                        still_pending.push(component);
                    }
                }
            }
            pending.items = still_pending;
            if pending.is_empty() {
                break;
            }
            debug!(
                elapsed = ?started.elapsed(),
                pending = ?pending.names(),
                "Components not started yet"
            );
            sleep(timings.interval).await;
        }
    }
    info!("Components reconciled");
    status.remove(COMPONENT_PENDING_STATUS).await;
    all_ready
}
