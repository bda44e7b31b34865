use crate::common::*;
use crate::components::{converge, Cycle};
use crate::config::{OperatorConfig, Timings};
use crate::error::Error;
use crate::graylog::ConnectorFactory;
use crate::loggingservice_types::*;
use crate::manifests::ContainerRuntime;
use crate::platform::*;
use crate::readiness::{self, PendingSet};
use crate::secret_watcher::SecretWatchers;
use crate::status::{ConditionType, StatusUpdater};
use crate::waiter::HostProbe;
use futures::Stream;
use kube::{
    api::Api,
    runtime::{controller::Action, predicates, watcher, WatchStreamExt},
    Client,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Duration;
use tracing::*;

/// Binary exponential backoff per `LoggingService`, reset by the first success.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Backoff {
            initial,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        match self.failures.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records a failure and returns `initial * 2^(n-1)` for the n-th consecutive one.
    pub fn failure(&self, key: &str) -> Duration {
        let mut failures = self.failures();
        let count = failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        let factor = 2u32.checked_pow(*count - 1).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor)
    }

    pub fn reset(&self, key: &str) {
        self.failures().remove(key);
    }
}

fn runtime_prefix(version: &str) -> Option<&str> {
    version
        .split_once("://")
        .map(|(prefix, _)| prefix.trim())
        .filter(|prefix| !prefix.is_empty())
}

/// Asks the nodes which container runtime they run. `None` unless they all agree.
pub async fn discover_runtime(platform: &dyn Platform) -> Option<ContainerRuntime> {
    let nodes = match platform.list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!(error = %e, "Failed to list nodes");
            return None;
        }
    };
    let runtimes: BTreeSet<String> = nodes
        .iter()
        .filter_map(|n| n.status.as_ref()?.node_info.as_ref())
        .filter_map(|info| runtime_prefix(&info.container_runtime_version))
        .map(str::to_string)
        .collect();
    if runtimes.len() > 1 {
        warn!(?runtimes, "Nodes run different container runtimes");
    }
    match runtimes.into_iter().collect::<Vec<_>>().as_slice() {
        [single] => Some(ContainerRuntime::from_name(single)),
        _ => None,
    }
}

/// State shared by every reconcile.
pub struct Operator {
    pub config: OperatorConfig,
    pub timings: Timings,
    pub watchers: SecretWatchers,
    pub factory: Box<dyn ConnectorFactory>,
    pub probe: Box<dyn HostProbe>,
    pub backoff: Backoff,
    runtime: Mutex<Option<ContainerRuntime>>,
}

impl Operator {
    pub fn new(
        config: OperatorConfig,
        timings: Timings,
        factory: Box<dyn ConnectorFactory>,
        probe: Box<dyn HostProbe>,
    ) -> Self {
        Operator {
            backoff: Backoff::new(config.initial_backoff),
            config,
            timings,
            watchers: SecretWatchers::default(),
            factory,
            probe,
            runtime: Mutex::new(None),
        }
    }

    fn cached_runtime(&self) -> MutexGuard<'_, Option<ContainerRuntime>> {
        match self.runtime.lock() {
            Ok(runtime) => runtime,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The configured runtime wins; otherwise the nodes are asked once and
    /// the answer is kept for later cycles.
    pub async fn runtime(&self, platform: &dyn Platform, spec: &LoggingServiceSpec) -> ContainerRuntime {
        if let Some(configured) = spec.container_runtime_type.as_deref().filter(|r| !r.trim().is_empty()) {
            return ContainerRuntime::from_name(configured);
        }
        let cached = self.cached_runtime().clone();
        if let Some(cached) = cached {
            return cached;
        }
        match discover_runtime(platform).await {
            Some(runtime) => {
                info!(runtime = runtime.name(), "Discovered container runtime");
                *self.cached_runtime() = Some(runtime.clone());
                runtime
            }
            None => ContainerRuntime::from_name(DEFAULT_CONTAINER_RUNTIME),
        }
    }

    /// One full pass over every component followed by the readiness wait.
    pub async fn run_cycle(&self, platform: Arc<dyn Platform>, ls: &LoggingService) -> Action {
        let key = format!(
            "{}/{}",
            ls.metadata.namespace.as_deref().unwrap_or_default(),
            ls.metadata.name.as_deref().unwrap_or_default()
        );
        let mut status = StatusUpdater::new(platform.clone(), ls);
        status.remove_temporary(&ls.spec).await;
        status.start(CYCLE_STATUS, "Start reconcile cycle").await;

        let runtime = self.runtime(platform.as_ref(), &ls.spec).await;
        let mut cycle = Cycle {
            ls,
            platform: platform.clone(),
            status,
            pending: PendingSet::default(),
            runtime,
            timings: &self.timings,
            config: &self.config,
            watchers: &self.watchers,
            factory: self.factory.as_ref(),
            probe: self.probe.as_ref(),
        };
        let mut failed = converge(&mut cycle).await;
        if readiness::drain(platform.as_ref(), &mut cycle.status, &mut cycle.pending, &self.timings).await {
            cycle.status.remove(COMPONENT_PENDING_STATUS).await;
        } else {
            cycle
                .status
                .fail(COMPONENT_PENDING_STATUS, "Reason: some components are not started")
                .await;
            failed = true;
        }

        if failed {
            let delay = self.backoff.failure(&key);
            cycle
                .status
                .fail(CYCLE_STATUS, "Reconcile cycle failed, see component conditions")
                .await;
            warn!(%key, ?delay, "Reconcile cycle failed");
            Action::requeue(delay)
        } else {
            self.backoff.reset(&key);
            cycle
                .status
                .update(CYCLE_STATUS, ConditionType::Successful, true, "Reconcile cycle succeeded")
                .await;
            info!(%key, "Reconcile cycle succeeded");
            Action::await_change()
        }
    }
}

/// Objects that start a cycle. Status patches leave `.metadata.generation`
/// alone, so the operator's own condition writes never re-trigger it.
pub fn triggers<S>(events: S) -> impl Stream<Item = Result<LoggingService, watcher::Error>> + Send
where
    S: Stream<Item = Result<watcher::Event<LoggingService>, watcher::Error>> + Send + 'static,
{
    events.applied_objects().predicate_filter(predicates::generation)
}

// Data we want access to in error/reconcile calls
pub struct Data {
    pub client: Client,
    pub operator: Operator,
}

pub async fn reconcile(ls_from_cache: Arc<LoggingService>, ctx: Arc<Data>) -> Result<Action, Error> {
    let client = &ctx.client;

    let ls_name = ls_from_cache
        .metadata
        .name
        .as_ref()
        .ok_or_else(|| Error::MissingObjectKey(".metadata.name"))?;
    let ls_ns = ls_from_cache
        .metadata
        .namespace
        .as_ref()
        .ok_or_else(|| Error::MissingObjectKey(".metadata.namespace"))?;

    // The cached copy may be stale, act on the live object only.
    let ls_api = Api::<LoggingService>::namespaced(client.clone(), ls_ns);
    let ls = match ls_api.get(ls_name).await {
        Ok(ls) => ls,
        Err(e) if is_not_found(&e) => {
            info!("{} not found, end reconcile", ls_name);
            ctx.operator.watchers.stop(&format!("{}/{}", ls_ns, ls_name));
            return Ok(Action::await_change());
        }
        Err(e) => return Err(Error::CRGetFailed(e)),
    };

    let platform: Arc<dyn Platform> = Arc::new(KubePlatform::new(client.clone(), ls_ns));
    Ok(ctx.operator.run_cycle(platform, &ls).await)
}

/// The controller triggers this on reconcile errors
pub fn error_policy(ls: Arc<LoggingService>, error: &Error, ctx: Arc<Data>) -> Action {
    let key = format!(
        "{}/{}",
        ls.metadata.namespace.as_deref().unwrap_or_default(),
        ls.metadata.name.as_deref().unwrap_or_default()
    );
    let delay = ctx.operator.backoff.failure(&key);
    warn!(%key, ?delay, "Reconcile failed due to error: {}", error);
    Action::requeue(delay)
}
