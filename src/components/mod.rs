//! Per-component install and uninstall, run in a fixed order every cycle.

pub mod events_reader;
pub mod fluentbit;
pub mod fluentd;
pub mod forwarder_aggregator;
pub mod graylog;

use crate::apply::apply;
use crate::common::*;
use crate::config::{OperatorConfig, Timings};
use crate::error::Error;
use crate::graylog::ConnectorFactory;
use crate::loggingservice_types::*;
use crate::manifests::ContainerRuntime;
use crate::platform::*;
use crate::readiness::PendingSet;
use crate::secret_watcher::SecretWatchers;
use crate::status::{ConditionType, StatusUpdater};
use crate::waiter::HostProbe;
use std::fmt;
use std::sync::Arc;
use tracing::*;

/// Everything one reconcile cycle works with.
pub struct Cycle<'a> {
    pub ls: &'a LoggingService,
    pub platform: Arc<dyn Platform>,
    pub status: StatusUpdater,
    pub pending: PendingSet,
    pub runtime: ContainerRuntime,
    pub timings: &'a Timings,
    pub config: &'a OperatorConfig,
    pub watchers: &'a SecretWatchers,
    pub factory: &'a dyn ConnectorFactory,
    pub probe: &'a dyn HostProbe,
}

impl Cycle<'_> {
    pub fn spec(&self) -> &LoggingServiceSpec {
        &self.ls.spec
    }

    /// `<namespace>/<name>`, the key background work is registered under.
    pub fn owner(&self) -> String {
        format!(
            "{}/{}",
            self.ls.metadata.namespace.as_deref().unwrap_or_default(),
            self.ls.metadata.name.as_deref().unwrap_or_default()
        )
    }

    pub async fn apply(&self, resource: Resource) -> Result<(), Error> {
        apply(self.platform.as_ref(), resource).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Graylog,
    Fluentd,
    Fluentbit,
    FluentbitTier,
    EventsReader,
}

impl Component {
    pub const ORDER: [Component; 5] = [
        Component::Graylog,
        Component::Fluentd,
        Component::Fluentbit,
        Component::FluentbitTier,
        Component::EventsReader,
    ];

    pub fn status_reason(&self) -> &'static str {
        match self {
            Component::Graylog => GRAYLOG_STATUS,
            Component::Fluentd => FLUENTD_STATUS,
            Component::Fluentbit => FLUENTBIT_STATUS,
            Component::FluentbitTier => HA_FLUENT_STATUS,
            Component::EventsReader => EVENTS_READER_STATUS,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Component::Graylog => "Graylog",
            Component::Fluentd => "Fluentd",
            Component::Fluentbit => "FluentBit",
            Component::FluentbitTier => "HA FluentBit",
            Component::EventsReader => "Events reader",
        }
    }

    pub fn installed(&self, spec: &LoggingServiceSpec) -> bool {
        match self {
            Component::Graylog => matches!(spec.graylog(), Install::Enabled(_)),
            Component::Fluentd => matches!(spec.fluentd(), Install::Enabled(_)),
            Component::Fluentbit => matches!(spec.fluentbit(), Install::Enabled(_)),
            Component::FluentbitTier => matches!(spec.fluentbit_tier(), Install::Enabled(_)),
            Component::EventsReader => matches!(spec.events_reader(), Install::Enabled(_)),
        }
    }

    async fn run(&self, cycle: &mut Cycle<'_>) -> Result<(), Error> {
        let ls = cycle.ls;
        match self {
            Component::Graylog => match ls.spec.graylog() {
                Install::Enabled(spec) => graylog::run(cycle, spec).await,
                Install::Absent => graylog::uninstall(cycle).await,
            },
            Component::Fluentd => match ls.spec.fluentd() {
                Install::Enabled(spec) => fluentd::run(cycle, spec).await,
                Install::Absent => fluentd::uninstall(cycle).await,
            },
            Component::Fluentbit => match ls.spec.fluentbit() {
                Install::Enabled(spec) => fluentbit::run(cycle, spec).await,
                Install::Absent => fluentbit::uninstall(cycle).await,
            },
            Component::FluentbitTier => match ls.spec.fluentbit_tier() {
                Install::Enabled(tier) => forwarder_aggregator::run(cycle, tier).await,
                Install::Absent => forwarder_aggregator::uninstall(cycle).await,
            },
            Component::EventsReader => match ls.spec.events_reader() {
                Install::Enabled(spec) => events_reader::run(cycle, spec).await,
                Install::Absent => events_reader::uninstall(cycle).await,
            },
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Runs one component and records the outcome in its condition. Returns
/// whether the component failed.
pub async fn reconcile_component(cycle: &mut Cycle<'_>, component: Component) -> bool {
    let reason = component.status_reason();
    if !component.installed(cycle.spec()) {
        return match component.run(cycle).await {
            Ok(()) => {
                cycle.status.remove(reason).await;
                false
            }
            Err(e) => {
                error!(%component, error = %e, "Uninstall failed");
                cycle
                    .status
                    .update(reason, ConditionType::Failed, false, &format!("Reason: {}", e))
                    .await;
                true
            }
        };
    }
    cycle
        .status
        .start(reason, &format!("Start reconcile of {}", component))
        .await;
    info!(%component, "Reconciling component");
    match component.run(cycle).await {
        Ok(()) => false,
        Err(e) => {
            error!(%component, error = %e, "Component reconcile failed");
            cycle
                .status
                .update(reason, ConditionType::Failed, false, &format!("Reason: {}", e))
                .await;
            true
        }
    }
}

/// Every component in order; the result tells whether any of them failed.
pub async fn converge(cycle: &mut Cycle<'_>) -> bool {
    let mut failed = false;
    for component in Component::ORDER {
        failed |= reconcile_component(cycle, component).await;
    }
    failed
}


#[cfg(test)]
mod tests {
    use super::test_support::Harness;
    use super::*;
    use crate::testing::*;

    fn shippers() -> LoggingServiceSpec {
        LoggingServiceSpec {
            fluentd: Some(Fluentd {
                docker_image: "fluentd:1.16".to_string(),
                ..Fluentd::default()
            }),
            cloud_events_reader: Some(CloudEventsReader {
                install: true,
                docker_image: "events-reader:1.0".to_string(),
                ..CloudEventsReader::default()
            }),
            ..LoggingServiceSpec::default()
        }
    }

    #[tokio::test]
    async fn test_converge_twice_writes_once() {
        let harness = Harness::new(shippers());
        let mut cycle = harness.cycle();
        assert!(!converge(&mut cycle).await);
        assert_eq!(cycle.pending.names(), vec![FLUENTD_NAME, EVENTS_READER_NAME]);
        let writes = harness.platform.calls().len();
        assert_eq!(writes, 6);

        let mut cycle = harness.cycle();
        assert!(!converge(&mut cycle).await);
        assert_eq!(harness.platform.calls().len(), writes);
    }

    #[tokio::test]
    async fn test_absent_component_is_removed_with_its_condition() {
        let mut harness = Harness::new(shippers());
        let mut cycle = harness.cycle();
        converge(&mut cycle).await;
        assert!(harness.platform.condition(FLUENTD_STATUS).is_some());

        harness.ls.spec.fluentd = None;
        harness.platform.clear_calls();
        let mut cycle = harness.cycle();
        converge(&mut cycle).await;
        assert_eq!(
            harness.platform.calls(),
            vec![
                Call::Delete(ResourceKind::DaemonSet, FLUENTD_NAME.to_string()),
                Call::Delete(ResourceKind::Service, FLUENTD_NAME.to_string()),
                Call::Delete(ResourceKind::ConfigMap, FLUENTD_NAME.to_string()),
            ]
        );
        assert!(harness.platform.condition(FLUENTD_STATUS).is_none());
        assert!(harness.platform.object(ResourceKind::DaemonSet, FLUENTD_NAME).is_none());
    }

    #[tokio::test]
    async fn test_failed_uninstall_keeps_a_failed_condition() {
        let mut harness = Harness::new(shippers());
        let mut cycle = harness.cycle();
        converge(&mut cycle).await;

        harness.ls.spec.fluentd = None;
        harness
            .platform
            .state
            .lock()
            .unwrap()
            .forbidden_deletes
            .insert(ResourceKind::Service);
        let mut cycle = harness.cycle();
        assert!(reconcile_component(&mut cycle, Component::Fluentd).await);
        let condition = harness.platform.condition(FLUENTD_STATUS).unwrap();
        assert_eq!(condition.type_, "Failed");
        assert!(condition.message.starts_with("Reason: "));
        assert!(harness.platform.object(ResourceKind::DaemonSet, FLUENTD_NAME).is_none());
        assert!(harness.platform.object(ResourceKind::ConfigMap, FLUENTD_NAME).is_none());
        assert!(harness.platform.object(ResourceKind::Service, FLUENTD_NAME).is_some());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_siblings_still_run() {
        let mut spec = shippers();
        spec.fluentbit = Some(Fluentbit {
            docker_image: "fluent-bit:3.0".to_string(),
            aggregator: Some(FluentbitAggregator {
                install: true,
                graylog_output: true,
                ..FluentbitAggregator::default()
            }),
            ..Fluentbit::default()
        });
        let harness = Harness::new(spec);
        let mut cycle = harness.cycle();
        assert!(converge(&mut cycle).await);
        let condition = harness.platform.condition(HA_FLUENT_STATUS).unwrap();
        assert_eq!(condition.type_, "Failed");
        assert!(condition.message.starts_with("Reason: "));
        assert!(harness
            .platform
            .object(ResourceKind::Deployment, EVENTS_READER_NAME)
            .is_some());
    }
}
