use super::Cycle;
use crate::apply::delete_all;
use crate::common::*;
use crate::config::Timings;
use crate::error::Error;
use crate::loggingservice_types::*;
use crate::manifests::forwarder_aggregator as tier;
use crate::platform::*;
use crate::readiness::PendingComponent;
use crate::waiter::wait_for_workload;
use tracing::*;

/// Aggregator first, waited inline, so forwarders never start without a
/// destination; the forwarder daemon set is left to the readiness drain.
pub async fn run(cycle: &mut Cycle<'_>, spec: FluentbitTier<'_>) -> Result<(), Error> {
    tier::validate(&spec)?;
    let ls = cycle.ls;
    let aggregator = spec.aggregator;
    cycle
        .apply(Resource::ConfigMap(tier::aggregator_config_map(ls, aggregator)))
        .await?;
    cycle
        .apply(Resource::StatefulSet(tier::aggregator_stateful_set(ls, aggregator)))
        .await?;
    let timeout = Timings::startup_timeout(cycle.timings.aggregator_startup_timeout, aggregator.startup_timeout);
    let ready = wait_for_workload(
        cycle.platform.as_ref(),
        ResourceKind::StatefulSet,
        AGGREGATOR_NAME,
        cycle.timings.interval,
        timeout,
    )
    .await?;
    if !ready {
        return Err(Error::NotStarted(AGGREGATOR_NAME.to_string()));
    }
    cycle
        .apply(Resource::Service(tier::aggregator_service(ls, aggregator)))
        .await?;

    let forwarder = spec.forwarder;
    cycle
        .apply(Resource::ConfigMap(tier::forwarder_config_map(ls, forwarder, &cycle.runtime)))
        .await?;
    cycle
        .apply(Resource::DaemonSet(tier::forwarder_daemon_set(ls, forwarder, &cycle.runtime)))
        .await?;
    cycle
        .apply(Resource::Service(tier::forwarder_service(ls, forwarder)))
        .await?;
    cycle
        .pending
        .push(PendingComponent::daemon_set(FORWARDER_NAME, HA_FLUENT_STATUS));
    debug!("Forwarder/aggregator tier applied");
    Ok(())
}

pub async fn uninstall(cycle: &mut Cycle<'_>) -> Result<(), Error> {
    delete_all(
        cycle.platform.as_ref(),
        &[
            (ResourceKind::DaemonSet, FORWARDER_NAME),
            (ResourceKind::Service, FORWARDER_NAME),
            (ResourceKind::ConfigMap, FORWARDER_NAME),
            (ResourceKind::StatefulSet, AGGREGATOR_NAME),
            (ResourceKind::Service, AGGREGATOR_NAME),
            (ResourceKind::ConfigMap, AGGREGATOR_NAME),
        ],
    )
    .await
}
