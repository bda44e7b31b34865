use super::Cycle;
use crate::apply::delete_all;
use crate::common::*;
use crate::error::Error;
use crate::loggingservice_types::*;
use crate::manifests::fluentbit;
use crate::platform::*;
use crate::readiness::PendingComponent;

/// The single-tier Fluent Bit daemon set.
pub async fn run(cycle: &mut Cycle<'_>, spec: &Fluentbit) -> Result<(), Error> {
    let ls = cycle.ls;
    cycle
        .apply(Resource::ConfigMap(fluentbit::config_map(ls, spec, &cycle.runtime)))
        .await?;
    cycle
        .apply(Resource::DaemonSet(fluentbit::daemon_set(ls, spec, &cycle.runtime)))
        .await?;
    cycle.apply(Resource::Service(fluentbit::service(ls, spec))).await?;
    cycle
        .pending
        .push(PendingComponent::daemon_set(FLUENTBIT_NAME, FLUENTBIT_STATUS));
    Ok(())
}

pub async fn uninstall(cycle: &mut Cycle<'_>) -> Result<(), Error> {
    delete_all(
        cycle.platform.as_ref(),
        &[
            (ResourceKind::DaemonSet, FLUENTBIT_NAME),
            (ResourceKind::Service, FLUENTBIT_NAME),
            (ResourceKind::ConfigMap, FLUENTBIT_NAME),
        ],
    )
    .await
}
