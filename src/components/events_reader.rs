use super::Cycle;
use crate::apply::delete_all;
use crate::common::*;
use crate::error::Error;
use crate::loggingservice_types::*;
use crate::manifests::events_reader;
use crate::platform::*;
use crate::readiness::PendingComponent;

pub async fn run(cycle: &mut Cycle<'_>, spec: &CloudEventsReader) -> Result<(), Error> {
    let ls = cycle.ls;
    cycle
        .apply(Resource::ServiceAccount(events_reader::service_account(ls, spec)))
        .await?;
    cycle
        .apply(Resource::Deployment(events_reader::deployment(ls, spec)))
        .await?;
    cycle.apply(Resource::Service(events_reader::service(ls, spec))).await?;
    cycle
        .pending
        .push(PendingComponent::deployment(EVENTS_READER_NAME, EVENTS_READER_STATUS));
    Ok(())
}

pub async fn uninstall(cycle: &mut Cycle<'_>) -> Result<(), Error> {
    delete_all(
        cycle.platform.as_ref(),
        &[
            (ResourceKind::Deployment, EVENTS_READER_NAME),
            (ResourceKind::Service, EVENTS_READER_NAME),
            (ResourceKind::ServiceAccount, EVENTS_READER_NAME),
        ],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::Harness;
    use crate::components::converge;
    use crate::testing::*;

    fn reader() -> CloudEventsReader {
        CloudEventsReader {
            install: true,
            docker_image: "events-reader:1.0".to_string(),
            ..CloudEventsReader::default()
        }
    }

    #[tokio::test]
    async fn test_image_change_replaces_deployment() {
        let mut harness = Harness::new(LoggingServiceSpec {
            cloud_events_reader: Some(reader()),
            ..LoggingServiceSpec::default()
        });
        let mut cycle = harness.cycle();
        converge(&mut cycle).await;
        harness.platform.clear_calls();

        if let Some(reader) = harness.ls.spec.cloud_events_reader.as_mut() {
            reader.docker_image = "events-reader:1.1".to_string();
        }
        let mut cycle = harness.cycle();
        converge(&mut cycle).await;
        assert!(harness
            .platform
            .calls()
            .contains(&Call::Replace(ResourceKind::Deployment, EVENTS_READER_NAME.to_string())));
    }

    #[tokio::test]
    async fn test_disabled_reader_is_uninstalled() {
        let mut harness = Harness::new(LoggingServiceSpec {
            cloud_events_reader: Some(reader()),
            ..LoggingServiceSpec::default()
        });
        let mut cycle = harness.cycle();
        converge(&mut cycle).await;

        if let Some(reader) = harness.ls.spec.cloud_events_reader.as_mut() {
            reader.install = false;
        }
        let mut cycle = harness.cycle();
        converge(&mut cycle).await;
        assert!(harness.platform.object(ResourceKind::Deployment, EVENTS_READER_NAME).is_none());
        assert!(harness.platform.object(ResourceKind::ServiceAccount, EVENTS_READER_NAME).is_none());
        assert!(harness.platform.condition(EVENTS_READER_STATUS).is_none());
    }
}
