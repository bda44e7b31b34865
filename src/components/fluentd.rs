use super::Cycle;
use crate::apply::delete_all;
use crate::common::*;
use crate::error::Error;
use crate::loggingservice_types::*;
use crate::manifests::fluentd;
use crate::platform::*;
use crate::readiness::PendingComponent;

pub async fn run(cycle: &mut Cycle<'_>, spec: &Fluentd) -> Result<(), Error> {
    let ls = cycle.ls;
    cycle
        .apply(Resource::ConfigMap(fluentd::config_map(ls, spec, &cycle.runtime)))
        .await?;
    cycle
        .apply(Resource::DaemonSet(fluentd::daemon_set(ls, spec, &cycle.runtime)))
        .await?;
    cycle.apply(Resource::Service(fluentd::service(ls, spec))).await?;
    cycle
        .pending
        .push(PendingComponent::daemon_set(FLUENTD_NAME, FLUENTD_STATUS));
    Ok(())
}

pub async fn uninstall(cycle: &mut Cycle<'_>) -> Result<(), Error> {
    delete_all(
        cycle.platform.as_ref(),
        &[
            (ResourceKind::DaemonSet, FLUENTD_NAME),
            (ResourceKind::Service, FLUENTD_NAME),
            (ResourceKind::ConfigMap, FLUENTD_NAME),
        ],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::Harness;
    use crate::manifests::ContainerRuntime;

    fn fluentd_spec() -> Fluentd {
        Fluentd {
            docker_image: "fluentd:1.16".to_string(),
            container_logging: true,
            ..Fluentd::default()
        }
    }

    #[tokio::test]
    async fn test_docker_runtime_renders_docker_parser() {
        let harness = Harness::new(LoggingServiceSpec::default());
        let mut cycle = harness.cycle();
        cycle.runtime = ContainerRuntime::from_name("docker");
        run(&mut cycle, &fluentd_spec()).await.unwrap();
        let Some(Resource::ConfigMap(cm)) = harness.platform.object(ResourceKind::ConfigMap, FLUENTD_NAME)
        else {
            panic!("config map not created");
        };
        let rendered: String = cm.data.unwrap().into_values().collect();
        assert!(rendered.contains("@type json"));
        let Some(Resource::DaemonSet(ds)) = harness.platform.object(ResourceKind::DaemonSet, FLUENTD_NAME)
        else {
            panic!("daemon set not created");
        };
        let volumes = ds.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        assert!(volumes.iter().any(|v| v.name == "docker-containers"));
        assert_eq!(cycle.pending.names(), vec![FLUENTD_NAME]);
    }

    #[tokio::test]
    async fn test_uninstall_tolerates_missing_objects() {
        let harness = Harness::new(LoggingServiceSpec::default());
        let mut cycle = harness.cycle();
        uninstall(&mut cycle).await.unwrap();
        assert!(harness.platform.calls().is_empty());
    }
}
