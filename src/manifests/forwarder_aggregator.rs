use crate::common::*;
use crate::error::Error;
use crate::loggingservice_types::*;
use crate::manifests::fluentbit::{self, CONFIG_PATH, HTTP_PORT};
use crate::manifests::*;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

pub const FORWARD_PORT: i32 = 24224;
const BUFFER_PATH: &str = "/fluent-bit/buffer";
const DEFAULT_REPLICAS: i32 = 2;
const DEFAULT_STORAGE_SIZE: &str = "2Gi";

/// The aggregator can only emit GELF when it is told where Graylog is.
pub fn validate(tier: &FluentbitTier) -> Result<(), Error> {
    let aggregator = tier.aggregator;
    let host_missing = aggregator
        .graylog_host
        .as_ref()
        .map(|h| h.trim().is_empty())
        .unwrap_or(true);
    let port_missing = aggregator.graylog_port.unwrap_or(0) == 0;
    if aggregator.graylog_output && (host_missing || port_missing) {
        return Err(Error::Configuration(
            "fluentbit.aggregator.graylogHost and fluentbit.aggregator.graylogPort are required with Graylog output"
                .to_string(),
        ));
    }
    Ok(())
}

pub fn aggregator_labels<'a>(ls: &'a LoggingService, aggregator: &'a FluentbitAggregator) -> Labels<'a> {
    Labels {
        name: AGGREGATOR_NAME,
        component: "fluentbit",
        namespace: ls.metadata.namespace.as_deref().unwrap_or_default(),
        image: &aggregator.docker_image,
        extra: aggregator.labels.as_ref(),
    }
}

pub fn aggregator_host(namespace: &str) -> String {
    format!("{}.{}.svc", AGGREGATOR_NAME, namespace)
}

pub fn render_aggregator_config(namespace: &str, aggregator: &FluentbitAggregator) -> BTreeMap<String, String> {
    let mut data = BTreeMap::from([
        ("fluent-bit.conf".to_string(), fluentbit::service_section()),
        ("parsers.conf".to_string(), fluentbit::parsers()),
        (
            "input-forward.conf".to_string(),
            format!(
                "[INPUT]\n    Name           forward\n    Listen         0.0.0.0\n    Port           {}\n    Mem_Buf_Limit  {}\n    storage.type   filesystem\n",
                FORWARD_PORT,
                aggregator.mem_buf_limit.as_deref().unwrap_or("50MB")
            ),
        ),
        (
            "filter-custom.conf".to_string(),
            aggregator.custom_filter_conf.clone().unwrap_or_default(),
        ),
        (
            "output-custom.conf".to_string(),
            aggregator.custom_output_conf.clone().unwrap_or_default(),
        ),
    ]);
    if aggregator.graylog_output {
        let target = GelfTarget::resolve(
            namespace,
            &aggregator.graylog_host,
            aggregator.graylog_port,
            &aggregator.graylog_protocol,
        );
        data.insert("output-graylog.conf".to_string(), fluentbit::gelf_output(&target));
    }
    data
}

pub fn aggregator_config_map(ls: &LoggingService, aggregator: &FluentbitAggregator) -> corev1::ConfigMap {
    let namespace = ls.metadata.namespace.as_deref().unwrap_or_default();
    config_map(
        ls,
        AGGREGATOR_NAME,
        &aggregator_labels(ls, aggregator),
        render_aggregator_config(namespace, aggregator),
    )
}

fn buffer_claim(volume: &AggregatorVolume) -> corev1::PersistentVolumeClaim {
    let size = volume
        .storage_size
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_STORAGE_SIZE.to_string());
    corev1::PersistentVolumeClaim {
        metadata: kube::api::ObjectMeta {
            name: Some("buffer".to_string()),
            ..kube::api::ObjectMeta::default()
        },
        spec: Some(corev1::PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: volume.storage_class_name.clone().filter(|c| !c.trim().is_empty()),
            resources: Some(corev1::VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size))])),
                ..corev1::VolumeResourceRequirements::default()
            }),
            ..corev1::PersistentVolumeClaimSpec::default()
        }),
        ..corev1::PersistentVolumeClaim::default()
    }
}

pub fn aggregator_stateful_set(ls: &LoggingService, aggregator: &FluentbitAggregator) -> appsv1::StatefulSet {
    let labels = aggregator_labels(ls, aggregator);
    let (config, config_mount) = config_volume("config", AGGREGATOR_NAME, CONFIG_PATH);
    let claim = aggregator.volume.as_ref().filter(|v| v.bind).map(buffer_claim);
    let mut volumes = vec![config];
    if claim.is_none() {
        volumes.push(corev1::Volume {
            name: "buffer".to_string(),
            empty_dir: Some(corev1::EmptyDirVolumeSource::default()),
            ..corev1::Volume::default()
        });
    }
    let mut pod_spec = corev1::PodSpec {
        containers: vec![corev1::Container {
            name: AGGREGATOR_NAME.to_string(),
            image: Some(aggregator.docker_image.clone()),
            ports: Some(vec![
                corev1::ContainerPort {
                    name: Some("forward".to_string()),
                    container_port: FORWARD_PORT,
                    protocol: Some("TCP".to_string()),
                    ..corev1::ContainerPort::default()
                },
                corev1::ContainerPort {
                    name: Some("http".to_string()),
                    container_port: HTTP_PORT,
                    protocol: Some("TCP".to_string()),
                    ..corev1::ContainerPort::default()
                },
            ]),
            resources: aggregator.resources.clone(),
            volume_mounts: Some(vec![
                config_mount,
                corev1::VolumeMount {
                    name: "buffer".to_string(),
                    mount_path: BUFFER_PATH.to_string(),
                    ..corev1::VolumeMount::default()
                },
            ]),
            ..corev1::Container::default()
        }],
        volumes: Some(volumes),
        ..corev1::PodSpec::default()
    };
    Placement {
        node_selector_key: &aggregator.node_selector_key,
        node_selector_value: &aggregator.node_selector_value,
        priority_class_name: &aggregator.priority_class_name,
        tolerations: aggregator.tolerations.as_ref(),
    }
    .apply(&mut pod_spec);
    appsv1::StatefulSet {
        metadata: with_annotations(object_meta(ls, AGGREGATOR_NAME, labels.build()), &aggregator.annotations),
        spec: Some(appsv1::StatefulSetSpec {
            replicas: Some(aggregator.replicas.filter(|r| *r > 0).unwrap_or(DEFAULT_REPLICAS)),
            service_name: AGGREGATOR_NAME.to_string(),
            selector: label_selector(labels.selector()),
            template: pod_template(labels.build(), &aggregator.annotations, pod_spec),
            volume_claim_templates: claim.map(|c| vec![c]),
            ..appsv1::StatefulSetSpec::default()
        }),
        ..appsv1::StatefulSet::default()
    }
}

pub fn aggregator_service(ls: &LoggingService, aggregator: &FluentbitAggregator) -> corev1::Service {
    service(
        ls,
        AGGREGATOR_NAME,
        &aggregator_labels(ls, aggregator),
        &[
            Port {
                name: "forward",
                port: FORWARD_PORT,
                protocol: "TCP",
            },
            Port {
                name: "http",
                port: HTTP_PORT,
                protocol: "TCP",
            },
        ],
    )
}

/// Node inputs of Fluent Bit with every record forwarded to the aggregator service.
pub fn render_forwarder_config(
    namespace: &str,
    forwarder: &Fluentbit,
    runtime: &ContainerRuntime,
) -> BTreeMap<String, String> {
    let mut data = fluentbit::node_config(forwarder, runtime);
    data.insert(
        "output-forward.conf".to_string(),
        format!(
            "[OUTPUT]\n    Name          forward\n    Match         *\n    Host          {}\n    Port          {}\n    Retry_Limit   False\n",
            aggregator_host(namespace),
            FORWARD_PORT
        ),
    );
    data
}

pub fn forwarder_config_map(ls: &LoggingService, forwarder: &Fluentbit, runtime: &ContainerRuntime) -> corev1::ConfigMap {
    let namespace = ls.metadata.namespace.as_deref().unwrap_or_default();
    config_map(
        ls,
        FORWARDER_NAME,
        &fluentbit::labels(ls, forwarder, FORWARDER_NAME),
        render_forwarder_config(namespace, forwarder, runtime),
    )
}

pub fn forwarder_daemon_set(ls: &LoggingService, forwarder: &Fluentbit, runtime: &ContainerRuntime) -> appsv1::DaemonSet {
    daemon_set(
        ls,
        FORWARDER_NAME,
        &fluentbit::labels(ls, forwarder, FORWARDER_NAME),
        &forwarder.annotations,
        fluentbit::shipper(forwarder, FORWARDER_NAME, runtime).pod_spec(),
    )
}

pub fn forwarder_service(ls: &LoggingService, forwarder: &Fluentbit) -> corev1::Service {
    service(
        ls,
        FORWARDER_NAME,
        &fluentbit::labels(ls, forwarder, FORWARDER_NAME),
        &[Port {
            name: "http",
            port: HTTP_PORT,
            protocol: "TCP",
        }],
    )
}
