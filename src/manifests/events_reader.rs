use crate::common::*;
use crate::loggingservice_types::*;
use crate::manifests::*;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;

const METRICS_PORT: i32 = 9999;

pub fn labels<'a>(ls: &'a LoggingService, reader: &'a CloudEventsReader) -> Labels<'a> {
    Labels {
        name: EVENTS_READER_NAME,
        component: "events-reader",
        namespace: ls.metadata.namespace.as_deref().unwrap_or_default(),
        image: &reader.docker_image,
        extra: reader.labels.as_ref(),
    }
}

pub fn service_account(ls: &LoggingService, reader: &CloudEventsReader) -> corev1::ServiceAccount {
    crate::manifests::service_account(ls, EVENTS_READER_NAME, &labels(ls, reader))
}

pub fn deployment(ls: &LoggingService, reader: &CloudEventsReader) -> appsv1::Deployment {
    let labels = labels(ls, reader);
    let mut pod_spec = corev1::PodSpec {
        service_account_name: Some(EVENTS_READER_NAME.to_string()),
        containers: vec![corev1::Container {
            name: EVENTS_READER_NAME.to_string(),
            image: Some(reader.docker_image.clone()),
            args: (!reader.args.is_empty()).then(|| reader.args.clone()),
            ports: Some(vec![corev1::ContainerPort {
                name: Some("metrics".to_string()),
                container_port: METRICS_PORT,
                protocol: Some("TCP".to_string()),
                ..corev1::ContainerPort::default()
            }]),
            resources: reader.resources.clone(),
            ..corev1::Container::default()
        }],
        ..corev1::PodSpec::default()
    };
    Placement {
        node_selector_key: &reader.node_selector_key,
        node_selector_value: &reader.node_selector_value,
        priority_class_name: &reader.priority_class_name,
        tolerations: None,
    }
    .apply(&mut pod_spec);
    appsv1::Deployment {
        metadata: with_annotations(object_meta(ls, EVENTS_READER_NAME, labels.build()), &reader.annotations),
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(1),
            selector: label_selector(labels.selector()),
            template: pod_template(labels.build(), &reader.annotations, pod_spec),
            ..appsv1::DeploymentSpec::default()
        }),
        ..appsv1::Deployment::default()
    }
}

pub fn service(ls: &LoggingService, reader: &CloudEventsReader) -> corev1::Service {
    crate::manifests::service(
        ls,
        EVENTS_READER_NAME,
        &labels(ls, reader),
        &[Port {
            name: "metrics",
            port: METRICS_PORT,
            protocol: "TCP",
        }],
    )
}
