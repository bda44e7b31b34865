//! Builders of the typed objects each component applies.

pub mod events_reader;
pub mod fluentbit;
pub mod fluentd;
pub mod forwarder_aggregator;
pub mod graylog;
pub mod mongo_upgrade;

use crate::common::*;
use crate::loggingservice_types::*;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Container runtime of the nodes; selects the shipper's log parser and host paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Cri(String),
}

impl ContainerRuntime {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "docker" => ContainerRuntime::Docker,
            "" => ContainerRuntime::Cri(DEFAULT_CONTAINER_RUNTIME.to_string()),
            other => ContainerRuntime::Cri(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Cri(name) => name,
        }
    }

    pub fn log_parser(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Cri(_) => "cri",
        }
    }

    /// Host directories the shipper reads container logs from.
    pub fn log_paths(&self) -> Vec<(&'static str, &'static str)> {
        let mut paths = vec![("varlog", "/var/log")];
        match self {
            ContainerRuntime::Docker => paths.push(("docker-containers", "/var/lib/docker/containers")),
            ContainerRuntime::Cri(_) => paths.push(("pods", "/var/log/pods")),
        }
        paths
    }
}

/// Node placement and sizing shared by every workload.
pub struct Placement<'a> {
    pub node_selector_key: &'a Option<String>,
    pub node_selector_value: &'a Option<String>,
    pub priority_class_name: &'a Option<String>,
    pub tolerations: Option<&'a Vec<corev1::Toleration>>,
}

impl<'a> Placement<'a> {
    pub fn apply(&self, spec: &mut corev1::PodSpec) {
        spec.node_selector = node_selector(self.node_selector_key, self.node_selector_value);
        spec.priority_class_name = priority_class(self.priority_class_name);
        spec.tolerations = self.tolerations.cloned();
    }
}

pub fn with_annotations(
    mut meta: ObjectMeta,
    annotations: &Option<BTreeMap<String, String>>,
) -> ObjectMeta {
    if annotations.as_ref().map(|a| !a.is_empty()).unwrap_or(false) {
        meta.annotations = annotations.clone();
    }
    meta
}

pub fn pod_template(
    labels: BTreeMap<String, String>,
    annotations: &Option<BTreeMap<String, String>>,
    spec: corev1::PodSpec,
) -> corev1::PodTemplateSpec {
    corev1::PodTemplateSpec {
        metadata: Some(with_annotations(
            ObjectMeta {
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            annotations,
        )),
        spec: Some(spec),
    }
}

pub fn label_selector(labels: BTreeMap<String, String>) -> metav1::LabelSelector {
    metav1::LabelSelector {
        match_labels: Some(labels),
        ..metav1::LabelSelector::default()
    }
}

pub fn service_account(ls: &LoggingService, name: &str, labels: &Labels) -> corev1::ServiceAccount {
    corev1::ServiceAccount {
        metadata: object_meta(ls, name, labels.build()),
        ..corev1::ServiceAccount::default()
    }
}

pub fn config_map(
    ls: &LoggingService,
    name: &str,
    labels: &Labels,
    data: BTreeMap<String, String>,
) -> corev1::ConfigMap {
    corev1::ConfigMap {
        metadata: object_meta(ls, name, labels.build()),
        data: Some(data),
        ..corev1::ConfigMap::default()
    }
}

pub struct Port<'a> {
    pub name: &'a str,
    pub port: i32,
    pub protocol: &'a str,
}

pub fn service(ls: &LoggingService, name: &str, labels: &Labels, ports: &[Port]) -> corev1::Service {
    corev1::Service {
        metadata: object_meta(ls, name, labels.build()),
        spec: Some(corev1::ServiceSpec {
            selector: Some(labels.selector()),
            ports: Some(
                ports
                    .iter()
                    .map(|p| corev1::ServicePort {
                        name: Some(p.name.to_string()),
                        port: p.port,
                        protocol: Some(p.protocol.to_string()),
                        target_port: Some(IntOrString::Int(p.port)),
                        ..corev1::ServicePort::default()
                    })
                    .collect(),
            ),
            ..corev1::ServiceSpec::default()
        }),
        ..corev1::Service::default()
    }
}

pub fn host_path(name: &str, path: &str, read_only: bool) -> (corev1::Volume, corev1::VolumeMount) {
    (
        corev1::Volume {
            name: name.to_string(),
            host_path: Some(corev1::HostPathVolumeSource {
                path: path.to_string(),
                ..corev1::HostPathVolumeSource::default()
            }),
            ..corev1::Volume::default()
        },
        corev1::VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            read_only: Some(read_only),
            ..corev1::VolumeMount::default()
        },
    )
}

pub fn config_volume(name: &str, config_map: &str, mount_path: &str) -> (corev1::Volume, corev1::VolumeMount) {
    (
        corev1::Volume {
            name: name.to_string(),
            config_map: Some(corev1::ConfigMapVolumeSource {
                name: Some(config_map.to_string()),
                ..corev1::ConfigMapVolumeSource::default()
            }),
            ..corev1::Volume::default()
        },
        corev1::VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            ..corev1::VolumeMount::default()
        },
    )
}

pub fn env(name: &str, value: &str) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..corev1::EnvVar::default()
    }
}

pub fn node_name_env() -> corev1::EnvVar {
    corev1::EnvVar {
        name: "NODE_NAME".to_string(),
        value_from: Some(corev1::EnvVarSource {
            field_ref: Some(corev1::ObjectFieldSelector {
                field_path: "spec.nodeName".to_string(),
                ..corev1::ObjectFieldSelector::default()
            }),
            ..corev1::EnvVarSource::default()
        }),
        ..corev1::EnvVar::default()
    }
}

/// Host source of the node's own (non-container) logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemLogSource {
    VarLogMessages,
    VarLogSyslog,
    Systemd,
}

impl SystemLogSource {
    pub fn from_type(value: &Option<String>) -> Self {
        match value.as_deref().map(|v| v.trim().to_lowercase()).as_deref() {
            Some("varlogsyslog") => SystemLogSource::VarLogSyslog,
            Some("systemd") => SystemLogSource::Systemd,
            _ => SystemLogSource::VarLogMessages,
        }
    }

    /// Log file to tail; `None` for the journal.
    pub fn file(&self) -> Option<&'static str> {
        match self {
            SystemLogSource::VarLogMessages => Some("/var/log/messages"),
            SystemLogSource::VarLogSyslog => Some("/var/log/syslog"),
            SystemLogSource::Systemd => None,
        }
    }
}

/// Pod-level settings of a per-node shipper daemon set.
pub struct Shipper<'a> {
    pub container_name: &'static str,
    pub image: &'a str,
    /// Names the config map and the (externally provisioned) service account.
    pub name: &'static str,
    pub config_path: &'static str,
    pub runtime: &'a ContainerRuntime,
    pub privileged: bool,
    pub resources: &'a Option<corev1::ResourceRequirements>,
    pub additional_volumes: &'a Option<Vec<corev1::Volume>>,
    pub additional_volume_mounts: &'a Option<Vec<corev1::VolumeMount>>,
    pub port: Port<'a>,
    pub placement: Placement<'a>,
}

impl<'a> Shipper<'a> {
    pub fn pod_spec(&self) -> corev1::PodSpec {
        let (config, config_mount) = config_volume("config", self.name, self.config_path);
        let mut volumes = vec![config];
        let mut mounts = vec![config_mount];
        for (name, path) in self.runtime.log_paths() {
            // Position files live next to the tailed logs under /var/log.
            let (volume, mount) = host_path(name, path, name != "varlog");
            volumes.push(volume);
            mounts.push(mount);
        }
        if let Some(extra) = self.additional_volumes {
            volumes.extend(extra.iter().cloned());
        }
        if let Some(extra) = self.additional_volume_mounts {
            mounts.extend(extra.iter().cloned());
        }
        let mut spec = corev1::PodSpec {
            service_account_name: Some(self.name.to_string()),
            containers: vec![corev1::Container {
                name: self.container_name.to_string(),
                image: Some(self.image.to_string()),
                env: Some(vec![node_name_env()]),
                ports: Some(vec![corev1::ContainerPort {
                    name: Some(self.port.name.to_string()),
                    container_port: self.port.port,
                    protocol: Some(self.port.protocol.to_string()),
                    ..corev1::ContainerPort::default()
                }]),
                resources: self.resources.clone(),
                security_context: Some(corev1::SecurityContext {
                    privileged: Some(self.privileged),
                    ..corev1::SecurityContext::default()
                }),
                volume_mounts: Some(mounts),
                ..corev1::Container::default()
            }],
            volumes: Some(volumes),
            termination_grace_period_seconds: Some(10),
            ..corev1::PodSpec::default()
        };
        self.placement.apply(&mut spec);
        spec
    }
}

pub fn daemon_set(
    ls: &LoggingService,
    name: &str,
    labels: &Labels,
    annotations: &Option<BTreeMap<String, String>>,
    pod_spec: corev1::PodSpec,
) -> appsv1::DaemonSet {
    appsv1::DaemonSet {
        metadata: with_annotations(object_meta(ls, name, labels.build()), annotations),
        spec: Some(appsv1::DaemonSetSpec {
            selector: label_selector(labels.selector()),
            template: pod_template(labels.build(), annotations, pod_spec),
            ..appsv1::DaemonSetSpec::default()
        }),
        ..appsv1::DaemonSet::default()
    }
}

/// Where a shipper sends GELF records.
#[derive(Debug, Clone, PartialEq)]
pub struct GelfTarget {
    pub host: String,
    pub port: i32,
    pub protocol: String,
}

impl GelfTarget {
    /// Falls back to the in-namespace Graylog service when no host is set.
    pub fn resolve(
        namespace: &str,
        host: &Option<String>,
        port: Option<i32>,
        protocol: &Option<String>,
    ) -> Self {
        GelfTarget {
            host: host
                .clone()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| graylog_host(namespace)),
            port: port.filter(|p| *p > 0).unwrap_or(12201),
            protocol: protocol
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| "tcp".to_string())
                .to_lowercase(),
        }
    }
}
