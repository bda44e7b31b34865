use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logging.qubership.org",
    version = "v1alpha1",
    kind = "LoggingService"
)]
#[kube(shortname = "ls", namespaced, status = "LoggingServiceStatus")]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingServiceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog: Option<Graylog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fluentd: Option<Fluentd>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fluentbit: Option<Fluentbit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_events_reader: Option<CloudEventsReader>,
    #[serde(rename = "cloudURL", skip_serializing_if = "Option::is_none")]
    pub cloud_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_runtime_type: Option<String>,
    pub ipv6: bool,
    pub openshift_deploy: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LoggingServiceCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub reason: String,
    pub message: String,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: String,
    pub status: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LoggingServiceStatus {
    #[serde(default)]
    pub conditions: Vec<LoggingServiceCondition>,
}

/// Log aggregator settings. Presence of the section means "installed".
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Graylog {
    pub docker_image: String,
    #[serde(rename = "mongoDBImage")]
    pub mongo_db_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_setup_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_container_docker_image: Option<String>,
    pub host: String,
    pub graylog_secret_name: String,
    pub content_deploy_policy: String,
    pub input_port: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_resources: Option<corev1::ResourceRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mongo_resources: Option<corev1::ResourceRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_opts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_repo: Option<String>,
    pub streams: Vec<Stream>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_shards: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_number_of_indices: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_pack_paths: Option<String>,
    pub content_packs: Vec<ContentPackSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_search: Option<OpenSearch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<GraylogTls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_proxy: Option<AuthProxy>,
    #[serde(rename = "mongoDBUpgrade", skip_serializing_if = "Option::is_none")]
    pub mongo_db_upgrade: Option<MongoDbUpgrade>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Stream {
    pub name: String,
    pub install: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_number_of_indices: Option<i32>,
}

/// Sequential upgrade of the embedded database through its intermediate majors.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MongoDbUpgrade {
    #[serde(rename = "mongoDBImage40")]
    pub mongo_db_image_40: String,
    #[serde(rename = "mongoDBImage42")]
    pub mongo_db_image_42: String,
    #[serde(rename = "mongoDBImage44")]
    pub mongo_db_image_44: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthProxy {
    pub install: bool,
    pub image: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ContentPackSource {
    pub url: String,
    #[serde(rename = "tls", skip_serializing_if = "Option::is_none")]
    pub http_config: Option<HttpConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct OpenSearch {
    pub url: String,
    #[serde(rename = "tls", skip_serializing_if = "Option::is_none")]
    pub http_config: Option<HttpConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct Credentials {
    #[serde(rename = "username", skip_serializing_if = "Option::is_none")]
    pub user: Option<corev1::SecretKeySelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<corev1::SecretKeySelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<corev1::SecretKeySelector>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<corev1::SecretKeySelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<corev1::SecretKeySelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<corev1::SecretKeySelector>,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct GraylogTls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpGraylogTls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputGraylogTls>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpGraylogTls {
    pub enabled: bool,
    pub insecure_skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cacerts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<SecretKeyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<SecretKeyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_certs: Option<GenerateCerts>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InputGraylogTls {
    pub enabled: bool,
    pub insecure_skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<SecretKeyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<SecretKeyRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file_password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretKeyRef {
    pub secret_name: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateCerts {
    pub enabled: bool,
    pub secret_name: String,
}

/// Settings shared by both per-node shippers.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Fluentd {
    pub docker_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_protocol: Option<String>,
    pub graylog_output: bool,
    pub system_logging: bool,
    pub container_logging: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_log_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_input_conf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_filter_conf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_output_conf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_fields: Option<BTreeMap<String, String>>,
    pub exclude_path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<corev1::Toleration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_volumes: Option<Vec<corev1::Volume>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_volume_mounts: Option<Vec<corev1::VolumeMount>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    pub security_context_privileged: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Fluentbit {
    pub docker_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_protocol: Option<String>,
    pub graylog_output: bool,
    pub system_logging: bool,
    pub container_logging: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_log_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_input_conf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_filter_conf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_output_conf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_fields: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_buf_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<corev1::Toleration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_volumes: Option<Vec<corev1::Volume>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_volume_mounts: Option<Vec<corev1::VolumeMount>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    pub security_context_privileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<FluentbitAggregator>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FluentbitAggregator {
    pub install: bool,
    pub docker_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    pub graylog_output: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graylog_protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_filter_conf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_output_conf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_buf_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<AggregatorVolume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<corev1::Toleration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregatorVolume {
    pub bind: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudEventsReader {
    pub install: bool,
    pub docker_image: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

/// Whether a component takes part in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Install<T> {
    Absent,
    Enabled(T),
}

/// The forwarder daemon set and the aggregator stateful set are installed together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluentbitTier<'a> {
    pub forwarder: &'a Fluentbit,
    pub aggregator: &'a FluentbitAggregator,
}

/// Content-deploy policy of the configuration synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    OnlyCreate,
    ForceUpdate,
}

impl LoggingServiceSpec {
    pub fn graylog(&self) -> Install<&Graylog> {
        match &self.graylog {
            Some(graylog) => Install::Enabled(graylog),
            None => Install::Absent,
        }
    }

    pub fn fluentd(&self) -> Install<&Fluentd> {
        match &self.fluentd {
            Some(fluentd) => Install::Enabled(fluentd),
            None => Install::Absent,
        }
    }

    /// Plain Fluent Bit daemon set; absent when the forwarder/aggregator tier takes over.
    pub fn fluentbit(&self) -> Install<&Fluentbit> {
        match &self.fluentbit {
            Some(fluentbit) => match &fluentbit.aggregator {
                Some(aggregator) if aggregator.install => Install::Absent,
                _ => Install::Enabled(fluentbit),
            },
            None => Install::Absent,
        }
    }

    pub fn fluentbit_tier(&self) -> Install<FluentbitTier<'_>> {
        match &self.fluentbit {
            Some(fluentbit) => match &fluentbit.aggregator {
                Some(aggregator) if aggregator.install => Install::Enabled(FluentbitTier {
                    forwarder: fluentbit,
                    aggregator,
                }),
                _ => Install::Absent,
            },
            None => Install::Absent,
        }
    }

    pub fn events_reader(&self) -> Install<&CloudEventsReader> {
        match &self.cloud_events_reader {
            Some(reader) if reader.install => Install::Enabled(reader),
            _ => Install::Absent,
        }
    }
}

impl Graylog {
    /// `None` means the synchronizer is skipped entirely.
    pub fn sync_policy(&self) -> Option<SyncPolicy> {
        match self.content_deploy_policy.as_str() {
            "skip" => None,
            "force-update" => Some(SyncPolicy::ForceUpdate),
            _ => Some(SyncPolicy::OnlyCreate),
        }
    }

    pub fn auth_proxy_enabled(&self) -> bool {
        matches!(&self.auth_proxy, Some(proxy) if proxy.install)
    }

    pub fn http_tls(&self) -> Option<&HttpGraylogTls> {
        match &self.tls {
            Some(GraylogTls {
                http: Some(http), ..
            }) if http.enabled => Some(http),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fluentbit_and_tier_are_exclusive() {
        let mut spec = LoggingServiceSpec {
            fluentbit: Some(Fluentbit::default()),
            ..LoggingServiceSpec::default()
        };
        assert!(matches!(spec.fluentbit(), Install::Enabled(_)));
        assert!(matches!(spec.fluentbit_tier(), Install::Absent));

        spec.fluentbit.as_mut().unwrap().aggregator = Some(FluentbitAggregator {
            install: true,
            ..FluentbitAggregator::default()
        });
        assert!(matches!(spec.fluentbit(), Install::Absent));
        assert!(matches!(spec.fluentbit_tier(), Install::Enabled(_)));
    }

    #[test]
    fn test_events_reader_requires_install_flag() {
        let spec = LoggingServiceSpec {
            cloud_events_reader: Some(CloudEventsReader::default()),
            ..LoggingServiceSpec::default()
        };
        assert_eq!(spec.events_reader(), Install::Absent);
    }

    #[test]
    fn test_sync_policy_parsing() {
        let mut graylog = Graylog::default();
        assert_eq!(graylog.sync_policy(), Some(SyncPolicy::OnlyCreate));
        graylog.content_deploy_policy = "force-update".to_string();
        assert_eq!(graylog.sync_policy(), Some(SyncPolicy::ForceUpdate));
        graylog.content_deploy_policy = "skip".to_string();
        assert_eq!(graylog.sync_policy(), None);
    }

    #[test]
    fn test_spec_deserializes_wire_names() {
        let spec: LoggingServiceSpec = serde_json::from_value(serde_json::json!({
            "graylog": {
                "dockerImage": "graylog/graylog:5.2.3",
                "mongoDBImage": "mongo:5.0",
                "graylogSecretName": "graylog-secret",
                "contentDeployPolicy": "force-update",
                "inputPort": 12201,
                "mongoDBUpgrade": {
                    "mongoDBImage40": "mongo:4.0",
                    "mongoDBImage42": "mongo:4.2",
                    "mongoDBImage44": "mongo:4.4"
                }
            },
            "cloudURL": "https://cloud.example"
        }))
        .unwrap();
        let graylog = spec.graylog.unwrap();
        assert_eq!(graylog.mongo_db_image, "mongo:5.0");
        assert_eq!(graylog.input_port, 12201);
        assert_eq!(graylog.mongo_db_upgrade.unwrap().mongo_db_image_42, "mongo:4.2");
        assert_eq!(spec.cloud_url.as_deref(), Some("https://cloud.example"));
    }
}
