use crate::loggingservice_types::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ObjectMeta, Resource};
use regex::Regex;
use std::collections::BTreeMap;

pub const CYCLE_STATUS: &str = "ReconcileCycleStatus";
pub const GRAYLOG_STATUS: &str = "ReconcileGraylogStatus";
pub const FLUENTD_STATUS: &str = "ReconcileFluentdStatus";
pub const FLUENTBIT_STATUS: &str = "ReconcileFluentbitStatus";
pub const HA_FLUENT_STATUS: &str = "ReconcileHAFluentStatus";
pub const EVENTS_READER_STATUS: &str = "ReconcileEventsReaderStatus";
pub const COMPONENT_PENDING_STATUS: &str = "ComponentPendingStatus";

pub const GRAYLOG_NAME: &str = "graylog";
pub const GRAYLOG_SERVICE_NAME: &str = "graylog-service";
pub const GRAYLOG_SERVICE_ACCOUNT_NAME: &str = "logging-graylog";
pub const GRAYLOG_CLAIM_NAME: &str = "graylog-claim";
pub const MONGO_CLAIM_NAME: &str = "mongo-claim";
pub const GRAYLOG_HTTP_PORT: i32 = 9000;
pub const FLUENTD_NAME: &str = "logging-fluentd";
pub const FLUENTBIT_NAME: &str = "logging-fluentbit";
pub const FORWARDER_NAME: &str = "logging-fluentbit-forwarder";
pub const AGGREGATOR_NAME: &str = "logging-fluentbit-aggregator";
pub const EVENTS_READER_NAME: &str = "events-reader";

pub const GRAYLOG_SECRET_SELECTOR: &str = "graylog=secret";
pub const GRAYLOG_CONFIG_FILE: &str = "graylog.conf";
pub const GRAYLOG_USER_FIELD: &str = "root_username";
pub const GRAYLOG_PASSWORD_FIELD: &str = "root_password_sha2";

pub const MIGRATION_JOBS: [&str; 4] = [
    "mongo-upgrade-job-40",
    "mongo-upgrade-job-42",
    "mongo-upgrade-job-44",
    "mongo-upgrade-job-50",
];
pub const MIGRATION_POD_SELECTOR: &str = "name=mongo-upgrade-job";
pub const LEGACY_GRAYLOG_POD_SELECTOR: &str = "name=graylog";

pub const DEFAULT_CONTAINER_RUNTIME: &str = "containerd";

/// Product version line selected from the aggregator image tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBranch {
    V4,
    V5,
}

impl VersionBranch {
    pub fn from_image(image: &str) -> VersionBranch {
        let major = Regex::new(r"([0-9]+)\.([0-9]+)\.([0-9]+)")
            .ok()
            .and_then(|re| re.captures(image))
            .and_then(|c| c.get(1).map(|m| m.as_str().to_string()));
        match major.as_deref() {
            Some("5") => VersionBranch::V5,
            _ => VersionBranch::V4,
        }
    }

    pub fn major(&self) -> &'static str {
        match self {
            VersionBranch::V4 => "4",
            VersionBranch::V5 => "5",
        }
    }
}

pub fn image_tag(image: &str) -> String {
    image.rsplit(':').next().unwrap_or(image).to_string()
}

/// `<name>-<namespace>` clipped to the 63 characters a label value may hold.
pub fn instance_label(name: &str, namespace: &str) -> String {
    let label = format!("{}-{}", name, namespace);
    let clipped: String = label.chars().take(63).collect();
    clipped.trim_matches('-').to_string()
}

pub fn graylog_host(namespace: &str) -> String {
    format!("{}.{}.svc", GRAYLOG_SERVICE_NAME, namespace)
}

pub fn node_selector(
    key: &Option<String>,
    value: &Option<String>,
) -> Option<BTreeMap<String, String>> {
    match (key, value) {
        (Some(k), Some(v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
            Some(BTreeMap::from([(k.clone(), v.clone())]))
        }
        _ => None,
    }
}

pub fn priority_class(name: &Option<String>) -> Option<String> {
    name.as_ref()
        .filter(|n| !n.trim().is_empty())
        .map(|n| n.trim().to_string())
}

/// Shared label set of every generated object.
pub struct Labels<'a> {
    pub name: &'a str,
    pub component: &'a str,
    pub namespace: &'a str,
    pub image: &'a str,
    pub extra: Option<&'a BTreeMap<String, String>>,
}

impl<'a> Labels<'a> {
    pub fn selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("name".to_string(), self.name.to_string()),
            ("component".to_string(), self.component.to_string()),
        ])
    }

    pub fn build(&self) -> BTreeMap<String, String> {
        let mut labels = self.selector();
        labels.insert("app.kubernetes.io/name".to_string(), self.name.to_string());
        labels.insert(
            "app.kubernetes.io/instance".to_string(),
            instance_label(self.name, self.namespace),
        );
        labels.insert("app.kubernetes.io/version".to_string(), image_tag(self.image));
        labels.insert("app.kubernetes.io/component".to_string(), self.component.to_string());
        labels.insert("app.kubernetes.io/part-of".to_string(), "logging".to_string());
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "logging-operator".to_string(),
        );
        if let Some(extra) = self.extra {
            labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        labels
    }
}

pub fn owner_references(ls: &LoggingService) -> Option<Vec<OwnerReference>> {
    ls.controller_owner_ref(&()).map(|owner| vec![owner])
}

pub fn object_meta(ls: &LoggingService, name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: ls.meta().namespace.clone(),
        labels: Some(labels),
        owner_references: owner_references(ls),
        ..ObjectMeta::default()
    }
}
