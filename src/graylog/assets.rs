//! Request bodies for every object the synchronizer owns inside Graylog.

use crate::common::VersionBranch;
use serde_json::{json, Value};

pub const DEFAULT_INDEX_SET: &str = "Default index set";
pub const AUDIT_INDEX_SET: &str = "Audit index set";
pub const DEFAULT_STREAM: &str = "Default Stream";
pub const ALL_MESSAGES_STREAM: &str = "All messages";
pub const ALL_EVENTS_STREAM: &str = "All events";
pub const ALL_SYSTEM_EVENTS_STREAM: &str = "All system events";
pub const AUDIT_STREAM: &str = "Audit logs";
pub const SYSTEM_STREAM: &str = "System logs";
pub const KUBERNETES_EVENTS_STREAM: &str = "Kubernetes events";
pub const PIPELINE_TITLE: &str = "Logs routing";
pub const CONTENT_PACK_ID: &str = "0fac53ed-df74-4ba6-88c2-aa16b4b8542d";
pub const CONTENT_PACK_REVISION: u32 = 1;
pub const SOURCES_DASHBOARD: &str = "Sources by Service";
pub const LEGACY_EXTRACTOR: &str = "os_extractor";

/// A log category Graylog can route into its own stream.
#[derive(Debug, PartialEq)]
pub struct StreamDef {
    pub title: &'static str,
    pub index_set: &'static str,
    pub description: &'static str,
    pub rule_condition: &'static str,
}

impl StreamDef {
    pub fn rule_title(&self) -> String {
        format!("Route {}", self.title)
    }

    pub fn rule_description(&self) -> String {
        format!("Route {} to the appropriate stream", self.title)
    }

    pub fn rule_source(&self, stream_id: &str) -> String {
        format!(
            "rule \"{}\"\nwhen\n  {}\nthen\n  route_to_stream(id: \"{}\", remove_from_default: true);\nend",
            self.rule_title(),
            self.rule_condition,
            stream_id
        )
    }
}

pub static STREAMS: [StreamDef; 7] = [
    StreamDef {
        title: AUDIT_STREAM,
        index_set: AUDIT_INDEX_SET,
        description: "Audit log messages from OC nodes sent through fluent bit",
        rule_condition: "has_field(\"log_type\") && to_string($message.log_type) == \"audit\"",
    },
    StreamDef {
        title: SYSTEM_STREAM,
        index_set: DEFAULT_INDEX_SET,
        description: "System log messages from OC nodes sent through fluent bit",
        rule_condition: "has_field(\"log_type\") && to_string($message.log_type) == \"system\"",
    },
    StreamDef {
        title: "Access logs",
        index_set: "Access index set",
        description: "Access log messages of the applications sent through fluent bit",
        rule_condition: "has_field(\"log_type\") && to_string($message.log_type) == \"access\"",
    },
    StreamDef {
        title: "Integration logs",
        index_set: "Integration index set",
        description: "Integration log messages of the applications sent through fluent bit",
        rule_condition: "has_field(\"log_type\") && to_string($message.log_type) == \"int\"",
    },
    StreamDef {
        title: "Bill Cycle logs",
        index_set: "Bill Cycle index set",
        description: "Bill cycle log messages of the applications sent through fluent bit",
        rule_condition: "has_field(\"log_type\") && to_string($message.log_type) == \"billing\"",
    },
    StreamDef {
        title: "Nginx logs",
        index_set: "Ingress-nginx index set",
        description: "Ingress nginx log messages sent through fluent bit",
        rule_condition: "has_field(\"container_name\") && contains(to_string($message.container_name), \"nginx\")",
    },
    StreamDef {
        title: KUBERNETES_EVENTS_STREAM,
        index_set: "Kubernetes events index set",
        description: "Kubernetes events as logs sent through fluent bit",
        rule_condition: "has_field(\"kind\") && to_string($message.kind) == \"KubernetesEvent\"",
    },
];

pub fn stream_def(title: &str) -> Option<&'static StreamDef> {
    STREAMS.iter().find(|s| s.title == title)
}

pub fn stream(title: &str, description: &str, index_set_id: &str) -> Value {
    json!({
        "matching_type": "AND",
        "description": description,
        "title": title,
        "index_set_id": index_set_id,
    })
}

/// Rules that clean up every message before it is routed.
pub struct StructuralRule {
    pub title: &'static str,
    pub description: &'static str,
    pub body: &'static str,
}

pub const STRUCTURAL_RULES: [StructuralRule; 3] = [
    StructuralRule {
        title: "Processing unsupported symbols",
        description: "Processing unsupported symbols (Replace '/' to '_')",
        body: "when\n  has_field(\"container_name\")\nthen\n  set_field(\"container_name\", replace(to_string($message.container_name), \"/\", \"_\"));\nend",
    },
    StructuralRule {
        title: "Remove kubernetes field",
        description: "Remove kubernetes field",
        body: "when\n  has_field(\"kubernetes\")\nthen\n  remove_field(\"kubernetes\");\nend",
    },
    StructuralRule {
        title: "Remove kubernetes_labels field",
        description: "Remove kubernetes labels field",
        body: "when\n  has_field(\"kubernetes_labels\")\nthen\n  remove_field(\"kubernetes_labels\");\nend",
    },
];

impl StructuralRule {
    pub fn source(&self) -> String {
        format!("rule \"{}\"\n{}", self.title, self.body)
    }
}

pub fn rule(title: &str, description: &str, source: &str) -> Value {
    json!({
        "title": title,
        "description": description,
        "source": source,
    })
}

/// Structural rules run first, routing rules in the second stage.
pub fn pipeline(routing_rules: &[String]) -> Value {
    let mut source = format!("pipeline \"{}\"\nstage 0 match either\n", PIPELINE_TITLE);
    for rule in &STRUCTURAL_RULES {
        source.push_str(&format!("rule \"{}\"\n", rule.title));
    }
    if !routing_rules.is_empty() {
        source.push_str("stage 1 match either\n");
        for rule in routing_rules {
            source.push_str(&format!("rule \"{}\"\n", rule));
        }
    }
    source.push_str("end");
    json!({
        "title": PIPELINE_TITLE,
        "description": "Routes log messages to the streams of their categories",
        "source": source,
    })
}

pub fn pipeline_connection(pipeline_id: &str, stream_id: &str) -> Value {
    json!({ "pipeline_ids": [pipeline_id], "stream_id": stream_id })
}

pub const GROK_PATTERNS: [(&str, &str); 5] = [
    ("K8S_POD_NAME", "[a-z0-9]([-a-z0-9]*[a-z0-9])?"),
    ("LOG_LEVEL", "(?i)(TRACE|DEBUG|INFO|WARN(?:ING)?|ERROR|FATAL)"),
    ("REQUEST_ID", "[a-zA-Z0-9-]*"),
    ("THREAD_NAME", "[^\\]]+"),
    (
        "MICROSERVICE_LOG",
        "\\[%{TIMESTAMP_ISO8601:time}\\]\\[%{LOG_LEVEL:level}\\]\\[request_id=%{REQUEST_ID:request_id}\\]\\[tenant_id=%{DATA:tenant_id}\\]\\[thread=%{THREAD_NAME:thread}\\]\\[class=%{DATA:class}\\]",
    ),
];

pub fn grok_pattern(id: Option<&str>, name: &str, pattern: &str) -> Value {
    let mut body = json!({ "name": name, "pattern": pattern });
    if let Some(id) = id {
        body["id"] = json!(id);
    }
    body
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    SizeBased,
    TimeBased,
}

impl RotationStrategy {
    /// Anything but an explicit `timeBased` rotates by size.
    pub fn parse(value: Option<&str>) -> RotationStrategy {
        match value {
            Some(v) if v.eq_ignore_ascii_case("timeBased") => RotationStrategy::TimeBased,
            _ => RotationStrategy::SizeBased,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rotation {
    pub strategy: RotationStrategy,
    pub period: Option<String>,
    pub max_size: Option<i64>,
    pub max_indices: Option<i32>,
}

impl Rotation {
    pub fn size_based() -> Rotation {
        Rotation {
            strategy: RotationStrategy::SizeBased,
            period: None,
            max_size: None,
            max_indices: None,
        }
    }

    pub fn monthly(max_indices: i32) -> Rotation {
        Rotation {
            strategy: RotationStrategy::TimeBased,
            period: Some("P1M".to_string()),
            max_size: None,
            max_indices: Some(max_indices),
        }
    }
}

pub const DEFAULT_MAX_SIZE: i64 = 1_073_741_824;
pub const DEFAULT_MAX_INDICES: i32 = 20;
const DEFAULT_ROTATION_PERIOD: &str = "P1D";

fn index_prefix(title: &str) -> String {
    match title {
        DEFAULT_INDEX_SET => "graylog".to_string(),
        "Kubernetes events index set" => "k8s_events".to_string(),
        "Ingress-nginx index set" => "nginx".to_string(),
        other => other
            .trim_end_matches(" index set")
            .to_lowercase()
            .replace(' ', "_"),
    }
}

pub fn index_set(title: &str, rotation: &Rotation, shards: i32, replicas: i32) -> Value {
    let (rotation_class, rotation_config) = match rotation.strategy {
        RotationStrategy::SizeBased => (
            "org.graylog2.indexer.rotation.strategies.SizeBasedRotationStrategy",
            json!({
                "type": "org.graylog2.indexer.rotation.strategies.SizeBasedRotationStrategyConfig",
                "max_size": rotation.max_size.unwrap_or(DEFAULT_MAX_SIZE),
            }),
        ),
        RotationStrategy::TimeBased => (
            "org.graylog2.indexer.rotation.strategies.TimeBasedRotationStrategy",
            json!({
                "type": "org.graylog2.indexer.rotation.strategies.TimeBasedRotationStrategyConfig",
                "rotation_period": rotation.period.as_deref().unwrap_or(DEFAULT_ROTATION_PERIOD),
            }),
        ),
    };
    json!({
        "title": title,
        "description": format!("{} managed by the logging operator", title),
        "index_prefix": index_prefix(title),
        "shards": shards,
        "replicas": replicas,
        "rotation_strategy_class": rotation_class,
        "rotation_strategy": rotation_config,
        "retention_strategy_class": "org.graylog2.indexer.retention.strategies.DeletionRetentionStrategy",
        "retention_strategy": {
            "type": "org.graylog2.indexer.retention.strategies.DeletionRetentionStrategyConfig",
            "max_number_of_indices": rotation.max_indices.unwrap_or(DEFAULT_MAX_INDICES),
        },
        "index_analyzer": "standard",
        "index_optimization_max_num_segments": 1,
        "index_optimization_disabled": false,
        "field_type_refresh_interval": 5000,
        "writable": true,
        "default": title == DEFAULT_INDEX_SET,
    })
}

pub fn input_title(port: i32) -> String {
    format!("input-{}", port)
}

pub fn input(port: i32) -> Value {
    json!({
        "title": input_title(port),
        "type": "org.graylog2.inputs.gelf.tcp.GELFTCPInput",
        "global": true,
        "configuration": {
            "bind_address": "0.0.0.0",
            "port": port,
            "recv_buffer_size": 1_048_576,
            "number_worker_threads": 2,
            "max_message_size": 2_097_152,
            "decompress_size_limit": 8_388_608,
            "tcp_keepalive": false,
            "use_null_delimiter": true,
            "tls_enable": false,
        },
    })
}

fn json_extractor_config(branch: VersionBranch, key_prefix: &str) -> Value {
    match branch {
        VersionBranch::V4 => json!({
            "flatten": false,
            "list_separator": ", ",
            "kv_separator": "=",
            "key_separator": "_",
        }),
        VersionBranch::V5 => json!({
            "flatten": false,
            "list_separator": ", ",
            "kv_separator": "=",
            "key_separator": "_",
            "key_prefix": key_prefix,
            "replace_key_whitespace": false,
            "key_whitespace_replacement": "_",
        }),
    }
}

fn json_extractor(branch: VersionBranch, title: &str, source: &str, key_prefix: &str, order: i32) -> Value {
    json!({
        "title": title,
        "cut_or_copy": "copy",
        "source_field": source,
        "target_field": "",
        "extractor_type": "json",
        "extractor_config": json_extractor_config(branch, key_prefix),
        "converters": {},
        "condition_type": "none",
        "condition_value": "",
        "order": order,
    })
}

/// Extractors attached to the default input, keyed by title.
pub fn extractors(branch: VersionBranch) -> Vec<(&'static str, Value)> {
    let date_converter = match branch {
        VersionBranch::V4 => json!({ "date": { "date_format": "yyyy-MM-dd'T'HH:mm:ss.SSSZ", "time_zone": "Etc/UTC" } }),
        VersionBranch::V5 => json!({ "date": { "date_format": "yyyy-MM-dd'T'HH:mm:ss.SSSZ", "time_zone": "Etc/UTC", "locale": "en" } }),
    };
    vec![
        (
            "replace_timestamp",
            json!({
                "title": "replace_timestamp",
                "cut_or_copy": "copy",
                "source_field": "time",
                "target_field": "timestamp",
                "extractor_type": "regex",
                "extractor_config": { "regex_value": "^(.+)$" },
                "converters": date_converter,
                "condition_type": "regex",
                "condition_value": "^.+$",
                "order": 0,
            }),
        ),
        ("kuber_extractor", json_extractor(branch, "kuber_extractor", "kubernetes", "", 1)),
        (
            "kuber_labels_extractor",
            json_extractor(branch, "kuber_labels_extractor", "kubernetes_labels", "labels_", 2),
        ),
        ("docker_extractor", json_extractor(branch, "docker_extractor", "docker", "", 3)),
        (
            "Microservice Framework Backend",
            json!({
                "title": "Microservice Framework Backend",
                "cut_or_copy": "copy",
                "source_field": "message",
                "target_field": "",
                "extractor_type": "grok",
                "extractor_config": { "grok_pattern": "%{MICROSERVICE_LOG}", "named_captures_only": true },
                "converters": {},
                "condition_type": "regex",
                "condition_value": "^\\[\\d{4}-",
                "order": 4,
            }),
        ),
    ]
}

/// Extractors run before the pipeline processor.
pub fn message_processors() -> Value {
    json!({
        "processor_order": [
            { "name": "AWS Instance Name Lookup", "class_name": "org.graylog.aws.processors.instancelookup.AWSInstanceNameLookupProcessor" },
            { "name": "GeoIP Resolver", "class_name": "org.graylog.plugins.map.geoip.processor.GeoIpProcessor" },
            { "name": "Message Filter Chain", "class_name": "org.graylog2.messageprocessors.MessageFilterChainProcessor" },
            { "name": "Pipeline Processor", "class_name": "org.graylog.plugins.pipelineprocessor.processors.PipelineInterpreter" },
        ],
        "disabled_processors": [
            "org.graylog.aws.processors.instancelookup.AWSInstanceNameLookupProcessor",
            "org.graylog.plugins.map.geoip.processor.GeoIpProcessor",
        ],
    })
}

pub fn content_pack() -> Value {
    json!({
        "v": "1",
        "id": CONTENT_PACK_ID,
        "rev": CONTENT_PACK_REVISION,
        "name": "Logging dashboards",
        "summary": "Dashboards of the logging stack",
        "description": "Message sources grouped by service",
        "vendor": "logging-operator",
        "url": "",
        "parameters": [],
        "entities": [{
            "v": "1",
            "type": { "name": "dashboard", "version": "2" },
            "id": "b4c8a5a0-3b7e-4a44-9d1e-2f9a3c6d8e01",
            "data": {
                "title": { "@type": "string", "@value": SOURCES_DASHBOARD },
                "summary": { "@type": "string", "@value": "Message count per service" },
                "description": { "@type": "string", "@value": "" },
                "search": {
                    "queries": [{
                        "id": "8d6f3c11-1e0a-4f52-a0f7-5a9c2b7d4e10",
                        "timerange": { "type": "relative", "range": 300 },
                        "query": { "type": "elasticsearch", "query_string": "" },
                        "search_types": [],
                    }],
                    "parameters": [],
                    "requires": {},
                },
                "state": {},
                "properties": [],
                "owner": "admin",
                "requires": {},
                "type": "DASHBOARD",
            },
            "constraints": [],
        }],
    })
}

pub fn content_pack_installation() -> Value {
    json!({ "parameters": {}, "comment": "Installed by the logging operator" })
}

/// A saved search together with the view that opens it.
pub struct SavedSearch {
    pub title: &'static str,
    pub search_id: &'static str,
    pub view_id: &'static str,
    pub query: &'static str,
}

pub const CLOUD_EVENTS: SavedSearch = SavedSearch {
    title: "Cloud events",
    search_id: "60d5a2f1c3b4e5f6a7b8c901",
    view_id: "60d5a2f1c3b4e5f6a7b8c902",
    query: "kind:KubernetesEvent",
};

pub const USER_SESSION_HISTORY: SavedSearch = SavedSearch {
    title: "User session history",
    search_id: "60d5a2f1c3b4e5f6a7b8c911",
    view_id: "60d5a2f1c3b4e5f6a7b8c912",
    query: "message:(login OR logout OR session)",
};

impl SavedSearch {
    pub fn search(&self, stream_ids: &[&str]) -> Value {
        let filters: Vec<Value> = stream_ids
            .iter()
            .map(|id| json!({ "type": "stream", "id": id }))
            .collect();
        json!({
            "id": self.search_id,
            "queries": [{
                "id": format!("{}-query", self.search_id),
                "query": { "type": "elasticsearch", "query_string": self.query },
                "timerange": { "type": "relative", "range": 3600 },
                "filter": { "type": "or", "filters": filters },
                "search_types": [],
            }],
            "parameters": [],
        })
    }

    pub fn view(&self) -> Value {
        json!({
            "id": self.view_id,
            "type": "SEARCH",
            "title": self.title,
            "summary": "",
            "description": format!("{} saved by the logging operator", self.title),
            "search_id": self.search_id,
            "properties": [],
            "requires": {},
            "state": {},
            "owner": "admin",
        })
    }
}

/// Stream and dashboard ids a role grants read access to.
pub struct RoleGrants<'a> {
    pub streams: Vec<&'a str>,
    pub dashboard: &'a str,
}

pub fn role(name: &str, description: &str, grants: &RoleGrants<'_>) -> Value {
    let mut permissions: Vec<String> = grants
        .streams
        .iter()
        .map(|id| format!("streams:read:{}", id))
        .collect();
    permissions.push(format!("dashboards:read:{}", grants.dashboard));
    permissions.push(format!("view:read:{}", grants.dashboard));
    for permission in [
        "searches:relative",
        "searches:absolute",
        "searches:keyword",
        "savedsearches:read",
        "savedsearches:create",
        "metrics:read",
    ] {
        permissions.push(permission.to_string());
    }
    json!({
        "name": name,
        "description": description,
        "permissions": permissions,
        "read_only": false,
    })
}

pub struct UserDef {
    pub username: &'static str,
    pub full_name: &'static str,
    pub roles: &'static [&'static str],
}

pub const USERS: [UserDef; 3] = [
    UserDef {
        username: "operator",
        full_name: "Logs Operator",
        roles: &["operator", "Reader"],
    },
    UserDef {
        username: "auditViewer",
        full_name: "Audit Viewer",
        roles: &["AuditViewer", "Reader"],
    },
    UserDef {
        username: "graylog_api_th_user",
        full_name: "Admin With Trusted Header",
        roles: &["Admin"],
    },
];

impl UserDef {
    pub fn body(&self, password: &str) -> Value {
        let (first, last) = self
            .full_name
            .split_once(' ')
            .unwrap_or((self.full_name, ""));
        json!({
            "username": self.username,
            "password": password,
            "email": format!("{}@logging.local", self.username),
            "first_name": first,
            "last_name": last,
            "full_name": self.full_name,
            "roles": self.roles,
            "permissions": [],
            "timezone": "UTC",
            "session_timeout_ms": 3_600_000,
        })
    }
}

pub const AUTH_PROXY_HEADER: &str = "X-Forwarded-User";

pub fn auth_header() -> Value {
    json!({ "enabled": true, "username_header": AUTH_PROXY_HEADER })
}

pub const DEFAULT_SNAPSHOT_LOCATION: &str = "/usr/share/elasticsearch/snapshots/graylog";

pub fn archive_repository(location: &str) -> Value {
    json!({
        "type": "fs",
        "settings": {
            "location": location,
            "compress": true,
        },
    })
}
