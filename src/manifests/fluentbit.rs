use crate::common::*;
use crate::loggingservice_types::*;
use crate::manifests::*;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;

pub const CONFIG_PATH: &str = "/fluent-bit/etc";
pub const HTTP_PORT: i32 = 2020;
const DEFAULT_MEM_BUF_LIMIT: &str = "5MB";

pub fn labels<'a>(ls: &'a LoggingService, fluentbit: &'a Fluentbit, name: &'a str) -> Labels<'a> {
    Labels {
        name,
        component: "fluentbit",
        namespace: ls.metadata.namespace.as_deref().unwrap_or_default(),
        image: &fluentbit.docker_image,
        extra: fluentbit.labels.as_ref(),
    }
}

pub fn service_section() -> String {
    format!(
        "[SERVICE]\n    Flush         5\n    Log_Level     info\n    Parsers_File  parsers.conf\n    HTTP_Server   On\n    HTTP_Listen   0.0.0.0\n    HTTP_Port     {}\n\n\
         @INCLUDE input-*.conf\n@INCLUDE filter-*.conf\n@INCLUDE output-*.conf\n",
        HTTP_PORT
    )
}

pub fn parsers() -> String {
    "[PARSER]\n    Name        docker\n    Format      json\n    Time_Key    time\n    Time_Format %Y-%m-%dT%H:%M:%S.%L\n    Time_Keep   On\n\n\
     [PARSER]\n    Name        cri\n    Format      regex\n    Regex       ^(?<time>[^ ]+) (?<stream>stdout|stderr) (?<logtag>[^ ]*) (?<log>.*)$\n    Time_Key    time\n    Time_Format %Y-%m-%dT%H:%M:%S.%L%z\n\n\
     [PARSER]\n    Name        syslog\n    Format      regex\n    Regex       ^(?<time>[^ ]* {1,2}[^ ]* [^ ]*) (?<host>[^ ]*) (?<ident>[a-zA-Z0-9_\\/\\.\\-]*)(?:\\[(?<pid>[0-9]+)\\])?(?:[^\\:]*\\:)? *(?<message>.*)$\n    Time_Key    time\n    Time_Format %b %d %H:%M:%S\n"
        .to_string()
}

pub fn container_input(
    runtime: &ContainerRuntime,
    exclude_path: &Option<String>,
    mem_buf_limit: &Option<String>,
) -> String {
    let mut section = format!(
        "[INPUT]\n    Name              tail\n    Tag               kube.*\n    Path              /var/log/containers/*.log\n    Parser            {}\n    DB                /var/log/flb_kube.db\n    Mem_Buf_Limit     {}\n    Skip_Long_Lines   On\n    Refresh_Interval  10\n",
        runtime.log_parser(),
        mem_buf_limit.as_deref().unwrap_or(DEFAULT_MEM_BUF_LIMIT)
    );
    if let Some(exclude) = exclude_path.as_ref().filter(|e| !e.trim().is_empty()) {
        section.push_str(&format!("    Exclude_Path      {}\n", exclude.trim()));
    }
    section.push_str(
        "\n[FILTER]\n    Name                kubernetes\n    Match               kube.*\n    Merge_Log           On\n    Keep_Log            Off\n    K8S-Logging.Parser  On\n",
    );
    section
}

pub fn system_input(source: SystemLogSource) -> String {
    match source.file() {
        Some(file) => format!(
            "[INPUT]\n    Name    tail\n    Tag     system\n    Path    {}\n    Parser  syslog\n    DB      /var/log/flb_system.db\n",
            file
        ),
        None => "[INPUT]\n    Name            systemd\n    Tag             system\n    Path            /var/log/journal\n    DB              /var/log/flb_journal.db\n    Read_From_Tail  On\n".to_string(),
    }
}

pub fn extra_fields_filter(extra: &BTreeMap<String, String>) -> String {
    let records: String = extra
        .iter()
        .map(|(k, v)| format!("    Record  {} {}\n", k, v))
        .collect();
    format!("[FILTER]\n    Name    record_modifier\n    Match   *\n{}", records)
}

pub fn gelf_output(target: &GelfTarget) -> String {
    format!(
        "[OUTPUT]\n    Name                    gelf\n    Match                   *\n    Host                    {}\n    Port                    {}\n    Mode                    {}\n    Gelf_Short_Message_Key  log\n    Retry_Limit             False\n",
        target.host, target.port, target.protocol
    )
}

/// Configuration shared by the plain daemon set and the forwarder: inputs and filters
/// of the node, without any output.
pub fn node_config(fluentbit: &Fluentbit, runtime: &ContainerRuntime) -> BTreeMap<String, String> {
    let mut data = BTreeMap::from([
        ("fluent-bit.conf".to_string(), service_section()),
        ("parsers.conf".to_string(), parsers()),
    ]);
    if fluentbit.container_logging {
        data.insert(
            "input-containers.conf".to_string(),
            container_input(runtime, &fluentbit.exclude_path, &fluentbit.mem_buf_limit),
        );
    }
    if fluentbit.system_logging {
        data.insert(
            "input-system.conf".to_string(),
            system_input(SystemLogSource::from_type(&fluentbit.system_log_type)),
        );
    }
    if let Some(extra) = fluentbit.extra_fields.as_ref().filter(|e| !e.is_empty()) {
        data.insert("filter-extra-fields.conf".to_string(), extra_fields_filter(extra));
    }
    data.insert(
        "input-custom.conf".to_string(),
        fluentbit.custom_input_conf.clone().unwrap_or_default(),
    );
    data.insert(
        "filter-custom.conf".to_string(),
        fluentbit.custom_filter_conf.clone().unwrap_or_default(),
    );
    data
}

pub fn render_config(
    namespace: &str,
    fluentbit: &Fluentbit,
    runtime: &ContainerRuntime,
) -> BTreeMap<String, String> {
    let mut data = node_config(fluentbit, runtime);
    if fluentbit.graylog_output {
        let target = GelfTarget::resolve(
            namespace,
            &fluentbit.graylog_host,
            fluentbit.graylog_port,
            &fluentbit.graylog_protocol,
        );
        data.insert("output-graylog.conf".to_string(), gelf_output(&target));
    }
    data.insert(
        "output-custom.conf".to_string(),
        fluentbit.custom_output_conf.clone().unwrap_or_default(),
    );
    data
}

pub fn config_map(ls: &LoggingService, fluentbit: &Fluentbit, runtime: &ContainerRuntime) -> corev1::ConfigMap {
    let namespace = ls.metadata.namespace.as_deref().unwrap_or_default();
    crate::manifests::config_map(
        ls,
        FLUENTBIT_NAME,
        &labels(ls, fluentbit, FLUENTBIT_NAME),
        render_config(namespace, fluentbit, runtime),
    )
}

/// Pod settings of a node-level Fluent Bit daemon set called `name`.
pub fn shipper<'a>(
    fluentbit: &'a Fluentbit,
    name: &'static str,
    runtime: &'a ContainerRuntime,
) -> Shipper<'a> {
    Shipper {
        container_name: name,
        image: &fluentbit.docker_image,
        name,
        config_path: CONFIG_PATH,
        runtime,
        privileged: fluentbit.security_context_privileged,
        resources: &fluentbit.resources,
        additional_volumes: &fluentbit.additional_volumes,
        additional_volume_mounts: &fluentbit.additional_volume_mounts,
        port: Port {
            name: "http",
            port: HTTP_PORT,
            protocol: "TCP",
        },
        placement: Placement {
            node_selector_key: &fluentbit.node_selector_key,
            node_selector_value: &fluentbit.node_selector_value,
            priority_class_name: &fluentbit.priority_class_name,
            tolerations: fluentbit.tolerations.as_ref(),
        },
    }
}

pub fn daemon_set(ls: &LoggingService, fluentbit: &Fluentbit, runtime: &ContainerRuntime) -> appsv1::DaemonSet {
    crate::manifests::daemon_set(
        ls,
        FLUENTBIT_NAME,
        &labels(ls, fluentbit, FLUENTBIT_NAME),
        &fluentbit.annotations,
        shipper(fluentbit, FLUENTBIT_NAME, runtime).pod_spec(),
    )
}

pub fn service(ls: &LoggingService, fluentbit: &Fluentbit) -> corev1::Service {
    crate::manifests::service(
        ls,
        FLUENTBIT_NAME,
        &labels(ls, fluentbit, FLUENTBIT_NAME),
        &[Port {
            name: "http",
            port: HTTP_PORT,
            protocol: "TCP",
        }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn fluentbit() -> Fluentbit {
        Fluentbit {
            docker_image: "fluent/fluent-bit:2.2.0".to_string(),
            container_logging: true,
            graylog_output: true,
            graylog_host: Some("graylog.example".to_string()),
            graylog_port: Some(12201),
            exclude_path: Some("/var/log/containers/noisy*.log".to_string()),
            ..Fluentbit::default()
        }
    }

    #[test]
    fn test_config_uses_runtime_parser() {
        let data = render_config("logging", &fluentbit(), &ContainerRuntime::from_name("cri-o"));
        let input = &data["input-containers.conf"];
        assert!(input.contains("Parser            cri\n"));
        assert!(input.contains("Exclude_Path      /var/log/containers/noisy*.log\n"));
        assert!(input.contains("Mem_Buf_Limit     5MB\n"));
        assert!(data["output-graylog.conf"].contains("Host                    graylog.example\n"));
        assert!(data["fluent-bit.conf"].contains("HTTP_Port     2020"));
    }

    #[test]
    fn test_node_config_has_no_output() {
        let data = node_config(&fluentbit(), &ContainerRuntime::Docker);
        assert!(data.keys().all(|k| !k.starts_with("output-")));
    }

    #[test]
    fn test_daemon_set_uses_cri_paths() {
        let ls = logging_service(LoggingServiceSpec::default());
        let ds = daemon_set(&ls, &fluentbit(), &ContainerRuntime::from_name("containerd"));
        assert_eq!(ds.metadata.name.as_deref(), Some(FLUENTBIT_NAME));
        let pod = ds.spec.unwrap().template.spec.unwrap();
        let mounts = pod.containers[0].volume_mounts.clone().unwrap();
        assert!(mounts.iter().any(|m| m.mount_path == "/var/log/pods" && m.read_only == Some(true)));
        assert!(mounts.iter().any(|m| m.mount_path == "/var/log" && m.read_only == Some(false)));
    }
}
