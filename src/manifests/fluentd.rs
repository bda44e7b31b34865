use crate::common::*;
use crate::loggingservice_types::*;
use crate::manifests::*;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;

const CONFIG_PATH: &str = "/fluentd/etc/conf.d";
const METRICS_PORT: i32 = 24231;

pub fn labels<'a>(ls: &'a LoggingService, fluentd: &'a Fluentd) -> Labels<'a> {
    Labels {
        name: FLUENTD_NAME,
        component: "fluentd",
        namespace: ls.metadata.namespace.as_deref().unwrap_or_default(),
        image: &fluentd.docker_image,
        extra: fluentd.labels.as_ref(),
    }
}

fn container_input(fluentd: &Fluentd, runtime: &ContainerRuntime) -> String {
    let exclude = if fluentd.exclude_path.is_empty() {
        String::new()
    } else {
        let quoted: Vec<String> = fluentd.exclude_path.iter().map(|p| format!("\"{}\"", p)).collect();
        format!("  exclude_path [{}]\n", quoted.join(", "))
    };
    let parse = match runtime {
        ContainerRuntime::Docker => "  <parse>\n    @type json\n    time_key time\n    time_format %Y-%m-%dT%H:%M:%S.%NZ\n  </parse>\n",
        ContainerRuntime::Cri(_) => "  <parse>\n    @type cri\n  </parse>\n",
    };
    format!(
        "<source>\n  @type tail\n  @id in_tail_container_logs\n  path /var/log/containers/*.log\n{}  pos_file /var/log/fluentd-containers.log.pos\n  tag kubernetes.*\n  read_from_head true\n{}</source>\n\n\
         <filter kubernetes.**>\n  @type kubernetes_metadata\n</filter>\n",
        exclude, parse
    )
}

fn system_input(source: SystemLogSource) -> String {
    match source.file() {
        Some(file) => format!(
            "<source>\n  @type tail\n  @id in_tail_system_logs\n  path {}\n  pos_file /var/log/fluentd-system.log.pos\n  tag system\n  <parse>\n    @type syslog\n  </parse>\n</source>\n",
            file
        ),
        None => "<source>\n  @type systemd\n  @id in_systemd_journal\n  path /var/log/journal\n  tag system\n  read_from_head true\n  <storage>\n    @type local\n    path /var/log/fluentd-journald.pos.json\n  </storage>\n</source>\n".to_string(),
    }
}

fn extra_fields_filter(extra: &BTreeMap<String, String>) -> String {
    let records: String = extra
        .iter()
        .map(|(k, v)| format!("    {} {}\n", k, v))
        .collect();
    format!(
        "<filter **>\n  @type record_transformer\n  <record>\n{}  </record>\n</filter>\n",
        records
    )
}

fn gelf_output(target: &GelfTarget) -> String {
    format!(
        "<match **>\n  @type gelf\n  host {}\n  port {}\n  protocol {}\n  <buffer>\n    flush_interval 5s\n    retry_forever true\n  </buffer>\n</match>\n",
        target.host, target.port, target.protocol
    )
}

/// Every configuration file of the daemon set, keyed by file name.
pub fn render_config(
    namespace: &str,
    fluentd: &Fluentd,
    runtime: &ContainerRuntime,
) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert(
        "fluent.conf".to_string(),
        format!(
            "@include {dir}/input-*.conf\n@include {dir}/filter-*.conf\n@include {dir}/output-*.conf\n",
            dir = CONFIG_PATH
        ),
    );
    if fluentd.container_logging {
        data.insert("input-containers.conf".to_string(), container_input(fluentd, runtime));
    }
    if fluentd.system_logging {
        data.insert(
            "input-system.conf".to_string(),
            system_input(SystemLogSource::from_type(&fluentd.system_log_type)),
        );
    }
    if let Some(extra) = fluentd.extra_fields.as_ref().filter(|e| !e.is_empty()) {
        data.insert("filter-extra-fields.conf".to_string(), extra_fields_filter(extra));
    }
    if fluentd.graylog_output {
        let target = GelfTarget::resolve(
            namespace,
            &fluentd.graylog_host,
            fluentd.graylog_port,
            &fluentd.graylog_protocol,
        );
        data.insert("output-graylog.conf".to_string(), gelf_output(&target));
    }
    data.insert(
        "input-custom.conf".to_string(),
        fluentd.custom_input_conf.clone().unwrap_or_default(),
    );
    data.insert(
        "filter-custom.conf".to_string(),
        fluentd.custom_filter_conf.clone().unwrap_or_default(),
    );
    data.insert(
        "output-custom.conf".to_string(),
        fluentd.custom_output_conf.clone().unwrap_or_default(),
    );
    data
}

pub fn config_map(ls: &LoggingService, fluentd: &Fluentd, runtime: &ContainerRuntime) -> corev1::ConfigMap {
    let namespace = ls.metadata.namespace.as_deref().unwrap_or_default();
    crate::manifests::config_map(
        ls,
        FLUENTD_NAME,
        &labels(ls, fluentd),
        render_config(namespace, fluentd, runtime),
    )
}

pub fn daemon_set(ls: &LoggingService, fluentd: &Fluentd, runtime: &ContainerRuntime) -> appsv1::DaemonSet {
    let shipper = Shipper {
        container_name: FLUENTD_NAME,
        image: &fluentd.docker_image,
        name: FLUENTD_NAME,
        config_path: CONFIG_PATH,
        runtime,
        privileged: fluentd.security_context_privileged,
        resources: &fluentd.resources,
        additional_volumes: &fluentd.additional_volumes,
        additional_volume_mounts: &fluentd.additional_volume_mounts,
        port: Port {
            name: "metrics",
            port: METRICS_PORT,
            protocol: "TCP",
        },
        placement: Placement {
            node_selector_key: &fluentd.node_selector_key,
            node_selector_value: &fluentd.node_selector_value,
            priority_class_name: &fluentd.priority_class_name,
            tolerations: fluentd.tolerations.as_ref(),
        },
    };
    crate::manifests::daemon_set(
        ls,
        FLUENTD_NAME,
        &labels(ls, fluentd),
        &fluentd.annotations,
        shipper.pod_spec(),
    )
}

pub fn service(ls: &LoggingService, fluentd: &Fluentd) -> corev1::Service {
    crate::manifests::service(
        ls,
        FLUENTD_NAME,
        &labels(ls, fluentd),
        &[Port {
            name: "metrics",
            port: METRICS_PORT,
            protocol: "TCP",
        }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn fluentd() -> Fluentd {
        Fluentd {
            docker_image: "fluentd:1.16.2".to_string(),
            container_logging: true,
            system_logging: true,
            graylog_output: true,
            exclude_path: vec!["/var/log/containers/noisy*.log".to_string()],
            ..Fluentd::default()
        }
    }

    #[test]
    fn test_config_follows_runtime_parser() {
        let cri = render_config("logging", &fluentd(), &ContainerRuntime::from_name("containerd"));
        assert!(cri["input-containers.conf"].contains("@type cri"));
        assert!(cri["input-containers.conf"].contains("exclude_path [\"/var/log/containers/noisy*.log\"]"));
        let docker = render_config("logging", &fluentd(), &ContainerRuntime::Docker);
        assert!(docker["input-containers.conf"].contains("@type json"));
    }

    #[test]
    fn test_config_outputs_and_system_logs() {
        let mut spec = fluentd();
        spec.system_log_type = Some("systemd".to_string());
        spec.extra_fields = Some(BTreeMap::from([("cluster".to_string(), "prod".to_string())]));
        let data = render_config("logging", &spec, &ContainerRuntime::Docker);
        assert!(data["input-system.conf"].contains("@type systemd"));
        assert!(data["filter-extra-fields.conf"].contains("    cluster prod\n"));
        assert!(data["output-graylog.conf"].contains("host graylog-service.logging.svc"));
        assert_eq!(data["output-custom.conf"], "");

        spec.graylog_output = false;
        spec.system_logging = false;
        let data = render_config("logging", &spec, &ContainerRuntime::Docker);
        assert!(!data.contains_key("output-graylog.conf"));
        assert!(!data.contains_key("input-system.conf"));
    }

    #[test]
    fn test_daemon_set_mounts_and_placement() {
        let mut spec = fluentd();
        spec.security_context_privileged = true;
        spec.node_selector_key = Some("role".to_string());
        spec.node_selector_value = Some("logging".to_string());
        spec.additional_volumes = Some(vec![corev1::Volume {
            name: "extra".to_string(),
            ..corev1::Volume::default()
        }]);
        let ls = logging_service(LoggingServiceSpec::default());
        let ds = daemon_set(&ls, &spec, &ContainerRuntime::Docker);
        let pod = ds.spec.unwrap().template.spec.unwrap();
        let volumes: Vec<String> = pod.volumes.unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(volumes, vec!["config", "varlog", "docker-containers", "extra"]);
        let container = &pod.containers[0];
        assert_eq!(container.security_context.as_ref().unwrap().privileged, Some(true));
        assert_eq!(container.env.as_ref().unwrap()[0].name, "NODE_NAME");
        assert_eq!(pod.node_selector.unwrap()["role"], "logging");
    }
}
