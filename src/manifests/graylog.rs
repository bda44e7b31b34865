use crate::common::*;
use crate::loggingservice_types::*;
use crate::manifests::*;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const CONFIG_DIR: &str = "/usr/share/graylog/data/config";
const INIT_CONTAINER_NAME: &str = "download-plugins";

/// Hex SHA-256, the form Graylog expects for `root_password_sha2`.
pub fn password_sha2(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

pub fn labels<'a>(ls: &'a LoggingService, graylog: &'a Graylog) -> Labels<'a> {
    Labels {
        name: GRAYLOG_NAME,
        component: "graylog",
        namespace: ls.metadata.namespace.as_deref().unwrap_or_default(),
        image: &graylog.docker_image,
        extra: graylog.labels.as_ref(),
    }
}

pub fn service_account(ls: &LoggingService, graylog: &Graylog) -> corev1::ServiceAccount {
    crate::manifests::service_account(ls, GRAYLOG_SERVICE_ACCOUNT_NAME, &labels(ls, graylog))
}

/// Renders `graylog.conf`. `search_url` is the index backend the server writes to.
pub fn render_config(
    ls: &LoggingService,
    graylog: &Graylog,
    user: &str,
    password: &str,
    search_url: Option<&str>,
) -> String {
    let uid = ls.metadata.uid.as_deref().unwrap_or_default();
    let mut lines = vec![
        "is_leader = true".to_string(),
        format!("node_id_file = {}/node-id", CONFIG_DIR),
        format!(
            "password_secret = {}",
            password_sha2(&format!("{}:{}", GRAYLOG_NAME, uid))
        ),
        format!("{} = {}", GRAYLOG_USER_FIELD, user),
        format!("{} = {}", GRAYLOG_PASSWORD_FIELD, password_sha2(password)),
        "root_timezone = UTC".to_string(),
        "bin_dir = /usr/share/graylog/bin".to_string(),
        "data_dir = /usr/share/graylog/data".to_string(),
        "plugin_dir = /usr/share/graylog/plugin".to_string(),
        format!("http_bind_address = 0.0.0.0:{}", GRAYLOG_HTTP_PORT),
    ];
    if !graylog.host.trim().is_empty() {
        lines.push(format!("http_external_uri = {}/", graylog.host.trim_end_matches('/')));
    }
    match graylog.http_tls() {
        Some(_) => {
            lines.push("http_enable_tls = true".to_string());
            lines.push(format!("http_tls_cert_file = {}/tls/tls.crt", CONFIG_DIR));
            lines.push(format!("http_tls_key_file = {}/tls/tls.key", CONFIG_DIR));
        }
        None => lines.push("http_enable_tls = false".to_string()),
    }
    if let Some(url) = search_url {
        lines.push(format!("elasticsearch_hosts = {}", url));
    }
    lines.extend([
        "rotation_strategy = size".to_string(),
        format!(
            "elasticsearch_max_size_per_index = {}",
            graylog.max_size.unwrap_or(1_073_741_824)
        ),
        format!(
            "elasticsearch_max_number_of_indices = {}",
            graylog.max_number_of_indices.unwrap_or(20)
        ),
        format!("elasticsearch_shards = {}", graylog.index_shards.unwrap_or(1)),
        format!("elasticsearch_replicas = {}", graylog.index_replicas.unwrap_or(0)),
        "allow_leading_wildcard_searches = true".to_string(),
        "mongodb_uri = mongodb://localhost:27017/graylog".to_string(),
        "message_journal_enabled = true".to_string(),
        "message_journal_dir = /usr/share/graylog/data/journal".to_string(),
    ]);
    if graylog.auth_proxy_enabled() {
        lines.push("trusted_proxies = 127.0.0.1/32".to_string());
    }
    lines.join("\n") + "\n"
}

pub fn config_map(
    ls: &LoggingService,
    graylog: &Graylog,
    user: &str,
    password: &str,
    search_url: Option<&str>,
) -> corev1::ConfigMap {
    let data = BTreeMap::from([(
        GRAYLOG_CONFIG_FILE.to_string(),
        render_config(ls, graylog, user, password, search_url),
    )]);
    crate::manifests::config_map(ls, GRAYLOG_SERVICE_NAME, &labels(ls, graylog), data)
}

fn claim_volume(name: &str, claim: &str) -> corev1::Volume {
    corev1::Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            ..corev1::PersistentVolumeClaimVolumeSource::default()
        }),
        ..corev1::Volume::default()
    }
}

fn mount(name: &str, path: &str) -> corev1::VolumeMount {
    corev1::VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..corev1::VolumeMount::default()
    }
}

fn tls_volume(tls: &HttpGraylogTls) -> Option<corev1::Volume> {
    let secret_name = match (&tls.cert, &tls.generate_certs) {
        (_, Some(generated)) if generated.enabled => generated.secret_name.clone(),
        (Some(cert), _) => cert.secret_name.clone(),
        _ => return None,
    };
    Some(corev1::Volume {
        name: "graylog-tls".to_string(),
        secret: Some(corev1::SecretVolumeSource {
            secret_name: Some(secret_name),
            ..corev1::SecretVolumeSource::default()
        }),
        ..corev1::Volume::default()
    })
}

fn graylog_container(graylog: &Graylog) -> corev1::Container {
    let scheme = if graylog.http_tls().is_some() { "HTTPS" } else { "HTTP" };
    let mut env_vars = vec![env("GRAYLOG_SERVER_JAVA_OPTS", graylog.java_opts.as_deref().unwrap_or("-Xms1g -Xmx1g"))];
    if let Some(level) = &graylog.log_level {
        env_vars.push(env("GRAYLOG_LOG_LEVEL", level));
    }
    let mut mounts = vec![
        mount("config", CONFIG_DIR),
        mount("graylog-data", "/usr/share/graylog/data/journal"),
    ];
    if graylog.http_tls().and_then(tls_volume).is_some() {
        mounts.push(mount("graylog-tls", &format!("{}/tls", CONFIG_DIR)));
    }
    corev1::Container {
        name: "graylog".to_string(),
        image: Some(graylog.docker_image.clone()),
        env: Some(env_vars),
        ports: Some(vec![
            corev1::ContainerPort {
                name: Some("http".to_string()),
                container_port: GRAYLOG_HTTP_PORT,
                ..corev1::ContainerPort::default()
            },
            corev1::ContainerPort {
                name: Some("input".to_string()),
                container_port: graylog.input_port,
                ..corev1::ContainerPort::default()
            },
        ]),
        readiness_probe: Some(corev1::Probe {
            http_get: Some(corev1::HTTPGetAction {
                path: Some("/api/system/lbstatus".to_string()),
                port: IntOrString::Int(GRAYLOG_HTTP_PORT),
                scheme: Some(scheme.to_string()),
                ..corev1::HTTPGetAction::default()
            }),
            initial_delay_seconds: Some(30),
            period_seconds: Some(10),
            ..corev1::Probe::default()
        }),
        resources: graylog.graylog_resources.clone(),
        volume_mounts: Some(mounts),
        ..corev1::Container::default()
    }
}

fn mongo_container(graylog: &Graylog) -> corev1::Container {
    corev1::Container {
        name: "mongo".to_string(),
        image: Some(graylog.mongo_db_image.clone()),
        ports: Some(vec![corev1::ContainerPort {
            name: Some("mongo".to_string()),
            container_port: 27017,
            ..corev1::ContainerPort::default()
        }]),
        resources: graylog.mongo_resources.clone(),
        volume_mounts: Some(vec![mount("mongo-data", "/data/db")]),
        ..corev1::Container::default()
    }
}

fn auth_proxy_container(proxy: &AuthProxy) -> corev1::Container {
    corev1::Container {
        name: "auth-proxy".to_string(),
        image: Some(proxy.image.clone()),
        ports: Some(vec![corev1::ContainerPort {
            name: Some("auth-proxy".to_string()),
            container_port: 8888,
            ..corev1::ContainerPort::default()
        }]),
        ..corev1::Container::default()
    }
}

pub fn stateful_set(ls: &LoggingService, graylog: &Graylog) -> appsv1::StatefulSet {
    let labels = labels(ls, graylog);
    let version = VersionBranch::from_image(&graylog.docker_image);
    let init_image = graylog
        .init_container_docker_image
        .clone()
        .unwrap_or_else(|| graylog.docker_image.clone());
    let mut init_containers = vec![corev1::Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(init_image),
        env: Some(vec![env("GRAYLOG_VERSION", version.major())]),
        volume_mounts: Some(vec![mount("graylog-data", "/usr/share/graylog/data/journal")]),
        ..corev1::Container::default()
    }];
    if let Some(image) = &graylog.init_setup_image {
        init_containers.push(corev1::Container {
            name: "init-setup".to_string(),
            image: Some(image.clone()),
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "chown -R 1100:1100 /usr/share/graylog/data/journal".to_string(),
            ]),
            volume_mounts: Some(vec![mount("graylog-data", "/usr/share/graylog/data/journal")]),
            ..corev1::Container::default()
        });
    }
    let mut containers = vec![graylog_container(graylog), mongo_container(graylog)];
    if let Some(proxy) = graylog.auth_proxy.as_ref().filter(|p| p.install) {
        containers.push(auth_proxy_container(proxy));
    }
    let (config, _) = config_volume("config", GRAYLOG_SERVICE_NAME, CONFIG_DIR);
    let mut volumes = vec![
        config,
        claim_volume("graylog-data", GRAYLOG_CLAIM_NAME),
        claim_volume("mongo-data", MONGO_CLAIM_NAME),
    ];
    if let Some(tls) = graylog.http_tls().and_then(tls_volume) {
        volumes.push(tls);
    }
    let mut pod_spec = corev1::PodSpec {
        service_account_name: Some(GRAYLOG_SERVICE_ACCOUNT_NAME.to_string()),
        security_context: Some(corev1::PodSecurityContext {
            fs_group: Some(1100),
            run_as_user: Some(1100),
            ..corev1::PodSecurityContext::default()
        }),
        init_containers: Some(init_containers),
        containers,
        volumes: Some(volumes),
        ..corev1::PodSpec::default()
    };
    Placement {
        node_selector_key: &graylog.node_selector_key,
        node_selector_value: &graylog.node_selector_value,
        priority_class_name: &graylog.priority_class_name,
        tolerations: None,
    }
    .apply(&mut pod_spec);
    appsv1::StatefulSet {
        metadata: with_annotations(object_meta(ls, GRAYLOG_NAME, labels.build()), &graylog.annotations),
        spec: Some(appsv1::StatefulSetSpec {
            replicas: Some(1),
            service_name: GRAYLOG_SERVICE_NAME.to_string(),
            selector: label_selector(labels.selector()),
            template: pod_template(labels.build(), &graylog.annotations, pod_spec),
            ..appsv1::StatefulSetSpec::default()
        }),
        ..appsv1::StatefulSet::default()
    }
}

pub fn service(ls: &LoggingService, graylog: &Graylog) -> corev1::Service {
    let mut ports = vec![
        Port {
            name: "http",
            port: GRAYLOG_HTTP_PORT,
            protocol: "TCP",
        },
        Port {
            name: "input",
            port: graylog.input_port,
            protocol: "TCP",
        },
    ];
    if graylog.auth_proxy_enabled() {
        ports.push(Port {
            name: "auth-proxy",
            port: 8888,
            protocol: "TCP",
        });
    }
    crate::manifests::service(ls, GRAYLOG_SERVICE_NAME, &labels(ls, graylog), &ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn test_password_sha2() {
        assert_eq!(
            password_sha2("admin"),
            "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918"
        );
    }

    #[test]
    fn test_config_contains_credentials() {
        let graylog = graylog_spec();
        let ls = logging_service(LoggingServiceSpec::default());
        let conf = render_config(&ls, &graylog, "admin", "admin", Some("http://opensearch:9200"));
        assert!(conf.contains("root_username = admin\n"));
        assert!(conf.contains(&format!("root_password_sha2 = {}\n", password_sha2("admin"))));
        assert!(conf.contains("elasticsearch_hosts = http://opensearch:9200\n"));
        assert!(conf.contains("http_enable_tls = false\n"));
    }

    #[test]
    fn test_statefulset_passes_version_to_init_container() {
        let mut graylog = graylog_spec();
        graylog.labels = Some(BTreeMap::from([("team".to_string(), "obs".to_string())]));
        graylog.priority_class_name = Some(" high ".to_string());
        let ls = logging_service(LoggingServiceSpec::default());
        let sts = stateful_set(&ls, &graylog);
        assert_eq!(sts.metadata.owner_references.as_ref().map(|o| o.len()), Some(1));
        let labels = sts.metadata.labels.clone().unwrap();
        assert_eq!(labels["team"], "obs");
        assert_eq!(labels["app.kubernetes.io/version"], "5.2.3");
        assert_eq!(labels["app.kubernetes.io/instance"], "graylog-logging");
        let pod = sts.spec.unwrap().template.spec.unwrap();
        let init = &pod.init_containers.unwrap()[0];
        assert_eq!(init.name, "download-plugins");
        assert_eq!(init.env.as_ref().unwrap()[0].value.as_deref(), Some("5"));
        assert_eq!(pod.priority_class_name.as_deref(), Some("high"));
        assert_eq!(pod.containers.len(), 2);
    }

    #[test]
    fn test_auth_proxy_adds_sidecar_and_port() {
        let mut graylog = graylog_spec();
        graylog.auth_proxy = Some(AuthProxy {
            install: true,
            image: "auth-proxy:1.0".to_string(),
        });
        let ls = logging_service(LoggingServiceSpec::default());
        let sts = stateful_set(&ls, &graylog);
        assert_eq!(sts.spec.unwrap().template.spec.unwrap().containers.len(), 3);
        let svc = service(&ls, &graylog);
        assert_eq!(svc.spec.unwrap().ports.unwrap().len(), 3);
    }
}
