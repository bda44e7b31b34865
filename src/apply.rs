use crate::error::Error;
use crate::platform::*;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::ObjectMeta;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

/// Creates `desired`, or on conflict copies the owned fields onto the live
/// object and replaces it only when something changed.
pub async fn apply(platform: &dyn Platform, desired: Resource) -> Result<Applied, Error> {
    let kind = desired.kind();
    let name = desired.name();
    match platform.create(&desired).await {
        Ok(_) => {
            info!(%kind, %name, "Created");
            Ok(Applied::Created)
        }
        Err(e) if is_already_exists(&e) => {
            let live = platform
                .get(kind, &name)
                .await
                .map_err(|e| Error::GetResourceFailed(kind, name.clone(), e))?
                .ok_or_else(|| Error::ResourceNotFound(kind, name.clone()))?;
            let merged = merge(&live, &desired);
            if merged == live {
                debug!(%kind, %name, "Up to date");
                return Ok(Applied::Unchanged);
            }
            platform
                .replace(&merged)
                .await
                .map_err(|e| Error::ReplaceResourceFailed(kind, name.clone(), e))?;
            info!(%kind, %name, "Updated");
            Ok(Applied::Updated)
        }
        Err(e) => Err(Error::CreateResourceFailed(kind, name, e)),
    }
}

/// Returns whether something was actually deleted; a missing object is not an error.
pub async fn delete_if_exists(
    platform: &dyn Platform,
    kind: ResourceKind,
    name: &str,
) -> Result<bool, Error> {
    match platform.delete(kind, name).await {
        Ok(()) => {
            info!(%kind, %name, "Deleted");
            Ok(true)
        }
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(Error::DeleteResourceFailed(kind, name.to_string(), e)),
    }
}

/// Deletes every listed object. A failed delete does not stop the rest; the
/// first failure is returned once all were attempted.
pub async fn delete_all(platform: &dyn Platform, objects: &[(ResourceKind, &str)]) -> Result<(), Error> {
    let mut first_failure = None;
    for (kind, name) in objects {
        if let Err(e) = delete_if_exists(platform, *kind, name).await {
            error!(error = %e, "Uninstall step failed");
            first_failure.get_or_insert(e);
        }
    }
    first_failure.map_or(Ok(()), Err)
}

fn merge_labels(live: &mut ObjectMeta, desired: &ObjectMeta) {
    if let Some(labels) = &desired.labels {
        live.labels
            .get_or_insert_with(Default::default)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

fn merge_pod_template(live: &mut corev1::PodTemplateSpec, desired: &corev1::PodTemplateSpec) {
    if let Some(desired_meta) = &desired.metadata {
        let live_meta = live.metadata.get_or_insert_with(Default::default);
        live_meta.labels = desired_meta.labels.clone();
        live_meta.annotations = desired_meta.annotations.clone();
    }
    match (&mut live.spec, &desired.spec) {
        (Some(live_spec), Some(desired_spec)) => {
            live_spec.containers = desired_spec.containers.clone();
            live_spec.init_containers = desired_spec.init_containers.clone();
            live_spec.volumes = desired_spec.volumes.clone();
            live_spec.tolerations = desired_spec.tolerations.clone();
            live_spec.node_selector = desired_spec.node_selector.clone();
            live_spec.service_account_name = desired_spec.service_account_name.clone();
            live_spec.priority_class_name = desired_spec.priority_class_name.clone();
            live_spec.security_context = desired_spec.security_context.clone();
            live_spec.affinity = desired_spec.affinity.clone();
        }
        (live_spec, desired_spec) => *live_spec = desired_spec.clone(),
    }
}

/// The live object with every field this operator owns taken from `desired`.
pub fn merge(live: &Resource, desired: &Resource) -> Resource {
    match (live.clone(), desired) {
        (Resource::ServiceAccount(mut live), Resource::ServiceAccount(desired)) => {
            merge_labels(&mut live.metadata, &desired.metadata);
            Resource::ServiceAccount(live)
        }
        (Resource::ConfigMap(mut live), Resource::ConfigMap(desired)) => {
            merge_labels(&mut live.metadata, &desired.metadata);
            live.data = desired.data.clone();
            live.binary_data = desired.binary_data.clone();
            Resource::ConfigMap(live)
        }
        (Resource::Service(mut live), Resource::Service(desired)) => {
            merge_labels(&mut live.metadata, &desired.metadata);
            match (&mut live.spec, &desired.spec) {
                (Some(live_spec), Some(desired_spec)) => {
                    live_spec.ports = desired_spec.ports.clone();
                    live_spec.selector = desired_spec.selector.clone();
                }
                (live_spec, desired_spec) => *live_spec = desired_spec.clone(),
            }
            Resource::Service(live)
        }
        (Resource::DaemonSet(mut live), Resource::DaemonSet(desired)) => {
            merge_labels(&mut live.metadata, &desired.metadata);
            match (&mut live.spec, &desired.spec) {
                (Some(live_spec), Some(desired_spec)) => {
                    merge_pod_template(&mut live_spec.template, &desired_spec.template);
                }
                (live_spec, desired_spec) => *live_spec = desired_spec.clone(),
            }
            Resource::DaemonSet(live)
        }
        (Resource::Deployment(mut live), Resource::Deployment(desired)) => {
            merge_labels(&mut live.metadata, &desired.metadata);
            match (&mut live.spec, &desired.spec) {
                (Some(live_spec), Some(desired_spec)) => {
                    live_spec.replicas = desired_spec.replicas;
                    live_spec.selector = desired_spec.selector.clone();
                    merge_pod_template(&mut live_spec.template, &desired_spec.template);
                }
                (live_spec, desired_spec) => *live_spec = desired_spec.clone(),
            }
            Resource::Deployment(live)
        }
        (Resource::StatefulSet(mut live), Resource::StatefulSet(desired)) => {
            merge_labels(&mut live.metadata, &desired.metadata);
            match (&mut live.spec, &desired.spec) {
                (Some(live_spec), Some(desired_spec)) => {
                    live_spec.replicas = desired_spec.replicas;
                    live_spec.selector = desired_spec.selector.clone();
                    merge_pod_template(&mut live_spec.template, &desired_spec.template);
                }
                (live_spec, desired_spec) => *live_spec = desired_spec.clone(),
            }
            Resource::StatefulSet(live)
        }
        // Jobs and claims are immutable once created.
        (live, _) => live,
    }
}
