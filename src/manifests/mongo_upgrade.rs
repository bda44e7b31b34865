use crate::common::*;
use crate::loggingservice_types::*;
use crate::manifests::*;
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;

/// One job of the fixed upgrade sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub job_name: &'static str,
    pub compatibility: &'static str,
    pub image: String,
}

/// Steps in the order they must run: three intermediate majors, then the target image.
pub fn steps(graylog: &Graylog, upgrade: &MongoDbUpgrade) -> Vec<MigrationStep> {
    let images = [
        (&upgrade.mongo_db_image_40, "4.0"),
        (&upgrade.mongo_db_image_42, "4.2"),
        (&upgrade.mongo_db_image_44, "4.4"),
        (&graylog.mongo_db_image, "5.0"),
    ];
    MIGRATION_JOBS
        .iter()
        .copied()
        .zip(images)
        .map(|(job_name, (image, compatibility))| MigrationStep {
            job_name,
            compatibility,
            image: image.clone(),
        })
        .collect()
}

fn upgrade_script(compatibility: &str) -> String {
    format!(
        "mongod --dbpath /data/db --fork --logpath /tmp/mongod.log && \
         mongo --quiet --eval 'db.adminCommand({{setFeatureCompatibilityVersion: \"{}\"}})' && \
         mongod --dbpath /data/db --shutdown",
        compatibility
    )
}

pub fn job(ls: &LoggingService, graylog: &Graylog, step: &MigrationStep) -> batchv1::Job {
    let labels = Labels {
        name: step.job_name,
        component: "graylog",
        namespace: ls.metadata.namespace.as_deref().unwrap_or_default(),
        image: &step.image,
        extra: graylog.labels.as_ref(),
    };
    let mut pod_labels = labels.build();
    // Pods of every step share this label so they can be removed together.
    pod_labels.insert("name".to_string(), "mongo-upgrade-job".to_string());
    let mut pod_spec = corev1::PodSpec {
        restart_policy: Some("Never".to_string()),
        containers: vec![corev1::Container {
            name: "mongo-upgrade".to_string(),
            image: Some(step.image.clone()),
            command: Some(vec!["sh".to_string(), "-c".to_string(), upgrade_script(step.compatibility)]),
            volume_mounts: Some(vec![corev1::VolumeMount {
                name: "mongo-data".to_string(),
                mount_path: "/data/db".to_string(),
                ..corev1::VolumeMount::default()
            }]),
            ..corev1::Container::default()
        }],
        volumes: Some(vec![corev1::Volume {
            name: "mongo-data".to_string(),
            persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
                claim_name: MONGO_CLAIM_NAME.to_string(),
                ..corev1::PersistentVolumeClaimVolumeSource::default()
            }),
            ..corev1::Volume::default()
        }]),
        ..corev1::PodSpec::default()
    };
    Placement {
        node_selector_key: &graylog.node_selector_key,
        node_selector_value: &graylog.node_selector_value,
        priority_class_name: &graylog.priority_class_name,
        tolerations: None,
    }
    .apply(&mut pod_spec);
    batchv1::Job {
        metadata: object_meta(ls, step.job_name, labels.build()),
        spec: Some(batchv1::JobSpec {
            completions: Some(1),
            backoff_limit: Some(0),
            template: pod_template(pod_labels, &None::<BTreeMap<String, String>>, pod_spec),
            ..batchv1::JobSpec::default()
        }),
        ..batchv1::Job::default()
    }
}
