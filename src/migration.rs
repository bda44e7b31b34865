use crate::apply::delete_if_exists;
use crate::common::*;
use crate::config::Timings;
use crate::error::Error;
use crate::loggingservice_types::*;
use crate::manifests::mongo_upgrade::{self, MigrationStep};
use crate::platform::*;
use crate::status::StatusUpdater;
use crate::waiter::{delete_pods_and_wait, wait_for_workload};
use tokio::time::sleep;
use tracing::*;

/// The upgrade path to follow this cycle, if any: an upgrade is configured and the
/// desired Graylog is a 5.x release.
pub fn required<'a>(graylog: &'a Graylog) -> Option<&'a MongoDbUpgrade> {
    match &graylog.mongo_db_upgrade {
        Some(upgrade) if VersionBranch::from_image(&graylog.docker_image) == VersionBranch::V5 => {
            Some(upgrade)
        }
        _ => None,
    }
}

/// Scales Graylog down, then runs every step strictly in order. The first step
/// that does not succeed within its timeout stops the sequence.
pub async fn run(
    platform: &dyn Platform,
    status: &mut StatusUpdater,
    ls: &LoggingService,
    graylog: &Graylog,
    upgrade: &MongoDbUpgrade,
    timings: &Timings,
) -> Result<(), Error> {
    scale_down(platform, status, graylog, timings).await?;
    for step in mongo_upgrade::steps(graylog, upgrade) {
        run_step(platform, status, ls, graylog, &step, timings).await?;
    }
    info!("MongoDB upgrade finished");
    Ok(())
}

async fn scale_down(
    platform: &dyn Platform,
    status: &mut StatusUpdater,
    graylog: &Graylog,
    timings: &Timings,
) -> Result<(), Error> {
    let kind = ResourceKind::StatefulSet;
    let live = platform
        .get(kind, GRAYLOG_NAME)
        .await
        .map_err(|e| Error::GetResourceFailed(kind, GRAYLOG_NAME.to_string(), e))?;
    let mut sts = match live {
        Some(Resource::StatefulSet(sts)) => sts,
        _ => {
            debug!("Graylog StatefulSet does not exist, nothing to scale down");
            return Ok(());
        }
    };
    info!("Scaling Graylog down before the MongoDB upgrade");
    if let Some(spec) = sts.spec.as_mut() {
        spec.replicas = Some(0);
    }
    platform
        .replace(&Resource::StatefulSet(sts))
        .await
        .map_err(|e| Error::ReplaceResourceFailed(kind, GRAYLOG_NAME.to_string(), e))?;
    sleep(timings.initial_delay).await;
    let timeout = Timings::startup_timeout(timings.graylog_startup_timeout, graylog.startup_timeout);
    if !wait_for_workload(platform, kind, GRAYLOG_NAME, timings.interval, timeout).await? {
        status.fail(GRAYLOG_STATUS, "Graylog has not scaled down").await;
        return Err(Error::NotScaledDown);
    }
    Ok(())
}

async fn run_step(
    platform: &dyn Platform,
    status: &mut StatusUpdater,
    ls: &LoggingService,
    graylog: &Graylog,
    step: &MigrationStep,
    timings: &Timings,
) -> Result<(), Error> {
    let job = Resource::Job(mongo_upgrade::job(ls, graylog, step));
    match platform.create(&job).await {
        Ok(_) => info!(job = step.job_name, "Submitted MongoDB upgrade job"),
        Err(e) if is_already_exists(&e) => {
            info!(job = step.job_name, "MongoDB upgrade job already exists")
        }
        Err(e) => {
            return Err(Error::CreateResourceFailed(
                ResourceKind::Job,
                step.job_name.to_string(),
                e,
            ))
        }
    }
    sleep(timings.initial_delay).await;
    let succeeded = wait_for_workload(
        platform,
        ResourceKind::Job,
        step.job_name,
        timings.interval,
        timings.migration_job_timeout,
    )
    .await?;
    if !succeeded {
        status.fail(GRAYLOG_STATUS, "Job failed").await;
        return Err(Error::MigrationJobFailed(step.job_name.to_string()));
    }
    delete_pods_and_wait(
        platform,
        MIGRATION_POD_SELECTOR,
        timings.interval,
        timings.terminating_pod_timeout,
    )
    .await?;
    Ok(())
}

/// Removes the jobs of every step; used whenever no upgrade is wanted.
pub async fn cleanup(platform: &dyn Platform) -> Result<(), Error> {
    for job in MIGRATION_JOBS {
        delete_if_exists(platform, ResourceKind::Job, job).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use k8s_openapi::api::apps::v1 as appsv1;
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    fn upgrade() -> MongoDbUpgrade {
        MongoDbUpgrade {
            mongo_db_image_40: "mongo:4.0".to_string(),
            mongo_db_image_42: "mongo:4.2".to_string(),
            mongo_db_image_44: "mongo:4.4".to_string(),
        }
    }

    fn graylog_statefulset(replicas: i32) -> Resource {
        Resource::StatefulSet(appsv1::StatefulSet {
            metadata: ObjectMeta {
                name: Some(GRAYLOG_NAME.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(appsv1::StatefulSetSpec {
                replicas: Some(replicas),
                ..appsv1::StatefulSetSpec::default()
            }),
            status: Some(appsv1::StatefulSetStatus {
                replicas,
                ready_replicas: Some(replicas),
                ..appsv1::StatefulSetStatus::default()
            }),
        })
    }

    fn job_calls(platform: &FakePlatform) -> Vec<Call> {
        platform
            .calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::DeletePod(_)))
            .collect()
    }

    #[test]
    fn test_required_only_for_graylog_5() {
        let mut graylog = graylog_spec();
        assert!(required(&graylog).is_none());
        graylog.mongo_db_upgrade = Some(upgrade());
        assert!(required(&graylog).is_some());
        graylog.docker_image = "graylog/graylog:4.3.9".to_string();
        assert!(required(&graylog).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order_after_scale_down() {
        let platform = Arc::new(FakePlatform::new());
        platform.insert(graylog_statefulset(1));
        platform.add_pod("mongo-upgrade-job-40-x1", &[("name", "mongo-upgrade-job")]);
        let ls = logging_service(LoggingServiceSpec::default());
        let mut status = StatusUpdater::new(platform.clone(), &ls);
        let graylog = graylog_spec();
        run(platform.as_ref(), &mut status, &ls, &graylog, &upgrade(), &Timings::default())
            .await
            .unwrap();
        let mut expected = vec![Call::Replace(ResourceKind::StatefulSet, GRAYLOG_NAME.to_string())];
        expected.extend(
            MIGRATION_JOBS
                .iter()
                .map(|j| Call::Create(ResourceKind::Job, j.to_string())),
        );
        assert_eq!(job_calls(&platform), expected);
        assert!(platform.calls().contains(&Call::DeletePod("mongo-upgrade-job-40-x1".to_string())));
        match platform.object(ResourceKind::StatefulSet, GRAYLOG_NAME) {
            Some(Resource::StatefulSet(sts)) => assert_eq!(sts.spec.unwrap().replicas, Some(0)),
            other => panic!("unexpected object {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_step_stops_the_sequence() {
        let platform = Arc::new(FakePlatform::new());
        platform
            .state
            .lock()
            .unwrap()
            .stuck_jobs
            .insert("mongo-upgrade-job-42".to_string());
        let ls = logging_service(LoggingServiceSpec::default());
        let mut status = StatusUpdater::new(platform.clone(), &ls);
        let result = run(
            platform.as_ref(),
            &mut status,
            &ls,
            &graylog_spec(),
            &upgrade(),
            &Timings::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::MigrationJobFailed(ref job)) if job == "mongo-upgrade-job-42"));
        assert_eq!(
            job_calls(&platform),
            vec![
                Call::Create(ResourceKind::Job, "mongo-upgrade-job-40".to_string()),
                Call::Create(ResourceKind::Job, "mongo-upgrade-job-42".to_string()),
            ]
        );
        let condition = platform.condition(GRAYLOG_STATUS).unwrap();
        assert_eq!((condition.type_.as_str(), condition.message.as_str()), ("Failed", "Job failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_job_is_accepted() {
        let platform = Arc::new(FakePlatform::new());
        let ls = logging_service(LoggingServiceSpec::default());
        let graylog = graylog_spec();
        let first = &mongo_upgrade::steps(&graylog, &upgrade())[0];
        let mut done = mongo_upgrade::job(&ls, &graylog, first);
        done.status = Some(k8s_openapi::api::batch::v1::JobStatus {
            active: Some(0),
            succeeded: Some(1),
            ..Default::default()
        });
        platform.insert(Resource::Job(done));
        let mut status = StatusUpdater::new(platform.clone(), &ls);
        run(platform.as_ref(), &mut status, &ls, &graylog, &upgrade(), &Timings::default())
            .await
            .unwrap();
        assert_eq!(platform.writes_of(ResourceKind::Job).len(), 3);
    }

    #[tokio::test]
    async fn test_cleanup_removes_all_jobs() {
        let platform = FakePlatform::new();
        let ls = logging_service(LoggingServiceSpec::default());
        let graylog = graylog_spec();
        for step in mongo_upgrade::steps(&graylog, &upgrade()).iter().take(2) {
            platform.insert(Resource::Job(mongo_upgrade::job(&ls, &graylog, step)));
        }
        cleanup(&platform).await.unwrap();
        assert_eq!(
            platform.calls(),
            vec![
                Call::Delete(ResourceKind::Job, "mongo-upgrade-job-40".to_string()),
                Call::Delete(ResourceKind::Job, "mongo-upgrade-job-42".to_string()),
            ]
        );
    }
}
