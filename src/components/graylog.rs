use super::Cycle;
use crate::apply::{delete_all, delete_if_exists};
use crate::common::*;
use crate::config::Timings;
use crate::credentials::admin_auth;
use crate::error::Error;
use crate::graylog::{synchronize, Plan, Session};
use crate::loggingservice_types::*;
use crate::manifests::graylog as manifests;
use crate::migration;
use crate::platform::*;
use crate::secret_watcher::{read_credentials, KnownCredentials};
use crate::waiter::{delete_pods_and_wait, wait_for_host, wait_for_workload};
use k8s_openapi::api::core::v1 as corev1;
use tracing::*;

/// Credentials from the Graylog secret, falling back to the operator
/// environment. The secret error wins when neither is usable.
fn credentials(
    cycle: &Cycle<'_>,
    graylog: &Graylog,
    secret: Option<&corev1::Secret>,
) -> Result<KnownCredentials, Error> {
    let namespace = cycle.platform.namespace();
    let from_secret = match secret {
        Some(secret) => read_credentials(secret, namespace),
        None => Err(Error::CredentialResolveFailed(format!(
            "secret {} not found in namespace {}",
            graylog.graylog_secret_name, namespace
        ))),
    };
    match (from_secret, &cycle.config.graylog_username, &cycle.config.graylog_password) {
        (Ok(known), _, _) => Ok(known),
        (Err(e), Some(user), Some(password)) => {
            warn!(error = %e, "Using Graylog credentials from the environment");
            Ok(KnownCredentials {
                user: user.clone(),
                password: password.clone(),
            })
        }
        (Err(e), _, _) => Err(e),
    }
}

async fn remove_legacy_deployment(cycle: &Cycle<'_>) -> Result<(), Error> {
    let platform = cycle.platform.as_ref();
    if delete_if_exists(platform, ResourceKind::Deployment, GRAYLOG_NAME).await? {
        info!("Removed legacy Graylog deployment, waiting for its pods");
        let gone = delete_pods_and_wait(
            platform,
            LEGACY_GRAYLOG_POD_SELECTOR,
            cycle.timings.interval,
            cycle.timings.terminating_pod_timeout,
        )
        .await?;
        if !gone {
            warn!("Legacy Graylog pods are still terminating");
        }
    }
    Ok(())
}

async fn configure(cycle: &Cycle<'_>, graylog: &Graylog, known: &KnownCredentials) -> Result<(), Error> {
    let Some(policy) = graylog.sync_policy() else {
        info!("Content deploy policy is skip, Graylog configuration left untouched");
        return Ok(());
    };
    let auth = admin_auth(Some((known.user.as_str(), known.password.as_str())), cycle.config)?;
    let conn = cycle
        .factory
        .connect(cycle.platform.clone(), graylog, &auth)
        .await?;
    let plan = Plan::new(
        graylog,
        policy,
        &known.password,
        &cycle.config.work_dir,
        conn.search.as_ref().map(|s| s.host.as_str()),
    );
    let session = Session {
        plan: &plan,
        graylog: conn.graylog.as_ref(),
        search: conn.search.as_ref().map(|s| s.api.as_ref()),
        content: conn.content.as_ref(),
        platform: cycle.platform.as_ref(),
    };
    synchronize(&session).await
}

pub async fn run(cycle: &mut Cycle<'_>, graylog: &Graylog) -> Result<(), Error> {
    let ls = cycle.ls;
    let secret_name = graylog.graylog_secret_name.as_str();
    let secret = cycle
        .platform
        .get_secret(secret_name)
        .await
        .map_err(|e| Error::GetSecretFailed(secret_name.to_string(), e))?;
    let known = credentials(cycle, graylog, secret.as_ref())?;

    let search_url = graylog
        .open_search
        .as_ref()
        .map(|s| s.url.as_str())
        .filter(|url| !url.is_empty())
        .or(cycle.config.elasticsearch_host.as_deref());
    cycle
        .apply(Resource::ServiceAccount(manifests::service_account(ls, graylog)))
        .await?;
    cycle
        .apply(Resource::ConfigMap(manifests::config_map(
            ls,
            graylog,
            &known.user,
            &known.password,
            search_url,
        )))
        .await?;
    remove_legacy_deployment(cycle).await?;

    match migration::required(graylog) {
        Some(upgrade) => {
            let platform = cycle.platform.clone();
            if let Err(e) =
                migration::run(platform.as_ref(), &mut cycle.status, ls, graylog, upgrade, cycle.timings).await
            {
                error!(error = %e, "MongoDB upgrade failed");
            }
        }
        None => migration::cleanup(cycle.platform.as_ref()).await?,
    }

    cycle
        .apply(Resource::StatefulSet(manifests::stateful_set(ls, graylog)))
        .await?;
    let timeout = Timings::startup_timeout(cycle.timings.graylog_startup_timeout, graylog.startup_timeout);
    let started = wait_for_workload(
        cycle.platform.as_ref(),
        ResourceKind::StatefulSet,
        GRAYLOG_NAME,
        cycle.timings.interval,
        timeout,
    )
    .await?;
    if !started {
        return Err(Error::NotStarted(GRAYLOG_NAME.to_string()));
    }
    cycle
        .apply(Resource::Service(manifests::service(ls, graylog)))
        .await?;
    wait_for_host(
        cycle.probe,
        &graylog_host(cycle.platform.namespace()),
        GRAYLOG_HTTP_PORT,
        cycle.timings.host_attempts,
        cycle.timings.http_timeout,
        cycle.timings.host_retry_delay,
    )
    .await?;

    configure(cycle, graylog, &known).await?;

    if let Some(secret) = &secret {
        cycle
            .watchers
            .ensure(&cycle.owner(), cycle.platform.clone(), secret, known);
    }
    cycle.status.remove(GRAYLOG_STATUS).await;
    Ok(())
}

pub async fn uninstall(cycle: &mut Cycle<'_>) -> Result<(), Error> {
    let platform = cycle.platform.as_ref();
    let deleted = delete_all(
        platform,
        &[
            (ResourceKind::PersistentVolumeClaim, GRAYLOG_CLAIM_NAME),
            (ResourceKind::PersistentVolumeClaim, MONGO_CLAIM_NAME),
            (ResourceKind::StatefulSet, GRAYLOG_NAME),
            (ResourceKind::Service, GRAYLOG_SERVICE_NAME),
            (ResourceKind::ConfigMap, GRAYLOG_SERVICE_NAME),
            (ResourceKind::ServiceAccount, GRAYLOG_SERVICE_ACCOUNT_NAME),
        ],
    )
    .await;
    let cleaned = migration::cleanup(platform).await;
    cycle.watchers.stop(&cycle.owner());
    deleted.and(cleaned)
}
