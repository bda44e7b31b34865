use crate::error::Error;
use crate::platform::*;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::batch::v1 as batchv1;
#[cfg(test)]
use mockall::automock;
use std::future::Future;
use tokio::time::{sleep, Duration, Instant};
use tracing::*;

/// Runs `check` right away and then every `interval` until it reports true
/// or `timeout` elapses. Elapsing is reported as `Ok(false)`.
pub async fn poll_until<F, Fut>(interval: Duration, timeout: Duration, mut check: F) -> Result<bool, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        sleep(interval.min(deadline - now)).await;
    }
}

pub fn statefulset_synced(sts: &appsv1::StatefulSet) -> bool {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    match &sts.status {
        Some(status) => status.replicas == desired && status.ready_replicas.unwrap_or(0) == desired,
        None => desired == 0,
    }
}

pub fn daemonset_available(ds: &appsv1::DaemonSet) -> bool {
    match &ds.status {
        Some(status) => {
            status.updated_number_scheduled.unwrap_or(0) == status.desired_number_scheduled
                && status.number_available.unwrap_or(0) == status.desired_number_scheduled
        }
        None => false,
    }
}

pub fn deployment_synced(deploy: &appsv1::Deployment) -> bool {
    let desired = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    match &deploy.status {
        Some(status) => {
            status.available_replicas.unwrap_or(0) == desired
                && status.updated_replicas.unwrap_or(0) == desired
        }
        None => false,
    }
}

pub fn job_succeeded(job: &batchv1::Job) -> bool {
    let completions = job.spec.as_ref().and_then(|s| s.completions).unwrap_or(1);
    match &job.status {
        Some(status) => status.active.unwrap_or(0) == 0 && status.succeeded.unwrap_or(0) == completions,
        None => false,
    }
}

/// Fetches a workload and reports whether it is ready. A missing workload is an error.
pub async fn check_workload(
    platform: &dyn Platform,
    kind: ResourceKind,
    name: &str,
) -> Result<bool, Error> {
    let workload = platform
        .get(kind, name)
        .await
        .map_err(|e| Error::GetResourceFailed(kind, name.to_string(), e))?
        .ok_or_else(|| Error::ResourceNotFound(kind, name.to_string()))?;
    let ready = match &workload {
        Resource::StatefulSet(sts) => statefulset_synced(sts),
        Resource::DaemonSet(ds) => daemonset_available(ds),
        Resource::Deployment(deploy) => deployment_synced(deploy),
        Resource::Job(job) => job_succeeded(job),
        _ => true,
    };
    debug!(%kind, %name, ready, "Checked workload");
    Ok(ready)
}

pub async fn wait_for_workload(
    platform: &dyn Platform,
    kind: ResourceKind,
    name: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<bool, Error> {
    info!(%kind, %name, ?timeout, "Waiting for workload");
    let started = Instant::now();
    let ready = poll_until(interval, timeout, || check_workload(platform, kind, name)).await?;
    if ready {
        info!(%kind, %name, elapsed = ?started.elapsed(), "Workload is ready");
    }
    Ok(ready)
}

/// Deletes every pod matching `selector` and waits until none of them is listed any more.
pub async fn delete_pods_and_wait(
    platform: &dyn Platform,
    selector: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<bool, Error> {
    let pods = platform
        .list_pods(selector)
        .await
        .map_err(Error::ListPodsFailed)?;
    let names: Vec<String> = pods.iter().filter_map(|p| p.metadata.name.clone()).collect();
    for name in &names {
        match platform.delete_pod(name).await {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(Error::DeletePodFailed(name.clone(), e)),
        }
    }
    if names.is_empty() {
        return Ok(true);
    }
    info!(pods = ?names, "Waiting for pods to terminate");
    let terminated = poll_until(interval, timeout, || async {
        let remaining = platform
            .list_pods(selector)
            .await
            .map_err(Error::ListPodsFailed)?;
        Ok(!remaining
            .iter()
            .any(|p| p.metadata.name.as_ref().map(|n| names.contains(n)).unwrap_or(false)))
    })
    .await?;
    if terminated {
        info!(pods = ?names, "Pods terminated");
    }
    Ok(terminated)
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn connect(&self, address: &str, timeout: Duration) -> Result<(), std::io::Error>;
}

pub struct TcpProbe;

#[async_trait]
impl HostProbe for TcpProbe {
    async fn connect(&self, address: &str, timeout: Duration) -> Result<(), std::io::Error> {
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address)).await {
            Ok(stream) => stream.map(|_| ()),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connection timed out",
            )),
        }
    }
}

/// Tries `attempts` TCP connections `delay` apart; the last failure is returned.
pub async fn wait_for_host(
    probe: &dyn HostProbe,
    host: &str,
    port: i32,
    attempts: u32,
    connect_timeout: Duration,
    delay: Duration,
) -> Result<(), Error> {
    let address = format!("{}:{}", host, port);
    let mut last = std::io::Error::new(std::io::ErrorKind::Other, "no connection attempt");
    for _ in 0..attempts {
        match probe.connect(&address, connect_timeout).await {
            Ok(()) => {
                info!(%address, "Host is active");
                return Ok(());
            }
            Err(e) => {
                info!(%address, error = %e, "Host is unreachable");
                last = e;
                sleep(delay).await;
            }
        }
    }
    Err(Error::HostUnreachable(address, last))
}
