use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{api::Api, discovery::Discovery, Client};
use logging_operator::common::*;
use logging_operator::loggingservice_types::LoggingService;
use std::time::Duration;

use crate::common::*;

const NAMESPACE: &str = "default";
const TIMEOUT: Duration = Duration::from_secs(360);

pub fn logging_service() -> String {
    "
    apiVersion: logging.qubership.org/v1alpha1
    kind: LoggingService
    metadata:
        name: logging-service
        namespace: default
    spec:
        fluentbit:
            dockerImage: fluent/fluent-bit:3.0.7
            containerLogging: true
            systemLogging: false
            graylogOutput: false
            tolerations:
                - operator: Exists
        cloudEventsReader:
            install: true
            dockerImage: ghcr.io/netcracker/qubership-kube-events-reader:main
    "
    .to_string()
}

fn daemon_set_ready(ds: &DaemonSet) -> bool {
    match &ds.status {
        Some(status) => {
            status.desired_number_scheduled > 0
                && status.number_available == Some(status.desired_number_scheduled)
                && status.updated_number_scheduled == Some(status.desired_number_scheduled)
        }
        None => false,
    }
}

fn cycle_succeeded(ls: &LoggingService) -> bool {
    ls.status
        .as_ref()
        .map(|s| {
            s.conditions
                .iter()
                .any(|c| c.reason == CYCLE_STATUS && c.type_ == "Successful")
        })
        .unwrap_or(false)
}

pub async fn desired_state_test(client: Client) -> Result<(), Error> {
    let ds_api: Api<DaemonSet> = Api::namespaced(client.clone(), NAMESPACE);
    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), NAMESPACE);
    let cm_api: Api<ConfigMap> = Api::namespaced(client.clone(), NAMESPACE);
    let svc_api: Api<Service> = Api::namespaced(client.clone(), NAMESPACE);
    let ls_api: Api<LoggingService> = Api::namespaced(client.clone(), NAMESPACE);
    let (ds_api, deploy_api, cm_api, svc_api, ls_api) = (&ds_api, &deploy_api, &cm_api, &svc_api, &ls_api);

    wait_until("fluent bit rollout", TIMEOUT, move || async move {
        cm_api.get(FLUENTBIT_NAME).await.map_err(|e| e.to_string())?;
        svc_api.get(FLUENTBIT_NAME).await.map_err(|e| e.to_string())?;
        let ds = ds_api.get(FLUENTBIT_NAME).await.map_err(|e| e.to_string())?;
        Ok(daemon_set_ready(&ds))
    })
    .await?;

    wait_until("events reader rollout", TIMEOUT, move || async move {
        let deploy = deploy_api.get(EVENTS_READER_NAME).await.map_err(|e| e.to_string())?;
        Ok(deploy.status.and_then(|s| s.available_replicas).unwrap_or(0) > 0)
    })
    .await?;

    wait_until("successful cycle condition", TIMEOUT, move || async move {
        let ls = ls_api.get("logging-service").await.map_err(|e| e.to_string())?;
        Ok(cycle_succeeded(&ls))
    })
    .await?;

    println!("Desired state test passed.");
    Ok(())
}

pub async fn relabel_test(client: Client) -> Result<(), Error> {
    let ds_api: Api<DaemonSet> = Api::namespaced(client.clone(), NAMESPACE);
    let ds_api = &ds_api;
    run_command(
        "kubectl",
        vec![
            "patch",
            "ls",
            "logging-service",
            "--type=merge",
            "-p",
            "{\"spec\": {\"fluentbit\": {\"labels\": {\"key\": \"val\"}}}}",
        ],
    )?;

    wait_until("fluent bit relabel", TIMEOUT, move || async move {
        let ds = ds_api.get(FLUENTBIT_NAME).await.map_err(|e| e.to_string())?;
        let relabeled = ds
            .spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.labels.as_ref())
            .map(|l| l.get("key").map(String::as_str) == Some("val"))
            .unwrap_or(false);
        Ok(relabeled && daemon_set_ready(&ds))
    })
    .await?;

    println!("Relabel test passed.");
    Ok(())
}

pub async fn removal_test(client: Client) -> Result<(), Error> {
    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), NAMESPACE);
    let deploy_api = &deploy_api;
    run_command(
        "kubectl",
        vec![
            "patch",
            "ls",
            "logging-service",
            "--type=merge",
            "-p",
            "{\"spec\": {\"cloudEventsReader\": {\"install\": false}}}",
        ],
    )?;

    wait_until("events reader removal", TIMEOUT, move || async move {
        Ok(deploy_api
            .get_opt(EVENTS_READER_NAME)
            .await
            .map_err(|e| e.to_string())?
            .is_none())
    })
    .await?;

    println!("Removal test passed.");
    Ok(())
}

pub async fn logging_e2e_test() -> Result<(), Error> {
    // check if the CRD is already registered
    let client = Client::try_default().await?;
    let crd_api: Api<CustomResourceDefinition> = Api::all(client.clone());
    match crd_api.get("loggingservices.logging.qubership.org").await {
        Err(e) => {
            println!("No CRD found, create one before run the e2e test.");
            return Err(Error::CRDGetFailed(e));
        }
        Ok(_) => {
            println!("CRD found, continue to run the e2e test.");
        }
    }

    let discovery = Discovery::new(client.clone()).run().await?;
    apply(logging_service(), client.clone(), &discovery).await?;

    desired_state_test(client.clone()).await?;
    relabel_test(client.clone()).await?;
    removal_test(client.clone()).await?;

    println!("E2e test passed.");
    Ok(())
}
