use anyhow::Result;
use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        controller::{self, Controller},
        reflector::{self, reflector, ObjectRef},
        watcher::{self, watcher},
        WatchStreamExt,
    },
    Client, CustomResourceExt,
};
use logging_operator::config::{OperatorConfig, Timings};
use logging_operator::controller::{error_policy, reconcile, triggers, Data, Operator};
use logging_operator::graylog::HttpConnectorFactory;
use logging_operator::loggingservice_types::LoggingService;
use logging_operator::waiter::TcpProbe;
use logging_operator::Error;
use std::{env, sync::Arc};
use tracing::*;
use tracing_subscriber::EnvFilter;

fn report_controller_reconciled(
    controller_name: &str,
    result: &Result<(ObjectRef<LoggingService>, controller::Action), controller::Error<Error, watcher::Error>>,
) {
    match result {
        Ok((obj, _)) => {
            info!(
                controller.name = controller_name,
                object = %obj,
                "Reconciled object"
            );
        }
        Err(err) => {
            warn!(
                controller.name = controller_name,
                error = err as &dyn std::error::Error,
                "Failed to reconcile object"
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).cloned().unwrap_or_default();
    if cmd == "export" {
        info!("exporting custom resource definition");
        println!("{}", serde_yaml::to_string(&LoggingService::crd())?);
    } else if cmd == "run" {
        info!("running logging-operator");
        let config = OperatorConfig::from_env()?;
        let timings = Timings::default();
        let client = Client::try_default().await?;
        let services = match &config.watch_namespace {
            Some(ns) => {
                info!(namespace = %ns, "Watching a single namespace");
                Api::<LoggingService>::namespaced(client.clone(), ns)
            }
            None => Api::<LoggingService>::all(client.clone()),
        };
        let factory = HttpConnectorFactory::new(&config, timings.http_timeout);
        let operator = Operator::new(config, timings, Box::new(factory), Box::new(TcpProbe));

        let (reader, writer) = reflector::store();
        let events = reflector(writer, watcher(services, watcher::Config::default())).default_backoff();
        Controller::for_stream(triggers(events), reader)
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::new(Data { client, operator }))
            .for_each(|res| async move { report_controller_reconciled("logging-operator", &res) })
            .await;
        info!("controller terminated");
    } else {
        warn!("wrong command; please use \"export\" or \"run\"");
    }
    Ok(())
}
