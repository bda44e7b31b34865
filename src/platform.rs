use crate::loggingservice_types::*;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    runtime::{watcher, WatchStreamExt},
    Client,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::fmt;

pub type SecretEvents = BoxStream<'static, Result<watcher::Event<corev1::Secret>, watcher::Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    ServiceAccount,
    ConfigMap,
    Service,
    DaemonSet,
    Deployment,
    StatefulSet,
    Job,
    PersistentVolumeClaim,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Service => "Service",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::Job => "Job",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
        };
        f.write_str(kind)
    }
}

/// Every namespaced object kind the components create or remove.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    ServiceAccount(corev1::ServiceAccount),
    ConfigMap(corev1::ConfigMap),
    Service(corev1::Service),
    DaemonSet(appsv1::DaemonSet),
    Deployment(appsv1::Deployment),
    StatefulSet(appsv1::StatefulSet),
    Job(batchv1::Job),
    PersistentVolumeClaim(corev1::PersistentVolumeClaim),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::ServiceAccount(_) => ResourceKind::ServiceAccount,
            Resource::ConfigMap(_) => ResourceKind::ConfigMap,
            Resource::Service(_) => ResourceKind::Service,
            Resource::DaemonSet(_) => ResourceKind::DaemonSet,
            Resource::Deployment(_) => ResourceKind::Deployment,
            Resource::StatefulSet(_) => ResourceKind::StatefulSet,
            Resource::Job(_) => ResourceKind::Job,
            Resource::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Resource::ServiceAccount(o) => &o.metadata,
            Resource::ConfigMap(o) => &o.metadata,
            Resource::Service(o) => &o.metadata,
            Resource::DaemonSet(o) => &o.metadata,
            Resource::Deployment(o) => &o.metadata,
            Resource::StatefulSet(o) => &o.metadata,
            Resource::Job(o) => &o.metadata,
            Resource::PersistentVolumeClaim(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }
}

/// Namespaced access to the cluster for one reconcile cycle.
///
/// Errors are handed back untouched so that callers can branch on the
/// `AlreadyExists` and `NotFound` reasons.
#[async_trait]
pub trait Platform: Send + Sync {
    fn namespace(&self) -> &str;
    async fn create(&self, resource: &Resource) -> Result<Resource, kube::Error>;
    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<Resource>, kube::Error>;
    async fn replace(&self, resource: &Resource) -> Result<Resource, kube::Error>;
    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<(), kube::Error>;
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<corev1::Pod>, kube::Error>;
    async fn delete_pod(&self, name: &str) -> Result<(), kube::Error>;
    async fn get_secret(&self, name: &str) -> Result<Option<corev1::Secret>, kube::Error>;
    async fn list_nodes(&self) -> Result<Vec<corev1::Node>, kube::Error>;
    async fn patch_status(
        &self,
        name: &str,
        status: &LoggingServiceStatus,
    ) -> Result<(), kube::Error>;
    fn watch_secrets(&self, label_selector: &str) -> SecretEvents;
}

pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(kube_core::ErrorResponse { reason, .. }) if reason == "AlreadyExists")
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(kube_core::ErrorResponse { reason, .. }) if reason == "NotFound")
}

#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
    namespace: String,
}

impl KubePlatform {
    pub fn new(client: Client, namespace: &str) -> Self {
        KubePlatform {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn get_typed<K>(&self, name: &str) -> Result<Option<K>, kube::Error>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        self.api::<K>().get_opt(name).await
    }

    async fn create_typed<K>(&self, obj: &K) -> Result<K, kube::Error>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + fmt::Debug,
    {
        self.api::<K>().create(&PostParams::default(), obj).await
    }

    async fn replace_typed<K>(&self, obj: &K) -> Result<K, kube::Error>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + fmt::Debug,
    {
        let name = kube::Resource::meta(obj).name.clone().unwrap_or_default();
        self.api::<K>()
            .replace(&name, &PostParams::default(), obj)
            .await
    }

    async fn delete_typed<K>(&self, name: &str) -> Result<(), kube::Error>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        self.api::<K>()
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Platform for KubePlatform {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, kube::Error> {
        Ok(match resource {
            Resource::ServiceAccount(o) => Resource::ServiceAccount(self.create_typed(o).await?),
            Resource::ConfigMap(o) => Resource::ConfigMap(self.create_typed(o).await?),
            Resource::Service(o) => Resource::Service(self.create_typed(o).await?),
            Resource::DaemonSet(o) => Resource::DaemonSet(self.create_typed(o).await?),
            Resource::Deployment(o) => Resource::Deployment(self.create_typed(o).await?),
            Resource::StatefulSet(o) => Resource::StatefulSet(self.create_typed(o).await?),
            Resource::Job(o) => Resource::Job(self.create_typed(o).await?),
            Resource::PersistentVolumeClaim(o) => {
                Resource::PersistentVolumeClaim(self.create_typed(o).await?)
            }
        })
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<Resource>, kube::Error> {
        Ok(match kind {
            ResourceKind::ServiceAccount => self
                .get_typed::<corev1::ServiceAccount>(name)
                .await?
                .map(Resource::ServiceAccount),
            ResourceKind::ConfigMap => self
                .get_typed::<corev1::ConfigMap>(name)
                .await?
                .map(Resource::ConfigMap),
            ResourceKind::Service => self
                .get_typed::<corev1::Service>(name)
                .await?
                .map(Resource::Service),
            ResourceKind::DaemonSet => self
                .get_typed::<appsv1::DaemonSet>(name)
                .await?
                .map(Resource::DaemonSet),
            ResourceKind::Deployment => self
                .get_typed::<appsv1::Deployment>(name)
                .await?
                .map(Resource::Deployment),
            ResourceKind::StatefulSet => self
                .get_typed::<appsv1::StatefulSet>(name)
                .await?
                .map(Resource::StatefulSet),
            ResourceKind::Job => self
                .get_typed::<batchv1::Job>(name)
                .await?
                .map(Resource::Job),
            ResourceKind::PersistentVolumeClaim => self
                .get_typed::<corev1::PersistentVolumeClaim>(name)
                .await?
                .map(Resource::PersistentVolumeClaim),
        })
    }

    async fn replace(&self, resource: &Resource) -> Result<Resource, kube::Error> {
        Ok(match resource {
            Resource::ServiceAccount(o) => Resource::ServiceAccount(self.replace_typed(o).await?),
            Resource::ConfigMap(o) => Resource::ConfigMap(self.replace_typed(o).await?),
            Resource::Service(o) => Resource::Service(self.replace_typed(o).await?),
            Resource::DaemonSet(o) => Resource::DaemonSet(self.replace_typed(o).await?),
            Resource::Deployment(o) => Resource::Deployment(self.replace_typed(o).await?),
            Resource::StatefulSet(o) => Resource::StatefulSet(self.replace_typed(o).await?),
            Resource::Job(o) => Resource::Job(self.replace_typed(o).await?),
            Resource::PersistentVolumeClaim(o) => {
                Resource::PersistentVolumeClaim(self.replace_typed(o).await?)
            }
        })
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<(), kube::Error> {
        match kind {
            ResourceKind::ServiceAccount => self.delete_typed::<corev1::ServiceAccount>(name).await,
            ResourceKind::ConfigMap => self.delete_typed::<corev1::ConfigMap>(name).await,
            ResourceKind::Service => self.delete_typed::<corev1::Service>(name).await,
            ResourceKind::DaemonSet => self.delete_typed::<appsv1::DaemonSet>(name).await,
            ResourceKind::Deployment => self.delete_typed::<appsv1::Deployment>(name).await,
            ResourceKind::StatefulSet => self.delete_typed::<appsv1::StatefulSet>(name).await,
            ResourceKind::Job => self.delete_typed::<batchv1::Job>(name).await,
            ResourceKind::PersistentVolumeClaim => {
                self.delete_typed::<corev1::PersistentVolumeClaim>(name).await
            }
        }
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<corev1::Pod>, kube::Error> {
        let pods = self
            .api::<corev1::Pod>()
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items)
    }

    async fn delete_pod(&self, name: &str) -> Result<(), kube::Error> {
        self.delete_typed::<corev1::Pod>(name).await
    }

    async fn get_secret(&self, name: &str) -> Result<Option<corev1::Secret>, kube::Error> {
        self.get_typed::<corev1::Secret>(name).await
    }

    async fn list_nodes(&self) -> Result<Vec<corev1::Node>, kube::Error> {
        let nodes = Api::<corev1::Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await?;
        Ok(nodes.items)
    }

    async fn patch_status(
        &self,
        name: &str,
        status: &LoggingServiceStatus,
    ) -> Result<(), kube::Error> {
        let patch = json!({ "status": status });
        self.api::<LoggingService>()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
    }

    fn watch_secrets(&self, label_selector: &str) -> SecretEvents {
        let api = self.api::<corev1::Secret>();
        watcher(api, watcher::Config::default().labels(label_selector))
            .default_backoff()
            .boxed()
    }
}
