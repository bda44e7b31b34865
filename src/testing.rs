//! In-memory stand-ins for the cluster and the Graylog admin API.

use crate::graylog::api::{Method, Response, RestApi};
use crate::graylog::connector::MockContentSource;
use crate::graylog::sync::{Plan, Session};
use crate::loggingservice_types::*;
use crate::platform::*;
use crate::Error;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::runtime::watcher;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

pub const NAMESPACE: &str = "logging";

pub fn api_error(reason: &str, code: u16) -> kube::Error {
    kube::Error::Api(kube_core::ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    })
}

pub fn logging_service(spec: LoggingServiceSpec) -> LoggingService {
    let mut ls = LoggingService::new("logging-service", spec);
    ls.metadata.namespace = Some(NAMESPACE.to_string());
    ls.metadata.uid = Some("6f1d1d0c-logging".to_string());
    ls
}

pub fn graylog_spec() -> Graylog {
    Graylog {
        docker_image: "graylog/graylog:5.2.3".to_string(),
        mongo_db_image: "mongo:5.0.19".to_string(),
        host: "https://graylog.example".to_string(),
        graylog_secret_name: "graylog-secret".to_string(),
        content_deploy_policy: "force-update".to_string(),
        input_port: 12201,
        ..Graylog::default()
    }
}

pub fn plan(graylog: &Graylog, policy: SyncPolicy) -> Plan {
    Plan::new(graylog, policy, "admin", Path::new("/tmp"), None)
}

/// Owns what a synchronizer `Session` borrows.
pub struct SyncFixture {
    pub plan: Plan,
    pub graylog: FakeGraylog,
    pub platform: FakePlatform,
    pub content: MockContentSource,
}

impl SyncFixture {
    pub fn new(plan: Plan) -> Self {
        SyncFixture {
            plan,
            graylog: FakeGraylog::bootstrapped(),
            platform: FakePlatform::new(),
            content: MockContentSource::new(),
        }
    }

    pub fn with_policy(policy: SyncPolicy) -> Self {
        SyncFixture::new(plan(&graylog_spec(), policy))
    }

    pub fn bare(mut self) -> Self {
        self.graylog = FakeGraylog::bare();
        self
    }

    pub fn session(&self) -> Session<'_> {
        Session {
            plan: &self.plan,
            graylog: &self.graylog,
            search: None,
            content: &self.content,
            platform: &self.platform,
        }
    }
}

pub fn secret(name: &str, data: &[(&str, &str)]) -> corev1::Secret {
    corev1::Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([("graylog".to_string(), "secret".to_string())])),
            ..ObjectMeta::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..corev1::Secret::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(ResourceKind, String),
    Replace(ResourceKind, String),
    Delete(ResourceKind, String),
    DeletePod(String),
}

pub struct PlatformState {
    pub objects: BTreeMap<(ResourceKind, String), Resource>,
    pub pods: Vec<corev1::Pod>,
    pub secrets: BTreeMap<String, corev1::Secret>,
    pub nodes: Vec<corev1::Node>,
    pub status: LoggingServiceStatus,
    pub status_patches: usize,
    pub calls: Vec<Call>,
    pub auto_ready: bool,
    pub stuck_jobs: BTreeSet<String>,
    pub fail_status_patch: bool,
    pub fail_node_listing: bool,
    pub forbidden_deletes: BTreeSet<ResourceKind>,
    secret_senders: Vec<mpsc::UnboundedSender<Result<watcher::Event<corev1::Secret>, watcher::Error>>>,
}

/// Namespaced object store that records every successful write.
pub struct FakePlatform {
    pub state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        FakePlatform {
            state: Mutex::new(PlatformState {
                objects: BTreeMap::new(),
                pods: Vec::new(),
                secrets: BTreeMap::new(),
                nodes: Vec::new(),
                status: LoggingServiceStatus::default(),
                status_patches: 0,
                calls: Vec::new(),
                auto_ready: true,
                stuck_jobs: BTreeSet::new(),
                fail_status_patch: false,
                fail_node_listing: false,
                forbidden_deletes: BTreeSet::new(),
                secret_senders: Vec::new(),
            }),
        }
    }

    pub fn with_secret(self, secret: corev1::Secret) -> Self {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.state.lock().unwrap().secrets.insert(name, secret);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn writes_of(&self, kind: ResourceKind) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| match c {
                Call::Create(k, _) | Call::Replace(k, _) | Call::Delete(k, _) => *k == kind,
                Call::DeletePod(_) => false,
            })
            .collect()
    }

    pub fn object(&self, kind: ResourceKind, name: &str) -> Option<Resource> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(kind, name.to_string()))
            .cloned()
    }

    pub fn insert(&self, resource: Resource) {
        let key = (resource.kind(), resource.name());
        self.state.lock().unwrap().objects.insert(key, resource);
    }

    pub fn add_pod(&self, name: &str, labels: &[(&str, &str)]) {
        let pod = corev1::Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..corev1::Pod::default()
        };
        self.state.lock().unwrap().pods.push(pod);
    }

    pub fn add_node(&self, runtime_version: &str) {
        let node = corev1::Node {
            status: Some(corev1::NodeStatus {
                node_info: Some(corev1::NodeSystemInfo {
                    container_runtime_version: runtime_version.to_string(),
                    ..corev1::NodeSystemInfo::default()
                }),
                ..corev1::NodeStatus::default()
            }),
            ..corev1::Node::default()
        };
        self.state.lock().unwrap().nodes.push(node);
    }

    pub fn set_status(&self, status: LoggingServiceStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn status(&self) -> LoggingServiceStatus {
        self.state.lock().unwrap().status.clone()
    }

    pub fn condition(&self, reason: &str) -> Option<LoggingServiceCondition> {
        self.status()
            .conditions
            .into_iter()
            .find(|c| c.reason == reason)
    }

    pub fn emit_secret(&self, event: watcher::Event<corev1::Secret>) {
        let mut state = self.state.lock().unwrap();
        state
            .secret_senders
            .retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
    }

    pub fn close_secret_watches(&self) {
        self.state.lock().unwrap().secret_senders.clear();
    }

    pub fn secret_watch_count(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.secret_senders.retain(|tx| !tx.is_closed());
        state.secret_senders.len()
    }

    fn mark_ready(state: &PlatformState, resource: &mut Resource) {
        if !state.auto_ready {
            return;
        }
        match resource {
            Resource::DaemonSet(ds) => {
                ds.status = Some(appsv1::DaemonSetStatus {
                    desired_number_scheduled: 3,
                    number_available: Some(3),
                    updated_number_scheduled: Some(3),
                    ..appsv1::DaemonSetStatus::default()
                });
            }
            Resource::Deployment(deploy) => {
                let replicas = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                deploy.status = Some(appsv1::DeploymentStatus {
                    replicas: Some(replicas),
                    available_replicas: Some(replicas),
                    updated_replicas: Some(replicas),
                    ..appsv1::DeploymentStatus::default()
                });
            }
            Resource::StatefulSet(sts) => {
                let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                sts.status = Some(appsv1::StatefulSetStatus {
                    replicas,
                    ready_replicas: Some(replicas),
                    ..appsv1::StatefulSetStatus::default()
                });
            }
            Resource::Job(job) => {
                let name = job.metadata.name.clone().unwrap_or_default();
                if !state.stuck_jobs.contains(&name) {
                    let completions = job.spec.as_ref().and_then(|s| s.completions).unwrap_or(1);
                    job.status = Some(batchv1::JobStatus {
                        active: Some(0),
                        succeeded: Some(completions),
                        ..batchv1::JobStatus::default()
                    });
                }
            }
            _ => {}
        }
    }
}

fn label_selector_matches(selector: &str, labels: &Option<BTreeMap<String, String>>) -> bool {
    let labels = labels.clone().unwrap_or_default();
    selector.split(',').filter(|s| !s.is_empty()).all(|pair| {
        match pair.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(|l| l == v.trim()).unwrap_or(false),
            None => labels.contains_key(pair.trim()),
        }
    })
}

#[async_trait]
impl Platform for FakePlatform {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, kube::Error> {
        let mut state = self.state.lock().unwrap();
        let key = (resource.kind(), resource.name());
        if state.objects.contains_key(&key) {
            return Err(api_error("AlreadyExists", 409));
        }
        let mut stored = resource.clone();
        FakePlatform::mark_ready(&state, &mut stored);
        state.objects.insert(key.clone(), stored.clone());
        state.calls.push(Call::Create(key.0, key.1));
        Ok(stored)
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<Resource>, kube::Error> {
        Ok(self.object(kind, name))
    }

    async fn replace(&self, resource: &Resource) -> Result<Resource, kube::Error> {
        let mut state = self.state.lock().unwrap();
        let key = (resource.kind(), resource.name());
        if !state.objects.contains_key(&key) {
            return Err(api_error("NotFound", 404));
        }
        let mut stored = resource.clone();
        FakePlatform::mark_ready(&state, &mut stored);
        state.objects.insert(key.clone(), stored.clone());
        state.calls.push(Call::Replace(key.0, key.1));
        Ok(stored)
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();
        if state.forbidden_deletes.contains(&kind) {
            return Err(api_error("Forbidden", 403));
        }
        match state.objects.remove(&(kind, name.to_string())) {
            Some(_) => {
                state.calls.push(Call::Delete(kind, name.to_string()));
                Ok(())
            }
            None => Err(api_error("NotFound", 404)),
        }
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<corev1::Pod>, kube::Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|p| label_selector_matches(label_selector, &p.metadata.labels))
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();
        let before = state.pods.len();
        state
            .pods
            .retain(|p| p.metadata.name.as_deref() != Some(name));
        if state.pods.len() == before {
            return Err(api_error("NotFound", 404));
        }
        state.calls.push(Call::DeletePod(name.to_string()));
        Ok(())
    }

    async fn get_secret(&self, name: &str) -> Result<Option<corev1::Secret>, kube::Error> {
        Ok(self.state.lock().unwrap().secrets.get(name).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<corev1::Node>, kube::Error> {
        let state = self.state.lock().unwrap();
        if state.fail_node_listing {
            return Err(api_error("Forbidden", 403));
        }
        Ok(state.nodes.clone())
    }

    async fn patch_status(
        &self,
        _name: &str,
        status: &LoggingServiceStatus,
    ) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_status_patch {
            return Err(api_error("Conflict", 409));
        }
        state.status = status.clone();
        state.status_patches += 1;
        Ok(())
    }

    fn watch_secrets(&self, _label_selector: &str) -> SecretEvents {
        let (tx, rx) = mpsc::unbounded();
        self.state.lock().unwrap().secret_senders.push(tx);
        rx.boxed()
    }
}

/// Records every call and answers `200 {}`.
pub struct RecordingApi {
    pub calls: Mutex<Vec<(Method, String, Option<String>)>>,
}

impl RecordingApi {
    pub fn new() -> Self {
        RecordingApi {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Method, String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RestApi for RecordingApi {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<Response, Error> {
        self.calls
            .lock()
            .unwrap()
            .push((method, path.to_string(), body.map(|b| b.to_string())));
        Ok(Response {
            status: 200,
            body: "{}".to_string(),
        })
    }
}

#[derive(Default)]
pub struct GraylogState {
    pub calls: Vec<(Method, String, Option<Value>)>,
    next_id: u64,
    pub grok: Vec<Value>,
    pub index_sets: Vec<Value>,
    pub inputs: Vec<Value>,
    pub extractors: BTreeMap<String, Vec<Value>>,
    pub message_processors: Option<Value>,
    pub streams: Vec<Value>,
    pub rules: Vec<Value>,
    pub pipelines: Vec<Value>,
    pub connections: Vec<Value>,
    pub content_packs: Vec<Value>,
    pub installations: Vec<Value>,
    pub searches: Vec<Value>,
    pub views: Vec<Value>,
    pub dashboards: Vec<Value>,
    pub roles: Vec<Value>,
    pub users: Vec<Value>,
    pub auth_header: Option<Value>,
    pub failures: Vec<(Method, String, u16)>,
}

impl GraylogState {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:024x}", self.next_id)
    }

    fn insert(&mut self, collection: Items, body: Value) -> String {
        let id = self.new_id();
        let mut object = body;
        if let Some(map) = object.as_object_mut() {
            map.insert("id".to_string(), json!(id));
        }
        collection(self).push(object);
        id
    }
}

fn field_eq(value: &Value, field: &str, expected: &str) -> bool {
    value.get(field).and_then(|v| v.as_str()) == Some(expected)
}

fn replace_by_id(items: &mut [Value], id: &str, body: Value) -> bool {
    match items.iter_mut().find(|i| field_eq(i, "id", id)) {
        Some(item) => {
            let mut object = body;
            if let Some(map) = object.as_object_mut() {
                map.insert("id".to_string(), json!(id));
            }
            *item = object;
            true
        }
        None => false,
    }
}

type Items = fn(&mut GraylogState) -> &mut Vec<Value>;

struct Collection {
    items: Items,
    list_key: Option<&'static str>,
    created: u16,
    id_key: Option<&'static str>,
    updated: u16,
}

/// Stateful emulation of the admin endpoints the synchronizer talks to.
pub struct FakeGraylog {
    pub state: Mutex<GraylogState>,
}

impl FakeGraylog {
    /// Empty product: only the objects its first boot provisions.
    pub fn bootstrapped() -> Self {
        let fake = FakeGraylog {
            state: Mutex::new(GraylogState::default()),
        };
        {
            let mut state = fake.state.lock().unwrap();
            state.insert(|s| &mut s.index_sets, json!({"title": "Default index set", "default": true}));
            for title in ["All events", "All system events", "Default Stream"] {
                state.insert(|s| &mut s.streams, json!({"title": title, "disabled": false}));
            }
        }
        fake
    }

    pub fn bare() -> Self {
        FakeGraylog {
            state: Mutex::new(GraylogState::default()),
        }
    }

    pub fn fail(&self, method: Method, path: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((method, path.to_string(), status));
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(m, p, _)| (*m, p.clone()))
            .collect()
    }

    pub fn writes(&self) -> Vec<(Method, String)> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| *m != Method::Get)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn position(&self, method: Method, path: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|(m, p)| *m == method && p == path)
    }

    pub fn titles(&self, collection: fn(&GraylogState) -> &Vec<Value>) -> Vec<String> {
        let state = self.state.lock().unwrap();
        collection(&state)
            .iter()
            .filter_map(|v| v.get("title").and_then(|t| t.as_str()).map(|t| t.to_string()))
            .collect()
    }

    pub fn id_of(&self, collection: fn(&GraylogState) -> &Vec<Value>, title: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        collection(&state)
            .iter()
            .find(|v| field_eq(v, "title", title))
            .and_then(|v| v.get("id").and_then(|i| i.as_str()).map(|i| i.to_string()))
    }

    /// Endpoints that only list, create, and replace by id.
    fn collection(segments: &[&str]) -> Option<(Collection, usize)> {
        let (prefix, items, list_key, created, id_key, updated): (usize, Items, _, _, _, _) = match segments {
            ["system", "grok", ..] => (2, |s| &mut s.grok, Some("patterns"), 201, Some("id"), 200),
            ["system", "indices", "index_sets", ..] => (3, |s| &mut s.index_sets, Some("index_sets"), 200, Some("id"), 200),
            ["system", "inputs", ..] => (2, |s| &mut s.inputs, Some("inputs"), 201, Some("id"), 201),
            ["system", "pipelines", "rule", ..] => (3, |s| &mut s.rules, None, 200, Some("id"), 200),
            ["system", "pipelines", "pipeline", ..] => (3, |s| &mut s.pipelines, None, 200, Some("id"), 200),
            ["users", ..] => (1, |s| &mut s.users, Some("users"), 201, None, 204),
            _ => return None,
        };
        Some((Collection { items, list_key, created, id_key, updated }, prefix))
    }

    fn route(state: &mut GraylogState, method: Method, path: &str, body: Value) -> (u16, Value) {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match (method, segments.as_slice()) {
            (Method::Get, ["system", "inputs", input, "extractors"]) => {
                let extractors = state.extractors.get(*input).cloned().unwrap_or_default();
                return (200, json!({ "extractors": extractors }));
            }
            (Method::Post, ["system", "inputs", input, "extractors"]) => {
                let id = state.new_id();
                let mut object = body;
                object["id"] = json!(id);
                state.extractors.entry(input.to_string()).or_default().push(object);
                return (201, json!({ "extractor_id": id }));
            }
            (Method::Put, ["system", "inputs", input, "extractors", id]) => {
                let items = state.extractors.entry(input.to_string()).or_default();
                return (if replace_by_id(items, id, body) { 200 } else { 404 }, json!({}));
            }
            (Method::Delete, ["system", "inputs", input, "extractors", id]) => {
                let items = state.extractors.entry(input.to_string()).or_default();
                let before = items.len();
                items.retain(|e| !field_eq(e, "id", id));
                return (if items.len() < before { 204 } else { 404 }, json!({}));
            }
            (Method::Put, ["system", "messageprocessors", "config"]) => {
                state.message_processors = Some(body);
                return (200, json!({}));
            }
            (Method::Get, ["users", name]) => {
                return match state.users.iter().find(|u| field_eq(u, "username", name)) {
                    Some(user) => (200, user.clone()),
                    None => (404, json!({})),
                };
            }
            _ => {}
        }
        if let Some((c, prefix)) = FakeGraylog::collection(&segments) {
            match (method, &segments[prefix..]) {
                (Method::Get, []) => {
                    let items = (c.items)(state).clone();
                    let total = items.len();
                    return match c.list_key {
                        Some(key) => (200, json!({ key: items, "total": total })),
                        None => (200, json!(items)),
                    };
                }
                (Method::Post, []) => {
                    let id = state.insert(c.items, body);
                    return (c.created, c.id_key.map_or(Value::Null, |key| json!({ key: id })));
                }
                (Method::Put, [id]) => {
                    let status = if replace_by_id((c.items)(state), id, body) { c.updated } else { 404 };
                    return (status, Value::Null);
                }
                _ => {}
            }
        }
        match (method, segments.as_slice()) {
            (Method::Get, ["streams"]) => (200, json!({ "streams": state.streams })),
            (Method::Post, ["streams"]) => {
                let mut object = body;
                object["disabled"] = json!(true);
                let id = state.insert(|s| &mut s.streams, object);
                (201, json!({ "stream_id": id }))
            }
            (Method::Put, ["streams", id]) => {
                (if replace_by_id(&mut state.streams, id, body) { 200 } else { 404 }, json!({}))
            }
            (Method::Post, ["streams", id, "resume"]) => {
                match state.streams.iter_mut().find(|s| field_eq(s, "id", id)) {
                    Some(stream) => {
                        stream["disabled"] = json!(false);
                        (204, Value::Null)
                    }
                    None => (404, json!({})),
                }
            }
            (Method::Post, ["system", "pipelines", "connections", "to_stream"]) => {
                state.connections.push(body);
                (200, json!({}))
            }

            (Method::Get, ["system", "content_packs"]) => {
                (200, json!({ "content_packs": state.content_packs }))
            }
            (Method::Post, ["system", "content_packs"]) => {
                state.content_packs.push(body);
                (201, json!({}))
            }
            (Method::Get, ["system", "content_packs", pack, "installations"]) => {
                let installations: Vec<Value> = state
                    .installations
                    .iter()
                    .filter(|i| field_eq(i, "content_pack_id", pack))
                    .cloned()
                    .collect();
                (200, json!({ "installations": installations, "total": installations.len() }))
            }
            (Method::Post, ["system", "content_packs", pack, _revision, "installations"]) => {
                if !state.content_packs.iter().any(|p| field_eq(p, "id", pack)) {
                    return (404, json!({}));
                }
                let id = state.new_id();
                state
                    .installations
                    .push(json!({ "_id": id, "content_pack_id": pack }));
                if !state.dashboards.iter().any(|d| field_eq(d, "title", "Sources by Service")) {
                    let dashboard = state.new_id();
                    state
                        .dashboards
                        .push(json!({ "id": dashboard, "title": "Sources by Service" }));
                }
                (200, json!({ "_id": id }))
            }
            (Method::Delete, ["system", "content_packs", _pack, "installations", id]) => {
                let before = state.installations.len();
                state.installations.retain(|i| !field_eq(i, "_id", id));
                (if state.installations.len() < before { 200 } else { 404 }, json!({}))
            }
            (Method::Delete, ["system", "content_packs", pack]) => {
                if state
                    .installations
                    .iter()
                    .any(|i| field_eq(i, "content_pack_id", pack))
                {
                    return (400, json!({ "message": "content pack has installations" }));
                }
                let before = state.content_packs.len();
                state.content_packs.retain(|p| !field_eq(p, "id", pack));
                (if state.content_packs.len() < before { 204 } else { 404 }, json!({}))
            }

            (Method::Get, ["views"]) => (200, json!({ "views": state.views })),
            (Method::Post, ["views", "search"]) | (Method::Post, ["views"]) => {
                let id = match body.get("id").and_then(|i| i.as_str()) {
                    Some(id) => id.to_string(),
                    None => state.new_id(),
                };
                let mut object = body;
                object["id"] = json!(id);
                if segments.len() == 2 {
                    state.searches.retain(|s| !field_eq(s, "id", &id));
                    state.searches.push(object);
                    (201, json!({ "id": id }))
                } else {
                    state.views.push(object);
                    (200, json!({ "id": id }))
                }
            }
            (Method::Put, ["views", "search", id]) => {
                (if replace_by_id(&mut state.searches, id, body) { 200 } else { 404 }, json!({}))
            }
            (Method::Put, ["views", id]) => {
                (if replace_by_id(&mut state.views, id, body) { 200 } else { 404 }, json!({}))
            }
            (Method::Delete, ["views", id]) => {
                let before = state.views.len();
                state.views.retain(|v| !field_eq(v, "id", id));
                (if state.views.len() < before { 204 } else { 404 }, json!({}))
            }
            (Method::Get, ["dashboards"]) => (
                200,
                json!({ "elements": state.dashboards, "views": state.dashboards }),
            ),

            (Method::Get, ["roles", name]) => {
                match state.roles.iter().find(|r| field_eq(r, "name", name)) {
                    Some(role) => (200, role.clone()),
                    None => (404, json!({})),
                }
            }
            (Method::Post, ["roles"]) => {
                state.roles.push(body);
                (201, json!({}))
            }
            (Method::Put, ["roles", name]) => {
                match state.roles.iter_mut().find(|r| field_eq(r, "name", name)) {
                    Some(role) => {
                        *role = body;
                        (200, json!({}))
                    }
                    None => (404, json!({})),
                }
            }
            (Method::Put, ["system", "authentication", "http-header-auth-config"]) => {
                state.auth_header = Some(body);
                (200, json!({}))
            }
            _ => (404, json!({ "message": format!("no route for {} {}", method, path) })),
        }
    }
}

#[async_trait]
impl RestApi for FakeGraylog {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<Response, Error> {
        let mut state = self.state.lock().unwrap();
        let body: Value = body
            .map(|b| serde_json::from_str(b).unwrap_or(Value::String(b.to_string())))
            .unwrap_or(Value::Null);
        state.calls.push((method, path.to_string(), Some(body.clone())));
        if let Some((_, _, status)) = state
            .failures
            .iter()
            .find(|(m, p, _)| *m == method && p == path)
        {
            return Ok(Response {
                status: *status,
                body: "{}".to_string(),
            });
        }
        let (status, response) = FakeGraylog::route(&mut state, method, path, body);
        Ok(Response {
            status,
            body: if response.is_null() {
                String::new()
            } else {
                response.to_string()
            },
        })
    }
}
