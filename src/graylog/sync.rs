use crate::common::VersionBranch;
use crate::error::Error;
use crate::graylog::api::RestApi;
use crate::graylog::assets::*;
use crate::graylog::connector::ContentSource;
use crate::graylog::{accounts, content, inputs, streams};
use crate::loggingservice_types::*;
use crate::platform::Platform;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::*;

/// One step of a synchronization pass. Later stages reference ids of objects
/// earlier stages create, so `ORDER` is the dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AuthHeader,
    GrokPatterns,
    IndexSets,
    Input,
    Extractors,
    Streams,
    ProcessingRules,
    Pipeline,
    ContentPack,
    ExternalContentPacks,
    SearchBackendConfigs,
    Archives,
    SavedSearches,
    Roles,
    Users,
}

impl Stage {
    pub const ORDER: [Stage; 15] = [
        Stage::AuthHeader,
        Stage::GrokPatterns,
        Stage::IndexSets,
        Stage::Input,
        Stage::Extractors,
        Stage::Streams,
        Stage::ProcessingRules,
        Stage::Pipeline,
        Stage::ContentPack,
        Stage::ExternalContentPacks,
        Stage::SearchBackendConfigs,
        Stage::Archives,
        Stage::SavedSearches,
        Stage::Roles,
        Stage::Users,
    ];

    pub fn applies(&self, plan: &Plan) -> bool {
        match self {
            Stage::AuthHeader => plan.auth_proxy,
            Stage::ExternalContentPacks => plan.has_external_content(),
            Stage::SearchBackendConfigs => plan.has_external_content() && plan.search_host.is_some(),
            Stage::Archives => plan.search_host.is_some(),
            _ => true,
        }
    }

    async fn run(&self, session: &Session<'_>) -> Result<(), Error> {
        match self {
            Stage::AuthHeader => accounts::enable_auth_header(session).await,
            Stage::GrokPatterns => inputs::sync_grok_patterns(session).await,
            Stage::IndexSets => streams::sync_index_sets(session).await,
            Stage::Input => inputs::sync_input(session).await,
            Stage::Extractors => inputs::sync_extractors(session).await,
            Stage::Streams => streams::sync_streams(session).await,
            Stage::ProcessingRules => streams::sync_rules(session).await,
            Stage::Pipeline => streams::sync_pipeline(session).await,
            Stage::ContentPack => content::sync_content_pack(session).await,
            Stage::ExternalContentPacks => content::ingest_external_packs(session).await,
            Stage::SearchBackendConfigs => content::replay_backend_requests(session).await,
            Stage::Archives => content::register_archives(session).await,
            Stage::SavedSearches => accounts::sync_saved_searches(session).await,
            Stage::Roles => accounts::sync_roles(session).await,
            Stage::Users => accounts::sync_users(session).await,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What to do with one remote object, given whether it already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision<'a> {
    Create,
    Update(&'a str),
    Keep,
}

pub fn decide(policy: SyncPolicy, existing: Option<&str>) -> Decision<'_> {
    match (existing, policy) {
        (None, _) => Decision::Create,
        (Some(id), SyncPolicy::ForceUpdate) => Decision::Update(id),
        (Some(_), SyncPolicy::OnlyCreate) => Decision::Keep,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnabledStream {
    pub def: &'static StreamDef,
    pub rotation: Rotation,
}

fn default_streams() -> Vec<Stream> {
    vec![
        Stream {
            name: AUDIT_STREAM.to_string(),
            install: true,
            rotation_strategy: Some("timeBased".to_string()),
            rotation_period: Some("P1M".to_string()),
            max_number_of_indices: Some(5),
            ..Stream::default()
        },
        Stream {
            name: SYSTEM_STREAM.to_string(),
            install: true,
            rotation_strategy: Some("sizeBased".to_string()),
            max_size: Some(DEFAULT_MAX_SIZE),
            max_number_of_indices: Some(DEFAULT_MAX_INDICES),
            ..Stream::default()
        },
        Stream {
            name: KUBERNETES_EVENTS_STREAM.to_string(),
            install: true,
            rotation_strategy: Some("timeBased".to_string()),
            rotation_period: Some("P1M".to_string()),
            max_number_of_indices: Some(5),
            ..Stream::default()
        },
    ]
}

/// Audit and System streams are mandatory whenever a list is configured.
fn with_required_streams(configured: &[Stream]) -> Vec<Stream> {
    let mut streams = configured.to_vec();
    let has = |title: &str| configured.iter().any(|s| s.name.eq_ignore_ascii_case(title));
    if !has(AUDIT_STREAM) {
        streams.push(Stream {
            name: AUDIT_STREAM.to_string(),
            install: true,
            rotation_strategy: Some("timeBased".to_string()),
            rotation_period: Some("P1M".to_string()),
            max_number_of_indices: Some(5),
            ..Stream::default()
        });
    }
    if !has(SYSTEM_STREAM) {
        streams.push(Stream {
            name: SYSTEM_STREAM.to_string(),
            install: true,
            ..Stream::default()
        });
    }
    streams
}

/// Known, installed streams; a stream listed twice keeps its last entry.
pub fn enabled_streams(configured: &[Stream]) -> Vec<EnabledStream> {
    let streams = if configured.is_empty() {
        default_streams()
    } else {
        with_required_streams(configured)
    };
    let mut enabled = Vec::new();
    for (i, stream) in streams.iter().enumerate() {
        if streams[i + 1..].iter().any(|later| later.name == stream.name) || !stream.install {
            continue;
        }
        match stream_def(&stream.name) {
            Some(def) => enabled.push(EnabledStream {
                def,
                rotation: Rotation {
                    strategy: RotationStrategy::parse(stream.rotation_strategy.as_deref()),
                    period: stream.rotation_period.clone(),
                    max_size: stream.max_size,
                    max_indices: stream.max_number_of_indices,
                },
            }),
            None => warn!(stream = %stream.name, "Skipping unknown stream"),
        }
    }
    enabled
}

/// Everything a pass needs to know, derived once from the desired state.
pub struct Plan {
    pub policy: SyncPolicy,
    pub branch: VersionBranch,
    pub input_port: i32,
    pub index_shards: i32,
    pub index_replicas: i32,
    pub streams: Vec<EnabledStream>,
    pub index_sets: Vec<(String, Rotation)>,
    pub auth_proxy: bool,
    pub content_pack_paths: Vec<String>,
    pub content_packs: Vec<ContentPackSource>,
    pub path_repo: Option<String>,
    pub search_host: Option<String>,
    pub work_dir: PathBuf,
    admin_password: String,
}

impl Plan {
    pub fn new(
        graylog: &Graylog,
        policy: SyncPolicy,
        admin_password: &str,
        work_dir: &Path,
        search_host: Option<&str>,
    ) -> Plan {
        let streams = enabled_streams(&graylog.streams);
        let rotation_of = |title: &str| {
            streams
                .iter()
                .find(|s| s.def.title == title)
                .map(|s| s.rotation.clone())
        };
        let default_rotation = {
            let base = rotation_of(SYSTEM_STREAM).unwrap_or_else(Rotation::size_based);
            Rotation {
                max_size: base.max_size.or(graylog.max_size),
                max_indices: base.max_indices.or(graylog.max_number_of_indices),
                ..base
            }
        };
        let mut index_sets = vec![
            (DEFAULT_INDEX_SET.to_string(), default_rotation),
            (
                AUDIT_INDEX_SET.to_string(),
                rotation_of(AUDIT_STREAM).unwrap_or_else(|| Rotation::monthly(5)),
            ),
        ];
        for stream in &streams {
            if !index_sets.iter().any(|(title, _)| title == stream.def.index_set) {
                index_sets.push((stream.def.index_set.to_string(), stream.rotation.clone()));
            }
        }
        Plan {
            policy,
            branch: VersionBranch::from_image(&graylog.docker_image),
            input_port: graylog.input_port,
            index_shards: graylog.index_shards.unwrap_or(1),
            index_replicas: graylog.index_replicas.unwrap_or(1),
            streams,
            index_sets,
            auth_proxy: graylog.auth_proxy_enabled(),
            content_pack_paths: graylog
                .content_pack_paths
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            content_packs: graylog
                .content_packs
                .iter()
                .filter(|p| !p.url.is_empty())
                .cloned()
                .collect(),
            path_repo: graylog.path_repo.clone().filter(|p| !p.is_empty()),
            search_host: search_host.map(str::to_string),
            work_dir: work_dir.to_path_buf(),
            admin_password: admin_password.to_string(),
        }
    }

    pub fn has_external_content(&self) -> bool {
        !self.content_pack_paths.is_empty() || !self.content_packs.is_empty()
    }

    /// Accounts get a password derived from the admin one, stable across passes.
    pub fn user_password(&self, username: &str) -> String {
        hex::encode(Sha256::digest(format!("{}:{}", self.admin_password, username)))
    }
}

/// The endpoints of one pass.
pub struct Session<'a> {
    pub plan: &'a Plan,
    pub graylog: &'a dyn RestApi,
    pub search: Option<&'a dyn RestApi>,
    pub content: &'a dyn ContentSource,
    pub platform: &'a dyn Platform,
}

/// Runs every applicable stage in order; the first failure aborts the pass
/// and leaves already synchronized objects in place.
pub async fn synchronize(session: &Session<'_>) -> Result<(), Error> {
    for stage in Stage::ORDER {
        if !stage.applies(session.plan) {
            debug!(%stage, "Skipping stage");
            continue;
        }
        debug!(%stage, "Synchronizing");
        stage.run(session).await?;
    }
    info!("Graylog configuration synchronized");
    Ok(())
}
