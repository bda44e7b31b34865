use crate::error::Error;
use crate::graylog::api::*;
use crate::graylog::assets::{self, *};
use crate::graylog::sync::{decide, Decision, Session};
use crate::loggingservice_types::SyncPolicy;
use tracing::*;

const INDEX_SETS_URL: &str = "system/indices/index_sets";
const STREAMS_URL: &str = "streams";
const RULES_URL: &str = "system/pipelines/rule";
const PIPELINES_URL: &str = "system/pipelines/pipeline";
const CONNECTIONS_URL: &str = "system/pipelines/connections/to_stream";

pub async fn fetch_streams(api: &dyn RestApi) -> Result<Vec<Entity>, Error> {
    fetch_entities(api, STREAMS_URL, Some("streams")).await
}

/// `Default Stream`, or `All messages` on installations that predate it.
pub fn default_stream_id(streams: &[Entity]) -> Result<&str, Error> {
    find_id(streams, DEFAULT_STREAM)
        .or_else(|| find_id(streams, ALL_MESSAGES_STREAM))
        .ok_or_else(|| {
            Error::Precondition(format!(
                "neither {} nor {} streams were not found",
                DEFAULT_STREAM, ALL_MESSAGES_STREAM
            ))
        })
}

/// The default index set is provisioned by Graylog itself and is always kept
/// current; every other set follows the policy.
pub async fn sync_index_sets(session: &Session<'_>) -> Result<(), Error> {
    let plan = session.plan;
    let existing = fetch_entities(session.graylog, INDEX_SETS_URL, Some("index_sets")).await?;
    for (title, rotation) in &plan.index_sets {
        let found = find_id(&existing, title);
        let is_default = title == DEFAULT_INDEX_SET;
        if is_default && found.is_none() {
            return Err(Error::Precondition("default index set not found".to_string()));
        }
        let policy = if is_default {
            SyncPolicy::ForceUpdate
        } else {
            plan.policy
        };
        let body = assets::index_set(title, rotation, plan.index_shards, plan.index_replicas);
        match decide(policy, found) {
            Decision::Create => {
                info!(index_set = %title, "Creating index set");
                send(
                    session.graylog,
                    Method::Post,
                    INDEX_SETS_URL,
                    Some(&body),
                    &[200],
                    &format!("create {}", title),
                )
                .await?;
            }
            Decision::Update(id) => {
                send(
                    session.graylog,
                    Method::Put,
                    &format!("{}/{}", INDEX_SETS_URL, id),
                    Some(&body),
                    &[200],
                    &format!("update {}", title),
                )
                .await?;
            }
            Decision::Keep => {}
        }
    }
    Ok(())
}

/// Streams are created paused, so every managed stream is resumed afterwards.
pub async fn sync_streams(session: &Session<'_>) -> Result<(), Error> {
    let plan = session.plan;
    let index_sets = fetch_entities(session.graylog, INDEX_SETS_URL, Some("index_sets")).await?;
    let existing = fetch_streams(session.graylog).await?;
    for stream in &plan.streams {
        let def = stream.def;
        let index_set_id = find_id(&index_sets, def.index_set).ok_or_else(|| {
            Error::Precondition(format!("index set {} for stream {} not found", def.index_set, def.title))
        })?;
        let body = assets::stream(def.title, def.description, index_set_id);
        match decide(plan.policy, find_id(&existing, def.title)) {
            Decision::Create => {
                info!(stream = %def.title, "Creating stream");
                send(
                    session.graylog,
                    Method::Post,
                    STREAMS_URL,
                    Some(&body),
                    &[201],
                    &format!("create stream {}", def.title),
                )
                .await?;
            }
            Decision::Update(id) => {
                send(
                    session.graylog,
                    Method::Put,
                    &format!("{}/{}", STREAMS_URL, id),
                    Some(&body),
                    &[200],
                    &format!("update stream {}", def.title),
                )
                .await?;
            }
            Decision::Keep => {}
        }
    }

    let streams = fetch_streams(session.graylog).await?;
    for stream in &plan.streams {
        let id = find_id(&streams, stream.def.title)
            .ok_or_else(|| Error::Precondition(format!("stream {} not found", stream.def.title)))?;
        send(
            session.graylog,
            Method::Post,
            &format!("{}/{}/resume", STREAMS_URL, id),
            None,
            &[204],
            &format!("resume stream {}", stream.def.title),
        )
        .await?;
    }
    Ok(())
}

struct RuleSpec {
    title: String,
    description: String,
    source: String,
}

/// Each rule body needs the id of the stream it routes to, so every id is
/// resolved before the first rule is written.
fn rule_specs(session: &Session<'_>, streams: &[Entity]) -> Result<Vec<RuleSpec>, Error> {
    let default_stream = default_stream_id(streams)?;
    debug!(stream = default_stream, "Resolved default stream");
    let mut rules: Vec<RuleSpec> = STRUCTURAL_RULES
        .iter()
        .map(|rule| RuleSpec {
            title: rule.title.to_string(),
            description: rule.description.to_string(),
            source: rule.source(),
        })
        .collect();
    for stream in &session.plan.streams {
        let def = stream.def;
        let id = find_id(streams, def.title)
            .ok_or_else(|| Error::Precondition(format!("stream {} not found", def.title)))?;
        rules.push(RuleSpec {
            title: def.rule_title(),
            description: def.rule_description(),
            source: def.rule_source(id),
        });
    }
    Ok(rules)
}

pub async fn sync_rules(session: &Session<'_>) -> Result<(), Error> {
    let streams = fetch_streams(session.graylog).await?;
    let existing = fetch_entities(session.graylog, RULES_URL, None).await?;
    for rule in rule_specs(session, &streams)? {
        let body = assets::rule(&rule.title, &rule.description, &rule.source);
        match decide(session.plan.policy, find_id(&existing, &rule.title)) {
            Decision::Create => {
                info!(rule = %rule.title, "Creating processing rule");
                send(
                    session.graylog,
                    Method::Post,
                    RULES_URL,
                    Some(&body),
                    &[200, 201],
                    &format!("create rule {}", rule.title),
                )
                .await?;
            }
            Decision::Update(id) => {
                send(
                    session.graylog,
                    Method::Put,
                    &format!("{}/{}", RULES_URL, id),
                    Some(&body),
                    &[200, 201],
                    &format!("update rule {}", rule.title),
                )
                .await?;
            }
            Decision::Keep => {}
        }
    }
    Ok(())
}

/// The routing pipeline, connected to the default stream once it exists.
pub async fn sync_pipeline(session: &Session<'_>) -> Result<(), Error> {
    let streams = fetch_streams(session.graylog).await?;
    let default_stream = default_stream_id(&streams)?;
    let routing: Vec<String> = session
        .plan
        .streams
        .iter()
        .map(|s| s.def.rule_title())
        .collect();
    let body = assets::pipeline(&routing);
    let existing = fetch_entities(session.graylog, PIPELINES_URL, None).await?;
    match decide(session.plan.policy, find_id(&existing, PIPELINE_TITLE)) {
        Decision::Create => {
            info!(pipeline = PIPELINE_TITLE, "Creating pipeline");
            send(
                session.graylog,
                Method::Post,
                PIPELINES_URL,
                Some(&body),
                &[200],
                "create pipeline",
            )
            .await?;
        }
        Decision::Update(id) => {
            send(
                session.graylog,
                Method::Put,
                &format!("{}/{}", PIPELINES_URL, id),
                Some(&body),
                &[200],
                "update pipeline",
            )
            .await?;
        }
        Decision::Keep => {}
    }

    let pipelines = fetch_entities(session.graylog, PIPELINES_URL, None).await?;
    let pipeline_id = find_id(&pipelines, PIPELINE_TITLE)
        .ok_or_else(|| Error::Precondition(format!("pipeline {} not found", PIPELINE_TITLE)))?;
    send(
        session.graylog,
        Method::Post,
        CONNECTIONS_URL,
        Some(&assets::pipeline_connection(pipeline_id, default_stream)),
        &[200],
        "connect pipeline to stream",
    )
    .await?;
    Ok(())
}
