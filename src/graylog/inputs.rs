use crate::error::Error;
use crate::graylog::api::*;
use crate::graylog::assets::{self, *};
use crate::graylog::sync::{decide, Decision, Session};
use crate::loggingservice_types::SyncPolicy;
use serde::Deserialize;
use tracing::*;

const GROK_URL: &str = "system/grok";
const INPUTS_URL: &str = "system/inputs";
const MESSAGE_PROCESSORS_URL: &str = "system/messageprocessors/config";

#[derive(Debug, Default, Deserialize)]
struct GrokPattern {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct GrokPatterns {
    #[serde(default)]
    patterns: Vec<GrokPattern>,
}

/// Grok patterns are keyed by name rather than title.
pub async fn sync_grok_patterns(session: &Session<'_>) -> Result<(), Error> {
    let value = get_json(session.graylog, GROK_URL, "get grok patterns").await?;
    let existing: GrokPatterns =
        serde_json::from_value(value).map_err(|e| Error::ParseFailed(GROK_URL.to_string(), e))?;
    for (name, pattern) in GROK_PATTERNS {
        let found = existing
            .patterns
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.id.as_str());
        match decide(session.plan.policy, found) {
            Decision::Create => {
                debug!(pattern = name, "Creating grok pattern");
                send(
                    session.graylog,
                    Method::Post,
                    GROK_URL,
                    Some(&assets::grok_pattern(None, name, pattern)),
                    &[201],
                    &format!("create grok pattern {}", name),
                )
                .await?;
            }
            Decision::Update(id) => {
                send(
                    session.graylog,
                    Method::Put,
                    &format!("{}/{}", GROK_URL, id),
                    Some(&assets::grok_pattern(Some(id), name, pattern)),
                    &[200],
                    &format!("update grok pattern {}", name),
                )
                .await?;
            }
            Decision::Keep => {}
        }
    }
    Ok(())
}

async fn default_input_id(session: &Session<'_>) -> Result<Option<String>, Error> {
    let inputs = fetch_entities(session.graylog, INPUTS_URL, Some("inputs")).await?;
    Ok(find_id(&inputs, &input_title(session.plan.input_port)).map(str::to_string))
}

pub async fn sync_input(session: &Session<'_>) -> Result<(), Error> {
    let port = session.plan.input_port;
    let body = assets::input(port);
    let existing = default_input_id(session).await?;
    match decide(session.plan.policy, existing.as_deref()) {
        Decision::Create => {
            info!(port, "Creating default input");
            send(session.graylog, Method::Post, INPUTS_URL, Some(&body), &[201], "create default input").await?;
        }
        Decision::Update(id) => {
            send(
                session.graylog,
                Method::Put,
                &format!("{}/{}", INPUTS_URL, id),
                Some(&body),
                &[201],
                "update default input",
            )
            .await?;
        }
        Decision::Keep => {}
    }
    Ok(())
}

/// Extractors of the default input, then the processor order that makes them
/// run ahead of the pipelines.
pub async fn sync_extractors(session: &Session<'_>) -> Result<(), Error> {
    let plan = session.plan;
    let input = default_input_id(session).await?.ok_or_else(|| {
        Error::Precondition(format!("input {} not found", input_title(plan.input_port)))
    })?;
    let url = format!("{}/{}/extractors", INPUTS_URL, input);
    let existing = fetch_entities(session.graylog, &url, Some("extractors")).await?;
    for (title, body) in assets::extractors(plan.branch) {
        match decide(plan.policy, find_id(&existing, title)) {
            Decision::Create => {
                debug!(extractor = title, "Creating extractor");
                send(
                    session.graylog,
                    Method::Post,
                    &url,
                    Some(&body),
                    &[201],
                    &format!("create extractor {}", title),
                )
                .await?;
            }
            Decision::Update(id) => {
                send(
                    session.graylog,
                    Method::Put,
                    &format!("{}/{}", url, id),
                    Some(&body),
                    &[200],
                    &format!("update extractor {}", title),
                )
                .await?;
            }
            Decision::Keep => {}
        }
    }
    let legacy = match plan.policy {
        SyncPolicy::ForceUpdate => find_id(&existing, LEGACY_EXTRACTOR),
        _ => None,
    };
    if let Some(id) = legacy {
        info!(extractor = LEGACY_EXTRACTOR, "Deleting legacy extractor");
        send(
            session.graylog,
            Method::Delete,
            &format!("{}/{}", url, id),
            None,
            &[204],
            &format!("delete extractor {}", id),
        )
        .await?;
    }
    send(
        session.graylog,
        Method::Put,
        MESSAGE_PROCESSORS_URL,
        Some(&assets::message_processors()),
        &[200],
        "update message processors order",
    )
    .await?;
    Ok(())
}
