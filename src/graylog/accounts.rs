use crate::common::VersionBranch;
use crate::error::Error;
use crate::graylog::api::*;
use crate::graylog::assets::{self, *};
use crate::graylog::content::{list_files, read_json};
use crate::graylog::streams::{default_stream_id, fetch_streams};
use crate::graylog::sync::Session;
use crate::loggingservice_types::SyncPolicy;
use serde::Deserialize;
use tracing::*;

const AUTH_HEADER_URL: &str = "system/authentication/http-header-auth-config";
const VIEWS_URL: &str = "views";
const SEARCHES_URL: &str = "views/search";
const DASHBOARDS_URL: &str = "dashboards";
const ROLES_URL: &str = "roles";
const USERS_URL: &str = "users";
const SAVED_SEARCHES_DIR: &str = "saved-searches";

pub async fn enable_auth_header(session: &Session<'_>) -> Result<(), Error> {
    info!(header = AUTH_PROXY_HEADER, "Enabling trusted header authentication");
    send(
        session.graylog,
        Method::Put,
        AUTH_HEADER_URL,
        Some(&assets::auth_header()),
        &[200],
        "enable trusted header authentication",
    )
    .await?;
    Ok(())
}

fn required<'a>(streams: &'a [Entity], title: &str, missing: &str) -> Result<&'a str, Error> {
    find_id(streams, title).ok_or_else(|| Error::Precondition(missing.to_string()))
}

/// Saved searches are rewritten on every forced pass; their views are only
/// ever created.
pub async fn sync_saved_searches(session: &Session<'_>) -> Result<(), Error> {
    let plan = session.plan;
    let views = fetch_entities(session.graylog, VIEWS_URL, Some("views")).await?;
    let streams = fetch_streams(session.graylog).await?;
    let cloud_events_stream = if plan
        .streams
        .iter()
        .any(|s| s.def.title == KUBERNETES_EVENTS_STREAM)
    {
        required(&streams, KUBERNETES_EVENTS_STREAM, "kubernetes events stream not found")?
    } else {
        default_stream_id(&streams)?
    };
    let audit_stream = required(&streams, AUDIT_STREAM, "audit logs stream not found")?;

    for (saved, stream) in [
        (&CLOUD_EVENTS, cloud_events_stream),
        (&USER_SESSION_HISTORY, audit_stream),
    ] {
        let exists = find_id(&views, saved.title).is_some();
        if plan.policy == SyncPolicy::ForceUpdate || !exists {
            debug!(search = saved.title, "Saving search");
            send(
                session.graylog,
                Method::Post,
                SEARCHES_URL,
                Some(&saved.search(&[stream])),
                &[200, 201],
                &format!("create saved search {}", saved.title),
            )
            .await?;
        }
        if !exists {
            send(
                session.graylog,
                Method::Post,
                VIEWS_URL,
                Some(&saved.view()),
                &[200, 201],
                &format!("create view {}", saved.title),
            )
            .await?;
        }
    }
    sync_custom_searches(session, &views).await
}

async fn sync_custom_searches(session: &Session<'_>, views: &[Entity]) -> Result<(), Error> {
    let dir = session.plan.work_dir.join(SAVED_SEARCHES_DIR);
    for file in list_files(&dir).await? {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let body = read_json(&file).await?;
        if name.ends_with("search.json") {
            send(
                session.graylog,
                Method::Post,
                SEARCHES_URL,
                Some(&body),
                &[201],
                &format!("create saved search from {}", name),
            )
            .await?;
        } else if name.ends_with("view.json") {
            let id = body.get("id").and_then(|id| id.as_str()).unwrap_or_default();
            if !id.is_empty() && views.iter().any(|v| v.id == id) {
                send(
                    session.graylog,
                    Method::Delete,
                    &format!("{}/{}", VIEWS_URL, id),
                    None,
                    &[200, 204],
                    &format!("delete view {}", id),
                )
                .await?;
            }
            send(
                session.graylog,
                Method::Post,
                VIEWS_URL,
                Some(&body),
                &[200, 201],
                &format!("create view from {}", name),
            )
            .await?;
        } else {
            return Err(Error::Configuration(format!(
                "Incorrect filename of saved-search: {}",
                name
            )));
        }
    }
    Ok(())
}

/// Graylog 5 lists dashboards under `elements`, older releases under `views`.
async fn fetch_dashboards(session: &Session<'_>) -> Result<Vec<Entity>, Error> {
    let field = match session.plan.branch {
        VersionBranch::V5 => "elements",
        VersionBranch::V4 => "views",
    };
    fetch_entities(session.graylog, DASHBOARDS_URL, Some(field)).await
}

async fn upsert_role(session: &Session<'_>, name: &str, body: &serde_json::Value) -> Result<(), Error> {
    let url = format!("{}/{}", ROLES_URL, name);
    let response = session.graylog.call(Method::Get, &url, None).await?;
    match response.status {
        404 => {
            info!(role = name, "Creating role");
            send(
                session.graylog,
                Method::Post,
                ROLES_URL,
                Some(body),
                &[201],
                &format!("create role {}", name),
            )
            .await?;
        }
        200 if session.plan.policy == SyncPolicy::ForceUpdate => {
            send(
                session.graylog,
                Method::Put,
                &url,
                Some(body),
                &[200],
                &format!("update role {}", name),
            )
            .await?;
        }
        200 => {}
        status => return Err(Error::unexpected_status(format!("get role {}", name), status)),
    }
    Ok(())
}

/// Read-only roles behind the operator and audit viewer accounts.
pub async fn sync_roles(session: &Session<'_>) -> Result<(), Error> {
    let dashboards = fetch_dashboards(session).await?;
    let streams = fetch_streams(session.graylog).await?;
    let all_events = required(&streams, ALL_EVENTS_STREAM, "all events stream not found")?;
    let default = default_stream_id(&streams)?;
    let all_system = required(
        &streams,
        ALL_SYSTEM_EVENTS_STREAM,
        "all system events stream not found",
    )?;
    let system = required(&streams, SYSTEM_STREAM, "system logs stream not found")?;
    let audit = required(&streams, AUDIT_STREAM, "audit logs stream not found")?;

    let operator = RoleGrants {
        streams: vec![all_events, default, all_system, system],
        dashboard: required(
            &dashboards,
            SOURCES_DASHBOARD,
            "dashboard sources for operator user not found",
        )?,
    };
    upsert_role(
        session,
        "operator",
        &assets::role("operator", "Reads application and system logs", &operator),
    )
    .await?;

    let audit_viewer = RoleGrants {
        streams: vec![all_events, default, all_system, system, audit],
        dashboard: required(
            &dashboards,
            SOURCES_DASHBOARD,
            "dashboard sources for audit viewer not found",
        )?,
    };
    upsert_role(
        session,
        "AuditViewer",
        &assets::role("AuditViewer", "Reads audit logs", &audit_viewer),
    )
    .await
}

#[derive(Debug, Default, Deserialize)]
struct UserSummary {
    #[serde(default)]
    id: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct UserList {
    #[serde(default)]
    users: Vec<UserSummary>,
}

async fn user_id(session: &Session<'_>, username: &str) -> Result<String, Error> {
    let value = get_json(session.graylog, USERS_URL, "get users").await?;
    let list: UserList =
        serde_json::from_value(value).map_err(|e| Error::ParseFailed(USERS_URL.to_string(), e))?;
    list.users
        .into_iter()
        .find(|u| u.username == username)
        .map(|u| u.id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Precondition(format!("id of user {} not found", username)))
}

pub async fn sync_users(session: &Session<'_>) -> Result<(), Error> {
    for user in &USERS {
        let body = user.body(&session.plan.user_password(user.username));
        let response = session
            .graylog
            .call(Method::Get, &format!("{}/{}", USERS_URL, user.username), None)
            .await?;
        match response.status {
            404 => {
                info!(user = user.username, "Creating user");
                send(
                    session.graylog,
                    Method::Post,
                    USERS_URL,
                    Some(&body),
                    &[201],
                    &format!("create user {}", user.username),
                )
                .await?;
            }
            200 if session.plan.policy == SyncPolicy::ForceUpdate => {
                let id = user_id(session, user.username).await?;
                send(
                    session.graylog,
                    Method::Put,
                    &format!("{}/{}", USERS_URL, id),
                    Some(&body),
                    &[204],
                    &format!("update user {}", user.username),
                )
                .await?;
            }
            200 => {}
            status => {
                return Err(Error::unexpected_status(
                    format!("get user {}", user.username),
                    status,
                ))
            }
        }
    }
    Ok(())
}
