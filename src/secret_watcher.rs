use crate::common::*;
use crate::error::Error;
use crate::manifests::graylog::password_sha2;
use crate::platform::*;
use futures::StreamExt;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::watcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::*;

/// Username and plain password the rendered Graylog configuration was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownCredentials {
    pub user: String,
    pub password: String,
}

fn secret_value(secret: &corev1::Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).to_string())
        .filter(|v| !v.is_empty())
}

/// The `user` and `password` keys of the Graylog secret.
pub fn read_credentials(secret: &corev1::Secret, namespace: &str) -> Result<KnownCredentials, Error> {
    let missing = |field: &'static str| Error::MissingGraylogCredential {
        field,
        secret: secret.metadata.name.clone().unwrap_or_default(),
        namespace: namespace.to_string(),
    };
    Ok(KnownCredentials {
        user: secret_value(secret, "user").ok_or_else(|| missing("user"))?,
        password: secret_value(secret, "password").ok_or_else(|| missing("password"))?,
    })
}

fn field_of(line: &str) -> &str {
    line.split('=').next().unwrap_or_default().trim()
}

/// Replaces the value of `field` on every line that sets it. Line endings and
/// all other lines are kept byte for byte; `None` when no line sets `field`.
pub fn rewrite_config(config: &str, field: &str, value: &str) -> Option<String> {
    let mut changed = false;
    let rewritten: String = config
        .split_inclusive('\n')
        .map(|line| {
            let body = line.trim_end_matches(|c| c == '\r' || c == '\n');
            if field_of(body) == field {
                changed = true;
                let ending = &line[body.len()..];
                format!("{} = {}{}", field, value, ending)
            } else {
                line.to_string()
            }
        })
        .collect();
    changed.then_some(rewritten)
}

/// Applies a modified secret to the Graylog config map. Returns whether the
/// config map was written.
pub async fn apply_secret(
    platform: &dyn Platform,
    secret: &corev1::Secret,
    known: &mut KnownCredentials,
) -> Result<bool, Error> {
    let KnownCredentials { user, password } = read_credentials(secret, platform.namespace())?;

    let mut rewrites = Vec::new();
    if user != known.user {
        rewrites.push((GRAYLOG_USER_FIELD, user.clone()));
    } else {
        debug!("User did not change");
    }
    if password != known.password {
        rewrites.push((GRAYLOG_PASSWORD_FIELD, password_sha2(&password)));
    } else {
        debug!("Password did not change");
    }
    if rewrites.is_empty() {
        return Ok(false);
    }

    let kind = ResourceKind::ConfigMap;
    let mut cm = match platform
        .get(kind, GRAYLOG_SERVICE_NAME)
        .await
        .map_err(|e| Error::GetResourceFailed(kind, GRAYLOG_SERVICE_NAME.to_string(), e))?
    {
        Some(Resource::ConfigMap(cm)) => cm,
        _ => return Err(Error::ResourceNotFound(kind, GRAYLOG_SERVICE_NAME.to_string())),
    };
    let config = cm
        .data
        .as_ref()
        .and_then(|d| d.get(GRAYLOG_CONFIG_FILE))
        .cloned()
        .unwrap_or_default();
    if config.is_empty() {
        info!(configmap = GRAYLOG_SERVICE_NAME, "Graylog config is empty");
        *known = KnownCredentials { user, password };
        return Ok(false);
    }
    let mut updated = config.clone();
    for (field, value) in &rewrites {
        if let Some(text) = rewrite_config(&updated, field, value) {
            updated = text;
        }
    }
    if updated == config {
        *known = KnownCredentials { user, password };
        return Ok(false);
    }
    cm.data
        .get_or_insert_with(Default::default)
        .insert(GRAYLOG_CONFIG_FILE.to_string(), updated);
    platform
        .replace(&Resource::ConfigMap(cm))
        .await
        .map_err(|e| Error::ReplaceResourceFailed(kind, GRAYLOG_SERVICE_NAME.to_string(), e))?;
    *known = KnownCredentials { user, password };
    info!(fields = ?rewrites.iter().map(|(f, _)| *f).collect::<Vec<_>>(), "Graylog credentials rewritten");
    Ok(true)
}

async fn watch_loop(
    platform: Arc<dyn Platform>,
    mut events: SecretEvents,
    secret_name: String,
    mut known: KnownCredentials,
) {
    info!(secret = %secret_name, selector = GRAYLOG_SECRET_SELECTOR, "Start watching for Secret events");
    while let Some(event) = events.next().await {
        let secrets = match event {
            Ok(watcher::Event::Applied(secret)) => vec![secret],
            Ok(watcher::Event::Restarted(secrets)) => secrets,
            Ok(watcher::Event::Deleted(secret)) => {
                debug!(secret = ?secret.metadata.name, "Ignoring deleted Secret");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Secret watch error");
                continue;
            }
        };
        for secret in secrets
            .iter()
            .filter(|s| s.metadata.name.as_deref() == Some(secret_name.as_str()))
        {
            if let Err(e) = apply_secret(platform.as_ref(), secret, &mut known).await {
                error!(error = %e, "Error while working with Secret");
            }
        }
    }
    info!(secret = %secret_name, "Secret watch channel is closed");
}

struct Watch {
    secret_uid: String,
    handle: JoinHandle<()>,
}

/// One credential watch per `LoggingService`, replaced when the secret is recreated.
#[derive(Default)]
pub struct SecretWatchers {
    watches: Mutex<HashMap<String, Watch>>,
}

impl SecretWatchers {
    /// Starts a watch for `owner` unless one for the same secret object is still running.
    pub fn ensure(
        &self,
        owner: &str,
        platform: Arc<dyn Platform>,
        secret: &corev1::Secret,
        known: KnownCredentials,
    ) {
        let secret_uid = secret.metadata.uid.clone().unwrap_or_default();
        let mut watches = match self.watches.lock() {
            Ok(watches) => watches,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = watches.get(owner) {
            if existing.secret_uid == secret_uid && !existing.handle.is_finished() {
                return;
            }
            info!(%owner, "Restarting Secret watch");
            existing.handle.abort();
        }
        let events = platform.watch_secrets(GRAYLOG_SECRET_SELECTOR);
        let secret_name = secret.metadata.name.clone().unwrap_or_default();
        let handle = tokio::spawn(watch_loop(platform, events, secret_name, known));
        watches.insert(owner.to_string(), Watch { secret_uid, handle });
    }

    pub fn stop(&self, owner: &str) {
        let mut watches = match self.watches.lock() {
            Ok(watches) => watches,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(watch) = watches.remove(owner) {
            info!(%owner, "Stopping Secret watch");
            watch.handle.abort();
        }
    }

    pub fn is_running(&self, owner: &str) -> bool {
        let watches = match self.watches.lock() {
            Ok(watches) => watches,
            Err(poisoned) => poisoned.into_inner(),
        };
        matches!(watches.get(owner), Some(w) if !w.handle.is_finished())
    }
}
