use crate::config::OperatorConfig;
use crate::error::Error;
use crate::graylog::api::Auth;
use crate::loggingservice_types::*;
use crate::platform::Platform;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;
use tracing::*;

type SecretData = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Client-side TLS settings. An empty CA bundle means the platform roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub insecure: bool,
    pub ca_bundle: Vec<Vec<u8>>,
    pub identity: Option<ClientIdentity>,
}

impl TlsMaterial {
    pub fn insecure() -> Self {
        TlsMaterial {
            insecure: true,
            ..TlsMaterial::default()
        }
    }

    pub fn configure(&self, builder: reqwest::ClientBuilder) -> Result<reqwest::ClientBuilder, Error> {
        if self.insecure {
            return Ok(builder.danger_accept_invalid_certs(true));
        }
        let mut builder = builder;
        for pem in &self.ca_bundle {
            let cert = reqwest::Certificate::from_pem(pem).map_err(Error::HttpClientBuildFailed)?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = &self.identity {
            let mut pem = identity.cert.clone();
            pem.push(b'\n');
            pem.extend_from_slice(&identity.key);
            let identity = reqwest::Identity::from_pem(&pem).map_err(Error::HttpClientBuildFailed)?;
            builder = builder.identity(identity);
        }
        Ok(builder)
    }
}

/// Everything needed to talk to one HTTP endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpAccess {
    pub auth: Auth,
    pub tls: TlsMaterial,
}

impl Default for HttpAccess {
    fn default() -> Self {
        HttpAccess {
            auth: Auth::Anonymous,
            tls: TlsMaterial::default(),
        }
    }
}

fn selector_name(selector: &corev1::SecretKeySelector) -> Option<&str> {
    selector.name.as_deref().filter(|n| !n.is_empty())
}

async fn read_secret(platform: &dyn Platform, name: &str) -> Result<SecretData, Error> {
    let secret = platform
        .get_secret(name)
        .await
        .map_err(|e| Error::GetSecretFailed(name.to_string(), e))?
        .ok_or_else(|| {
            Error::CredentialResolveFailed(format!(
                "can't find secret {} in namespace {}",
                name,
                platform.namespace()
            ))
        })?;
    Ok(secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect())
}

fn secret_key(data: &SecretData, secret: &str, key: &str) -> Result<Vec<u8>, Error> {
    data.get(key).filter(|v| !v.is_empty()).cloned().ok_or_else(|| {
        Error::CredentialResolveFailed(format!("can't find key {} in secret {}", key, secret))
    })
}

fn utf8(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).to_string()
}

/// Basic or bearer authentication from the referenced secrets. A token wins
/// over a user/password pair; partial user/password selectors are an error.
pub async fn resolve_credentials(platform: &dyn Platform, credentials: &Credentials) -> Result<Auth, Error> {
    if let Some((token, name)) = credentials
        .token
        .as_ref()
        .and_then(|t| selector_name(t).map(|n| (t, n)))
    {
        let data = read_secret(platform, name).await?;
        return Ok(Auth::Bearer(utf8(secret_key(&data, name, &token.key)?)));
    }
    let (user, password) = match (&credentials.user, &credentials.password) {
        (Some(user), Some(password)) => match (selector_name(user), selector_name(password)) {
            (Some(user_secret), Some(password_secret)) => {
                ((user, user_secret), (password, password_secret))
            }
            _ => return Err(partial_credentials()),
        },
        _ => return Err(partial_credentials()),
    };
    let user_data = read_secret(platform, user.1).await?;
    let password_data = if user.1 == password.1 {
        user_data.clone()
    } else {
        read_secret(platform, password.1).await?
    };
    Ok(Auth::Basic {
        user: utf8(secret_key(&user_data, user.1, &user.0.key)?),
        password: utf8(secret_key(&password_data, password.1, &password.0.key)?),
    })
}

fn partial_credentials() -> Error {
    Error::CredentialResolveFailed("authorization data is empty or provided partially".to_string())
}

/// CA and optional client pair. Without a CA selector the platform roots are used.
pub async fn resolve_tls_config(platform: &dyn Platform, tls: &TlsConfig) -> Result<TlsMaterial, Error> {
    if tls.insecure_skip_verify {
        return Ok(TlsMaterial::insecure());
    }
    let (ca, ca_secret) = match tls.ca.as_ref().and_then(|ca| selector_name(ca).map(|n| (ca, n))) {
        Some(found) => found,
        None => return Ok(TlsMaterial::default()),
    };
    let ca_data = read_secret(platform, ca_secret).await?;
    let ca_cert = ca_data.get(&ca.key).filter(|v| !v.is_empty()).cloned().ok_or_else(|| {
        Error::CredentialResolveFailed(format!(
            "can't find Certificate Authority with key {}",
            ca.key
        ))
    })?;

    let identity = match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => {
            let cert = read_selector(platform, cert, ca_secret, &ca_data).await?;
            let key = read_selector(platform, key, ca_secret, &ca_data).await?;
            Some(ClientIdentity { cert, key })
        }
        _ => None,
    };
    Ok(TlsMaterial {
        insecure: false,
        ca_bundle: vec![ca_cert],
        identity,
    })
}

async fn read_selector(
    platform: &dyn Platform,
    selector: &corev1::SecretKeySelector,
    ca_secret: &str,
    ca_data: &SecretData,
) -> Result<Vec<u8>, Error> {
    match selector_name(selector) {
        Some(name) if name == ca_secret => secret_key(ca_data, name, &selector.key),
        Some(name) => secret_key(&read_secret(platform, name).await?, name, &selector.key),
        None => Err(Error::CredentialResolveFailed(format!(
            "secret name is not set for key {}",
            selector.key
        ))),
    }
}

/// Credentials and TLS of an external endpoint. No TLS section, or an
/// insecure one, disables verification.
pub async fn resolve_http_config(platform: &dyn Platform, config: Option<&HttpConfig>) -> Result<HttpAccess, Error> {
    let config = match config {
        Some(config) => config,
        None => {
            return Ok(HttpAccess {
                auth: Auth::Anonymous,
                tls: TlsMaterial::insecure(),
            })
        }
    };
    let auth = match &config.credentials {
        Some(credentials) => resolve_credentials(platform, credentials).await?,
        None => Auth::Anonymous,
    };
    let tls = match &config.tls_config {
        Some(tls) if !tls.insecure_skip_verify => resolve_tls_config(platform, tls).await?,
        _ => TlsMaterial::insecure(),
    };
    Ok(HttpAccess { auth, tls })
}

async fn read_key_ref(platform: &dyn Platform, key_ref: &SecretKeyRef, fallback: &SecretData) -> Result<Vec<u8>, Error> {
    if let Some(value) = fallback.get(&key_ref.secret_key).filter(|v| !v.is_empty()) {
        return Ok(value.clone());
    }
    let data = read_secret(platform, &key_ref.secret_name).await?;
    secret_key(&data, &key_ref.secret_name, &key_ref.secret_key)
}

/// TLS towards Graylog's own HTTPS endpoint.
pub async fn resolve_graylog_tls(platform: &dyn Platform, tls: &HttpGraylogTls) -> Result<TlsMaterial, Error> {
    if tls.insecure_skip_verify {
        return Ok(TlsMaterial::insecure());
    }
    if let Some(cacerts) = tls.cacerts.as_deref().filter(|c| !c.is_empty()) {
        let data = read_secret(platform, cacerts).await?;
        if data.is_empty() {
            return Err(Error::CredentialResolveFailed(format!(
                "can't find Certificate Authority {}",
                cacerts
            )));
        }
        let identity = match (&tls.cert, &tls.key) {
            (Some(cert), Some(key)) => Some(ClientIdentity {
                cert: read_key_ref(platform, cert, &data).await?,
                key: read_key_ref(platform, key, &data).await?,
            }),
            _ => None,
        };
        return Ok(TlsMaterial {
            insecure: false,
            ca_bundle: data.into_values().collect(),
            identity,
        });
    }
    match &tls.generate_certs {
        Some(generated) if generated.enabled => {
            let data = read_secret(platform, &generated.secret_name).await?;
            if data.is_empty() {
                return Err(Error::CredentialResolveFailed(format!(
                    "can't find generate certificates {}",
                    generated.secret_name
                )));
            }
            let name = &generated.secret_name;
            Ok(TlsMaterial {
                insecure: false,
                ca_bundle: vec![secret_key(&data, name, "ca.crt")?],
                identity: Some(ClientIdentity {
                    cert: secret_key(&data, name, "tls.crt")?,
                    key: secret_key(&data, name, "tls.key")?,
                }),
            })
        }
        _ => Err(Error::CredentialResolveFailed(
            "can't find any certificate configured".to_string(),
        )),
    }
}

/// Admin API login: the pair from the Graylog secret, otherwise the process environment.
pub fn admin_auth(from_secret: Option<(&str, &str)>, config: &OperatorConfig) -> Result<Auth, Error> {
    match from_secret {
        Some((user, password)) if !user.is_empty() && !password.is_empty() => Ok(Auth::Basic {
            user: user.to_string(),
            password: password.to_string(),
        }),
        _ => match (&config.graylog_username, &config.graylog_password) {
            (Some(user), Some(password)) => {
                debug!("Using Graylog credentials from the environment");
                Ok(Auth::Basic {
                    user: user.clone(),
                    password: password.clone(),
                })
            }
            _ => Err(Error::CredentialResolveFailed(
                "Graylog credentials are not provided".to_string(),
            )),
        },
    }
}
