use crate::common::{graylog_host, GRAYLOG_HTTP_PORT};
use crate::config::OperatorConfig;
use crate::credentials::{resolve_graylog_tls, resolve_http_config, HttpAccess, TlsMaterial};
use crate::error::Error;
use crate::graylog::api::{Auth, HttpRestApi, RestApi};
use crate::loggingservice_types::Graylog;
use crate::platform::Platform;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::header::AUTHORIZATION;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::*;

/// Admin API of the search-index backend behind Graylog.
pub struct SearchBackend {
    pub host: String,
    pub api: Arc<dyn RestApi>,
}

/// Everything the synchronizer talks to during one pass.
pub struct Connection {
    pub graylog: Arc<dyn RestApi>,
    pub search: Option<SearchBackend>,
    pub content: Arc<dyn ContentSource>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, url: &str, access: &HttpAccess) -> Result<Vec<u8>, Error>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connect(
        &self,
        platform: Arc<dyn Platform>,
        graylog: &Graylog,
        auth: &Auth,
    ) -> Result<Connection, Error>;
}

pub struct HttpContentSource {
    timeout: Duration,
}

impl HttpContentSource {
    pub fn new(timeout: Duration) -> Self {
        HttpContentSource { timeout }
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(&self, url: &str, access: &HttpAccess) -> Result<Vec<u8>, Error> {
        let client = access
            .tls
            .configure(reqwest::Client::builder().connect_timeout(self.timeout))?
            .build()
            .map_err(Error::HttpClientBuildFailed)?;
        let mut request = client.get(url);
        if let Some(header) = access.auth.header() {
            request = request.header(AUTHORIZATION, header);
        }
        let operation = format!("download {}", url);
        let response = request
            .send()
            .await
            .map_err(|e| Error::RequestFailed(operation.clone(), e))?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(Error::unexpected_status(operation, status));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::RequestFailed(operation, e))?;
        Ok(bytes.to_vec())
    }
}

/// `http(s)://graylog-service.<ns>.svc:9000/api/`
pub fn graylog_api_url(namespace: &str, https: bool) -> String {
    format!(
        "{}://{}:{}/api/",
        if https { "https" } else { "http" },
        graylog_host(namespace),
        GRAYLOG_HTTP_PORT
    )
}

/// Splits user info out of a backend URL into Basic credentials; `https`
/// without any TLS configuration skips verification.
pub fn parse_backend_url(raw: &str) -> Result<(String, HttpAccess), Error> {
    let mut url = reqwest::Url::parse(raw)
        .map_err(|e| Error::Configuration(format!("invalid search backend URL: {}", e)))?;
    let auth = match (url.username(), url.password()) {
        ("", _) => Auth::Anonymous,
        (user, password) => Auth::Basic {
            user: user.to_string(),
            password: password.unwrap_or_default().to_string(),
        },
    };
    let tls = if url.scheme() == "https" {
        TlsMaterial::insecure()
    } else {
        TlsMaterial::default()
    };
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Ok((url.to_string(), HttpAccess { auth, tls }))
}

pub struct HttpConnectorFactory {
    elasticsearch_host: Option<String>,
    timeout: Duration,
}

impl HttpConnectorFactory {
    pub fn new(config: &OperatorConfig, timeout: Duration) -> Self {
        HttpConnectorFactory {
            elasticsearch_host: config.elasticsearch_host.clone(),
            timeout,
        }
    }

    async fn search_backend(
        &self,
        platform: &dyn Platform,
        graylog: &Graylog,
    ) -> Result<Option<SearchBackend>, Error> {
        let (host, access) = match &graylog.open_search {
            Some(open_search) if !open_search.url.is_empty() => (
                open_search.url.clone(),
                resolve_http_config(platform, open_search.http_config.as_ref()).await?,
            ),
            _ => match &self.elasticsearch_host {
                Some(raw) => parse_backend_url(raw)?,
                None => {
                    debug!("No search backend configured");
                    return Ok(None);
                }
            },
        };
        let builder = access.tls.configure(reqwest::Client::builder())?;
        let api = HttpRestApi::new(builder, &host, &access.auth, self.timeout)?;
        Ok(Some(SearchBackend {
            host,
            api: Arc::new(api),
        }))
    }
}

#[async_trait]
impl ConnectorFactory for HttpConnectorFactory {
    async fn connect(
        &self,
        platform: Arc<dyn Platform>,
        graylog: &Graylog,
        auth: &Auth,
    ) -> Result<Connection, Error> {
        let (base_url, builder) = match graylog.http_tls() {
            Some(tls) => {
                let material = resolve_graylog_tls(platform.as_ref(), tls).await?;
                (
                    graylog_api_url(platform.namespace(), true),
                    material.configure(reqwest::Client::builder())?,
                )
            }
            None => (
                graylog_api_url(platform.namespace(), false),
                reqwest::Client::builder(),
            ),
        };
        debug!(url = %base_url, "Connecting to Graylog");
        let api = HttpRestApi::new(builder, &base_url, auth, self.timeout)?;
        Ok(Connection {
            graylog: Arc::new(api),
            search: self.search_backend(platform.as_ref(), graylog).await?,
            content: Arc::new(HttpContentSource::new(self.timeout)),
        })
    }
}
