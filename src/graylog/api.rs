use crate::error::Error;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

/// One JSON-over-HTTP endpoint rooted at a fixed base path.
#[async_trait]
pub trait RestApi: Send + Sync {
    async fn call(&self, method: Method, path: &str, body: Option<&str>)
        -> Result<Response, Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Auth {
    Anonymous,
    Basic { user: String, password: String },
    Bearer(String),
}

impl Auth {
    pub fn header(&self) -> Option<String> {
        match self {
            Auth::Anonymous => None,
            Auth::Basic { user, password } => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", user, password))
            )),
            Auth::Bearer(token) => Some(format!("Bearer {}", token)),
        }
    }
}

pub struct HttpRestApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRestApi {
    /// `builder` carries the TLS setup; the JSON and API-browser headers are added here.
    pub fn new(
        builder: reqwest::ClientBuilder,
        base_url: &str,
        auth: &Auth,
        timeout: std::time::Duration,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-Requested-By",
            HeaderValue::from_static("Graylog API Browser"),
        );
        if let Some(value) = auth.header() {
            let mut value = HeaderValue::from_str(&value).map_err(|_| {
                Error::CredentialResolveFailed("credentials contain invalid characters".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = builder
            .default_headers(headers)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(Error::HttpClientBuildFailed)?;
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        Ok(HttpRestApi { client, base_url })
    }
}

#[async_trait]
impl RestApi for HttpRestApi {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<Response, Error> {
        let url = format!("{}{}", self.base_url, path.trim_start_matches('/'));
        debug!(%method, %url, "Sending request");
        let mut request = self.client.request(method.into(), &url);
        if let Some(body) = body {
            request = request.body(body.to_string());
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::RequestFailed(format!("{} {}", method, path), e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::RequestFailed(format!("read response of {} {}", method, path), e))?;
        Ok(Response { status, body })
    }
}

/// The `{id, title}` view of an object inside the product.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Entity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
}

pub fn find_id<'a>(entities: &'a [Entity], title: &str) -> Option<&'a str> {
    entities
        .iter()
        .find(|e| e.title == title)
        .map(|e| e.id.as_str())
}

pub fn expect_status(response: Response, allowed: &[u16], operation: &str) -> Result<Response, Error> {
    if allowed.contains(&response.status) {
        Ok(response)
    } else {
        debug!(operation, status = response.status, body = %response.body, "Unexpected response");
        Err(Error::unexpected_status(operation, response.status))
    }
}

pub async fn send(
    api: &dyn RestApi,
    method: Method,
    path: &str,
    body: Option<&Value>,
    allowed: &[u16],
    operation: &str,
) -> Result<Response, Error> {
    let body = body.map(|b| b.to_string());
    let response = api.call(method, path, body.as_deref()).await?;
    expect_status(response, allowed, operation)
}

pub async fn get_json(api: &dyn RestApi, path: &str, operation: &str) -> Result<Value, Error> {
    let response = send(api, Method::Get, path, None, &[200], operation).await?;
    serde_json::from_str(&response.body).map_err(|e| Error::ParseFailed(path.to_string(), e))
}

/// Lists a collection that is either a bare array or nested under `field`.
pub async fn fetch_entities(
    api: &dyn RestApi,
    path: &str,
    field: Option<&str>,
) -> Result<Vec<Entity>, Error> {
    let value = get_json(api, path, &format!("get {}", path)).await?;
    let items = match field {
        Some(field) => value.get(field).cloned().unwrap_or(Value::Array(Vec::new())),
        None => value,
    };
    serde_json::from_value(items).map_err(|e| Error::ParseFailed(path.to_string(), e))
}
