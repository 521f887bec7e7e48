//! HTTP transport with retry logic, timeouts, and cookie support

use crate::error::{DeviceError, DeviceResult};
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Response, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Cookies set by the device in reply to a form submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormReply {
    pub cookies: Vec<(String, String)>,
}

impl FormReply {
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The router's HTTP surface as seen by the session layer.
///
/// Paths are relative to the device root (`data/getCsrf.asp`). The cookie jar
/// lives behind the transport so the session can read back `preSession`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a `.asp` data endpoint and decode its body as JSON
    async fn get_json(&self, path: &str) -> DeviceResult<Value>;

    /// POST an urlencoded form; `timeout` overrides the client default
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> DeviceResult<FormReply>;

    /// Current value of a cookie held for the device
    fn cookie(&self, name: &str) -> Option<String>;
}

/// The login form sets cookies without a `Path`, which scopes them to
/// `/goform` rather than the site root
const LOGIN_SCOPE: &str = "goform/login";

/// Connection settings for [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub host: String,
    pub https: bool,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
}

pub struct HttpTransport {
    inner: Client,
    jar: Arc<Jar>,
    base: Url,
    max_retries: u32,
}

impl HttpTransport {
    pub fn new(settings: &TransportSettings) -> DeviceResult<Self> {
        let scheme = if settings.https { "https" } else { "http" };
        let base = Url::parse(&format!("{}://{}/", scheme, settings.host))
            .map_err(|e| DeviceError::Connectivity(format!("invalid host '{}': {}", settings.host, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0"),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.9"));

        let jar = Arc::new(Jar::default());
        // Hitron firmware ships a self-signed certificate
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(settings.https)
            .build()?;

        Ok(Self {
            inner: client,
            jar,
            base,
            max_retries: settings.max_retries.max(1),
        })
    }

    fn url(&self, path: &str) -> DeviceResult<Url> {
        self.base
            .join(path)
            .map_err(|e| DeviceError::protocol(path, e.to_string()))
    }

    /// Retry up to `max_retries` times with exponential backoff.
    ///
    /// Only used for read-only requests; a repeated reboot or login POST would
    /// change what the device is doing.
    async fn with_retry<F, Fut>(&self, path: &str, request_fn: F) -> DeviceResult<Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<Response>>,
    {
        let mut last_err = None;

        for attempt in 0..self.max_retries {
            let last_attempt = attempt + 1 >= self.max_retries;
            match request_fn().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().is_server_error() && !last_attempt => {
                    let delay = Duration::from_secs(1 << attempt);
                    tracing::warn!(
                        "Server error {} on {}, retrying in {:?}... (attempt {}/{})",
                        resp.status(),
                        path,
                        delay,
                        attempt + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(DeviceError::protocol(
                        path,
                        format!("{} - {}", status, snippet(&text)),
                    ));
                }
                Err(e) if !last_attempt => {
                    let delay = Duration::from_secs(1 << attempt);
                    tracing::warn!(
                        "Request error on {}: {}, retrying in {:?}... (attempt {}/{})",
                        path,
                        e,
                        delay,
                        attempt + 1,
                        self.max_retries
                    );
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err
            .map(Into::into)
            .unwrap_or_else(|| DeviceError::Connectivity("max retries exceeded".into())))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, path: &str) -> DeviceResult<Value> {
        let url = self.url(path)?;
        let resp = self
            .with_retry(path, || self.inner.get(url.clone()).send())
            .await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| DeviceError::protocol(path, e.to_string()))
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> DeviceResult<FormReply> {
        let url = self.url(path)?;
        let mut request = self.inner.post(url).form(form);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(DeviceError::protocol(path, resp.status().to_string()));
        }

        let cookies = resp
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();
        Ok(FormReply { cookies })
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let scopes = [self.url(LOGIN_SCOPE).ok(), Some(self.base.clone())];
        scopes.into_iter().flatten().find_map(|url| {
            let header = self.jar.cookies(&url)?;
            find_cookie(header.to_str().ok()?, name)
        })
    }
}

/// First 50 characters of an error body
fn snippet(text: &str) -> String {
    text.chars().take(50).collect()
}

/// Pick one value out of a `Cookie:` header line
fn find_cookie(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
