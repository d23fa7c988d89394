use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use url::Url;

use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};
use crate::{Locator, Transport, TransportError, TransportFut};

const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub base_url: Url,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub https_only: bool,
    pub retry: RetryConfig,
}

impl HttpSettings {
    pub fn from_config(config: &hangar_config::HangarConfig) -> Result<Self, TransportError> {
        let raw = config.api.resolved_base_url();
        let base_url = Url::parse(&raw).map_err(|source| TransportError::InvalidLocator {
            locator: raw.clone(),
            reason: source.to_string(),
        })?;
        Ok(Self {
            base_url,
            timeout: config.api.timeout(),
            connect_timeout: config.api.connect_timeout(),
            https_only: config.api.https_only,
            retry: RetryConfig::from_section(&config.retry),
        })
    }
}

fn base_client_builder(settings: &HttpSettings) -> reqwest::ClientBuilder {
    use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.timeout)
        .https_only(settings.https_only)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
}

/// JSON-over-HTTP transport backed by a single pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryConfig,
}

impl HttpTransport {
    pub fn new(settings: HttpSettings) -> Result<Self, TransportError> {
        let client = base_client_builder(&settings).build().map_err(|source| {
            TransportError::Connection {
                locator: settings.base_url.to_string(),
                source,
            }
        })?;
        Ok(Self {
            client,
            base_url: settings.base_url,
            retry: settings.retry,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn read(&self, locator: &Locator) -> Result<Value, TransportError> {
        let url = locator.resolve(&self.base_url)?;
        let outcome = send_with_retry(|| self.client.get(url.clone()), &self.retry).await;
        match outcome {
            RetryOutcome::Success(response) | RetryOutcome::HttpError(response) => {
                decode_response(locator, response).await
            }
            RetryOutcome::ConnectionError { attempts, source } => {
                tracing::debug!(%locator, attempts, error = %source, "GET failed");
                Err(map_send_error(locator, source))
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        locator: &Locator,
        body: Option<Value>,
    ) -> Result<Value, TransportError> {
        let url = locator.resolve(&self.base_url)?;
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body.filter(|body| !body.is_null()) {
            request = request.json(&body);
        }
        tracing::debug!(%method, %locator, "Sending request");
        let response = request
            .send()
            .await
            .map_err(|source| map_send_error(locator, source))?;
        decode_response(locator, response).await
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, locator: &'a Locator) -> TransportFut<'a, Value> {
        Box::pin(self.read(locator))
    }

    fn post<'a>(&'a self, locator: &'a Locator, body: Value) -> TransportFut<'a, Value> {
        Box::pin(self.send_once(Method::POST, locator, Some(body)))
    }

    fn patch<'a>(&'a self, locator: &'a Locator, body: Value) -> TransportFut<'a, Value> {
        Box::pin(self.send_once(Method::PATCH, locator, Some(body)))
    }

    fn delete<'a>(&'a self, locator: &'a Locator) -> TransportFut<'a, ()> {
        Box::pin(async move {
            self.send_once(Method::DELETE, locator, None).await?;
            Ok(())
        })
    }
}

fn map_send_error(locator: &Locator, source: reqwest::Error) -> TransportError {
    if source.is_timeout() {
        TransportError::Timeout {
            locator: locator.to_string(),
        }
    } else {
        TransportError::Connection {
            locator: locator.to_string(),
            source,
        }
    }
}

async fn decode_response(
    locator: &Locator,
    response: reqwest::Response,
) -> Result<Value, TransportError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(TransportError::NotFound {
            locator: locator.to_string(),
        });
    }
    if !status.is_success() {
        let body = read_capped_error_body(response).await;
        return Err(TransportError::Status {
            locator: locator.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|source| map_send_error(locator, source))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|source| TransportError::Decode {
        locator: locator.to_string(),
        source,
    })
}

async fn read_capped_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
