//! HTTP transport abstraction.
//!
//! Signing and login components talk to the network through [`HttpGateway`],
//! so callers can inject their own transport and tests can substitute a
//! scripted one. [`ReqwestGateway`] is the shipped implementation.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::cookie_utils;

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
pub(crate) const BASE_REFERER: &str = "https://www.bilibili.com";

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Transport-level errors.
///
/// Variants carry strings rather than client-library types so that
/// [`HttpGateway`] implementations are not tied to `reqwest`.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Connection, DNS, TLS or read failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Response body could not be decoded.
    #[error("Body decode error: {0}")]
    Body(String),
}

impl GatewayError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a body decode error.
    pub fn body(msg: impl Into<String>) -> Self {
        Self::Body(msg.into())
    }

    /// Check if this error is transient and may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(code) => *code == 429 || (500..=599).contains(code),
            Self::Body(_) => false,
        }
    }
}

/// A decoded JSON response together with the `Set-Cookie` pairs it carried.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    /// Parsed response body.
    pub body: Value,
    /// `(name, value)` pairs from the response's `Set-Cookie` headers.
    pub set_cookies: Vec<(String, String)>,
}

impl JsonResponse {
    /// Look up a cookie set by this response.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.set_cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The `code` field of a provider envelope, `-1` when absent.
pub(crate) fn envelope_code(body: &Value) -> i64 {
    body.get("code").and_then(Value::as_i64).unwrap_or(-1)
}

/// The `message` field of a provider envelope.
pub(crate) fn envelope_message(body: &Value) -> &str {
    body.get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
}

/// Outbound HTTP operations needed by the passport components.
#[async_trait]
pub trait HttpGateway: Send + Sync {
    /// GET `url` with `query` appended, expecting a JSON body.
    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cookies: Option<&str>,
    ) -> Result<JsonResponse, GatewayError>;

    /// POST `form` to `url` as `application/x-www-form-urlencoded`,
    /// expecting a JSON body.
    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        cookies: Option<&str>,
    ) -> Result<JsonResponse, GatewayError>;

    /// GET `url` with `query` appended, returning the raw body.
    async fn get_bytes(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cookies: Option<&str>,
    ) -> Result<Bytes, GatewayError>;
}

/// `reqwest`-backed [`HttpGateway`].
pub struct ReqwestGateway {
    client: Client,
}

impl ReqwestGateway {
    /// Build a gateway with the browser profile the provider expects.
    pub fn new() -> Result<Self, GatewayError> {
        let client = Client::builder()
            .user_agent(DEFAULT_UA)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::transport(format!("client build: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing `reqwest` client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn apply_cookies(
        req: reqwest::RequestBuilder,
        cookies: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match cookies {
            Some(header) => req.header(reqwest::header::COOKIE, header),
            None => req,
        }
    }

    async fn decode_json(response: reqwest::Response) -> Result<JsonResponse, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        let set_cookies = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .filter_map(cookie_utils::parse_set_cookie)
            .collect();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::body(e.to_string()))?;
        Ok(JsonResponse { body, set_cookies })
    }
}

#[async_trait]
impl HttpGateway for ReqwestGateway {
    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cookies: Option<&str>,
    ) -> Result<JsonResponse, GatewayError> {
        let req = self
            .client
            .get(url)
            .query(query)
            .header(reqwest::header::REFERER, BASE_REFERER);
        let response = Self::apply_cookies(req, cookies)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        Self::decode_json(response).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        cookies: Option<&str>,
    ) -> Result<JsonResponse, GatewayError> {
        let req = self
            .client
            .post(url)
            .form(form)
            .header(reqwest::header::REFERER, BASE_REFERER);
        let response = Self::apply_cookies(req, cookies)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        Self::decode_json(response).await
    }

    async fn get_bytes(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cookies: Option<&str>,
    ) -> Result<Bytes, GatewayError> {
        let req = self
            .client
            .get(url)
            .query(query)
            .header(reqwest::header::REFERER, BASE_REFERER);
        let response = Self::apply_cookies(req, cookies)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        response
            .bytes()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))
    }
}
