//! Shared scripted-transport test builders.
//!
//! This module is available for local tests and optionally for downstream
//! crate tests when the `test-utils` feature is enabled.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::gateway::{GatewayError, HttpGateway, JsonResponse};

/// One recorded [`HttpGateway`] invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub cookies: Option<String>,
}

#[derive(Clone)]
struct ScriptStep {
    reply: Result<JsonResponse, GatewayError>,
    delay: Option<std::time::Duration>,
}

/// Scripted [`HttpGateway`] for tests.
///
/// Responses are enqueued per URL and consumed in order; the last step for
/// a URL repeats once the queue is down to it, so open-ended polling
/// scenarios stay scriptable. Every invocation is recorded.
#[derive(Default)]
pub struct MockGateway {
    routes: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    bytes_routes: Mutex<HashMap<String, Bytes>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a JSON reply for `url`.
    pub fn enqueue_json(&self, url: &str, body: Value) {
        self.enqueue(url, Ok(JsonResponse { body, set_cookies: Vec::new() }), None);
    }

    /// Enqueue a JSON reply that also sets cookies.
    pub fn enqueue_json_with_cookies(&self, url: &str, body: Value, cookies: &[(&str, &str)]) {
        let set_cookies = cookies
            .iter()
            .map(|&(n, v)| (n.to_string(), v.to_string()))
            .collect();
        self.enqueue(url, Ok(JsonResponse { body, set_cookies }), None);
    }

    /// Enqueue a JSON reply served after `delay` of tokio time.
    pub fn enqueue_delayed_json(&self, url: &str, body: Value, delay: std::time::Duration) {
        self.enqueue(
            url,
            Ok(JsonResponse { body, set_cookies: Vec::new() }),
            Some(delay),
        );
    }

    /// Enqueue a transport-level failure for `url`.
    pub fn enqueue_error(&self, url: &str, err: GatewayError) {
        self.enqueue(url, Err(err), None);
    }

    /// Serve `bytes` for `get_bytes` calls on `url`.
    pub fn set_bytes(&self, url: &str, bytes: Bytes) {
        self.bytes_routes.lock().insert(url.to_string(), bytes);
    }

    /// All recorded invocations, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// How many times `url` (or `url` plus a query string) was requested.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url.starts_with(url))
            .count()
    }

    fn enqueue(
        &self,
        url: &str,
        reply: Result<JsonResponse, GatewayError>,
        delay: Option<std::time::Duration>,
    ) {
        self.routes
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(ScriptStep { reply, delay });
    }

    fn next_step(&self, url: &str) -> Option<ScriptStep> {
        let mut routes = self.routes.lock();
        // Exact match first, then treat a scripted URL as a prefix so
        // requests with appended query strings still resolve.
        let key = if routes.contains_key(url) {
            url.to_string()
        } else {
            routes
                .keys()
                .find(|k| url.starts_with(k.as_str()))?
                .clone()
        };
        let queue = routes.get_mut(&key)?;
        let step = queue.front()?.clone();
        if queue.len() > 1 {
            queue.pop_front();
        }
        Some(step)
    }

    fn record(
        &self,
        method: &'static str,
        url: &str,
        query: &[(&str, &str)],
        form: &[(&str, &str)],
        cookies: Option<&str>,
    ) {
        let owned = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|&(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        self.calls.lock().push(RecordedCall {
            method,
            url: url.to_string(),
            query: owned(query),
            form: owned(form),
            cookies: cookies.map(str::to_string),
        });
    }

    async fn respond(&self, url: &str) -> Result<JsonResponse, GatewayError> {
        let Some(step) = self.next_step(url) else {
            return Err(GatewayError::transport(format!(
                "no scripted response for {url}"
            )));
        };
        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }
        step.reply
    }
}

#[async_trait]
impl HttpGateway for MockGateway {
    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cookies: Option<&str>,
    ) -> Result<JsonResponse, GatewayError> {
        self.record("GET", url, query, &[], cookies);
        self.respond(url).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        cookies: Option<&str>,
    ) -> Result<JsonResponse, GatewayError> {
        self.record("POST", url, &[], form, cookies);
        self.respond(url).await
    }

    async fn get_bytes(
        &self,
        url: &str,
        query: &[(&str, &str)],
        cookies: Option<&str>,
    ) -> Result<Bytes, GatewayError> {
        self.record("GET", url, query, &[], cookies);
        self.bytes_routes
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| GatewayError::transport(format!("no scripted bytes for {url}")))
    }
}

/// Nav endpoint body carrying the given key stems.
pub fn nav_body(img_stem: &str, sub_stem: &str) -> Value {
    json!({
        "code": 0,
        "message": "0",
        "data": {
            "isLogin": false,
            "wbi_img": {
                "img_url": format!("https://i0.hdslb.com/bfs/wbi/{img_stem}.png"),
                "sub_url": format!("https://i0.hdslb.com/bfs/wbi/{sub_stem}.png")
            }
        }
    })
}

/// QR generate endpoint body.
pub fn generate_body(qr_url: &str, qrcode_key: &str) -> Value {
    json!({
        "code": 0,
        "message": "0",
        "data": {
            "url": qr_url,
            "qrcode_key": qrcode_key
        }
    })
}

/// QR poll endpoint body with the given `data.code`.
pub fn poll_body(data_code: i64) -> Value {
    json!({
        "code": 0,
        "message": "0",
        "data": {
            "url": "",
            "refresh_token": "",
            "timestamp": 0,
            "code": data_code,
            "message": ""
        }
    })
}
