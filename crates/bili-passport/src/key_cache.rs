//! Signing key cache.
//!
//! The provider rotates WBI key material roughly daily and serves it from
//! the nav endpoint. The cache keeps one fetched set for a fixed validity
//! window and coalesces concurrent refreshes into a single fetch.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{PassportError, Result};
use crate::gateway::HttpGateway;

pub(crate) const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";

const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// One set of WBI signing keys.
#[derive(Debug, Clone)]
pub struct WbiKeys {
    img_key: String,
    sub_key: String,
    fetched_at: Instant,
}

impl WbiKeys {
    pub fn img_key(&self) -> &str {
        &self.img_key
    }

    pub fn sub_key(&self) -> &str {
        &self.sub_key
    }

    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() > CACHE_TTL
    }
}

#[derive(Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

#[derive(Deserialize)]
struct NavData {
    wbi_img: WbiImg,
}

#[derive(Deserialize)]
struct NavRes {
    data: NavData,
}

/// TTL'd store for WBI key material.
pub struct WbiKeyCache {
    gateway: Arc<dyn HttpGateway>,
    keys: RwLock<Option<WbiKeys>>,
    refresh_lock: Mutex<()>,
}

impl WbiKeyCache {
    pub fn new(gateway: Arc<dyn HttpGateway>) -> Self {
        Self {
            gateway,
            keys: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current key material, fetched or refreshed as needed.
    ///
    /// Returns a snapshot; a concurrent refresh never mutates keys a caller
    /// already holds.
    pub async fn get(&self) -> Result<WbiKeys> {
        if let Some(keys) = self.fresh_snapshot() {
            return Ok(keys);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(keys) = self.fresh_snapshot() {
            return Ok(keys);
        }

        let keys = self.fetch_keys().await?;
        *self.keys.write() = Some(keys.clone());
        Ok(keys)
    }

    fn fresh_snapshot(&self) -> Option<WbiKeys> {
        let guard = self.keys.read();
        guard.as_ref().filter(|k| !k.is_stale()).cloned()
    }

    async fn fetch_keys(&self) -> Result<WbiKeys> {
        debug!("fetching wbi key material");
        let response = self
            .gateway
            .get_json(NAV_URL, &[], None)
            .await
            .map_err(|e| PassportError::key_fetch(e.to_string()))?;

        // The nav envelope reports -101 for guests while still carrying
        // wbi_img, so the envelope code is not consulted here.
        let NavRes {
            data: NavData { wbi_img },
        } = serde_json::from_value(response.body)
            .map_err(|e| PassportError::key_fetch(format!("nav response shape: {e}")))?;

        let img_key = extract_key(&wbi_img.img_url, "img_url")?;
        let sub_key = extract_key(&wbi_img.sub_url, "sub_url")?;
        debug!(%img_key, %sub_key, "fetched wbi key material");

        Ok(WbiKeys {
            img_key,
            sub_key,
            fetched_at: Instant::now(),
        })
    }
}

fn extract_key(url: &str, field: &'static str) -> Result<String> {
    match take_filename_stem(url) {
        Some(stem) if !stem.is_empty() => Ok(stem),
        _ => Err(PassportError::invalid_key_format(format!(
            "{field} has no filename stem: {url}"
        ))),
    }
}

fn take_filename_stem(url: &str) -> Option<String> {
    url.rsplit_once('/')
        .and_then(|(_, s)| s.rsplit_once('.'))
        .map(|(stem, _)| stem.to_string())
}
