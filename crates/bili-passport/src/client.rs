//! Authenticated API client.
//!
//! Composition root wiring the gateway, the key cache and the credential
//! store together: signed GETs for data endpoints, session validation,
//! and logout.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::credentials::{Credentials, CredentialStore};
use crate::error::{PassportError, Result};
use crate::gateway::{HttpGateway, envelope_code, envelope_message};
use crate::key_cache::{NAV_URL, WbiKeyCache};
use crate::qr_login::{LoginOutcome, QrLoginConfig, QrLoginSession};
use crate::wbi::WbiSigner;

const LOGOUT_URL: &str = "https://passport.bilibili.com/login/exit/v2";

/// High-level passport client.
///
/// One instance is meant to be shared process-wide; all of its state
/// (key cache, credential store) is safe for concurrent use.
pub struct PassportClient {
    gateway: Arc<dyn HttpGateway>,
    signer: WbiSigner,
    store: Arc<CredentialStore>,
}

impl PassportClient {
    /// Client with a store pre-seeded from the `BILI_*` environment
    /// variables when they are set.
    pub fn new(gateway: Arc<dyn HttpGateway>) -> Self {
        Self::with_store(gateway, Arc::new(CredentialStore::from_env()))
    }

    pub fn with_store(gateway: Arc<dyn HttpGateway>, store: Arc<CredentialStore>) -> Self {
        let keys = Arc::new(WbiKeyCache::new(gateway.clone()));
        Self {
            gateway,
            signer: WbiSigner::new(keys),
            store,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// A QR login session sharing this client's transport.
    pub fn qr_login(&self) -> QrLoginSession {
        QrLoginSession::new(self.gateway.clone())
    }

    /// A QR login session with custom polling knobs.
    pub fn qr_login_with_config(&self, config: QrLoginConfig) -> QrLoginSession {
        QrLoginSession::with_config(self.gateway.clone(), config)
    }

    /// Store the credentials of a confirmed login outcome.
    ///
    /// Every other outcome maps onto its error, so callers can finish a
    /// login with one `?`.
    pub fn complete_login(&self, outcome: LoginOutcome) -> Result<Credentials> {
        let credentials = outcome.into_credentials()?;
        self.store.set(credentials.clone());
        Ok(credentials)
    }

    /// GET a WBI-signed endpoint.
    ///
    /// `params` gain `wts` and `w_rid`, the request carries the stored
    /// cookies when present, and the provider envelope is checked. The
    /// decoded body is returned whole.
    #[instrument(skip(self, params))]
    pub async fn signed_get(&self, url: &str, params: &[(&str, &str)]) -> Result<Value> {
        let signed = self.signer.sign(params).await?;
        let api_url = format!("{url}?{}", signed.query());
        debug!(w_rid = signed.w_rid(), "signed request");

        let cookies = self.store.get().map(|c| c.cookie_header());
        let response = self
            .gateway
            .get_json(&api_url, &[], cookies.as_deref())
            .await?;
        check_envelope(&response.body)?;
        Ok(response.body)
    }

    /// Check whether the stored credentials are still accepted, via the
    /// nav endpoint's `isLogin` flag.
    #[instrument(skip(self))]
    pub async fn validate_session(&self) -> Result<bool> {
        let credentials = self.store.get().ok_or(PassportError::NoCredentials)?;
        let response = self
            .gateway
            .get_json(NAV_URL, &[], Some(&credentials.cookie_header()))
            .await?;
        let is_login = response
            .body
            .get("data")
            .and_then(|d| d.get("isLogin"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        debug!(is_login, "session validated");
        Ok(is_login)
    }

    /// Invalidate the session server-side, then clear the store.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let credentials = self.store.get().ok_or(PassportError::NoCredentials)?;
        let response = self
            .gateway
            .post_form(
                LOGOUT_URL,
                &[("biliCSRF", credentials.csrf())],
                Some(&credentials.cookie_header()),
            )
            .await?;
        check_envelope(&response.body)?;
        self.store.clear();
        info!("logged out");
        Ok(())
    }
}

fn check_envelope(body: &Value) -> Result<()> {
    let code = envelope_code(body);
    if code != 0 {
        return Err(PassportError::Api {
            code,
            message: envelope_message(body).to_string(),
        });
    }
    Ok(())
}
