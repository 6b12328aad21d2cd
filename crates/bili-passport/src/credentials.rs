//! Session credentials and their process-wide store.
//!
//! A confirmed login yields three cookies: `SESSDATA` (the session),
//! `bili_jct` (the CSRF token) and `DedeUserID` (the numeric account id).
//! Every authenticated request sends all three back in one `Cookie` header.

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::cookie_utils::extract_cookie_value;
use crate::error::{PassportError, Result};

pub(crate) const SESSDATA: &str = "SESSDATA";
pub(crate) const BILI_JCT: &str = "bili_jct";
pub(crate) const DEDE_USER_ID: &str = "DedeUserID";

const ENV_SESSDATA: &str = "BILI_SESSDATA";
const ENV_BILI_JCT: &str = "BILI_JCT";
const ENV_UID: &str = "BILI_UID";

/// One authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    sessdata: String,
    bili_jct: String,
    dede_user_id: String,
}

impl Credentials {
    pub fn new(
        sessdata: impl Into<String>,
        bili_jct: impl Into<String>,
        dede_user_id: impl Into<String>,
    ) -> Self {
        Self {
            sessdata: sessdata.into(),
            bili_jct: bili_jct.into(),
            dede_user_id: dede_user_id.into(),
        }
    }

    /// Build credentials from the `Set-Cookie` pairs of a confirmed login.
    pub fn from_set_cookies(pairs: &[(String, String)]) -> Result<Self> {
        Ok(Self {
            sessdata: required(pairs, SESSDATA)?,
            bili_jct: required(pairs, BILI_JCT)?,
            dede_user_id: required(pairs, DEDE_USER_ID)?,
        })
    }

    /// Build credentials from a `Cookie`-style string, e.g. one exported
    /// from a browser session.
    pub fn from_cookie_str(cookies: &str) -> Result<Self> {
        let value = |name: &'static str| {
            extract_cookie_value(cookies, name).ok_or(PassportError::MissingCookie(name))
        };
        Ok(Self {
            sessdata: value(SESSDATA)?,
            bili_jct: value(BILI_JCT)?,
            dede_user_id: value(DEDE_USER_ID)?,
        })
    }

    /// Read credentials from `BILI_SESSDATA`, `BILI_JCT` and `BILI_UID`.
    ///
    /// Returns `None` unless all three are present and non-empty.
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Some(Self {
            sessdata: var(ENV_SESSDATA)?,
            bili_jct: var(ENV_BILI_JCT)?,
            dede_user_id: var(ENV_UID)?,
        })
    }

    pub fn sessdata(&self) -> &str {
        &self.sessdata
    }

    /// The CSRF token required by state-changing form posts.
    pub fn csrf(&self) -> &str {
        &self.bili_jct
    }

    pub fn user_id(&self) -> &str {
        &self.dede_user_id
    }

    /// Render the `Cookie` header for outbound requests.
    pub fn cookie_header(&self) -> String {
        format!(
            "{SESSDATA}={}; {BILI_JCT}={}; {DEDE_USER_ID}={}",
            self.sessdata, self.bili_jct, self.dede_user_id
        )
    }
}

fn required(pairs: &[(String, String)], name: &'static str) -> Result<String> {
    pairs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
        .ok_or(PassportError::MissingCookie(name))
}

/// Process-wide credential holder.
///
/// Readers get value snapshots; the lock is never held across an await.
#[derive(Default)]
pub struct CredentialStore {
    inner: RwLock<Option<Credentials>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded from the environment when all three `BILI_*`
    /// variables are set, empty otherwise.
    pub fn from_env() -> Self {
        let store = Self::new();
        if let Some(credentials) = Credentials::from_env() {
            info!(
                user_id = %credentials.user_id(),
                "credentials provisioned from environment"
            );
            store.set(credentials);
        }
        store
    }

    /// Replace the stored credentials.
    pub fn set(&self, credentials: Credentials) {
        debug!(user_id = %credentials.user_id(), "credentials stored");
        *self.inner.write() = Some(credentials);
    }

    /// Snapshot of the current credentials, if any.
    pub fn get(&self) -> Option<Credentials> {
        self.inner.read().clone()
    }

    /// Drop the stored credentials.
    pub fn clear(&self) {
        debug!("credentials cleared");
        *self.inner.write() = None;
    }

    pub fn is_provisioned(&self) -> bool {
        self.inner.read().is_some()
    }
}
