//! QR code login.
//!
//! The web passport flow: request a QR code, render it for the user to
//! scan in the mobile app, poll the provider until it reports a terminal
//! status, then lift the session cookies out of the confirmed response.

use std::sync::Arc;
use std::time::Duration;

use qrcode::QrCode;
use qrcode::render::svg;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::credentials::Credentials;
use crate::error::{PassportError, Result};
use crate::gateway::{HttpGateway, envelope_code, envelope_message};

pub(crate) const QR_GENERATE_URL: &str =
    "https://passport.bilibili.com/x/passport-login/web/qrcode/generate";
pub(crate) const QR_POLL_URL: &str =
    "https://passport.bilibili.com/x/passport-login/web/qrcode/poll";

const CODE_CONFIRMED: i64 = 0;
const CODE_WAITING: i64 = 86101;
const CODE_SCANNED: i64 = 86090;
const CODE_EXPIRED: i64 = 86038;

/// One provider-reported observation of the QR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrStatus {
    /// Not scanned yet.
    Waiting,
    /// Scanned but not confirmed.
    Scanned,
    /// Confirmed in the app.
    Confirmed,
    /// The code expired.
    Expired,
}

impl QrStatus {
    /// Decode a `data.code` value.
    ///
    /// The mapping is closed: a code outside the documented set is an
    /// error, never silently folded into a default status.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            CODE_CONFIRMED => Ok(Self::Confirmed),
            CODE_WAITING => Ok(Self::Waiting),
            CODE_SCANNED => Ok(Self::Scanned),
            CODE_EXPIRED => Ok(Self::Expired),
            other => Err(PassportError::UnknownStatusCode(other)),
        }
    }
}

/// Login session state machine.
///
/// `Confirmed` and `Expired` are absorbing: once reached, no observation
/// moves the machine again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QrState {
    /// No QR code generated yet.
    #[default]
    Idle,
    Waiting,
    Scanned,
    Confirmed,
    Expired,
}

impl QrState {
    /// Fold one observation into the state.
    pub fn advance(self, observation: QrStatus) -> Self {
        match self {
            Self::Confirmed | Self::Expired => self,
            _ => match observation {
                QrStatus::Waiting => Self::Waiting,
                QrStatus::Scanned => Self::Scanned,
                QrStatus::Confirmed => Self::Confirmed,
                QrStatus::Expired => Self::Expired,
            },
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Expired)
    }
}

/// A generated login QR code.
#[derive(Debug, Clone)]
pub struct QrSession {
    qrcode_key: String,
    qrcode_url: String,
    qrcode_image: Vec<u8>,
}

impl QrSession {
    /// Key identifying this code in poll requests.
    pub fn qrcode_key(&self) -> &str {
        &self.qrcode_key
    }

    /// The login URL the code encodes.
    pub fn qrcode_url(&self) -> &str {
        &self.qrcode_url
    }

    /// The code rendered as an SVG document.
    pub fn qrcode_image(&self) -> &[u8] {
        &self.qrcode_image
    }
}

/// Result of a single poll.
#[derive(Debug, Clone)]
pub struct QrPollResult {
    /// Provider-reported status.
    pub status: QrStatus,
    /// Session credentials, present exactly when `status` is `Confirmed`.
    pub credentials: Option<Credentials>,
}

/// How a polling loop ended.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// The user confirmed; session credentials were captured.
    Confirmed(Credentials),
    /// The provider expired the code.
    Expired,
    /// The caller's deadline elapsed before a terminal status.
    TimedOut,
    /// The caller's cancellation token fired.
    Cancelled,
}

impl LoginOutcome {
    /// Unwrap a confirmed login, mapping every other outcome onto its
    /// error for callers that want `?` ergonomics.
    pub fn into_credentials(self) -> Result<Credentials> {
        match self {
            Self::Confirmed(credentials) => Ok(credentials),
            Self::Expired => Err(PassportError::QrExpired),
            Self::TimedOut => Err(PassportError::LoginTimeout),
            Self::Cancelled => Err(PassportError::Cancelled),
        }
    }
}

/// Polling knobs.
#[derive(Debug, Clone)]
pub struct QrLoginConfig {
    /// Delay between consecutive polls.
    pub poll_interval: Duration,
    /// Consecutive transient poll failures after which the attempt gives up.
    pub max_transient_retries: u32,
}

impl Default for QrLoginConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_transient_retries: 3,
        }
    }
}

/// Drives one QR login attempt.
pub struct QrLoginSession {
    gateway: Arc<dyn HttpGateway>,
    config: QrLoginConfig,
    state: QrState,
}

impl QrLoginSession {
    pub fn new(gateway: Arc<dyn HttpGateway>) -> Self {
        Self::with_config(gateway, QrLoginConfig::default())
    }

    pub fn with_config(gateway: Arc<dyn HttpGateway>, config: QrLoginConfig) -> Self {
        Self {
            gateway,
            config,
            state: QrState::Idle,
        }
    }

    /// Current machine state, for callers driving a UI.
    pub fn state(&self) -> QrState {
        self.state
    }

    /// Request a fresh QR code and render it.
    #[instrument(skip(self))]
    pub async fn generate(&mut self) -> Result<QrSession> {
        let response = self
            .gateway
            .get_json(QR_GENERATE_URL, &[], None)
            .await
            .map_err(|e| PassportError::qr_generate(e.to_string()))?;

        let body = &response.body;
        let code = envelope_code(body);
        if code != 0 {
            return Err(PassportError::qr_generate(format!(
                "{} ({code})",
                envelope_message(body)
            )));
        }

        let data = body.get("data");
        let url = data
            .and_then(|d| d.get("url"))
            .and_then(Value::as_str)
            .ok_or_else(|| PassportError::qr_generate("no url field".to_string()))?;
        let qrcode_key = data
            .and_then(|d| d.get("qrcode_key"))
            .and_then(Value::as_str)
            .ok_or_else(|| PassportError::qr_generate("no qrcode_key field".to_string()))?;

        let qrcode_image = render_svg(url)?;
        self.state = QrState::Waiting;
        info!(qrcode_key, "qr code generated");

        Ok(QrSession {
            qrcode_key: qrcode_key.to_string(),
            qrcode_url: url.to_string(),
            qrcode_image,
        })
    }

    /// Poll the provider once for the code's status.
    ///
    /// On `Confirmed` the session cookies are extracted from the
    /// response's `Set-Cookie` pairs. Errors leave the state machine
    /// untouched.
    #[instrument(skip(self))]
    pub async fn poll_once(&mut self, qrcode_key: &str) -> Result<QrPollResult> {
        let response = self
            .gateway
            .get_json(QR_POLL_URL, &[("qrcode_key", qrcode_key)], None)
            .await
            .map_err(|e| PassportError::qr_poll(e.to_string()))?;

        let body = &response.body;
        let code = envelope_code(body);
        if code != 0 {
            return Err(PassportError::Api {
                code,
                message: envelope_message(body).to_string(),
            });
        }

        let data_code = body
            .get("data")
            .and_then(|d| d.get("code"))
            .and_then(Value::as_i64)
            .ok_or_else(|| PassportError::qr_poll("no data.code field".to_string()))?;
        let status = QrStatus::from_code(data_code)?;
        debug!(?status, data_code, "qr poll");

        let credentials = if status == QrStatus::Confirmed {
            Some(Credentials::from_set_cookies(&response.set_cookies)?)
        } else {
            None
        };

        self.state = self.state.advance(status);
        Ok(QrPollResult {
            status,
            credentials,
        })
    }

    /// Poll until the machine reaches a terminal state, the deadline
    /// passes, or `cancel` fires.
    ///
    /// Polls are strictly sequential, separated by the configured
    /// interval. Transient poll failures are retried in place without
    /// advancing the machine; the failure counter resets on every
    /// successful poll. An elapsed deadline is reported as
    /// [`LoginOutcome::TimedOut`], distinct from a provider-side
    /// [`LoginOutcome::Expired`]. Cancellation is an outcome, not an
    /// error.
    #[instrument(skip(self, cancel))]
    pub async fn poll_until_terminal(
        &mut self,
        qrcode_key: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome> {
        let deadline = Instant::now() + deadline;
        let mut consecutive_failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                info!("qr login cancelled");
                return Ok(LoginOutcome::Cancelled);
            }
            if Instant::now() >= deadline {
                info!("qr login deadline elapsed");
                return Ok(LoginOutcome::TimedOut);
            }

            match self.poll_once(qrcode_key).await {
                Ok(result) => {
                    consecutive_failures = 0;
                    if let Some(credentials) = result.credentials {
                        info!("qr login confirmed");
                        return Ok(LoginOutcome::Confirmed(credentials));
                    }
                    if result.status == QrStatus::Expired {
                        warn!("qr code expired");
                        return Ok(LoginOutcome::Expired);
                    }
                    debug!(status = ?result.status, "qr pending");
                }
                Err(e) if e.is_transient() => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_transient_retries {
                        warn!(consecutive_failures, "qr poll failing repeatedly");
                        return Err(e);
                    }
                    warn!(error = %e, consecutive_failures, "qr poll failed, retrying");
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("qr login cancelled");
                    return Ok(LoginOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

fn render_svg(url: &str) -> Result<Vec<u8>> {
    let code =
        QrCode::new(url).map_err(|e| PassportError::qr_generate(format!("qr encode: {e}")))?;
    let document = code.render::<svg::Color>().min_dimensions(240, 240).build();
    Ok(document.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockGateway, generate_body, poll_body};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn status_codes_decode_closed_world() {
        assert_eq!(QrStatus::from_code(86101).unwrap(), QrStatus::Waiting);
        assert_eq!(QrStatus::from_code(86090).unwrap(), QrStatus::Scanned);
        assert_eq!(QrStatus::from_code(86038).unwrap(), QrStatus::Expired);
        assert_eq!(QrStatus::from_code(0).unwrap(), QrStatus::Confirmed);
        assert!(matches!(
            QrStatus::from_code(86099),
            Err(PassportError::UnknownStatusCode(86099))
        ));
    }

    #[test]
    fn advance_follows_observations_until_terminal() {
        let state = QrState::Idle
            .advance(QrStatus::Waiting)
            .advance(QrStatus::Scanned)
            .advance(QrStatus::Confirmed);
        assert_eq!(state, QrState::Confirmed);
        assert_eq!(state.advance(QrStatus::Expired), QrState::Confirmed);

        let expired = QrState::Waiting.advance(QrStatus::Expired);
        assert_eq!(expired, QrState::Expired);
        assert_eq!(expired.advance(QrStatus::Confirmed), QrState::Expired);
    }

    #[test]
    fn confirm_can_skip_the_scanned_observation() {
        assert_eq!(
            QrState::Waiting.advance(QrStatus::Confirmed),
            QrState::Confirmed
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// *For any* observation sequence, once the machine reaches a
        /// terminal state it never moves again.
        #[test]
        fn prop_terminal_states_absorb(
            seq in prop::collection::vec(0usize..4, 0..32),
        ) {
            const OBSERVATIONS: [QrStatus; 4] = [
                QrStatus::Waiting,
                QrStatus::Scanned,
                QrStatus::Confirmed,
                QrStatus::Expired,
            ];
            let mut state = QrState::Idle;
            let mut terminal: Option<QrState> = None;
            for idx in seq {
                state = state.advance(OBSERVATIONS[idx]);
                if let Some(t) = terminal {
                    prop_assert_eq!(state, t);
                } else if state.is_terminal() {
                    terminal = Some(state);
                }
            }
        }
    }

    #[test]
    fn render_svg_produces_a_document() {
        let bytes = render_svg("https://passport.bilibili.com/h5-app/passport/login/scan?qrcode_key=abc").unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("<svg"));
        assert!(text.ends_with("</svg>"));
    }

    #[tokio::test]
    async fn generate_moves_idle_to_waiting() {
        let gateway = Arc::new(MockGateway::new());
        gateway.enqueue_json(
            QR_GENERATE_URL,
            generate_body("https://passport.bilibili.com/h5-app/passport/login/scan?qrcode_key=k1", "k1"),
        );
        let mut session = QrLoginSession::new(gateway);
        assert_eq!(session.state(), QrState::Idle);

        let qr = session.generate().await.unwrap();
        assert_eq!(qr.qrcode_key(), "k1");
        assert!(qr.qrcode_url().contains("qrcode_key=k1"));
        assert!(!qr.qrcode_image().is_empty());
        assert_eq!(session.state(), QrState::Waiting);
    }

    #[tokio::test]
    async fn generate_envelope_error_leaves_idle() {
        let gateway = Arc::new(MockGateway::new());
        gateway.enqueue_json(
            QR_GENERATE_URL,
            json!({ "code": -412, "message": "request was rejected" }),
        );
        let mut session = QrLoginSession::new(gateway);

        let err = session.generate().await.unwrap_err();
        assert!(matches!(err, PassportError::QrGenerate(_)));
        assert!(err.is_transient());
        assert_eq!(session.state(), QrState::Idle);
    }

    #[tokio::test]
    async fn poll_once_unknown_code_is_fatal_and_leaves_state() {
        let gateway = Arc::new(MockGateway::new());
        gateway.enqueue_json(
            QR_GENERATE_URL,
            generate_body("https://example.invalid/scan", "k1"),
        );
        gateway.enqueue_json(QR_POLL_URL, poll_body(99999));
        let mut session = QrLoginSession::new(gateway);
        session.generate().await.unwrap();

        let err = session.poll_once("k1").await.unwrap_err();
        assert!(matches!(err, PassportError::UnknownStatusCode(99999)));
        assert!(!err.is_transient());
        assert_eq!(session.state(), QrState::Waiting);
    }

    #[tokio::test]
    async fn poll_once_confirmed_without_cookies_is_missing_cookie() {
        let gateway = Arc::new(MockGateway::new());
        gateway.enqueue_json(QR_POLL_URL, poll_body(0));
        let mut session = QrLoginSession::new(gateway);

        let err = session.poll_once("k1").await.unwrap_err();
        assert!(matches!(err, PassportError::MissingCookie("SESSDATA")));
    }

    #[tokio::test]
    async fn poll_once_envelope_error_is_api_error() {
        let gateway = Arc::new(MockGateway::new());
        gateway.enqueue_json(QR_POLL_URL, json!({ "code": -412, "message": "rejected" }));
        let mut session = QrLoginSession::new(gateway);

        let err = session.poll_once("k1").await.unwrap_err();
        assert!(matches!(err, PassportError::Api { code: -412, .. }));
    }

    #[tokio::test]
    #[ignore]
    async fn live_generate_qr() {
        let gateway = Arc::new(crate::gateway::ReqwestGateway::new().unwrap());
        let mut session = QrLoginSession::new(gateway);
        let qr = session.generate().await.unwrap();
        println!("scan: {}", qr.qrcode_url());
    }
}
