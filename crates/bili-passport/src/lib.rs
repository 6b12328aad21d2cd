//! bili-passport: Bilibili authentication core.
//!
//! This crate implements the two mechanisms the Bilibili web API requires
//! from an authenticated client: WBI request signing and the QR-code login
//! handshake, plus the process-wide credential store they feed.
//!
//! ## Signing
//!
//! - [`WbiKeyCache`] - TTL'd cache of the rotating signing key material
//! - [`WbiSigner`] - Produces `wts` + `w_rid` signed parameter sets
//! - [`SignedParams`] - One signed parameter set, ready to serialize
//!
//! ## Login
//!
//! - [`QrLoginSession`] - Generate a QR code and poll it to a terminal state
//! - [`QrSession`] - The generated code: key, URL and rendered SVG image
//! - [`QrStatus`] / [`QrState`] - Provider observations and the session
//!   state machine they drive
//! - [`LoginOutcome`] - How a polling loop ended
//!
//! ## Credentials
//!
//! - [`Credentials`] - The `SESSDATA` / `bili_jct` / `DedeUserID` triple
//! - [`CredentialStore`] - Process-wide holder, environment-provisionable
//!
//! ## Transport
//!
//! - [`HttpGateway`] - The trait every component talks to the network through
//! - [`ReqwestGateway`] - The shipped `reqwest`-backed implementation
//!
//! ## Composition
//!
//! - [`PassportClient`] - Signed GETs, session validation and logout over
//!   one shared gateway, cache and store

pub mod client;
pub mod cookie_utils;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod key_cache;
pub mod qr_login;
pub mod wbi;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use client::PassportClient;
pub use credentials::{Credentials, CredentialStore};
pub use error::{PassportError, Result};
pub use gateway::{GatewayError, HttpGateway, JsonResponse, ReqwestGateway};
pub use key_cache::{WbiKeyCache, WbiKeys};
pub use qr_login::{
    LoginOutcome, QrLoginConfig, QrLoginSession, QrPollResult, QrSession, QrState, QrStatus,
};
pub use wbi::{SignedParams, WbiSigner};
