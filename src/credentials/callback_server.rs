//! Local OAuth callback server (C4): binds the authorization-code redirect
//! URI, waits for the browser-driven consent redirect to land, and hands the
//! `code`/`state` pair back to the caller (§4.4 steps 1-3).
//!
//! The interactive login flow that drives a browser to this URL is out of
//! scope (owned by the process CLI / browser-automation subsystem); this
//! module only owns the listener the redirect lands on.

use crate::error::OauthError;
use axum::Router;
use axum::extract::Query;
use axum::routing::get;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Binds the callback listener on `preferred_port` (0.0.0.0 default 8080,
/// path `/oauth2callback`); on `EADDRINUSE` retries once with an ephemeral
/// port (§4.4 step 1). Returns the bound listener, the port it landed on,
/// and the redirect URI to hand to the authorize-URL builder.
pub async fn bind(preferred_port: u16, path: &str) -> Result<(TcpListener, u16, String), OauthError> {
    let addr = SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), preferred_port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            let fallback = SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 0));
            TcpListener::bind(fallback).await.map_err(|e| OauthError::Other {
                message: format!("callback server bind failed on fallback port: {e}"),
            })?
        }
        Err(e) => {
            return Err(OauthError::Other {
                message: format!("callback server bind failed: {e}"),
            });
        }
    };
    let port = listener
        .local_addr()
        .map_err(|e| OauthError::Other { message: e.to_string() })?
        .port();
    Ok((listener, port, format!("http://127.0.0.1:{port}{path}")))
}

/// Validates the callback query against `expected_state`, accepting a
/// mismatch only when `lenient_state` is set (headless automation only,
/// §4.4 step 3, `ROUTECODEX_OAUTH_LENIENT_STATE`).
fn validate_callback(query: CallbackQuery, expected_state: &str, lenient_state: bool) -> Result<CallbackResult, String> {
    if let Some(error) = query.error {
        return Err(format!("authorization server returned error: {error}"));
    }
    let code = query.code.ok_or_else(|| "callback is missing `code`".to_string())?;
    let state = query.state.ok_or_else(|| "callback is missing `state`".to_string())?;
    if state != expected_state && !lenient_state {
        return Err("callback `state` does not match the request that was sent".to_string());
    }
    Ok(CallbackResult { code, state })
}

fn response_body(outcome: &Result<CallbackResult, String>) -> &'static str {
    match outcome {
        Ok(_) => "Authentication complete. You can close this window.",
        Err(_) => "Authentication failed. You can close this window and retry.",
    }
}

/// Serves exactly one callback request on `listener`, then tears the server
/// down. Returns once the browser lands on the redirect, or once `deadline`
/// elapses (10 min default, 90s headless per §4.4/§5).
pub async fn wait_for_callback(
    listener: TcpListener,
    path: String,
    expected_state: String,
    lenient_state: bool,
    deadline: Duration,
) -> Result<CallbackResult, OauthError> {
    let (tx, rx) = oneshot::channel::<Result<CallbackResult, String>>();
    let tx = Arc::new(Mutex::new(Some(tx)));

    let app = Router::new().route(
        &path,
        get(move |Query(q): Query<CallbackQuery>| {
            let tx = tx.clone();
            let expected_state = expected_state.clone();
            async move {
                let outcome = validate_callback(q, &expected_state, lenient_state);
                let body = response_body(&outcome);
                if let Some(sender) = tx.lock().expect("callback tx mutex poisoned").take() {
                    let _ = sender.send(outcome);
                }
                body
            }
        }),
    );

    let serve_task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let outcome = tokio::select! {
        recv = rx => recv.map_err(|_| "callback sender dropped before a request arrived".to_string()),
        () = tokio::time::sleep(deadline) => Err("timed out waiting for the OAuth callback".to_string()),
    };
    serve_task.abort();

    outcome.and_then(|inner| inner).map_err(|message| OauthError::Other { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> CallbackQuery {
        CallbackQuery {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn accepts_matching_state() {
        let result = validate_callback(query(Some("abc"), Some("xyz"), None), "xyz", false).unwrap();
        assert_eq!(result.code, "abc");
        assert_eq!(result.state, "xyz");
    }

    #[test]
    fn rejects_mismatched_state_by_default() {
        let err = validate_callback(query(Some("abc"), Some("other"), None), "xyz", false).unwrap_err();
        assert!(err.contains("state"));
    }

    #[test]
    fn lenient_state_accepts_mismatch() {
        let result = validate_callback(query(Some("abc"), Some("other"), None), "xyz", true).unwrap();
        assert_eq!(result.code, "abc");
    }

    #[test]
    fn surfaces_authorization_server_error() {
        let err = validate_callback(query(None, None, Some("access_denied")), "xyz", false).unwrap_err();
        assert!(err.contains("access_denied"));
    }

    #[test]
    fn missing_code_is_rejected() {
        let err = validate_callback(query(None, Some("xyz"), None), "xyz", false).unwrap_err();
        assert!(err.contains("code"));
    }
}
