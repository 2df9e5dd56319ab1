//! OAuth Credential Store (C4): device-code and authorization-code + PKCE
//! flows, generalized across vendor families instead of one copy per vendor.

use crate::config::VendorOauthConfig;
use crate::error::OauthError;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, DeviceAuthorizationUrl,
    DeviceCodeErrorResponseType, EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, StandardDeviceAuthorizationResponse,
    TokenResponse, TokenUrl,
};
use std::time::Duration;

pub type VendorOauthClient<
    HasAuthUrl = EndpointSet,
    HasDeviceAuthUrl = EndpointNotSet,
    HasTokenUrl = EndpointSet,
> = BasicClient<HasAuthUrl, HasDeviceAuthUrl, EndpointNotSet, EndpointNotSet, HasTokenUrl>;

/// The three authorize-URL styles the spec distinguishes (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthUrlStyle {
    /// `response_type=code&redirect_uri=...&code_challenge=...` (generic PKCE).
    Standard,
    /// iFlow's `loginMethod=phone&type=phone&redirect=<raw>&state=<state>`, no PKCE.
    IflowWeb,
    /// State embedded directly into the redirect URI instead of a query param.
    Legacy,
}

pub fn build_client(
    cfg: &VendorOauthConfig,
    redirect_uri: &str,
) -> Result<VendorOauthClient, OauthError> {
    let mut client = BasicClient::new(ClientId::new(cfg.client_id.clone()))
        .set_auth_uri(AuthUrl::new(cfg.auth_url.clone()).map_err(|e| OauthError::Other {
            message: format!("invalid auth_url: {e}"),
        })?)
        .set_token_uri(TokenUrl::new(cfg.token_url.clone()).map_err(|e| OauthError::Other {
            message: format!("invalid token_url: {e}"),
        })?)
        .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string()).map_err(|e| {
            OauthError::Other {
                message: format!("invalid redirect_uri: {e}"),
            }
        })?);
    if let Some(secret) = &cfg.client_secret {
        client = client.set_client_secret(ClientSecret::new(secret.clone()));
    }
    Ok(client)
}

/// Builds the authorization URL for the given style. Google hosts get
/// `access_type=offline&prompt=consent&include_granted_scopes=true` forced on
/// regardless of style.
pub fn build_authorize_url(
    client: &VendorOauthClient,
    cfg: &VendorOauthConfig,
    style: AuthUrlStyle,
    redirect_uri: &str,
) -> (url::Url, CsrfToken, Option<PkceCodeVerifier>) {
    let is_google_host = cfg.auth_url.contains("accounts.google.com");

    match style {
        AuthUrlStyle::IflowWeb => {
            // No PKCE; `redirect` must be encoded exactly once by the URL
            // encoder, never pre-encoded by hand.
            let state = CsrfToken::new_random();
            let mut url = url::Url::parse(&cfg.auth_url).expect("configured auth_url is valid");
            url.query_pairs_mut()
                .append_pair("loginMethod", "phone")
                .append_pair("type", "phone")
                .append_pair("redirect", redirect_uri)
                .append_pair("state", state.secret())
                .append_pair("client_id", &cfg.client_id);
            (url, state, None)
        }
        AuthUrlStyle::Standard | AuthUrlStyle::Legacy => {
            let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
            let mut req = client
                .authorize_url(CsrfToken::new_random)
                .set_pkce_challenge(pkce_challenge);
            for scope in &cfg.scopes {
                req = req.add_scope(Scope::new(scope.clone()));
            }
            if is_google_host {
                req = req
                    .add_extra_param("access_type", "offline")
                    .add_extra_param("prompt", "consent")
                    .add_extra_param("include_granted_scopes", "true");
            }
            let (url, csrf) = req.url();
            (url, csrf, Some(pkce_verifier))
        }
    }
}

pub async fn exchange_authorization_code(
    client: &VendorOauthClient,
    code: String,
    verifier: Option<PkceCodeVerifier>,
    http_client: &reqwest::Client,
) -> Result<BasicTokenResponse, OauthError> {
    let mut req = client.exchange_code(AuthorizationCode::new(code));
    if let Some(verifier) = verifier {
        req = req.set_pkce_verifier(verifier);
    }
    Ok(req.request_async(http_client).await?)
}

pub async fn refresh_access_token(
    client: &VendorOauthClient,
    refresh_token: &str,
    http_client: &reqwest::Client,
) -> Result<BasicTokenResponse, OauthError> {
    Ok(client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(http_client)
        .await?)
}

/// Device-code flow (Qwen): request a device/user code pair, then poll the
/// token endpoint at an adaptive interval until the user completes the flow
/// or the device code expires.
pub async fn device_authorize(
    cfg: &VendorOauthConfig,
    http_client: &reqwest::Client,
) -> Result<
    (
        VendorOauthClient<EndpointSet, EndpointSet>,
        StandardDeviceAuthorizationResponse,
        PkceCodeVerifier,
    ),
    OauthError,
> {
    let device_auth_url = cfg
        .device_auth_url
        .as_ref()
        .ok_or_else(|| OauthError::Other {
            message: "vendor has no device_auth_url configured".to_string(),
        })?;

    let mut client = BasicClient::new(ClientId::new(cfg.client_id.clone()))
        .set_auth_uri(AuthUrl::new(cfg.auth_url.clone()).map_err(|e| OauthError::Other {
            message: format!("invalid auth_url: {e}"),
        })?)
        .set_token_uri(TokenUrl::new(cfg.token_url.clone()).map_err(|e| OauthError::Other {
            message: format!("invalid token_url: {e}"),
        })?)
        .set_device_authorization_url(DeviceAuthorizationUrl::new(device_auth_url.clone())
            .map_err(|e| OauthError::Other {
                message: format!("invalid device_auth_url: {e}"),
            })?);
    if let Some(secret) = &cfg.client_secret {
        client = client.set_client_secret(ClientSecret::new(secret.clone()));
    }

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let mut req = client.exchange_device_code().set_pkce_challenge(pkce_challenge);
    for scope in &cfg.scopes {
        req = req.add_scope(Scope::new(scope.clone()));
    }
    let details = req
        .add_extra_param("code_challenge_method", "S256")
        .request_async(http_client)
        .await
        .map_err(|e| OauthError::Other {
            message: format!("device authorization request failed: {e}"),
        })?;

    Ok((client, details, pkce_verifier))
}

/// Polls the token endpoint for a device-code grant, backing off on
/// `slow_down` per §4.4 (5s base, ×1.5 growth capped at 10s, 60 attempts).
pub async fn poll_device_token(
    client: &VendorOauthClient<EndpointSet, EndpointSet>,
    details: &StandardDeviceAuthorizationResponse,
    pkce_verifier: PkceCodeVerifier,
    http_client: &reqwest::Client,
) -> Result<BasicTokenResponse, OauthError> {
    let mut interval = details.interval().max(Duration::from_secs(5));
    let max_interval = Duration::from_secs(10);
    let max_attempts = 60;

    // Kept as the secret string and re-wrapped every attempt: `PkceCodeVerifier`
    // isn't `Clone`, and the first poll almost always comes back
    // `authorization_pending`, so a one-shot `Option::take` would silently
    // drop `code_verifier` from every later attempt, including the one that
    // finally succeeds.
    let verifier_secret = pkce_verifier.secret().clone();
    for _ in 0..max_attempts {
        tokio::time::sleep(interval).await;

        let req = client
            .exchange_device_access_token(details)
            .set_pkce_verifier(PkceCodeVerifier::new(verifier_secret.clone()));
        match req.request_async(http_client, tokio::time::sleep, None).await {
            Ok(token) => return Ok(token),
            Err(RequestTokenError::ServerResponse(resp)) => {
                use oauth2::ErrorResponse;
                match resp.error() {
                    DeviceCodeErrorResponseType::AuthorizationPending => continue,
                    DeviceCodeErrorResponseType::SlowDown => {
                        interval = interval.mul_f64(1.5).min(max_interval);
                    }
                    DeviceCodeErrorResponseType::ExpiredToken => {
                        return Err(OauthError::ServerResponse {
                            error: "expired_token".to_string(),
                        });
                    }
                    DeviceCodeErrorResponseType::AccessDenied => {
                        return Err(OauthError::ServerResponse {
                            error: "access_denied".to_string(),
                        });
                    }
                    other => {
                        return Err(OauthError::ServerResponse {
                            error: format!("{other:?}"),
                        });
                    }
                }
            }
            Err(e) => {
                return Err(OauthError::Other {
                    message: format!("device token poll failed: {e}"),
                });
            }
        }
    }

    Err(OauthError::Other {
        message: "device code expired after max polling attempts".to_string(),
    })
}
