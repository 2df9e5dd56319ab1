//! Credential Store (C4): one `ractor::Actor` per vendor family, wrapping the
//! pure `CredentialManager` scheduler around on-disk `Credential`s (§4.4).
//!
//! Generalizes the teacher's per-vendor actors (`providers/geminicli/manager/actor.rs`,
//! `providers/codex/manager/actor.rs`, `providers/antigravity/manager/actor.rs`) into
//! one actor type parameterized by `Vendor`, since all six families need the same
//! lease/cooldown/refresh state machine and differ only in how a token is renewed.

use crate::config::{Vendor, VendorOauthConfig, VendorResolvedConfig};
use crate::credentials::credential::{
    Credential, credential_path, read_credential, write_credential_atomic,
};
use crate::credentials::oauth_flow;
use crate::credentials::scheduler::{CredentialId, CredentialManager, Lease};
use crate::error::OauthError;
use chrono::Utc;
use oauth2::TokenResponse;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Messages the Credential Store actor handles.
#[derive(Debug)]
pub enum CredentialStoreMessage {
    /// Lease a credential that supports `model_mask`. `None` means the pool
    /// is exhausted (all cooling, refreshing, or absent).
    GetCredential(u64, RpcReplyPort<Option<Lease<Credential>>>),
    /// A dispatch against `id` hit a rate limit; cool it down for `model_mask`.
    ReportRateLimit { id: CredentialId, model_mask: u64, cooldown: Duration },
    /// A dispatch against `id` returned a definitive "model not supported" signal.
    ReportModelUnsupported { id: CredentialId, model_mask: u64 },
    /// A dispatch against `id` returned 401/403; refresh before reuse.
    ReportInvalid { id: CredentialId },
    /// Internal: a refresh task completed.
    RefreshComplete { id: CredentialId, result: Result<Credential, OauthError> },
    /// Internal: periodic sweep tick from the background refresher — refresh
    /// the managed credential if it is within its renewal margin.
    MaybeRefresh,
}

#[derive(Clone)]
pub struct CredentialStoreHandle {
    actor: ActorRef<CredentialStoreMessage>,
}

impl CredentialStoreHandle {
    pub async fn get_credential(&self, model_mask: u64) -> Option<Lease<Credential>> {
        match ractor::call!(self.actor, CredentialStoreMessage::GetCredential, model_mask) {
            Ok(lease) => lease,
            Err(e) => {
                warn!("credential store RPC failed: {e}");
                None
            }
        }
    }

    pub fn report_rate_limit(&self, id: CredentialId, model_mask: u64, cooldown: Duration) {
        let _ = ractor::cast!(
            self.actor,
            CredentialStoreMessage::ReportRateLimit { id, model_mask, cooldown }
        );
    }

    pub fn report_model_unsupported(&self, id: CredentialId, model_mask: u64) {
        let _ = ractor::cast!(
            self.actor,
            CredentialStoreMessage::ReportModelUnsupported { id, model_mask }
        );
    }

    pub fn report_invalid(&self, id: CredentialId) {
        let _ = ractor::cast!(self.actor, CredentialStoreMessage::ReportInvalid { id });
    }

    pub fn notify_maybe_refresh(&self) {
        let _ = ractor::cast!(self.actor, CredentialStoreMessage::MaybeRefresh);
    }
}

struct CredentialStoreState {
    vendor: Vendor,
    home: PathBuf,
    resolved: VendorResolvedConfig,
    manager: CredentialManager<Credential>,
    http_client: reqwest::Client,
    model_caps_all: u64,
}

struct CredentialStoreActor;

#[ractor::async_trait]
impl Actor for CredentialStoreActor {
    type Msg = CredentialStoreMessage;
    type State = CredentialStoreState;
    type Arguments = (Vendor, PathBuf, VendorResolvedConfig, reqwest::Client, u64);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let (vendor, home, resolved, http_client, model_caps_all) = args;
        let mut manager = CredentialManager::new(crate::model_catalog::MODEL_REGISTRY.len());

        if let Some(api_key) = resolved.static_api_key.clone() {
            let credential = Credential {
                access_token: String::new(),
                refresh_token: None,
                token_type: None,
                expires_in: None,
                expires_at: None,
                api_key: Some(api_key),
                email: None,
                resource_url: None,
                last_refresh: Utc::now(),
            };
            manager.add_credential(1, credential, model_caps_all);
            info!(vendor = vendor.as_str(), "credential store seeded from static api key");
        } else {
            let path = credential_path(&home, vendor.as_str(), None);
            match read_credential(&path).await {
                Ok(Some(credential)) => {
                    manager.add_credential(1, credential, model_caps_all);
                    info!(vendor = vendor.as_str(), "credential store loaded from disk");
                }
                Ok(None) => {
                    warn!(vendor = vendor.as_str(), "no credential file on disk yet");
                }
                Err(e) => {
                    warn!(vendor = vendor.as_str(), "credential file is malformed: {e}");
                }
            }
        }

        Ok(CredentialStoreState { vendor, home, resolved, manager, http_client, model_caps_all })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CredentialStoreMessage::GetCredential(model_mask, reply) => {
                let assignment = state.manager.get_assigned(
                    model_mask,
                    |c: &Credential| c.is_expired(),
                    |c: &Credential| c.has_live_token() || c.api_key.is_some(),
                );
                for id in assignment.refresh_ids {
                    self.start_refresh(myself.clone(), state, id);
                }
                let _ = reply.send(assignment.assigned);
            }
            CredentialStoreMessage::ReportRateLimit { id, model_mask, cooldown } => {
                state.manager.report_rate_limit(id, model_mask, cooldown);
                info!(
                    vendor = state.vendor.as_str(),
                    id, cooldown_secs = cooldown.as_secs(), "credential cooling down"
                );
            }
            CredentialStoreMessage::ReportModelUnsupported { id, model_mask } => {
                state.manager.mark_model_unsupported(id, model_mask);
            }
            CredentialStoreMessage::ReportInvalid { id } => {
                self.start_refresh(myself, state, id);
            }
            CredentialStoreMessage::RefreshComplete { id, result } => {
                match result {
                    Ok(credential) => {
                        let path = credential_path(&state.home, state.vendor.as_str(), None);
                        if let Err(e) = write_credential_atomic(&path, &credential).await {
                            warn!(vendor = state.vendor.as_str(), "failed to persist refreshed credential: {e}");
                        }
                        state.manager.add_credential(id, credential, state.model_caps_all);
                        info!(vendor = state.vendor.as_str(), id, "credential refreshed");
                    }
                    Err(e) => {
                        warn!(vendor = state.vendor.as_str(), id, "credential refresh failed: {e}");
                        state.manager.delete_credential(id);
                    }
                }
            }
            CredentialStoreMessage::MaybeRefresh => {
                const RENEWAL_MARGIN: Duration = Duration::from_secs(300);
                let needs_refresh = state
                    .manager
                    .get_full_credential_copy(1)
                    .is_some_and(|c| c.refresh_token.is_some() && c.expires_within(RENEWAL_MARGIN));
                if needs_refresh {
                    self.start_refresh(myself, state, 1);
                }
            }
        }
        Ok(())
    }
}

impl CredentialStoreActor {
    /// Starts a refresh unless one for `id` is already in flight — concurrent
    /// callers coalesce onto the single outstanding refresh (§4.4.2).
    fn start_refresh(&self, myself: ActorRef<CredentialStoreMessage>, state: &mut CredentialStoreState, id: CredentialId) {
        if state.manager.is_refreshing(id) {
            return;
        }
        let Some(current) = state.manager.get_full_credential_copy(id) else {
            return;
        };
        let Some(oauth_cfg) = state.resolved.oauth.clone() else {
            // Static-key vendors have nothing to refresh; treat as dead.
            state.manager.delete_credential(id);
            return;
        };
        state.manager.mark_refreshing(id);

        let http_client = state.http_client.clone();
        let vendor = state.vendor;
        let max_attempts = if vendor == Vendor::Iflow { 1 } else { state.resolved.retry_max_times.max(1) };
        tokio::spawn(async move {
            let result = refresh_credential_with_retry(&oauth_cfg, &current, &http_client, max_attempts).await;
            let _ = myself.cast(CredentialStoreMessage::RefreshComplete { id, result });
        });
    }
}

/// Linear backoff base for refresh retries (§4.4): attempt `n` waits
/// `n * REFRESH_BACKOFF_BASE`.
const REFRESH_BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// A refresh failure the OAuth2 spec marks permanent — retrying only burns
/// attempts, so the first occurrence aborts the whole retry loop (§4.4).
fn is_permanent_refresh_failure(err: &OauthError) -> bool {
    match err {
        OauthError::ServerResponse { error } => {
            matches!(error.as_str(), "invalid_grant" | "unauthorized_client")
        }
        _ => false,
    }
}

/// Retries `refresh_credential` up to `max_attempts` times with linear
/// backoff, aborting immediately on a permanent failure (§4.4: `maxAttempts`
/// default 3, iFlow forced to 1).
async fn refresh_credential_with_retry(
    cfg: &VendorOauthConfig,
    current: &Credential,
    http_client: &reqwest::Client,
    max_attempts: u32,
) -> Result<Credential, OauthError> {
    let mut last_err = None;
    for attempt in 1..=max_attempts.max(1) {
        match refresh_credential(cfg, current, http_client).await {
            Ok(credential) => return Ok(credential),
            Err(e) if is_permanent_refresh_failure(&e) => return Err(e),
            Err(e) => {
                warn!("credential refresh attempt {attempt}/{max_attempts} failed: {e}");
                last_err = Some(e);
                if attempt < max_attempts {
                    tokio::time::sleep(REFRESH_BACKOFF_BASE * attempt).await;
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

async fn refresh_credential(
    cfg: &VendorOauthConfig,
    current: &Credential,
    http_client: &reqwest::Client,
) -> Result<Credential, OauthError> {
    let refresh_token = current.refresh_token.clone().ok_or_else(|| OauthError::Other {
        message: "credential has no refresh_token".to_string(),
    })?;

    let client = oauth_flow::build_client(cfg, "http://127.0.0.1:0/callback")?;
    let token = oauth_flow::refresh_access_token(&client, &refresh_token, http_client).await?;

    Ok(Credential {
        access_token: token.access_token().secret().clone(),
        refresh_token: token
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| current.refresh_token.clone()),
        token_type: Some("Bearer".to_string()),
        expires_in: token.expires_in().map(|d| d.as_secs()),
        expires_at: token
            .expires_in()
            .map(|d| Utc::now().timestamp_millis() + d.as_millis() as i64),
        api_key: current.api_key.clone(),
        email: current.email.clone(),
        resource_url: current.resource_url.clone(),
        last_refresh: Utc::now(),
    })
}

/// Spawns a Credential Store actor for one vendor family. `home` is the
/// directory under which `.{providerId}/oauth_creds.json` is resolved.
pub async fn spawn(
    vendor: Vendor,
    home: PathBuf,
    resolved: VendorResolvedConfig,
    http_client: reqwest::Client,
    model_caps_all: u64,
) -> CredentialStoreHandle {
    let (actor, _join_handle) = Actor::spawn(
        Some(format!("credential-store-{}", vendor.as_str())),
        CredentialStoreActor,
        (vendor, home, resolved, http_client, model_caps_all),
    )
    .await
    .expect("failed to spawn credential store actor");
    CredentialStoreHandle { actor }
}
