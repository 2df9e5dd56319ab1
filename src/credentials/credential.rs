//! Credential data model and atomic on-disk persistence (§3, §4.4.1).
//!
//! Replaces the teacher's sqlx/SQLite `db` module: each credential is one
//! standalone JSON file, written via write-temp-then-rename so a crash
//! mid-write never leaves a partial file on disk (I8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential file is malformed: {0}")]
    Malformed(String),
    #[error("io error persisting credential: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error persisting credential: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk shape, matching §6's persisted-state layout exactly (field names
/// and all) so files written by older or external tooling stay readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    pub last_refresh: DateTime<Utc>,
}

impl Credential {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(epoch_ms) => Utc::now().timestamp_millis() >= epoch_ms,
            None => false,
        }
    }

    /// A credential with no usable refresh path is "dead": interactive
    /// re-auth is required (§3 invariant).
    pub fn is_dead(&self) -> bool {
        self.is_expired() && self.refresh_token.is_none()
    }

    pub fn has_live_token(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }

    /// True once the token is within `margin` of expiring (or already
    /// expired), used by the background refresher to renew ahead of need.
    pub fn expires_within(&self, margin: std::time::Duration) -> bool {
        match self.expires_at {
            Some(epoch_ms) => Utc::now().timestamp_millis() + margin.as_millis() as i64 >= epoch_ms,
            None => false,
        }
    }

    pub fn bearer_value(&self) -> String {
        if let Some(api_key) = &self.api_key {
            format!("Bearer {api_key}")
        } else {
            let token_type = self.token_type.as_deref().unwrap_or("Bearer");
            format!("{token_type} {}", self.access_token)
        }
    }
}

/// Resolves the on-disk path for a credential: `{home}/.{providerId}/oauth_creds.json`
/// for the single-alias case, `{home}/.{providerId}/{alias}.oauth_creds.json`
/// when multiple aliases coexist under one vendor.
pub fn credential_path(home: &Path, provider_id: &str, alias: Option<&str>) -> PathBuf {
    let dir = home.join(format!(".{provider_id}"));
    match alias {
        Some(alias) => dir.join(format!("{alias}.oauth_creds.json")),
        None => dir.join("oauth_creds.json"),
    }
}

/// Reads a credential from disk. A missing file is "no credential yet"
/// (`Ok(None)`); a malformed file is reported as a structured error rather
/// than panicking.
pub async fn read_credential(path: &Path) -> Result<Option<Credential>, CredentialError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let credential = serde_json::from_slice(&bytes)
                .map_err(|e| CredentialError::Malformed(e.to_string()))?;
            Ok(Some(credential))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CredentialError::Io(e)),
    }
}

/// Writes `credential` atomically: serialize to a sibling temp file in the
/// same directory, fsync it, then rename over the target. `rename` within
/// one filesystem is atomic, so a crash mid-write leaves either the
/// previous valid file or the new one, never a partial one (I8).
pub async fn write_credential_atomic(
    path: &Path,
    credential: &Credential,
) -> Result<(), CredentialError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let bytes = serde_json::to_vec_pretty(credential)?;

    let file = tokio::fs::File::create(&tmp_path).await?;
    {
        use tokio::io::AsyncWriteExt;
        let mut file = file;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_credential() -> Credential {
        Credential {
            access_token: "tok".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_type: None,
            expires_in: Some(3600),
            expires_at: Some(Utc::now().timestamp_millis() + 3_600_000),
            api_key: None,
            email: None,
            resource_url: None,
            last_refresh: Utc::now(),
        }
    }

    #[test]
    fn credential_path_single_alias() {
        let path = credential_path(Path::new("/home/u"), "iflow", None);
        assert_eq!(path, PathBuf::from("/home/u/.iflow/oauth_creds.json"));
    }

    #[test]
    fn credential_path_multi_alias() {
        let path = credential_path(Path::new("/home/u"), "qwen", Some("work"));
        assert_eq!(path, PathBuf::from("/home/u/.qwen/work.oauth_creds.json"));
    }

    #[test]
    fn dead_credential_requires_expired_and_no_refresh_token() {
        let mut credential = sample_credential();
        credential.expires_at = Some(0);
        assert!(!credential.is_dead());
        credential.refresh_token = None;
        assert!(credential.is_dead());
    }

    #[tokio::test]
    async fn write_then_read_roundtrips_atomically() {
        let dir = tempfile_dir();
        let path = dir.join(".testvendor").join("oauth_creds.json");
        let credential = sample_credential();
        write_credential_atomic(&path, &credential).await.unwrap();
        let read_back = read_credential(&path).await.unwrap().unwrap();
        assert_eq!(read_back.access_token, credential.access_token);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let result = read_credential(Path::new("/nonexistent/path/oauth_creds.json")).await.unwrap();
        assert!(result.is_none());
    }

    fn tempfile_dir() -> PathBuf {
        std::env::temp_dir().join(format!("rcgateway-test-{}", Uuid::new_v4()))
    }
}
