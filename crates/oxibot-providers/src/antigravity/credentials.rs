//! Multi-account OAuth credential store for the Antigravity provider.
//!
//! Ported from nanobot's `providers/antigravity/auth.py::AntigravityAuthManager`.
//! Credentials live in a single JSON file, mode `0600`, shaped as:
//!
//! ```json
//! { "active": "user@example.com", "accounts": { "user@example.com": {...} } }
//! ```
//!
//! Legacy single-credential files (a flat `{access_token, ...}` object) are
//! migrated to this shape in place on first load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::constants::{CLIENT_ID, CLIENT_SECRET, CREDENTIALS_DIR, CREDENTIALS_FILE, TOKEN_URL};

/// A 5-minute buffer is applied: a token is considered expired slightly
/// before its real expiry so a refresh has time to complete before a caller
/// actually hits the wall.
const EXPIRY_BUFFER_SECS: i64 = 300;

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("not authenticated — run `oxibot auth login` first")]
    AuthRequired,
    #[error("no refresh token stored — run `oxibot auth login` again")]
    NoRefreshToken,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stored OAuth credential for a single account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    #[serde(default)]
    pub email: String,
}

impl Credential {
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() >= self.expires_at - EXPIRY_BUFFER_SECS
    }
}

#[derive(Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    active: String,
    #[serde(default)]
    accounts: HashMap<String, Credential>,
}

struct State {
    active: String,
    accounts: HashMap<String, Credential>,
}

impl State {
    fn active_credential(&self) -> Option<&Credential> {
        self.accounts.get(&self.active)
    }
}

/// Specifies which account(s) `logout` removes.
pub enum LogoutTarget {
    /// Remove the currently active account.
    Active,
    /// Remove one specific account by email.
    Email(String),
    /// Remove every stored account.
    All,
}

/// Manages OAuth token lifecycle and multi-account storage for Antigravity.
///
/// Refreshing is made idempotent under concurrent callers: the expiry check
/// happens outside the async lock, but the actual network refresh is
/// serialized through `refresh_lock` with a re-check after acquiring it, so
/// two callers racing on an expired token only trigger one HTTP refresh.
pub struct CredentialStore {
    path: PathBuf,
    client: reqwest::Client,
    state: std::sync::Mutex<State>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CredentialStore {
    /// Default path: `~/.nanobot/antigravity/credentials.json`.
    pub fn default_path() -> PathBuf {
        oxibot_core::utils::get_data_path()
            .join(CREDENTIALS_DIR)
            .join(CREDENTIALS_FILE)
    }

    /// Load (or lazily create) the credential store at `path`, or the
    /// default path if `None`.
    pub fn new(path: Option<PathBuf>) -> Self {
        let path = path.unwrap_or_else(Self::default_path);
        let state = Self::load(&path);
        CredentialStore {
            path,
            client: reqwest::Client::new(),
            state: std::sync::Mutex::new(state),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn load(path: &Path) -> State {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return State { active: String::new(), accounts: HashMap::new() },
        };

        let raw: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse credentials file");
                return State { active: String::new(), accounts: HashMap::new() };
            }
        };

        if raw.get("accounts").is_some() {
            let file: CredentialFile = serde_json::from_value(raw).unwrap_or_default();
            State { active: file.active, accounts: file.accounts }
        } else if raw.get("access_token").is_some() {
            // Legacy single-credential format.
            match serde_json::from_value::<Credential>(raw) {
                Ok(cred) => {
                    let email = if cred.email.is_empty() {
                        "unknown".to_string()
                    } else {
                        cred.email.clone()
                    };
                    let mut accounts = HashMap::new();
                    accounts.insert(email.clone(), cred);
                    let state = State { active: email, accounts };
                    let _ = Self::persist(path, &state);
                    info!("migrated legacy Antigravity credential file to multi-account format");
                    state
                }
                Err(_) => State { active: String::new(), accounts: HashMap::new() },
            }
        } else {
            State { active: String::new(), accounts: HashMap::new() }
        }
    }

    fn persist(path: &Path, state: &State) -> Result<(), CredentialError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = CredentialFile { active: state.active.clone(), accounts: state.accounts.clone() };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| CredentialError::RefreshFailed(e.to_string()))?;
        std::fs::write(path, json)?;
        set_mode_0600(path)?;
        Ok(())
    }

    fn save(&self) -> Result<(), CredentialError> {
        let state = self.state.lock().unwrap();
        Self::persist(&self.path, &state)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn is_authenticated(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.active.is_empty() && state.accounts.contains_key(&state.active)
    }

    pub fn active_email(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        if state.active.is_empty() {
            None
        } else {
            Some(state.active.clone())
        }
    }

    pub fn accounts(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.accounts.keys().cloned().collect()
    }

    // ── Token management ────────────────────────────────────────────────

    /// Return a valid access token for the active account, refreshing it
    /// first if it's within the expiry buffer. See struct docs for the
    /// concurrency guarantee.
    pub async fn get_valid_token(&self) -> Result<String, CredentialError> {
        let (needs_refresh, token, refresh_token) = {
            let state = self.state.lock().unwrap();
            let cred = state.active_credential().ok_or(CredentialError::AuthRequired)?;
            (cred.is_expired(), cred.access_token.clone(), cred.refresh_token.clone())
        };

        if !needs_refresh {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Re-check: another caller may have refreshed while we waited.
        let still_expired = {
            let state = self.state.lock().unwrap();
            state.active_credential().map(|c| c.is_expired()).unwrap_or(true)
        };
        if still_expired {
            if refresh_token.is_empty() {
                return Err(CredentialError::NoRefreshToken);
            }
            self.refresh(&refresh_token).await?;
        }

        let state = self.state.lock().unwrap();
        state
            .active_credential()
            .map(|c| c.access_token.clone())
            .ok_or(CredentialError::AuthRequired)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<(), CredentialError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            refresh_token: Option<String>,
            #[serde(default = "default_expires_in")]
            expires_in: i64,
        }
        fn default_expires_in() -> i64 {
            3600
        }

        let resp = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::RefreshFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError::RefreshFailed(format!("{status}: {body}")));
        }

        let data: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CredentialError::RefreshFailed(e.to_string()))?;

        {
            let mut state = self.state.lock().unwrap();
            let email = state.active.clone();
            if let Some(cred) = state.accounts.get_mut(&email) {
                cred.access_token = data.access_token;
                cred.expires_at = chrono::Utc::now().timestamp() + data.expires_in;
                if let Some(rt) = data.refresh_token {
                    cred.refresh_token = rt;
                }
            }
        }
        self.save()
    }

    // ── Account management ──────────────────────────────────────────────

    /// Insert (or replace) an account's credential and make it active.
    pub fn upsert(&self, cred: Credential) -> Result<(), CredentialError> {
        {
            let mut state = self.state.lock().unwrap();
            state.active = cred.email.clone();
            state.accounts.insert(cred.email.clone(), cred);
        }
        self.save()
    }

    pub fn switch(&self, email: &str) -> bool {
        let switched = {
            let mut state = self.state.lock().unwrap();
            if state.accounts.contains_key(email) {
                state.active = email.to_string();
                true
            } else {
                false
            }
        };
        if switched {
            let _ = self.save();
        }
        switched
    }

    pub fn logout(&self, target: LogoutTarget) -> Result<(), CredentialError> {
        let remaining = {
            let mut state = self.state.lock().unwrap();
            match target {
                LogoutTarget::All => {
                    state.accounts.clear();
                    state.active.clear();
                }
                LogoutTarget::Email(email) => {
                    state.accounts.remove(&email);
                    if state.active == email {
                        state.active = state.accounts.keys().next().cloned().unwrap_or_default();
                    }
                }
                LogoutTarget::Active => {
                    let active = state.active.clone();
                    if !active.is_empty() {
                        state.accounts.remove(&active);
                        state.active = state.accounts.keys().next().cloned().unwrap_or_default();
                    }
                }
            }
            state.accounts.is_empty()
        };

        if remaining {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            Ok(())
        } else {
            self.save()
        }
    }
}

#[cfg(unix)]
fn set_mode_0600(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_mode_0600(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(email: &str, expires_in: i64) -> Credential {
        Credential {
            access_token: format!("access-{email}"),
            refresh_token: format!("refresh-{email}"),
            expires_at: chrono::Utc::now().timestamp() + expires_in,
            email: email.to_string(),
        }
    }

    #[test]
    fn is_expired_respects_buffer() {
        let fresh = cred("a@b.com", 3600);
        assert!(!fresh.is_expired());

        let mut about_to_expire = cred("a@b.com", 100);
        about_to_expire.expires_at = chrono::Utc::now().timestamp() + 100;
        assert!(about_to_expire.is_expired());
    }

    #[test]
    fn not_authenticated_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(Some(dir.path().join("credentials.json")));
        assert!(!store.is_authenticated());
        assert_eq!(store.active_email(), None);
    }

    #[tokio::test]
    async fn get_valid_token_fails_without_auth() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(Some(dir.path().join("credentials.json")));
        let err = store.get_valid_token().await.unwrap_err();
        assert!(matches!(err, CredentialError::AuthRequired));
    }

    #[tokio::test]
    async fn get_valid_token_returns_unexpired_token_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(Some(dir.path().join("credentials.json")));
        store.upsert(cred("a@b.com", 3600)).unwrap();
        let token = store.get_valid_token().await.unwrap();
        assert_eq!(token, "access-a@b.com");
    }

    #[test]
    fn upsert_then_switch_and_logout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::new(Some(path.clone()));

        store.upsert(cred("a@b.com", 3600)).unwrap();
        store.upsert(cred("c@d.com", 3600)).unwrap();
        assert_eq!(store.active_email(), Some("c@d.com".to_string()));
        assert_eq!(store.accounts().len(), 2);

        assert!(store.switch("a@b.com"));
        assert_eq!(store.active_email(), Some("a@b.com".to_string()));
        assert!(!store.switch("nobody@nowhere.com"));

        store.logout(LogoutTarget::Email("c@d.com".to_string())).unwrap();
        assert_eq!(store.accounts().len(), 1);

        store.logout(LogoutTarget::All).unwrap();
        assert!(!store.is_authenticated());
        assert!(!path.exists());
    }

    #[test]
    fn credentials_file_has_mode_0600_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::new(Some(path.clone()));
        store.upsert(cred("a@b.com", 3600)).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn migrates_legacy_flat_credential_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "access_token": "old-token",
                "refresh_token": "old-refresh",
                "expires_at": chrono::Utc::now().timestamp() + 3600,
                "email": "legacy@old.com"
            })
            .to_string(),
        )
        .unwrap();

        let store = CredentialStore::new(Some(path.clone()));
        assert_eq!(store.active_email(), Some("legacy@old.com".to_string()));

        let reloaded: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(reloaded.get("accounts").is_some());
    }
}
