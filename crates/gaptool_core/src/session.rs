use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::OAuthConfig;
use crate::error::AuthError;

/// Tokens this close to expiry are treated as already expired at use-time.
pub const EXPIRY_SKEW_SECS: u64 = 60;

/// Bearer credential for the analytics API. Persisted as JSON at the
/// well-known session path; the full shape round-trips losslessly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: u64,
}

impl Session {
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_unix_secs())
    }

    fn is_valid_at(&self, now: u64) -> bool {
        !self.access_token.is_empty() && now.saturating_add(EXPIRY_SKEW_SECS) < self.expires_at
    }
}

pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

/// Persists and restores one credential record. No lifecycle decisions here.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let session: Session = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("session path has no parent: {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
        let content =
            serde_json::to_string_pretty(session).context("failed to serialize session")?;
        fs::write(&self.path, content)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// One successful token grant from the authorization server.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// Seam over the token endpoint so the lifecycle manager tests run offline.
pub trait TokenEndpoint {
    fn refresh(&mut self, refresh_token: &str) -> Result<TokenGrant>;
    fn exchange_code(&mut self, code: &str) -> Result<TokenGrant>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub struct OAuthClient {
    client: Client,
    config: OAuthConfig,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Result<Self> {
        config.ensure_complete()?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build token endpoint HTTP client")?;
        Ok(Self { client, config })
    }

    fn request_grant(&self, params: &[(&str, &str)]) -> Result<TokenGrant> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(params)
            .send()
            .context("failed to call token endpoint")?;

        let status = response.status();
        let payload: Value = response
            .json()
            .context("failed to decode token endpoint JSON response")?;
        if !status.is_success() {
            let code = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            let info = payload
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or("unknown info");
            bail!("token endpoint error [{code}]: {info}");
        }

        let parsed: TokenResponse =
            serde_json::from_value(payload).context("failed to decode token grant")?;
        if parsed.access_token.is_empty() {
            bail!("token endpoint returned an empty access token");
        }
        Ok(TokenGrant {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_in: parsed.expires_in,
        })
    }
}

impl TokenEndpoint for OAuthClient {
    fn refresh(&mut self, refresh_token: &str) -> Result<TokenGrant> {
        self.request_grant(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
    }

    fn exchange_code(&mut self, code: &str) -> Result<TokenGrant> {
        self.request_grant(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
    }
}

/// Builds the URL the user opens to obtain a one-time authorization code.
pub fn authorize_url(config: &OAuthConfig) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&scope={}&response_type=code&access_type=offline&prompt=consent",
        config.auth_url,
        percent_encode(&config.client_id),
        percent_encode(&config.redirect_uri),
        percent_encode(&config.scope),
    )
}

pub(crate) fn percent_encode(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                output.push(byte as char);
            }
            other => {
                output.push('%');
                output.push_str(&format!("{other:02X}"));
            }
        }
    }
    output
}

/// Decides whether to reuse, refresh, or re-acquire the session. Owns the
/// in-memory `Session`; the fetcher only ever borrows it.
pub struct CredentialManager<T: TokenEndpoint> {
    store: SessionStore,
    endpoint: T,
    authorize_url: String,
    session: Option<Session>,
    restored: bool,
}

impl CredentialManager<OAuthClient> {
    pub fn from_oauth_config(config: OAuthConfig, session_path: PathBuf) -> Result<Self> {
        let url = authorize_url(&config);
        let endpoint = OAuthClient::new(config)?;
        Ok(Self::new(SessionStore::new(session_path), endpoint, url))
    }
}

impl<T: TokenEndpoint> CredentialManager<T> {
    pub fn new(store: SessionStore, endpoint: T, authorize_url: String) -> Self {
        Self {
            store,
            endpoint,
            authorize_url,
            session: None,
            restored: false,
        }
    }

    pub fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    /// The restored session, if any, without refreshing or exchanging.
    pub fn current(&mut self) -> Option<&Session> {
        self.restore_once();
        self.session.as_ref()
    }

    /// Returns a valid session, refreshing an expired one when possible.
    /// A valid in-memory session is returned as-is with no remote call.
    pub fn get_session(&mut self) -> Result<&Session, AuthError> {
        self.restore_once();

        if !self.session.as_ref().is_some_and(Session::is_valid) {
            let refresh_token = self
                .session
                .as_ref()
                .and_then(|session| session.refresh_token.clone());
            let Some(token) = refresh_token else {
                return Err(self.authentication_required());
            };
            match self.endpoint.refresh(&token) {
                Ok(grant) => {
                    let session = session_from_grant(grant, Some(token));
                    self.persist(&session);
                    return Ok(self.session.insert(session));
                }
                Err(error) => {
                    tracing::warn!(
                        error = format!("{error:#}"),
                        "session refresh failed, re-authorization required"
                    );
                    return Err(self.authentication_required());
                }
            }
        }

        match self.session.as_ref() {
            Some(session) => Ok(session),
            None => Err(self.authentication_required()),
        }
    }

    /// Exchanges an authorization code obtained out-of-band for a session.
    /// Failure leaves the manager awaiting another code.
    pub fn exchange_code(&mut self, code: &str) -> Result<&Session, AuthError> {
        self.restore_once();
        let grant = self
            .endpoint
            .exchange_code(code)
            .map_err(|error| AuthError::AuthenticationFailed(format!("{error:#}")))?;
        let session = session_from_grant(grant, None);
        self.persist(&session);
        Ok(self.session.insert(session))
    }

    /// Explicit re-authorization: drops the in-memory session and deletes the
    /// persisted record. Never invoked automatically on failure.
    pub fn clear(&mut self) -> Result<()> {
        self.session = None;
        self.restored = true;
        self.store.clear()
    }

    fn authentication_required(&self) -> AuthError {
        AuthError::AuthenticationRequired {
            authorize_url: self.authorize_url.clone(),
        }
    }

    fn restore_once(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        match self.store.load() {
            Ok(found) => self.session = found,
            Err(error) => {
                tracing::warn!(
                    error = format!("{error:#}"),
                    "failed to restore persisted session"
                );
                self.session = None;
            }
        }
    }

    // Persistence failure is logged, not fatal: the in-memory session stays
    // usable for the rest of the process lifetime.
    fn persist(&self, session: &Session) {
        if let Err(error) = self.store.save(session) {
            tracing::warn!(
                path = %self.store.path().display(),
                error = format!("{error:#}"),
                "failed to persist session, continuing in-memory"
            );
        }
    }
}

fn session_from_grant(grant: TokenGrant, previous_refresh: Option<String>) -> Session {
    Session {
        access_token: grant.access_token,
        // Refresh responses may omit the refresh token; keep the prior one.
        refresh_token: grant.refresh_token.or(previous_refresh),
        expires_at: now_unix_secs().saturating_add(grant.expires_in),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{
        CredentialManager, EXPIRY_SKEW_SECS, Session, SessionStore, TokenEndpoint, TokenGrant,
        authorize_url, now_unix_secs, percent_encode,
    };
    use crate::config::{GapToolConfig, OAuthConfig};
    use crate::error::AuthError;

    #[derive(Default)]
    struct MockEndpoint {
        refresh_calls: usize,
        exchange_calls: usize,
        refresh_fails: bool,
        exchange_fails: bool,
        grant_refresh_token: Option<String>,
        grant_expires_in: u64,
    }

    impl MockEndpoint {
        fn granting(expires_in: u64) -> Self {
            Self {
                grant_expires_in: expires_in,
                ..Self::default()
            }
        }

        fn grant(&self, access_token: &str) -> TokenGrant {
            TokenGrant {
                access_token: access_token.to_string(),
                refresh_token: self.grant_refresh_token.clone(),
                expires_in: self.grant_expires_in,
            }
        }
    }

    impl TokenEndpoint for MockEndpoint {
        fn refresh(&mut self, _refresh_token: &str) -> anyhow::Result<TokenGrant> {
            self.refresh_calls += 1;
            if self.refresh_fails {
                anyhow::bail!("refresh rejected");
            }
            Ok(self.grant("refreshed-token"))
        }

        fn exchange_code(&mut self, _code: &str) -> anyhow::Result<TokenGrant> {
            self.exchange_calls += 1;
            if self.exchange_fails {
                anyhow::bail!("code rejected");
            }
            Ok(self.grant("exchanged-token"))
        }
    }

    fn valid_session() -> Session {
        Session {
            access_token: "live-token".to_string(),
            refresh_token: Some("refresh-me".to_string()),
            expires_at: now_unix_secs() + 7200,
        }
    }

    fn expired_session() -> Session {
        Session {
            access_token: "stale-token".to_string(),
            refresh_token: Some("refresh-me".to_string()),
            expires_at: now_unix_secs().saturating_sub(10),
        }
    }

    #[test]
    fn session_validity_honors_expiry_skew() {
        let session = Session {
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: now_unix_secs() + EXPIRY_SKEW_SECS / 2,
        };
        assert!(!session.is_valid());

        let session = Session {
            access_token: String::new(),
            refresh_token: None,
            expires_at: now_unix_secs() + 7200,
        };
        assert!(!session.is_valid());

        assert!(valid_session().is_valid());
    }

    #[test]
    fn store_round_trips_full_session_shape() {
        let temp = tempdir().expect("tempdir");
        let store = SessionStore::new(temp.path().join("auth").join("session.json"));

        assert!(store.load().expect("load absent").is_none());

        let session = valid_session();
        store.save(&session).expect("save");
        let restored = store.load().expect("load").expect("present");
        assert_eq!(restored, session);

        store.clear().expect("clear");
        assert!(store.load().expect("load after clear").is_none());
    }

    #[test]
    fn store_rejects_corrupt_record() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        fs::write(&path, "not json").expect("write");
        let store = SessionStore::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn valid_session_is_reused_without_remote_calls() {
        let temp = tempdir().expect("tempdir");
        let store = SessionStore::new(temp.path().join("session.json"));
        store.save(&valid_session()).expect("seed store");

        let mut manager =
            CredentialManager::new(store, MockEndpoint::default(), "https://auth".to_string());
        let session = manager.get_session().expect("session");
        assert_eq!(session.access_token, "live-token");
        let session = manager.get_session().expect("session again");
        assert_eq!(session.access_token, "live-token");
        assert_eq!(manager.endpoint.refresh_calls, 0);
        assert_eq!(manager.endpoint.exchange_calls, 0);
    }

    #[test]
    fn expired_session_is_refreshed_and_persisted() {
        let temp = tempdir().expect("tempdir");
        let store = SessionStore::new(temp.path().join("session.json"));
        store.save(&expired_session()).expect("seed store");

        let mut manager = CredentialManager::new(
            store.clone(),
            MockEndpoint::granting(3600),
            "https://auth".to_string(),
        );
        let session = manager.get_session().expect("refreshed session");
        assert_eq!(session.access_token, "refreshed-token");
        // The grant omitted a refresh token; the prior one is kept.
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-me"));
        assert_eq!(manager.endpoint.refresh_calls, 1);

        let persisted = store.load().expect("load").expect("present");
        assert_eq!(persisted.access_token, "refreshed-token");
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-me"));
    }

    #[test]
    fn refresh_failure_surfaces_authentication_required() {
        let temp = tempdir().expect("tempdir");
        let store = SessionStore::new(temp.path().join("session.json"));
        store.save(&expired_session()).expect("seed store");

        let endpoint = MockEndpoint {
            refresh_fails: true,
            ..MockEndpoint::default()
        };
        let mut manager = CredentialManager::new(store, endpoint, "https://auth".to_string());
        match manager.get_session() {
            Err(AuthError::AuthenticationRequired { authorize_url }) => {
                assert_eq!(authorize_url, "https://auth");
            }
            other => panic!("expected AuthenticationRequired, got {other:?}"),
        }
    }

    #[test]
    fn missing_session_requires_code_and_exchange_recovers() {
        let temp = tempdir().expect("tempdir");
        let store = SessionStore::new(temp.path().join("session.json"));

        let mut manager = CredentialManager::new(
            store.clone(),
            MockEndpoint::granting(3600),
            "https://auth".to_string(),
        );
        assert!(matches!(
            manager.get_session(),
            Err(AuthError::AuthenticationRequired { .. })
        ));

        let session = manager.exchange_code("one-time-code").expect("exchange");
        assert_eq!(session.access_token, "exchanged-token");
        assert!(store.load().expect("load").is_some());

        let session = manager.get_session().expect("now valid");
        assert_eq!(session.access_token, "exchanged-token");
        assert_eq!(manager.endpoint.exchange_calls, 1);
        assert_eq!(manager.endpoint.refresh_calls, 0);
    }

    #[test]
    fn failed_exchange_is_transient_and_retries() {
        let temp = tempdir().expect("tempdir");
        let store = SessionStore::new(temp.path().join("session.json"));

        let endpoint = MockEndpoint {
            exchange_fails: true,
            grant_expires_in: 3600,
            ..MockEndpoint::default()
        };
        let mut manager = CredentialManager::new(store, endpoint, "https://auth".to_string());
        match manager.exchange_code("bad-code") {
            Err(AuthError::AuthenticationFailed(message)) => {
                assert!(message.contains("code rejected"));
            }
            other => panic!("expected AuthenticationFailed, got {other:?}"),
        }
        // Still awaiting a code afterwards.
        assert!(matches!(
            manager.get_session(),
            Err(AuthError::AuthenticationRequired { .. })
        ));

        manager.endpoint.exchange_fails = false;
        manager.exchange_code("good-code").expect("retry succeeds");
    }

    #[test]
    fn persistence_failure_does_not_fail_the_transition() {
        let temp = tempdir().expect("tempdir");
        // Parent is a regular file, so saving under it cannot succeed.
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "occupied").expect("write blocker");
        let store = SessionStore::new(blocker.join("session.json"));

        let mut manager = CredentialManager::new(
            store,
            MockEndpoint::granting(3600),
            "https://auth".to_string(),
        );
        let session = manager.exchange_code("one-time-code").expect("exchange");
        assert_eq!(session.access_token, "exchanged-token");
        let session = manager.get_session().expect("in-memory session survives");
        assert_eq!(session.access_token, "exchanged-token");
    }

    #[test]
    fn clear_removes_memory_and_disk_state() {
        let temp = tempdir().expect("tempdir");
        let store = SessionStore::new(temp.path().join("session.json"));
        store.save(&valid_session()).expect("seed store");

        let mut manager = CredentialManager::new(
            store.clone(),
            MockEndpoint::default(),
            "https://auth".to_string(),
        );
        manager.get_session().expect("session");
        manager.clear().expect("clear");
        assert!(store.load().expect("load").is_none());
        assert!(matches!(
            manager.get_session(),
            Err(AuthError::AuthenticationRequired { .. })
        ));
    }

    #[test]
    fn authorize_url_encodes_query_parameters() {
        let mut config = GapToolConfig::default();
        config.auth.client_id = Some("my client".to_string());
        config.auth.client_secret = Some("secret".to_string());
        let oauth = OAuthConfig::from_config(&config);
        let url = authorize_url(&oauth);
        assert!(url.contains("client_id=my%20client"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("access_type=offline"));

        assert_eq!(percent_encode("a b/c"), "a%20b%2Fc");
        assert_eq!(percent_encode("safe-._~"), "safe-._~");
    }
}
