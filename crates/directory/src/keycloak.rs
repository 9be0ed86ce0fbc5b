// Keycloak admin REST client
//
// Users and groups are read from /admin/realms/{realm}/... with a bearer token
// obtained through the client-credentials grant. The token is cached until
// shortly before it expires; a 401 from the admin API drops it and retries once.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use eventhook_core::traits::{Directory, UserProfile};
use eventhook_core::DirectoryError;

/// Tokens are refreshed this long before Keycloak says they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Fallback lifetime when the token response has no expires_in
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct KeycloakConfig {
    /// Server URL, e.g. "https://sso.example.org" or "https://host/auth"
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl KeycloakConfig {
    pub fn new(
        base_url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            realm: realm.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for KeycloakConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeycloakConfig")
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UserRepresentation {
    username: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupRepresentation {
    name: Option<String>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Keycloak-backed identity directory
pub struct KeycloakDirectory {
    config: KeycloakConfig,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl KeycloakDirectory {
    pub fn new(config: KeycloakConfig) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("eventhook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DirectoryError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| DirectoryError::Transport(format!("invalid directory URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| DirectoryError::Transport("directory URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.lock();
        guard
            .as_ref()
            .filter(|t| Instant::now() < t.refresh_at)
            .map(|t| t.value.clone())
    }

    fn invalidate_token(&self) {
        *self.token.lock() = None;
    }

    async fn access_token(&self) -> Result<String, DirectoryError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let url = self.endpoint(&[
            "realms",
            &self.config.realm,
            "protocol",
            "openid-connect",
            "token",
        ])?;

        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Auth(format!(
                "token request returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;

        let ttl = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        let refresh_at = Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_MARGIN);

        debug!(expires_in_secs = ttl.as_secs(), "Obtained directory access token");

        *self.token.lock() = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at,
        });
        Ok(token.access_token)
    }

    /// GET an admin resource; 404 maps to None
    async fn get_admin<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>, DirectoryError> {
        let mut path = vec!["admin", "realms", self.config.realm.as_str()];
        path.extend_from_slice(segments);
        let url = self.endpoint(&path)?;

        let mut retried = false;
        loop {
            let token = self.access_token().await?;
            let response = self
                .http
                .get(url.clone())
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| DirectoryError::Transport(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !retried {
                warn!("Directory rejected access token, refreshing");
                self.invalidate_token();
                retried = true;
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(DirectoryError::UnexpectedStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            return response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| DirectoryError::Decode(e.to_string()));
        }
    }
}

#[async_trait]
impl Directory for KeycloakDirectory {
    #[instrument(skip(self))]
    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, DirectoryError> {
        debug!("Fetching user representation");
        let user: Option<UserRepresentation> = self.get_admin(&["users", user_id]).await?;
        Ok(user.map(|u| UserProfile {
            username: u.username,
            email: u.email,
        }))
    }

    #[instrument(skip(self))]
    async fn group_name(&self, group_id: &str) -> Result<Option<String>, DirectoryError> {
        debug!("Fetching group name");
        let group: Option<GroupRepresentation> = self.get_admin(&["groups", group_id]).await?;
        Ok(group.and_then(|g| g.name))
    }
}
