//! Service principal credentials and access tokens
//!
//! The client secret of the cluster's service principal is either stored with
//! the specification or referenced in the vault. Once recovered it is traded
//! for a bearer token the ARM client attaches to every request.

use async_trait::async_trait;
use clusterops_common::auth::{ClientSecret, ServicePrincipalProfile};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::cloud::{CloudError, CloudResult};
use crate::error::{EngineError, EngineResult};
use crate::secrets::SecretStore;

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Source of bearer tokens for cloud requests
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> CloudResult<String>;
}

/// Fixed token, for tests and pre-authenticated callers
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: &str) -> Self {
        Self(token.to_string())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> CloudResult<String> {
        Ok(self.0.clone())
    }
}

struct CachedToken {
    value: String,
    expires_at: u64,
}

/// OAuth client-credentials token for a service principal
pub struct ClientCredentialsToken {
    client: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    resource: String,
    cache: RwLock<Option<CachedToken>>,
}

impl ClientCredentialsToken {
    pub fn new(
        authority: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
        resource: &str,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            authority: authority.trim_end_matches('/').to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            resource: resource.to_string(),
            cache: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> CloudResult<CachedToken> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            expires_in: Option<String>,
        }

        let url = format!("{}/{}/oauth2/token", self.authority, self.tenant_id);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("resource", self.resource.as_str()),
        ];

        let response = self.client.post(&url).form(&form).send().await?;
        if response.status().as_u16() == 400 || response.status().as_u16() == 401 {
            return Err(CloudError::AuthFailed);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(CloudError::Api { status, message });
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = body
            .expires_in
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(3600);

        Ok(CachedToken {
            value: body.access_token,
            expires_at: now_secs() + lifetime,
        })
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsToken {
    async fn token(&self) -> CloudResult<String> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.expires_at > now_secs() + EXPIRY_MARGIN.as_secs() {
                return Ok(cached.value.clone());
            }
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *self.cache.write().await = Some(fresh);

        tracing::debug!(client_id = %self.client_id, "Acquired access token");
        Ok(value)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Recover the client secret of a service principal, reading the vault when
/// the profile holds a reference instead of the secret itself
pub async fn resolve_client_secret(
    profile: &ServicePrincipalProfile,
    secrets: Option<&dyn SecretStore>,
) -> EngineResult<String> {
    match &profile.secret {
        ClientSecret::Inline { value } => Ok(value.clone()),
        ClientSecret::Vault { path, key } => {
            let store = secrets.ok_or_else(|| {
                EngineError::Config(format!(
                    "service principal secret is stored in the vault at '{}' but no vault is configured",
                    path
                ))
            })?;
            let secret = store.read_secret(path).await?;
            secret.data.get(key).cloned().ok_or_else(|| {
                EngineError::Secret(format!("secret '{}' has no field '{}'", path, key))
            })
        }
    }
}
