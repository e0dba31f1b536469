//! Secrets management with HashiCorp Vault integration
//!
//! Service principal secrets and cluster certificate material are kept in a
//! KV v2 mount and addressed by path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub enabled: bool,
    pub address: String,
    pub namespace: Option<String>,
    pub mount_path: String,
    pub auth_method: VaultAuthMethod,
}

/// Vault authentication method
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VaultAuthMethod {
    #[serde(rename = "token")]
    Token { token: String },
    #[serde(rename = "approle")]
    AppRole { role_id: String, secret_id: String },
    #[serde(rename = "kubernetes")]
    Kubernetes { role: String, jwt_path: String },
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "http://127.0.0.1:8200".to_string(),
            namespace: None,
            mount_path: "secret".to_string(),
            auth_method: VaultAuthMethod::Token {
                token: String::new(),
            },
        }
    }
}

/// Secret with metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secret {
    pub data: HashMap<String, String>,
    pub version: Option<u32>,
}

/// Certificate material stored by reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub certificate: String,
    pub private_key: String,
}

/// Read and write secrets by path
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read_secret(&self, path: &str) -> EngineResult<Secret>;

    async fn write_secret(&self, path: &str, data: HashMap<String, String>) -> EngineResult<()>;
}

/// Fetch a certificate bundle stored with [`store_certificate`]
pub async fn fetch_certificate(
    store: &dyn SecretStore,
    path: &str,
) -> EngineResult<CertificateBundle> {
    let secret = store.read_secret(path).await?;
    let field = |key: &str| {
        secret.data.get(key).cloned().ok_or_else(|| {
            EngineError::Secret(format!("certificate at '{}' has no '{}' field", path, key))
        })
    };

    Ok(CertificateBundle {
        certificate: field("certificate")?,
        private_key: field("private_key")?,
    })
}

/// Store a certificate bundle under `path`
pub async fn store_certificate(
    store: &dyn SecretStore,
    path: &str,
    bundle: &CertificateBundle,
) -> EngineResult<()> {
    let mut data = HashMap::new();
    data.insert("certificate".to_string(), bundle.certificate.clone());
    data.insert("private_key".to_string(), bundle.private_key.clone());
    store.write_secret(path, data).await
}

/// Vault manager
pub struct VaultManager {
    config: VaultConfig,
    client: reqwest::Client,
    token_cache: RwLock<Option<String>>,
}

impl VaultManager {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            token_cache: RwLock::new(None),
        }
    }

    /// Authenticate and cache the client token
    pub async fn initialize(&self) -> EngineResult<()> {
        if !self.config.enabled {
            return Err(EngineError::Config("Vault is not enabled".to_string()));
        }

        let token = self.authenticate().await?;
        *self.token_cache.write().await = Some(token);

        tracing::info!("Vault connection initialized: {}", self.config.address);
        Ok(())
    }

    async fn authenticate(&self) -> EngineResult<String> {
        match &self.config.auth_method {
            VaultAuthMethod::Token { token } => {
                self.verify_token(token).await?;
                Ok(token.clone())
            }
            VaultAuthMethod::AppRole { role_id, secret_id } => {
                let payload = serde_json::json!({
                    "role_id": role_id,
                    "secret_id": secret_id,
                });
                self.login("approle", payload).await
            }
            VaultAuthMethod::Kubernetes { role, jwt_path } => {
                let jwt = tokio::fs::read_to_string(jwt_path).await.map_err(|e| {
                    EngineError::Secret(format!("Failed to read JWT: {}", e))
                })?;
                let payload = serde_json::json!({
                    "role": role,
                    "jwt": jwt.trim(),
                });
                self.login("kubernetes", payload).await
            }
        }
    }

    async fn verify_token(&self, token: &str) -> EngineResult<()> {
        let url = format!("{}/v1/auth/token/lookup-self", self.config.address);

        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(|e| EngineError::Secret(format!("Vault request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Secret("Invalid Vault token".to_string()));
        }

        Ok(())
    }

    async fn login(&self, method: &str, payload: serde_json::Value) -> EngineResult<String> {
        let url = format!("{}/v1/auth/{}/login", self.config.address, method);

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::Secret(format!("{} login failed: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Secret(format!(
                "{} authentication failed: HTTP {}",
                method,
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Secret(format!("Failed to parse response: {}", e)))?;

        body["auth"]["client_token"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| EngineError::Secret("No token in response".to_string()))
    }

    async fn get_token(&self) -> EngineResult<String> {
        self.token_cache
            .read()
            .await
            .clone()
            .ok_or_else(|| EngineError::Secret("Not authenticated to Vault".to_string()))
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.config.address, self.config.mount_path, path
        )
    }

    fn with_namespace(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.namespace {
            Some(ns) => request.header("X-Vault-Namespace", ns),
            None => request,
        }
    }
}

#[async_trait]
impl SecretStore for VaultManager {
    async fn read_secret(&self, path: &str) -> EngineResult<Secret> {
        if !self.config.enabled {
            return Err(EngineError::Config("Vault is not enabled".to_string()));
        }

        let token = self.get_token().await?;
        let request = self
            .client
            .get(self.data_url(path))
            .header("X-Vault-Token", token);

        let response = self
            .with_namespace(request)
            .send()
            .await
            .map_err(|e| EngineError::Secret(format!("Failed to read secret: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Secret(format!(
                "Failed to read secret '{}': HTTP {}",
                path,
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Secret(format!("Failed to parse response: {}", e)))?;

        parse_kv2_secret(&body)
    }

    async fn write_secret(&self, path: &str, data: HashMap<String, String>) -> EngineResult<()> {
        if !self.config.enabled {
            return Err(EngineError::Config("Vault is not enabled".to_string()));
        }

        let token = self.get_token().await?;
        let request = self
            .client
            .post(self.data_url(path))
            .header("X-Vault-Token", token)
            .json(&serde_json::json!({ "data": data }));

        let response = self
            .with_namespace(request)
            .send()
            .await
            .map_err(|e| EngineError::Secret(format!("Failed to write secret: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Secret(format!(
                "Failed to write secret '{}': HTTP {}",
                path,
                response.status()
            )));
        }

        tracing::info!("Secret written to Vault: {}", path);
        Ok(())
    }
}

/// Parse a KV v2 read response
fn parse_kv2_secret(body: &serde_json::Value) -> EngineResult<Secret> {
    let data = body["data"]["data"]
        .as_object()
        .ok_or_else(|| EngineError::Secret("Invalid secret format".to_string()))?
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();

    let version = body["data"]["metadata"]["version"]
        .as_u64()
        .map(|v| v as u32);

    Ok(Secret { data, version })
}

/// In-process secret store
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn read_secret(&self, path: &str) -> EngineResult<Secret> {
        self.secrets
            .read()
            .await
            .get(path)
            .cloned()
            .map(|data| Secret {
                data,
                version: Some(1),
            })
            .ok_or_else(|| EngineError::Secret(format!("Secret not found: {}", path)))
    }

    async fn write_secret(&self, path: &str, data: HashMap<String, String>) -> EngineResult<()> {
        self.secrets.write().await.insert(path.to_string(), data);
        Ok(())
    }
}
