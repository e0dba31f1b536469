//! Service principal credential types

use serde::{Deserialize, Serialize};

/// Credentials the engine uses to authenticate against the cloud
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServicePrincipalProfile {
    pub client_id: String,
    pub secret: ClientSecret,
}

/// Where the client secret lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientSecret {
    /// Secret stored with the specification
    Inline { value: String },
    /// Secret stored in the vault under `path`, field `key`
    Vault { path: String, key: String },
}

impl ClientSecret {
    pub fn is_vault_reference(&self) -> bool {
        matches!(self, Self::Vault { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_secret_tagging() {
        let secret = ClientSecret::Vault {
            path: "clusters/prod/sp".to_string(),
            key: "client_secret".to_string(),
        };
        let json = serde_json::to_value(&secret).unwrap();
        assert_eq!(json["type"], "vault");
        assert!(secret.is_vault_reference());

        let inline: ClientSecret =
            serde_json::from_str(r#"{"type":"inline","value":"s3cr3t"}"#).unwrap();
        assert!(!inline.is_vault_reference());
    }
}
