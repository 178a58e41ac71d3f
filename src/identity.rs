//! The external identity provider, seen as a credential-state oracle.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    #[default]
    Authorized,
    Revoked,
    NotFound,
    Transferred,
}

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    async fn credential_state(&self, user_id: &str) -> Result<CredentialState, AuthorityError>;
}

/// Authority answering from a fixed table, configured in the `[identity]`
/// section of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthority {
    default_state: CredentialState,
    overrides: HashMap<String, CredentialState>,
}

impl StaticAuthority {
    pub fn new(default_state: CredentialState) -> Self {
        Self {
            default_state,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, CredentialState>) -> Self {
        self.overrides = overrides;
        self
    }
}

#[async_trait]
impl IdentityAuthority for StaticAuthority {
    async fn credential_state(&self, user_id: &str) -> Result<CredentialState, AuthorityError> {
        Ok(self
            .overrides
            .get(user_id)
            .copied()
            .unwrap_or(self.default_state))
    }
}
