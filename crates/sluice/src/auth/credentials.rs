//! Credential providers.

use std::fmt;
use std::sync::Arc;

use snafu::prelude::*;

use crate::error::{AuthError, CredentialsSnafu};

/// Shared handle to a credential provider.
pub type CredentialProviderRef = Arc<dyn CredentialProvider>;

/// An access key pair, optionally with a session token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

/// Source of the credentials requests are signed and verified with.
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    fn credentials(&self) -> Result<Credentials, AuthError>;
}

/// Fixed credentials, typically from the config file.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Result<Credentials, AuthError> {
        Ok(self.credentials.clone())
    }
}

/// Credentials read from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
/// `AWS_SESSION_TOKEN` on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn resolve<F>(lookup: F) -> Result<Credentials, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let access_key_id = non_empty("AWS_ACCESS_KEY_ID").context(CredentialsSnafu {
            message: "AWS_ACCESS_KEY_ID is not set",
        })?;
        let secret_access_key = non_empty("AWS_SECRET_ACCESS_KEY").context(CredentialsSnafu {
            message: "AWS_SECRET_ACCESS_KEY is not set",
        })?;

        Ok(Credentials {
            access_key_id,
            secret_access_key,
            session_token: non_empty("AWS_SESSION_TOKEN"),
        })
    }
}

impl CredentialProvider for EnvCredentials {
    fn credentials(&self) -> Result<Credentials, AuthError> {
        Self::resolve(|name| std::env::var(name).ok())
    }
}
