//! API key references.
//!
//! Provider records never hold key material. They hold an [`ApiKeyRef`]
//! naming where the key lives (an environment variable or an OS keyring
//! entry); the key is resolved just before each outbound call. A short
//! SHA-256 fingerprint is kept for display and change detection.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AicwError, Result};

/// Keyring service name used for keys stored by `aicw providers add`.
pub const KEYRING_SERVICE: &str = "aicw";

/// Hex characters kept from the key digest.
const FINGERPRINT_LEN: usize = 12;

/// Where a provider's API key is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ApiKeyRef {
    /// Environment variable read at call time.
    Env { var: String },
    /// OS keyring entry.
    Keyring { service: String, account: String },
}

impl ApiKeyRef {
    #[must_use]
    pub fn env(var: impl Into<String>) -> Self {
        Self::Env { var: var.into() }
    }

    #[must_use]
    pub fn keyring(account: impl Into<String>) -> Self {
        Self::Keyring {
            service: KEYRING_SERVICE.to_string(),
            account: account.into(),
        }
    }

    /// Short human-readable location, e.g. `env:OPENAI_API_KEY`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Env { var } => format!("env:{var}"),
            Self::Keyring { service, account } => format!("keyring:{service}/{account}"),
        }
    }

    /// Read the key.
    ///
    /// # Errors
    ///
    /// Returns [`AicwError::SecretMissing`] if the variable is unset or empty,
    /// or the keyring entry cannot be read.
    pub fn resolve(&self, provider_id: &str) -> Result<String> {
        let missing = || AicwError::SecretMissing {
            provider: provider_id.to_string(),
            source_name: self.describe(),
        };

        match self {
            Self::Env { var } => std::env::var(var)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(missing),
            Self::Keyring { service, account } => {
                let entry = keyring::Entry::new(service, account).map_err(|e| {
                    tracing::debug!(provider_id, error = %e, "keyring entry unavailable");
                    missing()
                })?;
                entry.get_password().map_err(|e| {
                    tracing::debug!(provider_id, error = %e, "keyring read failed");
                    missing()
                })
            }
        }
    }

    /// Write `secret` into the referenced keyring entry.
    ///
    /// # Errors
    ///
    /// Returns an error for env references, or if keyring access fails.
    pub fn store(&self, secret: &str) -> Result<()> {
        match self {
            Self::Env { var } => Err(AicwError::Config(format!(
                "cannot store a key into environment variable {var}; export it instead"
            ))),
            Self::Keyring { service, account } => {
                let entry = keyring::Entry::new(service, account)
                    .map_err(|e| AicwError::Config(format!("Keyring error: {e}")))?;
                entry
                    .set_password(secret)
                    .map_err(|e| AicwError::Config(format!("Failed to store key: {e}")))
            }
        }
    }
}

/// Short, non-reversible fingerprint of a key.
#[must_use]
pub fn fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..FINGERPRINT_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = fingerprint("sk-test-123");
        assert_eq!(a.len(), FINGERPRINT_LEN);
        assert_eq!(a, fingerprint("sk-test-123"));
        assert_ne!(a, fingerprint("sk-test-124"));
        assert!(!a.contains("sk-"));
    }

    #[test]
    fn describe_names_the_source() {
        assert_eq!(ApiKeyRef::env("OPENAI_API_KEY").describe(), "env:OPENAI_API_KEY");
        assert_eq!(ApiKeyRef::keyring("main").describe(), "keyring:aicw/main");
    }

    #[test]
    fn missing_env_var_is_secret_missing() {
        let key = ApiKeyRef::env("AICW_TEST_KEY_THAT_IS_NEVER_SET_4F2A");
        let err = key.resolve("p1").unwrap_err();
        assert!(matches!(err, AicwError::SecretMissing { .. }));
        assert_eq!(err.provider(), Some("p1"));
    }

    #[test]
    fn env_refs_cannot_be_stored() {
        assert!(ApiKeyRef::env("X").store("secret").is_err());
    }

    #[test]
    fn serde_shape_is_tagged() {
        let json = serde_json::to_value(ApiKeyRef::env("K")).unwrap();
        assert_eq!(json["source"], "env");
        assert_eq!(json["var"], "K");
    }
}
