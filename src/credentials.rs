//! Secrets injected into a run.
//!
//! Secret values only ever leave this module through [`Secret::expose`],
//! which callers use to feed a child process's stdin or environment.
//! [`Redactor`] scrubs every known value from text before it is logged
//! or stored.

use crate::error::{CredentialError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const REDACTED: &str = "***";

/// An opaque secret value
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({REDACTED})")
    }
}

/// Environment variable names each secret is read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretNames {
    /// Repository-publish username
    pub repository_username: String,
    /// Repository-publish token
    pub repository_token: String,
    /// ASCII-armored signing private key
    pub signing_key: String,
    /// Signing key passphrase
    pub signing_passphrase: String,
    /// SSH private key for git pushes
    pub ssh_private_key: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            repository_username: "OSSRH_USERNAME".to_string(),
            repository_token: "OSSRH_TOKEN".to_string(),
            signing_key: "MAVEN_GPG_PRIVATE_KEY".to_string(),
            signing_passphrase: "MAVEN_GPG_PASSPHRASE".to_string(),
            ssh_private_key: "SSH_PRIVATE_KEY".to_string(),
        }
    }
}

/// All secrets available to a run; any of them may be absent
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    names: SecretNames,
    repository_username: Option<Secret>,
    repository_token: Option<Secret>,
    signing_key: Option<Secret>,
    signing_passphrase: Option<Secret>,
    ssh_private_key: Option<Secret>,
}

/// Secrets the publish step hands to the build tool
#[derive(Debug, Clone, Copy)]
pub struct PublishSecrets<'a> {
    /// Repository-publish username
    pub username: &'a Secret,
    /// Repository-publish token
    pub token: &'a Secret,
    /// Signing key passphrase
    pub passphrase: &'a Secret,
}

impl Credentials {
    /// Read secrets from the process environment
    pub fn from_env(names: &SecretNames) -> Self {
        Self::from_lookup(names, |key| std::env::var(key).ok())
    }

    /// Read secrets through an arbitrary lookup; empty values count as absent
    pub fn from_lookup<F>(names: &SecretNames, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(Secret::new);
        Self {
            repository_username: read(&names.repository_username),
            repository_token: read(&names.repository_token),
            signing_key: read(&names.signing_key),
            signing_passphrase: read(&names.signing_passphrase),
            ssh_private_key: read(&names.ssh_private_key),
            names: names.clone(),
        }
    }

    /// Names these credentials were read from
    pub fn names(&self) -> &SecretNames {
        &self.names
    }

    /// Signing key, if provided
    pub fn signing_key(&self) -> Option<&Secret> {
        self.signing_key.as_ref()
    }

    /// SSH private key, if provided
    pub fn ssh_private_key(&self) -> Option<&Secret> {
        self.ssh_private_key.as_ref()
    }

    /// Everything the publish step needs, or the names of what is missing
    pub fn publish_secrets(
        &self,
        signing_key_imported: bool,
        ssh_identity_required: bool,
        ssh_identity_registered: bool,
    ) -> Result<PublishSecrets<'_>> {
        let mut missing = Vec::new();
        if self.repository_username.is_none() {
            missing.push(self.names.repository_username.clone());
        }
        if self.repository_token.is_none() {
            missing.push(self.names.repository_token.clone());
        }
        if self.signing_passphrase.is_none() {
            missing.push(self.names.signing_passphrase.clone());
        }
        if self.signing_key.is_none() {
            missing.push(self.names.signing_key.clone());
        }
        if ssh_identity_required && self.ssh_private_key.is_none() {
            missing.push(self.names.ssh_private_key.clone());
        }

        match (
            &self.repository_username,
            &self.repository_token,
            &self.signing_passphrase,
        ) {
            (Some(username), Some(token), Some(passphrase)) if missing.is_empty() => {
                if !signing_key_imported {
                    return Err(CredentialError::SigningKeyNotImported.into());
                }
                if ssh_identity_required && !ssh_identity_registered {
                    return Err(CredentialError::InstallFailed {
                        what: "SSH identity".to_string(),
                        reason: "no SSH identity was registered for git pushes".to_string(),
                    }
                    .into());
                }
                Ok(PublishSecrets {
                    username,
                    token,
                    passphrase,
                })
            }
            _ => Err(CredentialError::Missing { names: missing }.into()),
        }
    }

    /// Redactor covering every secret value held here
    pub fn redactor(&self) -> Redactor {
        let values = [
            &self.repository_username,
            &self.repository_token,
            &self.signing_key,
            &self.signing_passphrase,
            &self.ssh_private_key,
        ]
        .into_iter()
        .flatten()
        .flat_map(|secret| {
            // Multi-line keys leak line by line in tool output
            let mut parts = vec![secret.expose().to_string()];
            parts.extend(
                secret
                    .expose()
                    .lines()
                    .map(str::trim)
                    .filter(|line| line.len() >= 8 && !line.starts_with("-----"))
                    .map(str::to_string),
            );
            parts
        })
        .collect();
        Redactor::new(values)
    }
}

/// Replaces known secret values with `***`
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    values: Vec<String>,
}

impl Redactor {
    /// Build a redactor for the given values
    pub fn new(mut values: Vec<String>) -> Self {
        values.retain(|v| !v.is_empty());
        // Longest first so a value containing another is replaced whole
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));
        values.dedup();
        Self { values }
    }

    /// Scrub all known values from `text`
    pub fn redact(&self, text: &str) -> String {
        self.values
            .iter()
            .fold(text.to_string(), |acc, value| acc.replace(value.as_str(), REDACTED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReleaseError;
    use std::collections::HashMap;

    fn credentials(pairs: &[(&str, &str)]) -> Credentials {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Credentials::from_lookup(&SecretNames::default(), |k| env.get(k).cloned())
    }

    fn complete() -> Credentials {
        credentials(&[
            ("OSSRH_USERNAME", "deployer"),
            ("OSSRH_TOKEN", "tok-9f8e7d6c"),
            ("MAVEN_GPG_PRIVATE_KEY", "-----BEGIN PGP-----\nAAAABBBBCCCCDDDD\n-----END PGP-----"),
            ("MAVEN_GPG_PASSPHRASE", "hunter22"),
            ("SSH_PRIVATE_KEY", "ssh-key-material"),
        ])
    }

    #[test]
    fn debug_output_never_contains_values() {
        let debug = format!("{:?}", complete());
        assert!(!debug.contains("tok-9f8e7d6c"));
        assert!(!debug.contains("hunter22"));
        assert!(debug.contains("Secret(***)"));
    }

    #[test]
    fn empty_values_count_as_absent() {
        let creds = credentials(&[("OSSRH_USERNAME", "  ")]);
        let err = creds.publish_secrets(true, false, false).unwrap_err();
        match err {
            ReleaseError::Credential(CredentialError::Missing { names }) => {
                assert!(names.contains(&"OSSRH_USERNAME".to_string()));
                assert!(!names.contains(&"SSH_PRIVATE_KEY".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn publish_requires_an_imported_key() {
        let err = complete().publish_secrets(false, false, false).unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::Credential(CredentialError::SigningKeyNotImported)
        ));
        assert!(complete().publish_secrets(true, true, true).is_ok());
    }

    #[test]
    fn redactor_scrubs_whole_values_and_key_lines() {
        let redactor = complete().redactor();
        let text = "auth tok-9f8e7d6c with hunter22\nkey line AAAABBBBCCCCDDDD";
        let scrubbed = redactor.redact(text);
        assert_eq!(scrubbed, "auth *** with ***\nkey line ***");
    }
}
