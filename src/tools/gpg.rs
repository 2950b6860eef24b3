//! Signing key import through `gpg`.

use super::Session;
use crate::credentials::Secret;
use crate::error::{CredentialError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static IMPORTED_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"key (?P<id>[0-9A-Fa-f]{8,40}): (?:secret key imported|already in secret keyring)")
        .expect("gpg import regex is valid")
});

/// Key ids of an imported signing key; ids are public and safe to log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyInfo {
    /// Imported secret key ids
    pub key_ids: Vec<String>,
}

/// `gpg` command-line client
#[derive(Debug, Clone)]
pub struct Gpg {
    program: String,
}

impl Default for Gpg {
    fn default() -> Self {
        Self::new("gpg")
    }
}

impl Gpg {
    /// Client for the given executable
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Import an armored secret key into `gnupg_home`, reading it from stdin
    pub async fn import_key(
        &self,
        session: &Session,
        gnupg_home: &Path,
        key: &Secret,
    ) -> Result<SigningKeyInfo> {
        let install_failed = |reason: String| CredentialError::InstallFailed {
            what: "signing key".to_string(),
            reason,
        };

        let output = session
            .command(&self.program)
            .env("GNUPGHOME", gnupg_home.display().to_string())
            .args(["--batch", "--yes", "--import"])
            .stdin_secret(key)
            .run(session.redactor())
            .await
            .map_err(|e| install_failed(e.to_string()))?;

        let key_ids = parse_imported_keys(&output.stderr);
        if key_ids.is_empty() {
            return Err(install_failed("gpg imported no secret keys".to_string()).into());
        }
        log::info!("Imported signing key(s): {}", key_ids.join(", "));
        Ok(SigningKeyInfo { key_ids })
    }
}

fn parse_imported_keys(stderr: &str) -> Vec<String> {
    let mut ids: Vec<String> = IMPORTED_KEY_RE
        .captures_iter(stderr)
        .map(|caps| caps["id"].to_ascii_uppercase())
        .collect();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gpg_import_status() {
        let stderr = "\
gpg: keybox '/tmp/gnupg/pubring.kbx' created
gpg: key 1A2B3C4D5E6F7A8B: public key \"Release Bot <bot@example.com>\" imported
gpg: key 1A2B3C4D5E6F7A8B: secret key imported
gpg: Total number processed: 1
";
        assert_eq!(parse_imported_keys(stderr), vec!["1A2B3C4D5E6F7A8B"]);
    }

    #[test]
    fn public_only_imports_yield_no_signing_key() {
        let stderr = "gpg: key 1A2B3C4D5E6F7A8B: public key \"x\" imported\n";
        assert!(parse_imported_keys(stderr).is_empty());
    }
}
