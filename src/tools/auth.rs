//! Process-backed [`Authenticator`].

use super::{Authenticator, Gpg, Session, SigningKeyInfo, SshAgent, SshSession};
use crate::credentials::Secret;
use crate::error::Result;
use std::path::Path;

/// Authenticator using the system `gpg` and `ssh-agent`
#[derive(Debug, Clone, Default)]
pub struct SystemAuthenticator {
    gpg: Gpg,
    ssh: SshAgent,
}

impl SystemAuthenticator {
    /// Combine explicit clients
    pub fn new(gpg: Gpg, ssh: SshAgent) -> Self {
        Self { gpg, ssh }
    }
}

impl Authenticator for SystemAuthenticator {
    async fn import_signing_key(
        &self,
        session: &Session,
        gnupg_home: &Path,
        key: &Secret,
    ) -> Result<SigningKeyInfo> {
        self.gpg.import_key(session, gnupg_home, key).await
    }

    async fn register_ssh_identity(&self, session: &Session, key: &Secret) -> Result<SshSession> {
        self.ssh.register(session, key).await
    }
}
