//! Capabilities the orchestrator drives, and their process-backed implementations.
//!
//! Each trait is one seam between the step sequence and an external tool.
//! The orchestrator only ever sees these traits, so tests swap in doubles
//! while the binary uses [`GitCli`], [`SystemAuthenticator`] and [`Maven`].

mod auth;
mod git;
mod gpg;
mod maven;
mod ssh;

pub use auth::SystemAuthenticator;
pub use git::GitCli;
pub use gpg::{Gpg, SigningKeyInfo};
pub use maven::{Maven, leftover_release_metadata};
pub use ssh::{SshAgent, SshSession, git_ssh_command, write_known_hosts};

use crate::config::{CommitIdentity, PublishEnvNames};
use crate::credentials::{PublishSecrets, Redactor, Secret};
use crate::error::Result;
use crate::event::PublishedRelease;
use crate::process::ToolCommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Working directory, environment and redaction shared by every command in a step
#[derive(Debug, Clone)]
pub struct Session {
    workdir: PathBuf,
    env: BTreeMap<String, String>,
    redactor: Redactor,
    timeout: Option<Duration>,
}

impl Session {
    /// Create a session rooted at `workdir`
    pub fn new(
        workdir: impl Into<PathBuf>,
        env: BTreeMap<String, String>,
        redactor: Redactor,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            env,
            redactor,
            timeout,
        }
    }

    /// Same session, different working directory
    pub fn with_workdir(&self, workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..self.clone()
        }
    }

    /// Same session with extra environment variables
    pub fn with_env<I>(&self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut session = self.clone();
        session.env.extend(vars);
        session
    }

    /// Working directory
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Environment handed to child processes
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Redactor for command lines and output
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// A command preconfigured with this session's directory, environment and timeout
    pub fn command(&self, program: &str) -> ToolCommand {
        ToolCommand::new(program)
            .current_dir(&self.workdir)
            .envs(&self.env)
            .timeout(self.timeout)
    }
}

/// A checked-out source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    /// Directory containing the tree
    pub path: PathBuf,
    /// Reference that was checked out
    pub reference: String,
    /// Commit at HEAD
    pub head: String,
}

/// A file produced by the packaging step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// File name
    pub name: String,
    /// Path inside the sandbox
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Everything the combined prepare + perform step needs
#[derive(Debug, Clone, Copy)]
pub struct ReleaseRequest<'a> {
    /// Release being published
    pub release: &'a PublishedRelease,
    /// Build descriptor relative to the checkout
    pub descriptor: &'a Path,
    /// Profile to activate
    pub profile: &'a str,
    /// Settings file relative to the checkout
    pub settings_file: &'a Path,
    /// Server id the settings must declare for the publish repository
    pub repository_id: &'a str,
    /// Directory outside the checkout for generated files
    pub scratch_dir: &'a Path,
    /// Repository and signer secrets
    pub secrets: PublishSecrets<'a>,
    /// Variables the settings file reads those secrets from
    pub publish_env: &'a PublishEnvNames,
}

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Version that was released
    pub release_version: String,
}

/// Version control operations
pub trait SourceControl {
    /// Clone `source` at `reference` into `dest`
    fn checkout(
        &self,
        session: &Session,
        source: &str,
        reference: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<Checkout>>;

    /// Commit a tag points to, if the tag exists in the checkout
    fn tag_commit(&self, session: &Session, tag: &str) -> impl Future<Output = Result<Option<String>>>;

    /// Configure the identity used for release commits and tags
    fn configure_identity(
        &self,
        session: &Session,
        identity: &CommitIdentity,
    ) -> impl Future<Output = Result<()>>;
}

/// Transient authentication material
pub trait Authenticator {
    /// Import a private signing key into `gnupg_home`
    fn import_signing_key(
        &self,
        session: &Session,
        gnupg_home: &Path,
        key: &Secret,
    ) -> impl Future<Output = Result<SigningKeyInfo>>;

    /// Register an SSH identity for git pushes, scoped to the returned session
    fn register_ssh_identity(
        &self,
        session: &Session,
        key: &Secret,
    ) -> impl Future<Output = Result<SshSession>>;
}

/// Packaging
pub trait Builder {
    /// Package the project described by `descriptor`
    fn package(
        &self,
        session: &Session,
        descriptor: &Path,
    ) -> impl Future<Output = Result<Vec<BuildArtifact>>>;
}

/// Release management
pub trait Releaser {
    /// Discard release-in-progress metadata; succeeds when there is none
    fn clean(&self, session: &Session, descriptor: &Path) -> impl Future<Output = Result<()>>;

    /// Tag, build, sign and publish `request.release`
    fn prepare_and_perform(
        &self,
        session: &Session,
        request: &ReleaseRequest<'_>,
    ) -> impl Future<Output = Result<PublishOutcome>>;
}
