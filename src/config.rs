//! Orchestrator configuration.
//!
//! Built once per run from, in increasing precedence: built-in defaults, an
//! optional TOML file, and CLI/environment overrides applied by the CLI
//! layer. The orchestrator itself never reads the environment.

use crate::credentials::SecretNames;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name searched in the working directory
pub const CONFIG_FILE_NAME: &str = "maven-release.toml";

/// Complete configuration for one orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Repository to check out: remote URL or local path
    pub source: String,
    /// Reference checked out before releasing
    pub reference: String,
    /// Build descriptor, relative to the checkout
    pub descriptor: PathBuf,
    /// Settings file handed to the release step, relative to the checkout
    pub settings_file: PathBuf,
    /// Profile activated for the release step
    pub profile: String,
    /// Server id the release step authenticates as; the settings file must
    /// declare it, or a sandbox settings file declaring it is generated
    pub repository_id: String,
    /// URL of that repository
    pub repository_url: String,
    /// Build tool executable
    pub maven: String,
    /// Arguments prepended to every build tool invocation
    pub maven_args: Vec<String>,
    /// Identity used for release commits and tags
    pub identity: CommitIdentity,
    /// Where each secret is read from
    pub secrets: SecretNames,
    /// Environment variable names the settings file reads at publish time
    pub publish_env: PublishEnvNames,
    /// Whether publishing requires a registered SSH identity
    pub require_ssh_identity: bool,
    /// Per-command timeout in seconds
    pub command_timeout_secs: Option<u64>,
    /// Sandbox settings
    pub sandbox: SandboxConfig,
    /// Host key policy for git over SSH
    pub ssh: SshConfig,
    /// Where to write the JSON run report
    pub report: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            reference: "main".to_string(),
            descriptor: PathBuf::from("pom.xml"),
            settings_file: PathBuf::from("settings.xml"),
            profile: "release".to_string(),
            repository_id: "ossrh".to_string(),
            repository_url: "https://s01.oss.sonatype.org/".to_string(),
            maven: "mvn".to_string(),
            maven_args: vec!["-B".to_string(), "--no-transfer-progress".to_string()],
            identity: CommitIdentity::default(),
            secrets: SecretNames::default(),
            publish_env: PublishEnvNames::default(),
            require_ssh_identity: true,
            command_timeout_secs: None,
            sandbox: SandboxConfig::default(),
            ssh: SshConfig::default(),
            report: None,
        }
    }
}

/// Name and email used for commits the release step creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitIdentity {
    /// user.name
    pub name: String,
    /// user.email
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "github-actions[bot]".to_string(),
            email: "41898282+github-actions[bot]@users.noreply.github.com".to_string(),
        }
    }
}

/// Variables `settings.xml` expands for server credentials and the signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishEnvNames {
    /// Server username
    pub username: String,
    /// Server password or token
    pub token: String,
    /// GPG passphrase
    pub passphrase: String,
}

impl Default for PublishEnvNames {
    fn default() -> Self {
        Self {
            username: "MAVEN_USERNAME".to_string(),
            token: "MAVEN_CENTRAL_TOKEN".to_string(),
            passphrase: "MAVEN_GPG_PASSPHRASE".to_string(),
        }
    }
}

/// How outbound endpoints are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressMode {
    /// Log every endpoint
    Audit,
    /// Refuse endpoints not on the allowlist
    Block,
}

/// Sandbox settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Egress policy
    pub egress: EgressMode,
    /// Hosts allowed in block mode
    pub allowed_endpoints: Vec<String>,
    /// Variables inherited from the parent environment
    pub passthrough_env: Vec<String>,
    /// Keep the sandbox directory after the run, minus the GnuPG home
    pub keep: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            egress: EgressMode::Audit,
            allowed_endpoints: vec![
                "github.com".to_string(),
                "repo.maven.apache.org".to_string(),
                "repo1.maven.org".to_string(),
                "s01.oss.sonatype.org".to_string(),
                "oss.sonatype.org".to_string(),
            ],
            passthrough_env: [
                "PATH",
                "HOME",
                "USER",
                "LANG",
                "TMPDIR",
                "JAVA_HOME",
                "MAVEN_HOME",
                "M2_HOME",
                "MAVEN_OPTS",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            keep: false,
        }
    }
}

/// Published host key of github.com
pub const GITHUB_HOST_KEY: &str =
    "github.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

/// Host key verification for git over SSH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Refuse hosts missing from `known_hosts`; when off, unknown hosts are
    /// trusted on first contact
    pub strict_host_key_checking: bool,
    /// Lines of the known_hosts file written into the sandbox
    pub known_hosts: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            strict_host_key_checking: true,
            known_hosts: vec![GITHUB_HOST_KEY.to_string()],
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = toml::from_str(&contents).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    /// Load from an explicit path, or the first default location that exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                log::info!("Using config file {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Check values the run depends on
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(ConfigError::Invalid {
                reason: reason.to_string(),
            }
            .into())
        };
        if self.source.trim().is_empty() {
            return invalid("source is required (--source or GITHUB_REPOSITORY)");
        }
        if self.reference.trim().is_empty() {
            return invalid("reference must not be empty");
        }
        if self.profile.trim().is_empty() {
            return invalid("profile must not be empty");
        }
        if self.repository_id.is_empty()
            || !self
                .repository_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return invalid("repository_id must be a non-empty server id of [A-Za-z0-9._-]");
        }
        if self.maven.trim().is_empty() {
            return invalid("maven executable must not be empty");
        }
        if self.descriptor.is_absolute() || self.settings_file.is_absolute() {
            return invalid("descriptor and settings_file must be relative to the checkout");
        }
        if self.identity.name.trim().is_empty() || self.identity.email.trim().is_empty() {
            return invalid("identity name and email are required");
        }
        if self.command_timeout_secs == Some(0) {
            return invalid("command_timeout_secs must be positive");
        }
        if self.ssh.strict_host_key_checking && self.ssh.known_hosts.is_empty() {
            return invalid("ssh.known_hosts must not be empty with strict_host_key_checking");
        }
        Ok(())
    }
}

/// Default config locations in search order
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("maven-release").join("config.toml"));
    }
    paths
}

/// Repository URL for a GitHub `owner/repo` slug
pub fn github_source(server_url: Option<&str>, repository: &str) -> String {
    let server = server_url.unwrap_or("https://github.com").trim_end_matches('/');
    format!("{server}/{repository}.git")
}
