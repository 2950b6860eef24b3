//! Error types for release orchestration.
//!
//! Every failure maps to one variant of [`ReleaseError`], grouped by the step
//! family it belongs to, with actionable recovery suggestions.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Main error type for all orchestration operations
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// Triggering event errors
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Sandbox errors
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// External tool errors
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Git operation errors
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// Credential errors
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Packaging errors
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Leftover release metadata errors
    #[error("Stale state error: {0}")]
    StaleState(#[from] StaleStateError),

    /// Publishing errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Triggering event errors
#[derive(Error, Debug)]
pub enum EventError {
    /// Payload could not be read or decoded
    #[error("Invalid event payload at {path}: {reason}")]
    InvalidPayload {
        /// Path of the payload file
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// Published release without a tag
    #[error("Published release event carries no tag_name")]
    MissingTag,

    /// Tag not usable as a release version
    #[error("Invalid release tag '{tag}': {reason}")]
    InvalidTag {
        /// Tag as received
        tag: String,
        /// Reason for the error
        reason: String,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be loaded
    #[error("Failed to load config file {path}: {reason}")]
    Load {
        /// Path to the config file
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// Config values are inconsistent
    #[error("Invalid configuration: {reason}")]
    Invalid {
        /// Reason for the error
        reason: String,
    },

    /// Settings file does not declare the publish repository's server
    #[error("Settings file {} declares no <server> with id '{repository_id}'", settings_file.display())]
    MissingServer {
        /// Settings file, relative to the checkout
        settings_file: PathBuf,
        /// Server id that was expected
        repository_id: String,
    },
}

/// Sandbox errors
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Workspace could not be created
    #[error("Failed to create sandbox: {reason}")]
    CreateFailed {
        /// Reason for the error
        reason: String,
    },

    /// Egress policy refused an endpoint
    #[error("Outbound endpoint '{host}' is not allowed by the egress policy")]
    EgressDenied {
        /// Host that was refused
        host: String,
    },
}

/// External tool errors
#[derive(Error, Debug)]
pub enum ToolError {
    /// Executable not found
    #[error("Required tool '{tool}' not found on PATH")]
    NotFound {
        /// Tool name
        tool: String,
    },

    /// Process could not be spawned
    #[error("Failed to spawn '{command}': {reason}")]
    SpawnFailed {
        /// Command line (redacted)
        command: String,
        /// Reason for the error
        reason: String,
    },

    /// Process exited unsuccessfully
    #[error("'{command}' exited with code {code}:\n{stderr_tail}")]
    Failed {
        /// Command line (redacted)
        command: String,
        /// Exit code, -1 when terminated by a signal
        code: i32,
        /// Last lines of stderr (redacted)
        stderr_tail: String,
    },

    /// Process exceeded its timeout
    #[error("'{command}' timed out after {seconds}s")]
    TimedOut {
        /// Command line (redacted)
        command: String,
        /// Timeout in seconds
        seconds: u64,
    },
}

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Clone or checkout failed
    #[error("Checkout of '{reference}' from {source_location} failed: {reason}")]
    CheckoutFailed {
        /// Repository location
        source_location: String,
        /// Reference being checked out
        reference: String,
        /// Reason for the error
        reason: String,
    },

    /// Commit identity could not be configured
    #[error("Failed to configure commit identity: {reason}")]
    IdentityFailed {
        /// Reason for the error
        reason: String,
    },
}

/// Credential errors
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Required secrets are not set
    #[error("Missing required secrets: {}", names.join(", "))]
    Missing {
        /// Environment variable names of the missing secrets
        names: Vec<String>,
    },

    /// No signing key was imported during authentication
    #[error("No signing key was imported; artifacts cannot be signed")]
    SigningKeyNotImported,

    /// Signing key import or SSH registration failed
    #[error("Failed to install {what}: {reason}")]
    InstallFailed {
        /// Which credential
        what: String,
        /// Reason for the error
        reason: String,
    },

    /// The remote or the signer rejected the credentials
    #[error("Credentials rejected during {operation}: {reason}")]
    Rejected {
        /// Operation that was refused
        operation: String,
        /// Reason for the error
        reason: String,
    },
}

/// Packaging errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// Packaging step failed
    #[error("Packaging {descriptor} failed: {reason}")]
    PackagingFailed {
        /// Build descriptor
        descriptor: PathBuf,
        /// Reason for the error
        reason: String,
    },
}

/// Leftover release metadata errors
#[derive(Error, Debug)]
pub enum StaleStateError {
    /// release:clean failed
    #[error("Cleaning release metadata failed: {reason}")]
    CleanFailed {
        /// Reason for the error
        reason: String,
    },

    /// Metadata files survived the clean step
    #[error("Release metadata still present after clean: {}", paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    MetadataRemains {
        /// Leftover files
        paths: Vec<PathBuf>,
    },
}

/// Publishing errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// release:prepare release:perform failed
    #[error("Release of version '{version}' failed: {reason}")]
    ReleaseFailed {
        /// Version being released
        version: String,
        /// Reason for the error
        reason: String,
    },
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },
}

impl ReleaseError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ReleaseError::Event(EventError::InvalidTag { tag, .. }) => vec![
                format!("Re-publish the release with a valid tag instead of '{tag}'"),
                "Tags must start with a letter or digit and contain only [A-Za-z0-9._+-]"
                    .to_string(),
            ],
            ReleaseError::Event(EventError::InvalidPayload { .. }) => vec![
                "Check GITHUB_EVENT_PATH points to the release event payload".to_string(),
                "Pass --tag <version> --published to run without a payload".to_string(),
            ],
            ReleaseError::Config(ConfigError::MissingServer {
                settings_file,
                repository_id,
            }) => vec![
                format!(
                    "Add <server><id>{repository_id}</id>...</server> to {}",
                    settings_file.display()
                ),
                "Or delete the file to release with generated settings".to_string(),
                "Or set repository_id to the server id the file declares".to_string(),
            ],
            ReleaseError::Sandbox(SandboxError::EgressDenied { host }) => vec![
                format!("Add '{host}' to sandbox.allowed_endpoints"),
                "Switch sandbox.egress to \"audit\" to log instead of block".to_string(),
            ],
            ReleaseError::Tool(ToolError::NotFound { tool }) => vec![
                format!("Install '{tool}' and make sure it is on PATH"),
                "Add the tool's directory to sandbox.passthrough_env PATH".to_string(),
            ],
            ReleaseError::Credential(CredentialError::Missing { names }) => vec![
                format!("Define these secrets for the workflow: {}", names.join(", ")),
                "Secret names can be remapped in the [secrets] config section".to_string(),
            ],
            ReleaseError::Credential(CredentialError::SigningKeyNotImported) => vec![
                "Export the signing key with: gpg --armor --export-secret-keys <id>".to_string(),
                "Store the armored key in the signing key secret".to_string(),
            ],
            ReleaseError::Credential(CredentialError::Rejected { .. }) => vec![
                "Regenerate the repository token and update the secret".to_string(),
                "Verify the signing passphrase matches the imported key".to_string(),
            ],
            ReleaseError::Build(BuildError::PackagingFailed { .. }) => vec![
                "Reproduce locally with: mvn -B package".to_string(),
                "Fix the build on the release branch and publish a new release".to_string(),
            ],
            ReleaseError::StaleState(_) => vec![
                "Remove release.properties and *.releaseBackup from the branch".to_string(),
                "Run: mvn release:clean".to_string(),
            ],
            ReleaseError::Publish(PublishError::ReleaseFailed { version, .. }) => vec![
                format!("Check whether tag '{version}' was pushed and delete it before retrying"),
                "Drop any partially staged repository in the OSSRH UI".to_string(),
                "Re-publish the release to trigger a new run".to_string(),
            ],
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }
}
