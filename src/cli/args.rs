//! Command line argument parsing and validation.
//!
//! Every flag also reads the variable GitHub Actions sets for it, so inside a
//! workflow `maven_release run` needs no arguments at all.

use crate::config::{EgressMode, OrchestratorConfig, github_source};
use crate::error::Result;
use crate::event::ReleaseEvent;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Release orchestration for Maven projects
#[derive(Parser, Debug)]
#[command(
    name = "maven_release",
    version,
    about = "Fail-fast release orchestration for Maven projects",
    long_about = "Package, clean, tag, sign and publish a Maven project when a release is published.

Usage:
  maven_release run                               # inside a GitHub Actions release workflow
  maven_release run --source <repo> --tag 6.2.0 --published
  maven_release plan --source <repo> --tag 6.2.0 --published"
)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// TOML config file
    #[arg(long, global = true, env = "MAVEN_RELEASE_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print errors
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the release steps for an event
    Run(RunArgs),
    /// Print the steps a run would execute without executing anything
    Plan(RunArgs),
}

impl Command {
    /// Subcommand name for messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::Run(_) => "run",
            Command::Plan(_) => "plan",
        }
    }

    /// Arguments shared by every subcommand
    pub fn run_args(&self) -> &RunArgs {
        match self {
            Command::Run(args) | Command::Plan(args) => args,
        }
    }
}

/// Egress policy as a CLI value
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EgressArg {
    /// Log outbound endpoints
    Audit,
    /// Refuse endpoints outside the allowlist
    Block,
}

impl From<EgressArg> for EgressMode {
    fn from(arg: EgressArg) -> Self {
        match arg {
            EgressArg::Audit => EgressMode::Audit,
            EgressArg::Block => EgressMode::Block,
        }
    }
}

/// Event and configuration overrides
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Name of the triggering event
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    pub event_name: Option<String>,

    /// JSON payload of the triggering event
    #[arg(long, env = "GITHUB_EVENT_PATH", value_name = "PATH")]
    pub event_path: Option<PathBuf>,

    /// Release tag; takes precedence over the event payload
    #[arg(long)]
    pub tag: Option<String>,

    /// Treat --tag as a published release
    #[arg(long, requires = "tag")]
    pub published: bool,

    /// Repository to release: remote URL or local path
    #[arg(long, env = "MAVEN_RELEASE_SOURCE")]
    pub source: Option<String>,

    /// owner/repo slug used when no source is configured
    #[arg(long, env = "GITHUB_REPOSITORY", hide = true)]
    pub github_repository: Option<String>,

    /// Server hosting the repository slug
    #[arg(long, env = "GITHUB_SERVER_URL", hide = true)]
    pub github_server_url: Option<String>,

    /// Reference to check out
    #[arg(long = "ref", value_name = "REF")]
    pub reference: Option<String>,

    /// Build descriptor, relative to the checkout
    #[arg(long, value_name = "PATH")]
    pub descriptor: Option<PathBuf>,

    /// Settings file for repository authentication, relative to the checkout
    #[arg(long, value_name = "PATH")]
    pub settings_file: Option<PathBuf>,

    /// Profile activated for the release step
    #[arg(long)]
    pub profile: Option<String>,

    /// Build tool executable
    #[arg(long, value_name = "PROGRAM")]
    pub maven: Option<String>,

    /// Egress policy
    #[arg(long, value_enum)]
    pub egress: Option<EgressArg>,

    /// Keep the sandbox checkout after the run; key material is still removed
    #[arg(long)]
    pub keep_sandbox: bool,

    /// Publish without a registered SSH identity
    #[arg(long)]
    pub no_ssh_identity: bool,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Write the JSON run report here
    #[arg(long, env = "MAVEN_RELEASE_REPORT", value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Append a markdown summary here
    #[arg(long, env = "GITHUB_STEP_SUMMARY", hide = true, value_name = "PATH")]
    pub step_summary: Option<PathBuf>,

    /// Set by GitHub Actions
    #[arg(long, env = "GITHUB_ACTIONS", hide = true)]
    pub github_actions: Option<String>,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        let run = self.command.run_args();
        if run.tag.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err("--tag must not be empty".to_string());
        }
        if run.timeout == Some(0) {
            return Err("--timeout must be positive".to_string());
        }
        Ok(())
    }
}

impl RunArgs {
    /// Layer these overrides on top of `config`
    pub fn apply_to(&self, config: &mut OrchestratorConfig) {
        if let Some(source) = &self.source {
            config.source = source.clone();
        } else if config.source.is_empty()
            && let Some(repository) = &self.github_repository
        {
            config.source = github_source(self.github_server_url.as_deref(), repository);
        }
        if let Some(reference) = &self.reference {
            config.reference = reference.clone();
        }
        if let Some(descriptor) = &self.descriptor {
            config.descriptor = descriptor.clone();
        }
        if let Some(settings_file) = &self.settings_file {
            config.settings_file = settings_file.clone();
        }
        if let Some(profile) = &self.profile {
            config.profile = profile.clone();
        }
        if let Some(maven) = &self.maven {
            config.maven = maven.clone();
        }
        if let Some(egress) = self.egress {
            config.sandbox.egress = egress.into();
        }
        if self.keep_sandbox {
            config.sandbox.keep = true;
        }
        if self.no_ssh_identity {
            config.require_ssh_identity = false;
        }
        if self.timeout.is_some() {
            config.command_timeout_secs = self.timeout;
        }
        if self.report.is_some() {
            config.report = self.report.clone();
        }
    }

    /// The triggering event: explicit flags first, then the payload file
    pub fn event(&self) -> Result<ReleaseEvent> {
        if self.tag.is_some() || self.published {
            return ReleaseEvent::from_flags(self.tag.clone(), self.published);
        }
        match &self.event_path {
            Some(path) => {
                let name = self.event_name.as_deref().unwrap_or("release");
                ReleaseEvent::from_github_event_file(name, path)
            }
            None => Ok(ReleaseEvent::Draft {
                tag_name: None,
                reason: "no release event was supplied".to_string(),
            }),
        }
    }

    /// Whether we are running inside GitHub Actions
    pub fn in_github_actions(&self) -> bool {
        self.github_actions.as_deref() == Some("true")
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Output manager for colored terminal output
    output: super::OutputManager,
}

impl RuntimeConfig {
    /// Create runtime configuration
    pub fn new(quiet: bool) -> Self {
        Self {
            output: super::OutputManager::new(quiet),
        }
    }

    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    /// Print message
    pub fn println(&self, message: &str) {
        let _ = self.output.println(message);
    }

    /// Print section header
    pub fn section(&self, title: &str) {
        let _ = self.output.section(title);
    }

    /// Print error message (always shown)
    pub fn error_println(&self, message: &str) {
        self.output.error(message);
    }

    /// Print warning message
    pub fn warning_println(&self, message: &str) {
        let _ = self.output.warn(message);
    }

    /// Print success message
    pub fn success_println(&self, message: &str) {
        let _ = self.output.success(message);
    }

    /// Print indented text
    pub fn indent(&self, message: &str) {
        let _ = self.output.indent(message);
    }
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self::new(args.quiet)
    }
}
