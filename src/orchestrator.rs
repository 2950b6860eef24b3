//! Release orchestration.
//!
//! [`ReleaseOrchestrator`] runs the release steps in a fixed order, each
//! gated on the success of the one before. The first failure ends the run;
//! nothing is retried. Publishing only happens for a
//! [`ReleaseEvent::Published`] event.

use crate::config::OrchestratorConfig;
use crate::credentials::{Credentials, Redactor};
use crate::error::{ReleaseError, Result};
use crate::event::{PublishedRelease, ReleaseEvent};
use crate::report::RunReport;
use crate::sandbox::Sandbox;
use crate::tools::{
    Authenticator, Builder, GitCli, Maven, PublishOutcome, ReleaseRequest, Releaser, Session,
    SigningKeyInfo, SourceControl, SshSession, SystemAuthenticator, git_ssh_command,
    write_known_hosts,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// One step of a release run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Create the sandbox and vet outbound endpoints
    AcquireSandbox,
    /// Clone the source tree
    Checkout,
    /// Import the signing key and register the SSH identity
    Authenticate,
    /// Package the project
    Package,
    /// Configure the commit identity
    ConfigureIdentity,
    /// Discard stale release metadata
    CleanRelease,
    /// Tag, sign and publish
    PrepareAndPerform,
}

impl Step {
    /// Every step in execution order
    pub const ALL: [Step; 7] = [
        Step::AcquireSandbox,
        Step::Checkout,
        Step::Authenticate,
        Step::Package,
        Step::ConfigureIdentity,
        Step::CleanRelease,
        Step::PrepareAndPerform,
    ];

    /// 1-based position
    pub fn number(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0) + 1
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::AcquireSandbox => "acquire sandbox",
            Step::Checkout => "checkout",
            Step::Authenticate => "authenticate",
            Step::Package => "package",
            Step::ConfigureIdentity => "configure identity",
            Step::CleanRelease => "clean release",
            Step::PrepareAndPerform => "prepare and perform",
        };
        f.write_str(name)
    }
}

/// The four capabilities a run drives
#[derive(Debug, Clone)]
pub struct Capabilities<S, A, B, R> {
    /// Version control
    pub source: S,
    /// Signing key and SSH identity
    pub auth: A,
    /// Packaging
    pub builder: B,
    /// Release management
    pub releaser: R,
}

/// Capabilities backed by the system's git, gpg, ssh-agent and Maven
pub type SystemCapabilities = Capabilities<GitCli, SystemAuthenticator, Maven, Maven>;

impl SystemCapabilities {
    /// Process-backed capabilities configured from `config`
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let maven = Maven::new(&config.maven, config.maven_args.clone());
        Self {
            source: GitCli::default(),
            auth: SystemAuthenticator::default(),
            builder: maven.clone(),
            releaser: maven,
        }
    }
}

/// Outcome of a run: the report, plus the error that stopped it
#[derive(Debug)]
pub struct RunOutcome {
    /// Sealed report
    pub report: RunReport,
    /// Error of the failed step
    pub error: Option<ReleaseError>,
}

impl RunOutcome {
    /// Whether the run succeeded
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() { 0 } else { 1 }
    }
}

/// Transient credentials installed for the run
struct AuthState {
    gnupg_home: PathBuf,
    signing_key: Option<SigningKeyInfo>,
    ssh: Option<SshSession>,
    git_ssh_command: Option<String>,
    warnings: Vec<String>,
}

impl AuthState {
    fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![(
            "GNUPGHOME".to_string(),
            self.gnupg_home.display().to_string(),
        )];
        if let Some(ssh) = &self.ssh {
            env.extend(ssh.env());
        }
        if let Some(command) = &self.git_ssh_command {
            env.push(("GIT_SSH_COMMAND".to_string(), command.clone()));
        }
        env
    }
}

/// Fail-fast release step sequencer
#[derive(Debug)]
pub struct ReleaseOrchestrator<S, A, B, R> {
    config: OrchestratorConfig,
    credentials: Credentials,
    caps: Capabilities<S, A, B, R>,
}

impl ReleaseOrchestrator<GitCli, SystemAuthenticator, Maven, Maven> {
    /// Orchestrator driving the real tools
    pub fn system(config: OrchestratorConfig, credentials: Credentials) -> Self {
        let caps = SystemCapabilities::from_config(&config);
        Self::new(config, credentials, caps)
    }
}

impl<S, A, B, R> ReleaseOrchestrator<S, A, B, R>
where
    S: SourceControl,
    A: Authenticator,
    B: Builder,
    R: Releaser,
{
    /// Orchestrator with explicit capabilities
    pub fn new(
        config: OrchestratorConfig,
        credentials: Credentials,
        caps: Capabilities<S, A, B, R>,
    ) -> Self {
        Self {
            config,
            credentials,
            caps,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Capabilities in use
    pub fn capabilities(&self) -> &Capabilities<S, A, B, R> {
        &self.caps
    }

    /// Run every step for `event` and seal the report
    pub async fn run(&self, event: &ReleaseEvent) -> RunOutcome {
        let mut report = RunReport::new(event);
        log::info!("Release run {} for {event}", report.run_id);

        let result = self.execute(event, &mut report).await;

        let redactor = self.credentials.redactor();
        report.finish(&result, &redactor);
        match &result {
            Ok(()) => log::info!("Release run {} succeeded", report.run_id),
            Err(e) => log::error!(
                "Release run {} failed: {}",
                report.run_id,
                redactor.redact(&e.to_string())
            ),
        }
        RunOutcome {
            report,
            error: result.err(),
        }
    }

    async fn execute(&self, event: &ReleaseEvent, report: &mut RunReport) -> Result<()> {
        let redactor = self.credentials.redactor();
        let timeout = self.config.command_timeout_secs.map(Duration::from_secs);

        // 1. Sandbox
        let (sandbox, endpoints) = run_step(report, &redactor, Step::AcquireSandbox, async {
            let sandbox = Sandbox::acquire(&self.config.sandbox)?;
            let mut endpoints = Vec::new();
            for endpoint in [&self.config.source, &self.config.repository_url] {
                if let Some(host) = sandbox.admit_endpoint(endpoint)? {
                    if !endpoints.contains(&host) {
                        endpoints.push(host);
                    }
                }
            }
            Ok::<_, ReleaseError>((sandbox, endpoints))
        })
        .await?;
        report.endpoints = endpoints;
        let base = Session::new(
            sandbox.root(),
            sandbox.base_env().clone(),
            redactor.clone(),
            timeout,
        );

        // 2. Checkout
        let checkout = run_step(
            report,
            &redactor,
            Step::Checkout,
            self.caps.source.checkout(
                &base,
                &self.config.source,
                &self.config.reference,
                &sandbox.source_dir(),
            ),
        )
        .await?;
        report.checkout_commit = Some(checkout.head.clone());
        let session = base.with_workdir(&checkout.path);
        if let Some(release) = event.published() {
            self.flag_tag_drift(&session, release, &checkout.head, report)
                .await;
        }

        // 3. Transient credentials
        let mut auth = run_step(
            report,
            &redactor,
            Step::Authenticate,
            self.authenticate(&session, &sandbox),
        )
        .await?;
        for warning in auth.warnings.drain(..) {
            report.warn(warning);
        }
        let session = session.with_env(auth.env());

        // 4. Package
        let artifacts = run_step(
            report,
            &redactor,
            Step::Package,
            self.caps.builder.package(&session, &self.config.descriptor),
        )
        .await?;
        report.artifacts = artifacts;

        // 5. Commit identity
        run_step(
            report,
            &redactor,
            Step::ConfigureIdentity,
            self.caps
                .source
                .configure_identity(&session, &self.config.identity),
        )
        .await?;

        // 6. Stale release metadata
        run_step(
            report,
            &redactor,
            Step::CleanRelease,
            self.caps.releaser.clean(&session, &self.config.descriptor),
        )
        .await?;

        // 7. Publish, for published releases only
        let release = match event {
            ReleaseEvent::Published(release) => release,
            ReleaseEvent::Draft { reason, .. } => {
                report.skip(Step::PrepareAndPerform, reason.clone());
                return Ok(());
            }
        };
        let outcome = run_step(
            report,
            &redactor,
            Step::PrepareAndPerform,
            self.publish(&session, release, &auth, sandbox.root()),
        )
        .await?;
        report.release_version = Some(outcome.release_version);
        Ok(())
    }

    /// Warn when the checked-out reference is not the commit the release tag points to
    async fn flag_tag_drift(
        &self,
        session: &Session,
        release: &PublishedRelease,
        head: &str,
        report: &mut RunReport,
    ) {
        if release.semver().is_none() {
            report.warn(format!(
                "Tag '{release}' is not a semantic version; it is used verbatim as the release version"
            ));
        }
        match self.caps.source.tag_commit(session, release.tag_name()).await {
            Ok(Some(tagged)) if tagged != head => report.warn(format!(
                "'{}' is at {head} but tag '{release}' points to {tagged}; the release is built from '{}', not from the tagged commit",
                self.config.reference, self.config.reference
            )),
            Ok(Some(_)) => {}
            Ok(None) => log::debug!("Tag '{release}' is not present in the checkout yet"),
            Err(e) => log::warn!(
                "Could not resolve tag '{release}': {}",
                self.credentials.redactor().redact(&e.to_string())
            ),
        }
    }

    async fn authenticate(&self, session: &Session, sandbox: &Sandbox) -> Result<AuthState> {
        let names = self.credentials.names();
        let mut warnings = Vec::new();

        let signing_key = match self.credentials.signing_key() {
            Some(key) => Some(
                self.caps
                    .auth
                    .import_signing_key(session, sandbox.gnupg_home(), key)
                    .await?,
            ),
            None => {
                warnings.push(format!(
                    "{} is not set; no signing key was imported",
                    names.signing_key
                ));
                None
            }
        };

        let ssh = match self.credentials.ssh_private_key() {
            Some(key) => Some(self.caps.auth.register_ssh_identity(session, key).await?),
            None => {
                warnings.push(format!(
                    "{} is not set; no SSH identity was registered",
                    names.ssh_private_key
                ));
                None
            }
        };

        let ssh_command = match &ssh {
            Some(_) => {
                let known_hosts = write_known_hosts(&self.config.ssh, sandbox.root())?;
                Some(git_ssh_command(&self.config.ssh, &known_hosts))
            }
            None => None,
        };

        Ok(AuthState {
            gnupg_home: sandbox.gnupg_home().to_path_buf(),
            signing_key,
            ssh,
            git_ssh_command: ssh_command,
            warnings,
        })
    }

    async fn publish(
        &self,
        session: &Session,
        release: &PublishedRelease,
        auth: &AuthState,
        scratch_dir: &Path,
    ) -> Result<PublishOutcome> {
        let secrets = self.credentials.publish_secrets(
            auth.signing_key.is_some(),
            self.config.require_ssh_identity,
            auth.ssh.is_some(),
        )?;
        let request = ReleaseRequest {
            release,
            descriptor: &self.config.descriptor,
            profile: &self.config.profile,
            settings_file: &self.config.settings_file,
            repository_id: &self.config.repository_id,
            scratch_dir,
            secrets,
            publish_env: &self.config.publish_env,
        };
        self.caps.releaser.prepare_and_perform(session, &request).await
    }
}

async fn run_step<T, F>(
    report: &mut RunReport,
    redactor: &Redactor,
    step: Step,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    log::info!("[{}/{}] {step}", step.number(), Step::ALL.len());
    let started_at = chrono::Utc::now();
    let timer = Instant::now();
    let result = fut.await;
    report.record(step, started_at, timer.elapsed(), &result);
    if let Err(e) = &result {
        log::error!("Step '{step}' failed");
        log::debug!("{}", redactor.redact(&format!("{e:?}")));
    }
    result
}

/// A step and the commands it will run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// Which step
    pub step: Step,
    /// Command lines, secrets referenced by name only
    pub commands: Vec<String>,
    /// Notes about conditions and credentials
    pub note: Option<String>,
}

/// Describe what a run would do for `event`, without executing anything
pub fn plan(config: &OrchestratorConfig, event: &ReleaseEvent) -> Vec<PlannedStep> {
    let maven = Maven::new(&config.maven, config.maven_args.clone());
    let mvn = |args: Vec<String>| format!("{} {}", maven.program(), args.join(" "));
    let secrets = &config.secrets;

    Step::ALL
        .into_iter()
        .map(|step| {
            let (commands, note) = match step {
                Step::AcquireSandbox => (
                    Vec::new(),
                    Some(format!(
                        "egress {:?} for {} and {}",
                        config.sandbox.egress, config.source, config.repository_url
                    )),
                ),
                Step::Checkout => (
                    vec![format!(
                        "git {}",
                        GitCli::clone_args(
                            &config.source,
                            &config.reference,
                            &PathBuf::from("<sandbox>/source")
                        )
                        .join(" ")
                    )],
                    None,
                ),
                Step::Authenticate => (
                    vec![
                        format!("gpg --batch --yes --import < ${}", secrets.signing_key),
                        "ssh-agent -s".to_string(),
                        format!("ssh-add - < ${}", secrets.ssh_private_key),
                    ],
                    Some("missing secrets are reported, not fatal, at this step".to_string()),
                ),
                Step::Package => (vec![mvn(maven.package_args(&config.descriptor))], None),
                Step::ConfigureIdentity => (
                    vec![
                        format!("git config --local user.name \"{}\"", config.identity.name),
                        format!("git config --local user.email \"{}\"", config.identity.email),
                    ],
                    None,
                ),
                Step::CleanRelease => (vec![mvn(maven.clean_args(&config.descriptor))], None),
                Step::PrepareAndPerform => match event {
                    ReleaseEvent::Published(release) => (
                        vec![mvn(maven.release_args(
                            &config.descriptor,
                            release.tag_name(),
                            &config.profile,
                            &config.settings_file,
                        ))],
                        Some(format!(
                            "requires {}, {}, {}, {}; settings must declare server '{}' or are generated",
                            secrets.repository_username,
                            secrets.repository_token,
                            secrets.signing_key,
                            secrets.signing_passphrase,
                            config.repository_id
                        )),
                    ),
                    ReleaseEvent::Draft { reason, .. } => {
                        (Vec::new(), Some(format!("skipped: {reason}")))
                    }
                },
            };
            PlannedStep {
                step,
                commands,
                note,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            source: "https://github.com/acme/parent-pom.git".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn steps_are_numbered_in_order() {
        assert_eq!(Step::AcquireSandbox.number(), 1);
        assert_eq!(Step::PrepareAndPerform.number(), 7);
        assert!(Step::Package < Step::CleanRelease);
    }

    #[test]
    fn plan_for_published_release_includes_release_version() {
        let event = ReleaseEvent::from_flags(Some("6.2.0".to_string()), true).unwrap();
        let plan = plan(&config(), &event);
        assert_eq!(plan.len(), 7);
        let publish = &plan[6];
        assert_eq!(publish.step, Step::PrepareAndPerform);
        assert!(publish.commands[0].contains("-DreleaseVersion=6.2.0"));
        assert!(publish.commands[0].contains("-P release"));
        assert!(publish.commands[0].contains("-s settings.xml"));
    }

    #[test]
    fn plan_for_draft_skips_publish() {
        let event = ReleaseEvent::from_flags(Some("6.2.0".to_string()), false).unwrap();
        let plan = plan(&config(), &event);
        assert!(plan[6].commands.is_empty());
        assert!(plan[6].note.as_deref().unwrap_or("").starts_with("skipped"));
    }

    #[test]
    fn exit_code_reflects_outcome() {
        let event = ReleaseEvent::from_flags(None, false).unwrap();
        let outcome = RunOutcome {
            report: RunReport::new(&event),
            error: None,
        };
        assert_eq!(outcome.exit_code(), 0);
    }
}
