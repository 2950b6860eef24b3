//! Packaging and release management through `mvn`.

use super::{BuildArtifact, Builder, PublishOutcome, ReleaseRequest, Releaser, Session};
use crate::config::PublishEnvNames;
use crate::error::{
    BuildError, ConfigError, CredentialError, PublishError, ReleaseError, Result,
    StaleStateError,
};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Signals in build output that the repository or the signer refused our credentials
static CREDENTIAL_REJECTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(status code:?\s*40[13]\b|\b40[13] (unauthorized|forbidden)\b|not authorized|bad passphrase|signing failed|no secret key|no default secret key)",
    )
    .expect("credential regex is valid")
});

static SERVER_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<server>(.*?)</server>").expect("server regex is valid")
});

static SERVER_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<id>\s*([^<\s]+)\s*</id>").expect("server id regex is valid")
});

/// Name of the settings file written into the scratch directory
const GENERATED_SETTINGS: &str = "settings.xml";

/// Files `release:prepare` leaves behind until `release:clean` runs
const RELEASE_METADATA_PATTERNS: &[&str] = &["release.properties", "*.releaseBackup"];

/// Packaged files recorded as artifacts
const ARTIFACT_PATTERNS: &[&str] = &["target/*.jar", "target/*.pom", "target/*.asc"];

/// `mvn` client
#[derive(Debug, Clone)]
pub struct Maven {
    program: String,
    base_args: Vec<String>,
}

impl Default for Maven {
    fn default() -> Self {
        Self::new("mvn", vec!["-B".to_string()])
    }
}

impl Maven {
    /// Client for `program`, prefixing every invocation with `base_args`
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// Executable
    pub fn program(&self) -> &str {
        &self.program
    }

    fn with_descriptor(&self, descriptor: &Path) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push("-f".to_string());
        args.push(descriptor.display().to_string());
        args
    }

    /// Arguments for the packaging step
    pub fn package_args(&self, descriptor: &Path) -> Vec<String> {
        let mut args = self.with_descriptor(descriptor);
        args.push("package".to_string());
        args
    }

    /// Arguments for discarding stale release metadata
    pub fn clean_args(&self, descriptor: &Path) -> Vec<String> {
        let mut args = self.with_descriptor(descriptor);
        args.push("release:clean".to_string());
        args
    }

    /// Arguments for the combined prepare + perform step
    pub fn release_args(
        &self,
        descriptor: &Path,
        release_version: &str,
        profile: &str,
        settings_file: &Path,
    ) -> Vec<String> {
        let mut args = self.with_descriptor(descriptor);
        args.extend([
            "release:prepare".to_string(),
            "release:perform".to_string(),
            format!("-DreleaseVersion={release_version}"),
            "-P".to_string(),
            profile.to_string(),
            "-s".to_string(),
            settings_file.display().to_string(),
        ]);
        args
    }
}

/// Server ids declared in a settings document
fn declared_servers(settings: &str) -> Vec<&str> {
    SERVER_BLOCK_RE
        .captures_iter(settings)
        .filter_map(|block| {
            let body = block.get(1)?.as_str();
            SERVER_ID_RE
                .captures(body)
                .and_then(|id| id.get(1))
                .map(|id| id.as_str())
        })
        .collect()
}

/// Settings declaring `repository_id` and the signing passphrase, with every
/// credential read from the environment at build time
pub fn generated_settings(repository_id: &str, env: &PublishEnvNames) -> String {
    format!(
        r#"<settings xmlns="http://maven.apache.org/SETTINGS/1.0.0"
          xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
          xsi:schemaLocation="http://maven.apache.org/SETTINGS/1.0.0 https://maven.apache.org/xsd/settings-1.0.0.xsd">
  <servers>
    <server>
      <id>{repository_id}</id>
      <username>${{env.{username}}}</username>
      <password>${{env.{token}}}</password>
    </server>
    <server>
      <id>gpg.passphrase</id>
      <passphrase>${{env.{passphrase}}}</passphrase>
    </server>
  </servers>
</settings>
"#,
        username = env.username,
        token = env.token,
        passphrase = env.passphrase,
    )
}

/// Settings file to hand to the release step.
///
/// A settings file in the checkout is used as is once it declares a server
/// with `repository_id`. Without one, settings are generated into the scratch
/// directory and that absolute path is returned.
pub fn resolve_settings(workdir: &Path, request: &ReleaseRequest<'_>) -> Result<PathBuf> {
    let in_checkout = workdir.join(request.settings_file);
    if in_checkout.is_file() {
        let settings = std::fs::read_to_string(&in_checkout)?;
        if !declared_servers(&settings).contains(&request.repository_id) {
            return Err(ConfigError::MissingServer {
                settings_file: request.settings_file.to_path_buf(),
                repository_id: request.repository_id.to_string(),
            }
            .into());
        }
        log::debug!(
            "{} declares server '{}'",
            request.settings_file.display(),
            request.repository_id
        );
        return Ok(request.settings_file.to_path_buf());
    }

    let generated = request.scratch_dir.join(GENERATED_SETTINGS);
    std::fs::write(
        &generated,
        generated_settings(request.repository_id, request.publish_env),
    )?;
    log::info!(
        "{} not found in the checkout; generated settings for server '{}'",
        request.settings_file.display(),
        request.repository_id
    );
    Ok(generated)
}

/// Directory the descriptor lives in, inside the checkout
fn project_dir(session: &Session, descriptor: &Path) -> PathBuf {
    let path = session.workdir().join(descriptor);
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| session.workdir().to_path_buf())
}

fn matching_files(dir: &Path, patterns: &[&str]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = patterns
        .iter()
        .filter_map(|pattern| {
            let full = dir.join(pattern);
            glob::glob(&full.to_string_lossy()).ok()
        })
        .flat_map(|paths| paths.filter_map(|p| p.ok()))
        .filter(|p| p.is_file())
        .collect();
    found.sort();
    found
}

/// Release metadata files present in `project_dir`
pub fn leftover_release_metadata(project_dir: &Path) -> Vec<PathBuf> {
    matching_files(project_dir, RELEASE_METADATA_PATTERNS)
}

fn discover_artifacts(project_dir: &Path) -> Vec<BuildArtifact> {
    matching_files(project_dir, ARTIFACT_PATTERNS)
        .into_iter()
        .map(|path| BuildArtifact {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
            path,
        })
        .collect()
}

fn failure_reason(err: &ReleaseError) -> String {
    err.to_string()
}

impl Builder for Maven {
    async fn package(&self, session: &Session, descriptor: &Path) -> Result<Vec<BuildArtifact>> {
        session
            .command(&self.program)
            .args(self.package_args(descriptor))
            .run(session.redactor())
            .await
            .map_err(|e| BuildError::PackagingFailed {
                descriptor: descriptor.to_path_buf(),
                reason: failure_reason(&e),
            })?;

        let artifacts = discover_artifacts(&project_dir(session, descriptor));
        if artifacts.is_empty() {
            log::info!("Packaging produced no jar artifacts (pom packaging)");
        }
        for artifact in &artifacts {
            log::info!("Artifact: {} ({} bytes)", artifact.name, artifact.size);
        }
        Ok(artifacts)
    }
}

impl Releaser for Maven {
    async fn clean(&self, session: &Session, descriptor: &Path) -> Result<()> {
        let dir = project_dir(session, descriptor);
        let stale = leftover_release_metadata(&dir);
        if !stale.is_empty() {
            log::warn!(
                "Found release metadata from an earlier attempt: {}",
                stale
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        session
            .command(&self.program)
            .args(self.clean_args(descriptor))
            .run(session.redactor())
            .await
            .map_err(|e| StaleStateError::CleanFailed {
                reason: failure_reason(&e),
            })?;

        let remaining = leftover_release_metadata(&dir);
        if !remaining.is_empty() {
            return Err(StaleStateError::MetadataRemains { paths: remaining }.into());
        }
        Ok(())
    }

    async fn prepare_and_perform(
        &self,
        session: &Session,
        request: &ReleaseRequest<'_>,
    ) -> Result<PublishOutcome> {
        let version = request.release.tag_name();
        let env = request.publish_env;
        let settings = resolve_settings(session.workdir(), request)?;
        let output = session
            .command(&self.program)
            .args(self.release_args(request.descriptor, version, request.profile, &settings))
            .env(&env.username, request.secrets.username.expose())
            .env(&env.token, request.secrets.token.expose())
            .env(&env.passphrase, request.secrets.passphrase.expose())
            .output(session.redactor())
            .await?;

        if !output.success() {
            let combined = format!("{}\n{}", output.stdout, output.stderr);
            if CREDENTIAL_REJECTED_RE.is_match(&combined) {
                return Err(CredentialError::Rejected {
                    operation: "release:perform".to_string(),
                    reason: output.stderr_tail(),
                }
                .into());
            }
            return Err(PublishError::ReleaseFailed {
                version: version.to_string(),
                reason: output.stderr_tail(),
            }
            .into());
        }

        log::info!("Released {version}");
        Ok(PublishOutcome {
            release_version: version.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maven() -> Maven {
        Maven::new("mvn", vec!["-B".to_string(), "--no-transfer-progress".to_string()])
    }

    #[test]
    fn release_args_carry_version_profile_and_settings() {
        let args = maven().release_args(
            Path::new("pom.xml"),
            "6.2.0",
            "release",
            Path::new("settings.xml"),
        );
        assert_eq!(
            args,
            [
                "-B",
                "--no-transfer-progress",
                "-f",
                "pom.xml",
                "release:prepare",
                "release:perform",
                "-DreleaseVersion=6.2.0",
                "-P",
                "release",
                "-s",
                "settings.xml",
            ]
        );
    }

    #[test]
    fn package_and_clean_args() {
        let m = maven();
        assert_eq!(m.package_args(Path::new("pom.xml")).last().map(String::as_str), Some("package"));
        assert_eq!(
            m.clean_args(Path::new("pom.xml")).last().map(String::as_str),
            Some("release:clean")
        );
    }

    #[test]
    fn leftover_metadata_detection_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(leftover_release_metadata(dir.path()).is_empty());

        std::fs::write(dir.path().join("release.properties"), "completedPhase=scm-tag").unwrap();
        std::fs::write(dir.path().join("pom.xml.releaseBackup"), "<project/>").unwrap();
        std::fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        let found = leftover_release_metadata(dir.path());
        assert_eq!(found.len(), 2);

        for path in found {
            std::fs::remove_file(path).unwrap();
        }
        assert!(leftover_release_metadata(dir.path()).is_empty());
    }

    #[test]
    fn artifacts_are_discovered_under_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("parent-6.2.0.pom"), "<project/>").unwrap();
        std::fs::write(target.join("lib-6.2.0.jar"), [0u8; 16]).unwrap();
        std::fs::write(target.join("build.log"), "ignored").unwrap();

        let artifacts = discover_artifacts(dir.path());
        let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["lib-6.2.0.jar", "parent-6.2.0.pom"]);
        assert_eq!(artifacts[0].size, 16);
    }

    #[cfg(unix)]
    mod with_stub_mvn {
        use super::*;
        use crate::config::PublishEnvNames;
        use crate::credentials::{PublishSecrets, Redactor, Secret};
        use crate::event::PublishedRelease;
        use std::collections::BTreeMap;

        /// Executable shell script standing in for `mvn`
        fn stub_mvn(dir: &Path, body: &str) -> Maven {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.join("mvn-stub");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            Maven::new(path.display().to_string(), vec!["-B".to_string()])
        }

        fn checkout(dir: &Path) -> (PathBuf, Session) {
            let source = dir.join("source");
            std::fs::create_dir(&source).unwrap();
            std::fs::write(source.join("pom.xml"), "<project/>").unwrap();
            std::fs::write(
                source.join("settings.xml"),
                "<settings><servers><server><id>ossrh</id></server></servers></settings>",
            )
            .unwrap();
            let env = std::env::var("PATH")
                .map(|p| BTreeMap::from([("PATH".to_string(), p)]))
                .unwrap_or_default();
            let redactor = Redactor::new(vec!["tok-5e4d3c2b".to_string()]);
            let session = Session::new(&source, env, redactor, None);
            (source, session)
        }

        #[tokio::test]
        async fn clean_removes_stale_metadata_and_is_idempotent() {
            let dir = tempfile::tempdir().unwrap();
            let (source, session) = checkout(dir.path());
            std::fs::write(source.join("release.properties"), "completedPhase=scm-tag").unwrap();
            std::fs::write(source.join("pom.xml.releaseBackup"), "<project/>").unwrap();

            let mvn = stub_mvn(dir.path(), "rm -f release.properties *.releaseBackup");
            mvn.clean(&session, Path::new("pom.xml")).await.unwrap();
            assert!(leftover_release_metadata(&source).is_empty());

            // Nothing left to clean
            mvn.clean(&session, Path::new("pom.xml")).await.unwrap();
        }

        #[tokio::test]
        async fn metadata_surviving_clean_is_stale_state() {
            let dir = tempfile::tempdir().unwrap();
            let (source, session) = checkout(dir.path());
            std::fs::write(source.join("release.properties"), "completedPhase=scm-tag").unwrap();

            let err = stub_mvn(dir.path(), "exit 0")
                .clean(&session, Path::new("pom.xml"))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                ReleaseError::StaleState(StaleStateError::MetadataRemains { .. })
            ));
        }

        async fn release_with(body: &str) -> Result<PublishOutcome> {
            let dir = tempfile::tempdir().unwrap();
            let (_source, session) = checkout(dir.path());
            let release = PublishedRelease::new("6.2.0").unwrap();
            let (username, token, passphrase) = (
                Secret::new("release-bot"),
                Secret::new("tok-5e4d3c2b"),
                Secret::new("correct-horse"),
            );
            let publish_env = PublishEnvNames::default();
            let request = ReleaseRequest {
                release: &release,
                descriptor: Path::new("pom.xml"),
                profile: "release",
                settings_file: Path::new("settings.xml"),
                repository_id: "ossrh",
                scratch_dir: dir.path(),
                secrets: PublishSecrets {
                    username: &username,
                    token: &token,
                    passphrase: &passphrase,
                },
                publish_env: &publish_env,
            };
            stub_mvn(dir.path(), body)
                .prepare_and_perform(&session, &request)
                .await
        }

        #[tokio::test]
        async fn release_passes_version_and_secrets_through_the_environment() {
            let outcome = release_with(
                r#"case "$*" in *"-DreleaseVersion=6.2.0 -P release -s settings.xml"*) ;; *) exit 7 ;; esac
[ "$MAVEN_CENTRAL_TOKEN" = "tok-5e4d3c2b" ] || exit 8
[ "$MAVEN_USERNAME" = "release-bot" ] || exit 9"#,
            )
            .await
            .unwrap();
            assert_eq!(outcome.release_version, "6.2.0");
        }

        #[tokio::test]
        async fn unauthorized_deploy_is_a_credential_error() {
            let err = release_with(
                r#"echo "[ERROR] Failed to deploy: status code: 401, reason phrase: Unauthorized for $MAVEN_CENTRAL_TOKEN" >&2
exit 1"#,
            )
            .await
            .unwrap_err();
            match err {
                ReleaseError::Credential(CredentialError::Rejected { reason, .. }) => {
                    assert!(reason.contains("***"));
                    assert!(!reason.contains("tok-5e4d3c2b"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn other_failures_are_publish_errors() {
            let err = release_with("echo 'Unable to tag SCM' >&2; exit 1")
                .await
                .unwrap_err();
            assert!(matches!(err, ReleaseError::Publish(_)));
        }
    }

    mod settings {
        use super::*;
        use crate::credentials::{PublishSecrets, Secret};
        use crate::event::PublishedRelease;

        fn resolve(workdir: &Path, scratch: &Path) -> Result<PathBuf> {
            let release = PublishedRelease::new("6.2.0").unwrap();
            let secret = Secret::new("tok-5e4d3c2b");
            let publish_env = PublishEnvNames::default();
            let request = ReleaseRequest {
                release: &release,
                descriptor: Path::new("pom.xml"),
                profile: "release",
                settings_file: Path::new(".mvn/settings.xml"),
                repository_id: "central",
                scratch_dir: scratch,
                secrets: PublishSecrets {
                    username: &secret,
                    token: &secret,
                    passphrase: &secret,
                },
                publish_env: &publish_env,
            };
            resolve_settings(workdir, &request)
        }

        fn write_settings(workdir: &Path, body: &str) {
            std::fs::create_dir_all(workdir.join(".mvn")).unwrap();
            std::fs::write(workdir.join(".mvn/settings.xml"), body).unwrap();
        }

        #[test]
        fn checkout_settings_declaring_the_server_are_used() {
            let workdir = tempfile::tempdir().unwrap();
            let scratch = tempfile::tempdir().unwrap();
            write_settings(
                workdir.path(),
                r#"<settings>
  <servers>
    <server><id>snapshots</id></server>
    <server>
      <id> central </id>
      <username>${env.MAVEN_USERNAME}</username>
    </server>
  </servers>
</settings>"#,
            );
            let settings = resolve(workdir.path(), scratch.path()).unwrap();
            assert_eq!(settings, Path::new(".mvn/settings.xml"));
            assert!(!scratch.path().join(GENERATED_SETTINGS).exists());
        }

        #[test]
        fn checkout_settings_without_the_server_are_rejected() {
            let workdir = tempfile::tempdir().unwrap();
            let scratch = tempfile::tempdir().unwrap();
            write_settings(
                workdir.path(),
                "<settings><servers><server><id>ossrh</id></server></servers></settings>",
            );
            let err = resolve(workdir.path(), scratch.path()).unwrap_err();
            match &err {
                ReleaseError::Config(ConfigError::MissingServer { repository_id, .. }) => {
                    assert_eq!(repository_id, "central");
                }
                other => panic!("unexpected error: {other}"),
            }
            assert!(err.recovery_suggestions()[0].contains("<id>central</id>"));
        }

        #[test]
        fn missing_settings_are_generated_outside_the_checkout() {
            let workdir = tempfile::tempdir().unwrap();
            let scratch = tempfile::tempdir().unwrap();
            let settings = resolve(workdir.path(), scratch.path()).unwrap();
            assert_eq!(settings, scratch.path().join(GENERATED_SETTINGS));

            let body = std::fs::read_to_string(&settings).unwrap();
            assert_eq!(declared_servers(&body), ["central", "gpg.passphrase"]);
            assert!(body.contains("<username>${env.MAVEN_USERNAME}</username>"));
            assert!(body.contains("<password>${env.MAVEN_CENTRAL_TOKEN}</password>"));
            assert!(body.contains("<passphrase>${env.MAVEN_GPG_PASSPHRASE}</passphrase>"));
            assert!(!body.contains("tok-5e4d3c2b"));
            assert!(!workdir.path().join(".mvn").exists());
        }
    }

    #[test]
    fn credential_rejections_are_recognised() {
        for line in [
            "[ERROR] Failed to deploy artifacts: status code: 401, reason phrase: Unauthorized (401)",
            "gpg: signing failed: Bad passphrase",
            "Return code is: 403 Forbidden",
        ] {
            assert!(CREDENTIAL_REJECTED_RE.is_match(line), "{line}");
        }
        assert!(!CREDENTIAL_REJECTED_RE.is_match("[ERROR] Compilation failure in Foo.java:401"));
    }
}
