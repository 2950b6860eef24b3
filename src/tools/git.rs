//! Source control through the `git` CLI.

use super::{Checkout, Session, SourceControl};
use crate::config::CommitIdentity;
use crate::error::{GitError, ReleaseError, Result};
use std::path::Path;

/// `git` command-line client
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    /// Client for the given executable
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for cloning `source` at `reference` into `dest`
    pub fn clone_args(source: &str, reference: &str, dest: &Path) -> Vec<String> {
        vec![
            "clone".to_string(),
            "--branch".to_string(),
            reference.to_string(),
            "--".to_string(),
            source.to_string(),
            dest.display().to_string(),
        ]
    }
}

fn reason(err: ReleaseError) -> String {
    err.to_string()
}

impl SourceControl for GitCli {
    async fn checkout(
        &self,
        session: &Session,
        source: &str,
        reference: &str,
        dest: &Path,
    ) -> Result<Checkout> {
        let checkout_failed = |reason: String| GitError::CheckoutFailed {
            source_location: session.redactor().redact(source),
            reference: reference.to_string(),
            reason,
        };

        session
            .command(&self.program)
            .args(Self::clone_args(source, reference, dest))
            .run(session.redactor())
            .await
            .map_err(|e| checkout_failed(reason(e)))?;

        let head = session
            .with_workdir(dest)
            .command(&self.program)
            .args(["rev-parse", "HEAD"])
            .run(session.redactor())
            .await
            .map_err(|e| checkout_failed(reason(e)))?
            .stdout
            .trim()
            .to_string();

        log::info!("Checked out {reference} at {head}");
        Ok(Checkout {
            path: dest.to_path_buf(),
            reference: reference.to_string(),
            head,
        })
    }

    async fn tag_commit(&self, session: &Session, tag: &str) -> Result<Option<String>> {
        let output = session
            .command(&self.program)
            .args([
                "rev-parse".to_string(),
                "--verify".to_string(),
                "--quiet".to_string(),
                format!("refs/tags/{tag}^{{commit}}"),
            ])
            .output(session.redactor())
            .await?;
        if output.success() {
            Ok(Some(output.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    async fn configure_identity(&self, session: &Session, identity: &CommitIdentity) -> Result<()> {
        for (key, value) in [("user.name", &identity.name), ("user.email", &identity.email)] {
            session
                .command(&self.program)
                .args(["config", "--local", key, value.as_str()])
                .run(session.redactor())
                .await
                .map_err(|e| GitError::IdentityFailed { reason: reason(e) })?;
        }
        log::info!("Commit identity: {} <{}>", identity.name, identity.email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Redactor;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn clone_args_pin_the_reference() {
        let args = GitCli::clone_args(
            "https://github.com/acme/parent.git",
            "main",
            Path::new("/tmp/sb/source"),
        );
        assert_eq!(
            args,
            ["clone", "--branch", "main", "--", "https://github.com/acme/parent.git", "/tmp/sb/source"]
        );
    }

    fn session(dir: &Path) -> Session {
        let env = std::env::var("PATH")
            .map(|p| BTreeMap::from([("PATH".to_string(), p)]))
            .unwrap_or_default();
        Session::new(dir, env, Redactor::default(), None)
    }

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn checkout_and_identity_against_a_local_repository() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("origin");
        std::fs::create_dir(&origin).unwrap();
        let init = session(&origin);
        let git = GitCli::default();
        for args in [
            vec!["init", "--initial-branch=main"],
            vec!["-c", "user.name=t", "-c", "user.email=t@example.com", "commit", "--allow-empty", "-m", "init"],
            vec!["tag", "6.2.0"],
        ] {
            init.command("git").args(args).run(init.redactor()).await.unwrap();
        }

        let dest: PathBuf = dir.path().join("source");
        let base = session(dir.path());
        let checkout = git
            .checkout(&base, &origin.display().to_string(), "main", &dest)
            .await
            .unwrap();
        assert_eq!(checkout.head.len(), 40);

        let in_checkout = base.with_workdir(&checkout.path);
        let tagged = git.tag_commit(&in_checkout, "6.2.0").await.unwrap();
        assert_eq!(tagged.as_deref(), Some(checkout.head.as_str()));
        assert_eq!(git.tag_commit(&in_checkout, "9.9.9").await.unwrap(), None);

        git.configure_identity(&in_checkout, &CommitIdentity::default())
            .await
            .unwrap();
        let name = in_checkout
            .command("git")
            .args(["config", "--local", "user.name"])
            .run(in_checkout.redactor())
            .await
            .unwrap();
        assert_eq!(name.stdout.trim(), "github-actions[bot]");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_reference_fails_checkout() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let err = GitCli::default()
            .checkout(
                &session(dir.path()),
                &dir.path().join("nope").display().to_string(),
                "main",
                &dir.path().join("source"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Git(GitError::CheckoutFailed { .. })));
    }
}
