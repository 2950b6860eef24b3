//! SSH identity registration through a run-scoped `ssh-agent`.

use super::Session;
use crate::config::SshConfig;
use crate::credentials::Secret;
use crate::error::{CredentialError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static AGENT_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<key>SSH_AUTH_SOCK|SSH_AGENT_PID)=(?P<value>[^;\s]+)")
        .expect("ssh-agent regex is valid")
});

/// A running agent holding the run's SSH identity; killed on drop
#[derive(Debug)]
pub struct SshSession {
    env: BTreeMap<String, String>,
    agent_program: Option<String>,
}

impl SshSession {
    /// Session backed by an agent this process started
    fn owned(env: BTreeMap<String, String>, agent_program: String) -> Self {
        Self {
            env,
            agent_program: Some(agent_program),
        }
    }

    /// Session whose agent is managed elsewhere; nothing is killed on drop
    pub fn detached(env: BTreeMap<String, String>) -> Self {
        Self {
            env,
            agent_program: None,
        }
    }

    /// Variables locating the agent
    pub fn env(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.env.iter().map(|(k, v)| (k.clone(), v.clone()))
    }
}

/// Write the configured host keys to `dir/known_hosts`
pub fn write_known_hosts(config: &SshConfig, dir: &Path) -> Result<PathBuf> {
    let path = dir.join("known_hosts");
    let mut contents = config.known_hosts.join("\n");
    contents.push('\n');
    std::fs::write(&path, contents).map_err(|e| CredentialError::InstallFailed {
        what: "SSH known hosts".to_string(),
        reason: format!("writing {}: {e}", path.display()),
    })?;
    Ok(path)
}

/// `GIT_SSH_COMMAND` for the run.
///
/// Host keys are only ever read from `known_hosts`; the user's and the
/// system's files are ignored. With strict checking a host missing from that
/// file is refused. Otherwise an unknown host is trusted on first contact and
/// appended, but a changed key is still refused.
pub fn git_ssh_command(config: &SshConfig, known_hosts: &Path) -> String {
    let policy = if config.strict_host_key_checking {
        "yes"
    } else {
        "accept-new"
    };
    format!(
        "ssh -o StrictHostKeyChecking={policy} -o UserKnownHostsFile='{}' -o GlobalKnownHostsFile=/dev/null -o IdentitiesOnly=no",
        known_hosts.display()
    )
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let Some(program) = &self.agent_program else {
            return;
        };
        let status = std::process::Command::new(program)
            .arg("-k")
            .env_clear()
            .envs(&self.env)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => log::info!("Stopped ssh-agent"),
            Ok(s) => log::warn!("ssh-agent -k exited with {s}"),
            Err(e) => log::warn!("Failed to stop ssh-agent: {e}"),
        }
    }
}

/// `ssh-agent` / `ssh-add` clients
#[derive(Debug, Clone)]
pub struct SshAgent {
    agent_program: String,
    add_program: String,
}

impl Default for SshAgent {
    fn default() -> Self {
        Self::new("ssh-agent", "ssh-add")
    }
}

impl SshAgent {
    /// Clients for the given executables
    pub fn new(agent_program: impl Into<String>, add_program: impl Into<String>) -> Self {
        Self {
            agent_program: agent_program.into(),
            add_program: add_program.into(),
        }
    }

    /// Start an agent and add `key` to it
    pub async fn register(&self, session: &Session, key: &Secret) -> Result<SshSession> {
        let install_failed = |reason: String| CredentialError::InstallFailed {
            what: "SSH identity".to_string(),
            reason,
        };

        let started = session
            .command(&self.agent_program)
            .arg("-s")
            .run(session.redactor())
            .await
            .map_err(|e| install_failed(e.to_string()))?;
        let env = parse_agent_env(&started.stdout);
        if !env.contains_key("SSH_AUTH_SOCK") {
            return Err(install_failed("ssh-agent did not report SSH_AUTH_SOCK".to_string()).into());
        }
        let agent = SshSession::owned(env, self.agent_program.clone());

        // ssh-add rejects keys without a trailing newline
        let mut material = key.expose().trim_end().to_string();
        material.push('\n');
        session
            .with_env(agent.env())
            .command(&self.add_program)
            .arg("-")
            .stdin_secret(&Secret::new(material))
            .run(session.redactor())
            .await
            .map_err(|e| install_failed(e.to_string()))?;

        log::info!("SSH identity registered with a run-scoped agent");
        Ok(agent)
    }
}

fn parse_agent_env(stdout: &str) -> BTreeMap<String, String> {
    AGENT_VAR_RE
        .captures_iter(stdout)
        .map(|caps| (caps["key"].to_string(), caps["value"].to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bourne_shell_agent_output() {
        let stdout = "\
SSH_AUTH_SOCK=/tmp/ssh-XXXXabcd/agent.4242; export SSH_AUTH_SOCK;
SSH_AGENT_PID=4243; export SSH_AGENT_PID;
echo Agent pid 4243;
";
        let env = parse_agent_env(stdout);
        assert_eq!(env["SSH_AUTH_SOCK"], "/tmp/ssh-XXXXabcd/agent.4242");
        assert_eq!(env["SSH_AGENT_PID"], "4243");
    }

    #[test]
    fn session_env_locates_the_agent() {
        let session = SshSession::detached(BTreeMap::from([(
            "SSH_AUTH_SOCK".to_string(),
            "/tmp/agent.sock".to_string(),
        )]));
        let env: BTreeMap<String, String> = session.env().collect();
        assert_eq!(env["SSH_AUTH_SOCK"], "/tmp/agent.sock");
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn strict_checking_only_trusts_pinned_keys() {
        let dir = tempfile::tempdir().unwrap();
        let config = SshConfig::default();
        let known_hosts = write_known_hosts(&config, dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(&known_hosts).unwrap(),
            format!("{}\n", crate::config::GITHUB_HOST_KEY)
        );

        let command = git_ssh_command(&config, &known_hosts);
        assert!(command.contains("StrictHostKeyChecking=yes"));
        assert!(!command.contains("accept-new"));
        assert!(command.contains(&format!("UserKnownHostsFile='{}'", known_hosts.display())));
        assert!(command.contains("GlobalKnownHostsFile=/dev/null"));
    }

    #[test]
    fn relaxed_checking_trusts_new_hosts_on_first_use() {
        let config = SshConfig {
            strict_host_key_checking: false,
            known_hosts: Vec::new(),
        };
        let command = git_ssh_command(&config, Path::new("/tmp/run/known_hosts"));
        assert!(command.starts_with("ssh "));
        assert!(command.contains("StrictHostKeyChecking=accept-new"));
        assert!(command.contains("UserKnownHostsFile='/tmp/run/known_hosts'"));
    }
}
