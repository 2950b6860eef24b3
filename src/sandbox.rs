//! Ephemeral execution environment for one run.
//!
//! The sandbox owns a temporary directory holding the checkout and a private
//! GnuPG home, plus the allowlisted environment every child process starts
//! from. It also applies the egress policy to the endpoints a run contacts.

use crate::config::{EgressMode, SandboxConfig};
use crate::error::{Result, SandboxError};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tempfile::TempDir;

static SCP_LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[^@/\s]+@)?(?P<host>[A-Za-z0-9.-]+):[^/\\]").expect("scp regex is valid")
});

/// Temporary workspace scoped to a single run.
///
/// The GnuPG home holds imported private keys, so it is wiped on drop even
/// when the rest of the workspace is kept.
#[derive(Debug)]
pub struct Sandbox {
    // Dropping the TempDir removes the workspace
    _dir: Option<TempDir>,
    root: PathBuf,
    gnupg_home: PathBuf,
    base_env: BTreeMap<String, String>,
    egress: EgressMode,
    allowed_endpoints: Vec<String>,
}

impl Sandbox {
    /// Create a sandbox inheriting allowlisted variables from this process
    pub fn acquire(config: &SandboxConfig) -> Result<Self> {
        Self::acquire_with_env(config, |key| std::env::var(key).ok())
    }

    /// Create a sandbox inheriting allowlisted variables through `lookup`
    pub fn acquire_with_env<F>(config: &SandboxConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dir = tempfile::Builder::new()
            .prefix("maven-release-")
            .tempdir()
            .map_err(|e| SandboxError::CreateFailed {
                reason: e.to_string(),
            })?;
        let root = dir.path().to_path_buf();

        let gnupg_home = root.join("gnupg");
        std::fs::create_dir(&gnupg_home).map_err(|e| SandboxError::CreateFailed {
            reason: format!("creating {}: {e}", gnupg_home.display()),
        })?;
        restrict_permissions(&gnupg_home)?;

        let mut base_env: BTreeMap<String, String> = config
            .passthrough_env
            .iter()
            .filter_map(|key| lookup(key).map(|value| (key.clone(), value)))
            .collect();
        base_env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());

        let dir = if config.keep {
            log::warn!(
                "Keeping sandbox at {} after the run; {} is still removed",
                root.display(),
                gnupg_home.display()
            );
            #[allow(deprecated)]
            let _kept = dir.into_path();
            None
        } else {
            Some(dir)
        };

        log::info!("Sandbox ready at {}", root.display());
        Ok(Self {
            _dir: dir,
            root,
            gnupg_home,
            base_env,
            egress: config.egress,
            allowed_endpoints: config.allowed_endpoints.clone(),
        })
    }

    /// Root of the workspace
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the source tree is checked out
    pub fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    /// Private GnuPG home
    pub fn gnupg_home(&self) -> &Path {
        &self.gnupg_home
    }

    /// Environment every child process starts from
    pub fn base_env(&self) -> &BTreeMap<String, String> {
        &self.base_env
    }

    /// Apply the egress policy to an endpoint; returns its host when remote
    pub fn admit_endpoint(&self, endpoint: &str) -> Result<Option<String>> {
        let Some(host) = endpoint_host(endpoint) else {
            log::debug!("Endpoint '{endpoint}' is local");
            return Ok(None);
        };

        match self.egress {
            EgressMode::Audit => {
                log::info!("Egress audit: {host}");
                Ok(Some(host))
            }
            EgressMode::Block => {
                let allowed = self.allowed_endpoints.iter().any(|allowed| {
                    host == *allowed || host.ends_with(&format!(".{allowed}"))
                });
                if allowed {
                    log::info!("Egress allowed: {host}");
                    Ok(Some(host))
                } else {
                    Err(SandboxError::EgressDenied { host }.into())
                }
            }
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        stop_gpg_agent(&self.gnupg_home, &self.base_env);
        match std::fs::remove_dir_all(&self.gnupg_home) {
            Ok(()) => log::debug!("Removed {}", self.gnupg_home.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {e}", self.gnupg_home.display()),
        }
    }
}

/// Stop the agent gpg spawned for this home so it releases the key material
fn stop_gpg_agent(gnupg_home: &Path, base_env: &BTreeMap<String, String>) {
    let search_path = base_env.get("PATH").cloned();
    let Ok(gpgconf) = which::which_in("gpgconf", search_path, gnupg_home) else {
        log::debug!("gpgconf not found; no gpg-agent to stop");
        return;
    };
    let status = std::process::Command::new(gpgconf)
        .args(["--kill", "gpg-agent"])
        .env_clear()
        .envs(base_env)
        .env("GNUPGHOME", gnupg_home)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    match status {
        Ok(s) if s.success() => log::debug!("Stopped gpg-agent"),
        Ok(s) => log::debug!("gpgconf --kill gpg-agent exited with {s}"),
        Err(e) => log::debug!("Failed to stop gpg-agent: {e}"),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
        SandboxError::CreateFailed {
            reason: format!("restricting {}: {e}", path.display()),
        }
        .into()
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Host of a remote endpoint; `None` for local paths and `file://` URLs
pub fn endpoint_host(endpoint: &str) -> Option<String> {
    if endpoint.contains("://") {
        return url::Url::parse(endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
    }
    if Path::new(endpoint).exists() {
        return None;
    }
    SCP_LIKE_RE
        .captures(endpoint)
        .map(|caps| caps["host"].to_ascii_lowercase())
}
