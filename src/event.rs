//! Release events that trigger an orchestration run.
//!
//! A run is triggered either by a GitHub `release` webhook payload or by
//! explicit CLI flags. Only a genuinely published release unlocks the
//! publish step; everything else is a [`ReleaseEvent::Draft`].

use crate::error::{EventError, Result};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]*$").expect("tag regex is valid")
});

/// The triggering fact for one orchestration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseEvent {
    /// Anything that is not a published release: drafts, other actions, other events
    Draft {
        /// Tag carried by the event, if any
        tag_name: Option<String>,
        /// Why this event does not count as a publication
        reason: String,
    },
    /// A published release
    Published(PublishedRelease),
}

/// A release that has been published and may be released to the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRelease {
    tag_name: String,
}

impl PublishedRelease {
    /// Validate a tag and wrap it as a publishable release
    pub fn new(tag_name: impl Into<String>) -> Result<Self> {
        let tag_name = tag_name.into();
        if tag_name.is_empty() {
            return Err(EventError::MissingTag.into());
        }
        if !TAG_RE.is_match(&tag_name) {
            return Err(EventError::InvalidTag {
                tag: tag_name,
                reason: "must match ^[A-Za-z0-9][A-Za-z0-9._+-]*$".to_string(),
            }
            .into());
        }
        Ok(Self { tag_name })
    }

    /// Tag name, used verbatim as the Maven release version
    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    /// Parse the tag as semver, tolerating a leading `v`
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(self.tag_name.trim_start_matches('v')).ok()
    }
}

impl fmt::Display for PublishedRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag_name)
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    action: Option<String>,
    release: Option<ReleasePayload>,
}

#[derive(Debug, Deserialize)]
struct ReleasePayload {
    tag_name: Option<String>,
    #[serde(default)]
    draft: bool,
}

impl ReleaseEvent {
    /// Build an event from a GitHub event name and its JSON payload
    pub fn from_github_payload(event_name: &str, payload: &str) -> Result<Self> {
        let payload: Payload = serde_json::from_str(payload)?;
        let release = payload.release;
        let tag_name = release
            .as_ref()
            .and_then(|r| r.tag_name.clone())
            .filter(|t| !t.is_empty());

        if event_name != "release" {
            return Ok(Self::Draft {
                tag_name,
                reason: format!("event '{event_name}' is not a release event"),
            });
        }

        let action = payload.action.unwrap_or_default();
        if action != "published" {
            return Ok(Self::Draft {
                tag_name,
                reason: format!("release action '{action}' is not 'published'"),
            });
        }

        if release.as_ref().is_some_and(|r| r.draft) {
            return Ok(Self::Draft {
                tag_name,
                reason: "release is still a draft".to_string(),
            });
        }

        let tag_name = tag_name.ok_or(EventError::MissingTag)?;
        Ok(Self::Published(PublishedRelease::new(tag_name)?))
    }

    /// Read a GitHub event payload file
    pub fn from_github_event_file(event_name: &str, path: &Path) -> Result<Self> {
        let payload = std::fs::read_to_string(path).map_err(|e| EventError::InvalidPayload {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_github_payload(event_name, &payload).map_err(|e| match e {
            crate::error::ReleaseError::Json(json) => EventError::InvalidPayload {
                path: path.to_path_buf(),
                reason: json.to_string(),
            }
            .into(),
            other => other,
        })
    }

    /// Build an event from explicit flags
    pub fn from_flags(tag_name: Option<String>, published: bool) -> Result<Self> {
        match (tag_name, published) {
            (Some(tag), true) => Ok(Self::Published(PublishedRelease::new(tag)?)),
            (None, true) => Err(EventError::MissingTag.into()),
            (tag_name, false) => Ok(Self::Draft {
                tag_name,
                reason: "run was not marked as published".to_string(),
            }),
        }
    }

    /// Tag carried by the event, published or not
    pub fn tag_name(&self) -> Option<&str> {
        match self {
            Self::Draft { tag_name, .. } => tag_name.as_deref(),
            Self::Published(release) => Some(release.tag_name()),
        }
    }

    /// The published release, if this event is one
    pub fn published(&self) -> Option<&PublishedRelease> {
        match self {
            Self::Published(release) => Some(release),
            Self::Draft { .. } => None,
        }
    }
}

impl fmt::Display for ReleaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Published(release) => write!(f, "published release {release}"),
            Self::Draft {
                tag_name: Some(tag),
                reason,
            } => write!(f, "non-release trigger for {tag} ({reason})"),
            Self::Draft { reason, .. } => write!(f, "non-release trigger ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReleaseError;

    #[test]
    fn published_release_payload() {
        let payload = r#"{"action":"published","release":{"tag_name":"6.2.0","draft":false}}"#;
        let event = ReleaseEvent::from_github_payload("release", payload).unwrap();
        assert_eq!(
            event.published().map(|r| r.tag_name()),
            Some("6.2.0")
        );
    }

    #[test]
    fn other_actions_are_drafts() {
        let payload = r#"{"action":"created","release":{"tag_name":"6.2.0"}}"#;
        let event = ReleaseEvent::from_github_payload("release", payload).unwrap();
        assert!(event.published().is_none());
        assert_eq!(event.tag_name(), Some("6.2.0"));
    }

    #[test]
    fn draft_flag_wins_over_published_action() {
        let payload = r#"{"action":"published","release":{"tag_name":"6.2.0","draft":true}}"#;
        let event = ReleaseEvent::from_github_payload("release", payload).unwrap();
        assert!(matches!(event, ReleaseEvent::Draft { .. }));
    }

    #[test]
    fn non_release_events_are_drafts() {
        let event = ReleaseEvent::from_github_payload("push", r#"{"ref":"refs/heads/main"}"#)
            .unwrap();
        assert!(event.published().is_none());
    }

    #[test]
    fn published_without_tag_fails() {
        let payload = r#"{"action":"published","release":{"tag_name":""}}"#;
        let err = ReleaseEvent::from_github_payload("release", payload).unwrap_err();
        assert!(matches!(err, ReleaseError::Event(EventError::MissingTag)));
    }

    #[test]
    fn tags_with_shell_metacharacters_are_rejected() {
        for tag in ["6.2.0; rm -rf /", "-Dfoo=bar", "6.2 0", "$(id)"] {
            assert!(PublishedRelease::new(tag).is_err(), "{tag} should be rejected");
        }
    }

    #[test]
    fn semver_tolerates_v_prefix() {
        let release = PublishedRelease::new("v6.2.0").unwrap();
        assert_eq!(release.semver(), Some(semver::Version::new(6, 2, 0)));
        assert_eq!(release.tag_name(), "v6.2.0");
        assert!(PublishedRelease::new("2024.1").unwrap().semver().is_none());
    }

    #[test]
    fn flags_without_tag_cannot_publish() {
        assert!(ReleaseEvent::from_flags(None, true).is_err());
        assert!(ReleaseEvent::from_flags(None, false).is_ok());
    }
}
