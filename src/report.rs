//! Run reports.
//!
//! A [`RunReport`] is the only artifact a run retains: a JSON record of
//! every step, and a markdown rendering for the GitHub step summary. Both
//! are built from redacted text only.

use crate::credentials::Redactor;
use crate::error::{ReleaseError, Result};
use crate::event::ReleaseEvent;
use crate::orchestrator::Step;
use crate::tools::BuildArtifact;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Still executing
    Running,
    /// Every gated step succeeded or was legitimately skipped
    Succeeded,
    /// A step failed
    Failed,
}

/// State of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Completed successfully
    Succeeded,
    /// Failed; the run stopped here
    Failed,
    /// Not applicable to this event
    Skipped,
    /// Never reached because an earlier step failed
    NotRun,
}

/// Record of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Which step
    pub step: Step,
    /// Outcome
    pub status: StepStatus,
    /// When it started
    pub started_at: Option<DateTime<Utc>>,
    /// How long it took
    pub duration_ms: u64,
    /// Failure or skip reason
    pub detail: Option<String>,
}

/// Everything retained from a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run id
    pub run_id: String,
    /// Human-readable trigger
    pub event: String,
    /// Tag carried by the trigger
    pub tag_name: Option<String>,
    /// Version published, when step 7 succeeded
    pub release_version: Option<String>,
    /// Commit the run built from
    pub checkout_commit: Option<String>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: Option<DateTime<Utc>>,
    /// Overall status
    pub status: RunStatus,
    /// Step that failed
    pub failed_step: Option<Step>,
    /// Error message of the failed step
    pub error: Option<String>,
    /// Steps in execution order
    pub steps: Vec<StepRecord>,
    /// Remote hosts the run contacts
    pub endpoints: Vec<String>,
    /// Files produced by packaging
    pub artifacts: Vec<BuildArtifact>,
    /// Non-fatal findings
    pub warnings: Vec<String>,
}

impl RunReport {
    /// Start a report for `event`
    pub fn new(event: &ReleaseEvent) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            event: event.to_string(),
            tag_name: event.tag_name().map(str::to_string),
            release_version: None,
            checkout_commit: None,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            failed_step: None,
            error: None,
            steps: Vec::new(),
            endpoints: Vec::new(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a finished step
    pub fn record<T>(
        &mut self,
        step: Step,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        result: &Result<T>,
    ) {
        let (status, detail) = match result {
            Ok(_) => (StepStatus::Succeeded, None),
            Err(e) => (StepStatus::Failed, Some(e.to_string())),
        };
        self.steps.push(StepRecord {
            step,
            status,
            started_at: Some(started_at),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            detail,
        });
    }

    /// Record a step that does not apply to this run
    pub fn skip(&mut self, step: Step, reason: impl Into<String>) {
        let reason = reason.into();
        log::info!("Skipping {step}: {reason}");
        self.steps.push(StepRecord {
            step,
            status: StepStatus::Skipped,
            started_at: None,
            duration_ms: 0,
            detail: Some(reason),
        });
    }

    /// Record a non-fatal finding
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.warnings.push(message);
    }

    /// Seal the report: fill unreached steps and scrub every free-text field
    pub fn finish(&mut self, result: &Result<()>, redactor: &Redactor) {
        for step in Step::ALL {
            if !self.steps.iter().any(|r| r.step == step) {
                self.steps.push(StepRecord {
                    step,
                    status: StepStatus::NotRun,
                    started_at: None,
                    duration_ms: 0,
                    detail: None,
                });
            }
        }

        match result {
            Ok(()) => self.status = RunStatus::Succeeded,
            Err(e) => {
                self.status = RunStatus::Failed;
                self.error = Some(e.to_string());
                self.failed_step = self
                    .steps
                    .iter()
                    .find(|r| r.status == StepStatus::Failed)
                    .map(|r| r.step);
            }
        }

        self.error = self.error.as_deref().map(|e| redactor.redact(e));
        for record in &mut self.steps {
            record.detail = record.detail.as_deref().map(|d| redactor.redact(d));
        }
        for warning in &mut self.warnings {
            *warning = redactor.redact(warning);
        }
        self.finished_at = Some(Utc::now());
    }

    /// Whether the run succeeded
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Status of one step
    pub fn step_status(&self, step: Step) -> Option<StepStatus> {
        self.steps.iter().find(|r| r.step == step).map(|r| r.status)
    }

    /// Pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON report to `path`
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("writing run report to {}", path.display()))?;
        Ok(())
    }

    /// Markdown summary for the GitHub step summary
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let headline = match self.status {
            RunStatus::Succeeded => "✅ Release run succeeded",
            RunStatus::Failed => "❌ Release run failed",
            RunStatus::Running => "⏳ Release run in progress",
        };
        md.push_str(&format!("### {headline}\n\n"));
        md.push_str(&format!("- Trigger: {}\n", self.event));
        if let Some(version) = &self.release_version {
            md.push_str(&format!("- Released version: `{version}`\n"));
        }
        if let Some(commit) = &self.checkout_commit {
            md.push_str(&format!("- Commit: `{commit}`\n"));
        }
        md.push_str(&format!("- Run id: `{}`\n\n", self.run_id));

        md.push_str("| Step | Status | Duration | Detail |\n|---|---|---|---|\n");
        for record in &self.steps {
            let status = match record.status {
                StepStatus::Succeeded => "✓ succeeded",
                StepStatus::Failed => "✗ failed",
                StepStatus::Skipped => "↷ skipped",
                StepStatus::NotRun => "· not run",
            };
            let detail = record
                .detail
                .as_deref()
                .and_then(|d| d.lines().next())
                .unwrap_or("")
                .replace('|', "\\|");
            md.push_str(&format!(
                "| {} | {} | {:.1}s | {} |\n",
                record.step,
                status,
                record.duration_ms as f64 / 1000.0,
                detail
            ));
        }

        if !self.warnings.is_empty() {
            md.push_str("\n**Warnings**\n\n");
            for warning in &self.warnings {
                md.push_str(&format!("- {warning}\n"));
            }
        }
        md
    }

    /// Append the markdown summary to the file GitHub exposes as `$GITHUB_STEP_SUMMARY`
    pub fn append_step_summary(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(ReleaseError::Io)?;
        file.write_all(self.to_markdown().as_bytes())?;
        Ok(())
    }

    /// Workflow command surfacing the failure as an annotation
    pub fn github_error_annotation(&self) -> Option<String> {
        let error = self.error.as_deref()?;
        let step = self
            .failed_step
            .map(|s| s.to_string())
            .unwrap_or_else(|| "release".to_string());
        let message = error
            .replace('%', "%25")
            .replace('\r', "%0D")
            .replace('\n', "%0A");
        Some(format!("::error title={step} failed::{message}"))
    }
}
