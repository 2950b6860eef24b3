//! Execute a release run.

use super::helpers::{print_suggestions, resolve_config};
use crate::cli::{Args, RunArgs, RuntimeConfig};
use crate::credentials::Credentials;
use crate::error::Result;
use crate::orchestrator::{ReleaseOrchestrator, RunOutcome};

/// Run every step for the triggering event and report the outcome
pub(super) async fn execute_run(
    args: &Args,
    run_args: &RunArgs,
    config: &RuntimeConfig,
) -> Result<i32> {
    let orchestrator_config = resolve_config(args, run_args)?;
    let event = run_args.event()?;

    config.section("Release run");
    config.println(&format!("Trigger: {event}"));
    config.println(&format!(
        "Source:  {} @ {}",
        orchestrator_config.source, orchestrator_config.reference
    ));

    let credentials = Credentials::from_env(&orchestrator_config.secrets);
    let report_path = orchestrator_config.report.clone();
    let orchestrator = ReleaseOrchestrator::system(orchestrator_config, credentials);
    let outcome = orchestrator.run(&event).await;

    print_outcome(config, &outcome);

    if let Some(path) = &report_path {
        match outcome.report.write_json(path) {
            Ok(()) => config.println(&format!("Report written to {}", path.display())),
            Err(e) => config.warning_println(&format!("Could not write report: {e}")),
        }
    }
    if let Some(path) = &run_args.step_summary
        && let Err(e) = outcome.report.append_step_summary(path)
    {
        config.warning_println(&format!("Could not append step summary: {e}"));
    }
    if run_args.in_github_actions()
        && let Some(annotation) = outcome.report.github_error_annotation()
    {
        // Workflow commands are read from stdout regardless of --quiet
        println!("{annotation}");
    }

    Ok(outcome.exit_code())
}

fn print_outcome(config: &RuntimeConfig, outcome: &RunOutcome) {
    let report = &outcome.report;

    config.section("Steps");
    for record in &report.steps {
        let _ = config.output().step(record);
    }

    for warning in &report.warnings {
        config.warning_println(warning);
    }

    match &outcome.error {
        None => {
            let summary = match &report.release_version {
                Some(version) => format!("Released {version}"),
                None => "Release run complete, nothing published".to_string(),
            };
            config.success_println(&summary);
        }
        Some(error) => {
            let step = report
                .failed_step
                .map(|s| s.to_string())
                .unwrap_or_else(|| "release".to_string());
            let message = report.error.as_deref().unwrap_or("unknown error");
            config.error_println(&format!("Step '{step}' failed: {message}"));
            print_suggestions(config, error);
        }
    }
}
