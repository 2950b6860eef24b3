//! Print what a run would do.

use super::helpers::resolve_config;
use crate::cli::{Args, RunArgs, RuntimeConfig};
use crate::error::Result;
use crate::orchestrator::plan;

/// Show the steps and commands for the triggering event without executing them.
///
/// Secrets are referenced by variable name; their values are never read here.
pub(super) fn execute_plan(args: &Args, run_args: &RunArgs, config: &RuntimeConfig) -> Result<i32> {
    let orchestrator_config = resolve_config(args, run_args)?;
    let event = run_args.event()?;

    config.section("Release plan");
    config.println(&format!("Trigger: {event}"));
    config.println(&format!(
        "Source:  {} @ {}",
        orchestrator_config.source, orchestrator_config.reference
    ));
    config.println("");

    for planned in plan(&orchestrator_config, &event) {
        config.println(&format!("{}. {}", planned.step.number(), planned.step));
        for command in &planned.commands {
            config.indent(&format!("$ {command}"));
        }
        if let Some(note) = &planned.note {
            config.indent(note);
        }
    }
    Ok(0)
}
