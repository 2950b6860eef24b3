//! Shared helper functions for command execution.

use crate::cli::{Args, RunArgs, RuntimeConfig};
use crate::config::OrchestratorConfig;
use crate::error::{ReleaseError, Result};

/// Load the config file, layer the command line on top, and validate
pub(super) fn resolve_config(args: &Args, run_args: &RunArgs) -> Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::load(args.config.as_deref())?;
    run_args.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

/// Print recovery suggestions for `error`, if it has any
pub(super) fn print_suggestions(config: &RuntimeConfig, error: &ReleaseError) {
    let suggestions = error.recovery_suggestions();
    if !suggestions.is_empty() {
        config.println("\n💡 Recovery suggestions:");
        for suggestion in suggestions {
            config.println(&format!("  • {suggestion}"));
        }
    }
}
