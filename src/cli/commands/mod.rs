//! Command execution.

mod helpers;
mod plan;
mod run;

use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::Result;

use plan::execute_plan;
use run::execute_run;

/// Execute the main command based on parsed arguments
pub async fn execute_command(args: Args) -> Result<i32> {
    if let Err(validation_error) = args.validate() {
        // Validation errors are never quiet
        let output = super::OutputManager::new(false);
        output.error(&format!("Invalid arguments: {validation_error}"));
        return Ok(1);
    }

    let config = RuntimeConfig::from(&args);

    let result = match &args.command {
        Command::Run(run_args) => execute_run(&args, run_args, &config).await,
        Command::Plan(run_args) => execute_plan(&args, run_args, &config),
    };

    match result {
        Ok(exit_code) => Ok(exit_code),
        Err(e) => {
            config.error_println(&format!(
                "Command '{}' failed: {}",
                args.command.name(),
                e
            ));
            helpers::print_suggestions(&config, &e);
            Ok(1)
        }
    }
}
