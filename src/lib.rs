//! # Maven Release Orchestrator
//!
//! Fail-fast release orchestration for Maven projects.
//!
//! A run reacts to a release event and drives seven steps inside an
//! ephemeral sandbox: acquire the sandbox, check out the source, install the
//! signing key and SSH identity, package, configure the commit identity,
//! discard stale release metadata, and finally prepare and perform the
//! release. The last step runs only for a published release. The first
//! failing step stops the run.
//!
//! ## Usage
//!
//! ```bash
//! maven_release run                                       # inside a GitHub Actions workflow
//! maven_release run --source <repo> --tag 6.2.0 --published
//! maven_release plan --source <repo> --tag 6.2.0 --published
//! ```
//!
//! Library users drive [`ReleaseOrchestrator`] directly and may substitute
//! their own [`tools::SourceControl`], [`tools::Authenticator`],
//! [`tools::Builder`] and [`tools::Releaser`] implementations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod process;
pub mod report;
pub mod sandbox;
pub mod tools;

pub use cli::Args;
pub use config::{EgressMode, OrchestratorConfig};
pub use credentials::{Credentials, Redactor, Secret};
pub use error::{ReleaseError, Result};
pub use event::{PublishedRelease, ReleaseEvent};
pub use orchestrator::{Capabilities, ReleaseOrchestrator, RunOutcome, Step};
pub use report::{RunReport, RunStatus, StepStatus};
pub use sandbox::Sandbox;
