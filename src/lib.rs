//! Drover - configuration deployment for replicated database clusters
//!
//! Drover turns one answered questionnaire into a cluster rollout: a property
//! tree describes hosts, dataservices, and connectors; the planner derives a
//! per-host snapshot of it; and the orchestrator pushes that snapshot through
//! validate, deploy, and commit phases on every host over plain SSH, with no
//! agent installed on the far side.

pub mod checks;
pub mod config;
pub mod error;
pub mod executor;
pub mod modules;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod remote;
pub mod report;
pub mod store;
pub mod topology;
pub mod ui;

// Re-exports for convenience
pub use config::ToolConfig;
pub use error::{DroverError, DroverResult, FatalAbort, RemoteError, StoreError};
pub use orchestrator::{run, EntryPoint, RunContext, RunOptions, RunSummary};
pub use planner::{build_per_host_configurations, PerHostConfiguration};
pub use prompts::{Console, PromptPipeline, StdinConsole};
pub use report::{PhaseReport, Report, RunReport, Severity};
pub use store::{ConfigStore, PropertyPath, PropertyValue};
pub use topology::Topology;
