//! Sequences a local store, secrets store and scheduler into one environment.
//!
//! Services are brought up one at a time in dependency order, because the
//! scheduler is configured with the addresses and root token of the other
//! two. Every service is described by a record in the workspace, so a later
//! invocation can resume, inspect or tear down what an earlier one started.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod environment;
mod error;
mod provider;
mod workspace;

pub use environment::{
    APP_DATA_FILE, APP_SECRETS_FILE, Environment, LoadSummary, ServiceStatus, ShutdownReport,
};
pub use error::{Error, Result};
pub use provider::{
    BoxError, LocalServices, Role, SchedulerDependencies, SecretsService, ServiceProvider,
    StoreService,
};
pub use workspace::{WORKSPACE_PREFIX, Workspace};
