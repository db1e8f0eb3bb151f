//! # Kestrel Orchestrator
//!
//! Runs a job locally: a utility sidecar, the target services and the tool tasks, each in its own
//! container, then tears everything down.
//!
//! - **[`Orchestrator`](orchestrator::Orchestrator)**: Drives one job through its lifecycle against any [`ContainerRuntime`](kestrel_core::traits::ContainerRuntime).
//! - **[`OrchestratorConfig`](context::OrchestratorConfig)**: Work and tools directories, networking and webhook receivers.
//! - **[`LocalWorkspace`](workspace::LocalWorkspace)**: The host folder layout shared with containers.
//! - **[`EventAggregator`](sink::EventAggregator)**: Latest status per agent, and every bug found.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod sink;
pub mod state;
pub mod workspace;

pub mod prelude {
    pub use super::context::*;
    pub use super::dispatch::*;
    pub use super::error::*;
    pub use super::orchestrator::*;
    pub use super::sink::*;
    pub use super::state::*;
    pub use super::workspace::LocalWorkspace;
}
