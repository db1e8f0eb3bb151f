//! # Kestrel Core
//!
//! Types and traits shared by the orchestrator and its backends.
//!
//! - **[`JobConfig`](config::JobConfig)**: A job document after placeholder substitution. Describes the target services and the tool tasks run against them.
//! - **[`ToolRegistry`](tools::ToolRegistry)**: Static tool descriptors, loaded once from a descriptor tree.
//! - **[`JobEvent`](events::JobEvent)**: Status and bug reports written by running containers.
//! - **[`ContainerRuntime`](traits::ContainerRuntime)**: Trait for implementing container execution backends (e.g. Docker).
//! - **[`EventPublisher`](traits::EventPublisher)**: Trait for forwarding events to an outside receiver.

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod job;
pub mod timespan;
pub mod tools;
pub mod traits;

mod normalize;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub mod prelude {
    pub use super::config::*;
    pub use super::error::*;
    pub use super::events::*;
    pub use super::job::*;
    pub use super::tools::*;
    pub use super::traits::*;
}
