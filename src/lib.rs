//! # 🦅 Kestrel
//!
//! A local orchestrator for multi-container testing jobs. A job starts the services under test,
//! runs a set of tool containers against them next to a utility sidecar, collects the status and
//! bug events they write, and always cleans up after itself.
//!
//! This crate serves as an entry point, re-exporting the core types and the orchestrator and
//! optionally including the container and webhook backends via feature flags.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **`docker`** | Container runtime backed by the local Docker daemon (`kestrel_docker`). |
//! | **`webhook`** | HTTP delivery of job status and bug notifications (`kestrel_webhook`). |
//!
//! ## Example: Run a Job
//!
//! ```toml
//! [dependencies]
//! kestrel = { version = "0.3", features = ["docker", "webhook"] }
//! ```
//!
//! ```rust,no_run
//! use kestrel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = DockerRuntime::connect_local().await?;
//!     runtime.init().await?;
//!
//!     let job = JobConfig::load("job.json", &Substitutions::new())?;
//!     let mut orchestrator = Orchestrator::new(OrchestratorConfig::from_env()?, runtime)?
//!         .with_publisher(WebhookClient::new());
//!
//!     let report = orchestrator.new_job(job).await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

pub use kestrel_core::*;

pub mod orchestrator {
    pub use kestrel_orchestrator::*;
}

#[cfg(feature = "docker")]
pub mod docker {
    pub use kestrel_docker::*;
}

#[cfg(feature = "webhook")]
pub mod webhook {
    pub use kestrel_webhook::*;
}

pub mod prelude {
    pub use kestrel_core::prelude::*;
    pub use kestrel_orchestrator::prelude::*;

    #[cfg(feature = "docker")]
    pub use kestrel_docker::DockerRuntime;

    #[cfg(feature = "webhook")]
    pub use kestrel_webhook::WebhookClient;
}
