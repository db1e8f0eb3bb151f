//! # Workspace Example
//!
//! Creates the local folder layout and lists the tool descriptors that would be available to jobs.
//!
//! ## Usage
//!
//! ```sh
//! KESTREL_WORK_DIR=./local KESTREL_TOOLS_DIR=./tools cargo run --example init_workspace
//! ```

use kestrel::prelude::*;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = OrchestratorConfig::from_env()?;
    let workspace = LocalWorkspace::init(&config.work_directory)?;
    println!("storage:     {}", workspace.storage().display());
    println!("secrets:     {}", workspace.secrets().display());
    println!("events sink: {}", workspace.events_sink().display());

    let tools = ToolRegistry::load(&config.tools_directory)?;
    for (name, tool) in tools.iter() {
        println!("{name:<24} {:<40} {}", tool.container, tool.run_directory());
    }
    Ok(())
}
