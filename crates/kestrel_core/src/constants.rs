//! Names shared with the tool images.
//!
//! Tool containers read these variables and paths, so they are a compatibility contract and
//! must not be renamed.

pub mod env {
    pub const JOB_ID: &str = "RAFT_JOB_ID";
    pub const CONTAINER_GROUP_NAME: &str = "RAFT_CONTAINER_GROUP_NAME";
    pub const WORK_DIRECTORY: &str = "RAFT_WORK_DIRECTORY";
    pub const SITE_HASH: &str = "RAFT_SITE_HASH";
    pub const LOCAL: &str = "RAFT_LOCAL";

    pub const TASK_INDEX: &str = "RAFT_TASK_INDEX";
    pub const CONTAINER_NAME: &str = "RAFT_CONTAINER_NAME";
    pub const STARTUP_DELAY: &str = "RAFT_STARTUP_DELAY";
    pub const RUN_CMD: &str = "RAFT_RUN_CMD";
    pub const POST_RUN_COMMAND: &str = "RAFT_POST_RUN_COMMAND";
    pub const CONTAINER_SHELL: &str = "RAFT_CONTAINER_SHELL";

    pub const TOOL_RUN_DIRECTORY: &str = "RAFT_TOOL_RUN_DIRECTORY";
    pub const AGENT_UTILITIES_URL: &str = "RAFT_AGENT_UTILITIES_URL";

    /// Listen address of the utility sidecar.
    pub const UTILITY_URLS: &str = "ASPNETCORE_URLS";

    /// Each secret is exposed as `RAFT_<name>`.
    pub fn secret(name: &str) -> String {
        format!("RAFT_{name}")
    }
}

pub mod paths {
    /// Descriptor tree, mounted read-only into the sidecar and every task.
    pub const TOOLS_MOUNT: &str = "/raft-tools";
    pub const EVENTS_SINK_MOUNT: &str = "/raft-events-sink";
    pub const SECRETS_MOUNT: &str = "/raft-secrets";

    pub const TASK_CONFIG_FILE: &str = "task-config.json";
    pub const RUN_SCRIPT: &str = "task-run.sh";
    pub const POST_RUN_SCRIPT: &str = "task-post-run.sh";
    pub const DESCRIPTOR_FILE: &str = "config.json";

    /// Container-side working directory of a job.
    pub fn work_dir(job_id: &str) -> String {
        format!("/work_dir_{job_id}")
    }
}

pub mod events {
    pub const BUG_FOUND: &str = "BugFound";
    pub const JOB_STATUS: &str = "JobStatus";
}
