//! The agent harness boundary. `spec.md` Non-goals exclude the harness/
//! sandbox protocol itself; this crate defines only the capability set a
//! caller drives and reports back through — `RunSupervisor` never calls any
//! of these methods itself.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Implemented by a concrete agent harness integration. This crate never
/// implements or calls it directly; a caller drives it and reports outcomes
/// back via `RunSupervisor::monitor`/`enforce_limits`.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Whether this adapter can handle a workload of `ticket_type`,
    /// optionally narrowed by `repo_language`.
    async fn supports(&self, ticket_type: &str, repo_language: Option<&str>) -> bool;

    /// Launch a harness task and return its session id.
    async fn launch_task(&self, task_payload: Value) -> anyhow::Result<String>;

    /// Read incremental events for a harness session since the last poll.
    async fn stream_events(&self, session_id: &str) -> anyhow::Result<Vec<Value>>;

    /// Send a control instruction (e.g. "pause", "resume", "cancel") to the
    /// harness session.
    async fn send_control(&self, session_id: &str, control: &str) -> anyhow::Result<()>;

    /// Collect task outputs and artifacts by name.
    async fn collect_artifacts(&self, session_id: &str) -> anyhow::Result<HashMap<String, Value>>;

    /// Terminate a harness session.
    async fn terminate(&self, session_id: &str) -> anyhow::Result<()>;
}
