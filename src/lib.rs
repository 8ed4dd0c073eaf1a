//! Control plane for an agentic software factory.
//!
//! Two collaborating pieces, both built against a single [`Store`]
//! abstraction so production (Postgres) and tests (in-memory) share exactly
//! the same semantics:
//!
//! - [`Backlog`] — durable tickets with lease-based single-claim semantics.
//! - [`RunSupervisor`] — the run state machine: dispatch, monitor, enforce
//!   budget limits, recover stale runs.
//!
//! Ticket ingestion, the agent harness/sandbox protocol, artifact upload
//! mechanics, an HTTP admin surface, and schema-migration tooling are all
//! out of scope; this crate defines the seams ([`AgentAdapter`],
//! [`QueueHint`]) a deployment wires those concerns in through.

pub mod backlog;
pub mod config;
pub mod errors;
pub mod harness;
pub mod model;
pub mod queue;
pub mod store;
pub mod supervisor;

pub use backlog::Backlog;
pub use backlog::BacklogError;
pub use config::Settings;
pub use errors::ValidationError;
pub use harness::AgentAdapter;
pub use queue::InMemoryQueue;
pub use queue::QueueHint;
pub use store::MemoryStore;
pub use store::PostgresStore;
pub use store::Store;
pub use store::StoreError;
pub use supervisor::RunSupervisor;
pub use supervisor::SupervisorError;
