//! Process Supervision
//!
//! Supervised units of execution reached over an [`Exchange`](warden_exchange::Exchange).
//! A supervisor drives each [`Process`] through a startup handshake, probes
//! it with health checks while it runs, and tears it down with
//! `willTerm`/`term`, forcing release when the child stops answering.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐         ┌──────────────────────────┐
//! │      ProcessManager      │         │        Child unit        │
//! │                          │         │                          │
//! │  Pid ──► Process         │         │  Exchange                │
//! │          │ StateMachine  │transport│    │                     │
//! │          │ Handshake ────┼────────►│  Dispatcher              │
//! │          │ HealthChecker─┼────────►│    │                     │
//! │          │ Exchange ─────┼────────►│  ProcessEndpoint ──► app │
//! │          ▼               │         │                          │
//! │   ProcessBackend         │         └──────────────────────────┘
//! │   (Local | Remote)       │                 ▲
//! └──────────┬───────────────┘                 │ fabricate / destroy
//!            └──────────── SandboxDelegate ────┘
//! ```
//!
//! # Lifecycle
//!
//! `Created → Initializing → Handshaking → Running → Terminating → Zombie`,
//! with `InComm` for a running process that failed its health checks and
//! `Rogue` for one that ignored `term`.
//!
//! # Example
//!
//! ```rust
//! use warden_actors::{ProcessManager, ProcessState};
//! use warden_config::WardenConfig;
//! use warden_types::default_scheduler;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = ProcessManager::new(WardenConfig::default(), default_scheduler());
//! let pid = manager.spawn_local(None).await.unwrap();
//! assert_eq!(pid.state(), Ok(ProcessState::Running));
//!
//! pid.terminate().await.unwrap();
//! assert!(!pid.is_alive());
//! # }
//! ```

pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod health;
pub mod manager;
pub mod pid;
pub mod process;
pub mod sandbox;

pub use endpoint::ProcessEndpoint;
pub use error::{HandshakeError, ProcessError, Result};
pub use handshake::{Handshake, HandshakeOutcome};
pub use health::{HealthCheck, HealthCheckError, HealthChecker, HealthState, ProbeCheck};
pub use manager::{BackendFactory, ProcessManager};
pub use pid::{Pid, ProcessId};
pub use process::{
    process_graph, LocalProcess, Process, ProcessBackend, ProcessEvent, ProcessState, RemoteProcess,
};
pub use sandbox::{Fabricated, InProcessSandbox, SandboxDelegate, SandboxHandle};
