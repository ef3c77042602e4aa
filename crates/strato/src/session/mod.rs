//! Session lifecycle module.
//!
//! The controller turns the provider's eventually-consistent orchestration
//! API into the synchronous caller contract consumed by the hub:
//! `start` returns a reachable endpoint or a definitive failure, `poll` is a
//! cheap liveness check, `stop`/`teardown` halt or remove the compute while
//! always preserving the user's storage.

mod error;
mod models;
mod service;

pub use error::{SpawnError, SpawnResult, StopError, StopResult};
pub use models::{Endpoint, LaunchSpec, SessionPhase, SessionState};
pub use service::SessionSpawner;
