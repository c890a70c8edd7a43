//! Service layer for business logic orchestration
//!
//! This module contains the pipeline services, separating them from the CLI
//! layer in main.rs.

pub mod probe;
pub mod sync;

pub use probe::{ArchitectureProber, PlatformSource, ProbeResult};
pub use sync::{BuildOutcome, SyncService};
