//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry Sweep: reclaims expired entries from every tier at a configured interval

mod cleanup;

pub use cleanup::spawn_sweep_task;
