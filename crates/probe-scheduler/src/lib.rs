// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! probe-scheduler
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Cancellation primitives.
pub mod cancel;
/// The per-test execution state machine.
mod execution;
/// Root supervision.
pub mod guardian;
/// The ports bundle and runtime settings.
pub mod ports;
/// Test records.
mod record;
/// The queue scheduler actor and handle.
pub mod scheduler;

pub use cancel::CancellationToken;
pub use guardian::{Guardian, GuardianConfig, GuardianError};
pub use ports::{Ports, PortsBuilder, SchedulerSettings};
pub use scheduler::{CancelReply, SchedulerError, SchedulerHandle, StartReply};
