// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The guardian: root supervisor of the queue scheduler.
//!
//! The guardian holds no per-test state; it is the error kernel. It spawns
//! the scheduler, watches the task, and restarts it after a panic, at most
//! `max_restarts` times within `window`. On exceeding the budget it gives
//! up and surfaces a fatal error; the process is expected to exit non-zero.
//!
//! Restarts swap a fresh command channel into every outstanding
//! [`SchedulerHandle`]; in-memory records are lost by design (no persisted
//! state).

use crate::ports::{Ports, SchedulerSettings};
use crate::scheduler::{CMD_CAPACITY, Scheduler, SchedulerHandle};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Restart budget for the scheduler.
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    /// Maximum restarts inside one window.
    pub max_restarts: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Fatal supervision failures.
#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    /// The scheduler kept dying; the budget is spent.
    #[error("scheduler restart budget exhausted: {restarts} restarts within {window:?}")]
    RestartBudgetExhausted {
        /// Restarts that were attempted.
        restarts: u32,
        /// The configured window.
        window: Duration,
    },
}

/// Root supervisor.
pub struct Guardian {
    ports: Arc<Ports>,
    settings: SchedulerSettings,
    config: GuardianConfig,
}

impl Guardian {
    /// Build a guardian over the given ports and settings.
    #[must_use]
    pub fn new(ports: Ports, settings: SchedulerSettings, config: GuardianConfig) -> Self {
        Self {
            ports: Arc::new(ports),
            settings,
            config,
        }
    }

    /// Spawn the scheduler and begin watching it.
    ///
    /// Returns the cloneable handle plus the supervision task. The task
    /// completes `Ok` on graceful shutdown and
    /// `Err(`[`GuardianError::RestartBudgetExhausted`]`)` when the budget
    /// is spent.
    pub fn initialize(self) -> (SchedulerHandle, JoinHandle<Result<(), GuardianError>>) {
        let (tx, first_rx) = mpsc::channel(CMD_CAPACITY);
        let slot = Arc::new(RwLock::new(tx));
        let handle = SchedulerHandle::new(Arc::clone(&slot), self.settings.ask_timeout);

        let task = tokio::spawn(self.supervise(slot, first_rx));
        (handle, task)
    }

    async fn supervise(
        self,
        slot: Arc<RwLock<mpsc::Sender<crate::scheduler::SchedulerCmd>>>,
        first_rx: mpsc::Receiver<crate::scheduler::SchedulerCmd>,
    ) -> Result<(), GuardianError> {
        let mut restarts: VecDeque<Instant> = VecDeque::new();
        let mut cmd_rx = Some(first_rx);

        loop {
            let rx = match cmd_rx.take() {
                Some(rx) => rx,
                None => {
                    // Restart: swap a fresh channel into every handle.
                    let (tx, rx) = mpsc::channel(CMD_CAPACITY);
                    *slot.write().await = tx;
                    rx
                }
            };

            let scheduler = Scheduler::new(Arc::clone(&self.ports), self.settings.clone());
            let task = tokio::spawn(scheduler.run(rx));
            info!(target: "probe.guardian", "watching scheduler");

            match task.await {
                Ok(()) => {
                    info!(target: "probe.guardian", "scheduler shut down cleanly");
                    return Ok(());
                }
                Err(join_err) => {
                    let now = Instant::now();
                    while let Some(front) = restarts.front() {
                        if now.duration_since(*front) > self.config.window {
                            restarts.pop_front();
                        } else {
                            break;
                        }
                    }
                    restarts.push_back(now);

                    let count = restarts.len() as u32;
                    if count > self.config.max_restarts {
                        error!(
                            target: "probe.guardian",
                            restarts = count,
                            "restart budget exhausted, giving up"
                        );
                        return Err(GuardianError::RestartBudgetExhausted {
                            restarts: count,
                            window: self.config.window,
                        });
                    }

                    warn!(
                        target: "probe.guardian",
                        error = %join_err,
                        restart = count,
                        of = self.config.max_restarts,
                        "scheduler died abnormally, restarting"
                    );
                }
            }
        }
    }
}
