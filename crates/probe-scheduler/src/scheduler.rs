// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The queue scheduler actor and its cloneable handle.
//!
//! The actor exclusively owns every [`TestRecord`]. Records mutate only in
//! response to client commands, execution events, and the retention sweep,
//! all handled on one serial inbox. Admission is FIFO against a semaphore
//! of `max_concurrent` permits; a permit is released when the owning
//! execution's terminal event is processed.
//!
//! The scheduler never retries a test and never dies with a child: an
//! execution failure is recorded as `Exception` and the loop continues.

use crate::cancel::CancellationToken;
use crate::execution::{ExecArgs, ExecEvent, ExecEventKind, run_execution};
use crate::ports::{Ports, SchedulerSettings};
use crate::record::TestRecord;
use probe_core::{QueueStatus, TestId, TestState, TestStatus};
use probe_error::ErrorCode;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Command inbox capacity.
pub(crate) const CMD_CAPACITY: usize = 64;

/// Execution event inbox capacity.
const EVENT_CAPACITY: usize = 64;

/// Errors surfaced by [`SchedulerHandle`] asks.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// No record exists for the id.
    #[error("test {0} not found")]
    NotFound(TestId),

    /// The scheduler is not running (or restarting).
    #[error("scheduler is unavailable")]
    Unavailable,

    /// The ask deadline passed without a reply.
    #[error("scheduler ask timed out")]
    AskTimeout,
}

/// Reply to `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartReply {
    /// The test was accepted and will be admitted when a slot frees up.
    Accepted,
    /// The request was refused; the record is unchanged.
    Rejected {
        /// Why the request was refused.
        reason: String,
    },
}

/// Reply to `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReply {
    /// Cancellation was requested (or applied directly).
    Cancelled,
    /// The record is already terminal; nothing changed.
    NoOp,
}

pub(crate) enum SchedulerCmd {
    Initialize {
        reply: oneshot::Sender<TestId>,
    },
    Start {
        test_id: TestId,
        bucket: String,
        test_type: Option<String>,
        reply: oneshot::Sender<StartReply>,
    },
    Status {
        test_id: TestId,
        reply: oneshot::Sender<Result<TestStatus, SchedulerError>>,
    },
    QueueStatus {
        test_id: Option<TestId>,
        reply: oneshot::Sender<QueueStatus>,
    },
    Cancel {
        test_id: TestId,
        reply: oneshot::Sender<Result<CancelReply, SchedulerError>>,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable client to the scheduler actor. Every method is a bounded ask.
///
/// The inner sender is swapped by the guardian when the scheduler restarts,
/// so handles stay valid across restarts (in-memory records do not).
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: Arc<RwLock<mpsc::Sender<SchedulerCmd>>>,
    ask_timeout: Duration,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: Arc<RwLock<mpsc::Sender<SchedulerCmd>>>, ask_timeout: Duration) -> Self {
        Self { tx, ask_timeout }
    }

    async fn ask<T, F>(&self, make: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(oneshot::Sender<T>) -> SchedulerCmd,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sender = self.tx.read().await.clone();

        tokio::time::timeout(self.ask_timeout, async move {
            sender
                .send(make(reply_tx))
                .await
                .map_err(|_| SchedulerError::Unavailable)?;
            reply_rx.await.map_err(|_| SchedulerError::Unavailable)
        })
        .await
        .map_err(|_| SchedulerError::AskTimeout)?
    }

    /// Create a fresh test record in `Setup` and return its id.
    ///
    /// # Errors
    ///
    /// Only transport errors: the operation itself never fails.
    pub async fn initialize(&self) -> Result<TestId, SchedulerError> {
        self.ask(|reply| SchedulerCmd::Initialize { reply }).await
    }

    /// Ask to run a test. Accepted iff the record exists, is in `Setup`,
    /// and `bucket` is non-empty.
    ///
    /// Does not block on admission: the record stays `Loading` until a
    /// slot frees up.
    ///
    /// # Errors
    ///
    /// Transport errors only; validation failures come back as
    /// [`StartReply::Rejected`].
    pub async fn start(
        &self,
        test_id: TestId,
        bucket: impl Into<String>,
        test_type: Option<String>,
    ) -> Result<StartReply, SchedulerError> {
        let bucket = bucket.into();
        self.ask(|reply| SchedulerCmd::Start {
            test_id,
            bucket,
            test_type,
            reply,
        })
        .await
    }

    /// Snapshot one record.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NotFound`] for unknown ids.
    pub async fn status(&self, test_id: TestId) -> Result<TestStatus, SchedulerError> {
        self.ask(|reply| SchedulerCmd::Status { test_id, reply })
            .await?
    }

    /// Per-state counts across all records, the ids currently in
    /// `Testing`, and optionally one record summary.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    pub async fn queue_status(
        &self,
        test_id: Option<TestId>,
    ) -> Result<QueueStatus, SchedulerError> {
        self.ask(|reply| SchedulerCmd::QueueStatus { test_id, reply })
            .await
    }

    /// Request cancellation. Idempotent: terminal records reply
    /// [`CancelReply::NoOp`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NotFound`] for unknown ids.
    pub async fn cancel(&self, test_id: TestId) -> Result<CancelReply, SchedulerError> {
        self.ask(|reply| SchedulerCmd::Cancel { test_id, reply })
            .await?
    }

    /// Ask the scheduler loop to stop. Fire-and-forget; used for graceful
    /// process shutdown.
    pub async fn shutdown(&self) {
        let sender = self.tx.read().await.clone();
        match sender.try_send(SchedulerCmd::Shutdown) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(cmd)) => {
                let _ = sender.send(cmd).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct ExecutionRef {
    cancel: CancellationToken,
    /// Held for the execution's lifetime; dropped when the terminal event
    /// is processed, which is what frees the admission slot.
    _permit: OwnedSemaphorePermit,
    /// Reports abnormal task death as a `Failed` event.
    _watcher: JoinHandle<()>,
}

pub(crate) struct Scheduler {
    ports: Arc<Ports>,
    settings: SchedulerSettings,
    records: HashMap<TestId, TestRecord>,
    /// Accepted tests waiting for admission, FIFO by `start` time.
    pending: VecDeque<TestId>,
    semaphore: Arc<Semaphore>,
    executions: HashMap<TestId, ExecutionRef>,
    events_tx: mpsc::Sender<ExecEvent>,
    events_rx: mpsc::Receiver<ExecEvent>,
}

impl Scheduler {
    pub(crate) fn new(ports: Arc<Ports>, settings: SchedulerSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent));
        Self {
            ports,
            settings,
            records: HashMap::new(),
            pending: VecDeque::new(),
            semaphore,
            executions: HashMap::new(),
            events_tx,
            events_rx,
        }
    }

    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::Receiver<SchedulerCmd>) {
        info!(
            target: "probe.scheduler",
            max_concurrent = self.settings.max_concurrent,
            "scheduler up"
        );

        let sweep_period = match self.settings.retention {
            Some(retention) => {
                (retention / 2).clamp(Duration::from_millis(200), Duration::from_secs(60))
            }
            None => Duration::from_secs(3600),
        };
        let mut sweep = tokio::time::interval(sweep_period);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SchedulerCmd::Shutdown) | None => break,
                    Some(cmd) => self.handle_cmd(cmd),
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = sweep.tick() => self.sweep_terminal(),
            }
        }

        // Shutting down: request cancellation of whatever is still running.
        for exec in self.executions.values() {
            exec.cancel.cancel();
        }
        info!(target: "probe.scheduler", "scheduler stopped");
    }

    // -- Commands -------------------------------------------------------

    fn handle_cmd(&mut self, cmd: SchedulerCmd) {
        match cmd {
            SchedulerCmd::Initialize { reply } => {
                let test_id = TestId::new_v4();
                self.records.insert(test_id, TestRecord::new());
                debug!(target: "probe.scheduler", test_id = %test_id, "test initialised");
                let _ = reply.send(test_id);
            }

            SchedulerCmd::Start {
                test_id,
                bucket,
                test_type,
                reply,
            } => {
                let _ = reply.send(self.handle_start(test_id, bucket, test_type));
            }

            SchedulerCmd::Status { test_id, reply } => {
                let outcome = self
                    .records
                    .get(&test_id)
                    .map(|record| record.snapshot(test_id))
                    .ok_or(SchedulerError::NotFound(test_id));
                let _ = reply.send(outcome);
            }

            SchedulerCmd::QueueStatus { test_id, reply } => {
                let _ = reply.send(self.queue_status(test_id));
            }

            SchedulerCmd::Cancel { test_id, reply } => {
                let _ = reply.send(self.handle_cancel(test_id));
            }

            SchedulerCmd::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn handle_start(
        &mut self,
        test_id: TestId,
        bucket: String,
        test_type: Option<String>,
    ) -> StartReply {
        let Some(record) = self.records.get_mut(&test_id) else {
            return StartReply::Rejected {
                reason: format!("test {test_id} not found"),
            };
        };
        if record.state != TestState::Setup {
            return StartReply::Rejected {
                reason: format!("test is in state '{}', expected 'setup'", record.state),
            };
        }
        if bucket.is_empty() {
            return StartReply::Rejected {
                reason: "bucket must not be empty".into(),
            };
        }

        record.bucket = Some(bucket);
        record.test_type = test_type;
        record.started_at = Some(chrono::Utc::now());
        record.transition(test_id, TestState::Loading);
        self.pending.push_back(test_id);
        info!(target: "probe.scheduler", test_id = %test_id, "test accepted");

        self.try_admit();
        StartReply::Accepted
    }

    fn handle_cancel(&mut self, test_id: TestId) -> Result<CancelReply, SchedulerError> {
        let Some(record) = self.records.get_mut(&test_id) else {
            return Err(SchedulerError::NotFound(test_id));
        };

        if record.state.is_terminal() {
            return Ok(CancelReply::NoOp);
        }

        if let Some(exec) = self.executions.get(&test_id) {
            // A live execution acknowledges at its next phase boundary; the
            // record transitions when the ack arrives.
            exec.cancel.cancel();
            info!(target: "probe.scheduler", test_id = %test_id, "cancellation requested");
            return Ok(CancelReply::Cancelled);
        }

        // No execution: Setup, or Loading while waiting for admission.
        self.pending.retain(|id| id != &test_id);
        record.transition(test_id, TestState::Cancelled);
        info!(target: "probe.scheduler", test_id = %test_id, "cancelled before admission");
        Ok(CancelReply::Cancelled)
    }

    fn queue_status(&self, test_id: Option<TestId>) -> QueueStatus {
        let mut status = QueueStatus::default();
        for (id, record) in &self.records {
            match record.state {
                TestState::Setup => status.setup += 1,
                TestState::Loading => status.loading += 1,
                TestState::Loaded => status.loaded += 1,
                TestState::Testing => {
                    status.testing += 1;
                    status.currently_testing.push(*id);
                }
                TestState::Completed => status.completed += 1,
                TestState::Exception => status.exception += 1,
                TestState::Cancelled => status.cancelled += 1,
            }
        }
        status.currently_testing.sort_unstable();
        status.record = test_id.and_then(|id| {
            self.records
                .get(&id)
                .map(|record| record.snapshot(id))
        });
        status
    }

    // -- Admission ------------------------------------------------------

    fn try_admit(&mut self) {
        while let Some(&test_id) = self.pending.front() {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };
            self.pending.pop_front();

            // The record may have been cancelled while waiting.
            let Some(record) = self.records.get(&test_id) else {
                continue;
            };
            if record.state != TestState::Loading {
                continue;
            }
            let Some(bucket) = record.bucket.clone() else {
                continue;
            };
            let test_type = record.test_type.clone();

            self.spawn_execution(test_id, bucket, test_type, permit);
        }
    }

    fn spawn_execution(
        &mut self,
        test_id: TestId,
        bucket: String,
        test_type: Option<String>,
        permit: OwnedSemaphorePermit,
    ) {
        let cancel = CancellationToken::new();
        let args = ExecArgs {
            test_id,
            bucket,
            test_type,
            ports: Arc::clone(&self.ports),
            settings: self.settings.clone(),
            cancel: cancel.clone(),
            events: self.events_tx.clone(),
        };

        let task = tokio::spawn(run_execution(args));

        // Abnormal death (panic/abort) still becomes a single terminal
        // event; normal paths have already sent theirs by the time the task
        // ends, and the record's state machine drops duplicates.
        let events = self.events_tx.clone();
        let watcher = tokio::spawn(async move {
            if let Err(join_err) = task.await {
                let _ = events
                    .send(ExecEvent {
                        test_id,
                        kind: ExecEventKind::Failed {
                            code: ErrorCode::Internal,
                            message: format!("execution aborted: {join_err}"),
                        },
                    })
                    .await;
            }
        });

        self.executions.insert(
            test_id,
            ExecutionRef {
                cancel,
                _permit: permit,
                _watcher: watcher,
            },
        );
        info!(target: "probe.scheduler", test_id = %test_id, "execution admitted");
    }

    // -- Execution events -----------------------------------------------

    fn handle_event(&mut self, event: ExecEvent) {
        let test_id = event.test_id;
        let Some(record) = self.records.get_mut(&test_id) else {
            warn!(target: "probe.scheduler", test_id = %test_id, "event for unknown record dropped");
            return;
        };

        match event.kind {
            ExecEventKind::Loaded => {
                record.transition(test_id, TestState::Loaded);
            }
            ExecEventKind::Initialized => {
                record.transition(test_id, TestState::Testing);
            }
            ExecEventKind::Result {
                report,
                upload_error,
            } => {
                let next = if report.passed {
                    TestState::Completed
                } else {
                    TestState::Exception
                };
                if record.transition(test_id, next) {
                    if !report.passed {
                        let reason = report
                            .error
                            .clone()
                            .unwrap_or_else(|| "scenarios failed".to_string());
                        record.push_error(reason);
                    }
                    record.result = Some(report);
                    if let Some(upload_error) = upload_error {
                        record.push_error(format!("evidence upload failed: {upload_error}"));
                    }
                }
                self.finish_execution(test_id);
            }
            ExecEventKind::Failed { code, message } => {
                if record.transition(test_id, TestState::Exception) {
                    record.push_error(format!("[{code}] {message}"));
                }
                self.finish_execution(test_id);
            }
            ExecEventKind::CancelAck {
                report,
                upload_error,
            } => {
                if record.transition(test_id, TestState::Cancelled) {
                    record.result = report;
                    if let Some(upload_error) = upload_error {
                        record.push_error(format!("evidence upload failed: {upload_error}"));
                    }
                }
                self.finish_execution(test_id);
            }
        }
    }

    /// Release the execution (and its admission permit), then admit the
    /// next waiting test.
    fn finish_execution(&mut self, test_id: TestId) {
        self.executions.remove(&test_id);
        self.try_admit();
    }

    // -- Retention ------------------------------------------------------

    fn sweep_terminal(&mut self) {
        let Some(retention) = self.settings.retention else {
            return;
        };
        let now = chrono::Utc::now();
        let retention = match chrono::Duration::from_std(retention) {
            Ok(d) => d,
            Err(_) => return,
        };
        let before = self.records.len();
        self.records.retain(|_, record| {
            !(record.state.is_terminal()
                && record
                    .ended_at
                    .is_some_and(|ended| now - ended > retention))
        });
        let evicted = before - self.records.len();
        if evicted > 0 {
            debug!(target: "probe.scheduler", evicted, "terminal records evicted");
        }
    }
}
