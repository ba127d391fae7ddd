// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The per-test execution state machine.
//!
//! One task per admitted test, progressing strictly forward:
//! fetch artifacts → fetch credentials → start streams → run scenarios →
//! upload evidence → terminate. Progress and exactly one terminal event go
//! back to the scheduler as messages.
//!
//! Cancellation is cooperative: the flag is observed at phase boundaries,
//! in-flight port calls are allowed to complete, and the cancel path still
//! uploads whatever evidence exists. The scratch workspace is owned by this
//! task and dropped on every exit path, including panics.

use crate::cancel::CancellationToken;
use crate::ports::{Ports, SchedulerSettings};
use probe_broker::{ConsumerSpec, ProducerSpec};
use probe_core::{ScenarioReport, TestId, TopicManifest, TopicRole};
use probe_error::ErrorCode;
use probe_runner::ScenarioContext;
use probe_storage::StorageError;
use probe_streams::{
    ConsumerStreamConfig, ProducerStreamConfig, StreamSet, spawn_consumer_stream,
    spawn_producer_stream,
};
use probe_vault::VaultError;
use probe_workspace::ScratchWorkspace;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Progress and terminal events an execution reports to the scheduler.
#[derive(Debug)]
pub(crate) struct ExecEvent {
    pub test_id: TestId,
    pub kind: ExecEventKind,
}

#[derive(Debug)]
pub(crate) enum ExecEventKind {
    /// Artifacts and credentials fetched.
    Loaded,
    /// Streams up; scenarios about to run.
    Initialized,
    /// The scenario runtime returned a result record. Terminal.
    Result {
        report: ScenarioReport,
        upload_error: Option<String>,
    },
    /// The execution failed at some phase. Terminal.
    Failed { code: ErrorCode, message: String },
    /// Cancellation observed and honoured. Terminal.
    CancelAck {
        report: Option<ScenarioReport>,
        upload_error: Option<String>,
    },
}

/// Everything an execution task needs.
pub(crate) struct ExecArgs {
    pub test_id: TestId,
    pub bucket: String,
    pub test_type: Option<String>,
    pub ports: Arc<Ports>,
    pub settings: SchedulerSettings,
    pub cancel: CancellationToken,
    pub events: mpsc::Sender<ExecEvent>,
}

/// Drive one test to a terminal event.
pub(crate) async fn run_execution(args: ExecArgs) {
    let test_id = args.test_id;
    let kind = drive(&args).await;
    debug!(target: "probe.exec", test_id = %test_id, terminal = ?kind_name(&kind), "execution terminating");
    let _ = args.events.send(ExecEvent { test_id, kind }).await;
}

fn kind_name(kind: &ExecEventKind) -> &'static str {
    match kind {
        ExecEventKind::Loaded => "loaded",
        ExecEventKind::Initialized => "initialized",
        ExecEventKind::Result { .. } => "result",
        ExecEventKind::Failed { .. } => "failed",
        ExecEventKind::CancelAck { .. } => "cancel-ack",
    }
}

async fn drive(args: &ExecArgs) -> ExecEventKind {
    if args.cancel.is_cancelled() {
        return ExecEventKind::CancelAck {
            report: None,
            upload_error: None,
        };
    }

    // ── FetchingArtifacts ───────────────────────────────────────────
    let workspace = match args
        .ports
        .storage
        .fetch(args.test_id, &args.bucket, args.settings.layout.clone())
        .await
    {
        Ok(workspace) => workspace,
        Err(e) => return failed(map_storage_error(&e), e.to_string()),
    };

    let manifest = match read_manifest(&workspace) {
        Ok(manifest) => manifest,
        Err(kind) => return kind,
    };
    info!(
        target: "probe.exec",
        test_id = %args.test_id,
        topics = manifest.topics.len(),
        features = workspace.list_features().len(),
        "artifacts fetched"
    );

    if args.cancel.is_cancelled() {
        let upload_error = upload_evidence(args, &workspace).await;
        return ExecEventKind::CancelAck {
            report: None,
            upload_error,
        };
    }

    // ── FetchingCredentials ─────────────────────────────────────────
    let credentials = match args
        .ports
        .vault
        .fetch_credentials(args.test_id, &manifest.topics)
        .await
    {
        Ok(credentials) => credentials,
        Err(e) => return failed(map_vault_error(&e), e.to_string()),
    };

    let _ = args
        .events
        .send(ExecEvent {
            test_id: args.test_id,
            kind: ExecEventKind::Loaded,
        })
        .await;

    if args.cancel.is_cancelled() {
        let upload_error = upload_evidence(args, &workspace).await;
        return ExecEventKind::CancelAck {
            report: None,
            upload_error,
        };
    }

    // ── StartingStreams ─────────────────────────────────────────────
    let (streams, stream_tasks) = match start_streams(args, &manifest, credentials).await {
        Ok(started) => started,
        Err(message) => return failed(ErrorCode::StreamStartupFailed, message),
    };
    info!(target: "probe.exec", test_id = %args.test_id, "streams up");

    let _ = args
        .events
        .send(ExecEvent {
            test_id: args.test_id,
            kind: ExecEventKind::Initialized,
        })
        .await;

    if args.cancel.is_cancelled() {
        terminate_streams(&streams, stream_tasks).await;
        let upload_error = upload_evidence(args, &workspace).await;
        return ExecEventKind::CancelAck {
            report: None,
            upload_error,
        };
    }

    // ── Running ─────────────────────────────────────────────────────
    if let Err(e) = workspace.ensure_evidence_dir() {
        terminate_streams(&streams, stream_tasks).await;
        return failed(ErrorCode::Internal, e.to_string());
    }

    let ctx = ScenarioContext {
        test_id: args.test_id,
        workspace_root: workspace.root().to_path_buf(),
        features_dir: workspace.features_dir(),
        evidence_dir: workspace.evidence_dir(),
        test_type: args.test_type.clone(),
        streams: streams.clone(),
    };
    let runner = Arc::clone(&args.ports.runner);

    // The runtime is synchronous from this task's viewpoint; it runs on the
    // blocking pool and its completion re-enters here as a single value.
    let run_outcome = tokio::task::spawn_blocking(move || runner.run(&ctx)).await;

    let report = match run_outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            terminate_streams(&streams, stream_tasks).await;
            return failed(ErrorCode::ScenarioRuntimeFailed, e.to_string());
        }
        Err(join_err) => {
            terminate_streams(&streams, stream_tasks).await;
            return failed(
                ErrorCode::ScenarioRuntimeFailed,
                format!("scenario runtime panicked: {join_err}"),
            );
        }
    };

    // ── UploadingEvidence ───────────────────────────────────────────
    let upload_error = upload_evidence(args, &workspace).await;

    // ── Terminating ─────────────────────────────────────────────────
    terminate_streams(&streams, stream_tasks).await;

    if args.cancel.is_cancelled() {
        // Cancelled mid-run: the in-flight runtime call was allowed to
        // finish; its partial result travels with the ack.
        return ExecEventKind::CancelAck {
            report: Some(report),
            upload_error,
        };
    }

    ExecEventKind::Result {
        report,
        upload_error,
    }
    // `workspace` drops here on every path: scratch root removed.
}

fn failed(code: ErrorCode, message: String) -> ExecEventKind {
    ExecEventKind::Failed { code, message }
}

fn read_manifest(workspace: &ScratchWorkspace) -> Result<TopicManifest, ExecEventKind> {
    let text = workspace
        .read_manifest()
        .map_err(|e| failed(ErrorCode::ManifestInvalid, e.to_string()))?;
    TopicManifest::parse(&text).map_err(|e| failed(ErrorCode::ManifestInvalid, e.to_string()))
}

fn map_storage_error(error: &StorageError) -> ErrorCode {
    match error {
        StorageError::Layout(_) => ErrorCode::BucketLayoutInvalid,
        StorageError::Upload { .. } => ErrorCode::EvidenceUploadFailed,
        StorageError::NotFound { .. } | StorageError::Fetch { .. } => ErrorCode::BucketFetchFailed,
    }
}

fn map_vault_error(error: &VaultError) -> ErrorCode {
    match error {
        VaultError::Incomplete { .. } => ErrorCode::CredentialsIncomplete,
        VaultError::Fetch { .. } | VaultError::NoEntry { .. } => ErrorCode::CredentialsFetchFailed,
    }
}

async fn start_streams(
    args: &ExecArgs,
    manifest: &TopicManifest,
    credentials: Vec<probe_core::Credentials>,
) -> Result<(StreamSet, Vec<JoinHandle<()>>), String> {
    let settings = &args.settings;
    let mut streams = StreamSet::new();
    let mut tasks = Vec::with_capacity(manifest.topics.len());

    for (directive, creds) in manifest.topics.iter().zip(credentials) {
        let bootstrap = directive
            .effective_bootstrap_servers(&settings.default_bootstrap_servers)
            .to_string();

        let started = match directive.role {
            TopicRole::Producer => {
                let spec = ProducerSpec {
                    topic: directive.topic.clone(),
                    bootstrap_servers: bootstrap.clone(),
                    credentials: creds,
                };
                let config = ProducerStreamConfig {
                    topic: directive.topic.clone(),
                    bootstrap_servers: bootstrap,
                    ask_timeout: settings.ask_timeout,
                    stop_flush_timeout: settings.stop_flush_timeout,
                };
                tokio::time::timeout(
                    settings.startup_deadline,
                    spawn_producer_stream(
                        args.ports.broker.as_ref(),
                        spec,
                        args.ports.codec.clone(),
                        config,
                    ),
                )
                .await
                .map(|r| r.map(|(handle, task)| (StreamHandleKind::Producer(handle), task)))
            }
            TopicRole::Consumer => {
                let spec = ConsumerSpec {
                    topic: directive.topic.clone(),
                    bootstrap_servers: bootstrap,
                    credentials: creds,
                    group_id: format!("probe-{}-{}", args.test_id, directive.topic),
                };
                let config = ConsumerStreamConfig {
                    topic: directive.topic.clone(),
                    filters: directive.event_filters.clone(),
                    key_record: settings.key_record.clone(),
                    ask_timeout: settings.ask_timeout,
                    commit_batch_size: settings.commit_batch_size,
                    commit_interval: settings.commit_interval,
                };
                tokio::time::timeout(
                    settings.startup_deadline,
                    spawn_consumer_stream(
                        args.ports.broker.as_ref(),
                        spec,
                        args.ports.codec.clone(),
                        config,
                    ),
                )
                .await
                .map(|r| r.map(|(handle, task)| (StreamHandleKind::Consumer(handle), task)))
            }
        };

        match started {
            Ok(Ok((handle, task))) => {
                match handle {
                    StreamHandleKind::Producer(h) => streams.insert_producer(h),
                    StreamHandleKind::Consumer(h) => streams.insert_consumer(h),
                }
                tasks.push(task);
            }
            Ok(Err(e)) => {
                terminate_streams(&streams, tasks).await;
                return Err(e.to_string());
            }
            Err(_) => {
                terminate_streams(&streams, tasks).await;
                return Err(format!(
                    "stream for topic '{}' did not start within {:?}",
                    directive.topic, settings.startup_deadline
                ));
            }
        }
    }

    Ok((streams, tasks))
}

enum StreamHandleKind {
    Producer(probe_streams::ProducerHandle),
    Consumer(probe_streams::ConsumerHandle),
}

async fn upload_evidence(args: &ExecArgs, workspace: &ScratchWorkspace) -> Option<String> {
    match args
        .ports
        .storage
        .upload(args.test_id, &args.bucket, &workspace.evidence_dir())
        .await
    {
        Ok(()) => None,
        Err(e) => {
            warn!(target: "probe.exec", test_id = %args.test_id, error = %e, "evidence upload failed");
            Some(e.to_string())
        }
    }
}

async fn terminate_streams(streams: &StreamSet, tasks: Vec<JoinHandle<()>>) {
    streams.stop_all().await;
    for task in tasks {
        let _ = task.await;
    }
}
