// SPDX-License-Identifier: MIT OR Apache-2.0
//! Admission, backpressure, retention, and shutdown behavior.

mod common;

use common::{STANDARD_MANIFEST, harness_with, wait_for_state, wait_for_terminal};
use probe_core::TestState;
use probe_runner::{ScenarioContext, ScriptedRuntime, write_report};
use probe_scheduler::SchedulerSettings;
use probe_vault::MemoryVault;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A runner that parks run number `n` until the release counter exceeds `n`.
fn gated_runner() -> (Arc<AtomicUsize>, ScriptedRuntime) {
    let released = Arc::new(AtomicUsize::new(0));
    let in_runner = Arc::clone(&released);
    let sequence = Arc::new(AtomicUsize::new(0));
    let runtime = ScriptedRuntime::new(move |ctx: &ScenarioContext| {
        let my_slot = sequence.fetch_add(1, Ordering::SeqCst);
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while in_runner.load(Ordering::SeqCst) <= my_slot {
            assert!(std::time::Instant::now() < deadline, "gate never opened");
            std::thread::sleep(Duration::from_millis(5));
        }
        let report = probe_core::ScenarioReport::passing(1, 1);
        write_report(&ctx.evidence_dir, &report)?;
        Ok(report)
    });
    (released, runtime)
}

fn serial_settings() -> SchedulerSettings {
    SchedulerSettings {
        max_concurrent: 1,
        ..SchedulerSettings::default()
    }
}

// -- Scenario: admission backpressure ---------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn second_test_waits_in_loading_until_the_first_finishes() {
    let (released, runtime) = gated_runner();
    let h = harness_with(
        Arc::new(runtime),
        MemoryVault::with_default(common::default_credentials()),
        serial_settings(),
    );
    h.storage.put_standard_bucket("b://ok", STANDARD_MANIFEST).await;

    let first = h.handle.initialize().await.unwrap();
    let second = h.handle.initialize().await.unwrap();
    h.handle.start(first, "b://ok", None).await.unwrap();
    h.handle.start(second, "b://ok", None).await.unwrap();

    // First occupies the only slot; second must sit in Loading.
    wait_for_state(&h.handle, first, TestState::Testing).await;
    let waiting = h.handle.status(second).await.unwrap();
    assert_eq!(waiting.state, TestState::Loading);

    let qs = h.handle.queue_status(None).await.unwrap();
    assert_eq!(qs.testing, 1);
    assert_eq!(qs.loading, 1);
    assert_eq!(qs.currently_testing, vec![first]);

    // Release the first; the second gets the slot and runs.
    released.fetch_add(1, Ordering::SeqCst);
    let done = wait_for_terminal(&h.handle, first).await;
    assert_eq!(done.state, TestState::Completed);

    wait_for_state(&h.handle, second, TestState::Testing).await;
    released.fetch_add(1, Ordering::SeqCst);
    let done = wait_for_terminal(&h.handle, second).await;
    assert_eq!(done.state, TestState::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn admitted_executions_never_exceed_the_budget() {
    let (released, runtime) = gated_runner();
    let settings = SchedulerSettings {
        max_concurrent: 2,
        ..SchedulerSettings::default()
    };
    let h = harness_with(
        Arc::new(runtime),
        MemoryVault::with_default(common::default_credentials()),
        settings,
    );
    h.storage.put_standard_bucket("b://ok", STANDARD_MANIFEST).await;

    let mut ids = Vec::new();
    for _ in 0..5 {
        let id = h.handle.initialize().await.unwrap();
        h.handle.start(id, "b://ok", None).await.unwrap();
        ids.push(id);
    }

    // Sample the queue repeatedly while releasing one run at a time: the
    // states only reachable with a live execution never exceed the budget.
    for _ in 0..5 {
        for _ in 0..20 {
            let qs = h.handle.queue_status(None).await.unwrap();
            assert!(
                qs.loaded + qs.testing <= 2,
                "admission budget exceeded: {} loaded, {} testing",
                qs.loaded,
                qs.testing
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        released.fetch_add(1, Ordering::SeqCst);
    }

    for id in ids {
        let status = wait_for_terminal(&h.handle, id).await;
        assert_eq!(status.state, TestState::Completed);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_a_waiting_test_frees_no_slot_but_terminates_it() {
    let (released, runtime) = gated_runner();
    let h = harness_with(
        Arc::new(runtime),
        MemoryVault::with_default(common::default_credentials()),
        serial_settings(),
    );
    h.storage.put_standard_bucket("b://ok", STANDARD_MANIFEST).await;

    let first = h.handle.initialize().await.unwrap();
    let second = h.handle.initialize().await.unwrap();
    let third = h.handle.initialize().await.unwrap();
    h.handle.start(first, "b://ok", None).await.unwrap();
    h.handle.start(second, "b://ok", None).await.unwrap();
    h.handle.start(third, "b://ok", None).await.unwrap();
    wait_for_state(&h.handle, first, TestState::Testing).await;

    // Cancel the waiting second test: immediate terminal, no execution ever.
    h.handle.cancel(second).await.unwrap();
    let status = h.handle.status(second).await.unwrap();
    assert_eq!(status.state, TestState::Cancelled);
    assert!(status.ended_at.is_some());

    // FIFO continues with the third.
    released.fetch_add(1, Ordering::SeqCst);
    wait_for_terminal(&h.handle, first).await;
    wait_for_state(&h.handle, third, TestState::Testing).await;
    released.fetch_add(1, Ordering::SeqCst);
    let done = wait_for_terminal(&h.handle, third).await;
    assert_eq!(done.state, TestState::Completed);
}

// -- Retention ---------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn terminal_records_are_evicted_after_retention() {
    let settings = SchedulerSettings {
        retention: Some(Duration::from_millis(300)),
        ..SchedulerSettings::default()
    };
    let h = harness_with(
        Arc::new(ScriptedRuntime::passing(1)),
        MemoryVault::with_default(common::default_credentials()),
        settings,
    );
    h.storage.put_standard_bucket("b://ok", STANDARD_MANIFEST).await;

    let id = h.handle.initialize().await.unwrap();
    h.handle.start(id, "b://ok", None).await.unwrap();
    wait_for_terminal(&h.handle, id).await;

    // Eventually swept; poll rather than assume sweep timing.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match h.handle.status(id).await {
            Err(probe_scheduler::SchedulerError::NotFound(_)) => break,
            Ok(_) => {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "terminal record was never evicted"
                );
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn without_retention_terminal_records_stay() {
    let h = harness_with(
        Arc::new(ScriptedRuntime::passing(1)),
        MemoryVault::with_default(common::default_credentials()),
        SchedulerSettings::default(),
    );
    h.storage.put_standard_bucket("b://ok", STANDARD_MANIFEST).await;

    let id = h.handle.initialize().await.unwrap();
    h.handle.start(id, "b://ok", None).await.unwrap();
    wait_for_terminal(&h.handle, id).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.handle.status(id).await.is_ok());
}

// -- Shutdown ----------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn graceful_shutdown_completes_the_guardian() {
    let h = harness_with(
        Arc::new(ScriptedRuntime::passing(1)),
        MemoryVault::with_default(common::default_credentials()),
        SchedulerSettings::default(),
    );
    h.handle.shutdown().await;
    let outcome = h.guardian.await.unwrap();
    assert!(outcome.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn asks_after_shutdown_are_unavailable() {
    let h = harness_with(
        Arc::new(ScriptedRuntime::passing(1)),
        MemoryVault::with_default(common::default_credentials()),
        SchedulerSettings::default(),
    );
    h.handle.shutdown().await;
    h.guardian.await.unwrap().unwrap();

    let err = h.handle.initialize().await.unwrap_err();
    assert_eq!(err, probe_scheduler::SchedulerError::Unavailable);
}
