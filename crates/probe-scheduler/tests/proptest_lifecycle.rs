// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests over randomized command interleavings: every started test
//! reaches exactly one stable terminal state with a consistent record.

mod common;

use common::{STANDARD_MANIFEST, harness, wait_for_terminal};
use probe_runner::ScriptedRuntime;
use proptest::prelude::*;
use std::sync::Arc;

/// One randomized client action.
#[derive(Debug, Clone)]
enum Action {
    InitializeOnly,
    Start { cancel_after: bool },
    StartEmptyBucket,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::InitializeOnly),
        any::<bool>().prop_map(|cancel_after| Action::Start { cancel_after }),
        Just(Action::StartEmptyBucket),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn randomized_lifecycles_settle_into_one_stable_terminal_state(
        actions in proptest::collection::vec(action_strategy(), 1..12)
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let h = harness(Arc::new(ScriptedRuntime::passing(1)));
            h.storage.put_standard_bucket("b://ok", STANDARD_MANIFEST).await;

            let mut started = Vec::new();
            let mut idle = Vec::new();

            for action in &actions {
                let id = h.handle.initialize().await.unwrap();
                match action {
                    Action::InitializeOnly => idle.push(id),
                    Action::StartEmptyBucket => {
                        let reply = h.handle.start(id, "", None).await.unwrap();
                        let is_rejected =
                            matches!(reply, probe_scheduler::StartReply::Rejected { .. });
                        prop_assert!(is_rejected);
                        idle.push(id);
                    }
                    Action::Start { cancel_after } => {
                        let reply = h.handle.start(id, "b://ok", None).await.unwrap();
                        prop_assert_eq!(reply, probe_scheduler::StartReply::Accepted);
                        if *cancel_after {
                            let _ = h.handle.cancel(id).await.unwrap();
                        }
                        started.push(id);
                    }
                }
            }

            // Every started test settles into a terminal state...
            for id in &started {
                let status = wait_for_terminal(&h.handle, *id).await;
                prop_assert!(status.state.is_terminal());
                prop_assert!(status.ended_at.is_some(), "ended_at must be set on terminal");

                // ...which is stable: further cancels and queries change nothing.
                let _ = h.handle.cancel(*id).await.unwrap();
                let again = h.handle.status(*id).await.unwrap();
                prop_assert_eq!(again.state, status.state, "terminal state moved");
                prop_assert_eq!(again.ended_at, status.ended_at, "ended_at moved");
            }

            // Never-started records stay in Setup (or cancelled-by-test) and
            // carry no timestamps.
            for id in &idle {
                let status = h.handle.status(*id).await.unwrap();
                prop_assert_eq!(status.state, probe_core::TestState::Setup);
                prop_assert!(status.ended_at.is_none());
            }

            // The queue totals add up.
            let qs = h.handle.queue_status(None).await.unwrap();
            prop_assert_eq!(qs.total(), started.len() + idle.len());

            Ok(())
        })?;
    }
}
