//! Integration tests for compensation verdicts and rollback.

mod common;

use common::{input_map, Recorder};
use saga_flow::{
    ArgumentSource, CompensationVerdict, InputSpec, Step, StepError, WorkflowBuilder,
    WorkflowConfig, WorkflowState,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn failing(name: &str) -> Step {
    Step::from_fn(name, |_a, _c| async move {
        Err::<Value, _>(StepError::failed("boom"))
    })
}

#[tokio::test]
async fn test_retry_verdict_until_success() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = Arc::clone(&attempts);

    let workflow = WorkflowBuilder::new("retry")
        .step(
            Step::from_fn("flaky", move |_a, _c| {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StepError::failed("transient"))
                    } else {
                        Ok(json!("finally"))
                    }
                }
            })
            .compensate_fn(|_e, _a, _c| async move { Ok(CompensationVerdict::Retry) })
            .with_max_retries(2),
        )
        .returns("flaky")
        .build()
        .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Completed);
    assert_eq!(result.return_value, Some(json!("finally")));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // Recovered failures do not appear in the error list.
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_retries_exhausted_aborts() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = Arc::clone(&attempts);

    let workflow = WorkflowBuilder::new("exhausted")
        .step(
            Step::from_fn("hopeless", move |_a, _c| {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<Value, _>(StepError::failed("permanent"))
                }
            })
            .compensate_fn(|_e, _a, _c| async move { Ok(CompensationVerdict::Retry) })
            .with_max_retries(1),
        )
        .build()
        .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Failed);
    // Initial attempt plus one honored retry.
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].step.as_deref(), Some("hopeless"));
}

#[tokio::test]
async fn test_skip_verdict_resolves_null_for_dependents() {
    let workflow = WorkflowBuilder::new("skip")
        .step(failing("optional").compensate_fn(|_e, _a, _c| async move {
            Ok(CompensationVerdict::Skip)
        }))
        .step(
            Step::from_fn("reader", |args, _c| async move {
                Ok(json!({ "saw": args.require("v")? }))
            })
            .arg("v", ArgumentSource::FromStep("optional".into())),
        )
        .returns("reader")
        .build()
        .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Completed);
    assert!(result.outcomes["optional"].success);
    assert!(result.outcomes["optional"].data.is_none());
    assert_eq!(result.return_value, Some(json!({ "saw": Value::Null })));
}

#[tokio::test]
async fn test_continue_verdict_substitutes_value() {
    let workflow = WorkflowBuilder::new("fallback")
        .step(failing("primary").compensate_fn(|_e, _a, _c| async move {
            Ok(CompensationVerdict::Continue(json!("cached")))
        }))
        .returns("primary")
        .build()
        .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Completed);
    assert_eq!(result.return_value, Some(json!("cached")));
}

#[tokio::test]
async fn test_abort_rolls_back_in_reverse_completion_order() {
    let undone: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let undoable = |name: &str| {
        let undone = Arc::clone(&undone);
        let name_owned = name.to_string();
        Step::from_fn(name, |_a, _c| async move { Ok(json!("created")) }).undo_fn(
            move |_o, _a, _c| {
                let undone = Arc::clone(&undone);
                let name = name_owned.clone();
                async move {
                    undone.lock().unwrap().push(name);
                    Ok(())
                }
            },
        )
    };

    let workflow = WorkflowBuilder::chain(
        "provision",
        vec![undoable("reserve"), undoable("charge"), failing("ship")],
    )
    .build()
    .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    // Backward recovery ran, but the run itself failed.
    assert_eq!(result.state, WorkflowState::Failed);
    assert_eq!(*undone.lock().unwrap(), ["charge", "reserve"]);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].step.as_deref(), Some("ship"));
}

#[tokio::test]
async fn test_automatic_rollback_keeps_failed_state() {
    let undo_calls = Arc::new(AtomicUsize::new(0));
    let undo_calls_clone = Arc::clone(&undo_calls);

    let workflow = WorkflowBuilder::chain(
        "aborted",
        vec![
            Step::from_fn("create", |_a, _c| async move { Ok(json!("resource")) }).undo_fn(
                move |_o, _a, _c| {
                    let undo_calls = Arc::clone(&undo_calls_clone);
                    async move {
                        undo_calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            ),
            failing("fatal"),
        ],
    )
    .build()
    .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    // Undo ran exactly once, but the run still resolves as Failed;
    // RolledBack is reserved for an explicit rollback() call.
    assert_eq!(result.state, WorkflowState::Failed);
    assert_eq!(workflow.last_state(), WorkflowState::Failed);
    assert_eq!(undo_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rollback_undoes_created_files() {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();

    let file_step = |name: &str| {
        let path = dir_path.join(name);
        let write_path = path.clone();
        let undo_path = path.clone();
        Step::from_fn(name, move |_a, _c| {
            let path = write_path.clone();
            async move {
                tokio::fs::write(&path, b"resource").await?;
                Ok(json!(path.to_string_lossy()))
            }
        })
        .undo_fn(move |_o, _a, _c| {
            let path = undo_path.clone();
            async move {
                tokio::fs::remove_file(&path).await?;
                Ok(())
            }
        })
    };

    let workflow = WorkflowBuilder::chain(
        "files",
        vec![file_step("first.txt"), file_step("second.txt"), failing("explode")],
    )
    .build()
    .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Failed);
    assert!(!dir_path.join("first.txt").exists());
    assert!(!dir_path.join("second.txt").exists());
}

#[tokio::test]
async fn test_skip_resolved_step_is_not_undone() {
    let undone = Arc::new(AtomicUsize::new(0));
    let undone_clone = Arc::clone(&undone);

    let workflow = WorkflowBuilder::chain(
        "partial",
        vec![
            failing("optional")
                .compensate_fn(|_e, _a, _c| async move { Ok(CompensationVerdict::Skip) })
                .undo_fn(move |_o, _a, _c| {
                    let undone = Arc::clone(&undone_clone);
                    async move {
                        undone.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            failing("fatal"),
        ],
    )
    .build()
    .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    // The Skip-resolved step performed no real work, so nothing to undo.
    assert_eq!(result.state, WorkflowState::Failed);
    assert_eq!(undone.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_step_timeout_routed_through_compensation() {
    let workflow = WorkflowBuilder::new("slow-step")
        .step(
            Step::from_fn("slow", |_a, _c| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(json!("too late"))
            })
            .with_timeout(Duration::from_millis(20))
            .compensate_fn(|error, _a, _c| async move {
                if error.is_timeout() {
                    Ok(CompensationVerdict::Continue(json!("timed-out-fallback")))
                } else {
                    Ok(CompensationVerdict::Abort)
                }
            }),
        )
        .returns("slow")
        .build()
        .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Completed);
    assert_eq!(result.return_value, Some(json!("timed-out-fallback")));
}

#[tokio::test]
async fn test_workflow_timeout_fails_without_auto_rollback() {
    let undone = Arc::new(AtomicUsize::new(0));
    let undone_clone = Arc::clone(&undone);

    let workflow = WorkflowBuilder::new("deadline")
        .configure(WorkflowConfig::new().with_timeout(Duration::from_millis(30)))
        .step(
            Step::from_fn("quick", |_a, _c| async move { Ok(json!("done")) }).undo_fn(
                move |_o, _a, _c| {
                    let undone = Arc::clone(&undone_clone);
                    async move {
                        undone.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            ),
        )
        .step(
            Step::from_fn("slow", |_a, _c| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!("late"))
            })
            .depends_on("quick"),
        )
        .step(Step::from_fn("never", |_a, _c| async move { Ok(Value::Null) }).depends_on("slow"))
        .build()
        .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Failed);
    assert_eq!(undone.load(Ordering::SeqCst), 0);
    // The running step drained; the gated one never launched.
    assert!(result.outcomes.contains_key("slow"));
    assert!(!result.outcomes.contains_key("never"));
    assert!(result
        .errors
        .iter()
        .any(|e| e.step.is_none() && e.message.contains("timeout")));

    // Completed work can still be undone manually.
    let report = workflow.rollback().await;
    assert!(report.undone.contains(&"quick".to_string()));
    assert!(undone.load(Ordering::SeqCst) >= 1);
    assert_eq!(workflow.last_state(), WorkflowState::RolledBack);

    // The log drained, so a second pass is a no-op.
    let again = workflow.rollback().await;
    assert_eq!(again.total_processed(), 0);
}

#[tokio::test]
async fn test_cancellation_stops_new_launches() {
    let workflow = Arc::new(
        WorkflowBuilder::chain(
            "cancellable",
            vec![
                Step::from_fn("first", |_a, _c| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("first"))
                }),
                Step::from_fn("second", |_a, _c| async move { Ok(json!("second")) }),
            ],
        )
        .build()
        .unwrap(),
    );

    let canceller = Arc::clone(&workflow);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Failed);
    // The running step drained normally; the next never launched.
    assert_eq!(result.outcomes["first"].value(), json!("first"));
    assert!(!result.outcomes.contains_key("second"));
    assert!(result
        .errors
        .iter()
        .any(|e| e.step.is_none() && e.message.contains("cancelled")));
}

#[tokio::test]
async fn test_cancelled_handle_reusable_for_fresh_runs() {
    let workflow = Arc::new(
        WorkflowBuilder::chain(
            "reusable",
            vec![
                Step::from_fn("first", |_a, _c| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("first"))
                }),
                Step::from_fn("second", |_a, _c| async move { Ok(json!("second")) }),
            ],
        )
        .build()
        .unwrap(),
    );

    let canceller = Arc::clone(&workflow);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let cancelled = workflow.execute(Default::default()).await.unwrap();
    assert_eq!(cancelled.state, WorkflowState::Failed);

    // The cancel applied to that run only; a fresh run completes.
    let rerun = workflow.execute(Default::default()).await.unwrap();
    assert_eq!(rerun.state, WorkflowState::Completed);
    assert_eq!(rerun.outcomes["second"].value(), json!("second"));
}

#[tokio::test]
async fn test_drain_failure_reported_to_middleware() {
    let recorder = Arc::new(Recorder::default());
    let workflow = WorkflowBuilder::new("drain-errors")
        .configure(WorkflowConfig::new().with_timeout(Duration::from_millis(20)))
        .step(Step::from_fn("doomed", |_a, _c| async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Err::<Value, _>(StepError::failed("late failure"))
        }))
        .middleware_arc(recorder.clone())
        .build()
        .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();
    assert_eq!(result.state, WorkflowState::Failed);

    // Both the deadline and the step that failed while draining reach
    // handle_error.
    let events = recorder.events();
    assert!(events.contains(&"error:<workflow>".to_string()), "events: {events:?}");
    assert!(events.contains(&"error:doomed".to_string()), "events: {events:?}");
}

#[tokio::test]
async fn test_compensator_failure_is_implicit_abort() {
    let workflow = WorkflowBuilder::new("bad-compensator")
        .step(failing("flaky").compensate_fn(|_e, _a, _c| async move {
            Err::<CompensationVerdict, _>(StepError::failed("compensator crashed"))
        }))
        .build()
        .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Failed);
    assert!(result
        .errors
        .iter()
        .any(|e| e.message.contains("compensation failed")));
}

#[tokio::test]
async fn test_failed_undo_recorded_in_result_errors() {
    let workflow = WorkflowBuilder::chain(
        "sticky",
        vec![
            Step::from_fn("held", |_a, _c| async move { Ok(json!("resource")) }).undo_fn(
                |_o, _a, _c| async move {
                    Err(StepError::failed("release rejected"))
                },
            ),
            failing("fatal"),
        ],
    )
    .build()
    .unwrap();

    let result = workflow.execute(Default::default()).await.unwrap();

    assert_eq!(result.state, WorkflowState::Failed);
    assert!(result
        .errors
        .iter()
        .any(|e| e.step.as_deref() == Some("held") && e.message.contains("rollback failed")));
}

#[tokio::test]
async fn test_compensator_receives_arguments_and_inputs() {
    let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);

    let workflow = WorkflowBuilder::new("informed")
        .input(InputSpec::required("order_id"))
        .step(
            Step::from_fn("charge", |_a, _c| async move {
                Err::<Value, _>(StepError::failed("card declined"))
            })
            .arg("order", ArgumentSource::FromInput("order_id".into()))
            .compensate_fn(move |_e, args, _c| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    *seen.lock().unwrap() = Some(args.require("order")?.clone());
                    Ok(CompensationVerdict::Skip)
                }
            }),
        )
        .build()
        .unwrap();

    let result = workflow
        .execute(input_map(&[("order_id", json!("ord-42"))]))
        .await
        .unwrap();

    assert_eq!(result.state, WorkflowState::Completed);
    assert_eq!(seen.lock().unwrap().clone(), Some(json!("ord-42")));
}
