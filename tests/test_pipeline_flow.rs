//! End-to-end orchestration: passengers flowing through transforms and
//! barrier stages, retries, interruption, and failure fan-out to waiting
//! counted groups.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use convoy::{
    ConvoyError, CountedBarrierController, ManualBarrierController, Pipeline, PipelineConfig,
};

#[tokio::test]
async fn test_transforms_run_in_order() {
    let pipeline = Pipeline::builder(Handle::current())
        .transform("append-a", |s: String| async move { Ok(format!("{s}a")) })
        .transform("append-b", |s: String| async move { Ok(format!("{s}b")) })
        .build();

    let job = pipeline.push("x".to_string()).unwrap();
    let passenger = job.outcome().await.into_completed().unwrap();
    assert_eq!(passenger.data(), "xab");
    assert!(pipeline.repository().is_empty());
}

#[tokio::test]
async fn test_counted_barrier_aggregates_across_passengers() {
    let merge = CountedBarrierController::with_lift_action(
        Handle::current(),
        2,
        |inputs: Vec<i64>| async move {
            let total: i64 = inputs.iter().sum();
            Ok(inputs.into_iter().map(|_| total).collect())
        },
    );

    let pipeline = Pipeline::builder(Handle::current())
        .transform("double", |x: i64| async move { Ok(x * 2) })
        .counted_barrier("merge", merge.clone())
        .build();
    assert_eq!(pipeline.counted_barriers().len(), 1);

    let a = pipeline.push(1).unwrap();
    let b = pipeline.push(2).unwrap();

    // 1*2 + 2*2 = 6, broadcast to both passengers
    assert_eq!(*a.outcome().await.into_completed().unwrap().data(), 6);
    assert_eq!(*b.outcome().await.into_completed().unwrap().data(), 6);
}

#[tokio::test]
async fn test_manual_barrier_release() {
    let gate = ManualBarrierController::new();
    let pipeline = Pipeline::builder(Handle::current())
        .manual_barrier("gate", gate.clone())
        .build();
    assert_eq!(pipeline.manual_barriers().len(), 1);

    let job = pipeline.push("held".to_string()).unwrap();
    while gate.member_count() < 1 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!job.is_finished());

    gate.lift();
    let passenger = job.outcome().await.into_completed().unwrap();
    assert_eq!(passenger.data(), "held");
}

#[tokio::test]
async fn test_manual_interrupt_yields_interrupted_outcome() {
    let gate = ManualBarrierController::new();
    let pipeline = Pipeline::builder(Handle::current())
        .manual_barrier("gate", gate.clone())
        .build();

    let job = pipeline.push("held".to_string()).unwrap();
    while gate.member_count() < 1 {
        tokio::task::yield_now().await;
    }

    gate.interrupt();
    assert!(job.outcome().await.is_interrupted());
}

#[tokio::test]
async fn test_step_retries_until_success() {
    let failures = Arc::new(AtomicU32::new(0));
    let counter = failures.clone();

    let pipeline = Pipeline::builder(Handle::current())
        .transform_with_attempts("flaky", 3, move |x: i32| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient")
                }
                Ok(x + 1)
            }
        })
        .build();

    let job = pipeline.push(41).unwrap();
    assert_eq!(*job.outcome().await.into_completed().unwrap().data(), 42);
    assert_eq!(failures.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_job() {
    let pipeline = Pipeline::builder(Handle::current())
        .config(PipelineConfig::with_default_attempts(2))
        .transform("doomed", |_x: i32| async move {
            anyhow::bail!("always broken")
        })
        .build();

    let job = pipeline.push(1).unwrap();
    match job.outcome().await {
        convoy::JobOutcome::Failed(ConvoyError::StepFailed {
            step,
            attempts,
            reason,
        }) => {
            assert_eq!(step, "doomed");
            assert_eq!(attempts, 2);
            assert!(reason.contains("always broken"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

// A passenger dying upstream shrinks the waiting group's capacity so the
// surviving passenger is not deadlocked
#[tokio::test]
async fn test_step_failure_releases_waiting_sibling() {
    let merge = CountedBarrierController::with_capacity(Handle::current(), 2);

    let pipeline = Pipeline::builder(Handle::current())
        .transform("maybe-fail", |x: i32| async move {
            if x < 0 {
                anyhow::bail!("rejected")
            }
            Ok(x)
        })
        .counted_barrier("merge", merge.clone())
        .build();

    let survivor = pipeline.push(7).unwrap();
    while merge.arrival_count() < 1 {
        tokio::task::yield_now().await;
    }

    let casualty = pipeline.push(-1).unwrap();
    assert!(casualty.outcome().await.is_failed());

    // capacity dropped 2 -> 1, releasing the survivor with its own input
    assert_eq!(*survivor.outcome().await.into_completed().unwrap().data(), 7);
    assert_eq!(merge.capacity(), 1);
}

// A failing aggregate fails every passenger waiting on it, and the fan-out
// skips the originating controller while still notifying the others
#[tokio::test]
async fn test_lift_action_failure_skips_origin_in_fan_out() {
    let exploding = CountedBarrierController::with_lift_action(
        Handle::current(),
        2,
        |_inputs: Vec<i32>| async move { anyhow::bail!("aggregate exploded") },
    );
    let downstream = CountedBarrierController::with_capacity(Handle::current(), 2);

    let pipeline = Pipeline::builder(Handle::current())
        .counted_barrier("exploding", exploding.clone())
        .counted_barrier("downstream", downstream.clone())
        .build();

    let a = pipeline.push(1).unwrap();
    let b = pipeline.push(2).unwrap();

    for job in [a, b] {
        match job.outcome().await {
            convoy::JobOutcome::Failed(err) => {
                assert_eq!(err.origin_controller(), Some(exploding.uuid()));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    // each failed job notified the downstream group once; the origin kept its
    // own configuration untouched
    assert_eq!(downstream.capacity(), 0);
    assert_eq!(exploding.capacity(), 2);
}

#[tokio::test]
async fn test_push_tagged_records_tag_while_running() {
    let gate = ManualBarrierController::new();
    let pipeline = Pipeline::builder(Handle::current())
        .manual_barrier("gate", gate.clone())
        .build();

    let job = pipeline
        .push_tagged("payload".to_string(), Some("night-train".to_string()))
        .unwrap();
    assert_eq!(job.tag(), Some("night-train"));

    while gate.member_count() < 1 {
        tokio::task::yield_now().await;
    }
    let items = pipeline.repository().items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].tag.as_deref(), Some("night-train"));

    gate.lift();
    job.outcome().await.into_completed().unwrap();
    assert!(pipeline.repository().is_empty());
}

// The same pipeline serves batch after batch: each pair of passengers is
// aggregated together and the controller resets for the next pair
#[tokio::test]
async fn test_multiple_batches_through_pipeline() {
    let merge = CountedBarrierController::with_lift_action(
        Handle::current(),
        2,
        |inputs: Vec<i32>| async move {
            let max = *inputs.iter().max().unwrap_or(&0);
            Ok(inputs.into_iter().map(|_| max).collect())
        },
    );
    let pipeline = Pipeline::builder(Handle::current())
        .counted_barrier("merge", merge.clone())
        .build();

    for (low, high) in [(1, 2), (30, 40)] {
        let a = pipeline.push(low).unwrap();
        let b = pipeline.push(high).unwrap();
        assert_eq!(*a.outcome().await.into_completed().unwrap().data(), high);
        assert_eq!(*b.outcome().await.into_completed().unwrap().data(), high);
    }
    assert_eq!(merge.registered_count(), 0);
}
