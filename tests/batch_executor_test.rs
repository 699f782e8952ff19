//! Batch executor: ordering, failure isolation, and the concurrency cap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storyboard::{run_batch, StoryboardError, StoryboardErrorKind};

#[tokio::test]
async fn results_keep_input_order_despite_completion_order() {
    // Later items finish first; the collected results must still line up.
    let items: Vec<u64> = vec![50, 30, 10, 0];
    let outcome = run_batch(items, 4, |index, delay_ms| async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(index)
    })
    .await;

    assert_eq!(
        outcome.results,
        vec![Some(0), Some(1), Some(2), Some(3)]
    );
    assert!(outcome.failures.is_empty());
}

#[tokio::test]
async fn one_failure_does_not_poison_the_batch() {
    let items = vec![1u32, 2, 3, 4, 5];
    let outcome = run_batch(items, 2, |_index, n| async move {
        if n == 3 {
            Err(StoryboardError::new(StoryboardErrorKind::Parse(
                "bad response".to_string(),
            )))
        } else {
            Ok(n * 10)
        }
    })
    .await;

    assert_eq!(
        outcome.results,
        vec![Some(10), Some(20), None, Some(40), Some(50)]
    );
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].index, 2);
    assert_eq!(outcome.success_count(), 4);
}

#[tokio::test]
async fn in_flight_tasks_never_exceed_the_cap() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let items: Vec<usize> = (0..20).collect();
    let outcome = run_batch(items, 3, |_index, _item| {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .await;

    assert_eq!(outcome.success_count(), 20);
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn empty_batch_completes_immediately() {
    let outcome = run_batch(Vec::<u32>::new(), 8, |_i, n| async move { Ok(n) }).await;
    assert!(outcome.results.is_empty());
    assert!(outcome.failures.is_empty());
}
