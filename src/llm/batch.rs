//! Bounded-concurrency fan-out of uniform LLM tasks.
//!
//! Runs up to `max_parallel` tasks simultaneously and collects results
//! in input order regardless of completion order. One task failing (or
//! being cancelled) never poisons its siblings: failures are recorded
//! per index and the batch always completes.

use crate::{StoryboardError, StoryboardResult};
use futures_util::stream::{self, StreamExt};
use std::future::Future;

/// One failed task, by input index.
#[derive(Debug)]
pub struct TaskFailure {
    /// Position of the task in the input list
    pub index: usize,
    /// What went wrong
    pub error: StoryboardError,
}

/// Aggregated batch result.
///
/// `results[i]` is `Some` iff task `i` succeeded; `failures` carries the
/// error for every `None` slot.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Per-task results, input order
    pub results: Vec<Option<T>>,
    /// Per-task errors, sorted by input index
    pub failures: Vec<TaskFailure>,
}

impl<T> BatchOutcome<T> {
    /// Number of successful tasks.
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }
}

/// Run `task` over every item with at most `max_parallel` in flight.
///
/// The task receives the item's input index alongside the item so it can
/// label logs and results without shared state.
pub async fn run_batch<I, T, F, Fut>(
    items: Vec<I>,
    max_parallel: usize,
    task: F,
) -> BatchOutcome<T>
where
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = StoryboardResult<T>>,
{
    let total = items.len();
    let mut results: Vec<Option<T>> = Vec::with_capacity(total);
    results.resize_with(total, || None);
    let mut failures = Vec::new();

    let mut completions = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let fut = task(index, item);
            async move { (index, fut.await) }
        })
        .buffer_unordered(max_parallel.max(1));

    while let Some((index, outcome)) = completions.next().await {
        match outcome {
            Ok(value) => results[index] = Some(value),
            Err(error) => failures.push(TaskFailure { index, error }),
        }
    }
    drop(completions);

    failures.sort_by_key(|f| f.index);
    BatchOutcome { results, failures }
}
