//! Bounded concurrent fan-out of cluster calls.
//!
//! Every call builds its own task set, so nothing outlives the operation that
//! started it.

use std::{future::Future, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
	sync::Semaphore,
	task::{JoinError, JoinSet},
	time::Instant,
};

use crate::error::MultiError;

/// Maximum number of cluster calls in flight per fan-out.
pub const MAX_CONCURRENT_OPS: usize = 8;

#[derive(Debug, Error)]
pub enum FanoutError<E> {
	#[error("deadline exceeded")]
	DeadlineExceeded,

	#[error("task panicked")]
	TaskPanicked(#[source] JoinError),

	#[error("internal error: concurrency semaphore unexpectedly closed")]
	SemaphoreClosed,

	#[error(transparent)]
	Failed(MultiError<E>),
}

/// Point in time after which outstanding work is abandoned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
	/// Never expires.
	pub fn none() -> Self {
		Self(None)
	}

	pub fn after(timeout: Duration) -> Self {
		Self(Some(Instant::now() + timeout))
	}

	/// `after(timeout)`, or [`Deadline::none`] without a timeout.
	pub fn from_timeout(timeout: Option<Duration>) -> Self {
		timeout.map(Self::after).unwrap_or_default()
	}

	pub fn instant(&self) -> Option<Instant> {
		self.0
	}

	/// Run `future` to completion unless the deadline passes first.
	pub async fn run<F: Future>(&self, future: F) -> Option<F::Output> {
		match self.0 {
			Some(at) => tokio::time::timeout_at(at, future).await.ok(),
			None => Some(future.await),
		}
	}
}

/// Run `f` for every item, at most [`MAX_CONCURRENT_OPS`] at a time.
///
/// Waits for every task. Results come back in completion order; all task
/// failures are collected into [`FanoutError::Failed`]. When `deadline` passes
/// the remaining tasks are aborted.
pub async fn try_join_all<I, T, E, F, Fut>(
	items: impl IntoIterator<Item = I>,
	deadline: Deadline,
	f: F,
) -> Result<Vec<T>, FanoutError<E>>
where
	F: Fn(I) -> Fut,
	Fut: Future<Output = Result<T, E>> + Send + 'static,
	T: Send + 'static,
	E: Send + 'static,
{
	let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_OPS));
	let mut join_set = JoinSet::new();

	for item in items {
		let task = f(item);
		let semaphore = semaphore.clone();
		join_set.spawn(async move {
			let Ok(_permit) = semaphore.acquire_owned().await else {
				return None;
			};
			Some(task.await)
		});
	}

	let drain = async {
		let mut results = Vec::with_capacity(join_set.len());
		let mut errors = Vec::new();

		while let Some(joined) = join_set.join_next().await {
			match joined.map_err(FanoutError::TaskPanicked)? {
				Some(Ok(value)) => results.push(value),
				Some(Err(e)) => errors.push(e),
				None => return Err(FanoutError::SemaphoreClosed),
			}
		}

		match MultiError::from_vec(errors) {
			Some(errors) => Err(FanoutError::Failed(errors)),
			None => Ok::<_, FanoutError<E>>(results),
		}
	};

	// Dropping the JoinSet on timeout aborts whatever is still running.
	deadline
		.run(drain)
		.await
		.unwrap_or(Err(FanoutError::DeadlineExceeded))
}
