use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A set of tasks that succeed or fail together.
///
/// The first task to fail cancels the shared token. [`TaskGroup::wait`] joins
/// every task before returning, and returns only that first error.
#[derive(Debug)]
pub struct TaskGroup<E> {
  tasks: JoinSet<Result<(), E>>,
  cancel: CancellationToken,
}

impl<E> TaskGroup<E>
where
  E: From<JoinError> + std::fmt::Display + Send + 'static,
{
  pub fn new() -> Self {
    Self {
      tasks: JoinSet::new(),
      cancel: CancellationToken::new(),
    }
  }

  /// Token cancelled when any task in the group fails.
  pub fn token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub fn spawn<F>(&mut self, task: F)
  where
    F: Future<Output = Result<(), E>> + Send + 'static,
  {
    self.tasks.spawn(task);
  }

  pub async fn wait(mut self) -> Result<(), E> {
    let mut first = None;

    while let Some(joined) = self.tasks.join_next().await {
      let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
          error!(error = %e, "task panicked");
          Err(E::from(e))
        }
      };

      if let Err(e) = outcome {
        if first.is_none() {
          self.cancel.cancel();
          first = Some(e);
        } else {
          debug!(error = %e, "discarding error after first failure");
        }
      }
    }

    match first {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

impl<E> Default for TaskGroup<E>
where
  E: From<JoinError> + std::fmt::Display + Send + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::time::Duration;

  #[derive(Debug, PartialEq, Eq)]
  enum TestError {
    Failed(&'static str),
    Panicked,
  }

  impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      write!(f, "{:?}", self)
    }
  }

  impl From<JoinError> for TestError {
    fn from(_: JoinError) -> Self {
      TestError::Panicked
    }
  }

  #[tokio::test]
  async fn all_ok() {
    let mut group: TaskGroup<TestError> = TaskGroup::new();
    group.spawn(async { Ok(()) });
    group.spawn(async { Ok(()) });
    assert_eq!(group.wait().await, Ok(()));
  }

  #[tokio::test]
  async fn first_error_cancels_siblings() {
    let mut group: TaskGroup<TestError> = TaskGroup::new();
    let token = group.token();
    let sibling_finished = Arc::new(AtomicBool::new(false));

    let finished = sibling_finished.clone();
    group.spawn(async move {
      token.cancelled().await;
      finished.store(true, Ordering::SeqCst);
      Ok(())
    });
    group.spawn(async { Err(TestError::Failed("submit")) });

    assert_eq!(group.wait().await, Err(TestError::Failed("submit")));
    assert!(sibling_finished.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn only_the_first_error_is_returned() {
    let mut group: TaskGroup<TestError> = TaskGroup::new();
    let token = group.token();

    group.spawn(async { Err(TestError::Failed("first")) });
    group.spawn(async move {
      token.cancelled().await;
      Err(TestError::Failed("second"))
    });

    assert_eq!(group.wait().await, Err(TestError::Failed("first")));
  }

  #[tokio::test]
  async fn wait_joins_slow_tasks() {
    let mut group: TaskGroup<TestError> = TaskGroup::new();
    let done = Arc::new(AtomicBool::new(false));

    let flag = done.clone();
    group.spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      flag.store(true, Ordering::SeqCst);
      Ok(())
    });

    group.wait().await.unwrap();
    assert!(done.load(Ordering::SeqCst));
  }

  fn explode() -> Result<(), TestError> {
    panic!("boom")
  }

  #[tokio::test]
  async fn panic_becomes_error() {
    let mut group: TaskGroup<TestError> = TaskGroup::new();
    group.spawn(async { explode() });
    assert_eq!(group.wait().await, Err(TestError::Panicked));
  }
}
