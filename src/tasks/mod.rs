//! Detached background work.

use anyhow::Result;
use futures::future::BoxFuture;

pub type Task = BoxFuture<'static, Result<()>>;

/// Runs fire-and-forget jobs outside the request that scheduled them.
///
/// A job's failure is the spawner's to report; nobody awaits the result.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, name: &'static str, task: Task);
}

/// Spawns onto the ambient tokio runtime and logs failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, name: &'static str, task: Task) {
        tokio::spawn(async move {
            match task.await {
                Ok(()) => tracing::debug!(task = name, "background task finished"),
                Err(e) => tracing::error!(task = name, error = %e, "background task failed"),
            }
        });
    }
}

/// Keeps spawned tasks until the test decides to run them.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct DeferredSpawner {
    tasks: std::sync::Mutex<Vec<(&'static str, Task)>>,
}

#[cfg(test)]
impl DeferredSpawner {
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Runs every queued task in spawn order, returning their results.
    pub async fn run_all(&self) -> Vec<Result<()>> {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        let mut results = Vec::with_capacity(tasks.len());
        for (_, task) in tasks {
            results.push(task.await);
        }
        results
    }
}

#[cfg(test)]
impl TaskSpawner for DeferredSpawner {
    fn spawn(&self, name: &'static str, task: Task) {
        self.tasks.lock().unwrap().push((name, task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_tokio_spawner_runs_detached() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        TokioSpawner.spawn(
            "send",
            Box::pin(async move {
                tx.send(7).map_err(|_| anyhow::anyhow!("receiver dropped"))?;
                Ok(())
            }),
        );
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_tokio_spawner_swallows_failures() {
        TokioSpawner.spawn("fail", Box::pin(async { anyhow::bail!("boom") }));
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_deferred_spawner_runs_in_order() {
        let spawner = DeferredSpawner::default();
        let counter = Arc::new(AtomicUsize::new(0));
        for expected in 0..3 {
            let counter = counter.clone();
            spawner.spawn(
                "count",
                Box::pin(async move {
                    let seen = counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::ensure!(seen == expected, "out of order");
                    Ok(())
                }),
            );
        }
        assert_eq!(spawner.pending(), 3);
        let results = spawner.run_all().await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(spawner.pending(), 0);
    }
}
