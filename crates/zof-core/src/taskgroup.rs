use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A scoped set of handler tasks that all start and end together: either the
/// controller scope (lives for the whole `run()`) or a datapath scope
/// (lives for one connection).
///
/// Tasks are spawned with [`JoinSet::spawn_local`], so a `TaskGroup` may only
/// be used from inside a [`tokio::task::LocalSet`] — which is how
/// [`crate::Controller::run`] drives the whole dispatch loop, keeping
/// scheduling single-threaded and cooperative without pulling in a
/// worker-thread pool.
pub struct TaskGroup {
    token: CancellationToken,
    tasks: JoinSet<()>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// The token tasks spawned in this group may poll to observe
    /// cancellation at their own suspension points, in addition to the
    /// hard `abort()` that `cancel_and_join` falls back to past the
    /// deadline.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Adds a task to the group. The task may race its own `.await` points
    /// against `token.cancelled()` if it chooses to; the group does not
    /// require that — `cancel_and_join` backstops uncooperative tasks by
    /// aborting them directly once the deadline passes.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + 'static,
    {
        self.tasks.spawn_local(fut);
    }

    /// Cancels every task in the group and waits for them to finish, up to
    /// `deadline`. Tasks still running past the deadline are aborted and
    /// abandoned with a warning once the deadline passes.
    pub async fn cancel_and_join(&mut self, deadline: Duration) {
        self.token.cancel();

        let drain = async { while self.tasks.join_next().await.is_some() {} };
        if time::timeout(deadline, drain).await.is_err() {
            let remaining = self.tasks.len();
            warn!(
                "task group did not finish within {:?}; abandoning {} orphan task(s)",
                deadline, remaining
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.token.cancel();
        self.tasks.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn cancel_and_join_waits_for_cooperative_tasks() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let mut group = TaskGroup::new();
                let ran = Arc::new(AtomicUsize::new(0));
                let token = group.token();
                let ran_clone = ran.clone();
                group.spawn(async move {
                    token.cancelled().await;
                    ran_clone.fetch_add(1, Ordering::SeqCst);
                });

                group.cancel_and_join(Duration::from_secs(1)).await;
                assert_eq!(ran.load(Ordering::SeqCst), 1);
                assert!(group.is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn cancel_and_join_aborts_uncooperative_tasks_at_deadline() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let mut group = TaskGroup::new();
                group.spawn(async {
                    // never observes the token; would hang forever without abort.
                    std::future::pending::<()>().await;
                });

                let start = tokio::time::Instant::now();
                group.cancel_and_join(Duration::from_millis(20)).await;
                assert!(start.elapsed() < Duration::from_secs(1));
                assert!(group.is_empty());
            })
            .await;
    }
}
