//! Named worker pools.
//!
//! The server never spawns on its own: every accept loop, cleanup and
//! connection handler is handed to a [`Scheduler`] together with the name of
//! the pool it should run on.

use futures::future::BoxFuture;
use std::collections::HashMap;
use tokio::runtime::Handle;
use tracing::error;

pub type Task = BoxFuture<'static, ()>;

pub trait Scheduler: Send + Sync + 'static {
    /// Fire-and-forget submission of `task` to the pool named `worker`.
    fn schedule(&self, task: Task, worker: &str);
}

/// Maps pool names to tokio runtimes. Unknown names run on the default
/// runtime: the one `new` was called inside, or failing that the one the
/// caller of `schedule` is inside.
#[derive(Clone)]
pub struct TokioScheduler {
    pools: HashMap<String, Handle>,
    default: Option<Handle>,
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
            default: Handle::try_current().ok(),
        }
    }

    pub fn with_pool(mut self, name: &str, handle: Handle) -> Self {
        self.pools.insert(name.to_owned(), handle);
        self
    }

    pub fn with_default(mut self, handle: Handle) -> Self {
        self.default = Some(handle);
        self
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task, worker: &str) {
        if let Some(handle) = self.pools.get(worker).or(self.default.as_ref()) {
            handle.spawn(task);
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(e) => error!(worker, "no runtime to schedule task on: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn unknown_pool_runs_on_current_runtime() {
        let (tx, rx) = oneshot::channel();
        TokioScheduler::new().schedule(
            Box::pin(async move {
                let _ = tx.send(42);
            }),
            "nope",
        );
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn named_pool_runs_on_its_runtime() {
        let pool = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("io-pool")
            .enable_all()
            .build()
            .unwrap();

        let scheduler = TokioScheduler::new().with_pool("io", pool.handle().clone());
        let (tx, rx) = std::sync::mpsc::channel();
        scheduler.schedule(
            Box::pin(async move {
                let name = std::thread::current().name().map(str::to_owned);
                let _ = tx.send(name);
            }),
            "io",
        );

        let name = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("io-pool"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn schedules_from_a_thread_outside_the_runtime() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = oneshot::channel();

        std::thread::spawn(move || {
            scheduler.schedule(
                Box::pin(async move {
                    let _ = tx.send(7);
                }),
                "accept",
            );
        })
        .join()
        .unwrap();

        let value = tokio::time::timeout(std::time::Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn without_any_runtime_the_task_is_dropped() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        scheduler.schedule(
            Box::pin(async move {
                let _ = tx.send(());
            }),
            "accept",
        );
        assert!(rx.recv().is_err());
    }
}
