//! Supervised task spawning with a completion barrier.
//!
//! Every binding task of a component runs under one [`Supervisor`]:
//! cancellation is cooperative through a shared [`CancellationToken`], a
//! panic is caught at the task boundary and logged, and
//! [`Supervisor::shutdown`] returns only once every task has exited.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info_span};

#[derive(Debug, Default)]
pub struct Supervisor {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `make(token)` under this supervisor.
    ///
    /// A panic inside the task is logged and swallowed; it never reaches
    /// the caller or the other tasks.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, make: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let task = AssertUnwindSafe(make(self.token.child_token())).catch_unwind();
        let span = info_span!("supervised", task = %name);
        self.tracker.spawn(
            async move {
                if let Err(panic) = task.await {
                    error!(task = %name, panic = %panic_message(panic.as_ref()), "task panicked; binding left unconnected");
                }
            }
            .instrument(span),
        );
    }

    /// Tasks that have not yet exited.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel every task and wait for all of them to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_waits_for_every_task() {
        let supervisor = Supervisor::new();
        let finished = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let finished = Arc::clone(&finished);
            supervisor.spawn(format!("worker-{i}"), move |token| async move {
                token.cancelled().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(supervisor.running(), 3);

        supervisor.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.running(), 0);
        assert!(supervisor.is_cancelled());
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let supervisor = Supervisor::new();
        let survivor = Arc::new(AtomicUsize::new(0));
        supervisor.spawn("doomed", |_token| async move {
            panic!("sensor driver exploded");
        });
        let s = Arc::clone(&survivor);
        supervisor.spawn("healthy", move |token| async move {
            token.cancelled().await;
            s.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        supervisor.shutdown().await;
        assert_eq!(survivor.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_message_handles_both_string_kinds() {
        let a: Box<dyn Any + Send> = Box::new("static");
        let b: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(a.as_ref()), "static");
        assert_eq!(panic_message(b.as_ref()), "owned");
    }
}
