//! The task set guest `asyncio` tasks run on.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use tokio::task::{JoinHandle, LocalSet};

use super::exception::{EvalResult, ExcKind, Unwind};

/// Local task set owned by one sandbox.
///
/// Tasks make progress only while a caller drives the set with
/// [`TaskSet::run_until`]. A guest `asyncio.create_task` while nobody
/// drives it fails with `RuntimeError: no running event loop` instead of
/// spawning a task that would never run.
///
/// Tasks usually hold the interpreter that holds the set, so the owner
/// calls [`TaskSet::close`] once it is done with it.
#[derive(Default)]
pub struct TaskSet {
    local: RefCell<Rc<LocalSet>>,
    driven: Cell<bool>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether some caller is currently driving the set.
    pub fn is_driven(&self) -> bool {
        self.driven.get()
    }

    /// Run `fut` while driving the set.
    ///
    /// When the set is already driven further up, `fut` is simply awaited.
    /// Tasks spawned from inside stay in the set after `fut` finishes and
    /// resume the next time the set is driven.
    pub async fn run_until<F: Future>(&self, fut: F) -> F::Output {
        if self.driven.get() {
            return fut.await;
        }
        self.driven.set(true);
        let _driving = Driving(&self.driven);
        let local = self.local.borrow().clone();
        local.run_until(fut).await
    }

    /// Queue `fut` on the set. It runs once the set is driven.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.local.borrow().spawn_local(fut)
    }

    /// Spawn a guest task; fails when nothing is driving the set.
    pub(crate) fn spawn_guest<F>(&self, fut: F) -> EvalResult<JoinHandle<F::Output>>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        if !self.driven.get() {
            return Err(Unwind::new(ExcKind::RuntimeError, "no running event loop"));
        }
        Ok(self.spawn(fut))
    }

    /// Drop every task still queued or parked in the set.
    pub fn close(&self) {
        let closed = self.local.replace(Rc::new(LocalSet::new()));
        drop(closed);
    }
}

struct Driving<'a>(&'a Cell<bool>);

impl Drop for Driving<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[tokio::test]
    async fn test_spawn_guest_requires_a_driver() {
        let tasks = TaskSet::new();
        let err = tasks.spawn_guest(async { 1 }).unwrap_err();
        assert_eq!(err.kind(), Some(ExcKind::RuntimeError));
        assert!(!tasks.is_driven());
    }

    #[tokio::test]
    async fn test_tasks_outlive_the_call_that_spawned_them() {
        let tasks = Rc::new(TaskSet::new());
        let hits = Rc::new(Cell::new(0));
        let handle = tasks
            .run_until(async {
                assert!(tasks.is_driven());
                let hits = hits.clone();
                tasks
                    .spawn_guest(async move {
                        tokio::task::yield_now().await;
                        hits.set(hits.get() + 1);
                    })
                    .unwrap()
            })
            .await;
        assert!(!tasks.is_driven());
        assert_eq!(hits.get(), 0);

        tasks.run_until(handle).await.unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[tokio::test]
    async fn test_close_drops_pending_tasks() {
        let tasks = TaskSet::new();
        let marker = Rc::new(());
        let held = marker.clone();
        tasks.spawn(async move {
            let _held = held;
            std::future::pending::<()>().await;
        });
        assert_eq!(Rc::strong_count(&marker), 2);
        tasks.close();
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[tokio::test]
    async fn test_nested_run_until_keeps_driving() {
        let tasks = TaskSet::new();
        let value = tasks
            .run_until(async {
                let inner = tasks.run_until(async { 7 }).await;
                assert!(tasks.is_driven());
                inner
            })
            .await;
        assert_eq!(value, 7);
        assert!(!tasks.is_driven());
    }
}
