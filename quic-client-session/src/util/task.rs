//! Deferred task execution
// (c) 2025 Ross Younger

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Debug;

use tracing::trace;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce()>;

/// Runs work on a later turn of the event loop.
///
/// Tasks posted from one thread run on that same thread, in posting order,
/// and never from within `post_task` itself.
pub trait TaskRunner {
    /// Queues `task` to run later
    fn post_task(&self, task: Task);
}

/// A task queue drained explicitly by its owner.
///
/// This is the event loop of choice for unit tests: nothing deferred happens
/// until [`run_until_idle`](LocalTaskQueue::run_until_idle) is called.
#[derive(Default)]
pub struct LocalTaskQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl Debug for LocalTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTaskQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

impl LocalTaskQueue {
    /// Constructor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Runs tasks until the queue is empty, including any posted while running.
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        loop {
            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            count += 1;
        }
        trace!("ran {count} deferred task(s)");
        count
    }
}

impl TaskRunner for LocalTaskQueue {
    fn post_task(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

/// Posts tasks to the current tokio [`LocalSet`](tokio::task::LocalSet).
///
/// Must be used from within a `LocalSet`; posting elsewhere panics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTaskRunner;

impl TaskRunner for TokioTaskRunner {
    fn post_task(&self, task: Task) {
        let _handle = tokio::task::spawn_local(async move { task() });
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::{LocalTaskQueue, TaskRunner as _, TokioTaskRunner};

    #[test]
    fn runs_in_order_including_reposts() {
        let q = Rc::new(LocalTaskQueue::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            let q2 = q.clone();
            q.post_task(Box::new(move || {
                log.borrow_mut().push(i);
                if i == 0 {
                    let log = log.clone();
                    q2.post_task(Box::new(move || log.borrow_mut().push(10)));
                }
            }));
        }
        assert_eq!(q.pending(), 3);
        assert_eq!(q.run_until_idle(), 4);
        assert_eq!(*log.borrow(), vec![0, 1, 2, 10]);
        assert_eq!(q.pending(), 0);
    }

    #[tokio::test]
    async fn tokio_runner_defers() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let hit = Rc::new(RefCell::new(false));
                let hit2 = hit.clone();
                TokioTaskRunner.post_task(Box::new(move || *hit2.borrow_mut() = true));
                assert!(!*hit.borrow());
                for _ in 0..10 {
                    if *hit.borrow() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                assert!(*hit.borrow());
            })
            .await;
    }
}
