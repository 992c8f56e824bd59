//! Completion handles for scheduled work.
//!
//! A [`JobHandle`] is a node in the per-tick dependency graph. It carries an
//! optional body and a count of unfinished prerequisites. Nothing ever blocks
//! waiting for a handle: when a handle finishes it decrements each dependent,
//! and the dependent that reaches zero is spawned onto the rayon scope.
//!
//! ## Launch guard
//! A new handle starts with one pending unit owned by whoever builds it, so
//! prerequisites can be wired in any order without the body starting early.
//! [`JobHandle::release`] drops that unit once wiring is complete.
//!
//! ## Faults
//! Bodies run under `catch_unwind`. A panicking body finishes its handle as
//! [`JobStatus::Faulted`]; a handle with a faulted or skipped prerequisite
//! never runs its body and finishes as [`JobStatus::Skipped`], which poisons
//! its own dependents in turn.
//!
//! Handles without a body act as joins: they finish as soon as their last
//! prerequisite does.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::Scope;


/// State of a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Not finished yet.
    Pending,
    /// Body ran to completion, or the join's prerequisites all completed.
    Completed,
    /// Body panicked.
    Faulted,
    /// Body never ran because a prerequisite faulted or was skipped.
    Skipped,
}

impl JobStatus {
    #[inline]
    fn poisons(self) -> bool {
        matches!(self, JobStatus::Faulted | JobStatus::Skipped)
    }
}

/// Names of bodies that panicked or were skipped during one tick.
#[derive(Debug, Default)]
pub struct JobLog {
    panicked: Mutex<Vec<String>>,
    skipped: Mutex<Vec<String>>,
}

impl JobLog {
    /// Names of panicked bodies in completion order.
    pub fn panicked(&self) -> Vec<String> { self.panicked.lock().clone() }

    /// Names of skipped bodies in completion order.
    pub fn skipped(&self) -> Vec<String> { self.skipped.lock().clone() }
}

type Body<'scope> = Box<dyn FnOnce() + Send + 'scope>;

struct JobNode<'scope> {
    name: String,
    body: Mutex<Option<Body<'scope>>>,
    pending: AtomicUsize,
    poisoned: AtomicBool,
    state: Mutex<NodeState<'scope>>,
    log: &'scope JobLog,
}

struct NodeState<'scope> {
    status: JobStatus,
    dependents: Vec<Arc<JobNode<'scope>>>,
}

/// Shared handle to one unit of work.
#[derive(Clone)]
pub struct JobHandle<'scope>(Arc<JobNode<'scope>>);

impl<'scope> JobHandle<'scope> {
    /// Creates a handle that runs `body` once released and unblocked.
    pub fn task(name: impl Into<String>, log: &'scope JobLog, body: impl FnOnce() + Send + 'scope) -> Self {
        Self::with_body(name.into(), log, Some(Box::new(body)))
    }

    /// Creates a join handle that finishes with its last prerequisite.
    pub fn join(name: impl Into<String>, log: &'scope JobLog) -> Self {
        Self::with_body(name.into(), log, None)
    }

    fn with_body(name: String, log: &'scope JobLog, body: Option<Body<'scope>>) -> Self {
        Self(Arc::new(JobNode {
            name,
            body: Mutex::new(body),
            pending: AtomicUsize::new(1),
            poisoned: AtomicBool::new(false),
            state: Mutex::new(NodeState { status: JobStatus::Pending, dependents: Vec::new() }),
            log,
        }))
    }

    /// Name given at creation.
    #[inline]
    pub fn name(&self) -> &str { &self.0.name }

    /// Current status.
    pub fn status(&self) -> JobStatus { self.0.state.lock().status }

    /// Returns `true` if both handles are the same node.
    #[inline]
    pub fn same(&self, other: &JobHandle<'scope>) -> bool { Arc::ptr_eq(&self.0, &other.0) }

    /// Makes this handle wait for `prerequisite`.
    ///
    /// Must be called before [`release`](Self::release).
    pub fn depend_on(&self, prerequisite: &JobHandle<'scope>) {
        let mut state = prerequisite.0.state.lock();
        match state.status {
            JobStatus::Pending => {
                self.0.pending.fetch_add(1, Ordering::AcqRel);
                state.dependents.push(Arc::clone(&self.0));
            }
            status if status.poisons() => self.0.poisoned.store(true, Ordering::Release),
            _ => {}
        }
    }

    /// Drops the launch guard. The body is spawned on `scope` once every prerequisite finished.
    pub fn release(&self, scope: &Scope<'scope>) {
        JobNode::arrive(&self.0, scope);
    }
}

impl fmt::Debug for JobHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.0.name)
            .field("status", &self.status())
            .finish()
    }
}

impl<'scope> JobNode<'scope> {
    fn arrive(node: &Arc<Self>, scope: &Scope<'scope>) {
        if node.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            Self::start(node, scope);
        }
    }

    fn start(node: &Arc<Self>, scope: &Scope<'scope>) {
        let runnable = node.body.lock().is_some() && !node.poisoned.load(Ordering::Acquire);
        if runnable {
            let node = Arc::clone(node);
            scope.spawn(move |scope| node.execute(scope));
        } else {
            node.execute(scope);
        }
    }

    fn execute(self: &Arc<Self>, scope: &Scope<'scope>) {
        let body = self.body.lock().take();
        let status = if self.poisoned.load(Ordering::Acquire) {
            if body.is_some() {
                tracing::warn!(system = %self.name, "skipped: a prerequisite faulted");
                self.log.skipped.lock().push(self.name.clone());
            }
            JobStatus::Skipped
        } else {
            match body {
                None => JobStatus::Completed,
                Some(body) => match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(()) => JobStatus::Completed,
                    Err(payload) => {
                        tracing::warn!(system = %self.name, reason = panic_message(&*payload), "system panicked");
                        self.log.panicked.lock().push(self.name.clone());
                        JobStatus::Faulted
                    }
                },
            }
        };
        self.finish(status, scope);
    }

    fn finish(&self, status: JobStatus, scope: &Scope<'scope>) {
        let dependents = {
            let mut state = self.state.lock();
            state.status = status;
            std::mem::take(&mut state.dependents)
        };
        for dependent in dependents {
            if status.poisons() {
                dependent.poisoned.store(true, Ordering::Release);
            }
            Self::arrive(&dependent, scope);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn dependents_run_after_prerequisites() {
        let log = JobLog::default();
        let trace = Mutex::new(Vec::new());

        rayon::scope(|scope| {
            let first = JobHandle::task("first", &log, || trace.lock().push("first"));
            let second = JobHandle::task("second", &log, || trace.lock().push("second"));
            let third = JobHandle::task("third", &log, || trace.lock().push("third"));
            second.depend_on(&first);
            third.depend_on(&second);

            third.release(scope);
            second.release(scope);
            first.release(scope);
        });

        assert_eq!(*trace.lock(), vec!["first", "second", "third"]);
        assert!(log.panicked().is_empty());
    }

    #[test]
    fn join_completes_after_every_prerequisite() {
        let log = JobLog::default();
        let counter = AtomicU32::new(0);
        let observed = AtomicU32::new(0);

        rayon::scope(|scope| {
            let join = JobHandle::join("group", &log);
            let after = JobHandle::task("after", &log, || {
                observed.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
            });
            for i in 0..4 {
                let child = JobHandle::task(format!("child{i}"), &log, || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                join.depend_on(&child);
                child.release(scope);
            }
            after.depend_on(&join);
            join.release(scope);
            after.release(scope);
        });

        assert_eq!(observed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn faults_skip_dependents_transitively() {
        let log = JobLog::default();
        let ran = AtomicU32::new(0);
        let mut handles = Vec::new();

        rayon::scope(|scope| {
            let bad = JobHandle::task("bad", &log, || panic!("boom"));
            let middle = JobHandle::task("middle", &log, || { ran.fetch_add(1, Ordering::SeqCst); });
            let last = JobHandle::task("last", &log, || { ran.fetch_add(1, Ordering::SeqCst); });
            let unrelated = JobHandle::task("unrelated", &log, || { ran.fetch_add(10, Ordering::SeqCst); });
            middle.depend_on(&bad);
            last.depend_on(&middle);
            for handle in [&bad, &middle, &last, &unrelated] {
                handle.release(scope);
            }
            handles.extend([bad, middle, last]);
        });

        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(log.panicked(), vec!["bad".to_owned()]);
        assert_eq!(log.skipped(), vec!["middle".to_owned(), "last".to_owned()]);
        let statuses: Vec<_> = handles.iter().map(JobHandle::status).collect();
        assert_eq!(statuses, vec![JobStatus::Faulted, JobStatus::Skipped, JobStatus::Skipped]);
    }

    #[test]
    fn depending_on_a_finished_handle_does_not_wait() {
        let log = JobLog::default();
        let ran = AtomicBool::new(false);

        rayon::scope(|scope| {
            let done = JobHandle::join("done", &log);
            done.release(scope);
            assert_eq!(done.status(), JobStatus::Completed);

            let next = JobHandle::task("next", &log, || ran.store(true, Ordering::SeqCst));
            next.depend_on(&done);
            next.release(scope);
        });

        assert!(ran.load(Ordering::SeqCst));
    }
}
