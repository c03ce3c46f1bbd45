//! # task
//!
//! lazily started asynchronous result with a single continuation
//!
//! the body of a task does not run until the task is first awaited. the
//! awaiting side starts the body and registers itself as the continuation,
//! the body may finish before or after that registration, on this thread
//! or on any other. one atomic handoff word settles that race: whichever of
//! the two events happens second resumes the continuation, the other one
//! just returns. a later poll swaps in its own waker through the same word.
//! the outcome is written before the completing side publishes COMPLETE
//! and read after the awaiting side observed it, so it needs no lock.
//!
use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crate::failure::{Failure, FailurePolicy, Propagate, Terminate};
use crate::rt::{self, Error, Resumed};

type Body<T> = Pin<Box<dyn Future<Output = T> + Send>>;

// run state of the frame, RUNNING grants exclusive access to the body
const IDLE: usize = 0;
const RUNNING: usize = 1;
// woken while running, poll once more
const NOTIFIED: usize = 2;
const COMPLETE: usize = 4;
const CANCELLED: usize = 8;

// continuation handoff, COMPLETE is shared with the run state
const EMPTY: usize = 0;
const REGISTERED: usize = 1;
// the awaiting side is writing the continuation
const REGISTERING: usize = 2;

enum Outcome<T, P: FailurePolicy> {
    Empty,
    Value(T),
    Failure(Failure<P>),
}

struct TaskCore<T, P: FailurePolicy> {
    body: UnsafeCell<Option<Body<T>>>,
    outcome: UnsafeCell<Outcome<T, P>>,
    run: AtomicUsize,
    continuation: UnsafeCell<Option<Waker>>,
    // EMPTY, REGISTERED or REGISTERING, with COMPLETE or-ed in once done
    handoff: AtomicUsize,
    _policy: PhantomData<P>,
}

unsafe impl<T: Send, P: FailurePolicy> Send for TaskCore<T, P> {}
unsafe impl<T: Send, P: FailurePolicy> Sync for TaskCore<T, P> {}

impl<T, P: FailurePolicy> TaskCore<T, P> {
    fn new(body: Body<T>) -> Self {
        TaskCore {
            body: UnsafeCell::new(Some(body)),
            outcome: UnsafeCell::new(Outcome::Empty),
            run: AtomicUsize::new(IDLE),
            continuation: UnsafeCell::new(None),
            handoff: AtomicUsize::new(EMPTY),
            _policy: PhantomData,
        }
    }

    #[inline]
    fn is_ready(&self) -> bool {
        self.run.load(Ordering::Acquire) & COMPLETE != 0
    }

    /// leave RUNNING after the body suspended, returns the new state
    fn suspend(&self) -> usize {
        let mut cur = RUNNING;
        loop {
            let next = if cur & CANCELLED != 0 {
                CANCELLED
            } else if cur & NOTIFIED != 0 {
                RUNNING
            } else {
                IDLE
            };
            match self
                .run
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => cur = actual,
            }
        }
    }

    /// the body reached its end
    fn complete(&self) {
        // release: publish the outcome, acquire: see the continuation
        let prev = self.handoff.fetch_or(COMPLETE, Ordering::AcqRel);
        if prev == REGISTERED {
            // SAFETY: REGISTERED means the awaiting side is done writing,
            // and it never touches the slot once COMPLETE is set
            let continuation = unsafe { (*self.continuation.get()).take() };
            if let Some(waker) = continuation {
                trace!("task completed after its continuation was registered, resuming it");
                waker.wake();
            }
        }
        // EMPTY: nobody waits yet, REGISTERING: the awaiting side sees
        // COMPLETE when it finishes writing and reads the outcome itself
    }

    /// register `waker` as the continuation, replacing an earlier one
    ///
    /// returns `false` when the body already completed, the caller then
    /// reads the outcome right away
    fn try_set_continuation(&self, waker: &Waker) -> bool {
        let mut cur = self.handoff.load(Ordering::Acquire);
        loop {
            if cur & COMPLETE != 0 {
                return false;
            }
            match self.handoff.compare_exchange(
                cur,
                REGISTERING,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }

        // SAFETY: REGISTERING keeps the completing side away from the slot
        let slot = unsafe { &mut *self.continuation.get() };
        match slot {
            Some(old) if old.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }

        match self.handoff.compare_exchange(
            REGISTERING,
            REGISTERED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(_) => {
                // completed while we were writing, nobody will wake us
                self.handoff.store(COMPLETE, Ordering::Release);
                false
            }
        }
    }

    /// move the outcome out, replaying a failure
    ///
    /// only called after completion was observed
    fn take_result(&self) -> Option<T> {
        // SAFETY: the outcome is never written again after completion
        let outcome = mem::replace(unsafe { &mut *self.outcome.get() }, Outcome::Empty);
        match outcome {
            Outcome::Value(v) => Some(v),
            Outcome::Failure(mut failure) => {
                failure.replay();
                None
            }
            Outcome::Empty => None,
        }
    }

    /// stop the body from ever running again
    fn cancel(&self) {
        let mut cur = self.run.load(Ordering::Acquire);
        loop {
            if cur & (COMPLETE | CANCELLED) != 0 {
                return;
            }
            match self.run.compare_exchange(
                cur,
                cur | CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        if cur & RUNNING == 0 {
            // SAFETY: the body was idle, CANCELLED keeps everyone else out
            unsafe { *self.body.get() = None };
        }
    }
}

impl<T: Send + 'static, P: FailurePolicy> TaskCore<T, P> {
    /// start or resume the body on the calling thread
    ///
    /// a resume that races with a running poll makes that poll go again
    /// instead of running the body concurrently
    fn resume(self: &Arc<Self>) {
        let mut cur = self.run.load(Ordering::Acquire);
        loop {
            if cur & (COMPLETE | CANCELLED) != 0 {
                return;
            }
            let next = if cur & RUNNING != 0 {
                cur | NOTIFIED
            } else {
                RUNNING
            };
            match self
                .run
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) if next == RUNNING => break,
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }

        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);
        loop {
            // SAFETY: we hold RUNNING
            let body = unsafe { &mut *self.body.get() };
            let Some(fut) = body.as_mut() else {
                return;
            };

            let outcome = match rt::resume(fut.as_mut(), &mut cx) {
                Resumed::Suspended => match self.suspend() {
                    RUNNING => continue,
                    CANCELLED => {
                        *body = None;
                        return;
                    }
                    _ => return,
                },
                Resumed::Returned(v) => Outcome::Value(v),
                Resumed::Panicked(cause) => {
                    let mut failure = Failure::new();
                    failure.capture(cause);
                    Outcome::Failure(failure)
                }
            };

            *body = None;
            // SAFETY: nobody reads the outcome before COMPLETE is published
            unsafe { *self.outcome.get() = outcome };
            self.run.store(COMPLETE, Ordering::Release);
            self.complete();
            return;
        }
    }
}

impl<T: Send + 'static, P: FailurePolicy> Wake for TaskCore<T, P> {
    fn wake(self: Arc<Self>) {
        self.resume();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.resume();
    }
}

/// a lazily started asynchronous result
///
/// awaiting the task starts its body. the value is moved out to the
/// awaiting side exactly once, a failure of the body is raised there
/// instead. [`Task::get`] reads the value by reference and can be awaited
/// any number of times. awaiting a task that owns no frame raises
/// [`Error::BrokenPromise`]. dropping a task whose body has not finished
/// cancels the body.
pub struct Task<T, P: FailurePolicy = Propagate> {
    core: Option<Arc<TaskCore<T, P>>>,
    // moved out of the core by a borrowing await
    value: Option<T>,
    // the body has been started
    started: bool,
}

/// wrap any future into a lazily started [`Task`]
///
/// the future is not polled before the task is first awaited
pub fn make_task<F>(fut: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Task::new(fut)
}

impl<T: Send + 'static> Task<T> {
    /// create a task whose failure is raised at the awaiting side
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Task::with_policy(body)
    }
}

impl<T: Send + 'static> Task<T, Terminate> {
    /// create a task that aborts the process if its body panics
    pub fn nothrow<F>(body: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Task::with_policy(body)
    }
}

impl<T: Send + 'static, P: FailurePolicy> Task<T, P> {
    /// create a task with the failure policy `P`
    pub fn with_policy<F>(body: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Task {
            core: Some(Arc::new(TaskCore::new(Box::pin(body)))),
            value: None,
            started: false,
        }
    }

    /// a task that owns no frame
    pub fn empty() -> Self {
        Task {
            core: None,
            value: None,
            started: false,
        }
    }

    /// is the result available without suspending
    ///
    /// never starts or resumes the body
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.core.as_ref().map_or(true, |core| core.is_ready())
    }

    /// wait for the body to finish without taking its result
    ///
    /// never fails, the result stays in the task for a later await
    pub fn when_ready(&mut self) -> WhenReady<'_, T, P> {
        WhenReady { task: self }
    }

    /// wait for the body and read its value by reference
    ///
    /// the value stays in the task, so this can be awaited again and a
    /// consuming await still gets it afterwards. a failure of the body is
    /// raised on the first read only, later reads raise
    /// [`Error::BrokenPromise`]
    pub fn get(&mut self) -> Get<'_, T, P> {
        Get { task: Some(self) }
    }

    /// start the body on the first call and register `cx` as the
    /// continuation, replacing the one of an earlier poll
    ///
    /// returns `true` if the caller has to wait for the continuation
    fn start(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(core) = self.core.as_ref() else {
            return false;
        };
        if core.is_ready() {
            return false;
        }
        if !self.started {
            self.started = true;
            core.resume();
        }
        core.try_set_continuation(cx.waker())
    }

    /// is there neither a frame nor a value left to hand out
    #[inline]
    fn is_empty(&self) -> bool {
        self.core.is_none() && self.value.is_none()
    }
}

// the value is never pinned in place, it is only moved out
impl<T, P: FailurePolicy> Unpin for Task<T, P> {}

impl<T: Send + 'static, P: FailurePolicy> Future for Task<T, P> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        if let Some(v) = this.value.take() {
            return Poll::Ready(v);
        }
        if this.is_empty() {
            P::raise(Error::BrokenPromise);
        }
        if this.start(cx) {
            return Poll::Pending;
        }

        // the result is consumed, a second await is a broken promise
        let Some(core) = this.core.take() else {
            P::raise(Error::BrokenPromise);
        };
        match core.take_result() {
            Some(v) => Poll::Ready(v),
            None => P::raise(Error::BrokenPromise),
        }
    }
}

impl<T: Send + 'static, P: FailurePolicy> Default for Task<T, P> {
    fn default() -> Self {
        Task::empty()
    }
}

impl<T, P: FailurePolicy> Drop for Task<T, P> {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            if !core.is_ready() {
                debug!("task is not done while drop, cancelling");
                core.cancel();
            }
        }
    }
}

impl<T, P: FailurePolicy> fmt::Debug for Task<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Task<{}> {{ ... }}", std::any::type_name::<T>())
    }
}

/// future returned by [`Task::when_ready`]
#[must_use = "futures do nothing unless awaited"]
pub struct WhenReady<'t, T, P: FailurePolicy = Propagate> {
    task: &'t mut Task<T, P>,
}

/// future returned by [`Task::get`]
#[must_use = "futures do nothing unless awaited"]
pub struct Get<'t, T, P: FailurePolicy = Propagate> {
    // taken out once the value is handed out
    task: Option<&'t mut Task<T, P>>,
}

impl<'t, T: Send + 'static, P: FailurePolicy> Future for Get<'t, T, P> {
    type Output = &'t T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<&'t T> {
        let this = self.get_mut();
        let Some(task) = this.task.take() else {
            P::raise(Error::BrokenPromise);
        };

        if task.value.is_none() {
            if task.core.is_none() {
                P::raise(Error::BrokenPromise);
            }
            if task.start(cx) {
                this.task = Some(task);
                return Poll::Pending;
            }
            if let Some(core) = task.core.take() {
                task.value = core.take_result();
            }
        }

        let task: &'t Task<T, P> = task;
        match task.value.as_ref() {
            Some(v) => Poll::Ready(v),
            None => P::raise(Error::BrokenPromise),
        }
    }
}

impl<T: Send + 'static, P: FailurePolicy> Future for WhenReady<'_, T, P> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.get_mut().task.start(cx) {
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_lazy_start() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let task = Task::new(async move {
            r.fetch_add(1, Ordering::SeqCst);
            7
        });
        assert!(!task.is_ready());
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(block_on(task), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_is_broken_promise() {
        let task: Task<u32> = Task::empty();
        assert!(task.is_ready());
        let err = catch_unwind(AssertUnwindSafe(|| block_on(task))).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::BrokenPromise));
    }

    #[test]
    fn test_consumed_is_broken_promise() {
        let mut task = Task::new(async { String::from("once") });
        assert_eq!(block_on(&mut task), "once");
        assert!(task.is_ready());
        let err = catch_unwind(AssertUnwindSafe(|| block_on(&mut task))).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::BrokenPromise));
    }

    #[test]
    fn test_failure_replayed() {
        let task: Task<()> = Task::new(async {
            panic!("body failed");
        });
        let err = catch_unwind(AssertUnwindSafe(|| block_on(task))).unwrap_err();
        assert_eq!(err.downcast_ref::<&str>(), Some(&"body failed"));
    }

    #[test]
    fn test_when_ready_keeps_result() {
        let (tx, rx) = oneshot::channel::<u32>();
        let mut task = Task::new(async move { rx.await.unwrap_or(0) + 1 });
        tx.send(41).unwrap();

        block_on(task.when_ready());
        assert!(task.is_ready());
        assert_eq!(block_on(task), 42);
    }

    #[test]
    fn test_when_ready_swallows_failure() {
        let mut task: Task<()> = Task::new(async {
            panic!("ignored");
        });
        block_on(task.when_ready());
        assert!(task.is_ready());
        // the failure is still there for the real await
        assert!(catch_unwind(AssertUnwindSafe(|| block_on(task))).is_err());
    }

    #[test]
    fn test_drop_cancels() {
        let after = Arc::new(AtomicUsize::new(0));
        let a = after.clone();
        let (tx, rx) = oneshot::channel::<()>();
        let mut task = Task::new(async move {
            let _ = rx.await;
            a.fetch_add(1, Ordering::SeqCst);
        });

        // start the body, it suspends on the channel
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        assert!(Pin::new(&mut task).poll(&mut cx).is_pending());

        drop(task);
        let _ = tx.send(());
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_nested_tasks() {
        let inner = Task::new(async { 20 });
        let outer = Task::new(async move { inner.await + 1 });
        assert_eq!(block_on(outer), 21);
    }

    #[test]
    fn test_repoll_replaces_continuation() {
        let (tx, rx) = oneshot::channel::<u32>();
        let mut task = Task::new(async move { rx.await.unwrap_or(0) });

        // a first waiter that goes away before the body finishes
        {
            let mut ready = task.when_ready();
            let mut cx = Context::from_waker(futures::task::noop_waker_ref());
            assert!(Pin::new(&mut ready).poll(&mut cx).is_pending());
        }

        let sender = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            tx.send(3).unwrap();
        });
        // the await below must be the one that gets resumed
        assert_eq!(block_on(task), 3);
        sender.join().unwrap();
    }

    #[test]
    fn test_get_by_reference() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let mut task = Task::new(async move {
            r.fetch_add(1, Ordering::SeqCst);
            vec![1, 2, 3]
        });

        assert_eq!(block_on(task.get()), &[1, 2, 3]);
        assert_eq!(block_on(task.get()).len(), 3);
        assert!(task.is_ready());
        // the value is still there for the consuming await
        assert_eq!(block_on(task), vec![1, 2, 3]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_failure_raised_once() {
        let mut task: Task<u32> = Task::new(async {
            panic!("read failed");
        });
        let err = catch_unwind(AssertUnwindSafe(|| *block_on(task.get()))).unwrap_err();
        assert_eq!(err.downcast_ref::<&str>(), Some(&"read failed"));

        let err = catch_unwind(AssertUnwindSafe(|| *block_on(task.get()))).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::BrokenPromise));
    }

    #[test]
    fn test_get_empty_is_broken_promise() {
        let mut task: Task<u32> = Task::default();
        let err = catch_unwind(AssertUnwindSafe(|| *block_on(task.get()))).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::BrokenPromise));
    }

    #[test]
    fn test_make_task() {
        let task = make_task(futures::future::ready(String::from("wrapped")));
        assert!(!task.is_ready());
        assert_eq!(block_on(task), "wrapped");
    }

    #[test]
    fn test_reference_result() {
        static NAME: &str = "shared";
        let task: Task<&'static str> = Task::new(async { NAME });
        assert!(std::ptr::eq(block_on(task), NAME));
    }

    #[test]
    fn test_nothrow() {
        let task = Task::nothrow(async { 5u8 });
        assert_eq!(block_on(task), 5);
    }
}
