//! # frame run time support
//!
//! errors raised by the primitives and the single place a frame is resumed
//!
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

/// failure payloads raised by the primitives themselves
///
/// they travel as panic payloads, use `downcast_ref::<Error>()` on the
/// result of `catch_unwind` to tell them apart from panics of a body
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// awaited a task that owns no frame
    BrokenPromise,
    /// a generator body suspended somewhere other than its own yield point
    ForeignSuspend,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BrokenPromise => f.write_str("broken promise: the task owns no frame"),
            Error::ForeignSuspend => {
                f.write_str("generator suspended on something other than a yield")
            }
        }
    }
}

impl std::error::Error for Error {}

/// what a single resume of a frame ended with
pub(crate) enum Resumed<R> {
    /// the body reached a suspension point
    Suspended,
    /// the body ran to its end
    Returned(R),
    /// the body panicked, the frame must not be resumed again
    Panicked(Box<dyn Any + Send>),
}

/// resume a frame once, catching any panic of its body
#[inline]
pub(crate) fn resume<F>(frame: Pin<&mut F>, cx: &mut Context<'_>) -> Resumed<F::Output>
where
    F: Future + ?Sized,
{
    match panic::catch_unwind(AssertUnwindSafe(|| frame.poll(cx))) {
        Ok(Poll::Pending) => Resumed::Suspended,
        Ok(Poll::Ready(v)) => Resumed::Returned(v),
        Err(cause) => Resumed::Panicked(cause),
    }
}

/// the context synchronous frames are resumed with
///
/// generators never wait on a waker, only on their consumer
#[inline]
pub(crate) fn sync_context() -> Context<'static> {
    Context::from_waker(futures_task::noop_waker_ref())
}

/// the payload of a failure raised by the primitives
#[inline]
pub(crate) fn failure(err: Error) -> Box<dyn Any + Send> {
    Box::new(err)
}
