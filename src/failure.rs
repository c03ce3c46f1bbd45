//! # failure carrier
//!
//! decides what happens to a panic that escapes a frame body
//!
//! the decision is made by a type parameter on every handle, so a frame
//! either always stores and replays its failure ([`Propagate`]) or always
//! aborts the process ([`Terminate`])
//!
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::panic;

use crate::rt::Error;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Propagate {}
    impl Sealed for super::Terminate {}
}

/// type level policy for unhandled failures of a frame
pub trait FailurePolicy: sealed::Sealed + Send + Sync + 'static {
    /// handle a panic that escaped a frame body
    ///
    /// either stores it into `slot` or never returns
    fn capture(slot: &mut Option<Box<dyn Any + Send>>, cause: Box<dyn Any + Send>);

    /// raise a failure detected by the primitives themselves
    fn raise(err: Error) -> !;
}

/// store the failure and replay it at the consumer
#[derive(Debug)]
pub enum Propagate {}

/// abort the process on any failure
#[derive(Debug)]
pub enum Terminate {}

impl FailurePolicy for Propagate {
    #[inline]
    fn capture(slot: &mut Option<Box<dyn Any + Send>>, cause: Box<dyn Any + Send>) {
        error!("panicked inside frame: {}", describe(&*cause));
        *slot = Some(cause);
    }

    fn raise(err: Error) -> ! {
        panic::panic_any(err)
    }
}

impl FailurePolicy for Terminate {
    fn capture(_slot: &mut Option<Box<dyn Any + Send>>, cause: Box<dyn Any + Send>) {
        fatal(&describe(&*cause))
    }

    fn raise(err: Error) -> ! {
        fatal(&err.to_string())
    }
}

/// log and abort
#[cold]
pub(crate) fn fatal(what: &str) -> ! {
    error!("unhandled failure in a non-failing frame, aborting: {what}");
    std::process::abort()
}

/// best effort text of a panic payload
pub(crate) fn describe(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = cause.downcast_ref::<Error>() {
        e.to_string()
    } else {
        "opaque panic payload".to_owned()
    }
}

/// the captured failure of one frame
pub struct Failure<P: FailurePolicy> {
    cause: Option<Box<dyn Any + Send>>,
    _policy: PhantomData<P>,
}

impl<P: FailurePolicy> Failure<P> {
    /// an empty carrier
    pub fn new() -> Self {
        Failure {
            cause: None,
            _policy: PhantomData,
        }
    }

    /// record a panic that escaped the frame body
    ///
    /// under [`Terminate`] this aborts the process
    #[inline]
    pub fn capture(&mut self, cause: Box<dyn Any + Send>) {
        P::capture(&mut self.cause, cause);
    }

    /// is there a failure waiting to be replayed
    #[inline]
    pub fn is_captured(&self) -> bool {
        self.cause.is_some()
    }

    /// raise the captured failure in the caller, at most once
    ///
    /// later calls, or calls without a captured failure, do nothing
    #[inline]
    pub fn replay(&mut self) {
        if let Some(cause) = self.cause.take() {
            panic::resume_unwind(cause);
        }
    }

    /// move the captured failure out, leaving this carrier empty
    #[inline]
    pub(crate) fn take(&mut self) -> Failure<P> {
        Failure {
            cause: self.cause.take(),
            _policy: PhantomData,
        }
    }
}

impl<P: FailurePolicy> Default for Failure<P> {
    fn default() -> Self {
        Failure::new()
    }
}

impl<P: FailurePolicy> fmt::Debug for Failure<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Failure")
            .field("captured", &self.is_captured())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::panic::catch_unwind;

    #[test]
    fn test_replay_once() {
        let mut f = Failure::<Propagate>::new();
        // nothing captured, nothing raised
        f.replay();

        f.capture(Box::new("boom"));
        assert!(f.is_captured());

        let err = catch_unwind(std::panic::AssertUnwindSafe(|| f.replay())).unwrap_err();
        assert_eq!(err.downcast_ref::<&str>(), Some(&"boom"));

        // the second replay is a no-op
        assert!(!f.is_captured());
        f.replay();
    }

    #[test]
    fn test_take() {
        let mut f = Failure::<Propagate>::new();
        f.capture(Box::new(7u32));
        let mut moved = f.take();
        assert!(!f.is_captured());
        assert!(moved.is_captured());

        let err = catch_unwind(std::panic::AssertUnwindSafe(|| moved.replay())).unwrap_err();
        assert_eq!(err.downcast_ref::<u32>(), Some(&7));
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&"a"), "a");
        assert_eq!(describe(&String::from("b")), "b");
        assert_eq!(describe(&1u8), "opaque panic payload");
    }
}
