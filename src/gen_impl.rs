//! # generator
//!
//! lazy, pull based, single pass value sequence
//!
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;

use crate::failure::{Failure, FailurePolicy, Propagate, Terminate};
use crate::recursive::{RecScope, RecursiveGenerator};
use crate::rt::{self, Error, Resumed};
use crate::scope::{Scope, Slot};

type Frame<'a> = Pin<Box<dyn Future<Output = ()> + 'a>>;

/// Generator helper
///
/// the type parameter picks the failure policy of the generators it builds
pub struct Gn<P = Propagate> {
    dummy: PhantomData<P>,
}

impl Gn {
    /// create a generator whose failures are replayed to the consumer
    pub fn new_scoped<'a, T, F, Fut>(f: F) -> Generator<'a, T>
    where
        F: FnOnce(Scope<T>) -> Fut,
        Fut: Future<Output = ()> + 'a,
        T: 'a,
    {
        Gn::<Propagate>::scoped(f)
    }

    /// create a recursive generator whose failures are replayed to the consumer
    pub fn new_recursive<'a, T, F, Fut>(f: F) -> RecursiveGenerator<'a, T>
    where
        F: FnOnce(RecScope<'a, T, Propagate>) -> Fut,
        Fut: Future<Output = ()> + 'a,
        T: 'a,
    {
        Gn::<Propagate>::recursive(f)
    }
}

impl Gn<Terminate> {
    /// create a generator that aborts the process if its body panics
    pub fn nothrow_scoped<'a, T, F, Fut>(f: F) -> Generator<'a, T, Terminate>
    where
        F: FnOnce(Scope<T>) -> Fut,
        Fut: Future<Output = ()> + 'a,
        T: 'a,
    {
        Gn::<Terminate>::scoped(f)
    }

    /// create a recursive generator that aborts the process if a body panics
    pub fn nothrow_recursive<'a, T, F, Fut>(f: F) -> RecursiveGenerator<'a, T, Terminate>
    where
        F: FnOnce(RecScope<'a, T, Terminate>) -> Fut,
        Fut: Future<Output = ()> + 'a,
        T: 'a,
    {
        Gn::<Terminate>::recursive(f)
    }
}

impl<P: FailurePolicy> Gn<P> {
    /// create a generator with the failure policy `P`
    ///
    /// `f` receives the scope and returns the body, the body does not
    /// run until the generator is first pulled
    pub fn scoped<'a, T, F, Fut>(f: F) -> Generator<'a, T, P>
    where
        F: FnOnce(Scope<T>) -> Fut,
        Fut: Future<Output = ()> + 'a,
        T: 'a,
    {
        let slot: Slot<T> = Rc::new(Cell::new(None));
        let body = f(Scope::new(slot.clone()));
        Generator {
            frame: Some(Box::pin(body)),
            slot,
            current: None,
            started: false,
            failure: Failure::new(),
        }
    }

    /// create a recursive generator with the failure policy `P`
    pub fn recursive<'a, T, F, Fut>(f: F) -> RecursiveGenerator<'a, T, P>
    where
        F: FnOnce(RecScope<'a, T, P>) -> Fut,
        Fut: Future<Output = ()> + 'a,
        T: 'a,
    {
        RecursiveGenerator::new(f)
    }
}

/// the generator type
///
/// owns its frame exclusively, dropping it before the body finished
/// cancels the body
pub struct Generator<'a, T, P: FailurePolicy = Propagate> {
    // `None` once the body has finished, or for an empty handle
    frame: Option<Frame<'a>>,
    // where the body deposits yielded values
    slot: Slot<T>,
    // the value the consumer currently looks at
    current: Option<T>,
    started: bool,
    failure: Failure<P>,
}

impl<'a, T, P: FailurePolicy> Generator<'a, T, P> {
    /// a generator that owns no frame, the sequence is empty
    pub fn empty() -> Self {
        Generator {
            frame: None,
            slot: Rc::new(Cell::new(None)),
            current: None,
            started: true,
            failure: Failure::new(),
        }
    }

    /// is finished
    ///
    /// true for an empty handle, or once the body has run to its end
    #[inline]
    pub fn is_done(&self) -> bool {
        self.frame.is_none()
    }

    /// resume the body until the next yield or its end
    ///
    /// returns `false` when the sequence is exhausted, after replaying a
    /// failure of the body if there was one
    fn pull(&mut self) -> bool {
        self.started = true;
        self.current = None;

        let Some(frame) = self.frame.as_mut() else {
            return false;
        };

        let mut cx = rt::sync_context();
        match rt::resume(frame.as_mut(), &mut cx) {
            Resumed::Suspended => match self.slot.take() {
                Some(v) => {
                    self.current = Some(v);
                    return true;
                }
                None => {
                    error!("generator suspended without yielding");
                    self.failure.capture(rt::failure(Error::ForeignSuspend));
                }
            },
            Resumed::Returned(()) => {}
            Resumed::Panicked(cause) => self.failure.capture(cause),
        }

        // the body is finished, release its frame before replaying
        self.frame = None;
        self.failure.replay();
        false
    }

    /// start the generator and return a cursor at its first value
    ///
    /// if the body already ran, the cursor points at the value nobody took
    /// yet, or at the next one
    pub fn begin(&mut self) -> Cursor<'_, 'a, T, P> {
        if self.current.is_none() {
            self.pull();
        }
        Cursor { owner: self }
    }

    /// apply `f` to every value, lazily, one application per pull
    pub fn fmap<U, F>(self, f: F) -> Generator<'a, U, P>
    where
        F: FnMut(T) -> U + 'a,
        T: 'a,
        U: 'a,
    {
        fmap(f, self)
    }
}

impl<'a, T, P: FailurePolicy> Default for Generator<'a, T, P> {
    fn default() -> Self {
        Generator::empty()
    }
}

impl<'a, T, P: FailurePolicy> Drop for Generator<'a, T, P> {
    fn drop(&mut self) {
        // the frame field drops right after this, which cancels the body
        if self.started && self.frame.is_some() {
            debug!("generator is not done while drop, cancelling");
        }
    }
}

impl<'a, T, P: FailurePolicy> Iterator for Generator<'a, T, P> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        // a value the cursor api already pulled but nobody took
        if let Some(v) = self.current.take() {
            return Some(v);
        }
        if self.pull() {
            self.current.take()
        } else {
            None
        }
    }
}

impl<'a, T, P: FailurePolicy> fmt::Debug for Generator<'a, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Generator<{}> {{ started: {}, done: {} }}",
            std::any::type_name::<T>(),
            self.started,
            self.is_done()
        )
    }
}

/// external iterator over a generator
///
/// points at the most recently yielded value, or at the end
pub struct Cursor<'g, 'a, T, P: FailurePolicy = Propagate> {
    owner: &'g mut Generator<'a, T, P>,
}

impl<'g, 'a, T, P: FailurePolicy> Cursor<'g, 'a, T, P> {
    /// does the cursor equal the end marker
    #[inline]
    pub fn is_end(&self) -> bool {
        self.owner.current.is_none()
    }

    /// the most recently yielded value, `None` at the end
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.owner.current.as_ref()
    }

    /// resume the body for the next value
    ///
    /// a failure of the body is raised here, after which the cursor is at
    /// the end
    pub fn advance(&mut self) {
        self.owner.pull();
    }
}

impl<'g, 'a, T, P: FailurePolicy> fmt::Debug for Cursor<'g, 'a, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cursor").field("end", &self.is_end()).finish()
    }
}

/// a generator that yields `f(v)` for every `v` of `source`
///
/// nothing is applied until the result is pulled, and `source` is only
/// pulled as far as the result is
pub fn fmap<'a, T, U, P, F>(mut f: F, source: Generator<'a, T, P>) -> Generator<'a, U, P>
where
    F: FnMut(T) -> U + 'a,
    P: FailurePolicy,
    T: 'a,
    U: 'a,
{
    Gn::<P>::scoped(move |mut s| async move {
        for v in source {
            s.yield_(f(v)).await;
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_lazy_start() {
        let ran = Cell::new(false);
        let flag = &ran;
        let mut g = Gn::new_scoped(|mut s| async move {
            flag.set(true);
            s.yield_(1).await;
        });
        assert!(!ran.get());
        assert!(!g.is_done());

        assert_eq!(g.next(), Some(1));
        assert!(ran.get());
        assert_eq!(g.next(), None);
        assert!(g.is_done());
    }

    #[test]
    fn test_cursor() {
        let mut g = Gn::new_scoped(|mut s| async move {
            s.yield_(String::from("a")).await;
            s.yield_(String::from("b")).await;
        });

        let mut it = g.begin();
        assert_eq!(it.get().map(String::as_str), Some("a"));
        it.advance();
        assert_eq!(it.get().map(String::as_str), Some("b"));
        it.advance();
        assert!(it.is_end());
        assert!(g.is_done());
    }

    #[test]
    fn test_empty_sequence() {
        let mut g = Gn::new_scoped(|_s: Scope<u8>| async {});
        assert!(g.begin().is_end());

        let mut e: Generator<u8> = Generator::default();
        assert!(e.is_done());
        assert!(e.begin().is_end());
        assert_eq!(e.next(), None);
    }

    #[test]
    fn test_foreign_suspend_rejected() {
        let mut g = Gn::new_scoped(|mut s| async move {
            s.yield_(1).await;
            std::future::pending::<()>().await;
            s.yield_(2).await;
        });
        assert_eq!(g.next(), Some(1));

        let err = catch_unwind(AssertUnwindSafe(|| g.next())).unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::ForeignSuspend));
        assert!(g.is_done());
        assert_eq!(g.next(), None);
    }

    #[test]
    fn test_cursor_then_iterator() {
        let mut g = Gn::new_scoped(|mut s| async move {
            for i in 0..3 {
                s.yield_(i).await;
            }
        });
        assert_eq!(g.begin().get(), Some(&0));
        // the value under the cursor is not skipped
        assert_eq!(g.collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
