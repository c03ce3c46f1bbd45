//! # yield
//!
//! the handle a generator body uses to hand values to its consumer
//!
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::failure::FailurePolicy;
use crate::gen_impl::Generator;

/// the slot a frame deposits its yielded value into
pub(crate) type Slot<T> = Rc<Cell<Option<T>>>;

/// passed in scope type
///
/// it keeps its own reference to the frame's value slot, the consumer
/// collects the value once the frame has suspended
pub struct Scope<T> {
    slot: Slot<T>,
}

impl<T> Scope<T> {
    /// create a new scope object
    pub(crate) fn new(slot: Slot<T>) -> Self {
        Scope { slot }
    }

    /// hand `v` to the consumer and suspend until the next pull
    ///
    /// this is the only suspension point a generator body may use
    #[inline]
    pub fn yield_(&mut self, v: T) -> Yield<'_, T> {
        Yield::new(&self.slot, v)
    }

    /// re-yield every value of another generator, in order
    ///
    /// the source generator is pulled one value per pull of this one;
    /// a failure it raises is raised inside this body
    pub async fn yield_from<P: FailurePolicy>(&mut self, g: Generator<'_, T, P>) {
        for v in g {
            self.yield_(v).await;
        }
    }
}

impl<T> fmt::Debug for Scope<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Scope<{}> {{ ... }}", std::any::type_name::<T>())
    }
}

/// future returned by [`Scope::yield_`]
///
/// the first poll deposits the value and suspends, the second one resumes
#[must_use = "a yield does nothing unless awaited"]
pub struct Yield<'s, T> {
    slot: &'s Cell<Option<T>>,
    value: Option<T>,
}

// the value is never pinned, it only passes through
impl<T> Unpin for Yield<'_, T> {}

impl<'s, T> Yield<'s, T> {
    pub(crate) fn new(slot: &'s Cell<Option<T>>, v: T) -> Self {
        Yield {
            slot,
            value: Some(v),
        }
    }
}

impl<T> Future for Yield<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.value.take() {
            Some(v) => {
                this.slot.set(Some(v));
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}
