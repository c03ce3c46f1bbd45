//! # recursive generator
//!
//! a generator that can yield whole nested generators
//!
//! the values of a nested generator are spliced into the sequence in
//! place. nesting is tracked with two pointers per frame instead of native
//! recursion: the root frame points at the leaf that currently produces
//! values, every other frame points at its parent. the consumer always
//! resumes the leaf directly, and a drained leaf is left by one pointer hop
//! back to its parent, so descending or ascending N levels costs N hops
//! and never N native stack frames.
//!
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::ptr;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use crate::failure::{Failure, FailurePolicy, Propagate};
use crate::gen_impl::{Generator, Gn};
use crate::rt::{self, Error, Resumed};
use crate::scope::{Slot, Yield};

type Body<'a> = Pin<Box<dyn Future<Output = ()> + 'a>>;

/// the state of one recursive generator body
struct Frame<'a, T, P: FailurePolicy> {
    // taken out while the body runs, `None` once it finished
    body: Cell<Option<Body<'a>>>,
    slot: Slot<T>,
    // the value this frame yielded last, read through the root
    value: RefCell<Option<T>>,
    done: Cell<bool>,
    // the frame whose handle the consumer holds
    root: RefCell<Weak<Frame<'a, T, P>>>,
    // in the root: the leaf, everywhere else: the parent
    parent_or_leaf: RefCell<Weak<Frame<'a, T, P>>>,
    failure: RefCell<Failure<P>>,
}

/// how a single resume of a frame ended
enum Step {
    /// the frame yielded a value
    Yielded,
    /// the frame spliced a nested generator, which is the new leaf
    Descended,
    /// the frame ran to its end, with or without a failure
    Completed,
}

impl<'a, T, P: FailurePolicy> Frame<'a, T, P> {
    #[inline]
    fn root(&self) -> Option<Rc<Self>> {
        self.root.borrow().upgrade()
    }

    #[inline]
    fn parent_or_leaf(&self) -> Option<Rc<Self>> {
        self.parent_or_leaf.borrow().upgrade()
    }

    #[inline]
    fn set_root(&self, root: &Rc<Self>) {
        *self.root.borrow_mut() = Rc::downgrade(root);
    }

    #[inline]
    fn set_parent_or_leaf(&self, frame: &Rc<Self>) {
        *self.parent_or_leaf.borrow_mut() = Rc::downgrade(frame);
    }

    /// take the value the leaf holds, only valid on the root
    fn take_value(&self) -> Option<T> {
        self.parent_or_leaf()?.value.borrow_mut().take()
    }

    /// resume this frame once, `root` is the root it is spliced into
    fn resume(&self, root: &Self) -> Step {
        let Some(mut body) = self.body.take() else {
            return Step::Completed;
        };
        *self.value.borrow_mut() = None;

        let mut cx = rt::sync_context();
        match rt::resume(body.as_mut(), &mut cx) {
            Resumed::Suspended => {
                if let Some(v) = self.slot.take() {
                    *self.value.borrow_mut() = Some(v);
                    self.body.set(Some(body));
                    return Step::Yielded;
                }
                if !ptr::eq(root.parent_or_leaf.borrow().as_ptr(), self) {
                    self.body.set(Some(body));
                    return Step::Descended;
                }
                error!("recursive generator suspended without yielding");
                self.failure
                    .borrow_mut()
                    .capture(rt::failure(Error::ForeignSuspend));
            }
            Resumed::Returned(()) => {}
            Resumed::Panicked(cause) => self.failure.borrow_mut().capture(cause),
        }

        self.done.set(true);
        Step::Completed
    }
}

/// drive the sequence rooted at `root` to its next value or its end
///
/// every transition is a pointer assignment on the root followed by one
/// resume of the new leaf, no native recursion is involved
fn pull<T, P: FailurePolicy>(root: &Frame<'_, T, P>) {
    loop {
        let Some(leaf) = root.parent_or_leaf() else {
            return;
        };
        match leaf.resume(root) {
            Step::Yielded => return,
            Step::Descended => {
                // a partially consumed generator brings along the value
                // nobody took yet, it comes first
                let pending = root
                    .parent_or_leaf()
                    .map_or(false, |l| l.value.borrow().is_some());
                if pending {
                    return;
                }
            }
            Step::Completed => {
                if ptr::eq(&*leaf, root) {
                    return;
                }
                let Some(parent) = leaf.parent_or_leaf() else {
                    return;
                };
                trace!("nested generator drained, ascending to its parent");
                root.set_parent_or_leaf(&parent);
            }
        }
    }
}

/// make `child` the current leaf of `root`, nested below `parent`
///
/// a child that was partially consumed brings its own active chain along,
/// every frame of that chain is re-rooted
fn splice<'a, T, P: FailurePolicy>(
    root: &Rc<Frame<'a, T, P>>,
    parent: &Rc<Frame<'a, T, P>>,
    child: &Rc<Frame<'a, T, P>>,
) {
    let leaf = child.parent_or_leaf().unwrap_or_else(|| child.clone());

    let mut cur = leaf.clone();
    loop {
        cur.set_root(root);
        if Rc::ptr_eq(&cur, child) {
            break;
        }
        match cur.parent_or_leaf() {
            Some(p) => cur = p,
            None => break,
        }
    }

    child.set_parent_or_leaf(parent);
    root.set_parent_or_leaf(&leaf);
    trace!("nested generator spliced in, descending");
}

/// passed in scope type of a recursive generator body
pub struct RecScope<'a, T, P: FailurePolicy = Propagate> {
    frame: Weak<Frame<'a, T, P>>,
    slot: Slot<T>,
}

impl<'a, T, P: FailurePolicy> RecScope<'a, T, P> {
    /// hand `v` to the consumer and suspend until the next pull
    #[inline]
    pub fn yield_(&mut self, v: T) -> Yield<'_, T> {
        Yield::new(&self.slot, v)
    }

    /// splice all values of `g` into this sequence, in order
    ///
    /// the body continues once `g` is drained, a failure of `g` is raised
    /// inside this body at that point. `g` lives inside the returned
    /// future, so it stays alive for the whole splice. an empty or
    /// exhausted `g` yields nothing and does not suspend.
    pub fn yield_from(&mut self, g: RecursiveGenerator<'a, T, P>) -> YieldFrom<'a, T, P> {
        YieldFrom {
            parent: self.frame.clone(),
            child: g,
            spliced: false,
        }
    }
}

impl<'a, T, P: FailurePolicy> fmt::Debug for RecScope<'a, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RecScope<{}> {{ ... }}", std::any::type_name::<T>())
    }
}

/// future returned by [`RecScope::yield_from`]
#[must_use = "a nested generator yields nothing unless awaited"]
pub struct YieldFrom<'a, T, P: FailurePolicy = Propagate> {
    parent: Weak<Frame<'a, T, P>>,
    child: RecursiveGenerator<'a, T, P>,
    spliced: bool,
}

impl<'a, T, P: FailurePolicy> Future for YieldFrom<'a, T, P> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let Some(child) = this.child.frame.clone() else {
            return Poll::Ready(());
        };

        if !this.spliced {
            this.spliced = true;
            if child.done.get() {
                return Poll::Ready(());
            }
            let Some(parent) = this.parent.upgrade() else {
                return Poll::Ready(());
            };
            let Some(root) = parent.root() else {
                return Poll::Ready(());
            };
            splice(&root, &parent, &child);
            return Poll::Pending;
        }

        // the nested subtree is drained, its failure is ours now
        let mut failure = child.failure.borrow_mut().take();
        failure.replay();
        Poll::Ready(())
    }
}

/// the recursive generator type
///
/// the handle owns only the frame it created, nested generators are owned
/// by the body that yields them
pub struct RecursiveGenerator<'a, T, P: FailurePolicy = Propagate> {
    frame: Option<Rc<Frame<'a, T, P>>>,
}

impl<'a, T, P: FailurePolicy> RecursiveGenerator<'a, T, P> {
    pub(crate) fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(RecScope<'a, T, P>) -> Fut,
        Fut: Future<Output = ()> + 'a,
        T: 'a,
    {
        // a fresh frame is its own root and its own leaf
        let frame = Rc::new_cyclic(|me: &Weak<Frame<'a, T, P>>| Frame {
            body: Cell::new(None),
            slot: Rc::new(Cell::new(None)),
            value: RefCell::new(None),
            done: Cell::new(false),
            root: RefCell::new(me.clone()),
            parent_or_leaf: RefCell::new(me.clone()),
            failure: RefCell::new(Failure::new()),
        });
        let scope = RecScope {
            frame: Rc::downgrade(&frame),
            slot: frame.slot.clone(),
        };
        frame.body.set(Some(Box::pin(f(scope))));
        RecursiveGenerator { frame: Some(frame) }
    }

    /// a recursive generator that owns no frame, the sequence is empty
    pub fn empty() -> Self {
        RecursiveGenerator { frame: None }
    }

    /// is finished
    #[inline]
    pub fn is_done(&self) -> bool {
        self.frame.as_ref().map_or(true, |f| f.done.get())
    }

    /// pull the next value into the leaf
    ///
    /// returns `false` at the end, after replaying a failure of the root body
    fn advance(&self) -> bool {
        let Some(root) = self.frame.as_ref() else {
            return false;
        };
        if root.done.get() {
            return false;
        }

        pull(root);

        if root.done.get() {
            let mut failure = root.failure.borrow_mut().take();
            failure.replay();
            return false;
        }
        true
    }

    /// the frame currently holding the value, `None` at the end
    fn leaf(&self) -> Option<Rc<Frame<'a, T, P>>> {
        let root = self.frame.as_ref()?;
        if root.done.get() {
            return None;
        }
        root.parent_or_leaf()
    }

    /// start the generator and return a cursor at its first value
    ///
    /// if the body already ran, the cursor points at the value nobody took
    /// yet, or at the next one
    pub fn begin(&mut self) -> RecCursor<'_, 'a, T, P> {
        let pending = self
            .leaf()
            .map_or(false, |leaf| leaf.value.borrow().is_some());
        if !pending {
            self.advance();
        }
        let leaf = self.leaf();
        RecCursor { owner: self, leaf }
    }

    /// apply `f` to every value, lazily, one application per pull
    ///
    /// the result is a plain generator, it is not meant to be nested again
    pub fn fmap<U, F>(self, mut f: F) -> Generator<'a, U, P>
    where
        F: FnMut(T) -> U + 'a,
        T: 'a,
        U: 'a,
    {
        Gn::<P>::scoped(move |mut s| async move {
            for v in self {
                s.yield_(f(v)).await;
            }
        })
    }
}

impl<'a, T, P: FailurePolicy> Default for RecursiveGenerator<'a, T, P> {
    fn default() -> Self {
        RecursiveGenerator::empty()
    }
}

impl<'a, T, P: FailurePolicy> Drop for RecursiveGenerator<'a, T, P> {
    fn drop(&mut self) {
        let Some(root) = self.frame.as_ref() else {
            return;
        };
        if root.done.get() {
            return;
        }
        // spliced into another sequence, that root tears the chain down
        if !root.root().map_or(true, |r| Rc::ptr_eq(&r, root)) {
            return;
        }

        debug!("recursive generator is not done while drop, cancelling");
        // drop the open bodies leaf first, so every body goes away after
        // the nested one it holds and no drop recurses through the chain
        let mut cur = root.parent_or_leaf();
        while let Some(frame) = cur {
            cur = if Rc::ptr_eq(&frame, root) {
                None
            } else {
                frame.parent_or_leaf()
            };
            drop(frame.body.take());
        }
    }
}

impl<'a, T, P: FailurePolicy> Iterator for RecursiveGenerator<'a, T, P> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let root = self.frame.clone()?;
        if let Some(v) = root.take_value() {
            return Some(v);
        }
        if self.advance() {
            root.take_value()
        } else {
            None
        }
    }
}

impl<'a, T, P: FailurePolicy> fmt::Debug for RecursiveGenerator<'a, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "RecursiveGenerator<{}> {{ done: {} }}",
            std::any::type_name::<T>(),
            self.is_done()
        )
    }
}

/// external iterator over a recursive generator
pub struct RecCursor<'g, 'a, T, P: FailurePolicy = Propagate> {
    owner: &'g mut RecursiveGenerator<'a, T, P>,
    // the leaf the root pointed at after the last pull
    leaf: Option<Rc<Frame<'a, T, P>>>,
}

impl<'g, 'a, T, P: FailurePolicy> RecCursor<'g, 'a, T, P> {
    /// does the cursor equal the end marker
    #[inline]
    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// the value held by the current leaf, `None` at the end
    pub fn get(&self) -> Option<Ref<'_, T>> {
        let leaf = self.leaf.as_ref()?;
        Ref::filter_map(leaf.value.borrow(), Option::as_ref).ok()
    }

    /// pull the next value
    ///
    /// a failure of the root body is raised here, after which the cursor is
    /// at the end
    pub fn advance(&mut self) {
        self.leaf = None;
        if self.owner.advance() {
            self.leaf = self.owner.leaf();
        }
    }
}

impl<'g, 'a, T, P: FailurePolicy> fmt::Debug for RecCursor<'g, 'a, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RecCursor")
            .field("end", &self.is_end())
            .finish()
    }
}
