//! Write-completion promises.
//!
//! Every write submitted toward the parent context carries a
//! [`WritePromise`]. The framing layer completes it when the write
//! succeeds or fails; listeners registered on the promise run inline on
//! completion, on the connection's event loop. A promise completes at
//! most once and cannot be cancelled — there is deliberately no cancel
//! operation on this type.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Error;

type Listener = Box<dyn FnOnce(&Result<(), Error>)>;

struct Inner {
    result: Option<Result<(), Error>>,
    listeners: Vec<Listener>,
}

/// A one-shot completion handle for a submitted write.
///
/// Cloning shares the handle. Single-threaded by construction.
#[derive(Clone)]
pub struct WritePromise {
    inner: Rc<RefCell<Inner>>,
}

impl WritePromise {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                result: None,
                listeners: Vec::new(),
            })),
        }
    }

    /// Complete successfully. Returns false if already completed.
    pub fn try_succeed(&self) -> bool {
        self.try_complete(Ok(()))
    }

    /// Complete with a failure. Returns false if already completed.
    pub fn try_fail(&self, cause: Error) -> bool {
        self.try_complete(Err(cause))
    }

    fn try_complete(&self, result: Result<(), Error>) -> bool {
        let listeners = {
            let mut inner = self.inner.borrow_mut();
            if inner.result.is_some() {
                return false;
            }
            inner.result = Some(result.clone());
            std::mem::take(&mut inner.listeners)
        };
        // Dispatch outside the borrow: a listener may re-enter the promise.
        for listener in listeners {
            listener(&result);
        }
        true
    }

    /// Whether the promise has completed.
    pub fn is_done(&self) -> bool {
        self.inner.borrow().result.is_some()
    }

    /// The completion result, if done.
    pub fn result(&self) -> Option<Result<(), Error>> {
        self.inner.borrow().result.clone()
    }

    /// Register a completion listener.
    ///
    /// Runs inline immediately if the promise already completed.
    pub fn add_listener(&self, listener: impl FnOnce(&Result<(), Error>) + 'static) {
        let done = {
            let mut inner = self.inner.borrow_mut();
            if inner.result.is_none() {
                inner.listeners.push(Box::new(listener));
                return;
            }
            inner.result.clone().expect("completed")
        };
        listener(&done);
    }

    /// Forward this promise's completion to `target`.
    ///
    /// Used to wrap a child channel's promise in a fresh parent promise:
    /// when the parent write completes, the child promise completes with
    /// the same result.
    pub fn forward_to(&self, target: &WritePromise) {
        let target = target.clone();
        self.add_listener(move |result| {
            match result {
                Ok(()) => target.try_succeed(),
                Err(cause) => target.try_fail(cause.clone()),
            };
        });
    }
}

impl Default for WritePromise {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WritePromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePromise")
            .field("result", &self.inner.borrow().result)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_once() {
        let promise = WritePromise::new();
        assert!(promise.try_succeed());
        assert!(!promise.try_fail(Error::ChannelClosed));
        assert_eq!(promise.result(), Some(Ok(())));
    }

    #[test]
    fn listener_fires_on_completion() {
        let promise = WritePromise::new();
        let fired = Rc::new(RefCell::new(false));
        let flag = fired.clone();
        promise.add_listener(move |result| {
            assert!(result.is_ok());
            *flag.borrow_mut() = true;
        });
        assert!(!*fired.borrow());
        promise.try_succeed();
        assert!(*fired.borrow());
    }

    #[test]
    fn late_listener_fires_immediately() {
        let promise = WritePromise::new();
        promise.try_fail(Error::ChannelClosed);
        let fired = Rc::new(RefCell::new(false));
        let flag = fired.clone();
        promise.add_listener(move |result| {
            assert_eq!(result, &Err(Error::ChannelClosed));
            *flag.borrow_mut() = true;
        });
        assert!(*fired.borrow());
    }

    #[test]
    fn forwarding_completes_the_target() {
        let parent = WritePromise::new();
        let child = WritePromise::new();
        parent.forward_to(&child);
        assert!(!child.is_done());
        parent.try_fail(Error::NotAttached);
        assert_eq!(child.result(), Some(Err(Error::NotAttached)));
    }

    #[test]
    fn listener_may_reenter_the_promise() {
        let promise = WritePromise::new();
        let observed = Rc::new(RefCell::new(None));
        let handle = promise.clone();
        let slot = observed.clone();
        promise.add_listener(move |_| {
            *slot.borrow_mut() = Some(handle.is_done());
        });
        promise.try_succeed();
        assert_eq!(*observed.borrow(), Some(true));
    }
}
