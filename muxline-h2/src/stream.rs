//! Stream handles: the protocol-level identity of an HTTP/2 stream.

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Lifecycle state of a protocol-level stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Stream handle created but not yet opened on the wire.
    Idle,
    /// Stream is open on the wire.
    Active,
    /// Stream is fully closed on the wire.
    Closed,
}

struct Inner {
    id: Option<u32>,
    state: StreamState,
}

/// An opaque handle for a protocol-level HTTP/2 stream.
///
/// Carries the stream identifier (assigned by the framing layer; `None`
/// for a locally-initiated stream whose first HEADERS has not hit the
/// wire yet) and the wire-level lifecycle state. Cloning shares the
/// handle; equality and hashing are by identity, not by id, so two
/// handles that happen to carry the same id are still distinct streams.
#[derive(Clone)]
pub struct FrameStream {
    inner: Rc<RefCell<Inner>>,
}

impl FrameStream {
    /// A fresh handle with no identifier, for a locally-initiated stream.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id: None,
                state: StreamState::Idle,
            })),
        }
    }

    /// A handle for a stream the framing layer already assigned an id.
    pub fn with_id(id: u32) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id: Some(id),
                state: StreamState::Idle,
            })),
        }
    }

    /// The stream identifier, if one has been assigned.
    pub fn id(&self) -> Option<u32> {
        self.inner.borrow().id
    }

    /// Whether an identifier has been assigned.
    pub fn has_id(&self) -> bool {
        self.inner.borrow().id.is_some()
    }

    /// Assign the stream identifier. Called by the framing layer when the
    /// stream's first HEADERS frame is written to the wire.
    pub fn set_id(&self, id: u32) {
        self.inner.borrow_mut().id = Some(id);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.inner.borrow().state
    }

    /// Update the lifecycle state. Called by the framing layer and by the
    /// multiplexer when it processes lifecycle events.
    pub fn set_state(&self, state: StreamState) {
        self.inner.borrow_mut().state = state;
    }

    /// Whether a stream with `id` was initiated by this endpoint.
    ///
    /// Odd ids are client-initiated, even ids are server-initiated.
    pub fn is_outbound(server: bool, id: u32) -> bool {
        id != 0 && server == (id % 2 == 0)
    }
}

impl Default for FrameStream {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for FrameStream {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for FrameStream {}

impl Hash for FrameStream {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("FrameStream")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .finish()
    }
}
