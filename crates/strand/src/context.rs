//! The per-coroutine context and the yield protocol.

use std::ops::ControlFlow;

use crate::error::SerdeError;
use crate::serde::{Deserializer, Serializer};
use crate::stack::{deserialize_stack, serialize_stack, Stack};

/// The unwind sentinel.
///
/// A yield does not return through the stack the way an ordinary value
/// does: every colored procedure returns `ControlFlow<Unwound, T>`, and a
/// suspension travels upward as `ControlFlow::Break(Unwound)`, checked with
/// `?` at each call that may yield. The sentinel never escapes to the
/// coroutine's caller; the driver absorbs it at the entrypoint boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwound;

/// Heap of a coroutine. Frame-reachable allocations are reconstructed
/// through pointer identity during unmarshal; the heap itself is not yet
/// persisted.
#[derive(Default)]
pub struct Heap {}

/// Context is passed to a coroutine and flows through all procedures that
/// yield (or could yield).
pub struct Context<R, S = ()> {
    /// Value passed to yield when the coroutine hands control back to its
    /// caller.
    recv: Option<R>,
    /// Value handed to the coroutine when the caller resumes it.
    send: Option<S>,

    done: bool,
    stop: bool,

    pub stack: Stack,
    pub heap: Heap,
}

impl<R, S> Context<R, S> {
    pub(crate) fn new() -> Self {
        Context {
            recv: None,
            send: None,
            done: false,
            stop: false,
            stack: Stack::new(),
            heap: Heap::default(),
        }
    }

    /// Suspends the coroutine with `value`, or, when re-entered during a
    /// resumption, hands back the value the caller sent.
    ///
    /// Panics on a fresh yield after the coroutine was stopped; a stopped
    /// coroutine only unwinds.
    pub fn yield_value(&mut self, value: R) -> ControlFlow<Unwound, S>
    where
        S: Default,
    {
        let frame = self
            .stack
            .top()
            .expect("yield outside of a coroutine frame");
        let resuming = frame.borrow().resume;
        if resuming {
            frame.borrow_mut().resume = false;
            if self.stop {
                return ControlFlow::Break(Unwound);
            }
            ControlFlow::Continue(self.send.take().unwrap_or_default())
        } else {
            if self.stop {
                panic!("cannot yield from a coroutine that has been stopped");
            }
            frame.borrow_mut().resume = true;
            self.send = None;
            self.recv = Some(value);
            ControlFlow::Break(Unwound)
        }
    }

    /// True while the coroutine is unwinding its stack toward a suspension.
    /// Epilogues of colored procedures consult this to decide between
    /// popping their frame and retaining it for resumption.
    pub fn unwinding(&self) -> bool {
        self.stack.top().map_or(false, |f| f.borrow().resume)
    }

    pub(crate) fn take_recv(&mut self) -> Option<R> {
        self.recv.take()
    }

    pub(crate) fn set_send(&mut self, v: S) {
        self.send = Some(v);
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn set_done(&mut self) {
        self.done = true;
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop
    }

    pub(crate) fn set_stop(&mut self) {
        self.stop = true;
    }

    /// Appends the serialized context to `buf` and returns the extended
    /// buffer. The coroutine must be quiescent (suspended or not yet
    /// started).
    pub fn marshal_append(&self, buf: Vec<u8>) -> Result<Vec<u8>, SerdeError> {
        let mut s = Serializer::with_buffer(buf);
        serialize_stack(&mut s, &self.stack)?;
        // The heap is not persisted; see Heap.
        Ok(s.into_inner())
    }

    /// Consumes a serialized context from a prefix of `buf`, returning the
    /// number of bytes read so the caller can chain.
    pub fn unmarshal(&mut self, buf: &[u8]) -> Result<usize, SerdeError> {
        let mut d = Deserializer::new(buf);
        self.stack = deserialize_stack(&mut d)?;
        Ok(d.consumed())
    }
}
