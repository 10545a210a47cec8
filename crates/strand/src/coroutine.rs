//! The coroutine driver.

use std::ops::ControlFlow;

use crate::context::{Context, Unwound};
use crate::error::{CoroutineError, SerdeError};

/// Entry point of a coroutine: the rewritten root procedure. It is invoked
/// to start the coroutine and re-invoked on every resumption; the frame
/// stack carries it back to the last yield point.
pub type Entrypoint<R, S> = Box<dyn FnMut(&mut Context<R, S>) -> ControlFlow<Unwound>>;

/// A pausable computation over a context yielding `R` and receiving `S`.
pub struct Coroutine<R, S = ()> {
    ctx: Context<R, S>,
    entry: Entrypoint<R, S>,
}

impl<R, S> Coroutine<R, S> {
    pub fn new(entry: impl FnMut(&mut Context<R, S>) -> ControlFlow<Unwound> + 'static) -> Self {
        Coroutine {
            ctx: Context::new(),
            entry: Box::new(entry),
        }
    }

    /// Starts or resumes the coroutine. Returns `Ok(true)` when it
    /// suspended at a yield (a received value is available), `Ok(false)`
    /// when it ran to completion or tore down after a stop. Resuming a
    /// completed coroutine is an error.
    pub fn next(&mut self) -> Result<bool, CoroutineError> {
        if self.ctx.is_done() {
            return Err(CoroutineError::Completed);
        }
        self.ctx.stack.rewind();
        // Both a completed run and a suspension return here; which one
        // happened is recorded on the stack, not in the control flow.
        let _ = (self.entry)(&mut self.ctx);
        if self.ctx.unwinding() {
            Ok(true)
        } else {
            self.ctx.set_done();
            Ok(false)
        }
    }

    /// Takes the value produced by the last yield, if any.
    pub fn recv(&mut self) -> Option<R> {
        self.ctx.take_recv()
    }

    /// Stages the value the next yield will observe as its result.
    pub fn send(&mut self, v: S) {
        self.ctx.set_send(v);
    }

    /// Interrupts the coroutine: the next call to [`next`](Self::next) will
    /// not return to the yield point; it unwinds the stack, running
    /// deferred calls as frames are popped.
    pub fn stop(&mut self) {
        self.ctx.set_stop();
    }

    pub fn done(&self) -> bool {
        self.ctx.is_done()
    }

    pub fn stopped(&self) -> bool {
        self.ctx.is_stopped()
    }

    pub fn context(&self) -> &Context<R, S> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context<R, S> {
        &mut self.ctx
    }

    /// Appends the coroutine's persisted state to `buf`. Valid only while
    /// quiescent: suspended at a yield, or not yet started.
    pub fn marshal_append(&self, buf: Vec<u8>) -> Result<Vec<u8>, SerdeError> {
        self.ctx.marshal_append(buf)
    }

    /// Restores persisted state into this coroutine, replacing its stack.
    /// Returns the number of bytes consumed.
    pub fn unmarshal(&mut self, buf: &[u8]) -> Result<usize, SerdeError> {
        self.ctx.unmarshal(buf)
    }
}
