//! Durable coroutine runtime.
//!
//! This crate is the runtime half of the Strand durable-coroutine system:
//! the typed frame stack, the yield/context protocol, and the
//! identity-preserving serialization that `strandc`-rewritten code links
//! against. A suspended coroutine's entire call state lives in
//! [`Context::stack`]; marshaling that stack and unmarshaling it in another
//! process reconstructs the computation exactly where it left off.
//!
//! Rewritten procedures follow a fixed shape: push a typed frame, run the
//! frame initializer when entering for the first time, dispatch into the
//! span recorded by the frame's instruction pointer, and on exit either pop
//! the frame or, when unwinding toward a suspension, retain it for the
//! next resumption. The unwind sentinel is the [`Unwound`] break value of
//! [`std::ops::ControlFlow`], threaded through every colored procedure.

mod context;
mod coroutine;
pub mod error;
mod ptr;
pub mod serde;
mod slice;
mod stack;
pub mod types;

pub use context::{Context, Heap, Unwound};
pub use coroutine::{Coroutine, Entrypoint};
pub use error::{CallbackError, CoroutineError, SerdeError};
pub use ptr::{deserialize_ptr, serialize_ptr, Ptr};
pub use slice::{deserialize_slice, serialize_slice, Slice};
pub use stack::{register_deferred, DeferFn, Frame, FrameCell, Stack};
