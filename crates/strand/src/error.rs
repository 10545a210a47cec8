use thiserror::Error;

/// Failure reported by a user-supplied codec. Wrapped with the type name
/// before it surfaces from a marshal or unmarshal operation.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the frame stack and the coroutine driver.
#[derive(Debug, Error)]
pub enum CoroutineError {
    /// Pop was called against an empty frame stack.
    #[error("pop on an empty frame stack")]
    StackUnderflow,

    /// The coroutine already ran to completion (or was torn down by a
    /// stop); it cannot be resumed again.
    #[error("coroutine has already completed")]
    Completed,
}

/// Errors surfaced while marshaling or unmarshaling coroutine state.
#[derive(Debug, Error)]
pub enum SerdeError {
    /// A type was registered without both a serializer and a deserializer.
    #[error("type {type_name}: both serializer and deserializer must be provided")]
    MissingCallback { type_name: &'static str },

    /// A value's type has no registered codecs.
    #[error("type {type_name} is not registered")]
    UnregisteredType { type_name: &'static str },

    /// A user-supplied serializer reported failure.
    #[error("serializing {type_name}: {source}")]
    SerializeCallback {
        type_name: &'static str,
        source: CallbackError,
    },

    /// A user-supplied deserializer reported failure.
    #[error("deserializing {type_name}: {source}")]
    DeserializeCallback {
        type_name: &'static str,
        source: CallbackError,
    },

    /// The input buffer ended before the value did.
    #[error("truncated input: needed {needed} bytes at offset {offset}")]
    UnexpectedEof { needed: usize, offset: usize },

    /// A type id read from the wire has no registration.
    #[error("unknown type id {0}")]
    UnknownTypeId(u64),

    /// A pointer record carried a tag byte other than null/inline/backref.
    #[error("invalid pointer tag {tag:#04x} at offset {offset}")]
    InvalidPointerTag { tag: u8, offset: usize },

    /// A back-reference named an offset that was never deserialized, or one
    /// holding an allocation of a different type.
    #[error("back-reference to offset {0} does not resolve to the requested type")]
    BadBackReference(u64),

    /// A sequence header disagreed with its reconstructed backing array.
    #[error("sequence header (off {off}, len {len}, cap {cap}) does not fit backing array of {backing} elements")]
    InvalidSequenceHeader {
        off: u64,
        len: u64,
        cap: u64,
        backing: usize,
    },

    /// A varint ran past its maximum width.
    #[error("malformed varint at offset {0}")]
    InvalidVarint(usize),

    /// A string on the wire was not valid UTF-8.
    #[error("invalid utf-8 in string at offset {0}")]
    InvalidUtf8(usize),

    /// A deferred entry deserialized to a type that was never registered as
    /// a deferred callable.
    #[error("type {type_name} is not registered as a deferred callable")]
    NotADeferred { type_name: &'static str },
}
