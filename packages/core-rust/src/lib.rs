//! Nexus Core: operation state machine, content serializers, failures, and wire constants.

pub mod completion;
pub mod content;
pub mod error;
pub mod failure;
pub mod serializer;
pub mod state;
pub mod wire;

pub use completion::OperationCompletion;
pub use content::Content;
pub use error::{HandlerError, UnsuccessfulOperationError};
pub use failure::{DefaultFailureConverter, Failure, FailureConverter, FailureError};
pub use serializer::{
    ByteSliceSerializer, DecodeTarget, Fit, JsonSerializer, NilSerializer, Outgoing, Serializer,
    SerializerChain, SerializerError, Slot,
};
pub use state::{OperationInfo, OperationState, StateError};
pub use wire::WireError;
