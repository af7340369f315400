//! # ipcrpc
//!
//! The wire vocabulary shared by both ends of the IPC bridge.
//!
//! ## Architecture
//!
//! - [`Value`] is the only data that crosses the channel.
//! - A [`Response`] is a list of values in one of two shapes: a single `Null`
//!   carrying a transport failure, or an [`ErrorCode`]-prefixed application outcome.
//! - Frames ([`CallFrame`], [`ReplyFrame`]) wrap values into message bodies using
//!   `ipcpack`. How those bodies are cut out of a byte stream is the transport's job.

pub mod codec;
pub mod error;
pub mod frame;
pub mod response;
pub mod value;


pub use codec::decode_val;
pub use codec::decode_vals;
pub use codec::encode_val;
pub use codec::encode_vals;
pub use error::ErrorCode;
pub use error::Result;
pub use error::RpcError;
pub use frame::CallDecoder;
pub use frame::CallFrame;
pub use frame::Frame;
pub use frame::ReplyDecoder;
pub use frame::ReplyFrame;
pub use frame::peek_id;
pub use response::CallError;
pub use response::Response;
pub use value::Value;
pub use value::ValueType;

/// Identifier correlating a Call frame with its Reply.
pub type CallId = u64;
