#![forbid(unsafe_code)]
//! Wire-level types for the helper RPC channel: the line-delimited (or
//! length-prefixed) JSON-RPC-like protocol spoken between the controller's
//! [`Driver`](../zof_core/index.html) and the external translation helper.
//!
//! This crate intentionally does no I/O — it only encodes/decodes the JSON
//! envelopes and hands back typed values. `zof-core` owns the actual pipes.

mod envelope;
mod event;
mod framing;
mod xid;

pub use envelope::{
    decode_message, encode_request, IncomingMessage, ProtocolError, RpcError, RpcNotification,
    RpcReply, RpcRequest,
};
pub use event::{Event, EventType};
pub use framing::{decode_length_prefixed, encode_length_prefixed, Framing};
pub use xid::{allocate_xid, Xid};
