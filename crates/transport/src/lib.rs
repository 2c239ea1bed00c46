//! Client-facing message framing.
//!
//! Two disciplines carry the same JSON-RPC traffic:
//! - [`JsonLinesCodec`]: one JSON document per `\n`-terminated line (MCP stdio)
//! - [`LengthPrefixedCodec`]: 4-byte little-endian length + UTF-8 JSON
//!   (browser native-messaging style)
//!
//! [`ClientCodec`] picks one at startup from a [`Framing`] value; nothing is
//! negotiated with the other side.

pub mod codec;
pub mod error;
pub mod framing;

pub use {
    codec::{Inbound, JsonLinesCodec, LengthPrefixedCodec},
    error::{Error, Result},
    framing::{ClientCodec, ClientReader, ClientWriter, DEFAULT_MAX_FRAME_BYTES, Framing, split, stdio},
};
