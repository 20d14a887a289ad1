//! # mssql-codec
//!
//! Async framing layer for TDS packets.
//!
//! This crate turns raw byte streams into TDS packets and back, handling
//! reassembly across TCP segment boundaries, message reassembly from multiple
//! packets, and outbound splitting of payloads that exceed the negotiated
//! packet size (large LOGIN7 payloads with FEDAUTH tokens being the usual
//! case).
//!
//! ```text
//! TCP/TLS stream → TdsCodec (packet framing) → MessageAssembler → tokens
//!                ← split_message (chunking, RESET_CONNECTION)   ← requests
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use error::CodecError;
pub use framed::PacketStream;
pub use message::{Message, MessageAssembler, split_message};
pub use packet_codec::{Packet, TdsCodec};
