//! # tds-protocol
//!
//! Implementation of the MS-TDS (Tabular Data Stream) wire protocol as spoken
//! by the SQL Server attach engine. Only TDS 7.4 is targeted.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic and
//! makes no assumptions about the async runtime. Higher-level crates build upon
//! this foundation to provide packet framing and connection management.
//!
//! The token parser here handles every token that can be decoded without row
//! context. COLMETADATA is decoded in full (including per-column TYPE_INFO);
//! ROW/NBCROW payloads are handed to the value codec layer which knows how to
//! interpret them against the current column set.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod collation;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod sql_batch;
pub mod token;
pub mod typeinfo;
pub mod version;

pub use codec::{read_b_varchar, read_us_varchar, write_b_varchar, write_utf16_string};
pub use collation::Collation;
pub use error::ProtocolError;
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus,
    PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption};
pub use sql_batch::encode_sql_batch;
pub use token::{
    ColMetaData, Column, Done, DoneStatus, EnvChange, EnvChangeType, FedAuthInfo, LoginAck,
    RoutingTarget, ServerMessage, Token, TokenType,
};
pub use typeinfo::{ColumnFlags, PLP_MARKER, TypeId, TypeInfo};
pub use version::TdsVersion;
pub use login7::{FeatureExtension, FeatureId, FedAuthLibrary, Login7, encode_fedauth_token};
