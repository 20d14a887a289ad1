//! TDS token stream definitions.
//!
//! Tokens are the units of a TABULAR_RESULT message. Every token this engine
//! handles without row context is decoded here: COLMETADATA (in full,
//! including TYPE_INFO), the DONE family, ERROR/INFO, LOGINACK, ENVCHANGE,
//! FEDAUTHINFO, RETURNSTATUS and FEATUREEXTACK. ROW and NBCROW bodies depend
//! on the active column set and are decoded by the value codec layer against
//! the most recent [`ColMetaData`].
//!
//! Decoders read from a borrowed cursor and fail with
//! [`ProtocolError::Incomplete`]/[`ProtocolError::UnexpectedEof`] when the
//! buffer ends mid-token. Callers that feed bytes incrementally retry the
//! parse from the token boundary once more data arrives.

use bytes::{Buf, BufMut, Bytes};

use crate::codec::{read_b_varchar, read_us_varchar, read_utf16_string, write_b_varchar};
use crate::error::ProtocolError;
use crate::typeinfo::{ColumnFlags, TypeInfo};

/// Token type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Column metadata (COLMETADATA).
    ColMetaData = 0x81,
    /// Extra column info (COLINFO); length-skipped.
    ColInfo = 0xA5,
    /// Ordering columns (ORDER); length-skipped.
    Order = 0xA9,
    /// Error message (ERROR).
    Error = 0xAA,
    /// Informational message (INFO).
    Info = 0xAB,
    /// Login acknowledgment (LOGINACK).
    LoginAck = 0xAD,
    /// Feature extension acknowledgment (FEATUREEXTACK).
    FeatureExtAck = 0xAE,
    /// Row data (ROW).
    Row = 0xD1,
    /// Row data with null bitmap (NBCROW).
    NbcRow = 0xD2,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// Federated authentication info (FEDAUTHINFO).
    FedAuthInfo = 0xEE,
    /// Statement completion (DONE).
    Done = 0xFD,
    /// Procedure completion (DONEPROC).
    DoneProc = 0xFE,
    /// Completion inside a procedure (DONEINPROC).
    DoneInProc = 0xFF,
    /// Stored procedure return status (RETURNSTATUS).
    ReturnStatus = 0x79,
}

impl TokenType {
    /// Create a token type from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x81 => Some(Self::ColMetaData),
            0xA5 => Some(Self::ColInfo),
            0xA9 => Some(Self::Order),
            0xAA => Some(Self::Error),
            0xAB => Some(Self::Info),
            0xAD => Some(Self::LoginAck),
            0xAE => Some(Self::FeatureExtAck),
            0xD1 => Some(Self::Row),
            0xD2 => Some(Self::NbcRow),
            0xE3 => Some(Self::EnvChange),
            0xEE => Some(Self::FedAuthInfo),
            0xFD => Some(Self::Done),
            0xFE => Some(Self::DoneProc),
            0xFF => Some(Self::DoneInProc),
            0x79 => Some(Self::ReturnStatus),
            _ => None,
        }
    }
}

/// A token decoded without row context.
#[derive(Debug, Clone)]
pub enum Token {
    /// Column metadata for the next result set.
    ColMetaData(ColMetaData),
    /// Statement completion.
    Done(Done),
    /// Procedure completion.
    DoneProc(Done),
    /// Completion within a procedure.
    DoneInProc(Done),
    /// Error from the server.
    Error(ServerMessage),
    /// Informational message from the server.
    Info(ServerMessage),
    /// Login acknowledgment.
    LoginAck(LoginAck),
    /// Environment change notification.
    EnvChange(EnvChange),
    /// Federated authentication info; parsed and ignored.
    FedAuthInfo(FedAuthInfo),
    /// Stored procedure return status.
    ReturnStatus(i32),
    /// A token the engine skips by length (ORDER, COLINFO, FEATUREEXTACK).
    Skipped(TokenType),
}

/// One column of a COLMETADATA token.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// User type (non-zero for aliased types).
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Type-specific metadata.
    pub type_info: TypeInfo,
}

/// Column metadata token.
#[derive(Debug, Clone, Default)]
pub struct ColMetaData {
    /// Column definitions in declaration order.
    pub columns: Vec<Column>,
}

impl ColMetaData {
    /// Sentinel count meaning "no metadata follows".
    const NO_METADATA: u16 = 0xFFFF;

    /// Decode a COLMETADATA token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let count = src.get_u16_le();
        if count == Self::NO_METADATA {
            return Ok(Self::default());
        }

        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if src.remaining() < 6 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let user_type = src.get_u32_le();
            let flags = ColumnFlags::from_bits(src.get_u16_le());
            let type_info = TypeInfo::decode(src)?;
            let name = read_b_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;
            columns.push(Column {
                name,
                user_type,
                flags,
                type_info,
            });
        }

        Ok(Self { columns })
    }

    /// Encode a COLMETADATA token (type byte included).
    ///
    /// The bulk-load writer replays the server's own row format, so the
    /// layout here mirrors `decode` exactly.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        dst.put_u8(TokenType::ColMetaData as u8);
        dst.put_u16_le(self.columns.len() as u16);
        for column in &self.columns {
            dst.put_u32_le(column.user_type);
            dst.put_u16_le(column.flags.to_bits());
            column.type_info.encode(dst)?;
            write_b_varchar(dst, &column.name);
        }
        Ok(())
    }
}

/// DONE status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoneStatus {
    /// More token groups follow in this response.
    pub more: bool,
    /// The statement ended in error.
    pub error: bool,
    /// A transaction is open.
    pub in_xact: bool,
    /// The row count field is valid.
    pub count: bool,
    /// Acknowledges an ATTENTION request.
    pub attn: bool,
    /// A server error terminated the statement.
    pub srverror: bool,
}

impl DoneStatus {
    const MORE: u16 = 0x0001;
    const ERROR: u16 = 0x0002;
    const INXACT: u16 = 0x0004;
    const COUNT: u16 = 0x0010;
    const ATTN: u16 = 0x0020;
    const SRVERROR: u16 = 0x0100;

    /// Parse from raw status bits.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        Self {
            more: bits & Self::MORE != 0,
            error: bits & Self::ERROR != 0,
            in_xact: bits & Self::INXACT != 0,
            count: bits & Self::COUNT != 0,
            attn: bits & Self::ATTN != 0,
            srverror: bits & Self::SRVERROR != 0,
        }
    }

    /// Convert back to raw bits.
    #[must_use]
    pub fn to_bits(&self) -> u16 {
        let mut bits = 0;
        if self.more {
            bits |= Self::MORE;
        }
        if self.error {
            bits |= Self::ERROR;
        }
        if self.in_xact {
            bits |= Self::INXACT;
        }
        if self.count {
            bits |= Self::COUNT;
        }
        if self.attn {
            bits |= Self::ATTN;
        }
        if self.srverror {
            bits |= Self::SRVERROR;
        }
        bits
    }

    /// Final DONE of a response: nothing more follows.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !self.more
    }
}

/// DONE / DONEPROC / DONEINPROC token body.
#[derive(Debug, Clone, Copy)]
pub struct Done {
    /// Status flags.
    pub status: DoneStatus,
    /// Token of the current command (informational).
    pub cur_cmd: u16,
    /// Affected/returned row count when `status.count` is set.
    pub row_count: u64,
}

impl Done {
    /// Token body size (without the type byte).
    pub const SIZE: usize = 12;

    /// Decode a DONE-family token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::Incomplete {
                expected: Self::SIZE,
                actual: src.remaining(),
            });
        }
        Ok(Self {
            status: DoneStatus::from_bits(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Encode a DONE token (type byte included), used by the bulk writer.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::Done as u8);
        dst.put_u16_le(self.status.to_bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }
}

/// Shared body of ERROR and INFO tokens.
#[derive(Debug, Clone)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// State.
    pub state: u8,
    /// Severity class. ERROR tokens with class >= 11 surface as failures.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Reporting server name.
    pub server: String,
    /// Procedure name, empty outside procedures.
    pub procedure: String,
    /// Line number within the batch or procedure.
    pub line: i32,
}

impl ServerMessage {
    /// Decode an ERROR or INFO token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let _length = src.get_u16_le();

        if src.remaining() < 6 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let number = src.get_i32_le();
        let state = src.get_u8();
        let class = src.get_u8();

        let message = read_us_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;
        let server = read_b_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;
        let procedure = read_b_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;

        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let line = src.get_i32_le();

        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Whether an ERROR token with this class fails the statement.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.class >= 11
    }

    /// Whether the severity indicates an authentication rejection.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        self.class >= 14
    }
}

/// Login acknowledgment token.
#[derive(Debug, Clone)]
pub struct LoginAck {
    /// Interface type.
    pub interface: u8,
    /// Negotiated TDS version (big-endian on the wire).
    pub tds_version: u32,
    /// Server program name.
    pub prog_name: String,
    /// Server program version.
    pub prog_version: u32,
}

impl LoginAck {
    /// Decode a LOGINACK token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let _length = src.get_u16_le();

        if src.remaining() < 5 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let interface = src.get_u8();
        let tds_version = src.get_u32();
        let prog_name = read_b_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;

        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let prog_version = src.get_u32_le();

        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }
}

/// Routing redirect target from an ENVCHANGE type 20.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTarget {
    /// Host to reconnect to.
    pub host: String,
    /// Port to reconnect to.
    pub port: u16,
}

/// Environment change kinds this engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvChangeType {
    /// Current database changed.
    Database = 1,
    /// Packet size renegotiated.
    PacketSize = 4,
    /// Transaction began; new value carries the 8-byte descriptor.
    BeginTransaction = 8,
    /// Transaction committed.
    CommitTransaction = 9,
    /// Transaction rolled back.
    RollbackTransaction = 10,
    /// Server-initiated redirect.
    Routing = 20,
}

/// Decoded environment change.
#[derive(Debug, Clone)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database name.
        new: String,
        /// Previous database name.
        old: String,
    },
    /// Packet size renegotiated; both sides switch after this token.
    PacketSize {
        /// New packet size in bytes.
        size: u32,
    },
    /// Transaction began.
    BeginTransaction {
        /// The 8-byte transaction descriptor for subsequent batches.
        descriptor: u64,
    },
    /// Transaction committed.
    CommitTransaction,
    /// Transaction rolled back.
    RollbackTransaction,
    /// Server-initiated redirect; the client reconnects to the target.
    Routing(RoutingTarget),
    /// Any other environment change; noted and ignored.
    Other(u8),
}

impl EnvChange {
    /// Decode an ENVCHANGE token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let length = src.get_u16_le() as usize;
        if src.remaining() < length {
            return Err(ProtocolError::Incomplete {
                expected: length,
                actual: src.remaining(),
            });
        }

        // Work on an owned region so unknown subtypes are skipped exactly.
        let mut body = src.copy_to_bytes(length);
        if !body.has_remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let env_type = body.get_u8();

        match env_type {
            1 => {
                let new = read_b_varchar(&mut body).ok_or(ProtocolError::UnexpectedEof)?;
                let old = read_b_varchar(&mut body).ok_or(ProtocolError::UnexpectedEof)?;
                Ok(Self::Database { new, old })
            }
            4 => {
                let new = read_b_varchar(&mut body).ok_or(ProtocolError::UnexpectedEof)?;
                let size = new.parse::<u32>().map_err(|_| ProtocolError::MalformedToken {
                    token: "ENVCHANGE",
                    detail: format!("packet size is not numeric: {new:?}"),
                })?;
                Ok(Self::PacketSize { size })
            }
            8 => {
                // Binary form: u8 length + descriptor bytes.
                if !body.has_remaining() {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let len = body.get_u8() as usize;
                if len != 8 || body.remaining() < 8 {
                    return Err(ProtocolError::MalformedToken {
                        token: "ENVCHANGE",
                        detail: format!("transaction descriptor length {len}"),
                    });
                }
                Ok(Self::BeginTransaction {
                    descriptor: body.get_u64_le(),
                })
            }
            9 => Ok(Self::CommitTransaction),
            10 => Ok(Self::RollbackTransaction),
            20 => Self::decode_routing(&mut body),
            other => Ok(Self::Other(other)),
        }
    }

    fn decode_routing(body: &mut Bytes) -> Result<Self, ProtocolError> {
        // Routing value: u16 length + protocol u8 + port u16 + host US_VARCHAR.
        if body.remaining() < 7 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let _value_len = body.get_u16_le();
        let _protocol = body.get_u8();
        let port = body.get_u16_le();
        let host_len = body.get_u16_le() as usize;
        let host = read_utf16_string(body, host_len).ok_or_else(|| {
            ProtocolError::StringEncoding("routing hostname is not valid UTF-16".into())
        })?;
        Ok(Self::Routing(RoutingTarget { host, port }))
    }
}

/// Federated authentication info token.
///
/// The engine acquires tokens before login, so both fields are informational.
#[derive(Debug, Clone, Default)]
pub struct FedAuthInfo {
    /// Token issuance endpoint advertised by the server.
    pub sts_url: String,
    /// Service principal name of the server.
    pub spn: String,
}

impl FedAuthInfo {
    /// Decode a FEDAUTHINFO token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let length = src.get_u32_le() as usize;
        if src.remaining() < length {
            return Err(ProtocolError::Incomplete {
                expected: length,
                actual: src.remaining(),
            });
        }
        let body = src.copy_to_bytes(length);
        if body.is_empty() {
            return Ok(Self::default());
        }

        let count = body[0] as usize;
        let mut info = Self::default();
        // Each option: id u8 + data length u32 + data offset u32. Offsets are
        // relative to the start of the token body (after the length field).
        for i in 0..count {
            let entry = 1 + i * 9;
            if entry + 9 > body.len() {
                break;
            }
            let id = body[entry];
            let data_len = u32::from_le_bytes([
                body[entry + 1],
                body[entry + 2],
                body[entry + 3],
                body[entry + 4],
            ]) as usize;
            let data_offset = u32::from_le_bytes([
                body[entry + 5],
                body[entry + 6],
                body[entry + 7],
                body[entry + 8],
            ]) as usize;
            if data_offset + data_len > body.len() {
                continue;
            }
            let mut data = &body[data_offset..data_offset + data_len];
            if let Some(value) = read_utf16_string(&mut data, data_len / 2) {
                match id {
                    0x01 => info.spn = value,
                    0x02 => info.sts_url = value,
                    _ => {}
                }
            }
        }

        Ok(info)
    }
}

impl Token {
    /// Decode one context-free token, starting at its type byte.
    ///
    /// ROW/NBCROW are not handled here; callers dispatch them to the value
    /// codec against the active column metadata before calling this.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if !src.has_remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let raw = src.get_u8();
        let token_type = TokenType::from_u8(raw).ok_or(ProtocolError::UnknownToken(raw))?;

        match token_type {
            TokenType::ColMetaData => Ok(Self::ColMetaData(ColMetaData::decode(src)?)),
            TokenType::Done => Ok(Self::Done(Done::decode(src)?)),
            TokenType::DoneProc => Ok(Self::DoneProc(Done::decode(src)?)),
            TokenType::DoneInProc => Ok(Self::DoneInProc(Done::decode(src)?)),
            TokenType::Error => Ok(Self::Error(ServerMessage::decode(src)?)),
            TokenType::Info => Ok(Self::Info(ServerMessage::decode(src)?)),
            TokenType::LoginAck => Ok(Self::LoginAck(LoginAck::decode(src)?)),
            TokenType::EnvChange => Ok(Self::EnvChange(EnvChange::decode(src)?)),
            TokenType::FedAuthInfo => Ok(Self::FedAuthInfo(FedAuthInfo::decode(src)?)),
            TokenType::ReturnStatus => {
                if src.remaining() < 4 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                Ok(Self::ReturnStatus(src.get_i32_le()))
            }
            TokenType::Order | TokenType::ColInfo | TokenType::FeatureExtAck => {
                skip_length_prefixed(src, token_type)?;
                Ok(Self::Skipped(token_type))
            }
            TokenType::Row | TokenType::NbcRow => Err(ProtocolError::MalformedToken {
                token: "ROW",
                detail: "row tokens require column metadata to decode".into(),
            }),
        }
    }
}

/// Skip a token whose body starts with a u16 length (ORDER, COLINFO), or the
/// featureid/length list of FEATUREEXTACK.
fn skip_length_prefixed(src: &mut impl Buf, token_type: TokenType) -> Result<(), ProtocolError> {
    match token_type {
        TokenType::FeatureExtAck => loop {
            if !src.has_remaining() {
                return Err(ProtocolError::UnexpectedEof);
            }
            let feature_id = src.get_u8();
            if feature_id == 0xFF {
                return Ok(());
            }
            if src.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let len = src.get_u32_le() as usize;
            if src.remaining() < len {
                return Err(ProtocolError::Incomplete {
                    expected: len,
                    actual: src.remaining(),
                });
            }
            src.advance(len);
        },
        _ => {
            if src.remaining() < 2 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let len = src.get_u16_le() as usize;
            if src.remaining() < len {
                return Err(ProtocolError::Incomplete {
                    expected: len,
                    actual: src.remaining(),
                });
            }
            src.advance(len);
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::typeinfo::{TypeId, TypeInfo};
    use bytes::BytesMut;

    #[test]
    fn done_roundtrip() {
        let done = Done {
            status: DoneStatus {
                count: true,
                ..Default::default()
            },
            cur_cmd: 193,
            row_count: 42,
        };

        let mut buf = BytesMut::new();
        done.encode(&mut buf);

        let mut cursor = &buf[1..];
        let decoded = Done::decode(&mut cursor).unwrap();
        assert_eq!(decoded.status, done.status);
        assert_eq!(decoded.cur_cmd, 193);
        assert_eq!(decoded.row_count, 42);
        assert!(decoded.status.is_final());
    }

    #[test]
    fn done_token_via_dispatch() {
        let data: &[u8] = &[
            0xFD, // DONE
            0x10, 0x00, // DONE_COUNT
            0xC1, 0x00, // cur_cmd 193
            0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // 5 rows
        ];
        let mut cursor = data;
        match Token::decode(&mut cursor).unwrap() {
            Token::Done(done) => {
                assert!(done.status.count);
                assert_eq!(done.row_count, 5);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(!cursor.has_remaining());
    }

    #[test]
    fn colmetadata_roundtrip() {
        let meta = ColMetaData {
            columns: vec![
                Column {
                    name: "id".into(),
                    user_type: 0,
                    flags: ColumnFlags::from_bits(0x0000),
                    type_info: TypeInfo::fixed(TypeId::Int),
                },
                Column {
                    name: "name".into(),
                    user_type: 0,
                    flags: ColumnFlags::from_bits(0x0001),
                    type_info: TypeInfo::nvarchar(200),
                },
            ],
        };

        let mut buf = BytesMut::new();
        meta.encode(&mut buf).unwrap();

        let mut cursor = &buf[1..];
        let decoded = ColMetaData::decode(&mut cursor).unwrap();
        assert_eq!(decoded.columns.len(), 2);
        assert_eq!(decoded.columns[0].name, "id");
        assert_eq!(decoded.columns[0].type_info.type_id, TypeId::Int);
        assert_eq!(decoded.columns[1].name, "name");
        assert!(decoded.columns[1].flags.nullable);
    }

    #[test]
    fn envchange_begin_transaction_descriptor() {
        // length 11: type(1) + new len(1) + descriptor(8) + old len(1)
        let data: &[u8] = &[
            0x0B, 0x00, // length
            0x08, // BeginTransaction
            0x08, // new value length
            0xEF, 0xCD, 0xAB, 0x90, 0x78, 0x56, 0x34, 0x12, // descriptor LE
            0x00, // old value length
        ];
        let mut cursor = data;
        match EnvChange::decode(&mut cursor).unwrap() {
            EnvChange::BeginTransaction { descriptor } => {
                assert_eq!(descriptor, 0x1234_5678_90AB_CDEF);
            }
            other => panic!("expected BeginTransaction, got {other:?}"),
        }
    }

    #[test]
    fn envchange_routing() {
        let host = "alt.database.windows.net";
        let host_utf16: Vec<u8> = host.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let value_len = 5 + host_utf16.len();
        let mut data = BytesMut::new();
        data.put_u16_le((1 + 2 + value_len) as u16); // env change length
        data.put_u8(20); // Routing
        data.put_u16_le(value_len as u16);
        data.put_u8(0); // protocol: TCP
        data.put_u16_le(11000);
        data.put_u16_le(host.encode_utf16().count() as u16);
        data.put_slice(&host_utf16);

        let mut cursor = data.freeze();
        match EnvChange::decode(&mut cursor).unwrap() {
            EnvChange::Routing(target) => {
                assert_eq!(target.host, host);
                assert_eq!(target.port, 11000);
            }
            other => panic!("expected Routing, got {other:?}"),
        }
    }

    #[test]
    fn envchange_unknown_type_skipped_exactly() {
        let data: &[u8] = &[
            0x03, 0x00, // length 3
            0x07, // SqlCollation: unhandled
            0x00, 0x00, // opaque body
            0xFD, // next token starts here
        ];
        let mut cursor = data;
        match EnvChange::decode(&mut cursor).unwrap() {
            EnvChange::Other(7) => {}
            other => panic!("expected Other(7), got {other:?}"),
        }
        assert_eq!(cursor[0], 0xFD);
    }

    #[test]
    fn error_token_fields() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0); // recomputed by nobody; parser ignores it
        buf.put_i32_le(208);
        buf.put_u8(1); // state
        buf.put_u8(16); // class
        // message "bad" as US_VARCHAR
        buf.put_u16_le(3);
        for u in "bad".encode_utf16() {
            buf.put_u16_le(u);
        }
        buf.put_u8(0); // server
        buf.put_u8(0); // procedure
        buf.put_i32_le(4);

        let mut cursor = buf.freeze();
        let msg = ServerMessage::decode(&mut cursor).unwrap();
        assert_eq!(msg.number, 208);
        assert_eq!(msg.class, 16);
        assert_eq!(msg.message, "bad");
        assert_eq!(msg.line, 4);
        assert!(msg.is_error());
    }

    #[test]
    fn unknown_token_is_an_error() {
        let data: &[u8] = &[0x42, 0x00];
        let mut cursor = data;
        assert!(matches!(
            Token::decode(&mut cursor),
            Err(ProtocolError::UnknownToken(0x42))
        ));
    }

    #[test]
    fn order_token_skipped() {
        let data: &[u8] = &[0xA9, 0x04, 0x00, 0x01, 0x00, 0x02, 0x00];
        let mut cursor = data;
        match Token::decode(&mut cursor).unwrap() {
            Token::Skipped(TokenType::Order) => {}
            other => panic!("expected skipped ORDER, got {other:?}"),
        }
        assert!(!cursor.has_remaining());
    }

    #[test]
    fn truncated_done_is_incomplete() {
        let data: &[u8] = &[0xFD, 0x10, 0x00];
        let mut cursor = data;
        let err = Token::decode(&mut cursor).unwrap_err();
        assert!(err.is_incomplete());
    }
}
