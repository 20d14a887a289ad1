//! TDS pre-login message handling.
//!
//! The pre-login message is the first exchange between client and server.
//! It negotiates the TLS encryption level and, for federated authentication,
//! tells the server the client intends to present a token instead of a
//! password. The same structure serves as builder for the request and parser
//! for the response.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Pre-login option identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name (for named instances).
    Instance = 0x02,
    /// Client thread id (informational).
    ThreadId = 0x03,
    /// MARS support. Always off in this engine.
    Mars = 0x04,
    /// Federated authentication required.
    FedAuthRequired = 0x06,
    /// Terminator (end of option table).
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::Instance),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0x06 => Ok(Self::FedAuthRequired),
            0xFF => Ok(Self::Terminator),
            _ => Err(ProtocolError::InvalidPreloginOption(value)),
        }
    }
}

/// Encryption level negotiated in pre-login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encryption only for the login sequence.
    Off = 0x00,
    /// Encryption for the whole session.
    #[default]
    On = 0x01,
    /// Client has no TLS support.
    NotSupported = 0x02,
    /// Encryption required by this side.
    Required = 0x03,
    /// Client certificate authentication.
    ClientCert = 0x04,
}

impl EncryptionLevel {
    /// Create from a raw byte value.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            0x03 => Self::Required,
            0x04 => Self::ClientCert,
            _ => Self::Off,
        }
    }

    /// Whether a TLS handshake must be performed for this level.
    #[must_use]
    pub const fn needs_tls(&self) -> bool {
        matches!(self, Self::On | Self::Required | Self::ClientCert | Self::Off)
    }
}

/// Pre-login message.
///
/// Client → server: `version` holds the requested TDS version and
/// `fed_auth_required` signals token-based login. Server → client: the
/// fields are filled from the response option table.
#[derive(Debug, Clone, Default)]
pub struct PreLogin {
    /// TDS version (VERSION option, 6 bytes: 4 version + 2 sub-build).
    pub version: TdsVersion,
    /// Encryption level.
    pub encryption: EncryptionLevel,
    /// Instance name, empty when connecting by port.
    pub instance: Option<String>,
    /// Client thread id.
    pub thread_id: Option<u32>,
    /// MARS requested/offered. The engine never requests it.
    pub mars: bool,
    /// Federated authentication marker (0x01 = client will present a token).
    pub fed_auth_required: bool,
}

impl PreLogin {
    /// Create a pre-login request for this engine's defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: TdsVersion::V7_4,
            encryption: EncryptionLevel::On,
            instance: None,
            thread_id: None,
            mars: false,
            fed_auth_required: false,
        }
    }

    /// Set the encryption level.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Mark the login as federated (token instead of password).
    #[must_use]
    pub fn with_fed_auth_required(mut self, required: bool) -> Self {
        self.fed_auth_required = required;
        self
    }

    /// Encode the pre-login message payload.
    ///
    /// Layout: option table `{id u8, offset u16 BE, length u16 BE}` repeated,
    /// 0xFF terminator, then the option payloads at their recorded offsets.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        struct Entry {
            id: PreLoginOption,
            data: Vec<u8>,
        }

        let mut entries = Vec::with_capacity(5);

        // VERSION: 4 bytes version + 2 bytes sub-build.
        let mut version = Vec::with_capacity(6);
        version.extend_from_slice(&self.version.raw().to_be_bytes());
        version.extend_from_slice(&0u16.to_be_bytes());
        entries.push(Entry {
            id: PreLoginOption::Version,
            data: version,
        });

        entries.push(Entry {
            id: PreLoginOption::Encryption,
            data: vec![self.encryption as u8],
        });

        if let Some(ref instance) = self.instance {
            let mut data = instance.as_bytes().to_vec();
            data.push(0); // null terminated
            entries.push(Entry {
                id: PreLoginOption::Instance,
                data,
            });
        }

        entries.push(Entry {
            id: PreLoginOption::ThreadId,
            data: self.thread_id.unwrap_or(0).to_be_bytes().to_vec(),
        });

        entries.push(Entry {
            id: PreLoginOption::Mars,
            data: vec![u8::from(self.mars)],
        });

        if self.fed_auth_required {
            entries.push(Entry {
                id: PreLoginOption::FedAuthRequired,
                data: vec![0x01],
            });
        }

        // 5 bytes per table entry + terminator byte.
        let table_len = entries.len() * 5 + 1;
        let payload_len: usize = entries.iter().map(|e| e.data.len()).sum();
        let mut buf = BytesMut::with_capacity(table_len + payload_len);

        let mut offset = table_len as u16;
        for entry in &entries {
            buf.put_u8(entry.id as u8);
            buf.put_u16(offset);
            buf.put_u16(entry.data.len() as u16);
            offset += entry.data.len() as u16;
        }
        buf.put_u8(PreLoginOption::Terminator as u8);

        for entry in &entries {
            buf.put_slice(&entry.data);
        }

        buf.freeze()
    }

    /// Decode a pre-login response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut result = Self::default();
        let mut table = payload;

        loop {
            if !table.has_remaining() {
                return Err(ProtocolError::UnexpectedEof);
            }
            let id = table.get_u8();
            if id == PreLoginOption::Terminator as u8 {
                break;
            }
            if table.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let offset = table.get_u16() as usize;
            let length = table.get_u16() as usize;

            if offset + length > payload.len() {
                return Err(ProtocolError::Incomplete {
                    expected: offset + length,
                    actual: payload.len(),
                });
            }
            let data = &payload[offset..offset + length];

            // Servers may send options this engine does not use; skip them.
            let Ok(option) = PreLoginOption::from_u8(id) else {
                continue;
            };
            match option {
                PreLoginOption::Version => {
                    if data.len() >= 4 {
                        result.version = TdsVersion::new(u32::from_be_bytes([
                            data[0], data[1], data[2], data[3],
                        ]));
                    }
                }
                PreLoginOption::Encryption => {
                    if let Some(&level) = data.first() {
                        result.encryption = EncryptionLevel::from_u8(level);
                    }
                }
                PreLoginOption::Instance => {
                    let text: Vec<u8> =
                        data.iter().copied().take_while(|&b| b != 0).collect();
                    if !text.is_empty() {
                        result.instance = String::from_utf8(text).ok();
                    }
                }
                PreLoginOption::ThreadId => {
                    if data.len() >= 4 {
                        result.thread_id =
                            Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
                    }
                }
                PreLoginOption::Mars => {
                    result.mars = data.first().is_some_and(|&b| b != 0);
                }
                PreLoginOption::FedAuthRequired => {
                    result.fed_auth_required = data.first().is_some_and(|&b| b == 0x01);
                }
                PreLoginOption::Terminator => break,
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let prelogin = PreLogin::new()
            .with_encryption(EncryptionLevel::On)
            .with_fed_auth_required(true);

        let bytes = prelogin.encode();
        let decoded = PreLogin::decode(&bytes).unwrap();

        assert_eq!(decoded.encryption, EncryptionLevel::On);
        assert!(decoded.fed_auth_required);
        assert!(!decoded.mars);
        assert_eq!(decoded.version.raw(), TdsVersion::V7_4.raw());
    }

    #[test]
    fn decode_skips_unknown_options() {
        // One unknown option (0x07, 1 byte) followed by encryption, then terminator.
        let payload: Vec<u8> = vec![
            0x07, 0x00, 0x0B, 0x00, 0x01, // unknown option header
            0x01, 0x00, 0x0C, 0x00, 0x01, // encryption header
            0xFF, // terminator
            0xAB, // unknown payload
            0x03, // encryption = Required
        ];
        let decoded = PreLogin::decode(&payload).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::Required);
    }

    #[test]
    fn truncated_table_fails() {
        let payload = [0x00u8, 0x00]; // option id + partial offset
        assert!(PreLogin::decode(&payload).is_err());
    }

    #[test]
    fn out_of_range_offset_fails() {
        let payload = [0x01u8, 0x00, 0x40, 0x00, 0x01, 0xFF];
        assert!(PreLogin::decode(&payload).is_err());
    }
}
