//! TDS LOGIN7 packet construction.
//!
//! LOGIN7 carries client identity, credentials, and feature negotiation. The
//! packet is a 94-byte fixed header holding an offset/length directory,
//! followed by the variable-length data section (all strings UTF-16LE) and an
//! optional feature-extension block.
//!
//! Passwords are obfuscated, not encrypted: per MS-TDS each byte has its
//! nibbles swapped and is then XOR-ed with 0xA5. TLS protects the real
//! secret; federated logins omit the password fields entirely.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::write_utf16_string;
use crate::version::TdsVersion;

/// LOGIN7 fixed header size.
pub const LOGIN7_HEADER_SIZE: usize = 94;

/// Feature extension identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeatureId {
    /// Federated authentication.
    FedAuth = 0x02,
    /// UTF-8 support.
    Utf8Support = 0x0A,
    /// Terminator.
    Terminator = 0xFF,
}

/// FEDAUTH library reported in the feature extension options byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FedAuthLibrary {
    /// Live ID compact token (unused here).
    LiveId = 0x00,
    /// Raw security token handed over in a FEDAUTH_TOKEN message.
    SecurityToken = 0x01,
    /// ADAL/MSAL workflow.
    Adal = 0x02,
}

/// A single feature extension record.
#[derive(Debug, Clone)]
pub struct FeatureExtension {
    /// Feature id.
    pub feature_id: FeatureId,
    /// Feature payload.
    pub data: Bytes,
}

impl FeatureExtension {
    /// Build the FEDAUTH feature extension for a token-based login.
    ///
    /// Options byte layout: library in the upper 7 bits, echo bit at bit 0.
    /// The echo bit replays the server's `FEDAUTHREQUIRED` pre-login answer.
    #[must_use]
    pub fn fed_auth(library: FedAuthLibrary, server_echo: bool) -> Self {
        let options = ((library as u8) << 1) | u8::from(server_echo);
        let mut data = BytesMut::with_capacity(2);
        data.put_u8(options);
        // Workflow byte: 0x00 = token acquired out of band (bearer).
        data.put_u8(0x00);
        Self {
            feature_id: FeatureId::FedAuth,
            data: data.freeze(),
        }
    }
}

/// LOGIN7 packet builder.
#[derive(Debug, Clone)]
pub struct Login7 {
    /// TDS version to request.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client process id.
    pub client_pid: u32,
    /// Client timezone offset in minutes.
    pub client_timezone: i32,
    /// Client locale id.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// Username for SQL authentication; empty under federated auth.
    pub username: String,
    /// Password for SQL authentication; empty under federated auth.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name as dialed.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Language (empty = server default).
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client id (MAC address slot, zeros).
    pub client_id: [u8; 6],
    /// Feature extensions; non-empty sets the extension flag bit.
    pub features: Vec<FeatureExtension>,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: crate::packet::DEFAULT_PACKET_SIZE as u32,
            client_pid: std::process::id(),
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("mssql-extension"),
            server_name: String::new(),
            library_name: String::from("mssql-extension"),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
            features: Vec::new(),
        }
    }
}

impl Login7 {
    /// Create a new LOGIN7 builder with engine defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set SQL authentication credentials.
    #[must_use]
    pub fn with_sql_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the client hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the negotiated packet size request.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Add a feature extension record.
    #[must_use]
    pub fn with_feature(mut self, feature: FeatureExtension) -> Self {
        self.features.push(feature);
        self
    }

    /// Whether the feature-extension block will be emitted.
    #[must_use]
    pub fn has_extensions(&self) -> bool {
        !self.features.is_empty()
    }

    /// Encode the LOGIN7 payload.
    ///
    /// The result may exceed the negotiated packet size (large FEDAUTH
    /// extension data); the codec layer splits it across packets.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let extension = self.has_extensions();

        let hostname_len = utf16_len(&self.hostname);
        let username_len = utf16_len(&self.username);
        let password_len = utf16_len(&self.password);
        let app_name_len = utf16_len(&self.app_name);
        let server_name_len = utf16_len(&self.server_name);
        let library_name_len = utf16_len(&self.library_name);
        let language_len = utf16_len(&self.language);
        let database_len = utf16_len(&self.database);

        let mut var_data = BytesMut::with_capacity(256);
        let mut offset = LOGIN7_HEADER_SIZE as u16;

        let hostname_offset = offset;
        write_utf16_string(&mut var_data, &self.hostname);
        offset += hostname_len * 2;

        let username_offset = offset;
        write_utf16_string(&mut var_data, &self.username);
        offset += username_len * 2;

        let password_offset = offset;
        write_obfuscated_password(&mut var_data, &self.password);
        offset += password_len * 2;

        let app_name_offset = offset;
        write_utf16_string(&mut var_data, &self.app_name);
        offset += app_name_len * 2;

        let server_name_offset = offset;
        write_utf16_string(&mut var_data, &self.server_name);
        offset += server_name_len * 2;

        // The "unused" slot doubles as the feature-extension pointer: when
        // extensions are present it holds a u32 offset to the block.
        let extension_offset = offset;
        if extension {
            let block_offset = offset as u32
                + 4
                + u32::from(library_name_len) * 2
                + u32::from(language_len) * 2
                + u32::from(database_len) * 2;
            var_data.put_u32_le(block_offset);
            offset += 4;
        }

        let library_name_offset = offset;
        write_utf16_string(&mut var_data, &self.library_name);
        offset += library_name_len * 2;

        let language_offset = offset;
        write_utf16_string(&mut var_data, &self.language);
        offset += language_len * 2;

        let database_offset = offset;
        write_utf16_string(&mut var_data, &self.database);
        offset += database_len * 2;

        // SSPI is never used by this engine; the directory entry stays empty.
        let sspi_offset = offset;

        if extension {
            for feature in &self.features {
                var_data.put_u8(feature.feature_id as u8);
                var_data.put_u32_le(feature.data.len() as u32);
                var_data.put_slice(&feature.data);
            }
            var_data.put_u8(FeatureId::Terminator as u8);
        }

        let total_length = LOGIN7_HEADER_SIZE + var_data.len();
        let mut buf = BytesMut::with_capacity(total_length);

        buf.put_u32_le(total_length as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(0); // client program version
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(0); // connection id

        // OptionFlags1: fUseDB + fDatabase (warn on db change, fail on bad db).
        buf.put_u8(0x60);
        // OptionFlags2: fLanguage fatal + fODBC.
        buf.put_u8(0x03);
        // TypeFlags: default SQL_DFLT.
        buf.put_u8(0x00);
        // OptionFlags3: unknown-collation handling, extension bit when needed.
        buf.put_u8(if extension { 0x18 } else { 0x08 });

        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);

        buf.put_u16_le(hostname_offset);
        buf.put_u16_le(hostname_len);
        buf.put_u16_le(username_offset);
        buf.put_u16_le(username_len);
        buf.put_u16_le(password_offset);
        buf.put_u16_le(password_len);
        buf.put_u16_le(app_name_offset);
        buf.put_u16_le(app_name_len);
        buf.put_u16_le(server_name_offset);
        buf.put_u16_le(server_name_len);

        if extension {
            buf.put_u16_le(extension_offset);
            buf.put_u16_le(4); // size of the extension pointer
        } else {
            buf.put_u16_le(extension_offset);
            buf.put_u16_le(0);
        }

        buf.put_u16_le(library_name_offset);
        buf.put_u16_le(library_name_len);
        buf.put_u16_le(language_offset);
        buf.put_u16_le(language_len);
        buf.put_u16_le(database_offset);
        buf.put_u16_le(database_len);

        buf.put_slice(&self.client_id);

        buf.put_u16_le(sspi_offset);
        buf.put_u16_le(0); // SSPI length
        buf.put_u16_le(sspi_offset);
        buf.put_u16_le(0); // attach-db length
        buf.put_u16_le(sspi_offset);
        buf.put_u16_le(0); // change-password length
        buf.put_u32_le(0); // SSPI long

        buf.put_slice(&var_data);

        buf.freeze()
    }
}

/// Encode the payload of a FEDAUTH_TOKEN message.
///
/// Format: u32 LE byte length followed by the access token in UTF-16LE. The
/// caller frames this into packets; tokens routinely exceed one packet.
#[must_use]
pub fn encode_fedauth_token(access_token: &str) -> Bytes {
    let token_utf16: Vec<u8> = access_token
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();

    let mut buf = BytesMut::with_capacity(4 + token_utf16.len());
    buf.put_u32_le(token_utf16.len() as u32);
    buf.put_slice(&token_utf16);
    buf.freeze()
}

fn utf16_len(s: &str) -> u16 {
    s.encode_utf16().count() as u16
}

/// Write a password with TDS obfuscation.
///
/// Per MS-TDS: swap the high and low nibbles of every byte, then XOR with
/// 0xA5, applied to each byte of the UTF-16LE encoding.
fn write_obfuscated_password(dst: &mut impl BufMut, password: &str) {
    for unit in password.encode_utf16() {
        let low = (unit & 0xFF) as u8;
        let high = (unit >> 8) as u8;
        dst.put_u8(low.rotate_left(4) ^ 0xA5);
        dst.put_u8(high.rotate_left(4) ^ 0xA5);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn password_obfuscation_known_bytes() {
        // 'a' = 0x0061 UTF-16LE. Low byte 0x61: nibble swap = 0x16, XOR 0xA5
        // = 0xB3. High byte 0x00: swap = 0x00, XOR 0xA5 = 0xA5.
        let mut buf = BytesMut::new();
        write_obfuscated_password(&mut buf, "a");
        assert_eq!(&buf[..], &[0xB3, 0xA5]);
    }

    #[test]
    fn password_obfuscation_scenario() {
        // Every byte of the payload must equal source XOR 0xA5 after nibble swap.
        let mut buf = BytesMut::new();
        write_obfuscated_password(&mut buf, "TestPassword1");
        let expected: Vec<u8> = "TestPassword1"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .map(|b| b.rotate_left(4) ^ 0xA5)
            .collect();
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn encode_header_fields() {
        let login = Login7::new()
            .with_hostname("client01")
            .with_sql_auth("sa", "TestPassword1")
            .with_database("TestDB");

        let encoded = login.encode();
        assert!(encoded.len() >= LOGIN7_HEADER_SIZE);

        // Total length field covers the whole payload.
        let total = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(total as usize, encoded.len());

        // TDS version at offset 4.
        let version = u32::from_le_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(version, TdsVersion::V7_4.raw());
    }

    #[test]
    fn fedauth_feature_extension() {
        let login = Login7::new()
            .with_server_name("srv.database.windows.net")
            .with_feature(FeatureExtension::fed_auth(FedAuthLibrary::SecurityToken, true));
        assert!(login.has_extensions());

        let encoded = login.encode();
        // OptionFlags3 at offset 27 carries the extension bit 0x10.
        assert_eq!(encoded[27] & 0x10, 0x10);
        // The feature block ends with the terminator.
        assert_eq!(encoded[encoded.len() - 1], FeatureId::Terminator as u8);
        // Options byte: SecurityToken (0x01) << 1 | echo = 0x03.
        assert_eq!(encoded[encoded.len() - 3], 0x03);
    }

    #[test]
    fn fedauth_token_payload() {
        let payload = encode_fedauth_token("AB");
        assert_eq!(&payload[..], &[4, 0, 0, 0, 0x41, 0, 0x42, 0]);
    }
}
