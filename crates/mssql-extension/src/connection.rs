//! The TDS connection state machine.
//!
//! A connection owns its socket exclusively: the pool loans it to one caller
//! at a time and transactions pin it, so no locking guards the transport.
//! The runtime state is still an atomic enum because pool bookkeeping reads
//! it from other threads.
//!
//! ```text
//! Disconnected → Connecting → Prelogin → Authenticating → Idle
//!                                             │              ↕
//!                                    (routing: reconnect) Executing → Streaming
//! ```
//!
//! Cancellation sends an ATTENTION packet and drains tokens until a DONE
//! with the attention flag arrives (five second budget, then the connection
//! is closed). Returning to the pool sets the pending-reset flag so the next
//! request carries RESET_CONNECTION instead of clean-up SQL.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use mssql_codec::{Packet, PacketStream, split_message};
use mssql_tls::{TdsTlsStream, TlsConfig, TlsConnector};
use mssql_types::SqlValue;
use tds_protocol::packet::{DEFAULT_PACKET_SIZE, PACKET_HEADER_SIZE, PacketType};
use tds_protocol::prelogin::{EncryptionLevel, PreLogin};
use tds_protocol::token::{Column, EnvChange, RoutingTarget, Token, TokenType};
use tds_protocol::{Login7, PacketHeader, PacketStatus, TdsVersion, encode_fedauth_token,
    encode_sql_batch};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::AttachConfig;
use crate::error::{Error, Result};

/// Maximum server-initiated routing hops before giving up.
pub const MAX_ROUTING_HOPS: u8 = 5;

/// Budget for draining tokens after an ATTENTION.
const ATTENTION_DRAIN_BUDGET: Duration = Duration::from_secs(5);

/// Runtime connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No transport.
    Disconnected = 0,
    /// TCP dial in progress.
    Connecting = 1,
    /// PRELOGIN exchange (and TLS handshake) in progress.
    Prelogin = 2,
    /// LOGIN7 / FEDAUTH exchange in progress.
    Authenticating = 3,
    /// Ready for a request.
    Idle = 4,
    /// Request sent, response not yet started.
    Executing = 5,
    /// Response rows flowing.
    Streaming = 6,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Prelogin,
            3 => Self::Authenticating,
            4 => Self::Idle,
            5 => Self::Executing,
            6 => Self::Streaming,
            _ => Self::Disconnected,
        }
    }
}

/// Atomic cell holding the state; transitions are compare-and-swap so a
/// bookkeeping race shows up as an error instead of a corrupted state.
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> Result<()> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| {
                Error::Protocol(format!(
                    "invalid state transition {:?} -> {to:?} (connection is {:?})",
                    from,
                    ConnectionState::from_u8(actual)
                ))
            })
    }
}

enum Transport {
    Tcp(PacketStream<TcpStream>),
    Tls(Box<PacketStream<TdsTlsStream<TcpStream>>>),
}

impl Transport {
    async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        match self {
            Self::Tcp(stream) => stream.feed(packet).await?,
            Self::Tls(stream) => stream.feed(packet).await?,
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush().await?,
            Self::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    async fn next_packet(&mut self) -> Result<Packet> {
        let packet = match self {
            Self::Tcp(stream) => stream.next().await,
            Self::Tls(stream) => stream.next().await,
        };
        match packet {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::ConnectionClosed),
        }
    }

    fn reset_packet_id(&mut self) {
        match self {
            Self::Tcp(stream) => stream.codec_mut().reset_packet_id(),
            Self::Tls(stream) => stream.codec_mut().reset_packet_id(),
        }
    }
}

/// One parsed unit of a server response.
#[derive(Debug)]
pub(crate) enum ResponseEvent {
    /// A decoded data row.
    Row(Vec<SqlValue>),
    /// Any non-row token.
    Token(Token),
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

enum ConnectOutcome {
    Connected,
    Redirected(RoutingTarget),
}

/// A single TDS connection.
pub struct Connection {
    transport: Option<Transport>,
    state: StateCell,
    packet_size: usize,
    pending_reset: bool,
    /// Transaction descriptor from the BeginTransaction ENVCHANGE; zero in
    /// auto-commit mode.
    transaction_descriptor: u64,
    columns: Option<std::sync::Arc<Vec<Column>>>,
    response_buf: BytesMut,
    message_complete: bool,
    current_database: Option<String>,
    last_used: Instant,
    id: u64,
}

impl Connection {
    /// Dial, negotiate and authenticate, following routing redirects.
    pub async fn connect(config: &AttachConfig, http: &reqwest::Client) -> Result<Self> {
        let connect = Self::connect_following_routing(config, http);
        match tokio::time::timeout(config.connection_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(Error::Io(std::sync::Arc::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connection establishment timed out",
            )))),
        }
    }

    async fn connect_following_routing(
        config: &AttachConfig,
        http: &reqwest::Client,
    ) -> Result<Self> {
        let mut host = config.host.clone();
        let mut port = config.port;

        for hop in 0..=MAX_ROUTING_HOPS {
            let mut conn = Self::new_disconnected();
            match conn.connect_once(&host, port, config, http).await {
                Ok(ConnectOutcome::Connected) => {
                    if hop > 0 {
                        tracing::info!(host = %host, port, hops = hop, "connected after routing");
                    }
                    return Ok(conn);
                }
                Ok(ConnectOutcome::Redirected(target)) => {
                    tracing::debug!(
                        from = %host,
                        to = %target.host,
                        port = target.port,
                        "server requested routing"
                    );
                    conn.close_transport();
                    host = target.host;
                    port = target.port;
                }
                Err(e) => {
                    conn.close_transport();
                    return Err(e);
                }
            }
        }

        Err(Error::RoutingExceeded {
            max: MAX_ROUTING_HOPS,
        })
    }

    fn new_disconnected() -> Self {
        Self {
            transport: None,
            state: StateCell::new(ConnectionState::Disconnected),
            packet_size: DEFAULT_PACKET_SIZE,
            pending_reset: false,
            transaction_descriptor: 0,
            columns: None,
            response_buf: BytesMut::new(),
            message_complete: false,
            current_database: None,
            last_used: Instant::now(),
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    async fn connect_once(
        &mut self,
        host: &str,
        port: u16,
        config: &AttachConfig,
        http: &reqwest::Client,
    ) -> Result<ConnectOutcome> {
        self.state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)?;
        let mut tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;
        self.state
            .transition(ConnectionState::Connecting, ConnectionState::Prelogin)?;

        // PRELOGIN rides on the raw socket at the fixed initial packet size.
        let client_encryption = if config.use_encrypt {
            EncryptionLevel::On
        } else {
            EncryptionLevel::NotSupported
        };
        let prelogin = config
            .auth
            .apply_prelogin(PreLogin::new().with_encryption(client_encryption));
        let response = Self::exchange_prelogin(&mut tcp, &prelogin).await?;
        tracing::debug!(
            encryption = ?response.encryption,
            fed_auth = response.fed_auth_required,
            "PRELOGIN response"
        );

        let use_tls = match (client_encryption, response.encryption) {
            (EncryptionLevel::NotSupported, EncryptionLevel::NotSupported) => false,
            (EncryptionLevel::NotSupported, _) => {
                return Err(Error::Tls(format!(
                    "server at {host} requires encryption but use_encrypt is off"
                )));
            }
            (_, EncryptionLevel::NotSupported) => {
                return Err(Error::Tls(format!(
                    "server at {host} does not support encryption"
                )));
            }
            _ => true,
        };

        self.transport = Some(if use_tls {
            let tls_config =
                TlsConfig::new().trust_server_certificate(config.trust_server_certificate);
            let connector = TlsConnector::new(&tls_config, host)?;
            let tls = connector.connect_with_prelogin(tcp, host).await?;
            Transport::Tls(Box::new(PacketStream::new(tls)))
        } else {
            tracing::warn!(host, "proceeding without TLS; credentials are obfuscated only");
            Transport::Tcp(PacketStream::new(tcp))
        });

        self.state
            .transition(ConnectionState::Prelogin, ConnectionState::Authenticating)?;
        self.login(host, config, http, response.fed_auth_required)
            .await
    }

    async fn exchange_prelogin(tcp: &mut TcpStream, prelogin: &PreLogin) -> Result<PreLogin> {
        let payload = prelogin.encode();
        let header = PacketHeader {
            packet_type: PacketType::PreLogin,
            status: PacketStatus::END_OF_MESSAGE,
            length: (PACKET_HEADER_SIZE + payload.len()) as u16,
            spid: 0,
            packet_id: 1,
            window: 0,
        };
        let mut out = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
        header.encode(&mut out);
        out.extend_from_slice(&payload);
        tcp.write_all(&out).await?;
        tcp.flush().await?;

        let mut header_buf = [0u8; PACKET_HEADER_SIZE];
        tcp.read_exact(&mut header_buf).await?;
        let length = u16::from_be_bytes([header_buf[2], header_buf[3]]) as usize;
        if length < PACKET_HEADER_SIZE {
            return Err(Error::Protocol("invalid packet length".into()));
        }
        let mut payload = vec![0u8; length - PACKET_HEADER_SIZE];
        tcp.read_exact(&mut payload).await?;

        Ok(PreLogin::decode(&payload)?)
    }

    async fn login(
        &mut self,
        host: &str,
        config: &AttachConfig,
        http: &reqwest::Client,
        server_fedauth_echo: bool,
    ) -> Result<ConnectOutcome> {
        let mut login = Login7::new()
            .with_server_name(host)
            .with_hostname(host)
            .with_packet_size(DEFAULT_PACKET_SIZE as u32);
        if let Some(ref database) = config.database {
            login = login.with_database(database.clone());
        }
        login = config.auth.apply_login7(login, server_fedauth_echo);

        self.send_message(PacketType::Login7, login.encode(), false)
            .await?;

        // The access token travels in its own message; split across packets
        // whenever it exceeds the packet size.
        if config.auth.requires_fedauth() {
            let token = config.auth.federated_token(http).await?;
            self.send_message(
                PacketType::FedAuthToken,
                encode_fedauth_token(&token.access_token),
                false,
            )
            .await?;
        }

        let mut acknowledged = false;
        let mut routing: Option<RoutingTarget> = None;
        loop {
            let event = self.next_event().await?;
            match event {
                ResponseEvent::Token(Token::LoginAck(ack)) => {
                    let version = TdsVersion::new(ack.tds_version);
                    if !version.is_supported() {
                        return Err(Error::Auth(mssql_auth::AuthError::Configuration(format!(
                            "server negotiated unsupported TDS version {version}"
                        ))));
                    }
                    tracing::debug!(server = %ack.prog_name, version = %version, "login acknowledged");
                    acknowledged = true;
                }
                ResponseEvent::Token(Token::EnvChange(EnvChange::Routing(target))) => {
                    routing = Some(target);
                }
                ResponseEvent::Token(Token::Error(msg)) => {
                    if msg.is_auth_failure() {
                        return Err(Error::Auth(mssql_auth::AuthError::LoginRejected {
                            code: msg.number,
                            message: msg.message,
                        }));
                    }
                    return Err(Error::from_server_message(&msg));
                }
                ResponseEvent::Token(Token::FedAuthInfo(info)) => {
                    // Token already acquired; the advertised STS is noise.
                    tracing::debug!(sts = %info.sts_url, "ignoring FEDAUTHINFO");
                }
                ResponseEvent::Token(Token::Done(done)) if done.status.is_final() => break,
                _ => {}
            }
        }

        if let Some(target) = routing {
            return Ok(ConnectOutcome::Redirected(target));
        }
        if !acknowledged {
            return Err(Error::Protocol(
                "login completed without LOGINACK".into(),
            ));
        }

        self.state
            .transition(ConnectionState::Authenticating, ConnectionState::Idle)?;
        tracing::debug!(id = self.id, "connection authenticated");
        Ok(ConnectOutcome::Connected)
    }

    /// Send a complete request message; carries RESET_CONNECTION when the
    /// pending-reset flag is set.
    async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
        reset: bool,
    ) -> Result<()> {
        let packet_size = self.packet_size;
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        transport.reset_packet_id();
        for packet in split_message(packet_type, payload, packet_size, reset) {
            transport.send_packet(packet).await?;
        }
        transport.flush().await?;
        self.last_used = Instant::now();
        Ok(())
    }

    /// Begin a new request from Idle. Clears response state, applies the
    /// pending session reset, and moves to Executing.
    pub(crate) async fn send_request(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<()> {
        self.state
            .transition(ConnectionState::Idle, ConnectionState::Executing)?;
        self.columns = None;
        self.response_buf.clear();
        self.message_complete = false;

        let reset = std::mem::take(&mut self.pending_reset);
        if reset {
            tracing::debug!(id = self.id, "request carries RESET_CONNECTION");
        }
        match self.send_message(packet_type, payload, reset).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close_transport();
                Err(e)
            }
        }
    }

    /// Send a SQL batch under the current transaction descriptor.
    pub(crate) async fn send_batch(&mut self, sql: &str) -> Result<()> {
        let payload = encode_sql_batch(sql, self.transaction_descriptor);
        self.send_request(PacketType::SqlBatch, payload).await
    }

    /// Pull the next parsed event of the current response.
    ///
    /// Feeds packet payloads into a reassembly buffer and parses the next
    /// token once enough bytes are available; row tokens decode against the
    /// active COLMETADATA. Environment changes and state transitions are
    /// applied before the event is returned.
    pub(crate) async fn next_event(&mut self) -> Result<ResponseEvent> {
        loop {
            if !self.response_buf.is_empty() {
                let snapshot = Bytes::copy_from_slice(&self.response_buf);
                match self.try_parse(snapshot.clone()) {
                    Ok((event, consumed)) => {
                        let _ = self.response_buf.split_to(consumed);
                        self.apply_event(&event)?;
                        return Ok(event);
                    }
                    Err(e) if e.is_incomplete() => {
                        if self.message_complete {
                            self.close_transport();
                            return Err(Error::Protocol(
                                "token stream truncated at end of message".into(),
                            ));
                        }
                        // Fall through to read another packet.
                    }
                    Err(_) => {
                        self.close_transport();
                        return Err(Error::Protocol(
                            "malformed token stream".into(),
                        ));
                    }
                }
            }

            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let packet = match transport.next_packet().await {
                Ok(packet) => packet,
                Err(e) => {
                    self.close_transport();
                    return Err(e);
                }
            };
            if packet.header.packet_type != PacketType::TabularResult {
                self.close_transport();
                return Err(Error::Protocol(format!(
                    "unexpected packet type {:?} in response",
                    packet.header.packet_type
                )));
            }
            self.message_complete = packet.is_end_of_message();
            self.response_buf.extend_from_slice(&packet.payload);
        }
    }

    /// Attempt to parse one token from the snapshot. Returns the event and
    /// the number of bytes consumed.
    fn try_parse(&self, snapshot: Bytes) -> std::result::Result<(ResponseEvent, usize), ParseError> {
        let total = snapshot.len();
        let mut cursor = snapshot;

        let token_byte = cursor[0];
        match TokenType::from_u8(token_byte) {
            Some(TokenType::Row) => {
                let columns = self.columns.as_ref().ok_or(ParseError::Corrupt)?;
                bytes::Buf::advance(&mut cursor, 1);
                let row = mssql_types::decode_row(&mut cursor, columns)
                    .map_err(ParseError::from_type_error)?;
                Ok((ResponseEvent::Row(row), total - cursor.len()))
            }
            Some(TokenType::NbcRow) => {
                let columns = self.columns.as_ref().ok_or(ParseError::Corrupt)?;
                bytes::Buf::advance(&mut cursor, 1);
                let row = mssql_types::decode_nbc_row(&mut cursor, columns)
                    .map_err(ParseError::from_type_error)?;
                Ok((ResponseEvent::Row(row), total - cursor.len()))
            }
            _ => {
                let token = Token::decode(&mut cursor).map_err(|e| {
                    if e.is_incomplete() {
                        ParseError::Incomplete
                    } else {
                        ParseError::Corrupt
                    }
                })?;
                Ok((ResponseEvent::Token(token), total - cursor.len()))
            }
        }
    }

    /// Apply the side effects of an event: metadata tracking, environment
    /// changes, and the Executing/Streaming/Idle transitions.
    fn apply_event(&mut self, event: &ResponseEvent) -> Result<()> {
        match event {
            ResponseEvent::Token(Token::ColMetaData(meta)) => {
                self.columns = Some(std::sync::Arc::new(meta.columns.clone()));
                if self.state.get() == ConnectionState::Executing {
                    self.state.set(ConnectionState::Streaming);
                }
            }
            ResponseEvent::Token(Token::EnvChange(change)) => match change {
                EnvChange::PacketSize { size } => {
                    tracing::debug!(id = self.id, size, "packet size renegotiated");
                    self.packet_size = *size as usize;
                }
                EnvChange::BeginTransaction { descriptor } => {
                    self.transaction_descriptor = *descriptor;
                }
                EnvChange::CommitTransaction | EnvChange::RollbackTransaction => {
                    self.transaction_descriptor = 0;
                }
                EnvChange::Database { new, .. } => {
                    self.current_database = Some(new.clone());
                }
                EnvChange::Routing(_) | EnvChange::Other(_) => {}
            },
            ResponseEvent::Token(Token::Done(done)) if done.status.is_final() => {
                let state = self.state.get();
                if state == ConnectionState::Executing || state == ConnectionState::Streaming {
                    self.state.set(ConnectionState::Idle);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Execute a batch, drain the whole response, return the affected-row
    /// count. Errors from any statement surface after the drain completes.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.send_batch(sql).await?;
        self.drain_response().await
    }

    /// Drain the current response to its final DONE.
    pub(crate) async fn drain_response(&mut self) -> Result<u64> {
        let mut rows: u64 = 0;
        let mut first_error: Option<Error> = None;

        loop {
            match self.next_event().await? {
                ResponseEvent::Token(Token::Error(msg)) => {
                    if msg.class >= 20 {
                        // Connection-fatal severity.
                        let err = Error::from_server_message(&msg);
                        self.close_transport();
                        return Err(err);
                    }
                    if msg.is_error() && first_error.is_none() {
                        first_error = Some(Error::from_server_message(&msg));
                    }
                }
                ResponseEvent::Token(Token::Info(msg)) => {
                    tracing::debug!(number = msg.number, message = %msg.message, "server info");
                }
                ResponseEvent::Token(Token::Done(done)) => {
                    if done.status.count {
                        rows = rows.saturating_add(done.row_count);
                    }
                    if done.status.is_final() {
                        break;
                    }
                }
                ResponseEvent::Token(Token::DoneProc(done) | Token::DoneInProc(done)) => {
                    if done.status.count {
                        rows = rows.saturating_add(done.row_count);
                    }
                }
                _ => {}
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(rows),
        }
    }

    /// Cancel the active request: send ATTENTION, then drain until the
    /// server acknowledges with DONE_ATTN. A drain that exceeds its budget
    /// closes the connection so the pool cannot reuse it.
    pub async fn cancel(&mut self) -> Result<()> {
        let state = self.state.get();
        if !matches!(
            state,
            ConnectionState::Executing | ConnectionState::Streaming
        ) {
            return Ok(());
        }

        tracing::debug!(id = self.id, "sending ATTENTION");
        self.send_message(PacketType::Attention, Bytes::new(), false)
            .await?;

        let drain = async {
            loop {
                match self.next_event().await? {
                    ResponseEvent::Token(Token::Done(done)) if done.status.attn => {
                        return Ok::<(), Error>(());
                    }
                    _ => {}
                }
            }
        };

        match tokio::time::timeout(ATTENTION_DRAIN_BUDGET, drain).await {
            Ok(Ok(())) => {
                self.state.set(ConnectionState::Idle);
                self.response_buf.clear();
                self.columns = None;
                Ok(())
            }
            Ok(Err(e)) => {
                self.close_transport();
                Err(e)
            }
            Err(_) => {
                tracing::warn!(id = self.id, "attention drain timed out; closing connection");
                self.close_transport();
                Err(Error::ConnectionClosed)
            }
        }
    }

    /// Server round trip used by pool validation: an empty batch whose
    /// response is drained to the final DONE.
    pub async fn ping_server(&mut self) -> bool {
        if self.state.get() != ConnectionState::Idle {
            return false;
        }
        match self.execute("").await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(id = self.id, error = %e, "ping failed");
                self.close_transport();
                false
            }
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Connection identity for pool bookkeeping and logs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The 8-byte transaction descriptor; zero in auto-commit mode.
    #[must_use]
    pub fn transaction_descriptor(&self) -> u64 {
        self.transaction_descriptor
    }

    /// Active column metadata of the current result set.
    #[must_use]
    pub(crate) fn columns(&self) -> Option<std::sync::Arc<Vec<Column>>> {
        self.columns.clone()
    }

    /// Whether the pending-reset flag is set.
    #[must_use]
    pub fn has_pending_reset(&self) -> bool {
        self.pending_reset
    }

    /// Flag the session for reset on the next request.
    pub fn schedule_reset(&mut self) {
        self.pending_reset = true;
    }

    /// Instant of the last outbound request.
    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Tear the connection down. Used on unrecoverable failures (bulk load
    /// errors in particular) so the pool can never reuse a poisoned session.
    pub fn disconnect(&mut self) {
        self.close_transport();
    }

    fn close_transport(&mut self) {
        if self.transport.take().is_some() {
            tracing::debug!(id = self.id, "connection closed");
        }
        self.state.set(ConnectionState::Disconnected);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("packet_size", &self.packet_size)
            .field("pending_reset", &self.pending_reset)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl mssql_pool::ManagedConnection for Connection {
    fn is_reusable(&self) -> bool {
        self.transport.is_some() && self.state.get() == ConnectionState::Idle
    }

    fn is_open(&self) -> bool {
        self.transport.is_some() && self.state.get() != ConnectionState::Disconnected
    }

    async fn ping(&mut self) -> bool {
        self.ping_server().await
    }

    fn prepare_for_reuse(&mut self) {
        self.schedule_reset();
    }

    fn close(&mut self) {
        self.close_transport();
    }
}

/// Parse outcome for the incremental reader.
enum ParseError {
    /// More bytes may complete the token.
    Incomplete,
    /// The stream is corrupt; the connection must be closed.
    Corrupt,
}

impl ParseError {
    fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }

    fn from_type_error(e: mssql_types::TypeError) -> Self {
        if e.is_incomplete() {
            Self::Incomplete
        } else {
            Self::Corrupt
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_cas_transitions() {
        let cell = StateCell::new(ConnectionState::Disconnected);
        cell.transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            .expect("valid transition");
        assert_eq!(cell.get(), ConnectionState::Connecting);

        let err = cell.transition(ConnectionState::Idle, ConnectionState::Executing);
        assert!(err.is_err());
        assert_eq!(cell.get(), ConnectionState::Connecting);
    }

    #[test]
    fn fresh_connection_shape() {
        let conn = Connection::new_disconnected();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.transaction_descriptor(), 0);
        assert!(!conn.has_pending_reset());
        assert_eq!(conn.packet_size, DEFAULT_PACKET_SIZE);
    }

    #[test]
    fn schedule_reset_flag() {
        let mut conn = Connection::new_disconnected();
        conn.schedule_reset();
        assert!(conn.has_pending_reset());
    }
}
