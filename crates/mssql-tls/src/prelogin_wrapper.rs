//! Pre-login framing shim for the TLS handshake.
//!
//! In TDS 7.x the TLS handshake records travel inside TDS pre-login packets:
//! the client wraps outgoing handshake bytes in a PRELOGIN header and strips
//! the header from incoming packets before handing bytes to rustls. After
//! `handshake_complete` the shim is a transparent pass-through and TLS
//! records flow directly on the TCP stream.

use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const HEADER_SIZE: usize = 8;
const PACKET_TYPE_PRELOGIN: u8 = 0x12;
const STATUS_EOM: u8 = 0x01;

/// Wrapper that frames TLS handshake traffic in pre-login packets.
pub struct TlsPreloginWrapper<S> {
    stream: S,
    handshaking: bool,

    // Read side: current packet header and remaining payload bytes.
    header_buf: [u8; HEADER_SIZE],
    header_filled: usize,
    payload_remaining: usize,

    // Write side: buffered handshake bytes; the header slot at the front is
    // stamped on flush.
    write_buf: Vec<u8>,
    write_pos: usize,
    flushing: bool,
}

impl<S> TlsPreloginWrapper<S> {
    /// Wrap a transport for the handshake phase.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            handshaking: true,
            header_buf: [0u8; HEADER_SIZE],
            header_filled: 0,
            payload_remaining: 0,
            write_buf: vec![0u8; HEADER_SIZE],
            write_pos: 0,
            flushing: false,
        }
    }

    /// Switch to pass-through once the TLS handshake has completed.
    pub fn handshake_complete(&mut self) {
        self.handshaking = false;
    }

    /// Consume the wrapper, returning the transport.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.handshaking {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        // Between packets: pull a full header first.
        while this.payload_remaining == 0 {
            while this.header_filled < HEADER_SIZE {
                let mut header =
                    ReadBuf::new(&mut this.header_buf[this.header_filled..]);
                match Pin::new(&mut this.stream).poll_read(cx, &mut header)? {
                    Poll::Ready(()) => {
                        let n = header.filled().len();
                        if n == 0 {
                            return Poll::Ready(Ok(())); // EOF
                        }
                        this.header_filled += n;
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            if this.header_buf[0] != PACKET_TYPE_PRELOGIN {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected pre-login packet during TLS handshake, got 0x{:02X}",
                        this.header_buf[0]
                    ),
                )));
            }
            let length =
                u16::from_be_bytes([this.header_buf[2], this.header_buf[3]]) as usize;
            this.payload_remaining = length.saturating_sub(HEADER_SIZE);
            this.header_filled = 0;
        }

        let want = cmp::min(this.payload_remaining, buf.remaining());
        let mut scratch = vec![0u8; want];
        let mut scratch_buf = ReadBuf::new(&mut scratch);
        match Pin::new(&mut this.stream).poll_read(cx, &mut scratch_buf)? {
            Poll::Ready(()) => {
                let n = scratch_buf.filled().len();
                buf.put_slice(&scratch[..n]);
                this.payload_remaining -= n;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.handshaking {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        // Buffer handshake bytes; a whole packet goes out on flush.
        this.write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.handshaking && this.write_buf.len() > HEADER_SIZE {
            if !this.flushing {
                let total = this.write_buf.len();
                this.write_buf[0] = PACKET_TYPE_PRELOGIN;
                this.write_buf[1] = STATUS_EOM;
                this.write_buf[2] = (total >> 8) as u8;
                this.write_buf[3] = total as u8;
                this.write_buf[4] = 0; // spid
                this.write_buf[5] = 0;
                this.write_buf[6] = 1; // packet id
                this.write_buf[7] = 0; // window
                this.flushing = true;
                this.write_pos = 0;
            }

            while this.write_pos < this.write_buf.len() {
                match Pin::new(&mut this.stream)
                    .poll_write(cx, &this.write_buf[this.write_pos..])?
                {
                    Poll::Ready(n) => this.write_pos += n,
                    Poll::Pending => return Poll::Pending,
                }
            }

            this.write_buf.truncate(0);
            this.write_buf.resize(HEADER_SIZE, 0);
            this.write_pos = 0;
            this.flushing = false;
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
