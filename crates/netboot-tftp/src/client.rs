//! TFTP read-transfer client
//!
//! Lockstep DATA/ACK transfer with blksize negotiation. The first
//! reply from the server establishes its transfer TID; everything
//! after that goes to the new port per RFC 1350.

use crate::error::{Result, TftpError};
use crate::packet::{TftpOptions, TftpPacket};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Default block size when the server ignores our option (RFC 1350)
pub const DEFAULT_BLOCK_SIZE: u16 = 512;

/// Block size we ask for; fits an Ethernet frame without fragmentation
pub const PREFERRED_BLOCK_SIZE: u16 = 1428;

/// Per-packet reply timeout
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Retransmits before giving up on a block
const MAX_RETRANSMITS: u32 = 5;

/// TFTP client bound to one server
#[derive(Debug, Clone)]
pub struct TftpClient {
    server: SocketAddr,
}

impl TftpClient {
    /// Create a client for `server`
    pub fn new(server: SocketAddr) -> Self {
        Self { server }
    }

    /// Fetch `filename` from the server
    pub async fn fetch(&self, filename: &str) -> Result<Bytes> {
        let local: SocketAddr = if self.server.is_ipv4() {
            "0.0.0.0:0".parse().expect("valid any-addr")
        } else {
            "[::]:0".parse().expect("valid any-addr")
        };
        let socket = UdpSocket::bind(local).await.map_err(TftpError::BindFailed)?;

        let rrq = TftpPacket::read_request(
            filename,
            TftpOptions {
                blksize: Some(PREFERRED_BLOCK_SIZE),
                tsize: Some(0),
            },
        )
        .encode();

        debug!(server = %self.server, filename = %filename, "TFTP read request");

        let mut transfer = Transfer::new(&socket, self.server);
        transfer.start(&rrq).await?;
        transfer.run().await
    }
}

/// Fetch `filename` from `server` with a one-shot client
pub async fn fetch(server: SocketAddr, filename: &str) -> Result<Bytes> {
    TftpClient::new(server).fetch(filename).await
}

/// State for one read transfer
struct Transfer<'a> {
    socket: &'a UdpSocket,
    /// Address of the initial request; replaced by the server's
    /// transfer TID after the first reply
    peer: SocketAddr,
    tid_locked: bool,
    block_size: usize,
    /// Block we are waiting for next
    expected_block: u16,
    /// Set once a short (final) block has been received
    done: bool,
    body: BytesMut,
    buf: Vec<u8>,
}

impl<'a> Transfer<'a> {
    fn new(socket: &'a UdpSocket, server: SocketAddr) -> Self {
        Self {
            socket,
            peer: server,
            tid_locked: false,
            block_size: DEFAULT_BLOCK_SIZE as usize,
            expected_block: 1,
            done: false,
            body: BytesMut::new(),
            buf: vec![0u8; 65535 + 4],
        }
    }

    /// Send the RRQ and process the first reply (OACK or DATA 1)
    async fn start(&mut self, rrq: &[u8]) -> Result<()> {
        let packet = self.exchange(rrq).await?;

        match packet {
            TftpPacket::Oack { options } => {
                if let Some(blksize) = options.blksize {
                    trace!(blksize, "server acknowledged block size");
                    self.block_size = blksize as usize;
                }
                // OACK is acknowledged with block 0; run() sends it
                Ok(())
            }
            TftpPacket::Data { block, data } => {
                // Server ignored our options; classic RFC 1350 transfer
                self.accept_data(block, data)
            }
            TftpPacket::Error { code, message } => Err(TftpError::Remote {
                server: self.peer,
                code,
                message,
            }),
            other => Err(TftpError::InvalidPacket(format!(
                "unexpected reply to RRQ: {:?}",
                other
            ))),
        }
    }

    /// Drive the DATA/ACK loop to completion
    async fn run(mut self) -> Result<Bytes> {
        loop {
            // ACK whatever we have so far: block 0 after an OACK,
            // otherwise the last block received
            let ack = TftpPacket::ack(self.expected_block.wrapping_sub(1)).encode();

            if self.done {
                // Final ACK needs no reply
                self.socket.send_to(&ack, self.peer).await?;
                return Ok(self.body.freeze());
            }

            let packet = self.exchange(&ack).await?;
            match packet {
                TftpPacket::Data { block, data } => self.accept_data(block, data)?,
                TftpPacket::Error { code, message } => {
                    return Err(TftpError::Remote {
                        server: self.peer,
                        code,
                        message,
                    })
                }
                other => {
                    return Err(TftpError::InvalidPacket(format!(
                        "unexpected packet mid-transfer: {:?}",
                        other
                    )))
                }
            }
        }
    }

    fn accept_data(&mut self, block: u16, data: Bytes) -> Result<()> {
        if block == self.expected_block {
            if data.len() < self.block_size {
                self.done = true;
            }
            self.body.extend_from_slice(&data);
            self.expected_block = self.expected_block.wrapping_add(1);
            Ok(())
        } else if block.wrapping_add(1) == self.expected_block {
            // Duplicate of the block we already have; the next loop
            // iteration re-ACKs it
            trace!(block, "duplicate TFTP data block");
            Ok(())
        } else {
            Err(TftpError::UnexpectedBlock {
                expected: self.expected_block,
                got: block,
            })
        }
    }

    /// Send (or retransmit) `outgoing` until a reply from the peer
    /// arrives, locking onto the server's transfer TID on first contact
    async fn exchange(&mut self, outgoing: &[u8]) -> Result<TftpPacket> {
        for attempt in 0..=MAX_RETRANSMITS {
            if attempt > 0 {
                warn!(peer = %self.peer, attempt, "retransmitting TFTP packet");
            }
            self.socket.send_to(outgoing, self.peer).await?;

            match timeout(REPLY_TIMEOUT, self.socket.recv_from(&mut self.buf)).await {
                Ok(Ok((len, src))) => {
                    if self.tid_locked && src != self.peer {
                        // Stray packet from another TID; ignore per RFC 1350
                        trace!(src = %src, "ignoring packet from unknown TID");
                        continue;
                    }
                    if !self.tid_locked {
                        self.peer = src;
                        self.tid_locked = true;
                    }
                    return TftpPacket::parse(&self.buf[..len]);
                }
                Ok(Err(e)) => return Err(TftpError::Io(e)),
                Err(_) => continue,
            }
        }

        Err(TftpError::TimedOut {
            server: self.peer,
            retries: MAX_RETRANSMITS,
        })
    }
}
