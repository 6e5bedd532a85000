//! TFTP packet codec (client subset)
//!
//! Only the packets a read-only transfer needs: RRQ, ACK, DATA, OACK
//! and ERROR. Write requests are not supported.

use crate::error::{Result, TftpError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// TFTP opcodes (RFC 1350, RFC 2347)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,
    Data = 3,
    Ack = 4,
    Error = 5,
    Oack = 6,
}

impl TryFrom<u16> for Opcode {
    type Error = TftpError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Opcode::Rrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            6 => Ok(Opcode::Oack),
            _ => Err(TftpError::InvalidPacket(format!(
                "unknown opcode: {}",
                value
            ))),
        }
    }
}

/// Options we negotiate on a read request (RFC 2348/2349)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TftpOptions {
    /// Block size (RFC 2348)
    pub blksize: Option<u16>,
    /// Transfer size (RFC 2349); sent as 0 in an RRQ to ask the server
    pub tsize: Option<u64>,
}

impl TftpOptions {
    pub fn is_empty(&self) -> bool {
        self.blksize.is_none() && self.tsize.is_none()
    }
}

/// Packets exchanged during a read transfer
#[derive(Debug, Clone)]
pub enum TftpPacket {
    /// Read request (always octet mode)
    ReadRequest {
        filename: String,
        options: TftpOptions,
    },
    /// Data block from the server
    Data { block: u16, data: Bytes },
    /// Our acknowledgment of a data block (or of an OACK, block 0)
    Ack { block: u16 },
    /// Server-side error
    Error { code: u16, message: String },
    /// Option acknowledgment from the server
    Oack { options: TftpOptions },
}

impl TftpPacket {
    /// Parse a packet received from the server
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(TftpError::InvalidPacket("packet too short".to_string()));
        }

        let mut buf = data;
        let opcode = Opcode::try_from(buf.get_u16())?;

        match opcode {
            Opcode::Data => {
                if buf.len() < 2 {
                    return Err(TftpError::InvalidPacket(
                        "data packet too short".to_string(),
                    ));
                }
                let block = buf.get_u16();
                Ok(TftpPacket::Data {
                    block,
                    data: Bytes::copy_from_slice(buf),
                })
            }
            Opcode::Ack => {
                if buf.len() < 2 {
                    return Err(TftpError::InvalidPacket("ack packet too short".to_string()));
                }
                Ok(TftpPacket::Ack {
                    block: buf.get_u16(),
                })
            }
            Opcode::Error => {
                if buf.len() < 2 {
                    return Err(TftpError::InvalidPacket(
                        "error packet too short".to_string(),
                    ));
                }
                let code = buf.get_u16();
                let message = buf
                    .split(|&b| b == 0)
                    .next()
                    .map(|b| String::from_utf8_lossy(b).to_string())
                    .unwrap_or_default();
                Ok(TftpPacket::Error { code, message })
            }
            Opcode::Oack => Ok(TftpPacket::Oack {
                options: Self::parse_options(buf),
            }),
            Opcode::Rrq => {
                let mut parts = buf.split(|&b| b == 0);
                let filename = match parts.next() {
                    Some(f) if !f.is_empty() => f,
                    _ => {
                        return Err(TftpError::InvalidPacket(
                            "RRQ without filename".to_string(),
                        ))
                    }
                };
                let mode = parts.next().ok_or_else(|| {
                    TftpError::InvalidPacket("RRQ without mode".to_string())
                })?;
                if !mode.eq_ignore_ascii_case(b"octet") {
                    return Err(TftpError::InvalidPacket(format!(
                        "unsupported mode: {}",
                        String::from_utf8_lossy(mode)
                    )));
                }
                let consumed = filename.len() + 1 + mode.len() + 1;
                Ok(TftpPacket::ReadRequest {
                    filename: String::from_utf8_lossy(filename).to_string(),
                    options: Self::parse_options(&buf[consumed.min(buf.len())..]),
                })
            }
        }
    }

    fn parse_options(data: &[u8]) -> TftpOptions {
        let mut parts = data.split(|&b| b == 0);
        let mut options = TftpOptions::default();

        loop {
            let key = match parts.next() {
                Some(k) if !k.is_empty() => String::from_utf8_lossy(k).to_lowercase(),
                _ => break,
            };
            let value = match parts.next() {
                Some(v) => String::from_utf8_lossy(v).to_string(),
                _ => break,
            };

            match key.as_str() {
                "blksize" => options.blksize = value.parse().ok(),
                "tsize" => options.tsize = value.parse().ok(),
                _ => {} // Ignore unknown options
            }
        }

        options
    }

    /// Encode the packet to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            TftpPacket::ReadRequest { filename, options } => {
                buf.put_u16(Opcode::Rrq as u16);
                buf.put_slice(filename.as_bytes());
                buf.put_u8(0);
                buf.put_slice(b"octet");
                buf.put_u8(0);
                if let Some(blksize) = options.blksize {
                    buf.put_slice(b"blksize");
                    buf.put_u8(0);
                    buf.put_slice(blksize.to_string().as_bytes());
                    buf.put_u8(0);
                }
                if let Some(tsize) = options.tsize {
                    buf.put_slice(b"tsize");
                    buf.put_u8(0);
                    buf.put_slice(tsize.to_string().as_bytes());
                    buf.put_u8(0);
                }
            }
            TftpPacket::Data { block, data } => {
                buf.put_u16(Opcode::Data as u16);
                buf.put_u16(*block);
                buf.put_slice(data);
            }
            TftpPacket::Ack { block } => {
                buf.put_u16(Opcode::Ack as u16);
                buf.put_u16(*block);
            }
            TftpPacket::Error { code, message } => {
                buf.put_u16(Opcode::Error as u16);
                buf.put_u16(*code);
                buf.put_slice(message.as_bytes());
                buf.put_u8(0);
            }
            TftpPacket::Oack { options } => {
                buf.put_u16(Opcode::Oack as u16);
                if let Some(blksize) = options.blksize {
                    buf.put_slice(b"blksize");
                    buf.put_u8(0);
                    buf.put_slice(blksize.to_string().as_bytes());
                    buf.put_u8(0);
                }
                if let Some(tsize) = options.tsize {
                    buf.put_slice(b"tsize");
                    buf.put_u8(0);
                    buf.put_slice(tsize.to_string().as_bytes());
                    buf.put_u8(0);
                }
            }
        }

        buf.freeze()
    }

    /// Create a read request for `filename` with negotiated options
    pub fn read_request(filename: impl Into<String>, options: TftpOptions) -> Self {
        TftpPacket::ReadRequest {
            filename: filename.into(),
            options,
        }
    }

    /// Create an ACK packet
    pub fn ack(block: u16) -> Self {
        TftpPacket::Ack { block }
    }
}
