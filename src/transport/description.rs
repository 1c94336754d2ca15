//! Wire format for the per-package transport header.

use thiserror::Error;

use crate::network::Address;

/// Port size tag used in the flag byte. `Implicit` means the port is `1` and
/// occupies no bytes on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PortSize {
    Implicit,
    OneByte,
    TwoBytes,
}

impl PortSize {
    fn code(self) -> u8 {
        match self {
            Self::Implicit => 0b01,
            Self::OneByte => 0b10,
            Self::TwoBytes => 0b11,
        }
    }

    fn from_code(code: u8) -> Result<Self, TransportError> {
        match code {
            0b01 => Ok(Self::Implicit),
            0b10 => Ok(Self::OneByte),
            0b11 => Ok(Self::TwoBytes),
            _ => Err(TransportError::ReservedPortSize),
        }
    }

    fn for_port(port: u16) -> Self {
        if port == 1 {
            Self::Implicit
        } else if port <= 0xFF {
            Self::OneByte
        } else {
            Self::TwoBytes
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Broadcast,
    ConnectionRequest,
    ConnectionSubmit,
    DataTransfer,
    ConnectionClose,
    ConnectionCloseSubmit,
}

impl Type {
    fn code(self) -> u8 {
        match self {
            Self::Broadcast => 0,
            Self::ConnectionRequest => 1,
            Self::ConnectionSubmit => 2,
            Self::DataTransfer => 3,
            Self::ConnectionClose => 4,
            Self::ConnectionCloseSubmit => 5,
        }
    }

    fn from_code(code: u8) -> Result<Self, TransportError> {
        match code {
            0 => Ok(Self::Broadcast),
            1 => Ok(Self::ConnectionRequest),
            2 => Ok(Self::ConnectionSubmit),
            3 => Ok(Self::DataTransfer),
            4 => Ok(Self::ConnectionClose),
            5 => Ok(Self::ConnectionCloseSubmit),
            _ => Err(TransportError::UnknownType(code)),
        }
    }
}

/// Logical fields exchanged between peer transports. `source_addr` and
/// `destination_addr` are not carried on the wire: they come from the
/// network layer's envelope around the transport package and are filled in
/// by the caller on encode/decode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransportDescription {
    pub source_addr: Address,
    pub source_port: u16,
    pub destination_addr: Address,
    pub destination_port: u16,
    pub r#type: Type,
    pub message_id: u16,
    pub ack_for_message_id: u16,
    pub has_ack: bool,
    pub repeat: u8,
}

impl TransportDescription {
    pub fn new(
        source_addr: Address,
        source_port: u16,
        destination_addr: Address,
        destination_port: u16,
        r#type: Type,
    ) -> Self {
        Self {
            source_addr,
            source_port,
            destination_addr,
            destination_port,
            r#type,
            message_id: 0,
            ack_for_message_id: 0,
            has_ack: false,
            repeat: 1,
        }
    }

    /// Encodes the header (ports + control fields only; addresses are
    /// carried by the network layer).
    pub fn encode(&self) -> Vec<u8> {
        let src_size = PortSize::for_port(self.source_port);
        let dst_size = PortSize::for_port(self.destination_port);

        let mut out = Vec::with_capacity(8);
        out.push((src_size.code() << 2) | dst_size.code());
        out.push(self.r#type.code());
        out.extend_from_slice(&self.message_id.to_le_bytes());
        out.extend_from_slice(&self.ack_for_message_id.to_le_bytes());
        out.push(self.has_ack as u8);
        out.push(self.repeat);

        match src_size {
            PortSize::Implicit => {}
            PortSize::OneByte => out.push(self.source_port as u8),
            PortSize::TwoBytes => out.extend_from_slice(&self.source_port.to_le_bytes()),
        }
        match dst_size {
            PortSize::Implicit => {}
            PortSize::OneByte => out.push(self.destination_port as u8),
            PortSize::TwoBytes => out.extend_from_slice(&self.destination_port.to_le_bytes()),
        }

        out
    }

    /// Decodes a header from the front of `data`. `source_addr` and
    /// `destination_addr` must be supplied by the caller from the network
    /// envelope; returns the description and the number of bytes consumed.
    pub fn decode(
        data: &[u8],
        source_addr: Address,
        destination_addr: Address,
    ) -> Result<(Self, usize), TransportError> {
        let flag = *data.first().ok_or(TransportError::Truncated)?;
        let src_size = PortSize::from_code((flag >> 2) & 0b11)?;
        let dst_size = PortSize::from_code(flag & 0b11)?;

        let r#type = Type::from_code(*data.get(1).ok_or(TransportError::Truncated)?)?;

        let message_id = read_u16(data, 2)?;
        let ack_for_message_id = read_u16(data, 4)?;
        let has_ack = *data.get(6).ok_or(TransportError::Truncated)? != 0;
        let repeat = *data.get(7).ok_or(TransportError::Truncated)?;

        let mut pos = 8;
        let source_port = match src_size {
            PortSize::Implicit => 1,
            PortSize::OneByte => {
                let p = *data.get(pos).ok_or(TransportError::Truncated)? as u16;
                pos += 1;
                p
            }
            PortSize::TwoBytes => {
                let p = read_u16(data, pos)?;
                pos += 2;
                p
            }
        };
        let destination_port = match dst_size {
            PortSize::Implicit => 1,
            PortSize::OneByte => {
                let p = *data.get(pos).ok_or(TransportError::Truncated)? as u16;
                pos += 1;
                p
            }
            PortSize::TwoBytes => {
                let p = read_u16(data, pos)?;
                pos += 2;
                p
            }
        };

        Ok((
            Self {
                source_addr,
                source_port,
                destination_addr,
                destination_port,
                r#type,
                message_id,
                ack_for_message_id,
                has_ack,
                repeat,
            },
            pos,
        ))
    }
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16, TransportError> {
    let bytes = data.get(pos..pos + 2).ok_or(TransportError::Truncated)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("truncated transport header")]
    Truncated,
    #[error("reserved port-size tag")]
    ReservedPortSize,
    #[error("unknown transport package type {0}")]
    UnknownType(u8),
}
