//! MQTT v3.1 wire codec
//!
//! Frame layout: one fixed-header byte `(type << 4) | (dup << 3) | (qos << 1) | retain`,
//! a base-128 "remaining length" of 1-4 bytes, then the type-specific body.
//! Strings are a big-endian u16 length followed by UTF-8 bytes.
//!
//! The in-memory functions ([`encode`], [`decode`]) are pure; [`read_frame`] and
//! [`write_packet`] drive them over tokio byte streams.

use super::packet::{
    ConnackCode, Connect, Packet, PacketType, Publish, QoS, Suback, Subscribe, Unsubscribe, Will,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest value the 4-byte remaining-length field can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const MAX_STRING_LENGTH: usize = u16::MAX as usize;

/// Framing and protocol errors raised by the codec
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Malformed remaining length: more than 4 length bytes")]
    MalformedRemainingLength,
    #[error("Remaining length {0} exceeds maximum of 268435455")]
    RemainingLengthTooLarge(usize),
    #[error("Unknown message type: {0}")]
    UnknownPacketType(u8),
    #[error("Unknown QoS code {0}")]
    InvalidQos(u8),
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,
    #[error("String of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A complete frame read off the stream but not yet decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: u8,
    pub body: Bytes,
}

impl Frame {
    pub fn decode(self) -> Result<Packet, CodecError> {
        decode_frame(self.header, self.body)
    }
}

/// Append the base-128 encoding of `len` to `dst`
pub fn encode_remaining_length(len: usize, dst: &mut BytesMut) -> Result<(), CodecError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(CodecError::RemainingLengthTooLarge(len));
    }

    let mut value = len;
    loop {
        let mut digit = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            digit |= 0x80;
        }
        dst.put_u8(digit);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Decode a remaining length from the start of `src`.
///
/// Returns the value and the number of bytes it occupied.
pub fn decode_remaining_length(src: &[u8]) -> Result<(usize, usize), CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for index in 0..4 {
        let digit = *src.get(index).ok_or(CodecError::Truncated {
            expected: index + 1,
            actual: src.len(),
        })?;
        value += (digit & 0x7F) as usize * multiplier;
        if digit & 0x80 == 0 {
            return Ok((value, index + 1));
        }
        multiplier *= 128;
    }

    Err(CodecError::MalformedRemainingLength)
}

/// Append a length-prefixed UTF-8 string
pub fn put_string(dst: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let bytes = value.as_bytes();
    if bytes.len() > MAX_STRING_LENGTH {
        return Err(CodecError::StringTooLong(bytes.len()));
    }
    dst.put_u16(bytes.len() as u16);
    dst.put_slice(bytes);
    Ok(())
}

/// Read a length-prefixed UTF-8 string
pub fn get_string(src: &mut Bytes) -> Result<String, CodecError> {
    let len = get_u16(src)? as usize;
    ensure_remaining(src, len)?;
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

fn get_u16(src: &mut Bytes) -> Result<u16, CodecError> {
    ensure_remaining(src, 2)?;
    Ok(src.get_u16())
}

fn get_u8(src: &mut Bytes) -> Result<u8, CodecError> {
    ensure_remaining(src, 1)?;
    Ok(src.get_u8())
}

fn ensure_remaining(src: &Bytes, needed: usize) -> Result<(), CodecError> {
    if src.remaining() < needed {
        return Err(CodecError::Truncated {
            expected: needed,
            actual: src.remaining(),
        });
    }
    Ok(())
}

fn fixed_header(packet: &Packet) -> u8 {
    let type_bits = packet.packet_type().as_u8() << 4;
    match packet {
        Packet::Publish(publish) => {
            type_bits
                | (u8::from(publish.dup) << 3)
                | (publish.qos.as_u8() << 1)
                | u8::from(publish.retain)
        }
        // Acknowledged control packets carry QoS 1 in the header
        Packet::Pubrel(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => {
            type_bits | (QoS::AtLeastOnce.as_u8() << 1)
        }
        _ => type_bits,
    }
}

fn encode_body(packet: &Packet, body: &mut BytesMut) -> Result<(), CodecError> {
    match packet {
        Packet::Connect(connect) => {
            put_string(body, &connect.protocol_name)?;
            body.put_u8(connect.protocol_level);
            body.put_u8(connect.flags());
            body.put_u16(connect.keep_alive_secs);
            put_string(body, &connect.client_id)?;
            if let Some(will) = &connect.will {
                put_string(body, &will.topic)?;
                put_string(body, &will.message)?;
            }
            if let Some(username) = &connect.username {
                put_string(body, username)?;
            }
            if let Some(password) = &connect.password {
                put_string(body, password)?;
            }
        }
        Packet::Connack(code) => {
            body.put_u8(0);
            body.put_u8(code.as_byte());
        }
        Packet::Publish(publish) => {
            put_string(body, &publish.topic)?;
            if publish.qos > QoS::AtMostOnce {
                body.put_u16(publish.message_id);
            }
            body.put_slice(&publish.payload);
        }
        Packet::Puback(id)
        | Packet::Pubrec(id)
        | Packet::Pubrel(id)
        | Packet::Pubcomp(id)
        | Packet::Unsuback(id) => body.put_u16(*id),
        Packet::Subscribe(subscribe) => {
            body.put_u16(subscribe.message_id);
            for (topic, qos) in &subscribe.topics {
                put_string(body, topic)?;
                body.put_u8(qos.as_u8());
            }
        }
        Packet::Suback(suback) => {
            body.put_u16(suback.message_id);
            body.put_slice(&suback.granted);
        }
        Packet::Unsubscribe(unsubscribe) => {
            body.put_u16(unsubscribe.message_id);
            for topic in &unsubscribe.topics {
                put_string(body, topic)?;
            }
        }
        Packet::Pingreq | Packet::Pingresp | Packet::Disconnect => {}
    }
    Ok(())
}

/// Encode a complete frame into `dst`
pub fn encode(packet: &Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
    let mut body = BytesMut::new();
    encode_body(packet, &mut body)?;

    dst.reserve(body.len() + 5);
    dst.put_u8(fixed_header(packet));
    encode_remaining_length(body.len(), dst)?;
    dst.extend_from_slice(&body);
    Ok(())
}

/// Decode one complete frame from the start of `src`.
///
/// Returns the packet and the number of bytes consumed. An incomplete frame
/// is a [`CodecError::Truncated`] error.
pub fn decode(src: &[u8]) -> Result<(Packet, usize), CodecError> {
    let header = *src.first().ok_or(CodecError::Truncated {
        expected: 1,
        actual: 0,
    })?;
    let (len, len_bytes) = decode_remaining_length(&src[1..])?;
    let total = 1 + len_bytes + len;
    if src.len() < total {
        return Err(CodecError::Truncated {
            expected: total,
            actual: src.len(),
        });
    }

    let body = Bytes::copy_from_slice(&src[1 + len_bytes..total]);
    let packet = decode_frame(header, body)?;
    Ok((packet, total))
}

/// Decode the body of a frame whose fixed header and length have been read
pub fn decode_frame(header: u8, mut body: Bytes) -> Result<Packet, CodecError> {
    let packet_type = PacketType::try_from(header >> 4)?;

    let packet = match packet_type {
        PacketType::Connect => Packet::Connect(decode_connect(&mut body)?),
        PacketType::Connack => {
            let _reserved = get_u8(&mut body)?;
            Packet::Connack(ConnackCode::from_byte(get_u8(&mut body)?))
        }
        PacketType::Publish => {
            let qos = QoS::try_from((header >> 1) & 0x03)?;
            let topic = get_string(&mut body)?;
            let message_id = if qos > QoS::AtMostOnce {
                get_u16(&mut body)?
            } else {
                0
            };
            Packet::Publish(Publish {
                dup: header & 0x08 != 0,
                qos,
                retain: header & 0x01 != 0,
                topic,
                message_id,
                payload: body,
            })
        }
        PacketType::Puback => Packet::Puback(get_u16(&mut body)?),
        PacketType::Pubrec => Packet::Pubrec(get_u16(&mut body)?),
        PacketType::Pubrel => Packet::Pubrel(get_u16(&mut body)?),
        PacketType::Pubcomp => Packet::Pubcomp(get_u16(&mut body)?),
        PacketType::Subscribe => {
            let message_id = get_u16(&mut body)?;
            let mut topics = Vec::new();
            while body.has_remaining() {
                let topic = get_string(&mut body)?;
                let qos = QoS::try_from(get_u8(&mut body)?)?;
                topics.push((topic, qos));
            }
            Packet::Subscribe(Subscribe { message_id, topics })
        }
        PacketType::Suback => {
            let message_id = get_u16(&mut body)?;
            Packet::Suback(Suback {
                message_id,
                granted: body.to_vec(),
            })
        }
        PacketType::Unsubscribe => {
            let message_id = get_u16(&mut body)?;
            let mut topics = Vec::new();
            while body.has_remaining() {
                topics.push(get_string(&mut body)?);
            }
            Packet::Unsubscribe(Unsubscribe { message_id, topics })
        }
        PacketType::Unsuback => Packet::Unsuback(get_u16(&mut body)?),
        PacketType::Pingreq => Packet::Pingreq,
        PacketType::Pingresp => Packet::Pingresp,
        PacketType::Disconnect => Packet::Disconnect,
    };

    Ok(packet)
}

fn decode_connect(body: &mut Bytes) -> Result<Connect, CodecError> {
    let protocol_name = get_string(body)?;
    let protocol_level = get_u8(body)?;
    let flags = get_u8(body)?;
    let keep_alive_secs = get_u16(body)?;
    let client_id = get_string(body)?;

    let will = if flags & 0x04 != 0 {
        let topic = get_string(body)?;
        let message = get_string(body)?;
        Some(Will {
            topic,
            message,
            qos: QoS::try_from((flags >> 3) & 0x03)?,
            retain: flags & 0x20 != 0,
        })
    } else {
        None
    };
    let username = if flags & 0x80 != 0 {
        Some(get_string(body)?)
    } else {
        None
    };
    let password = if flags & 0x40 != 0 {
        Some(get_string(body)?)
    } else {
        None
    };

    Ok(Connect {
        protocol_name,
        protocol_level,
        client_id,
        clean_session: flags & 0x02 != 0,
        keep_alive_secs,
        will,
        username,
        password,
    })
}

impl Packet {
    /// Encode this packet as a standalone frame
    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut dst = BytesMut::new();
        encode(self, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Decode a packet from a buffer holding exactly one frame
    pub fn from_bytes(src: &[u8]) -> Result<Self, CodecError> {
        decode(src).map(|(packet, _)| packet)
    }
}

/// Read one frame from `reader` in arrival order.
///
/// End of stream before the fixed header is an I/O error; end of stream
/// anywhere inside the frame is [`CodecError::Truncated`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, CodecError>
where
    R: AsyncRead + Unpin,
{
    let header = reader.read_u8().await?;

    let mut len = 0usize;
    let mut multiplier = 1usize;
    let mut len_bytes = 0usize;
    loop {
        if len_bytes == 4 {
            return Err(CodecError::MalformedRemainingLength);
        }
        let mut digit = [0u8; 1];
        if reader.read(&mut digit).await? == 0 {
            return Err(CodecError::Truncated {
                expected: len_bytes + 2,
                actual: len_bytes + 1,
            });
        }
        len_bytes += 1;
        len += (digit[0] & 0x7F) as usize * multiplier;
        if digit[0] & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
    }

    let mut body = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let read = reader.read(&mut body[filled..]).await?;
        if read == 0 {
            return Err(CodecError::Truncated {
                expected: len,
                actual: filled,
            });
        }
        filled += read;
    }

    Ok(Frame {
        header,
        body: Bytes::from(body),
    })
}

/// Read and decode one packet
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, CodecError>
where
    R: AsyncRead + Unpin,
{
    read_frame(reader).await?.decode()
}

/// Encode and write one packet, flushing the writer
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let frame = packet.to_bytes()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
