//! MQTT v3.1 protocol types and wire codec
//!
//! - [`packet`] - control packet data types
//! - [`codec`] - byte-exact encoding and decoding
//! - [`message`] - in-flight message record

pub mod codec;
pub mod message;
pub mod packet;

pub use codec::{
    decode, encode, read_frame, read_packet, write_packet, CodecError, Frame, MAX_REMAINING_LENGTH,
};
pub use message::Message;
pub use packet::{
    ConnackCode, Connect, Packet, PacketType, Publish, QoS, Suback, Subscribe, Unsubscribe, Will,
    PROTOCOL_LEVEL, PROTOCOL_NAME,
};
