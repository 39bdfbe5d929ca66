//! MQTT v3.1 control packet types
//!
//! Plain data types for every control packet the client sends or receives.
//! Byte-level encoding lives in [`super::codec`].

use super::codec::CodecError;
use bytes::Bytes;
use std::fmt;

/// Protocol name sent in CONNECT for MQTT v3.1
pub const PROTOCOL_NAME: &str = "MQIsdp";

/// Protocol level sent in CONNECT for MQTT v3.1
pub const PROTOCOL_LEVEL: u8 = 3;

/// Control packet type carried in the high nibble of the fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            5 => Ok(PacketType::Pubrec),
            6 => Ok(PacketType::Pubrel),
            7 => Ok(PacketType::Pubcomp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::Unsuback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            _ => Err(CodecError::UnknownPacketType(value)),
        }
    }
}

/// Delivery guarantee for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// Fire and forget
    #[default]
    AtMostOnce = 0,
    /// Acknowledged with PUBACK, may be duplicated
    AtLeastOnce = 1,
    /// Four-step PUBLISH/PUBREC/PUBREL/PUBCOMP handshake
    ExactlyOnce = 2,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(CodecError::InvalidQos(value)),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// CONNACK response code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnackCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
    /// Any code outside 0-5
    Unknown(u8),
}

impl ConnackCode {
    pub fn from_byte(code: u8) -> Self {
        match code {
            0 => ConnackCode::Accepted,
            1 => ConnackCode::UnacceptableProtocolVersion,
            2 => ConnackCode::IdentifierRejected,
            3 => ConnackCode::ServerUnavailable,
            4 => ConnackCode::BadUserNameOrPassword,
            5 => ConnackCode::NotAuthorized,
            other => ConnackCode::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            ConnackCode::Accepted => 0,
            ConnackCode::UnacceptableProtocolVersion => 1,
            ConnackCode::IdentifierRejected => 2,
            ConnackCode::ServerUnavailable => 3,
            ConnackCode::BadUserNameOrPassword => 4,
            ConnackCode::NotAuthorized => 5,
            ConnackCode::Unknown(code) => code,
        }
    }

    pub fn is_accepted(self) -> bool {
        matches!(self, ConnackCode::Accepted)
    }
}

impl fmt::Display for ConnackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnackCode::Accepted => write!(f, "Connection Accepted"),
            ConnackCode::UnacceptableProtocolVersion => {
                write!(f, "Connection Refused: unacceptable protocol version")
            }
            ConnackCode::IdentifierRejected => write!(f, "Connection Refused: identifier rejected"),
            ConnackCode::ServerUnavailable => write!(f, "Connection Refused: server unavailable"),
            ConnackCode::BadUserNameOrPassword => {
                write!(f, "Connection Refused: bad user name or password")
            }
            ConnackCode::NotAuthorized => write!(f, "Connection Refused: not authorized"),
            ConnackCode::Unknown(code) => {
                write!(f, "Connection Refused: unknown reason code {code}")
            }
        }
    }
}

/// Last will and testament registered with the broker at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: String,
    pub qos: QoS,
    pub retain: bool,
}

/// CONNECT packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive_secs: u16,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Connect {
    /// CONNECT for MQTT v3.1 with no will and no credentials
    pub fn new(client_id: impl Into<String>, keep_alive_secs: u16) -> Self {
        Self {
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_level: PROTOCOL_LEVEL,
            client_id: client_id.into(),
            clean_session: false,
            keep_alive_secs,
            will: None,
            username: None,
            password: None,
        }
    }

    /// Connect-flags byte (bit7 user, bit6 password, bit5 will retain,
    /// bits4-3 will QoS, bit2 will, bit1 clean session)
    pub fn flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.username.is_some() {
            flags |= 0x80;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if let Some(will) = &self.will {
            if will.retain {
                flags |= 0x20;
            }
            flags |= will.qos.as_u8() << 3;
            flags |= 0x04;
        }
        if self.clean_session {
            flags |= 0x02;
        }
        flags
    }
}

/// PUBLISH packet
///
/// `message_id` is 0 for QoS 0 and is not written on the wire in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub message_id: u16,
    pub payload: Bytes,
}

impl Publish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            dup: false,
            qos,
            retain,
            topic: topic.into(),
            message_id: 0,
            payload: payload.into(),
        }
    }

    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.message_id = message_id;
        self
    }
}

/// SUBSCRIBE packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub message_id: u16,
    pub topics: Vec<(String, QoS)>,
}

/// SUBACK packet; `granted` holds one raw byte per requested topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suback {
    pub message_id: u16,
    pub granted: Vec<u8>,
}

/// UNSUBSCRIBE packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub message_id: u16,
    pub topics: Vec<String>,
}

/// Every control packet understood by the codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(ConnackCode),
    Publish(Publish),
    Puback(u16),
    Pubrec(u16),
    Pubrel(u16),
    Pubcomp(u16),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(u16),
    Pingreq,
    Pingresp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback(_) => PacketType::Puback,
            Packet::Pubrec(_) => PacketType::Pubrec,
            Packet::Pubrel(_) => PacketType::Pubrel,
            Packet::Pubcomp(_) => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// Message identifier carried by the packet, if any
    pub fn message_id(&self) -> Option<u16> {
        match self {
            Packet::Publish(publish) if publish.qos > QoS::AtMostOnce => Some(publish.message_id),
            Packet::Puback(id)
            | Packet::Pubrec(id)
            | Packet::Pubrel(id)
            | Packet::Pubcomp(id)
            | Packet::Unsuback(id) => Some(*id),
            Packet::Subscribe(subscribe) => Some(subscribe.message_id),
            Packet::Suback(suback) => Some(suback.message_id),
            Packet::Unsubscribe(unsubscribe) => Some(unsubscribe.message_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_from_byte() {
        for value in 1u8..=14 {
            let packet_type = PacketType::try_from(value).unwrap();
            assert_eq!(packet_type.as_u8(), value);
        }
        assert!(matches!(
            PacketType::try_from(0),
            Err(CodecError::UnknownPacketType(0))
        ));
        assert!(matches!(
            PacketType::try_from(15),
            Err(CodecError::UnknownPacketType(15))
        ));
    }

    #[test]
    fn test_qos_rejects_three() {
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(QoS::try_from(3), Err(CodecError::InvalidQos(3))));
    }

    #[test]
    fn test_connack_messages() {
        assert_eq!(
            ConnackCode::from_byte(1).to_string(),
            "Connection Refused: unacceptable protocol version"
        );
        assert_eq!(
            ConnackCode::from_byte(2).to_string(),
            "Connection Refused: identifier rejected"
        );
        assert_eq!(
            ConnackCode::from_byte(3).to_string(),
            "Connection Refused: server unavailable"
        );
        assert_eq!(
            ConnackCode::from_byte(4).to_string(),
            "Connection Refused: bad user name or password"
        );
        assert_eq!(
            ConnackCode::from_byte(5).to_string(),
            "Connection Refused: not authorized"
        );
        assert_eq!(
            ConnackCode::from_byte(42).to_string(),
            "Connection Refused: unknown reason code 42"
        );
        assert!(ConnackCode::from_byte(0).is_accepted());
        assert_eq!(ConnackCode::Unknown(9).as_byte(), 9);
    }

    #[test]
    fn test_connect_flags() {
        let mut connect = Connect::new("client", 60);
        assert_eq!(connect.flags(), 0x00);

        connect.clean_session = true;
        connect.username = Some("user".to_string());
        connect.password = Some("secret".to_string());
        connect.will = Some(Will {
            topic: "status".to_string(),
            message: "client is offline".to_string(),
            qos: QoS::ExactlyOnce,
            retain: true,
        });

        // user | password | will retain | will qos 2 | will | clean session
        assert_eq!(connect.flags(), 0x80 | 0x40 | 0x20 | 0x10 | 0x04 | 0x02);
    }

    #[test]
    fn test_message_id_only_for_tracked_packets() {
        let qos0 = Packet::Publish(Publish::new("a", "b", QoS::AtMostOnce, false));
        assert_eq!(qos0.message_id(), None);

        let qos1 =
            Packet::Publish(Publish::new("a", "b", QoS::AtLeastOnce, false).with_message_id(7));
        assert_eq!(qos1.message_id(), Some(7));
        assert_eq!(Packet::Pubrel(9).message_id(), Some(9));
        assert_eq!(Packet::Pingreq.message_id(), None);
    }
}
