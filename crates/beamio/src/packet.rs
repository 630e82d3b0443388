use base64::{engine::general_purpose, Engine};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::errors::Error;
use crate::service::TransportType;
use crate::sid::Sid;

/// An Engine.IO transport frame.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum Packet {
    /// Sent by the server to complete the handshake.
    Open(OpenPacket),
    /// Gracefully terminates the session. Either side may send it.
    Close,
    /// Heartbeat probe, only sent by the server.
    Ping,
    /// Heartbeat answer, only sent by the client.
    Pong,

    /// `2probe`: sent by the client on a fresh transport to validate it.
    PingProbe,
    /// `3probe`: the server's answer on the probed transport.
    PongProbe,

    /// A text payload handed to the layer above.
    Message(String),
    /// Commits a probed transport, sent by the client.
    Upgrade,
    /// Sent on a held polling request so it closes gracefully, typically to
    /// let the client finish a websocket upgrade.
    Noop,

    /// A binary payload handed to the layer above.
    ///
    /// On a websocket it maps to a binary frame without any type prefix; in a
    /// polling payload it is encoded as `b<base64>`.
    Binary(Vec<u8>),
}

impl Packet {
    /// Whether this packet must be carried on a binary frame.
    pub fn is_binary(&self) -> bool {
        matches!(self, Packet::Binary(_))
    }

    pub(crate) fn into_message(self) -> String {
        match self {
            Packet::Message(msg) => msg,
            _ => panic!("packet is not a message"),
        }
    }

    pub(crate) fn into_binary(self) -> Vec<u8> {
        match self {
            Packet::Binary(data) => data,
            _ => panic!("packet is not binary"),
        }
    }

    /// Upper bound of the serialized size, used to pre-allocate payload
    /// buffers and to budget polling payloads against `max_payload`.
    pub(crate) fn size_hint(&self) -> usize {
        match self {
            Packet::Open(_) => 160,
            Packet::Message(msg) => 1 + msg.len(),
            Packet::PingProbe | Packet::PongProbe => 6,
            // base64 grows by ceil(n / 3) * 4
            Packet::Binary(data) => 1 + data.len().div_ceil(3) * 4,
            _ => 1,
        }
    }
}

/// Serialize a [`Packet`] to its text frame form.
impl TryFrom<Packet> for String {
    type Error = Error;
    fn try_from(packet: Packet) -> Result<Self, Self::Error> {
        let res = match packet {
            Packet::Open(open) => "0".to_string() + &serde_json::to_string(&open)?,
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::PingProbe => "2probe".to_string(),
            Packet::PongProbe => "3probe".to_string(),
            Packet::Message(msg) => "4".to_string() + &msg,
            Packet::Upgrade => "5".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Binary(data) => "b".to_string() + &general_purpose::STANDARD.encode(data),
        };
        Ok(res)
    }
}

/// Deserialize a [`Packet`] from a text frame.
impl TryFrom<&str> for Packet {
    type Error = Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut chars = value.chars();
        let packet_type = chars.next().ok_or(Error::InvalidPacketType(None))?;
        let packet_data = chars.as_str();
        let is_probe = packet_data == "probe";
        let res = match packet_type {
            '0' => Packet::Open(serde_json::from_str(packet_data)?),
            '1' => Packet::Close,
            '2' if is_probe => Packet::PingProbe,
            '2' => Packet::Ping,
            '3' if is_probe => Packet::PongProbe,
            '3' => Packet::Pong,
            '4' => Packet::Message(packet_data.to_string()),
            '5' => Packet::Upgrade,
            '6' => Packet::Noop,
            'b' => Packet::Binary(general_purpose::STANDARD.decode(packet_data.as_bytes())?),
            c => return Err(Error::InvalidPacketType(Some(c))),
        };
        Ok(res)
    }
}

impl TryFrom<String> for Packet {
    type Error = Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Packet::try_from(value.as_str())
    }
}

/// The handshake payload carried by an `Open` packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    pub sid: Sid,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: u64,
}

impl OpenPacket {
    /// A polling handshake always advertises the websocket upgrade; a direct
    /// websocket connection has nothing left to upgrade to.
    pub(crate) fn new(transport: TransportType, sid: Sid, config: &EngineConfig) -> Self {
        let upgrades = if transport == TransportType::Polling
            && config.allowed_transport(TransportType::Websocket)
        {
            vec!["websocket".to_string()]
        } else {
            vec![]
        };
        OpenPacket {
            sid,
            upgrades,
            ping_interval: config.ping_interval.as_millis() as u64,
            ping_timeout: config.ping_timeout.as_millis() as u64,
            max_payload: config.max_payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn open_packet_encode() {
        let sid = Sid::new();
        let packet = Packet::Open(OpenPacket::new(
            TransportType::Polling,
            sid,
            &EngineConfig::default(),
        ));
        let packet: String = packet.try_into().unwrap();
        assert_eq!(
            packet,
            format!("0{{\"sid\":\"{sid}\",\"upgrades\":[\"websocket\"],\"pingInterval\":25000,\"pingTimeout\":20000,\"maxPayload\":1048576}}")
        );
    }

    #[test]
    fn open_packet_decode() {
        let sid = Sid::new();
        let raw = format!("0{{\"sid\":\"{sid}\",\"upgrades\":[\"websocket\"],\"pingInterval\":25000,\"pingTimeout\":20000,\"maxPayload\":1048576}}");
        let packet = Packet::try_from(raw).unwrap();
        assert_eq!(
            packet,
            Packet::Open(OpenPacket {
                sid,
                upgrades: vec!["websocket".to_string()],
                ping_interval: 25000,
                ping_timeout: 20000,
                max_payload: 1024 * 1024,
            })
        );
    }

    #[test]
    fn message_packet_roundtrip() {
        let packet: String = Packet::Message("hello".to_string()).try_into().unwrap();
        assert_eq!(packet, "4hello");
        let packet = Packet::try_from("4hello").unwrap();
        assert_eq!(packet, Packet::Message("hello".to_string()));
    }

    #[test]
    fn probe_packets() {
        let ping: String = Packet::PingProbe.try_into().unwrap();
        assert_eq!(ping, "2probe");
        let pong: String = Packet::PongProbe.try_into().unwrap();
        assert_eq!(pong, "3probe");

        assert_eq!(Packet::try_from("2probe").unwrap(), Packet::PingProbe);
        assert_eq!(Packet::try_from("3probe").unwrap(), Packet::PongProbe);
        assert_eq!(Packet::try_from("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::try_from("3").unwrap(), Packet::Pong);
    }

    #[test]
    fn binary_packet_roundtrip() {
        let packet: String = Packet::Binary(vec![1, 2, 3]).try_into().unwrap();
        assert_eq!(packet, "bAQID");
        let packet = Packet::try_from("bAQID").unwrap();
        assert_eq!(packet, Packet::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn invalid_packet_type() {
        assert!(matches!(
            Packet::try_from("7"),
            Err(Error::InvalidPacketType(Some('7')))
        ));
        assert!(matches!(
            Packet::try_from(""),
            Err(Error::InvalidPacketType(None))
        ));
    }

    #[test]
    fn size_hint_covers_serialized_len() {
        for packet in [
            Packet::Close,
            Packet::Ping,
            Packet::Pong,
            Packet::PingProbe,
            Packet::PongProbe,
            Packet::Message("hello".to_string()),
            Packet::Upgrade,
            Packet::Noop,
            Packet::Binary(vec![1, 2, 3, 4]),
        ] {
            let hint = packet.size_hint();
            let serialized: String = packet.try_into().unwrap();
            assert!(serialized.len() <= hint);
        }
    }
}
