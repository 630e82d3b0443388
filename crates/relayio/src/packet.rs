//! The Socket.IO packet codec.
//!
//! A packet is one text frame, optionally followed by binary attachment
//! frames. Binary values inside the payload are replaced on the wire by
//! `{"_placeholder":true,"num":N}` markers and shipped as raw frames in
//! marker order; [`BinaryPacket`] tracks the reassembly.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::Error;
use beamio::Sid;

/// A Socket.IO packet: its payload and the namespace it is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    pub inner: PacketData<'a>,
    pub ns: Cow<'a, str>,
}

impl<'a> Packet<'a> {
    /// The reply sent to a socket that successfully joined a namespace.
    pub fn connect(ns: &'a str, sid: Sid, pid: Option<Sid>) -> Self {
        let val = serde_json::to_string(&ConnectPacket { sid, pid }).unwrap();
        Self {
            inner: PacketData::Connect(Some(val)),
            ns: Cow::Borrowed(ns),
        }
    }

    pub fn disconnect(ns: &'a str) -> Self {
        Self {
            inner: PacketData::Disconnect,
            ns: Cow::Borrowed(ns),
        }
    }

    /// A connection refusal, carrying the middleware or routing error
    /// message.
    pub fn connect_error(ns: &'a str, message: impl Into<Cow<'a, str>>) -> Self {
        Self {
            inner: PacketData::ConnectError(message.into()),
            ns: Cow::Borrowed(ns),
        }
    }

    pub fn invalid_namespace(ns: &'a str) -> Self {
        Self::connect_error(ns, "Invalid namespace")
    }

    pub fn event(ns: impl Into<Cow<'a, str>>, e: impl Into<Cow<'a, str>>, data: Value) -> Self {
        Self {
            inner: PacketData::Event(e.into(), data, None),
            ns: ns.into(),
        }
    }

    pub fn bin_event(
        ns: impl Into<Cow<'a, str>>,
        e: impl Into<Cow<'a, str>>,
        data: Value,
        bin: Vec<Vec<u8>>,
    ) -> Self {
        debug_assert!(!bin.is_empty());
        let packet = BinaryPacket::outgoing(data, bin);
        Self {
            inner: PacketData::BinaryEvent(e.into(), packet, None),
            ns: ns.into(),
        }
    }

    pub fn ack(ns: &'a str, data: Value, ack: i64) -> Self {
        Self {
            inner: PacketData::EventAck(data, ack),
            ns: Cow::Borrowed(ns),
        }
    }

    pub fn bin_ack(ns: &'a str, data: Value, bin: Vec<Vec<u8>>, ack: i64) -> Self {
        debug_assert!(!bin.is_empty());
        let packet = BinaryPacket::outgoing(data, bin);
        Self {
            inner: PacketData::BinaryAck(packet, ack),
            ns: Cow::Borrowed(ns),
        }
    }

    /// Make the packet own its borrowed parts.
    pub fn into_static(self) -> Packet<'static> {
        Packet {
            inner: self.inner.into_static(),
            ns: Cow::Owned(self.ns.into_owned()),
        }
    }

    /// Size estimate of the header, used to pre-allocate the output buffer.
    fn get_size_hint(&self) -> usize {
        use PacketData::*;
        const PACKET_INDEX_SIZE: usize = 1;
        const BINARY_PUNCTUATION_SIZE: usize = 2;
        const ACK_PUNCTUATION_SIZE: usize = 1;
        const NS_PUNCTUATION_SIZE: usize = 1;

        let data_size = match &self.inner {
            Connect(Some(data)) => data.len(),
            Connect(None) | Disconnect => 0,
            Event(_, _, ack) => ack
                .map(|ack| ack.checked_ilog10().unwrap_or(0) as usize + ACK_PUNCTUATION_SIZE)
                .unwrap_or(0),
            EventAck(_, ack) => ack.checked_ilog10().unwrap_or(0) as usize + ACK_PUNCTUATION_SIZE,
            ConnectError(message) => message.len() + 14,
            BinaryEvent(_, bin, ack) => {
                bin.payload_count.checked_ilog10().unwrap_or(0) as usize
                    + BINARY_PUNCTUATION_SIZE
                    + ack
                        .map(|ack| {
                            ack.checked_ilog10().unwrap_or(0) as usize + ACK_PUNCTUATION_SIZE
                        })
                        .unwrap_or(0)
            }
            BinaryAck(bin, ack) => {
                ack.checked_ilog10().unwrap_or(0) as usize
                    + bin.payload_count.checked_ilog10().unwrap_or(0) as usize
                    + ACK_PUNCTUATION_SIZE
                    + BINARY_PUNCTUATION_SIZE
            }
        };

        let nsp_size = if self.ns == "/" {
            0
        } else {
            self.ns.len() + NS_PUNCTUATION_SIZE
        };
        data_size + nsp_size + PACKET_INDEX_SIZE
    }
}

/// | Type          | ID  | Usage                                                   |
/// |---------------|-----|---------------------------------------------------------|
/// | CONNECT       | 0   | Connection to a namespace.                              |
/// | DISCONNECT    | 1   | Disconnection from a namespace.                         |
/// | EVENT         | 2   | Event payload.                                          |
/// | ACK           | 3   | Event acknowledgement.                                  |
/// | CONNECT_ERROR | 4   | Connection refusal.                                     |
/// | BINARY_EVENT  | 5   | Event payload with binary attachments.                  |
/// | BINARY_ACK    | 6   | Event acknowledgement with binary attachments.          |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketData<'a> {
    Connect(Option<String>),
    Disconnect,
    Event(Cow<'a, str>, Value, Option<i64>),
    EventAck(Value, i64),
    ConnectError(Cow<'a, str>),
    BinaryEvent(Cow<'a, str>, BinaryPacket, Option<i64>),
    BinaryAck(BinaryPacket, i64),
}

impl<'a> PacketData<'a> {
    fn index(&self) -> char {
        match self {
            PacketData::Connect(_) => '0',
            PacketData::Disconnect => '1',
            PacketData::Event(_, _, _) => '2',
            PacketData::EventAck(_, _) => '3',
            PacketData::ConnectError(_) => '4',
            PacketData::BinaryEvent(_, _, _) => '5',
            PacketData::BinaryAck(_, _) => '6',
        }
    }

    /// Set the ack id, on the packet types that carry one.
    pub fn set_ack_id(&mut self, ack_id: i64) {
        if let PacketData::Event(_, _, ack) | PacketData::BinaryEvent(_, _, ack) = self {
            *ack = Some(ack_id)
        }
    }

    /// The ack id carried by this packet, if any.
    pub(crate) fn ack_id(&self) -> Option<i64> {
        match self {
            PacketData::Event(_, _, ack) | PacketData::BinaryEvent(_, _, ack) => *ack,
            PacketData::EventAck(_, ack) | PacketData::BinaryAck(_, ack) => Some(*ack),
            _ => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            PacketData::BinaryEvent(_, _, _) | PacketData::BinaryAck(_, _)
        )
    }

    /// Number of binary frames that follow the primary frame.
    pub(crate) fn payload_count(&self) -> usize {
        match self {
            PacketData::BinaryEvent(_, bin, _) | PacketData::BinaryAck(bin, _) => bin.payload_count,
            _ => 0,
        }
    }

    fn into_static(self) -> PacketData<'static> {
        match self {
            PacketData::Connect(data) => PacketData::Connect(data),
            PacketData::Disconnect => PacketData::Disconnect,
            PacketData::Event(e, data, ack) => {
                PacketData::Event(Cow::Owned(e.into_owned()), data, ack)
            }
            PacketData::EventAck(data, ack) => PacketData::EventAck(data, ack),
            PacketData::ConnectError(message) => {
                PacketData::ConnectError(Cow::Owned(message.into_owned()))
            }
            PacketData::BinaryEvent(e, bin, ack) => {
                PacketData::BinaryEvent(Cow::Owned(e.into_owned()), bin, ack)
            }
            PacketData::BinaryAck(bin, ack) => PacketData::BinaryAck(bin, ack),
        }
    }
}

/// The reassembly state of a packet with binary attachments.
///
/// `data` keeps the placeholder markers exactly where the wire put them, so
/// an encode of a decoded packet reproduces the original frame. The raw
/// frames accumulate in `bin` in placeholder-index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPacket {
    pub data: Value,
    pub bin: Vec<Vec<u8>>,
    pub(crate) payload_count: usize,
}

impl BinaryPacket {
    /// Build the reassembly state for a decoded primary frame: counts the
    /// placeholder markers in a depth-first walk of the payload tree.
    pub fn incoming(data: Value) -> Self {
        let payload_count = count_placeholders(&data);
        Self {
            data,
            bin: Vec::new(),
            payload_count,
        }
    }

    /// Build an outgoing packet: the binary payloads are appended to the
    /// argument array as placeholder markers.
    pub fn outgoing(data: Value, bin: Vec<Vec<u8>>) -> Self {
        let mut data = match data {
            Value::Array(v) => Value::Array(v),
            d => Value::Array(vec![d]),
        };
        let payload_count = bin.len();
        (0..payload_count).for_each(|i| {
            data.as_array_mut().unwrap().push(json!({
                "_placeholder": true,
                "num": i
            }))
        });
        Self {
            data,
            bin,
            payload_count,
        }
    }

    pub fn add_payload(&mut self, payload: Vec<u8>) {
        self.bin.push(payload);
    }

    pub fn is_complete(&self) -> bool {
        self.payload_count == self.bin.len()
    }

    /// Split into dispatch arguments: the payload with its top-level
    /// placeholder entries removed, and the binary payloads.
    pub(crate) fn split_args(self) -> (Value, Vec<Vec<u8>>) {
        let data = match self.data {
            Value::Array(v) => {
                Value::Array(v.into_iter().filter(|v| !is_placeholder(v)).collect())
            }
            v if is_placeholder(&v) => Value::Array(vec![]),
            v => v,
        };
        (data, self.bin)
    }
}

fn is_placeholder(v: &Value) -> bool {
    v.as_object()
        .and_then(|o| o.get("_placeholder"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn count_placeholders(v: &Value) -> usize {
    match v {
        Value::Array(arr) => arr.iter().map(count_placeholders).sum(),
        Value::Object(_) if is_placeholder(v) => 1,
        Value::Object(obj) => obj.values().map(count_placeholders).sum(),
        _ => 0,
    }
}

impl TryFrom<Packet<'_>> for String {
    type Error = serde_json::Error;

    fn try_from(mut packet: Packet<'_>) -> Result<Self, Self::Error> {
        use PacketData::*;

        // Pre-serialize the payload so the output buffer can be allocated in
        // one go.
        let data = match &mut packet.inner {
            Event(e, data, _) | BinaryEvent(e, BinaryPacket { data, .. }, _) => {
                // Expand the event payload to ["<event>", ...args]
                let payload = match data {
                    Value::Array(ref mut v) if !v.is_empty() => {
                        v.insert(0, Value::String(e.to_string()));
                        serde_json::to_string(&v)
                    }
                    Value::Array(_) => serde_json::to_string::<(_, [(); 0])>(&(e, [])),
                    _ => serde_json::to_string(&(e, data)),
                }?;
                Some(payload)
            }
            EventAck(data, _) | BinaryAck(BinaryPacket { data, .. }, _) => {
                // Ack payloads are always an array
                let payload = match data {
                    Value::Array(_) => serde_json::to_string(&data),
                    Value::Null => Ok("[]".to_string()),
                    _ => serde_json::to_string(&[data]),
                }?;
                Some(payload)
            }
            _ => None,
        };

        let capacity = packet.get_size_hint() + data.as_ref().map(|d| d.len()).unwrap_or(0);
        let mut res = String::with_capacity(capacity);
        res.push(packet.inner.index());

        // The namespace goes right after the type digit, except for binary
        // packets where the attachment count comes first.
        let push_nsp = |res: &mut String| {
            if !packet.ns.is_empty() && packet.ns != "/" {
                res.push_str(&packet.ns);
                res.push(',');
            }
        };

        if !packet.inner.is_binary() {
            push_nsp(&mut res);
        }

        match packet.inner {
            Connect(Some(data)) => res.push_str(&data),
            Connect(None) | Disconnect => (),
            Event(_, _, ack) => {
                if let Some(ack) = ack {
                    res.push_str(&ack.to_string());
                }
                res.push_str(&data.unwrap())
            }
            EventAck(_, ack) => {
                res.push_str(&ack.to_string());
                res.push_str(&data.unwrap())
            }
            ConnectError(message) => {
                res.push_str(&serde_json::to_string(&json!({ "message": message }))?)
            }
            BinaryEvent(_, bin, ack) => {
                res.push_str(&bin.payload_count.to_string());
                res.push('-');
                push_nsp(&mut res);
                if let Some(ack) = ack {
                    res.push_str(&ack.to_string());
                }
                res.push_str(&data.unwrap())
            }
            BinaryAck(bin, ack) => {
                res.push_str(&bin.payload_count.to_string());
                res.push('-');
                push_nsp(&mut res);
                res.push_str(&ack.to_string());
                res.push_str(&data.unwrap())
            }
        };
        Ok(res)
    }
}

/// Deserialize an event payload `["<event>", ...args]`.
fn deserialize_event_packet(data: &str) -> Result<(String, Value), Error> {
    let packet = match serde_json::from_str::<Value>(data)? {
        Value::Array(packet) => packet,
        _ => return Err(Error::InvalidEventName),
    };

    let event = packet
        .first()
        .ok_or(Error::InvalidEventName)?
        .as_str()
        .ok_or(Error::InvalidEventName)?
        .to_string();
    let payload = Value::from_iter(packet.into_iter().skip(1));
    Ok((event, payload))
}

fn deserialize_packet<T: serde::de::DeserializeOwned>(
    data: &str,
) -> Result<Option<T>, serde_json::Error> {
    let packet = if data.is_empty() {
        None
    } else {
        Some(serde_json::from_str(data)?)
    };
    Ok(packet)
}

/// Deserialize a packet from its primary frame:
/// ```text
/// <type>[<attachment count>-][<namespace>,][<ack id>][JSON payload]
/// ```
/// Binary attachments arrive as separate frames afterwards.
impl TryFrom<String> for Packet<'_> {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        // Separators are all ASCII so the packet can be walked bytewise.
        let chars = value.as_bytes();
        let mut i = 1;
        let index = *chars.first().ok_or(Error::InvalidPacketType)?;
        if !(b'0'..=b'6').contains(&index) {
            return Err(Error::InvalidPacketType);
        }

        // Skip the attachment count of binary packets; it is re-derived from
        // the payload placeholders.
        if index == b'5' || index == b'6' {
            while i < chars.len() && chars.get(i) != Some(&b'-') {
                i += 1;
            }
            if chars.get(i) != Some(&b'-') {
                return Err(Error::InvalidPacketType);
            }
            i += 1;
        }

        let start_index = i;
        // A custom namespace starts with a slash
        let ns = if chars.get(i) == Some(&b'/') {
            loop {
                match chars.get(i) {
                    Some(b',') => {
                        i += 1;
                        break Cow::Owned(value[start_index..i - 1].to_string());
                    }
                    // Some clients drop the trailing comma when the
                    // namespace ends the packet, e.g. `1/custom`
                    None => break Cow::Owned(value[start_index..i].to_string()),
                    Some(_) => i += 1,
                }
            }
        } else {
            Cow::Borrowed("/")
        };

        let start_index = i;
        let ack: Option<i64> = loop {
            match chars.get(i) {
                Some(c) if c.is_ascii_digit() => i += 1,
                Some(b'[' | b'{') if i > start_index => break value[start_index..i].parse().ok(),
                _ => break None,
            }
        };

        let data = &value[i..];
        let inner = match index {
            b'0' => PacketData::Connect((!data.is_empty()).then(|| data.to_string())),
            b'1' => PacketData::Disconnect,
            b'2' => {
                let (event, payload) = deserialize_event_packet(data)?;
                PacketData::Event(event.into(), payload, ack)
            }
            b'3' => {
                let packet = deserialize_packet(data)?.ok_or(Error::InvalidPacketType)?;
                PacketData::EventAck(packet, ack.ok_or(Error::InvalidPacketType)?)
            }
            b'4' => {
                let message = deserialize_packet::<Value>(data)?
                    .as_ref()
                    .and_then(|v| v.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| data.to_string());
                PacketData::ConnectError(message.into())
            }
            b'5' => {
                let (event, payload) = deserialize_event_packet(data)?;
                PacketData::BinaryEvent(event.into(), BinaryPacket::incoming(payload), ack)
            }
            b'6' => {
                let packet = deserialize_packet(data)?.ok_or(Error::InvalidPacketType)?;
                PacketData::BinaryAck(
                    BinaryPacket::incoming(packet),
                    ack.ok_or(Error::InvalidPacketType)?,
                )
            }
            _ => return Err(Error::InvalidPacketType),
        };

        Ok(Self { inner, ns })
    }
}

/// The payload of the CONNECT reply. `pid` is only present when the adapter
/// supports connection-state recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectPacket {
    pub sid: Sid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<Sid>,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn packet_decode_connect() {
        let sid = Sid::new();
        let payload = format!("0{}", json!({ "sid": sid }));
        let packet = Packet::try_from(payload).unwrap();
        assert_eq!(Packet::connect("/", sid, None), packet);

        let payload = format!("0/admin™,{}", json!({ "sid": sid }));
        let packet = Packet::try_from(payload).unwrap();
        assert_eq!(Packet::connect("/admin™", sid, None), packet);
    }

    #[test]
    fn packet_encode_connect() {
        let sid = Sid::new();
        let payload = format!("0{}", json!({ "sid": sid }));
        let packet: String = Packet::connect("/", sid, None).try_into().unwrap();
        assert_eq!(packet, payload);

        let payload = format!("0/admin™,{}", json!({ "sid": sid }));
        let packet: String = Packet::connect("/admin™", sid, None).try_into().unwrap();
        assert_eq!(packet, payload);
    }

    #[test]
    fn packet_connect_with_pid() {
        let sid = Sid::new();
        let pid = Sid::new();
        let packet: String = Packet::connect("/", sid, Some(pid)).try_into().unwrap();
        assert_eq!(packet, format!("0{{\"sid\":\"{sid}\",\"pid\":\"{pid}\"}}"));
    }

    #[test]
    fn packet_decode_disconnect() {
        let packet = Packet::try_from("1".to_string()).unwrap();
        assert_eq!(Packet::disconnect("/"), packet);

        let packet = Packet::try_from("1/admin™,".to_string()).unwrap();
        assert_eq!(Packet::disconnect("/admin™"), packet);

        // without the trailing comma
        let packet = Packet::try_from("1/admin™".to_string()).unwrap();
        assert_eq!(Packet::disconnect("/admin™"), packet);
    }

    #[test]
    fn packet_encode_disconnect() {
        let packet: String = Packet::disconnect("/").try_into().unwrap();
        assert_eq!(packet, "1");

        let packet: String = Packet::disconnect("/admin™").try_into().unwrap();
        assert_eq!(packet, "1/admin™,");
    }

    #[test]
    fn packet_decode_event() {
        let payload = format!("2{}", json!(["event", { "data": "value" }]));
        let packet = Packet::try_from(payload).unwrap();
        assert_eq!(
            Packet::event("/", "event", json!([{ "data": "value" }])),
            packet
        );

        // with ack id
        let payload = format!("21{}", json!(["event", { "data": "value" }]));
        let packet = Packet::try_from(payload).unwrap();
        let mut expected = Packet::event("/", "event", json!([{ "data": "value" }]));
        expected.inner.set_ack_id(1);
        assert_eq!(packet, expected);

        // with namespace
        let payload = format!("2/admin™,{}", json!(["event", { "data": "value™" }]));
        let packet = Packet::try_from(payload).unwrap();
        assert_eq!(
            Packet::event("/admin™", "event", json!([{ "data": "value™" }])),
            packet
        );

        // with ack id and namespace
        let payload = format!("2/admin™,1{}", json!(["event", { "data": "value™" }]));
        let packet = Packet::try_from(payload).unwrap();
        let mut expected = Packet::event("/admin™", "event", json!([{ "data": "value™" }]));
        expected.inner.set_ack_id(1);
        assert_eq!(packet, expected);
    }

    #[test]
    fn packet_encode_event() {
        let payload = format!("2{}", json!(["event", { "data": "value™" }]));
        let packet: String = Packet::event("/", "event", json!({ "data": "value™" }))
            .try_into()
            .unwrap();
        assert_eq!(packet, payload);

        // empty data
        let payload = format!("2{}", json!(["event", []]));
        let packet: String = Packet::event("/", "event", json!([])).try_into().unwrap();
        assert_eq!(packet, payload);

        // with ack id
        let payload = format!("21{}", json!(["event", { "data": "value™" }]));
        let mut packet = Packet::event("/", "event", json!({ "data": "value™" }));
        packet.inner.set_ack_id(1);
        let packet: String = packet.try_into().unwrap();
        assert_eq!(packet, payload);

        // with namespace and ack id
        let payload = format!("2/admin™,1{}", json!(["event", { "data": "value™" }]));
        let mut packet = Packet::event("/admin™", "event", json!([{ "data": "value™" }]));
        packet.inner.set_ack_id(1);
        let packet: String = packet.try_into().unwrap();
        assert_eq!(packet, payload);
    }

    #[test]
    fn packet_decode_event_ack() {
        let packet = Packet::try_from("354[\"data\"]".to_string()).unwrap();
        assert_eq!(Packet::ack("/", json!(["data"]), 54), packet);

        let packet = Packet::try_from("3/admin™,54[\"data\"]".to_string()).unwrap();
        assert_eq!(Packet::ack("/admin™", json!(["data"]), 54), packet);
    }

    #[test]
    fn packet_encode_event_ack() {
        let packet: String = Packet::ack("/", json!("data"), 54).try_into().unwrap();
        assert_eq!(packet, "354[\"data\"]");

        let packet: String = Packet::ack("/admin™", json!("data"), 54)
            .try_into()
            .unwrap();
        assert_eq!(packet, "3/admin™,54[\"data\"]");
    }

    #[test]
    fn packet_encode_connect_error() {
        let payload = format!("4{}", json!({ "message": "Invalid namespace" }));
        let packet: String = Packet::invalid_namespace("/").try_into().unwrap();
        assert_eq!(packet, payload);

        let payload = format!("4/admin™,{}", json!({ "message": "Invalid namespace" }));
        let packet: String = Packet::invalid_namespace("/admin™").try_into().unwrap();
        assert_eq!(packet, payload);

        // an arbitrary middleware message
        let payload = format!("4{}", json!({ "message": "nope" }));
        let packet: String = Packet::connect_error("/", "nope").try_into().unwrap();
        assert_eq!(packet, payload);
    }

    #[test]
    fn packet_decode_connect_error() {
        let payload = format!("4{}", json!({ "message": "Invalid namespace" }));
        let packet = Packet::try_from(payload).unwrap();
        assert_eq!(Packet::invalid_namespace("/"), packet);
    }

    #[test]
    fn packet_encode_binary_event() {
        let json = json!(["event", { "data": "value™" }, { "_placeholder": true, "num": 0 }]);

        let payload = format!("51-{json}");
        let packet: String =
            Packet::bin_event("/", "event", json!({ "data": "value™" }), vec![vec![1]])
                .try_into()
                .unwrap();
        assert_eq!(packet, payload);

        // with ack id
        let payload = format!("51-254{json}");
        let mut packet = Packet::bin_event("/", "event", json!({ "data": "value™" }), vec![vec![1]]);
        packet.inner.set_ack_id(254);
        let packet: String = packet.try_into().unwrap();
        assert_eq!(packet, payload);

        // with namespace
        let payload = format!("51-/admin™,{json}");
        let packet: String = Packet::bin_event(
            "/admin™",
            "event",
            json!([{ "data": "value™" }]),
            vec![vec![1]],
        )
        .try_into()
        .unwrap();
        assert_eq!(packet, payload);
    }

    #[test]
    fn packet_decode_binary_event() {
        let json = json!(["event", { "data": "value™" }, { "_placeholder": true, "num": 0 }]);
        let payload = format!("51-{json}");
        let mut packet = Packet::try_from(payload).unwrap();

        match packet.inner {
            PacketData::BinaryEvent(ref e, ref mut bin, ack) => {
                assert_eq!(e, "event");
                assert_eq!(ack, None);
                assert_eq!(bin.payload_count, 1);
                assert!(!bin.is_complete());
                bin.add_payload(vec![1]);
                assert!(bin.is_complete());
            }
            _ => panic!("expected a binary event"),
        }

        // the literal wire bytes of the protocol scenario
        let payload = "451-/foo,[\"image\",{\"_placeholder\":true,\"num\":0}]";
        let packet = Packet::try_from(payload[1..].to_string()).unwrap();
        assert_eq!(packet.ns, "/foo");
        match packet.inner {
            PacketData::BinaryEvent(ref e, ref bin, _) => {
                assert_eq!(e, "image");
                assert_eq!(bin.payload_count, 1);
            }
            _ => panic!("expected a binary event"),
        }
    }

    #[test]
    fn packet_decode_binary_ack() {
        let json = json!([{ "data": "value™" }, { "_placeholder": true, "num": 0 }]);
        let payload = format!("61-54{json}");
        let mut packet = Packet::try_from(payload).unwrap();

        match packet.inner {
            PacketData::BinaryAck(ref mut bin, ack) => {
                assert_eq!(ack, 54);
                assert_eq!(bin.payload_count, 1);
                bin.add_payload(vec![1]);
                assert!(bin.is_complete());
            }
            _ => panic!("expected a binary ack"),
        }
    }

    #[test]
    fn binary_roundtrip_preserves_nested_placeholders() {
        let data = json!(["file", { "meta": { "thumb": { "_placeholder": true, "num": 0 } } }, { "_placeholder": true, "num": 1 }]);
        let payload = format!("52-{data}");
        let packet = Packet::try_from(payload.clone()).unwrap();
        assert_eq!(packet.inner.payload_count(), 2);
        let encoded: String = packet.try_into().unwrap();
        assert_eq!(encoded, payload);
    }

    #[test]
    fn split_args_strips_top_level_placeholders() {
        let data = json!([{ "data": 1 }, { "_placeholder": true, "num": 0 }]);
        let mut bin = BinaryPacket::incoming(data);
        bin.add_payload(vec![0xde, 0xad]);
        let (args, bins) = bin.split_args();
        assert_eq!(args, json!([{ "data": 1 }]));
        assert_eq!(bins, vec![vec![0xde, 0xad]]);
    }

    #[test]
    fn packet_rejects_garbage() {
        assert!(Packet::try_from("7".to_string()).is_err());
        assert!(Packet::try_from(String::new()).is_err());
        assert!(Packet::try_from("2not-json".to_string()).is_err());
        assert!(Packet::try_from("5-".to_string()).is_err());
        assert!(Packet::try_from("3".to_string()).is_err());
    }
}
