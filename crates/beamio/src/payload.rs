//! Polling payload framing: packets joined with the `0x1E` record separator.
//!
//! The decoder is streaming: it consumes the request body chunk by chunk and
//! yields packets as soon as their separator is seen, enforcing the
//! `max_payload` budget on the way in. The encoder drains the connection
//! queue into a single payload, leaving any batch that would overflow the
//! budget for the next poll cycle.

use std::time::Duration;

use futures::Stream;
use http_body::Body;
use http_body_util::BodyExt;
use tokio::sync::MutexGuard;

use crate::{errors::Error, packet::Packet, peekable::PeekableReceiver, socket::PacketBuf};

/// The record separator between packets of one polling payload.
pub const PACKET_SEPARATOR: u8 = b'\x1e';

struct DecodeState<B> {
    body: B,
    buffer: Vec<u8>,
    payload_size: u64,
    end_of_stream: bool,
}

fn decode_chunk(chunk: &[u8]) -> Result<Packet, Error> {
    let chunk = std::str::from_utf8(chunk).map_err(|_| Error::InvalidUtf8)?;
    Packet::try_from(chunk)
}

/// Decode a request body into a stream of packets.
pub fn decoder<B>(body: B, max_payload: u64) -> impl Stream<Item = Result<Packet, Error>>
where
    B: Body + Unpin,
    B::Error: std::fmt::Debug,
{
    let state = DecodeState {
        body,
        buffer: Vec::new(),
        payload_size: 0,
        end_of_stream: false,
    };

    futures::stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(i) = memchr::memchr(PACKET_SEPARATOR, &state.buffer) {
                let mut packet: Vec<u8> = state.buffer.drain(..=i).collect();
                packet.pop(); // strip the separator
                return Some((decode_chunk(&packet), state));
            }

            if state.end_of_stream {
                if state.buffer.is_empty() {
                    return None;
                }
                let packet = std::mem::take(&mut state.buffer);
                return Some((decode_chunk(&packet), state));
            }

            match state.body.frame().await.transpose() {
                Ok(Some(frame)) => {
                    if let Ok(mut data) = frame.into_data() {
                        use bytes::Buf;
                        state.payload_size += data.remaining() as u64;
                        if state.payload_size > max_payload {
                            state.end_of_stream = true;
                            state.buffer.clear();
                            return Some((Err(Error::PayloadTooLarge), state));
                        }
                        while data.has_remaining() {
                            let chunk = data.chunk();
                            state.buffer.extend_from_slice(chunk);
                            let len = chunk.len();
                            data.advance(len);
                        }
                    }
                }
                Ok(None) => state.end_of_stream = true,
                Err(_e) => {
                    tracing::debug!("error polling request body: {:?}", _e);
                    state.end_of_stream = true;
                    return Some((Err(Error::Aborted), state));
                }
            }
        }
    })
}

/// Drain the connection queue into one polling payload.
///
/// Blocks up to `poll_timeout` when the queue is empty; on expiry the request
/// is flushed with a noop packet so the client immediately re-polls.
pub async fn encoder(
    mut rx: MutexGuard<'_, PeekableReceiver<PacketBuf>>,
    max_payload: u64,
    poll_timeout: Duration,
) -> Result<String, Error> {
    let mut data = String::new();
    let mut closing = false;

    loop {
        let batch_size: usize = match rx.peek() {
            Some(batch) => batch.iter().map(|p| p.size_hint() + 1).sum(),
            None => break,
        };
        // Always ship at least one batch, otherwise an oversized packet
        // would wedge the queue forever.
        if !data.is_empty() && data.len() + batch_size > max_payload as usize {
            break;
        }
        for packet in rx.try_recv().expect("peeked batch vanished") {
            closing |= packet == Packet::Close;
            push_packet(&mut data, packet)?;
        }
    }

    // Nothing buffered: hold the request open until a packet arrives or the
    // poll window expires.
    if data.is_empty() {
        match tokio::time::timeout(poll_timeout, rx.recv()).await {
            Ok(Some(batch)) => {
                for packet in batch {
                    closing |= packet == Packet::Close;
                    push_packet(&mut data, packet)?;
                }
            }
            Ok(None) => return Err(Error::Aborted),
            Err(_) => push_packet(&mut data, Packet::Noop)?,
        }
    }

    if closing {
        rx.close();
    }
    Ok(data)
}

fn push_packet(data: &mut String, packet: Packet) -> Result<(), Error> {
    let packet: String = packet.try_into()?;
    if !data.is_empty() {
        data.push(PACKET_SEPARATOR as char);
    }
    data.push_str(&packet);
    Ok(())
}

/// Wrap a payload in the JSON-P form `___eio[<j>]("<escaped>");`.
pub fn jsonp_wrap(j: u32, payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + 16);
    out.push_str("___eio[");
    out.push_str(&j.to_string());
    out.push_str("](\"");
    for c in payload.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out.push_str("\");");
    out
}

/// Decode the `d=<payload>` form body used by JSON-P POST requests.
pub fn jsonp_unwrap(body: &[u8]) -> Result<Vec<u8>, Error> {
    let body = body.strip_prefix(b"d=").ok_or(Error::InvalidUtf8)?;
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < body.len() => {
                let hex = std::str::from_utf8(&body[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or(Error::InvalidUtf8)?;
                out.push(hex);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}
