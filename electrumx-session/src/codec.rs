//! The wire framing: newline-delimited UTF-8 JSON-RPC. Decoding
//! is exactly `tokio_util::codec::LinesCodec`'s job; encoding additionally
//! pads each outgoing payload's trailing whitespace so the wire packet is
//! rounded up to the next power of two (or half that, per the spec's
//! waste-minimizing rule), matching the transport-padding behavior a
//! WebSocket/TLS front end is allowed to apply.
//!
//! Modeled on `zebra_network::protocol::external::Codec`, a
//! `tokio_util::codec::{Decoder, Encoder}` pair over `BytesMut`, adapted from
//! a fixed-header binary wire format to a line-delimited text one.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Lines longer than this are a protocol violation (a client trying to
/// exhaust memory with an unterminated line), not a parse error to retry.
const MAX_LINE_LEN: usize = 1_000_000;

#[derive(Error, Debug)]
pub enum LineCodecError {
    #[error("line exceeds maximum length of {MAX_LINE_LEN} bytes")]
    TooLong,
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decodes newline-delimited UTF-8 lines; encodes a line plus the minimal
/// power-of-two padding a transport is allowed to add.
#[derive(Default)]
pub struct JsonRpcLineCodec {
    pending_queue_len_hint: usize,
}

impl JsonRpcLineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the encoder defer rounding a short packet up when more messages
    /// are already queued behind it (the "defers a suffix of queued
    /// messages" clause): callers set this before encoding the
    /// last message of a batch flush.
    pub fn set_pending_queue_len_hint(&mut self, n: usize) {
        self.pending_queue_len_hint = n;
    }
}

impl Decoder for JsonRpcLineCodec {
    type Item = String;
    type Error = LineCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, LineCodecError> {
        let newline_pos = src.iter().position(|&b| b == b'\n');
        match newline_pos {
            Some(pos) => {
                if pos > MAX_LINE_LEN {
                    src.clear();
                    return Err(LineCodecError::TooLong);
                }
                let line = src.split_to(pos + 1);
                let line = &line[..line.len() - 1];
                let line = if line.last() == Some(&b'\r') {
                    &line[..line.len() - 1]
                } else {
                    line
                };
                let text =
                    std::str::from_utf8(line).map_err(|_| LineCodecError::InvalidUtf8)?;
                Ok(Some(text.to_owned()))
            }
            None if src.len() > MAX_LINE_LEN => Err(LineCodecError::TooLong),
            None => Ok(None),
        }
    }
}

impl Encoder<String> for JsonRpcLineCodec {
    type Error = LineCodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), LineCodecError> {
        let padded_len = padded_frame_len(line.len() + 1, self.pending_queue_len_hint);
        dst.reserve(padded_len);
        dst.put_slice(line.as_bytes());
        let pad = padded_len.saturating_sub(line.len() + 1);
        for _ in 0..pad {
            dst.put_u8(b' ');
        }
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// The next power of two at or above `min_len`, rounded down to half of that
/// when padding up would waste more bytes than padding down while a
/// non-empty queue means the waste will be amortized over a later flush
/// anyway (the "round to 1024 bytes, or to half that" rule).
fn padded_frame_len(min_len: usize, pending_queue_len_hint: usize) -> usize {
    const FLOOR: usize = 1024;
    if min_len <= FLOOR {
        return FLOOR;
    }
    let upper = min_len.next_power_of_two();
    let lower = upper / 2;
    if pending_queue_len_hint > 0 && lower >= min_len.saturating_sub(lower) {
        lower.max(min_len)
    } else {
        upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_one_line_at_a_time() {
        let mut codec = JsonRpcLineCodec::new();
        let mut buf = BytesMut::from("{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn strips_trailing_carriage_return() {
        let mut codec = JsonRpcLineCodec::new();
        let mut buf = BytesMut::from("{\"a\":1}\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn encoded_frame_is_rounded_up_to_a_power_of_two() {
        let mut codec = JsonRpcLineCodec::new();
        let mut buf = BytesMut::new();
        let payload = "x".repeat(100);
        codec.encode(payload, &mut buf).unwrap();
        assert_eq!(buf.len(), 1024);
        assert_eq!(buf[buf.len() - 1], b'\n');
    }

    #[test]
    fn short_payloads_floor_at_1024() {
        let mut codec = JsonRpcLineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("{}".to_string(), &mut buf).unwrap();
        assert_eq!(buf.len(), 1024);
    }
}
