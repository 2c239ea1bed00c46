use {
    bytes::{Buf, BufMut, BytesMut},
    serde_json::Value,
    tokio_util::codec::{Decoder, Encoder},
    tracing::{trace, warn},
};

use crate::error::{Error, Result};

const LENGTH_HEADER_BYTES: usize = 4;

/// One decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Value),
    /// The frame boundary was intact but the payload was not valid JSON.
    /// Only the length-prefixed codec yields this; the caller answers with a
    /// parse error.
    Malformed(String),
}

// ── Length-prefixed ─────────────────────────────────────────────────────────

/// `[u32 little-endian length][UTF-8 JSON payload]`.
#[derive(Debug, Clone)]
pub struct LengthPrefixedCodec {
    max_frame_bytes: usize,
}

impl LengthPrefixedCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Decoder for LengthPrefixedCodec {
    type Error = Error;
    type Item = Inbound;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        if src.len() < LENGTH_HEADER_BYTES {
            return Ok(None);
        }
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_bytes {
            return Err(Error::FrameTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }
        let needed = LENGTH_HEADER_BYTES + len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_HEADER_BYTES);
        let payload = src.split_to(len);
        trace!(len, "length-prefixed frame received");
        match serde_json::from_slice::<Value>(&payload) {
            Ok(value) => Ok(Some(Inbound::Message(value))),
            Err(e) => {
                warn!(len, error = %e, "malformed length-prefixed frame");
                Ok(Some(Inbound::Malformed(e.to_string())))
            },
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    warn!(buffered = src.len(), "discarding truncated frame at end of stream");
                    src.clear();
                }
                Ok(None)
            },
        }
    }
}

impl Encoder<Value> for LengthPrefixedCodec {
    type Error = Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(&item)?;
        let len = payload.len();
        if len > self.max_frame_bytes || u32::try_from(len).is_err() {
            return Err(Error::FrameTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }
        dst.reserve(LENGTH_HEADER_BYTES + len);
        dst.put_u32_le(len as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

// ── Newline-delimited ───────────────────────────────────────────────────────

/// One JSON document per line. Blank lines are ignored and malformed lines
/// are logged and skipped without closing the stream.
#[derive(Debug, Clone)]
pub struct JsonLinesCodec {
    max_frame_bytes: usize,
    /// Bytes already searched for a newline.
    scanned: usize,
}

impl JsonLinesCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            scanned: 0,
        }
    }

    fn parse_line(line: &[u8]) -> Option<Value> {
        let text = match std::str::from_utf8(line) {
            Ok(t) => t.trim(),
            Err(e) => {
                warn!(error = %e, "skipping non-UTF-8 line");
                return None;
            },
        };
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str(text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, line = %text, "skipping malformed JSON line");
                None
            },
        }
    }
}

impl Decoder for JsonLinesCodec {
    type Error = Error;
    type Item = Inbound;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = src.len();
                if src.len() > self.max_frame_bytes {
                    return Err(Error::FrameTooLarge {
                        len: src.len(),
                        max: self.max_frame_bytes,
                    });
                }
                return Ok(None);
            };
            let line = src.split_to(self.scanned + offset + 1);
            self.scanned = 0;
            if let Some(value) = Self::parse_line(&line[..line.len() - 1]) {
                return Ok(Some(Inbound::Message(value)));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        self.scanned = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Self::parse_line(&rest).map(Inbound::Message))
    }
}

impl Encoder<Value> for JsonLinesCodec {
    type Error = Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > self.max_frame_bytes {
            return Err(Error::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_bytes,
            });
        }
        dst.reserve(payload.len() + 1);
        dst.extend_from_slice(&payload);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn encode_lp(value: Value) -> BytesMut {
        let mut buf = BytesMut::new();
        LengthPrefixedCodec::new(1024).encode(value, &mut buf).unwrap();
        buf
    }

    #[test]
    fn length_header_is_little_endian() {
        let buf = encode_lp(json!({"a": 1}));
        let payload = br#"{"a":1}"#;
        assert_eq!(&buf[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&buf[4..], payload);
    }

    #[test]
    fn length_prefixed_survives_byte_by_byte_delivery() {
        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "ping", "params": {"s": "ünï"}});
        let encoded = encode_lp(msg.clone());

        let mut codec = LengthPrefixedCodec::new(1024);
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in encoded.iter() {
            buf.put_u8(*byte);
            if let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }
        assert_eq!(decoded, vec![Inbound::Message(msg)]);
        assert!(buf.is_empty());
    }

    #[test]
    fn length_prefixed_splits_multiple_frames_in_one_read() {
        let mut buf = encode_lp(json!(1));
        buf.extend_from_slice(&encode_lp(json!("two")));
        buf.extend_from_slice(&encode_lp(json!([3]))[..3]);

        let mut codec = LengthPrefixedCodec::new(1024);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::Message(json!(1))));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::Message(json!("two"))));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn length_prefixed_reports_malformed_payload_and_continues() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(3);
        buf.extend_from_slice(b"{x}");
        buf.extend_from_slice(&encode_lp(json!({"ok": true})));

        let mut codec = LengthPrefixedCodec::new(1024);
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(Inbound::Malformed(_))));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Message(json!({"ok": true})))
        );
    }

    #[test]
    fn length_prefixed_rejects_oversized_header() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(5_000);
        let err = LengthPrefixedCodec::new(1024).decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { len: 5_000, max: 1024 }));
    }

    #[test]
    fn length_prefixed_drops_truncated_tail_at_eof() {
        let mut buf = encode_lp(json!({"a": 1}));
        buf.truncate(6);
        let mut codec = LengthPrefixedCodec::new(1024);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn lines_skip_blank_and_malformed() {
        let mut codec = JsonLinesCodec::new(1024);
        let mut buf = BytesMut::from(&b"\n  \n{broken\n{\"id\":1}\r\n{\"id\":"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::Message(json!({"id": 1}))));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"2}\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::Message(json!({"id": 2}))));
    }

    #[test]
    fn lines_flush_unterminated_tail_at_eof() {
        let mut codec = JsonLinesCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"last\":true}"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Inbound::Message(json!({"last": true})))
        );
    }

    #[test]
    fn lines_reject_unbounded_partial_line() {
        let mut codec = JsonLinesCodec::new(8);
        let mut buf = BytesMut::from(&b"{\"abcdefghijkl\""[..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap_err(),
            Error::FrameTooLarge { .. }
        ));
    }

    #[test]
    fn lines_encoding_is_single_line() {
        let mut buf = BytesMut::new();
        JsonLinesCodec::new(1024)
            .encode(json!({"text": "a\nb"}), &mut buf)
            .unwrap();
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(buf.last(), Some(&b'\n'));
    }
}
