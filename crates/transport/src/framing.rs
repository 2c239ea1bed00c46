use std::{fmt, str::FromStr};

use {
    bytes::BytesMut,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::io::{AsyncRead, AsyncWrite},
    tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite},
};

use crate::{
    codec::{Inbound, JsonLinesCodec, LengthPrefixedCodec},
    error::{Error, Result},
};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Which framing the client-facing stream uses. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Newline-delimited JSON, the MCP stdio framing.
    #[default]
    JsonLines,
    /// 4-byte little-endian length prefix, kept for native-messaging hosts.
    LengthPrefixed,
}

impl Framing {
    pub const ALL: &'static [Framing] = &[Self::JsonLines, Self::LengthPrefixed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonLines => "json-lines",
            Self::LengthPrefixed => "length-prefixed",
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json-lines" | "jsonl" | "lines" | "newline" => Ok(Self::JsonLines),
            "length-prefixed" | "binary" | "native" => Ok(Self::LengthPrefixed),
            other => Err(Error::Message(format!(
                "unknown framing '{other}' (expected json-lines or length-prefixed)"
            ))),
        }
    }
}

/// Encoder/decoder strategy for the client stream.
#[derive(Debug, Clone)]
pub enum ClientCodec {
    JsonLines(JsonLinesCodec),
    LengthPrefixed(LengthPrefixedCodec),
}

impl ClientCodec {
    pub fn new(framing: Framing, max_frame_bytes: usize) -> Self {
        match framing {
            Framing::JsonLines => Self::JsonLines(JsonLinesCodec::new(max_frame_bytes)),
            Framing::LengthPrefixed => {
                Self::LengthPrefixed(LengthPrefixedCodec::new(max_frame_bytes))
            },
        }
    }

    pub fn framing(&self) -> Framing {
        match self {
            Self::JsonLines(_) => Framing::JsonLines,
            Self::LengthPrefixed(_) => Framing::LengthPrefixed,
        }
    }
}

impl Decoder for ClientCodec {
    type Error = Error;
    type Item = Inbound;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        match self {
            Self::JsonLines(c) => c.decode(src),
            Self::LengthPrefixed(c) => c.decode(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        match self {
            Self::JsonLines(c) => c.decode_eof(src),
            Self::LengthPrefixed(c) => c.decode_eof(src),
        }
    }
}

impl Encoder<Value> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        match self {
            Self::JsonLines(c) => c.encode(item, dst),
            Self::LengthPrefixed(c) => c.encode(item, dst),
        }
    }
}

pub type ClientReader<R> = FramedRead<R, ClientCodec>;
pub type ClientWriter<W> = FramedWrite<W, ClientCodec>;

/// Frame an arbitrary reader/writer pair with the chosen discipline.
pub fn split<R, W>(
    reader: R,
    writer: W,
    framing: Framing,
    max_frame_bytes: usize,
) -> (ClientReader<R>, ClientWriter<W>)
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let codec = ClientCodec::new(framing, max_frame_bytes);
    (
        FramedRead::new(reader, codec.clone()),
        FramedWrite::new(writer, codec),
    )
}

/// Frame the process stdin/stdout.
pub fn stdio(
    framing: Framing,
    max_frame_bytes: usize,
) -> (ClientReader<tokio::io::Stdin>, ClientWriter<tokio::io::Stdout>) {
    split(tokio::io::stdin(), tokio::io::stdout(), framing, max_frame_bytes)
}
