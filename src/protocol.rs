use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::message::Message;
use crate::result::{LdapConnectionError, Result};

use bytes::BytesMut;
use futures_util::SinkExt;
use lber::Parser;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tokio_stream::StreamExt;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

/// Direction of a traced message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        })
    }
}

/// Observer of framed messages.
///
/// A sink sees every message the codec encodes or decodes, together with
/// its exact wire octets. It can't influence framing.
pub trait MessageTrace: Send + Sync {
    fn record(&self, direction: Direction, msg: &Message, raw: &[u8]);
}

/// Trace sink writing hex dumps to the `log` facade at trace level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTrace;

impl MessageTrace for LogTrace {
    fn record(&self, direction: Direction, msg: &Message, raw: &[u8]) {
        trace!(
            "{} message id {} ({}, {} octets): {}",
            direction,
            msg.id,
            msg.op.name(),
            raw.len(),
            hex(raw)
        );
    }
}

fn hex(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() * 3);
    for (i, b) in raw.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Trace sink retaining the raw octets of the last message in each direction.
#[derive(Debug, Default)]
pub struct LastMessageTrace {
    sent: Mutex<Option<Vec<u8>>>,
    received: Mutex<Option<Vec<u8>>>,
}

impl LastMessageTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.sent.lock().ok().and_then(|last| last.clone())
    }

    pub fn last_received(&self) -> Option<Vec<u8>> {
        self.received.lock().ok().and_then(|last| last.clone())
    }
}

impl MessageTrace for LastMessageTrace {
    fn record(&self, direction: Direction, _msg: &Message, raw: &[u8]) {
        let slot = match direction {
            Direction::Sent => &self.sent,
            Direction::Received => &self.received,
        };
        if let Ok(mut last) = slot.lock() {
            *last = Some(raw.to_vec());
        }
    }
}

/// Codec turning a byte stream into [`Message`]s and back.
#[derive(Clone)]
pub struct LdapCodec {
    parser: Parser,
    trace: Option<Arc<dyn MessageTrace>>,
}

impl LdapCodec {
    pub fn new(max_message_len: usize) -> Self {
        LdapCodec {
            parser: Parser::with_limit(max_message_len),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Option<Arc<dyn MessageTrace>>) -> Self {
        self.trace = trace;
        self
    }
}

impl Default for LdapCodec {
    fn default() -> Self {
        LdapCodec {
            parser: Parser::new(),
            trace: None,
        }
    }
}

impl fmt::Debug for LdapCodec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LdapCodec")
            .field("max_len", &self.parser.max_len())
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

impl Decoder for LdapCodec {
    type Item = Message;
    type Error = LdapConnectionError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        let (tag, used) = match self.parser.parse(&buf[..])? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        let raw = buf.split_to(used);
        let msg = Message::from_structure(tag)?;
        if let Some(ref trace) = self.trace {
            trace.record(Direction::Received, &msg, &raw);
        }
        Ok(Some(msg))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        match self.decode(buf)? {
            Some(msg) => Ok(Some(msg)),
            None if buf.is_empty() => Ok(None),
            None => Err(LdapConnectionError::server_down(format!(
                "connection closed in the middle of a message, {} octets pending",
                buf.len()
            ))),
        }
    }
}

impl Encoder<Message> for LdapCodec {
    type Error = LdapConnectionError;

    fn encode(&mut self, msg: Message, into: &mut BytesMut) -> Result<()> {
        let start = into.len();
        match self.trace {
            Some(ref trace) => {
                let copy = msg.clone();
                msg.encode(into);
                trace.record(Direction::Sent, &copy, &into[start..]);
            }
            None => msg.encode(into),
        }
        Ok(())
    }
}

/// Reading half of the framer.
#[derive(Debug)]
pub struct MessageReader<R> {
    frames: FramedRead<R, LdapCodec>,
    timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R, codec: LdapCodec) -> Self {
        MessageReader {
            frames: FramedRead::new(inner, codec),
            timeout: None,
        }
    }

    /// Bound the wait for each subsequent message. `None` waits indefinitely.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Read the next message.
    ///
    /// `Ok(None)` means the peer closed the stream cleanly, between messages.
    /// A stream cut in the middle of a message is an error.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        let next = match self.timeout {
            Some(limit) => time::timeout(limit, self.frames.next())
                .await
                .map_err(|_| LdapConnectionError::timeout(format!("no message within {:?}", limit)))?,
            None => self.frames.next().await,
        };
        next.transpose()
    }

    /// Number of octets read from the stream but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.frames.read_buffer().len()
    }

    pub fn into_inner(self) -> R {
        self.frames.into_inner()
    }
}

/// Writing half of the framer.
#[derive(Debug)]
pub struct MessageWriter<W> {
    frames: FramedWrite<W, LdapCodec>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W, codec: LdapCodec) -> Self {
        MessageWriter {
            frames: FramedWrite::new(inner, codec),
        }
    }

    /// Encode and flush one message.
    pub async fn write_message(&mut self, msg: Message) -> Result<()> {
        self.frames.send(msg).await
    }

    /// Flush pending output and shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.frames.close().await
    }

    pub fn into_inner(self) -> W {
        self.frames.into_inner()
    }
}
