use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::conn::ConnType;
use crate::controls::RawControl;
use crate::exop::{Exop, WhoAmI, WhoAmIResp};
use crate::exop_impl::NoticeOfDisconnection;
use crate::message::{BindRequest, BindResponse, ExtendedResponse, Message, ProtocolOp};
use crate::protocol::{LdapCodec, MessageReader, MessageWriter};
use crate::result::{ErrorKind, LdapConnectionError, Result, ResultCode};
use crate::RequestId;

use tokio::io::{self, ReadHalf, WriteHalf};

/// Shared message ID counter.
///
/// IDs start at 1 and are handed out with get-and-increment semantics. Clones
/// share the same counter, so one counter can span the StartTLS exchange, the
/// bind, and whatever the caller sends afterwards. The counter never wraps:
/// once the 31-bit ID space is used up, every further request fails.
#[derive(Clone, Debug)]
pub struct MessageIdCounter(Arc<AtomicI32>);

impl MessageIdCounter {
    pub fn new() -> Self {
        MessageIdCounter(Arc::new(AtomicI32::new(1)))
    }

    /// Take the next message ID.
    pub fn next(&self) -> Result<RequestId> {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| {
                LdapConnectionError::new(
                    ErrorKind::State,
                    ResultCode::LOCAL_ERROR,
                    "message ID space exhausted",
                )
            })
    }

    /// The ID the next request will get.
    pub fn current(&self) -> RequestId {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for MessageIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Request/response exchange over one established stream.
///
/// The handle writes a request, then reads until the response with the same
/// message ID arrives. There is no multiplexing: a response with any other ID
/// is an error, apart from an unsolicited notice of disconnection, which is
/// turned into an error of its own.
///
/// Controls for the next request are attached by calling
/// [`with_controls()`](#method.with_controls) on the handle first.
#[derive(Debug)]
pub struct Ldap {
    reader: MessageReader<ReadHalf<ConnType>>,
    writer: MessageWriter<WriteHalf<ConnType>>,
    codec: LdapCodec,
    ids: MessageIdCounter,
    controls: Option<Vec<RawControl>>,
}

impl Ldap {
    pub(crate) fn new(stream: ConnType, codec: LdapCodec, ids: MessageIdCounter) -> Ldap {
        let (rd, wr) = io::split(stream);
        Ldap {
            reader: MessageReader::new(rd, codec.clone()),
            writer: MessageWriter::new(wr, codec.clone()),
            codec,
            ids,
            controls: None,
        }
    }

    /// Retire the framers and give back the stream. Fails if the peer sent
    /// anything beyond the last message read, since those octets would be
    /// lost with the framer.
    pub(crate) fn into_stream(self) -> Result<(ConnType, LdapCodec, MessageIdCounter)> {
        if self.reader.buffered() != 0 {
            return Err(LdapConnectionError::unexpected(format!(
                "{} unexpected octets after the last response",
                self.reader.buffered()
            )));
        }
        let stream = self.reader.into_inner().unsplit(self.writer.into_inner());
        Ok((stream, self.codec, self.ids))
    }

    /// Bound the wait for every subsequent response. `None` waits indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.reader.set_timeout(timeout);
    }

    /// Use the provided controls on the next request.
    pub fn with_controls(&mut self, ctrls: Vec<RawControl>) -> &mut Self {
        self.controls = Some(ctrls);
        self
    }

    /// Send a message as is, with the caller's message ID.
    pub async fn write_message(&mut self, msg: Message) -> Result<()> {
        self.writer.write_message(msg).await
    }

    /// Read the next message. `None` means the server closed the connection.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        self.reader.read_message().await
    }

    /// Send `op` with the next message ID and read its response.
    pub async fn op_call(&mut self, op: ProtocolOp) -> Result<Message> {
        let id = self.ids.next()?;
        let request = op.name();
        let msg = Message::new(id, op).with_controls(self.controls.take().unwrap_or_default());
        self.writer.write_message(msg).await?;
        let resp = match self.reader.read_message().await? {
            Some(resp) => resp,
            None => {
                return Err(LdapConnectionError::server_down(format!(
                    "connection closed while waiting for the response to {} (message ID {})",
                    request, id
                )))
            }
        };
        if let Some(notice) = NoticeOfDisconnection::matches(&resp) {
            let message = "the server sent a notice of disconnection";
            return Err(match notice.result.rc {
                0 => LdapConnectionError::server_down(message),
                _ => LdapConnectionError::from_result(ErrorKind::ServerDisconnect, message, &notice.result),
            });
        }
        if resp.id != id {
            return Err(LdapConnectionError::unexpected(format!(
                "response for message ID {} while waiting for {}",
                resp.id, id
            )));
        }
        Ok(resp)
    }

    /// Send a bind request and read the bind response. The response
    /// controls are moved into the result.
    pub async fn bind(&mut self, req: BindRequest) -> Result<BindResponse> {
        let resp = self.op_call(ProtocolOp::BindRequest(req)).await?;
        match resp.op {
            ProtocolOp::BindResponse(mut bind) => {
                bind.result.ctrls = resp.controls;
                Ok(bind)
            }
            op => Err(LdapConnectionError::unexpected(format!(
                "expected a bind response, got {}",
                op.name()
            ))),
        }
    }

    /// Perform an Extended operation given by `exop`. The response controls
    /// are moved into the result.
    pub async fn extended<E>(&mut self, exop: E) -> Result<ExtendedResponse>
    where
        E: Into<Exop>,
    {
        let exop: Exop = exop.into();
        let resp = self.op_call(exop.into()).await?;
        match resp.op {
            ProtocolOp::ExtendedResponse(mut ext) => {
                ext.result.ctrls = resp.controls;
                Ok(ext)
            }
            op => Err(LdapConnectionError::unexpected(format!(
                "expected an extended response, got {}",
                op.name()
            ))),
        }
    }

    /// Ask the server for the authorization identity of the connection.
    /// `None` is an anonymous identity.
    pub async fn who_am_i(&mut self) -> Result<Option<String>> {
        let resp = self.extended(WhoAmI).await?;
        let exop = resp.exop();
        resp.result.success()?;
        let parsed: WhoAmIResp = exop.parse()?;
        Ok(parsed.identity().map(str::to_owned))
    }

    /// Shut down the write side of the stream without unbinding.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }
}
