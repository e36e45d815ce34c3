use crate::message::{ExtendedResponse, Message, ProtocolOp};

pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

/// Unsolicited notice of disconnection ([RFC 4511, section 4.4.1](https://tools.ietf.org/html/rfc4511#section-4.4.1)).
///
/// Sent by a server with message ID zero just before it closes the connection.
#[derive(Clone, Copy, Debug)]
pub struct NoticeOfDisconnection;

impl NoticeOfDisconnection {
    /// Return the extended response if `msg` is a notice of disconnection.
    ///
    /// Some servers omit the response name from the notice, so any unsolicited
    /// extended response without a name is treated as one too.
    pub fn matches(msg: &Message) -> Option<&ExtendedResponse> {
        if msg.id != 0 {
            return None;
        }
        match msg.op {
            ProtocolOp::ExtendedResponse(ref resp)
                if resp.name.as_deref().map_or(true, |n| n == NOTICE_OF_DISCONNECTION_OID) =>
            {
                Some(resp)
            }
            _ => None,
        }
    }
}
