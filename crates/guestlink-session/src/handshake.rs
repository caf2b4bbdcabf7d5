use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use guestlink_frame::channel::HELLO;
use guestlink_frame::{classify, Frame, KeyClass, SessionCodec, MAX_PAYLOAD, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{Result, SessionError};

/// Build the HELLO frame announcing `identity`.
///
/// Identities longer than one frame are truncated.
pub fn hello_frame(identity: &str) -> Frame {
    let bytes = identity.as_bytes();
    let payload = Bytes::copy_from_slice(&bytes[..bytes.len().min(MAX_PAYLOAD)]);
    Frame {
        key: HELLO,
        version: PROTOCOL_VERSION,
        flags: 0,
        payload,
    }
}

/// Exchange HELLO frames with the peer.
///
/// Both directions run concurrently so neither side waits on the other to
/// speak first. Returns the peer's identity.
pub async fn exchange_hello<R, W>(
    reader: &mut FramedRead<R, SessionCodec>,
    writer: &mut FramedWrite<W, SessionCodec>,
    identity: &str,
    timeout: Duration,
) -> Result<String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let exchange = async {
        let (sent, received) = tokio::join!(writer.send(hello_frame(identity)), read_hello(reader));
        sent?;
        received
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| SessionError::Timeout(timeout))?
}

async fn read_hello<R>(reader: &mut FramedRead<R, SessionCodec>) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match reader.next().await {
            Some(frame) => frame?,
            None => {
                return Err(SessionError::HandshakeFailed(
                    "connection closed before HELLO".to_string(),
                ))
            }
        };

        match classify(frame.key) {
            // Leftover alignment beacons land here.
            KeyClass::Reserved => continue,
            KeyClass::Control(HELLO) => {
                if frame.version != PROTOCOL_VERSION {
                    return Err(SessionError::HandshakeFailed(format!(
                        "protocol version {} not supported (expected {PROTOCOL_VERSION})",
                        frame.version
                    )));
                }
                return Ok(String::from_utf8_lossy(&frame.payload).into_owned());
            }
            _ => {
                return Err(SessionError::HandshakeFailed(format!(
                    "expected HELLO, got key {}",
                    frame.key
                )))
            }
        }
    }
}
