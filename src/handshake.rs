use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use log::{debug, trace};

use crate::auth::{AuthMethod, AuthProvider};
use crate::errors::{Error, Result};
use crate::frame::{self, Frame};
use crate::options::Options;
use crate::proto::{
    self, ConnectionContext, RequestHeader, ResponseHeader, SaslMessage, SaslState,
    CALL_ID_CONNECTION_CONTEXT, CALL_ID_SASL, NO_RETRY,
};

// Connection preamble, sent before anything else:
//
//   'h' 'r' 'p' 'c' | version | service class | auth protocol
//
const MAGIC: &[u8; 4] = b"hrpc";
const SERVICE_CLASS: u8 = 0;

fn hs_io(err: io::Error) -> Error {
    match err.kind() {
        // the handshake deadline rides on the socket read timeout
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
        _ => Error::HandshakeFailed(err.to_string()),
    }
}

fn check_canceled(canceled: &AtomicBool) -> Result<()> {
    if canceled.load(Ordering::SeqCst) {
        Err(Error::Canceled)
    } else {
        Ok(())
    }
}

fn write_frame<S: Write>(stream: &mut S, header: &RequestHeader, body: &[u8]) -> Result<()> {
    let header_bytes = proto::serialize(header)?;
    let mut buf = BytesMut::new();
    frame::encode(&header_bytes, body, &mut buf);
    stream.write_all(&buf).map_err(hs_io)
}

fn read_frame<S: Read>(stream: &mut S, buf: &mut BytesMut) -> Result<Frame> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(frame) =
            frame::decode(buf).map_err(|e| Error::HandshakeFailed(e.to_string()))?
        {
            return Ok(frame);
        }
        let n = stream.read(&mut chunk).map_err(hs_io)?;
        if n == 0 {
            return Err(Error::HandshakeFailed(
                "connection closed during handshake".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn send_sasl<S: Write>(stream: &mut S, client_id: &[u8], msg: &SaslMessage) -> Result<()> {
    let header = RequestHeader {
        call_id: CALL_ID_SASL,
        method_name: String::from("sasl"),
        client_id: client_id.to_vec(),
        retry_count: NO_RETRY,
    };
    write_frame(stream, &header, &proto::serialize(msg)?)
}

// The auth exchange: offer the provider's opening token, then answer
// challenges until the server declares SUCCESS. Payloads stay opaque.
fn negotiate<S: Read + Write>(
    stream: &mut S,
    auth: &dyn AuthProvider,
    client_id: &[u8],
    canceled: &AtomicBool,
) -> Result<()> {
    send_sasl(
        stream,
        client_id,
        &SaslMessage {
            state: SaslState::Negotiate,
            token: auth.initial_token()?,
        },
    )?;

    let mut buf = BytesMut::with_capacity(4096);
    loop {
        check_canceled(canceled)?;
        let frame = read_frame(stream, &mut buf)?;
        let header: ResponseHeader =
            proto::parse(&frame.header).map_err(|e| Error::HandshakeFailed(e.to_string()))?;
        if header.call_id != CALL_ID_SASL {
            return Err(Error::HandshakeFailed(format!(
                "unexpected call id {} during auth exchange",
                header.call_id
            )));
        }
        if let Err(e) = header.check() {
            return Err(Error::AuthFailed(e.to_string()));
        }
        let msg: SaslMessage =
            proto::parse(&frame.body).map_err(|e| Error::HandshakeFailed(e.to_string()))?;
        trace!("auth exchange: server state {:?}", msg.state);
        match msg.state {
            SaslState::Success => return Ok(()),
            SaslState::Challenge => {
                let token = auth.evaluate(&msg.token)?;
                send_sasl(
                    stream,
                    client_id,
                    &SaslMessage {
                        state: SaslState::Response,
                        token,
                    },
                )?;
            }
            state => {
                return Err(Error::HandshakeFailed(format!(
                    "server sent client-side sasl state {state:?}"
                )));
            }
        }
    }
}

/// Run the whole connection setup on a freshly opened socket: preamble,
/// optional auth exchange, then the connection context. The handshake is
/// complete once the context is flushed; the server does not acknowledge it.
pub(crate) fn perform<S: Read + Write>(
    stream: &mut S,
    options: &Options,
    auth: &dyn AuthProvider,
    client_id: &[u8],
    canceled: &AtomicBool,
) -> Result<()> {
    check_canceled(canceled)?;

    let preamble = [
        MAGIC[0],
        MAGIC[1],
        MAGIC[2],
        MAGIC[3],
        (options.protocol_version & 0xff) as u8,
        SERVICE_CLASS,
        auth.method().protocol_byte(),
    ];
    stream.write_all(&preamble).map_err(hs_io)?;

    if auth.method() == AuthMethod::Token {
        negotiate(stream, auth, client_id, canceled)?;
        debug!("auth exchange finished");
    }

    check_canceled(canceled)?;

    let header = RequestHeader {
        call_id: CALL_ID_CONNECTION_CONTEXT,
        method_name: String::new(),
        client_id: client_id.to_vec(),
        retry_count: NO_RETRY,
    };
    let context = ConnectionContext {
        client_id: client_id.to_vec(),
        client_name: options.client_name.clone(),
        user_name: options.user_name.clone(),
        protocol_name: options.protocol_name.clone(),
        protocol_version: options.protocol_version,
    };
    write_frame(stream, &header, &proto::serialize(&context)?)?;
    debug!("connection context flushed for user \"{}\"", options.user_name);
    Ok(())
}
