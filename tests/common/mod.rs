//! Scripted loopback server used by the integration tests: accepts one
//! connection per script entry, consumes the client handshake and answers
//! (or misbehaves) as told.

// not every test binary exercises every script
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use hrpc::frame::{self, Frame};
use hrpc::proto::{
    self, DatanodeId, DirectoryListing, FileStatus, GetBlockLocationsResponse,
    GetFileInfoResponse, GetListingResponse, LocatedBlock, LocatedBlocks, MkdirsResponse,
    RequestHeader, ResponseHeader, SaslMessage, SaslState, CALL_ID_SASL,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    pub message: String,
}

/// What to do with one accepted connection.
#[derive(Debug, Clone, Copy)]
pub enum ConnScript {
    /// Swallow the handshake, answer this many calls by method name, then
    /// hold the connection open until the client goes away.
    RespondCalls(usize),
    /// Swallow the handshake and one request, then drop the connection.
    DropAfterRequest,
    /// Swallow everything, never answer.
    Silent,
    /// Answer the first request with a call id nobody asked for.
    WrongCallId,
    /// Answer the first request with an ERROR status, then behave.
    ErrorThenRespond,
    /// Tolerate the client connecting and leaving without a handshake.
    ExpectNothing,
    /// Run a challenge/success token exchange before the context, then
    /// answer calls.
    SaslRespondCalls(usize),
}

pub struct MockServer {
    pub addr: SocketAddr,
    /// Application requests the server has read, across all connections.
    pub requests_seen: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn requests(&self) -> usize {
        self.requests_seen.load(Ordering::SeqCst)
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An address with nothing listening behind it.
pub fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn spawn_server(scripts: Vec<ConnScript>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let requests_seen = Arc::new(AtomicUsize::new(0));
    let seen = requests_seen.clone();
    thread::spawn(move || {
        for script in scripts {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let _ = serve_conn(stream, script, &seen);
        }
    });
    MockServer {
        addr,
        requests_seen,
    }
}

fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<Frame> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Ok(Some(frame)) = frame::decode(buf) {
            return Ok(frame);
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn write_response<T: Serialize>(
    stream: &mut TcpStream,
    header: &ResponseHeader,
    body: &T,
) -> std::io::Result<()> {
    let header_bytes = proto::serialize(header).unwrap();
    let body_bytes = proto::serialize(body).unwrap();
    let mut out = BytesMut::new();
    frame::encode(&header_bytes, &body_bytes, &mut out);
    stream.write_all(&out)
}

fn canned_file_status(path: &str) -> FileStatus {
    FileStatus {
        path: path.to_string(),
        length: 4096,
        is_dir: false,
        block_size: 128 * 1024 * 1024,
        replication: 3,
        modification_time: 1_700_000_000_000,
        access_time: 1_700_000_000_000,
        owner: "hdfs".into(),
        group: "supergroup".into(),
        permissions: 0o644,
    }
}

// Answer one application request based on its method name.
fn respond(stream: &mut TcpStream, header: &RequestHeader, body: &[u8]) -> std::io::Result<()> {
    let ok = ResponseHeader::success(header.call_id);
    match header.method_name.as_str() {
        "getFileInfo" => {
            let request: proto::GetFileInfoRequest = proto::parse(body).unwrap();
            write_response(
                stream,
                &ok,
                &GetFileInfoResponse {
                    status: Some(canned_file_status(&request.path)),
                },
            )
        }
        "mkdirs" => write_response(stream, &ok, &MkdirsResponse { result: true }),
        "getListing" => {
            let request: proto::GetListingRequest = proto::parse(body).unwrap();
            write_response(
                stream,
                &ok,
                &GetListingResponse {
                    listing: Some(DirectoryListing {
                        entries: vec![canned_file_status(&format!("{}/part-0", request.path))],
                        remaining: 0,
                    }),
                },
            )
        }
        "getBlockLocations" => write_response(
            stream,
            &ok,
            &GetBlockLocationsResponse {
                locations: Some(LocatedBlocks {
                    file_length: 4096,
                    blocks: vec![LocatedBlock {
                        block_id: 1073741825,
                        offset: 0,
                        length: 4096,
                        locations: vec![DatanodeId {
                            uuid: "dn-1".into(),
                            host: "127.0.0.1".into(),
                            port: 9866,
                        }],
                    }],
                    under_construction: false,
                    last_block_complete: true,
                }),
            },
        ),
        _ => {
            let request: EchoRequest = proto::parse(body).unwrap();
            write_response(
                stream,
                &ok,
                &EchoResponse {
                    message: request.message,
                },
            )
        }
    }
}

fn drain_until_eof(stream: &mut TcpStream) {
    let mut chunk = [0u8; 4096];
    while let Ok(n) = stream.read(&mut chunk) {
        if n == 0 {
            break;
        }
    }
}

fn read_request(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    seen: &AtomicUsize,
) -> std::io::Result<(RequestHeader, Vec<u8>)> {
    let frame = read_frame(stream, buf)?;
    let header: RequestHeader = proto::parse(&frame.header).unwrap();
    seen.fetch_add(1, Ordering::SeqCst);
    Ok((header, frame.body.to_vec()))
}

fn serve_conn(
    mut stream: TcpStream,
    script: ConnScript,
    seen: &AtomicUsize,
) -> std::io::Result<()> {
    let mut preamble = [0u8; 7];
    stream.read_exact(&mut preamble)?;
    if &preamble[..4] != b"hrpc" {
        return Err(std::io::ErrorKind::InvalidData.into());
    }

    let mut buf = BytesMut::new();

    if let ConnScript::SaslRespondCalls(calls) = script {
        // negotiate leg
        let _negotiate = read_frame(&mut stream, &mut buf)?;
        write_response(
            &mut stream,
            &ResponseHeader::success(CALL_ID_SASL),
            &SaslMessage {
                state: SaslState::Challenge,
                token: b"prove-it".to_vec(),
            },
        )?;
        // response leg
        let _response = read_frame(&mut stream, &mut buf)?;
        write_response(
            &mut stream,
            &ResponseHeader::success(CALL_ID_SASL),
            &SaslMessage {
                state: SaslState::Success,
                token: Vec::new(),
            },
        )?;
        let _context = read_frame(&mut stream, &mut buf)?;
        for _ in 0..calls {
            let (header, body) = read_request(&mut stream, &mut buf, seen)?;
            respond(&mut stream, &header, &body)?;
        }
        drain_until_eof(&mut stream);
        return Ok(());
    }

    let _context = read_frame(&mut stream, &mut buf)?;

    match script {
        ConnScript::ExpectNothing => Ok(()),
        ConnScript::Silent => {
            drain_until_eof(&mut stream);
            Ok(())
        }
        ConnScript::DropAfterRequest => {
            let _ = read_request(&mut stream, &mut buf, seen)?;
            Ok(())
        }
        ConnScript::WrongCallId => {
            let (header, _body) = read_request(&mut stream, &mut buf, seen)?;
            write_response(
                &mut stream,
                &ResponseHeader::success(header.call_id + 1000),
                &EchoResponse {
                    message: String::new(),
                },
            )?;
            drain_until_eof(&mut stream);
            Ok(())
        }
        ConnScript::ErrorThenRespond => {
            let (header, _body) = read_request(&mut stream, &mut buf, seen)?;
            let reply = ResponseHeader {
                call_id: header.call_id,
                status: proto::STATUS_ERROR,
                exception_class_name: "org.apache.hadoop.ipc.StandbyException".into(),
                error_message: "Operation category READ is not supported".into(),
            };
            let header_bytes = proto::serialize(&reply).unwrap();
            let mut out = BytesMut::new();
            frame::encode(&header_bytes, &[], &mut out);
            stream.write_all(&out)?;

            let (header, body) = read_request(&mut stream, &mut buf, seen)?;
            respond(&mut stream, &header, &body)?;
            drain_until_eof(&mut stream);
            Ok(())
        }
        ConnScript::RespondCalls(calls) => {
            for _ in 0..calls {
                let (header, body) = read_request(&mut stream, &mut buf, seen)?;
                respond(&mut stream, &header, &body)?;
            }
            drain_until_eof(&mut stream);
            Ok(())
        }
        ConnScript::SaslRespondCalls(_) => unreachable!("handled above"),
    }
}
