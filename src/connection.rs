use std::collections::HashMap;
use std::io::Read;
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use log::{debug, info, trace, warn};
use may::net::TcpStream;
use may::sync::Mutex;
use may::{coroutine, go};
use may_waiter::TokenWaiter;

use crate::auth::AuthProvider;
use crate::cluster::Endpoint;
use crate::errors::{Error, Result, TransportKind};
use crate::events::{EventHandlers, EventResponse, NN_CONNECT_EVENT, NN_READ_EVENT};
use crate::frame::{self, Frame};
use crate::handshake;
use crate::options::Options;
use crate::proto::{self, RequestHeader, ResponseHeader, FIRST_RESERVED_CALL_ID};
use crate::queued_writer::QueuedWriter;

/// Connection lifecycle. `Created -> Connecting -> Handshaking -> Ready`
/// is the only success path; everything else ends in `Disconnected`, which
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Created,
    Connecting,
    Handshaking,
    Ready,
    Disconnected,
}

/// What a completed call hands back through its waiter: the response body,
/// or the error that ended it.
pub(crate) type CallOutcome = Result<Bytes>;

/// Receives failed-connection notifications; implemented by the engine.
/// Held weakly so the engine stays the sole owner of the connection.
pub(crate) trait DisconnectSink: Send + Sync {
    fn connection_failed(&self, conn_id: u64, error: &Error);
}

struct InFlight {
    token: usize,
    method_name: String,
}

/// One multiplexed TCP connection to the active server. Owned by the
/// engine; per-call coroutines send through it and park on their waiter
/// until the reader coroutine (one per connection) completes them.
pub(crate) struct RpcConnection {
    id: u64,
    cluster: String,
    state: Mutex<ConnState>,
    // kept for deterministic teardown; reads and writes go through clones
    stream: TcpStream,
    writer: QueuedWriter<TcpStream>,
    in_flight: Mutex<HashMap<u32, InFlight>>,
    next_call_id: AtomicU32,
    events: Arc<EventHandlers>,
    observer: Weak<dyn DisconnectSink>,
}

fn dial(endpoint: &Endpoint, options: &Options) -> Result<TcpStream> {
    let addr = endpoint.resolve()?;
    let stream = match options.connect_timeout() {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    Ok(stream)
}

fn complete(token: usize, outcome: CallOutcome) {
    let id = unsafe { may_waiter::ID::from_usize(token) };
    TokenWaiter::set_rsp(id, outcome);
}

impl RpcConnection {
    /// Dial `endpoint`, run the handshake and enter `Ready`. The
    /// `NN::connect` hook fires after every dial attempt and may veto it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn establish(
        id: u64,
        endpoint: &Endpoint,
        cluster: &str,
        options: &Options,
        auth: &dyn AuthProvider,
        client_id: &[u8],
        events: Arc<EventHandlers>,
        observer: Weak<dyn DisconnectSink>,
        canceled: &AtomicBool,
    ) -> Result<Arc<RpcConnection>> {
        let mut phase = ConnState::Created;
        let result = (|| {
            if canceled.load(Ordering::SeqCst) {
                return Err(Error::Canceled);
            }
            phase = ConnState::Connecting;
            let mut outcome = dial(endpoint, options);
            if let EventResponse::Error(e) = events.call(NN_CONNECT_EVENT, cluster, 0) {
                outcome = Err(e);
            }
            let mut stream = outcome?;
            if canceled.load(Ordering::SeqCst) {
                return Err(Error::Canceled);
            }
            stream.set_nodelay(true).ok();

            phase = ConnState::Handshaking;
            stream
                .set_read_timeout(options.handshake_timeout())
                .map_err(Error::from)?;
            handshake::perform(&mut stream, options, auth, client_id, canceled)?;
            stream.set_read_timeout(None).map_err(Error::from)?;
            Ok(stream)
        })();

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                debug!("connection {id} to {endpoint} failed while {phase:?}: {e}");
                return Err(e);
            }
        };

        let reader_stream = stream.try_clone().map_err(Error::from)?;
        let writer_stream = stream.try_clone().map_err(Error::from)?;
        let conn = Arc::new(RpcConnection {
            id,
            cluster: cluster.to_string(),
            state: Mutex::new(ConnState::Ready),
            stream,
            writer: QueuedWriter::new(writer_stream),
            in_flight: Mutex::new(HashMap::new()),
            next_call_id: AtomicU32::new(0),
            events,
            observer,
        });
        conn.spawn_reader(reader_stream)?;
        info!("connection {id} ready at {endpoint}");
        Ok(conn)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.state.lock().unwrap() == ConnState::Ready
    }

    /// Assign a call id, register the waiter token and put the frame on the
    /// wire. The state lock is held across the send so concurrent callers
    /// hit the socket in call-id order.
    pub(crate) fn send_call(
        &self,
        method_name: &str,
        request: &[u8],
        token: usize,
        client_id: &[u8],
        retry_count: i32,
    ) -> Result<u32> {
        let (call_id, write_result) = {
            let state = self.state.lock().unwrap();
            if *state != ConnState::Ready {
                return Err(Error::Transport(TransportKind::ConnectionReset));
            }
            let mut in_flight = self.in_flight.lock().unwrap();
            let call_id =
                self.next_call_id.fetch_add(1, Ordering::Relaxed) % FIRST_RESERVED_CALL_ID;
            let header = proto::serialize(&RequestHeader {
                call_id,
                method_name: method_name.to_string(),
                client_id: client_id.to_vec(),
                retry_count,
            })?;
            let mut buf = BytesMut::with_capacity(header.len() + request.len() + 16);
            frame::encode(&header, request, &mut buf);
            in_flight.insert(
                call_id,
                InFlight {
                    token,
                    method_name: method_name.to_string(),
                },
            );
            trace!("connection {}: sending call {call_id} ({method_name})", self.id);
            let result = self.writer.write(buf.to_vec());
            if result.is_err() {
                in_flight.remove(&call_id);
            }
            (call_id, result)
        };

        match write_result {
            Ok(()) => Ok(call_id),
            Err(e) => {
                let err = Error::from(e);
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Forget a call whose deadline fired. Only the call dies; the
    /// connection and its other in-flight calls continue.
    pub(crate) fn abandon(&self, call_id: u32) {
        if self.in_flight.lock().unwrap().remove(&call_id).is_some() {
            debug!("connection {}: abandoned call {call_id}", self.id);
        }
    }

    fn spawn_reader(self: &Arc<Self>, stream: TcpStream) -> Result<()> {
        let conn = self.clone();
        go!(
            coroutine::Builder::new().name(format!("hrpc-reader-{}", self.id)),
            move || conn.read_loop(stream)
        )
        .map_err(Error::from)?;
        Ok(())
    }

    fn read_loop(self: Arc<Self>, mut stream: TcpStream) {
        let mut buf = BytesMut::with_capacity(32 * 1024);
        let mut chunk = [0u8; 16 * 1024];
        let err = loop {
            match frame::decode(&mut buf) {
                Ok(Some(frame)) => {
                    if let Err(e) = self.dispatch(frame) {
                        break e;
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => break e,
            }
            match stream.read(&mut chunk) {
                Ok(0) => break Error::Transport(TransportKind::Eof),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => break Error::from(e),
            }
        };
        debug!("connection {}: reader stopped: {err}", self.id);
        self.fail(err);
    }

    // Route one response frame to its call. Errors returned here take the
    // whole connection down.
    fn dispatch(&self, frame: Frame) -> Result<()> {
        let header: ResponseHeader = proto::parse(&frame.header)?;
        // the read hook can turn a good frame into a read failure
        self.events.check(NN_READ_EVENT, &self.cluster, 0)?;

        let pending = self.in_flight.lock().unwrap().remove(&header.call_id);
        let Some(pending) = pending else {
            return Err(Error::Protocol(format!(
                "response for unknown call id {}",
                header.call_id
            )));
        };
        trace!(
            "connection {}: completing call {} ({})",
            self.id,
            header.call_id,
            pending.method_name
        );
        match header.check() {
            Ok(()) => {
                complete(pending.token, Ok(frame.body));
                Ok(())
            }
            Err(err @ Error::RemoteFatal(_)) => {
                // the server is telling us the whole connection is done for
                complete(pending.token, Err(err.clone()));
                Err(err)
            }
            Err(err) => {
                complete(pending.token, Err(err));
                Ok(())
            }
        }
    }

    /// Tear the connection down exactly once: close the socket, hand every
    /// in-flight call back with `error`, and tell the engine.
    pub(crate) fn fail(&self, error: Error) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ConnState::Disconnected {
                return;
            }
            *state = ConnState::Disconnected;
        }
        self.stream.shutdown(Shutdown::Both).ok();

        let drained: Vec<InFlight> = {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.drain().map(|(_, pending)| pending).collect()
        };
        if !drained.is_empty() {
            warn!(
                "connection {}: returning {} calls with {error}",
                self.id,
                drained.len()
            );
        }
        for pending in drained {
            complete(pending.token, Err(error.clone()));
        }

        if let Some(observer) = self.observer.upgrade() {
            observer.connection_failed(self.id, &error);
        }
    }
}
