use std::io::{Read, Write};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use may::go;
use may::net::TcpStream;
use may::sync::Mutex;

use crate::cluster::Endpoint;
use crate::errors::{Error, Result, TransportKind};
use crate::events::{EventHandlers, DN_READ_EVENT, DN_WRITE_EVENT};

/// Plain byte stream to a storage node, used for block transfer. Shares
/// nothing with the rpc machinery except the event sink: no framing, no
/// call ids, just reads and writes that report their byte counts.
pub struct DataNodeConnection {
    cluster: String,
    events: Arc<EventHandlers>,
    read_half: Mutex<Option<TcpStream>>,
    write_half: Mutex<Option<TcpStream>>,
    // separate handle so cancel never waits behind a blocked read
    cancel_handle: Mutex<Option<TcpStream>>,
    canceled: AtomicBool,
}

impl DataNodeConnection {
    pub fn new(cluster: impl Into<String>, events: Arc<EventHandlers>) -> Self {
        DataNodeConnection {
            cluster: cluster.into(),
            events,
            read_half: Mutex::new(None),
            write_half: Mutex::new(None),
            cancel_handle: Mutex::new(None),
            canceled: AtomicBool::new(false),
        }
    }

    /// Try each endpoint in order until one accepts.
    pub fn connect(&self, endpoints: &[Endpoint], timeout: Option<Duration>) -> Result<()> {
        if self.canceled.load(Ordering::SeqCst) {
            return Err(Error::Canceled);
        }
        let mut last_err = Error::Transport(TransportKind::Unreachable);
        for endpoint in endpoints {
            let attempt = (|| -> Result<TcpStream> {
                let addr = endpoint.resolve()?;
                let stream = match timeout {
                    Some(t) => TcpStream::connect_timeout(&addr, t)?,
                    None => TcpStream::connect(addr)?,
                };
                Ok(stream)
            })();
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    debug!("datanode connection established to {endpoint}");
                    *self.read_half.lock().unwrap() = Some(stream.try_clone().map_err(Error::from)?);
                    *self.write_half.lock().unwrap() =
                        Some(stream.try_clone().map_err(Error::from)?);
                    *self.cancel_handle.lock().unwrap() = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    debug!("datanode connect to {endpoint} failed: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Asynchronous shell around [`connect`](Self::connect): tries the
    /// endpoints on a spawned coroutine and hands the outcome to `done`.
    pub fn connect_async(
        self: &Arc<Self>,
        endpoints: Vec<Endpoint>,
        timeout: Option<Duration>,
        done: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        let conn = self.clone();
        go!(move || done(conn.connect(&endpoints, timeout)));
    }

    /// Read up to `buf.len()` bytes; `Ok(0)` means the stream ended. The
    /// `DN::read` hook sees the byte count and may override the outcome.
    pub fn read_some(&self, buf: &mut [u8]) -> Result<usize> {
        if self.canceled.load(Ordering::SeqCst) {
            return Err(Error::Canceled);
        }
        let mut guard = self.read_half.lock().unwrap();
        let stream = guard
            .as_mut()
            .ok_or(Error::Transport(TransportKind::Unreachable))?;
        let n = stream.read(buf).map_err(Error::from)?;
        trace!("datanode read {n} bytes");
        self.events.check(DN_READ_EVENT, &self.cluster, n as i64)?;
        Ok(n)
    }

    /// Write up to `buf.len()` bytes, reporting through `DN::write`.
    pub fn write_some(&self, buf: &[u8]) -> Result<usize> {
        if self.canceled.load(Ordering::SeqCst) {
            return Err(Error::Canceled);
        }
        let mut guard = self.write_half.lock().unwrap();
        let stream = guard
            .as_mut()
            .ok_or(Error::Transport(TransportKind::Unreachable))?;
        let n = stream.write(buf).map_err(Error::from)?;
        trace!("datanode wrote {n} bytes");
        self.events.check(DN_WRITE_EVENT, &self.cluster, n as i64)?;
        Ok(n)
    }

    /// Abort the transfer: wakes a blocked reader/writer with an error and
    /// makes every later operation fail with [`Error::Canceled`].
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        if let Some(stream) = self.cancel_handle.lock().unwrap().take() {
            stream.shutdown(Shutdown::Both).ok();
        }
        debug!("datanode connection canceled");
    }
}
