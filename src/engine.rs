use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, trace, warn};
use may::sync::Mutex;
use may::{coroutine, go};
use may_waiter::TokenWaiter;

use crate::auth::{AuthProvider, SimpleAuth};
use crate::cluster::{EndpointCursor, Resolver, ServerInfo};
use crate::connection::{CallOutcome, DisconnectSink, RpcConnection};
use crate::errors::{Error, Result, TransportKind};
use crate::events::{EventHandlers, EventResponse, NN_PRE_RPC_RETRY_EVENT};
use crate::options::Options;
use crate::proto;
use crate::retry::{Operation, RetryAction, RetryPolicy};

struct EngineState {
    cluster: String,
    endpoints: EndpointCursor,
    policy: RetryPolicy,
    conn: Option<Arc<RpcConnection>>,
}

struct EngineInner {
    options: Options,
    auth: Arc<dyn AuthProvider>,
    client_id: Vec<u8>,
    events: Arc<EventHandlers>,
    state: Mutex<EngineState>,
    connect_canceled: AtomicBool,
    shutting_down: AtomicBool,
    next_conn_id: AtomicU64,
}

/// The engine for reliable communication with one logical server: owns the
/// active connection, re-establishes it per the retry policy, and keeps
/// calls alive across reconnects and failovers.
///
/// Cloning is cheap and shares state. Every spawned continuation captures a
/// clone, so completions run even after the caller's handle is gone.
#[derive(Clone)]
pub struct RpcEngine {
    inner: Arc<EngineInner>,
}

// The server wants a 16 byte UUID as the client identity; version 4 layout.
fn random_client_id() -> Vec<u8> {
    let mut id = rand::random::<[u8; 16]>();
    id[6] = (id[6] & 0x0f) | 0x40;
    id[8] = (id[8] & 0x3f) | 0x80;
    id.to_vec()
}

impl RpcEngine {
    pub fn new(options: Options) -> Self {
        RpcEngine::with_auth(options, Arc::new(SimpleAuth))
    }

    pub fn with_auth(options: Options, auth: Arc<dyn AuthProvider>) -> Self {
        RpcEngine {
            inner: Arc::new(EngineInner {
                options,
                auth,
                client_id: random_client_id(),
                events: Arc::new(EventHandlers::new()),
                state: Mutex::new(EngineState {
                    cluster: String::new(),
                    endpoints: EndpointCursor::default(),
                    policy: RetryPolicy::NoRetry,
                    conn: None,
                }),
                connect_canceled: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                next_conn_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// The engine's stable 16 byte identity, sent with every request.
    pub fn client_id(&self) -> &[u8] {
        &self.inner.client_id
    }

    /// Install (or replace) the lifecycle event sink.
    pub fn set_event_callback(
        &self,
        callback: impl Fn(&str, &str, i64) -> EventResponse + Send + Sync + 'static,
    ) {
        self.inner.events.set_callback(Arc::new(callback));
    }

    /// Event holder, shared with [`DataNodeConnection`](crate::DataNodeConnection)
    /// instances that should report through the same sink.
    pub fn event_handlers(&self) -> Arc<EventHandlers> {
        self.inner.events.clone()
    }

    /// Record which cluster to talk to without dialing yet; the first call
    /// connects lazily. `connect` does this and then drives the connection
    /// to ready eagerly.
    pub fn configure(&self, cluster: &str, servers: ServerInfo) {
        let mut state = self.inner.state.lock().unwrap();
        state.cluster = cluster.to_string();
        state.policy = RetryPolicy::from_options(&self.inner.options, servers.endpoints.len());
        state.endpoints.replace(servers);
        debug!(
            "configured for cluster \"{cluster}\" with {} endpoint(s)",
            state.endpoints.len()
        );
    }

    /// Asynchronous connect: `done` fires once the connection is ready for
    /// the first time, or with the terminal error once retries are spent.
    pub fn connect(
        &self,
        cluster: &str,
        servers: ServerInfo,
        done: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        let engine = self.clone();
        let cluster = cluster.to_string();
        go!(move || done(engine.connect_blocking(&cluster, servers)));
    }

    /// Like [`connect`](Self::connect) but the endpoint list comes from a
    /// resolver lookup of the cluster name.
    pub fn connect_with_resolver(
        &self,
        cluster: &str,
        resolver: Arc<dyn Resolver>,
        done: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        let engine = self.clone();
        let cluster = cluster.to_string();
        go!(move || {
            let result = resolver
                .resolve(&cluster)
                .map_err(Error::from)
                .and_then(|servers| engine.connect_blocking(&cluster, servers));
            done(result);
        });
    }

    /// Blocking form of [`connect`](Self::connect); drives connect attempts
    /// through the retry policy until ready or spent.
    pub fn connect_blocking(&self, cluster: &str, servers: ServerInfo) -> Result<()> {
        self.configure(cluster, servers);
        let mut retries = 0u64;
        let mut failovers = 0u64;
        loop {
            match self.ready_connection() {
                Ok(_) => return Ok(()),
                Err(e) => match self.next_action(&e, retries, failovers, Operation::Connect) {
                    RetryAction::Fail => return Err(e),
                    RetryAction::Retry(delay) => {
                        retries += 1;
                        coroutine::sleep(delay);
                    }
                    RetryAction::FailOverAndRetry(delay) => {
                        failovers += 1;
                        self.fail_over();
                        coroutine::sleep(delay);
                    }
                },
            }
        }
    }

    /// Submit one call. `done` is invoked exactly once with the response
    /// body or the terminal error; it may run on a different stack than the
    /// submitter's. May be called before `connect` finishes.
    pub fn async_rpc(
        &self,
        method_name: &str,
        request: &[u8],
        done: impl FnOnce(Result<Bytes>) + Send + 'static,
    ) {
        let engine = self.clone();
        let method_name = method_name.to_string();
        let request = request.to_vec();
        go!(move || done(engine.rpc(&method_name, &request)));
    }

    /// Blocking form of [`async_rpc`](Self::async_rpc): one call, riding the
    /// engine's retry loop until completion.
    pub fn rpc(&self, method_name: &str, request: &[u8]) -> Result<Bytes> {
        let mut retries = 0u64;
        let mut failovers = 0u64;
        loop {
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                return Err(Error::Shutdown);
            }
            if self.inner.connect_canceled.load(Ordering::SeqCst) {
                return Err(Error::Canceled);
            }
            match self.attempt(method_name, request, retries) {
                Ok(body) => return Ok(body),
                Err(e) => match self.next_action(&e, retries, failovers, Operation::Call) {
                    RetryAction::Fail => return Err(e),
                    RetryAction::Retry(delay) => {
                        retries += 1;
                        trace!("retrying {method_name} (attempt {})", retries + 1);
                        coroutine::sleep(delay);
                    }
                    RetryAction::FailOverAndRetry(delay) => {
                        failovers += 1;
                        self.fail_over();
                        coroutine::sleep(delay);
                    }
                },
            }
        }
    }

    /// Abort a connect that has not reached ready yet. Latches: once
    /// canceled the engine refuses new work for good.
    pub fn cancel_pending_connect(&self) -> bool {
        if self.inner.connect_canceled.swap(true, Ordering::SeqCst) {
            debug!("cancel_pending_connect called more than once");
            return false;
        }
        info!("pending connect canceled");
        true
    }

    /// Close the connection and complete every incomplete call with
    /// [`Error::Shutdown`]. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let conn = self.inner.state.lock().unwrap().conn.take();
        if let Some(conn) = conn {
            conn.fail(Error::Shutdown);
        }
        info!("rpc engine shut down");
    }

    // One send/receive attempt on the current (or a fresh) connection.
    fn attempt(&self, method_name: &str, request: &[u8], retries: u64) -> Result<Bytes> {
        let conn = self.ready_connection()?;
        let waiter = TokenWaiter::<CallOutcome>::new();
        let token: usize = waiter.id().unwrap().into();
        let retry_count = if retries == 0 {
            proto::NO_RETRY
        } else {
            retries as i32
        };
        let call_id = conn.send_call(
            method_name,
            request,
            token,
            &self.inner.client_id,
            retry_count,
        )?;
        match waiter.wait_rsp(self.inner.options.rpc_timeout()) {
            Ok(outcome) => outcome,
            Err(e) => {
                // deadline fired (or the waiter got torn down); the call is
                // dead but the connection keeps serving the others
                conn.abandon(call_id);
                Err(Error::from(e))
            }
        }
    }

    // Hand back the live connection, or establish one to the current
    // endpoint. The state lock is held across the dial so concurrent
    // callers serialize on establishment instead of racing it.
    fn ready_connection(&self) -> Result<Arc<RpcConnection>> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        if self.inner.connect_canceled.load(Ordering::SeqCst) {
            return Err(Error::Canceled);
        }

        let mut state = self.inner.state.lock().unwrap();
        if let Some(conn) = &state.conn {
            if conn.is_ready() {
                return Ok(conn.clone());
            }
            state.conn = None;
        }

        let endpoint = state
            .endpoints
            .current()
            .cloned()
            .ok_or(Error::Transport(TransportKind::Unreachable))?;
        let conn_id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let observer = {
            let sink: Arc<dyn DisconnectSink> = self.inner.clone();
            Arc::downgrade(&sink)
        };
        let conn = RpcConnection::establish(
            conn_id,
            &endpoint,
            &state.cluster,
            &self.inner.options,
            self.inner.auth.as_ref(),
            &self.inner.client_id,
            self.inner.events.clone(),
            observer,
            &self.inner.connect_canceled,
        )?;
        state.conn = Some(conn.clone());
        Ok(conn)
    }

    // Fires the pre-retry hook, then asks the policy. The hook observes
    // every failed attempt; its return value does not steer the decision.
    fn next_action(
        &self,
        error: &Error,
        retries: u64,
        failovers: u64,
        op: Operation,
    ) -> RetryAction {
        let (cluster, policy) = {
            let state = self.inner.state.lock().unwrap();
            (state.cluster.clone(), state.policy.clone())
        };
        self.inner
            .events
            .call(NN_PRE_RPC_RETRY_EVENT, &cluster, 0);

        if self.inner.shutting_down.load(Ordering::SeqCst)
            || self.inner.connect_canceled.load(Ordering::SeqCst)
        {
            return RetryAction::Fail;
        }
        let action = policy.should_retry(error, retries, failovers, op);
        debug!(
            "after {error}: {action:?} (retries={retries}, failovers={failovers}, op={op:?})"
        );
        action
    }

    // Drop the current connection and move the endpoint cursor along.
    fn fail_over(&self) {
        let (old, next) = {
            let mut state = self.inner.state.lock().unwrap();
            let old = state.conn.take();
            let next = state.endpoints.advance().cloned();
            (old, next)
        };
        if let Some(endpoint) = next {
            info!("failing over to {endpoint}");
        }
        if let Some(conn) = old {
            conn.fail(Error::Transport(TransportKind::ConnectionReset));
        }
    }
}

impl DisconnectSink for EngineInner {
    fn connection_failed(&self, conn_id: u64, error: &Error) {
        let mut state = self.state.lock().unwrap();
        if state.conn.as_ref().map(|c| c.id()) == Some(conn_id) {
            warn!("dropping failed connection {conn_id}: {error}");
            state.conn = None;
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // deterministic socket close even without an explicit shutdown()
        let conn = self.state.lock().ok().and_then(|mut s| s.conn.take());
        if let Some(conn) = conn {
            conn.fail(Error::Shutdown);
        }
    }
}
