//! hrpc is a client side RPC engine for HDFS style clusters, based on
//! coroutines.
//!
//! One engine owns one multiplexed TCP connection to the active metadata
//! server of a cluster. Calls are framed as length-delimited
//! `(header, body)` pairs, matched back to their callers by call id, and
//! survive connection loss through a configurable retry/failover policy
//! that walks the server's endpoint list. Block data moves over separate
//! plain byte streams to the storage nodes.
//!
//! The general call procedure is as below
//! 1. the caller submits a request to the engine
//! 2. the engine connects (and handshakes) lazily if needed
//! 3. the connection assigns a call id and frames the request
//! 4. the reader coroutine matches the response by call id
//! 5. on a transport error the retry policy decides: retry, fail over, fail
//!
//! Example usage:
//!
//! ```no_run
//! use hrpc::{Options, RpcEngine, ServerInfo};
//!
//! let mut options = Options::default();
//! options.max_rpc_retries = 2;
//! options.rpc_retry_delay_ms = 100;
//! options.user_name = "hdfs".to_string();
//!
//! let engine = RpcEngine::new(options);
//! engine.connect_blocking("ns1", ServerInfo::single("namenode", 8020)).unwrap();
//!
//! let ops = hrpc::NamenodeOperations::new(engine.clone());
//! if let Some(status) = ops.get_file_info("/user/hdfs/data").unwrap() {
//!     println!("{} is {} bytes", status.path, status.length);
//! }
//! engine.shutdown();
//! ```

pub use attachment::{HostRuntime, ThreadAttachment};
pub use auth::{AuthMethod, AuthProvider, SimpleAuth, TokenAuth};
pub use cluster::{Endpoint, Resolver, ServerInfo, StaticResolver};
pub use datanode::DataNodeConnection;
pub use engine::RpcEngine;
pub use errors::{Error, RemoteError, Result, TransportKind};
pub use events::{
    EventCallback, EventHandlers, EventResponse, DN_READ_EVENT, DN_WRITE_EVENT, NN_CONNECT_EVENT,
    NN_PRE_RPC_RETRY_EVENT, NN_READ_EVENT, NN_WRITE_EVENT,
};
pub use namenode::NamenodeOperations;
pub use options::Options;
pub use retry::{Operation, RetryAction, RetryPolicy};

/// Host runtime thread attachment
mod attachment;
/// Authentication provider seam
mod auth;
/// Endpoints, server lists and resolution
mod cluster;
/// One multiplexed connection to the active server
mod connection;
/// Byte streams to storage nodes
mod datanode;
/// The engine: connection ownership plus the retry loop
mod engine;
/// Provides the error types
mod errors;
/// Lifecycle event hooks
mod events;
/// Raw frame protocol
pub mod frame;
/// Connection preamble, auth exchange and context
mod handshake;
/// Typed namespace operations
mod namenode;
/// Engine tuning knobs
mod options;
/// Wire message schema
pub mod proto;
/// Write-combining outbound queue
mod queued_writer;
/// Retry and failover decisions
mod retry;
