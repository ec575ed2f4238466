//! Message schema for everything the engine puts inside a frame: rpc
//! headers, the connection context, SASL negotiation and the namespace
//! operations layered on top. Serialization is plain serde + bincode; the
//! engine itself never looks past `serialize`/`parse`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, RemoteError, Result};

/// Call ids at and above this value are reserved for connection setup
/// traffic and are never assigned to application calls.
pub const FIRST_RESERVED_CALL_ID: u32 = 0xffff_ff00;
/// Call id used by SASL negotiation frames.
pub const CALL_ID_SASL: u32 = u32::MAX - 33;
/// Call id used by the connection context frame.
pub const CALL_ID_CONNECTION_CONTEXT: u32 = u32::MAX - 3;

/// Marks a request that is not a re-send.
pub const NO_RETRY: i32 = -1;

/// Serialize a message into frame-ready bytes.
pub fn serialize<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| Error::Protocol(format!("serialize failed: {e}")))
}

/// Parse a message out of a frame header or body.
pub fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Protocol(format!("parse failed: {e}")))
}

/// Header attached to every outbound call frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub call_id: u32,
    pub method_name: String,
    /// 16 byte engine identity, stable across reconnects.
    pub client_id: Vec<u8>,
    /// How many times this call has been re-sent, or [`NO_RETRY`].
    pub retry_count: i32,
}

pub const STATUS_SUCCESS: u8 = 0;
pub const STATUS_ERROR: u8 = 1;
pub const STATUS_FATAL: u8 = 2;

/// Header of every inbound response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub call_id: u32,
    /// One of the `STATUS_*` bytes. Unrecognized values are treated as
    /// ERROR with the class name `UnknownStatus`.
    pub status: u8,
    pub exception_class_name: String,
    pub error_message: String,
}

impl ResponseHeader {
    pub fn success(call_id: u32) -> Self {
        ResponseHeader {
            call_id,
            status: STATUS_SUCCESS,
            exception_class_name: String::new(),
            error_message: String::new(),
        }
    }

    /// Interpret the status byte, turning ERROR/FATAL into the matching
    /// error value.
    pub fn check(&self) -> Result<()> {
        let remote = || RemoteError {
            exception_class_name: self.exception_class_name.clone(),
            error_message: self.error_message.clone(),
        };
        match self.status {
            STATUS_SUCCESS => Ok(()),
            STATUS_ERROR => Err(Error::Remote(remote())),
            STATUS_FATAL => Err(Error::RemoteFatal(remote())),
            other => Err(Error::Remote(RemoteError {
                exception_class_name: String::from("UnknownStatus"),
                error_message: format!("unrecognized response status {other}"),
            })),
        }
    }
}

/// First application-level message on a fresh connection; tells the server
/// who we are and which protocol we intend to speak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub client_id: Vec<u8>,
    pub client_name: String,
    pub user_name: String,
    pub protocol_name: String,
    pub protocol_version: u32,
}

/// States of the SASL-like negotiation. The engine only ever inspects
/// `Success`; token payloads stay opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaslState {
    Negotiate,
    Challenge,
    Response,
    Success,
}

/// One leg of the auth exchange, framed with [`CALL_ID_SASL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslMessage {
    pub state: SaslState,
    pub token: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Namespace operation messages. Thin wrappers in `namenode` pair each
// request with one engine call; none of these carry behavior.
// ---------------------------------------------------------------------------

/// Stat information for one file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub length: u64,
    pub is_dir: bool,
    pub block_size: u64,
    pub replication: u32,
    pub modification_time: u64,
    pub access_time: u64,
    pub owner: String,
    pub group: String,
    pub permissions: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetFileInfoRequest {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetFileInfoResponse {
    /// `None` when the path does not exist.
    pub status: Option<FileStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetListingRequest {
    pub path: String,
    /// Resume cursor: the last path name returned by the previous page.
    pub start_after: Vec<u8>,
    pub need_location: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub entries: Vec<FileStatus>,
    /// How many entries are left on the server after this page.
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetListingResponse {
    pub listing: Option<DirectoryListing>,
}

/// One replica holder of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatanodeId {
    pub uuid: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedBlock {
    pub block_id: u64,
    pub offset: u64,
    pub length: u64,
    pub locations: Vec<DatanodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedBlocks {
    pub file_length: u64,
    pub blocks: Vec<LocatedBlock>,
    pub under_construction: bool,
    pub last_block_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlockLocationsRequest {
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlockLocationsResponse {
    pub locations: Option<LocatedBlocks>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirsRequest {
    pub path: String,
    pub create_parent: bool,
    pub permissions: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirsResponse {
    pub result: bool,
}
