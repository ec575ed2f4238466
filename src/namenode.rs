use crate::engine::RpcEngine;
use crate::errors::Result;
use crate::proto::{
    self, DirectoryListing, FileStatus, GetBlockLocationsRequest, GetBlockLocationsResponse,
    GetFileInfoRequest, GetFileInfoResponse, GetListingRequest, GetListingResponse, LocatedBlocks,
    MkdirsRequest, MkdirsResponse,
};

/// Typed namespace operations over a connected engine. Every method is one
/// engine call: serialize, send, parse. Retry, failover and timeouts all
/// live below, in the engine.
pub struct NamenodeOperations {
    engine: RpcEngine,
}

impl NamenodeOperations {
    pub fn new(engine: RpcEngine) -> Self {
        NamenodeOperations { engine }
    }

    pub fn engine(&self) -> &RpcEngine {
        &self.engine
    }

    /// Stat one path. `Ok(None)` means the path does not exist.
    pub fn get_file_info(&self, path: &str) -> Result<Option<FileStatus>> {
        let request = proto::serialize(&GetFileInfoRequest { path: path.into() })?;
        let body = self.engine.rpc("getFileInfo", &request)?;
        let response: GetFileInfoResponse = proto::parse(&body)?;
        Ok(response.status)
    }

    /// One page of directory entries, resuming after `start_after` (empty
    /// for the first page).
    pub fn get_listing(&self, path: &str, start_after: &[u8]) -> Result<Option<DirectoryListing>> {
        let request = proto::serialize(&GetListingRequest {
            path: path.into(),
            start_after: start_after.to_vec(),
            need_location: false,
        })?;
        let body = self.engine.rpc("getListing", &request)?;
        let response: GetListingResponse = proto::parse(&body)?;
        Ok(response.listing)
    }

    /// Which blocks (and replica holders) back the byte range.
    pub fn get_block_locations(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Option<LocatedBlocks>> {
        let request = proto::serialize(&GetBlockLocationsRequest {
            path: path.into(),
            offset,
            length,
        })?;
        let body = self.engine.rpc("getBlockLocations", &request)?;
        let response: GetBlockLocationsResponse = proto::parse(&body)?;
        Ok(response.locations)
    }

    pub fn mkdirs(&self, path: &str, create_parent: bool) -> Result<bool> {
        let request = proto::serialize(&MkdirsRequest {
            path: path.into(),
            create_parent,
            permissions: 0o755,
        })?;
        let body = self.engine.rpc("mkdirs", &request)?;
        let response: MkdirsResponse = proto::parse(&body)?;
        Ok(response.result)
    }
}
