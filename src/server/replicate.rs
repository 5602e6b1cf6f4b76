//! Bulk shard catch-up.
//!
//! During recovery the surviving holder of a shard copy streams every pair
//! to the replacement over a fresh connection, one PUT at a time, waiting
//! for each reply. A NOOP closes the stream. Writes that race the walk
//! still reach the replacement through the regular forwarding path, which
//! is re-pointed at it before the walk starts.

use tracing::debug;

use crate::net::messages::{
    FromBytes, MessageCode, OperationRequest, OperationResponse, Status,
};
use crate::net::Stream;
use crate::store::ShardStore;

use super::Error;

/// Stream the whole store to a replacement node. Returns the number of
/// pairs pushed.
pub(super) async fn push_shard(store: &ShardStore, host: &str, port: u16) -> Result<usize, Error> {
    let mut stream = Stream::connect(host, port).await?;
    let mut pushed = 0;

    for index in 0..store.chunk_count() {
        for (key, value) in store.chunk(index).await {
            stream.send(&OperationRequest::put(key, value)).await?;

            let payload = stream.recv_require(MessageCode::OperationResponse).await?;
            let response = OperationResponse::from_bytes(payload)?;

            if response.status != Status::Success {
                return Err(Error::PushRejected(response.status));
            }

            pushed += 1;
        }
    }

    stream.send(&OperationRequest::noop()).await?;

    debug!("pushed {} pairs to {}:{}", pushed, host, port);

    Ok(pushed)
}
