//! Download reconstruction
//!
//! Fetches a file's manifest from the index shard, then every fragment from
//! its shard with bounded fan-out, and concatenates them in manifest order.
//! A fragment that cannot be read becomes a gap; any gap fails the download.

use crate::chunk::{encode_path, parse_manifest};
use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::publish::split_url;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

async fn fetch_fragment(connections: &ConnectionManager, shard: &str, index: &str) -> Option<Bytes> {
    let client = match connections.client(shard) {
        Ok(client) => client,
        Err(e) => {
            warn!(shard, fragment = index, "No client for fragment shard: {}", e);
            return None;
        }
    };

    match client.fetch_fragment(index).await {
        Ok(Some(data)) => Some(data),
        Ok(None) => {
            warn!(shard, fragment = index, "Fragment not found");
            None
        }
        Err(e) => {
            warn!(shard, fragment = index, "Fragment fetch failed: {}", e);
            None
        }
    }
}

/// Reconstruct the file behind a download URL
pub async fn download(connections: &ConnectionManager, url: &str, max_in_flight: usize) -> Result<Bytes> {
    let (base_path, file_name) = split_url(url)?;

    let index = connections.index_shard()?;
    let raw = connections
        .client(&index)?
        .fetch_manifest(&encode_path(base_path))
        .await?
        .ok_or_else(|| Error::NotFound(format!("no manifest for {}", base_path)))?;
    let manifest = parse_manifest(&raw)?;
    let located = manifest.locate(&encode_path(file_name))?;
    let expected = located.len();

    let fragments: Vec<Option<Bytes>> = stream::iter(located)
        .map(|(fragment, shard)| async move { fetch_fragment(connections, &shard, &fragment).await })
        .buffered(max_in_flight.max(1))
        .collect()
        .await;

    let fetched = fragments.iter().filter(|f| f.is_some()).count();
    if fetched < expected {
        return Err(Error::IncompleteDownload { fetched, expected });
    }

    let total: usize = fragments.iter().flatten().map(Bytes::len).sum();
    let mut buffer = BytesMut::with_capacity(total);
    for fragment in fragments.into_iter().flatten() {
        buffer.extend_from_slice(&fragment);
    }
    let data = buffer.freeze();

    debug!(url, fragments = expected, bytes = data.len(), "Download reconstructed");
    Ok(data)
}
