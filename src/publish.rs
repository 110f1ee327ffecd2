//! Manifest publishing
//!
//! Manifests live on the index shard under `encode_path(base_path)`; the
//! file inside a manifest is keyed by `encode_path(file_name)`. A download
//! URL is `{base_path}/{file_name}`.

use crate::chunk::{build_manifest, encode_path, fragment_ordinal, FragmentPlacement};
use crate::config::GasConfig;
use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::ledger::LedgerMsg;
use crate::transmit::{fee_for, resolve_gas_limit};
use tracing::info;

/// A committed manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedManifest {
    /// Key the manifest is stored under
    pub key: String,
    /// Download URL for the file
    pub url: String,
    pub tx_hash: String,
    pub gas_used: u64,
    pub fragment_count: usize,
}

/// Base path for one upload
pub fn base_path(base_url: &str, task: &str, iteration: u32, run_id: &str) -> String {
    format!("{}/{}/{}-{}", base_url.trim_end_matches('/'), task, iteration, run_id)
}

/// Download URL for a file under a base path
pub fn download_url(base_path: &str, file_name: &str) -> String {
    format!("{}/{}", base_path, file_name)
}

/// Split a download URL into base path and file name
pub fn split_url(url: &str) -> Result<(&str, &str)> {
    match url.rsplit_once('/') {
        Some((base, file)) if !base.is_empty() && !file.is_empty() => Ok((base, file)),
        _ => Err(Error::NotFound(format!("malformed download url: {}", url))),
    }
}

/// Sort placements by fragment ordinal
pub fn sort_placements(placements: &mut [FragmentPlacement]) -> Result<()> {
    for placement in placements.iter() {
        if fragment_ordinal(&placement.fragment_index).is_none() {
            return Err(Error::Manifest(format!(
                "malformed fragment index {}",
                placement.fragment_index
            )));
        }
    }
    placements.sort_by_key(|p| fragment_ordinal(&p.fragment_index));
    Ok(())
}

/// Build the manifest for one file and commit it to the index shard
pub async fn publish_manifest(
    connections: &ConnectionManager,
    mut placements: Vec<FragmentPlacement>,
    base_path: &str,
    file_name: &str,
    gas: &GasConfig,
) -> Result<PublishedManifest> {
    sort_placements(&mut placements)?;
    let manifest = build_manifest(&placements, &encode_path(file_name));
    let key = encode_path(base_path);

    let index = connections.index_shard()?;
    let client = connections.client(&index)?;
    let signer = connections.signer(&index)?;

    let msgs = vec![LedgerMsg::PublishManifest {
        creator: signer.address().to_string(),
        path: key.clone(),
        manifest: manifest.to_json()?,
    }];
    let gas_limit = resolve_gas_limit(client.as_ref(), &signer, &msgs, gas).await;
    let result = client
        .sign_and_broadcast(&signer, msgs, fee_for(gas_limit, gas))
        .await?;

    if !result.is_success() {
        return Err(Error::TxFailed {
            hash: result.hash,
            code: result.code,
            log: result.log,
        });
    }

    info!(
        shard = %index,
        base_path,
        fragments = placements.len(),
        height = result.height,
        "Manifest published"
    );

    Ok(PublishedManifest {
        key,
        url: download_url(base_path, file_name),
        tx_hash: result.hash,
        gas_used: result.gas_used,
        fragment_count: placements.len(),
    })
}
