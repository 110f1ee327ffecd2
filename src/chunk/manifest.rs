//! Manifest codec
//!
//! Wire shape (JSON):
//!
//! ```json
//! { "shardTable": { "data-0": 0, "data-1": 1 },
//!   "files": { "<encoded path>": [["<hash>-0", 0], ["<hash>-1", 1]] } }
//! ```
//!
//! Shard names are interned into small integers in order of first
//! appearance so each file entry stays compact.

use crate::chunk::fragment::{fragment_ordinal, FragmentPlacement};
use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Shard table plus per-file fragment locations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(rename = "shardTable")]
    pub shard_table: BTreeMap<String, u32>,
    pub files: BTreeMap<String, Vec<(String, u32)>>,
}

impl Manifest {
    /// Shard name for a table index
    pub fn shard_name(&self, table_index: u32) -> Option<&str> {
        self.shard_table
            .iter()
            .find(|(_, idx)| **idx == table_index)
            .map(|(name, _)| name.as_str())
    }

    /// Ordered `(fragment index, shard name)` pairs for an encoded file path
    pub fn locate(&self, file: &str) -> Result<Vec<(String, String)>> {
        let entries = self
            .files
            .get(file)
            .ok_or_else(|| {
                let readable = decode_path(file).unwrap_or_else(|_| file.to_string());
                Error::NotFound(format!("file {} not in manifest", readable))
            })?;

        let names: HashMap<u32, &str> = self
            .shard_table
            .iter()
            .map(|(name, idx)| (*idx, name.as_str()))
            .collect();

        entries
            .iter()
            .map(|(fragment, idx)| {
                let shard = names.get(idx).ok_or_else(|| {
                    Error::Manifest(format!(
                        "fragment {} references unknown shard index {}",
                        fragment, idx
                    ))
                })?;
                Ok((fragment.clone(), shard.to_string()))
            })
            .collect()
    }

    /// Total fragment entries across all files
    pub fn fragment_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Incremental manifest construction
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    manifest: Manifest,
    next_index: u32,
}

impl ManifestBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, shard: &str) -> u32 {
        if let Some(idx) = self.manifest.shard_table.get(shard) {
            return *idx;
        }
        let idx = self.next_index;
        self.manifest.shard_table.insert(shard.to_string(), idx);
        self.next_index += 1;
        idx
    }

    /// Record a file's placements, in the order given
    pub fn add_file(&mut self, file_path_encoded: &str, placements: &[FragmentPlacement]) -> &mut Self {
        let entries = placements
            .iter()
            .map(|p| (p.fragment_index.clone(), self.intern(&p.shard_name)))
            .collect();
        self.manifest
            .files
            .insert(file_path_encoded.to_string(), entries);
        self
    }

    /// Finish
    pub fn build(self) -> Manifest {
        self.manifest
    }
}

/// Manifest for a single file
pub fn build_manifest(placements: &[FragmentPlacement], file_path_encoded: &str) -> Manifest {
    let mut builder = ManifestBuilder::new();
    builder.add_file(file_path_encoded, placements);
    builder.build()
}

/// Parse and validate a manifest
pub fn parse_manifest(raw: &str) -> Result<Manifest> {
    let manifest: Manifest =
        serde_json::from_str(raw).map_err(|e| Error::Manifest(e.to_string()))?;

    let mut seen = HashSet::new();
    for (shard, idx) in &manifest.shard_table {
        if !seen.insert(*idx) {
            return Err(Error::Manifest(format!(
                "shard table index {} assigned twice (at {})",
                idx, shard
            )));
        }
    }

    for (file, entries) in &manifest.files {
        for (fragment, idx) in entries {
            if !seen.contains(idx) {
                return Err(Error::Manifest(format!(
                    "file {} fragment {} references shard index {} missing from the shard table",
                    file, fragment, idx
                )));
            }
            if fragment_ordinal(fragment).is_none() {
                return Err(Error::Manifest(format!(
                    "file {} has malformed fragment index {}",
                    file, fragment
                )));
            }
        }
    }

    Ok(manifest)
}

/// Encode a path for use as a manifest key
pub fn encode_path(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(path.as_bytes())
}

/// Inverse of [`encode_path`]
pub fn decode_path(encoded: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| Error::Manifest(format!("bad path encoding: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Manifest(format!("bad path encoding: {}", e)))
}
