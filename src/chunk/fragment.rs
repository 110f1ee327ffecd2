//! Fragment splitting
//!
//! The content hash is computed once over the whole payload and every
//! fragment is named `{hash}-{ordinal}`, so identical uploads produce
//! identical fragment names. Fragments share the payload buffer.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A slice of an uploaded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// `{content hash}-{ordinal}`
    pub index: String,
    /// Position within the payload, from 0
    pub ordinal: usize,
    /// Fragment bytes
    pub data: Bytes,
}

impl Fragment {
    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A fragment confirmed as stored on a shard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FragmentPlacement {
    pub fragment_index: String,
    pub shard_name: String,
}

/// Lower-case hex BLAKE3 digest of the payload
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Split `data` into fragments of at most `fragment_size` bytes
pub fn create_fragments(data: &Bytes, fragment_size: usize) -> Result<Vec<Fragment>> {
    if fragment_size == 0 {
        return Err(Error::InvalidConfig(
            "fragment size must be greater than zero".to_string(),
        ));
    }

    let hash = content_hash(data);
    let fragments = (0..data.len())
        .step_by(fragment_size)
        .enumerate()
        .map(|(ordinal, start)| {
            let end = (start + fragment_size).min(data.len());
            Fragment {
                index: format!("{}-{}", hash, ordinal),
                ordinal,
                data: data.slice(start..end),
            }
        })
        .collect();

    Ok(fragments)
}

/// Ordinal encoded in a fragment index
pub fn fragment_ordinal(index: &str) -> Option<usize> {
    let (_, ordinal) = index.rsplit_once('-')?;
    ordinal.parse().ok()
}
