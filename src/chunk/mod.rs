//! Chunk codec
//!
//! Splits payloads into content-addressed fragments and builds or parses the
//! manifest that records where every fragment of a file was placed.

mod fragment;
mod manifest;

pub use fragment::{content_hash, create_fragments, fragment_ordinal, Fragment, FragmentPlacement};
pub use manifest::{build_manifest, decode_path, encode_path, parse_manifest, Manifest, ManifestBuilder};
