//! Encoding, hashing and persisting nodes during an import

use std::sync::Arc;

use tracing::trace;

use crate::codec::encode_and_hash;
use crate::importer::ImportError;
use crate::node::Node;
use crate::store::Store;
use crate::types::{to_hex, Hash};

/// Writes encoded nodes to a store, or only hashes them
pub struct NodeWriter<S: Store> {
    store: Arc<S>,
    only_hash: bool,
}

impl<S: Store> NodeWriter<S> {
    pub fn new(store: Arc<S>, only_hash: bool) -> Self {
        Self { store, only_hash }
    }

    /// Encode and persist a node, returning its address and encoded length
    pub async fn write(&self, node: &Node) -> Result<(Hash, u64), ImportError> {
        let (data, hash) = encode_and_hash(node)?;
        let encoded_len = data.len() as u64;
        if !self.only_hash {
            let fresh = self.store.put(hash, data).await?;
            trace!(hash = %to_hex(&hash), encoded_len, fresh, "stored node");
        }
        Ok((hash, encoded_len))
    }
}
