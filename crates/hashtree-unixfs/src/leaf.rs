//! File leaf encoding: one persisted leaf node per chunk

use std::io;

use futures::stream::{self, Stream, StreamExt};

use crate::importer::ImportError;
use crate::node::{FileNode, Node};
use crate::store::Store;
use crate::types::NodeDescriptor;
use crate::writer::NodeWriter;

/// Encode and persist one chunk as a file leaf
pub async fn encode_leaf<S: Store>(
    writer: &NodeWriter<S>,
    path: &str,
    chunk: Vec<u8>,
) -> Result<NodeDescriptor, ImportError> {
    let leaf_size = chunk.len() as u64;
    let (hash, encoded_len) = writer.write(&Node::File(FileNode::leaf(chunk))).await?;
    Ok(NodeDescriptor {
        path: path.to_string(),
        hash,
        size: encoded_len,
        leaf_size: Some(leaf_size),
        name: String::new(),
    })
}

struct LeafEncoder<'a, S: Store, C> {
    writer: &'a NodeWriter<S>,
    path: &'a str,
    chunks: C,
    emitted: bool,
}

/// Turn a chunk stream into leaf descriptors, in chunk order
///
/// A stream without chunks still produces one empty leaf, so every file has
/// a root. The stream ends after the first error.
pub fn encode_leaves<'a, S, C>(
    writer: &'a NodeWriter<S>,
    path: &'a str,
    chunks: C,
) -> impl Stream<Item = Result<NodeDescriptor, ImportError>> + 'a
where
    S: Store,
    C: Stream<Item = io::Result<Vec<u8>>> + Unpin + 'a,
{
    let encoder = LeafEncoder {
        writer,
        path,
        chunks: chunks.fuse(),
        emitted: false,
    };

    stream::unfold(Some(encoder), |state| async move {
        let mut encoder = state?;
        let chunk = match encoder.chunks.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Some((Err(ImportError::read_failed(encoder.path, e)), None)),
            None if encoder.emitted => return None,
            None => Vec::new(),
        };
        encoder.emitted = true;

        let result = encode_leaf(encoder.writer, encoder.path, chunk).await;
        let next = result.is_ok().then_some(encoder);
        Some((result, next))
    })
}
