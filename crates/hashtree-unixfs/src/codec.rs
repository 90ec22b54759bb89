//! MessagePack encoding/decoding for nodes
//!
//! Every encoded node starts with a one-byte format tag:
//! - `0x70`: native node (file or directory) with compact keys
//! - `0x71`: document node, an arbitrary MessagePack map
//!
//! **Determinism:** native nodes serialize a fixed struct in declaration
//! order; document bodies are `serde_json::Value`, whose maps keep sorted
//! keys, so equal documents encode to equal bytes.
//!
//! Native node keys:
//! - t: type (1 = file, 2 = directory)
//! - d: payload bytes (file leaves)
//! - f: file size (file nodes)
//! - b: file bytes under each link (internal file nodes)
//! - l: links array
//! - h: hash (in link)
//! - n: name (in link, optional)
//! - s: cumulative size (in link)

use serde::{Deserialize, Serialize};
use serde_bytes::{ByteBuf, Bytes};

use crate::hash::sha256;
use crate::node::{DirectoryNode, DocumentNode, FileNode, Node};
use crate::types::{Hash, Link};

/// Format tag of file and directory nodes
pub const FORMAT_NATIVE: u8 = 0x70;
/// Format tag of document nodes
pub const FORMAT_DOCUMENT: u8 = 0x71;

const TYPE_FILE: u8 = 1;
const TYPE_DIRECTORY: u8 = 2;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Empty node data")]
    Empty,
    #[error("Unknown node format: {0:#04x}")]
    UnknownFormat(u8),
    #[error("Invalid node type: {0}")]
    InvalidNodeType(u8),
    #[error("MessagePack encoding error: {0}")]
    MsgpackEncode(String),
    #[error("MessagePack decoding error: {0}")]
    MsgpackDecode(String),
    #[error("Invalid hash length: expected 32, got {0}")]
    InvalidHashLength(usize),
    #[error("File node has {links} links but {sizes} block sizes")]
    BlockSizesMismatch { links: usize, sizes: usize },
}

#[derive(Serialize)]
struct WireLinkRef<'a> {
    h: &'a Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<&'a str>,
    s: u64,
}

#[derive(Serialize)]
struct WireNodeRef<'a> {
    t: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<&'a Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    f: Option<u64>,
    #[serde(skip_serializing_if = "no_block_sizes")]
    b: &'a [u64],
    l: Vec<WireLinkRef<'a>>,
}

fn no_block_sizes(sizes: &&[u64]) -> bool {
    sizes.is_empty()
}

#[derive(Deserialize)]
struct WireLink {
    h: ByteBuf,
    n: Option<String>,
    #[serde(default)]
    s: u64,
}

#[derive(Deserialize)]
struct WireNode {
    t: u8,
    d: Option<ByteBuf>,
    f: Option<u64>,
    #[serde(default)]
    b: Vec<u64>,
    #[serde(default)]
    l: Vec<WireLink>,
}

fn wire_links(links: &[Link]) -> Vec<WireLinkRef<'_>> {
    links
        .iter()
        .map(|link| WireLinkRef {
            h: Bytes::new(&link.hash),
            n: (!link.name.is_empty()).then_some(link.name.as_str()),
            s: link.size,
        })
        .collect()
}

fn encode_native(wire: &WireNodeRef<'_>) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![FORMAT_NATIVE];
    rmp_serde::encode::write_named(&mut out, wire)
        .map_err(|e| CodecError::MsgpackEncode(e.to_string()))?;
    Ok(out)
}

/// Encode a node to its tagged MessagePack form
pub fn encode_node(node: &Node) -> Result<Vec<u8>, CodecError> {
    match node {
        Node::File(file) => {
            // leaves always carry `d`, even when empty
            let payload = (file.is_leaf() || !file.data.is_empty()).then(|| Bytes::new(&file.data));
            encode_native(&WireNodeRef {
                t: TYPE_FILE,
                d: payload,
                f: Some(file.file_size),
                b: &file.block_sizes,
                l: wire_links(&file.links),
            })
        }
        Node::Directory(dir) => encode_native(&WireNodeRef {
            t: TYPE_DIRECTORY,
            d: None,
            f: None,
            b: &[],
            l: wire_links(&dir.links),
        }),
        Node::Document(doc) => {
            let mut out = vec![FORMAT_DOCUMENT];
            rmp_serde::encode::write_named(&mut out, &doc.value)
                .map_err(|e| CodecError::MsgpackEncode(e.to_string()))?;
            Ok(out)
        }
    }
}

fn decode_links(wire: Vec<WireLink>) -> Result<Vec<Link>, CodecError> {
    wire.into_iter()
        .map(|wl| {
            let hash: Hash = wl
                .h
                .as_slice()
                .try_into()
                .map_err(|_| CodecError::InvalidHashLength(wl.h.len()))?;
            Ok(Link {
                hash,
                name: wl.n.unwrap_or_default(),
                size: wl.s,
            })
        })
        .collect()
}

/// Decode tagged node bytes
pub fn decode_node(data: &[u8]) -> Result<Node, CodecError> {
    let (&tag, body) = data.split_first().ok_or(CodecError::Empty)?;
    match tag {
        FORMAT_NATIVE => {
            let wire: WireNode =
                rmp_serde::from_slice(body).map_err(|e| CodecError::MsgpackDecode(e.to_string()))?;
            let links = decode_links(wire.l)?;
            match wire.t {
                TYPE_FILE => {
                    if !links.is_empty() && wire.b.len() != links.len() {
                        return Err(CodecError::BlockSizesMismatch {
                            links: links.len(),
                            sizes: wire.b.len(),
                        });
                    }
                    let data = wire.d.map(ByteBuf::into_vec).unwrap_or_default();
                    let file_size = wire
                        .f
                        .unwrap_or_else(|| data.len() as u64 + wire.b.iter().sum::<u64>());
                    Ok(Node::File(FileNode {
                        data,
                        file_size,
                        block_sizes: wire.b,
                        links,
                    }))
                }
                TYPE_DIRECTORY => Ok(Node::Directory(DirectoryNode::new(links))),
                other => Err(CodecError::InvalidNodeType(other)),
            }
        }
        FORMAT_DOCUMENT => {
            let value =
                rmp_serde::from_slice(body).map_err(|e| CodecError::MsgpackDecode(e.to_string()))?;
            Ok(Node::Document(DocumentNode::new(value)))
        }
        other => Err(CodecError::UnknownFormat(other)),
    }
}

/// Encode a node and compute its hash
pub fn encode_and_hash(node: &Node) -> Result<(Vec<u8>, Hash), CodecError> {
    let data = encode_node(node)?;
    let hash = sha256(&data);
    Ok((data, hash))
}

/// Cumulative size of a node: its own encoded bytes plus every link's size
pub fn node_size(encoded_len: u64, links: &[Link]) -> u64 {
    encoded_len + links.iter().map(|l| l.size).sum::<u64>()
}
