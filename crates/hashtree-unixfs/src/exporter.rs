//! Exporting: resolve `address[/path]` and stream back entries
//!
//! Resolution walks named links one hop at a time, so it passes through any
//! node kind that exposes [`NamedLinks`], including documents written by
//! other applications. Once the path is used up:
//! - a directory yields itself and then every descendant depth-first in
//!   link order
//! - a file yields one entry with a lazy content stream
//! - a document yields one entry without content
//!
//! An address that does not parse, is not in the store, or a path that does
//! not resolve produces an empty stream rather than an error. Once the
//! target has resolved, a node missing below it ends the stream with an
//! error.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use crate::codec::{decode_node, CodecError};
use crate::hash::verify;
use crate::node::{FileNode, NamedLinks, Node, NodeKind};
use crate::store::{Store, StoreError};
use crate::types::{from_hex, to_hex, Hash};

/// Export error type
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Missing chunk: {0}")]
    MissingChunk(String),
    #[error("Missing node {hash} under {path}")]
    MissingNode { path: String, hash: String },
    #[error("Stored bytes do not match address {0}")]
    HashMismatch(String),
    #[error("Expected file node at {0}")]
    NotAFile(String),
}

/// Lazily fetched file content
pub type ContentStream = BoxStream<'static, Result<Vec<u8>, ExportError>>;

/// One exported file, directory or document
pub struct ExportEntry {
    /// Path starting at the last resolved segment
    pub path: String,
    pub hash: Hash,
    pub kind: NodeKind,
    /// File bytes for files, total size of children for directories,
    /// zero for documents
    pub size: u64,
    /// Content of files; `None` for directories and documents
    pub content: Option<ContentStream>,
}

impl ExportEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Read the whole content into memory (empty for non-files)
    pub async fn read_to_end(self) -> Result<Vec<u8>, ExportError> {
        let Some(content) = self.content else {
            return Ok(Vec::new());
        };
        let chunks: Vec<Vec<u8>> = content.try_collect().await?;
        Ok(chunks.concat())
    }
}

impl fmt::Debug for ExportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportEntry")
            .field("path", &self.path)
            .field("hash", &to_hex(&self.hash))
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("content", &self.content.is_some())
            .finish()
    }
}

async fn fetch<S: Store>(store: &S, hash: &Hash) -> Result<Option<Node>, ExportError> {
    match store.get(hash).await? {
        Some(data) if !verify(hash, &data) => {
            warn!(hash = %to_hex(hash), "stored bytes do not match address");
            Err(ExportError::HashMismatch(to_hex(hash)))
        }
        Some(data) => Ok(Some(decode_node(&data)?)),
        None => Ok(None),
    }
}

enum Pending {
    Node(FileNode),
    Link(Hash),
}

/// Stream a file's payloads in byte order, fetching nodes on demand
fn file_content<S: Store + 'static>(store: Arc<S>, path: String, root: FileNode) -> ContentStream {
    let stack = vec![Pending::Node(root)];
    stream::unfold(Some((store, stack)), move |state| {
        let path = path.clone();
        async move {
            let (store, mut stack) = state?;
            loop {
                let file = match stack.pop()? {
                    Pending::Node(file) => file,
                    Pending::Link(hash) => match fetch(store.as_ref(), &hash).await {
                        Ok(Some(Node::File(file))) => file,
                        Ok(Some(_)) => return Some((Err(ExportError::NotAFile(path)), None)),
                        Ok(None) => {
                            return Some((Err(ExportError::MissingChunk(to_hex(&hash))), None))
                        }
                        Err(e) => return Some((Err(e), None)),
                    },
                };
                stack.extend(file.links.iter().rev().map(|l| Pending::Link(l.hash)));
                if !file.data.is_empty() {
                    return Some((Ok(file.data), Some((store, stack))));
                }
            }
        }
    })
    .boxed()
}

fn entry<S: Store + 'static>(store: &Arc<S>, path: String, hash: Hash, node: Node) -> ExportEntry {
    match node {
        Node::File(file) => ExportEntry {
            size: file.file_size,
            content: Some(file_content(store.clone(), path.clone(), file)),
            path,
            hash,
            kind: NodeKind::File,
        },
        Node::Directory(dir) => ExportEntry {
            size: dir.links_size(),
            content: None,
            path,
            hash,
            kind: NodeKind::Directory,
        },
        Node::Document(_) => ExportEntry {
            size: 0,
            content: None,
            path,
            hash,
            kind: NodeKind::Document,
        },
    }
}

/// Node at the end of a resolved path
struct Resolved {
    hash: Hash,
    path: String,
    node: Node,
}

enum Walk {
    Resolve(String),
    Descend(Vec<(String, Hash)>),
}

/// Reads files and directories back out of a store
pub struct Exporter<S: Store> {
    store: Arc<S>,
}

impl<S: Store + 'static> Exporter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn resolve(store: &S, target: &str) -> Result<Option<Resolved>, ExportError> {
        let mut segments = target.split('/').filter(|s| !s.is_empty());
        let Some(address) = segments.next() else {
            return Ok(None);
        };
        let Ok(mut hash) = from_hex(address) else {
            debug!(path = %target, "not a valid address");
            return Ok(None);
        };
        let rest: Vec<&str> = segments.collect();
        let mut remaining = rest.as_slice();
        let mut path = address.to_string();

        loop {
            let Some(node) = fetch(store, &hash).await? else {
                debug!(path = %target, hash = %to_hex(&hash), "node not found");
                return Ok(None);
            };
            if remaining.is_empty() {
                return Ok(Some(Resolved { hash, path, node }));
            }
            let Some((link, consumed)) = node.resolve_link(remaining) else {
                debug!(path = %target, segment = remaining[0], "no matching link");
                return Ok(None);
            };
            hash = link.hash;
            path = remaining[consumed - 1].to_string();
            remaining = &remaining[consumed..];
        }
    }

    /// Resolve `target` (`HEX_ADDRESS[/seg...]`) and stream its entries
    pub fn export(&self, target: &str) -> BoxStream<'static, Result<ExportEntry, ExportError>> {
        let store = self.store.clone();
        stream::unfold(
            Some(Walk::Resolve(target.to_string())),
            move |state| {
                let store = store.clone();
                async move {
                    match state? {
                        Walk::Resolve(target) => {
                            let resolved = match Self::resolve(&store, &target).await {
                                Ok(Some(resolved)) => resolved,
                                Ok(None) => return None,
                                Err(e) => return Some((Err(e), None)),
                            };
                            let mut stack = Vec::new();
                            if let Node::Directory(dir) = &resolved.node {
                                for link in dir.links.iter().rev() {
                                    stack.push((format!("{}/{}", resolved.path, link.name), link.hash));
                                }
                            }
                            let entry = entry(&store, resolved.path, resolved.hash, resolved.node);
                            Some((Ok(entry), Some(Walk::Descend(stack))))
                        }
                        Walk::Descend(mut stack) => {
                            let (path, hash) = stack.pop()?;
                            let node = match fetch(store.as_ref(), &hash).await {
                                Ok(Some(node)) => node,
                                Ok(None) => {
                                    warn!(path = %path, hash = %to_hex(&hash), "missing directory child");
                                    let err = ExportError::MissingNode {
                                        path,
                                        hash: to_hex(&hash),
                                    };
                                    return Some((Err(err), None));
                                }
                                Err(e) => return Some((Err(e), None)),
                            };
                            if let Node::Directory(dir) = &node {
                                for link in dir.links.iter().rev() {
                                    stack.push((format!("{}/{}", path, link.name), link.hash));
                                }
                            }
                            let entry = entry(&store, path, hash, node);
                            Some((Ok(entry), Some(Walk::Descend(stack))))
                        }
                    }
                }
            },
        )
        .boxed()
    }

    /// Export and collect every entry
    pub async fn export_all(&self, target: &str) -> Result<Vec<ExportEntry>, ExportError> {
        self.export(target).try_collect().await
    }

    /// Read the content of the file at `target`; `None` if nothing resolves
    /// or the target is not a file
    pub async fn read_file(&self, target: &str) -> Result<Option<Vec<u8>>, ExportError> {
        let Some(resolved) = Self::resolve(&self.store, target).await? else {
            return Ok(None);
        };
        match resolved.node {
            Node::File(_) => {
                let entry = entry(&self.store, resolved.path, resolved.hash, resolved.node);
                Ok(Some(entry.read_to_end().await?))
            }
            _ => Ok(None),
        }
    }
}
