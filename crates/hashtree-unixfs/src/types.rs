//! Shared types for importing and exporting merkle DAGs
//!
//! Core principle: every node is stored as SHA256(encode(node)) -> encode(node),
//! so the store stays a plain content-addressed KV.

use std::fmt;
use std::io;

use futures::future;
use futures::io::{AsyncRead, AsyncReadExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};

/// 32-byte SHA256 hash used as content address
pub type Hash = [u8; 32];

/// Convert hash to hex string
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Convert hex string to hash
pub fn from_hex(hex_str: &str) -> Result<Hash, hex::FromHexError> {
    let bytes = hex::decode(hex_str)?;
    bytes
        .try_into()
        .map_err(|_| hex::FromHexError::InvalidStringLength)
}

/// A named, sized reference from a directory or file node to a child node
///
/// File nodes leave `name` empty; link order is byte order.
/// Directory links carry the entry name; link order is insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Address of the child node
    pub hash: Hash,
    /// Link name (empty for file chunks)
    pub name: String,
    /// Cumulative encoded size of the child's subtree
    pub size: u64,
}

impl Link {
    pub fn new(hash: Hash) -> Self {
        Self {
            hash,
            name: String::new(),
            size: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

/// Output unit of an import: one per file root and per directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Entry path as given to the importer (normalized)
    pub path: String,
    /// Address of the persisted node
    pub hash: Hash,
    /// Cumulative encoded size of the node and everything below it
    pub size: u64,
    /// Raw file bytes represented by the node. `None` for directories
    /// and for intermediate file tree nodes.
    pub leaf_size: Option<u64>,
    /// Link name used by the parent directory; empty for top-level entries
    pub name: String,
}

impl NodeDescriptor {
    /// Link to this node under the given name
    pub fn link(&self, name: impl Into<String>) -> Link {
        Link::new(self.hash).with_name(name).with_size(self.size)
    }
}

/// Stream of raw content fragments; fragment boundaries are arbitrary
pub type ByteStream = BoxStream<'static, io::Result<Vec<u8>>>;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Content source of a file entry
pub enum FileContent {
    /// Whole content in memory
    Bytes(Vec<u8>),
    /// Content delivered as a stream of fragments
    Stream(ByteStream),
    /// Content pulled from an async reader
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl FileContent {
    /// Convert any content source into a fragment stream
    pub fn into_fragments(self) -> ByteStream {
        match self {
            FileContent::Bytes(bytes) => stream::once(future::ready(Ok(bytes))).boxed(),
            FileContent::Stream(fragments) => fragments,
            FileContent::Reader(reader) => read_fragments(reader),
        }
    }
}

fn read_fragments(reader: Box<dyn AsyncRead + Send + Unpin>) -> ByteStream {
    stream::unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        match reader.read(&mut buffer).await {
            Ok(0) => None,
            Ok(n) => {
                buffer.truncate(n);
                Some((Ok(buffer), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileContent::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            FileContent::Stream(_) => write!(f, "Stream"),
            FileContent::Reader(_) => write!(f, "Reader"),
        }
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        FileContent::Bytes(bytes)
    }
}

impl From<&[u8]> for FileContent {
    fn from(bytes: &[u8]) -> Self {
        FileContent::Bytes(bytes.to_vec())
    }
}

impl From<ByteStream> for FileContent {
    fn from(fragments: ByteStream) -> Self {
        FileContent::Stream(fragments)
    }
}

/// Input unit of an import
///
/// `content: None` marks a directory. Intermediate path segments imply
/// parent directories.
#[derive(Debug)]
pub struct FileEntry {
    pub path: String,
    pub content: Option<FileContent>,
}

impl FileEntry {
    /// File entry with in-memory or streamed content
    pub fn file(path: impl Into<String>, content: impl Into<FileContent>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
        }
    }

    /// File entry whose content arrives as a fragment stream
    pub fn stream<S>(path: impl Into<String>, fragments: S) -> Self
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        Self::file(path, FileContent::Stream(fragments.boxed()))
    }

    /// File entry read from an async reader
    pub fn reader<R>(path: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::file(path, FileContent::Reader(Box::new(reader)))
    }

    /// Directory entry
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.content.is_none()
    }
}
