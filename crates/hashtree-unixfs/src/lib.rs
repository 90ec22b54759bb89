//! hashtree-unixfs - import and export files over a content-addressed merkle DAG
//!
//! Files are split into chunks, each chunk is stored as a leaf node, and
//! leaves are combined into a tree of bounded fan-out. Directories link to
//! their children by name. Every node is stored as
//! SHA256(encode(node)) -> encode(node), so equal content always gets the
//! same address.
//!
//! # Core Concepts
//!
//! - **Importer**: turns a stream of [`FileEntry`] values into persisted nodes
//!   and yields one [`NodeDescriptor`] per file root and directory
//! - **Exporter**: resolves `HEX_ADDRESS[/path]` and streams back directory
//!   listings and lazy file content
//! - **Store**: the content-addressed key-value seam ([`MemoryStore`] built in)
//! - **Documents**: structured nodes written by other tools; their
//!   `{"/": "<hex>"}` links can be traversed like directory entries
//!
//! # Example
//!
//! ```rust
//! use hashtree_unixfs::{to_hex, Exporter, FileEntry, ImportOptions, Importer, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!
//!     let importer = Importer::new(store.clone(), ImportOptions::default());
//!     let descriptors = importer
//!         .import_all([FileEntry::file("docs/hello.txt", b"Hello, World!".as_slice())])
//!         .await?;
//!     let root = descriptors.last().unwrap();
//!     assert_eq!(root.path, "docs");
//!
//!     let exporter = Exporter::new(store);
//!     let data = exporter
//!         .read_file(&format!("{}/hello.txt", to_hex(&root.hash)))
//!         .await?;
//!     assert_eq!(data, Some(b"Hello, World!".to_vec()));
//!
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod codec;
pub mod config;
pub mod exporter;
pub mod hash;
pub mod importer;
pub mod leaf;
pub mod node;
pub mod reducer;
pub mod store;
pub mod types;
pub mod writer;

// Re-exports for convenience
pub use chunker::{chunk_stream, ChunkStrategy};
pub use codec::{decode_node, encode_and_hash, encode_node, node_size, CodecError};
pub use config::{ImportOptions, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LINKS};
pub use exporter::{ContentStream, ExportEntry, ExportError, Exporter};
pub use hash::{sha256, verify};
pub use importer::{ImportError, Importer};
pub use node::{DirectoryNode, DocumentNode, FileNode, NamedLinks, Node, NodeKind};
pub use reducer::TreeStrategy;
pub use store::{MemoryStore, Store, StoreError};
pub use types::{from_hex, to_hex, FileContent, FileEntry, Hash, Link, NodeDescriptor};
