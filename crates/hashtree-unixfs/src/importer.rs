//! Importing file entries into a merkle DAG
//!
//! Each file entry runs through chunker -> leaf encoder -> reducer on its
//! own future; up to `concurrency` files are in flight at once. Directories
//! wait in an arena keyed by path: registering a child reserves a link slot,
//! so link order follows input order whatever order files finish in. Once
//! input is exhausted a directory is written as soon as its last child is,
//! which cascades up to the top.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Fuse, FuturesUnordered, Stream, StreamExt, TryStreamExt};
use tracing::{debug, trace, warn};

use crate::chunker::chunk_stream;
use crate::codec::{node_size, CodecError};
use crate::config::ImportOptions;
use crate::leaf::encode_leaves;
use crate::node::{DirectoryNode, Node};
use crate::reducer::Reducer;
use crate::store::{Store, StoreError};
use crate::types::{to_hex, FileContent, FileEntry, Link, NodeDescriptor};
use crate::writer::NodeWriter;

/// Import error type
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Invalid entry {path:?}: {reason}")]
    Input { path: String, reason: String },
    #[error("Failed to read content of {path:?}: {source}")]
    Source {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Tree reduction produced {roots} roots, expected exactly one")]
    ReduceInvariant { roots: usize },
    #[error("Invalid import options: {0}")]
    Config(String),
}

impl ImportError {
    fn input(path: &str, reason: impl Into<String>) -> Self {
        ImportError::Input {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn read_failed(path: &str, source: io::Error) -> Self {
        ImportError::Source {
            path: path.to_string(),
            source,
        }
    }

    /// Whether the error was caused by the entries given to the import
    pub fn is_input_error(&self) -> bool {
        matches!(self, ImportError::Input { .. } | ImportError::Source { .. })
    }
}

/// Normalize an entry path: strip surrounding slashes, collapse repeated
/// ones, reject empty paths and `.`/`..` segments
fn normalize_path(path: &str) -> Result<String, ImportError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(ImportError::input(path, "empty path"));
    }
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(ImportError::input(path, "relative segments are not allowed"));
    }
    Ok(segments.join("/"))
}

fn split_parent(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (Some(parent), name),
        None => (None, path),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind {
    File,
    Directory,
}

/// Reserved link slot in a pending directory
#[derive(Debug, Clone)]
struct Slot {
    parent: String,
    index: usize,
    name: String,
}

#[derive(Debug, Default)]
struct PendingDirectory {
    /// Where this directory links into its parent; `None` at top level
    slot: Option<Slot>,
    links: Vec<Option<Link>>,
    children: HashMap<String, ChildKind>,
    pending: usize,
}

/// Directories still waiting for children, keyed by normalized path
///
/// The wrapping root directory, when enabled, lives at path `""`.
#[derive(Debug, Default)]
struct DirectoryArena {
    dirs: HashMap<String, PendingDirectory>,
    top_level: HashMap<String, ChildKind>,
    wrapped: bool,
    sealed: bool,
    ready: VecDeque<String>,
}

impl DirectoryArena {
    fn new(wrapped: bool) -> Self {
        let mut arena = Self {
            wrapped,
            ..Self::default()
        };
        if wrapped {
            arena
                .dirs
                .insert(String::new(), PendingDirectory::default());
        }
        arena
    }

    fn parent_dir<'p>(&self, parent: Option<&'p str>) -> Option<&'p str> {
        match parent {
            Some(parent) => Some(parent),
            None if self.wrapped => Some(""),
            None => None,
        }
    }

    /// Register `name` under `parent`; reserves a slot when the parent is a
    /// pending directory
    fn register(
        &mut self,
        path: &str,
        parent: Option<&str>,
        name: &str,
        kind: ChildKind,
    ) -> Result<Option<Slot>, ImportError> {
        let Some(parent) = self.parent_dir(parent) else {
            if let Some(existing) = self.top_level.insert(name.to_string(), kind) {
                return Err(conflict(path, existing, kind));
            }
            return Ok(None);
        };

        let dir = self
            .dirs
            .get_mut(parent)
            .ok_or_else(|| ImportError::input(path, "parent directory already written"))?;
        if let Some(existing) = dir.children.insert(name.to_string(), kind) {
            return Err(conflict(path, existing, kind));
        }
        dir.links.push(None);
        dir.pending += 1;
        Ok(Some(Slot {
            parent: parent.to_string(),
            index: dir.links.len() - 1,
            name: name.to_string(),
        }))
    }

    /// Make sure a pending directory exists at `path` and every ancestor
    fn ensure_dir(&mut self, path: &str) -> Result<(), ImportError> {
        if self.dirs.contains_key(path) {
            return Ok(());
        }
        let (parent, name) = split_parent(path);
        if let Some(parent) = parent {
            self.ensure_dir(parent)?;
        }
        let slot = self.register(path, parent, name, ChildKind::Directory)?;
        self.dirs.insert(
            path.to_string(),
            PendingDirectory {
                slot,
                ..PendingDirectory::default()
            },
        );
        Ok(())
    }

    fn register_file(&mut self, path: &str) -> Result<Option<Slot>, ImportError> {
        let (parent, name) = split_parent(path);
        if let Some(parent) = parent {
            self.ensure_dir(parent)?;
        }
        self.register(path, parent, name, ChildKind::File)
    }

    fn fill(&mut self, slot: &Slot, link: Link) {
        let Some(dir) = self.dirs.get_mut(&slot.parent) else {
            warn!(parent = %slot.parent, "link for unknown directory");
            return;
        };
        if let Some(entry) = dir.links.get_mut(slot.index) {
            if entry.replace(link).is_none() {
                dir.pending -= 1;
            }
        }
        if self.sealed && dir.pending == 0 {
            self.ready.push_back(slot.parent.clone());
        }
    }

    /// No more entries will arrive; every complete directory becomes ready
    fn seal(&mut self) {
        self.sealed = true;
        let mut complete: Vec<String> = self
            .dirs
            .iter()
            .filter(|(_, dir)| dir.pending == 0)
            .map(|(path, _)| path.clone())
            .collect();
        complete.sort();
        self.ready.extend(complete);
    }

    fn next_ready(&mut self) -> Option<(String, PendingDirectory)> {
        while let Some(path) = self.ready.pop_front() {
            if let Some(dir) = self.dirs.remove(&path) {
                return Some((path, dir));
            }
        }
        None
    }

    fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

fn conflict(path: &str, existing: ChildKind, kind: ChildKind) -> ImportError {
    match (existing, kind) {
        (ChildKind::File, ChildKind::File) => ImportError::input(path, "duplicate path"),
        (ChildKind::Directory, ChildKind::Directory) => {
            ImportError::input(path, "duplicate directory")
        }
        _ => ImportError::input(path, "path used as both file and directory"),
    }
}

type FileJob = BoxFuture<'static, Result<(Option<Slot>, NodeDescriptor), ImportError>>;

/// Chunk, encode and reduce one file
async fn import_content<S: Store>(
    writer: Arc<NodeWriter<S>>,
    options: ImportOptions,
    path: String,
    content: FileContent,
) -> Result<NodeDescriptor, ImportError> {
    let chunks = chunk_stream(
        content.into_fragments(),
        options.chunk_strategy,
        options.max_chunk_size,
    );
    let writer: &NodeWriter<S> = &writer;
    let leaves = std::pin::pin!(encode_leaves(writer, &path, chunks));
    let reducer = Reducer::new(
        writer,
        &path,
        options.tree_strategy,
        options.max_links,
        options.layer_repeat,
    );
    let root = reducer.reduce(leaves).await?;

    debug!(
        path = %root.path,
        hash = %to_hex(&root.hash),
        size = root.size,
        bytes = root.leaf_size.unwrap_or(0),
        "imported file"
    );
    Ok(root)
}

/// State of one running import
struct ImportRun<S: Store> {
    writer: Arc<NodeWriter<S>>,
    options: ImportOptions,
    entries: Fuse<BoxStream<'static, FileEntry>>,
    input_done: bool,
    finished: bool,
    active: FuturesUnordered<FileJob>,
    arena: DirectoryArena,
    output: VecDeque<NodeDescriptor>,
    emitted: usize,
}

impl<S: Store + 'static> ImportRun<S> {
    fn accept(&mut self, entry: FileEntry) -> Result<(), ImportError> {
        let path = normalize_path(&entry.path)?;
        match entry.content {
            None => {
                trace!(path = %path, "directory entry");
                self.arena.ensure_dir(&path)
            }
            Some(content) => {
                let slot = self.arena.register_file(&path)?;
                let content = import_content(self.writer.clone(), self.options.clone(), path, content);
                let job: FileJob = Box::pin(async move {
                    let descriptor = content.await?;
                    Ok((slot, descriptor))
                });
                self.active.push(job);
                Ok(())
            }
        }
    }

    fn file_done(&mut self, slot: Option<Slot>, mut descriptor: NodeDescriptor) {
        if let Some(slot) = slot {
            descriptor.name = slot.name.clone();
            self.arena.fill(&slot, descriptor.link(slot.name.as_str()));
        }
        self.output.push_back(descriptor);
    }

    async fn flush_directories(&mut self) -> Result<(), ImportError> {
        while let Some((path, dir)) = self.arena.next_ready() {
            let links: Vec<Link> = dir.links.into_iter().flatten().collect();
            let entries = links.len();
            let node = Node::Directory(DirectoryNode::new(links));
            let (hash, encoded_len) = self.writer.write(&node).await?;

            let name = dir.slot.as_ref().map(|s| s.name.clone()).unwrap_or_default();
            let descriptor = NodeDescriptor {
                path,
                hash,
                size: node_size(encoded_len, &node.links()),
                leaf_size: None,
                name,
            };
            debug!(
                path = %descriptor.path,
                hash = %to_hex(&descriptor.hash),
                entries,
                size = descriptor.size,
                "wrote directory"
            );

            if let Some(slot) = &dir.slot {
                self.arena.fill(slot, descriptor.link(slot.name.as_str()));
            }
            self.output.push_back(descriptor);
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.finished = true;
        self.active = FuturesUnordered::new();
        self.output.clear();
    }

    async fn next(&mut self) -> Option<Result<NodeDescriptor, ImportError>> {
        loop {
            if let Some(descriptor) = self.output.pop_front() {
                self.emitted += 1;
                return Some(Ok(descriptor));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.flush_directories().await {
                self.abort();
                return Some(Err(e));
            }
            if !self.output.is_empty() {
                continue;
            }
            if self.input_done && self.active.is_empty() {
                if !self.arena.is_empty() {
                    warn!("import finished with unwritten directories");
                }
                debug!(descriptors = self.emitted, "import finished");
                self.finished = true;
                continue;
            }

            let accepting = !self.input_done && self.active.len() < self.options.concurrency;
            tokio::select! {
                biased;
                Some(result) = self.active.next(), if !self.active.is_empty() => match result {
                    Ok((slot, descriptor)) => self.file_done(slot, descriptor),
                    Err(e) => {
                        self.abort();
                        return Some(Err(e));
                    }
                },
                entry = self.entries.next(), if accepting => match entry {
                    Some(entry) => {
                        if let Err(e) = self.accept(entry) {
                            self.abort();
                            return Some(Err(e));
                        }
                    }
                    None => {
                        self.input_done = true;
                        self.arena.seal();
                    }
                },
                else => self.finished = true,
            }
        }
    }
}

/// Imports file entries into a store
pub struct Importer<S: Store> {
    store: Arc<S>,
    options: ImportOptions,
}

impl<S: Store + 'static> Importer<S> {
    pub fn new(store: Arc<S>, options: ImportOptions) -> Self {
        Self { store, options }
    }

    /// Import a stream of entries
    ///
    /// Yields one descriptor per file root and per directory; a directory
    /// always comes after its children. The first error ends the stream.
    pub fn import<E>(&self, entries: E) -> BoxStream<'static, Result<NodeDescriptor, ImportError>>
    where
        E: Stream<Item = FileEntry> + Send + 'static,
    {
        if let Err(e) = self.options.validate() {
            return stream::once(async move { Err(e) }).boxed();
        }

        let run = ImportRun {
            writer: Arc::new(NodeWriter::new(self.store.clone(), self.options.only_hash)),
            options: self.options.clone(),
            entries: entries.boxed().fuse(),
            input_done: false,
            finished: false,
            active: FuturesUnordered::new(),
            arena: DirectoryArena::new(self.options.wrap_with_directory),
            output: VecDeque::new(),
            emitted: 0,
        };

        stream::unfold(run, |mut run| async move {
            let item = run.next().await?;
            Some((item, run))
        })
        .boxed()
    }

    /// Import entries and collect every descriptor
    pub async fn import_all<I>(&self, entries: I) -> Result<Vec<NodeDescriptor>, ImportError>
    where
        I: IntoIterator<Item = FileEntry>,
        I::IntoIter: Send + 'static,
    {
        self.import(stream::iter(entries)).try_collect().await
    }

    /// Import a single file and return the last descriptor emitted: the
    /// outermost entry containing the file. That is the file root for a
    /// top-level path, the top-level directory for a nested path such as
    /// `a/b.txt`, or the wrapping directory when `wrap_with_directory` is set
    pub async fn import_file(
        &self,
        path: &str,
        content: impl Into<FileContent>,
    ) -> Result<NodeDescriptor, ImportError> {
        let entry = FileEntry::file(path, content);
        let mut descriptors = self.import_all([entry]).await?;
        descriptors
            .pop()
            .ok_or(ImportError::ReduceInvariant { roots: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::store::MemoryStore;
    use crate::types::Hash;

    fn importer(options: ImportOptions) -> (Arc<MemoryStore>, Importer<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Importer::new(store, options))
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a//b/").unwrap(), "a/b");
        assert!(normalize_path("").is_err());
        assert!(normalize_path("///").is_err());
        assert!(normalize_path("a/../b").is_err());
        assert!(normalize_path("./a").is_err());
    }

    #[tokio::test]
    async fn test_small_file_single_descriptor() {
        let (store, importer) = importer(ImportOptions::default());
        let root = importer.import_file("200Bytes.txt", vec![7u8; 200]).await.unwrap();

        assert_eq!(root.path, "200Bytes.txt");
        assert_eq!(root.leaf_size, Some(200));
        assert_eq!(root.name, "");
        assert_eq!(store.size(), 1);
        assert_eq!(root.size, store.total_bytes() as u64);
    }

    #[tokio::test]
    async fn test_import_file_returns_outermost_entry() {
        let (_, importer) = importer(ImportOptions::default());
        let top = importer.import_file("a/b.txt", b"b".as_slice()).await.unwrap();
        assert_eq!(top.path, "a");
        assert_eq!(top.leaf_size, None);

        let (_, importer) = self::importer(ImportOptions::default().wrap_with_directory());
        let wrapper = importer.import_file("b.txt", b"b".as_slice()).await.unwrap();
        assert_eq!(wrapper.path, "");
    }

    #[tokio::test]
    async fn test_nested_file_emits_parents_after_children() {
        let (store, importer) = importer(ImportOptions::default());
        let descriptors = importer
            .import_all([FileEntry::file("foo/bar/200Bytes.txt", vec![1u8; 200])])
            .await
            .unwrap();

        let paths: Vec<&str> = descriptors.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["foo/bar/200Bytes.txt", "foo/bar", "foo"]);
        assert_eq!(descriptors[0].name, "200Bytes.txt");
        assert_eq!(descriptors[1].name, "bar");
        assert_eq!(descriptors[2].name, "");
        assert_eq!(descriptors[1].leaf_size, None);

        let bar_encoded = store.get(&descriptors[1].hash).await.unwrap().unwrap();
        assert_eq!(
            descriptors[1].size,
            descriptors[0].size + bar_encoded.len() as u64
        );
        assert_eq!(descriptors[2].size, store.total_bytes() as u64);
    }

    #[tokio::test]
    async fn test_directory_links_follow_input_order() {
        let (store, importer) = importer(ImportOptions::default().with_chunk_size(16));
        let descriptors = importer
            .import_all([
                FileEntry::file("d/zzz-large", vec![1u8; 4000]),
                FileEntry::directory("d/empty"),
                FileEntry::file("d/aaa-small", b"x".as_slice()),
            ])
            .await
            .unwrap();

        let dir = descriptors.iter().find(|d| d.path == "d").unwrap();
        let bytes = store.get(&dir.hash).await.unwrap().unwrap();
        let names: Vec<String> = crate::codec::decode_node(&bytes)
            .unwrap()
            .links()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["zzz-large", "empty", "aaa-small"]);
        assert_eq!(descriptors.last().map(|d| d.path.as_str()), Some("d"));
    }

    #[tokio::test]
    async fn test_explicit_directory_entry_is_not_duplicated() {
        let (_, importer) = importer(ImportOptions::default());
        let descriptors = importer
            .import_all([
                FileEntry::directory("a"),
                FileEntry::directory("a/b"),
                FileEntry::file("a/b/c.txt", b"c".as_slice()),
            ])
            .await
            .unwrap();

        let mut paths: Vec<&str> = descriptors.iter().map(|d| d.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["a", "a/b", "a/b/c.txt"]);
    }

    #[tokio::test]
    async fn test_rejects_bad_entries() {
        let cases = vec![
            vec![FileEntry::file("", b"x".as_slice())],
            vec![FileEntry::file("a/../b", b"x".as_slice())],
            vec![
                FileEntry::file("a.txt", b"x".as_slice()),
                FileEntry::file("a.txt", b"y".as_slice()),
            ],
            vec![
                FileEntry::file("a", b"x".as_slice()),
                FileEntry::file("a/b", b"y".as_slice()),
            ],
            vec![
                FileEntry::directory("a"),
                FileEntry::file("a", b"y".as_slice()),
            ],
        ];

        for entries in cases {
            let (_, importer) = importer(ImportOptions::default());
            let err = importer.import_all(entries).await.unwrap_err();
            assert!(err.is_input_error(), "unexpected error: {}", err);
        }
    }

    #[tokio::test]
    async fn test_invalid_options_fail_fast() {
        let (_, importer) = importer(ImportOptions::default().with_max_links(1));
        let err = importer.import_all(Vec::new()).await.unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_input_yields_nothing() {
        let (store, importer) = importer(ImportOptions::default());
        let descriptors = importer.import_all(Vec::new()).await.unwrap();
        assert!(descriptors.is_empty());
        assert_eq!(store.size(), 0);
    }

    #[tokio::test]
    async fn test_wrap_with_directory() {
        let (_, importer) = importer(ImportOptions::default().wrap_with_directory());
        let descriptors = importer
            .import_all([
                FileEntry::file("a.txt", b"a".as_slice()),
                FileEntry::file("b.txt", b"b".as_slice()),
            ])
            .await
            .unwrap();

        assert_eq!(descriptors.len(), 3);
        let root = descriptors.last().unwrap();
        assert_eq!(root.path, "");
        assert_eq!(root.name, "");
        assert!(descriptors[..2].iter().all(|d| !d.name.is_empty()));
    }

    #[tokio::test]
    async fn test_only_hash_writes_nothing_but_matches() {
        let entries = || {
            vec![
                FileEntry::file("dir/one", vec![3u8; 5000]),
                FileEntry::file("dir/two", vec![4u8; 10]),
            ]
        };
        let options = ImportOptions::default().with_chunk_size(1024);

        let (store, importer) = importer(options.clone().only_hash());
        let hashed = importer.import_all(entries()).await.unwrap();
        assert_eq!(store.size(), 0);

        let (_, importer) = self::importer(options);
        let written = importer.import_all(entries()).await.unwrap();

        let root_of = |ds: &[NodeDescriptor]| ds.iter().find(|d| d.path == "dir").map(|d| d.hash);
        assert_eq!(root_of(&hashed), root_of(&written));
    }

    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn put(&self, _hash: Hash, _data: Vec<u8>) -> Result<bool, StoreError> {
            Err(StoreError::Other("disk full".into()))
        }
        async fn get(&self, _hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }
        async fn has(&self, _hash: &Hash) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn delete(&self, _hash: &Hash) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_store_failure_aborts_import() {
        let importer = Importer::new(Arc::new(FailingStore), ImportOptions::default());
        let results: Vec<_> = importer
            .import(stream::iter(vec![
                FileEntry::file("a", b"a".as_slice()),
                FileEntry::file("b", b"b".as_slice()),
            ]))
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ImportError::Store(_))));
    }
}
