//! Node model
//!
//! Three kinds of node live in the DAG:
//! - file nodes: a leaf carries raw payload, an internal node links to
//!   further file nodes in byte order and records per-link file sizes
//! - directory nodes: named links, never payload
//! - document nodes: an arbitrary structured value; nested `{"/": "<hex>"}`
//!   objects are links to other nodes
//!
//! Path resolution only needs named links, so every kind implements
//! [`NamedLinks`] and the exporter never matches on the concrete kind to
//! descend.

use serde_json::{Map, Value};

use crate::types::{from_hex, to_hex, Hash, Link};

/// Key marking a link object inside a document
pub const DOCUMENT_LINK_KEY: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
    Document,
}

/// File node: a leaf (payload, no links) or an internal node (links to
/// file nodes in byte order)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileNode {
    /// Raw payload carried directly by this node
    pub data: Vec<u8>,
    /// File bytes represented by this node and everything below it
    pub file_size: u64,
    /// File bytes under each link, parallel to `links`
    pub block_sizes: Vec<u64>,
    pub links: Vec<Link>,
}

impl FileNode {
    pub fn leaf(data: Vec<u8>) -> Self {
        Self {
            file_size: data.len() as u64,
            data,
            block_sizes: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Internal node over `(link, file bytes under link)` pairs
    pub fn internal(children: impl IntoIterator<Item = (Link, u64)>) -> Self {
        let (links, block_sizes): (Vec<Link>, Vec<u64>) = children.into_iter().unzip();
        Self {
            data: Vec::new(),
            file_size: block_sizes.iter().sum(),
            block_sizes,
            links,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.links.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryNode {
    pub links: Vec<Link>,
}

impl DirectoryNode {
    pub fn new(links: Vec<Link>) -> Self {
        Self { links }
    }

    /// Sum of child subtree sizes
    pub fn links_size(&self) -> u64 {
        self.links.iter().map(|l| l.size).sum()
    }
}

/// Structured node written by some other application
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentNode {
    pub value: Value,
}

impl DocumentNode {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Value to embed in a document to link to `hash`
    pub fn link_value(hash: &Hash) -> Value {
        let mut map = Map::new();
        map.insert(DOCUMENT_LINK_KEY.to_string(), Value::String(to_hex(hash)));
        Value::Object(map)
    }
}

fn as_link(value: &Value) -> Option<Hash> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let target = map.get(DOCUMENT_LINK_KEY)?.as_str()?;
    from_hex(target).ok()
}

fn collect_document_links(value: &Value, prefix: &str, out: &mut Vec<Link>) {
    if let Some(hash) = as_link(value) {
        out.push(Link::new(hash).with_name(prefix));
        return;
    }

    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", prefix, key)
        }
    };

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                collect_document_links(child, &join(key), out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                collect_document_links(child, &join(&index.to_string()), out);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    File(FileNode),
    Directory(DirectoryNode),
    Document(DocumentNode),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File(_) => NodeKind::File,
            Node::Directory(_) => NodeKind::Directory,
            Node::Document(_) => NodeKind::Document,
        }
    }

    /// Links in storage order, named or not
    pub fn links(&self) -> Vec<Link> {
        match self {
            Node::File(file) => file.links.clone(),
            Node::Directory(dir) => dir.links.clone(),
            Node::Document(doc) => doc.named_links(),
        }
    }
}

/// Capability used by path resolution
pub trait NamedLinks {
    /// Links reachable by name. Names may contain `/` when a single link
    /// spans several path segments.
    fn named_links(&self) -> Vec<Link>;

    /// Find the link matching the most leading `segments`.
    ///
    /// Returns the link and how many segments it consumed.
    fn resolve_link(&self, segments: &[&str]) -> Option<(Link, usize)> {
        let mut best: Option<(Link, usize)> = None;
        for link in self.named_links() {
            if link.name.is_empty() {
                continue;
            }
            let parts: Vec<&str> = link.name.split('/').collect();
            let matches = parts.len() <= segments.len()
                && parts.iter().zip(segments).all(|(part, segment)| part == segment);
            if matches && best.as_ref().map_or(true, |(_, n)| parts.len() > *n) {
                let consumed = parts.len();
                best = Some((link, consumed));
            }
        }
        best
    }
}

impl NamedLinks for FileNode {
    fn named_links(&self) -> Vec<Link> {
        Vec::new()
    }
}

impl NamedLinks for DirectoryNode {
    fn named_links(&self) -> Vec<Link> {
        self.links.clone()
    }
}

impl NamedLinks for DocumentNode {
    fn named_links(&self) -> Vec<Link> {
        let mut links = Vec::new();
        collect_document_links(&self.value, "", &mut links);
        links
    }
}

impl NamedLinks for Node {
    fn named_links(&self) -> Vec<Link> {
        match self {
            Node::File(file) => file.named_links(),
            Node::Directory(dir) => dir.named_links(),
            Node::Document(doc) => doc.named_links(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_internal_node_sizes() {
        let node = FileNode::internal(vec![
            (Link::new([1u8; 32]).with_size(120), 100),
            (Link::new([2u8; 32]).with_size(70), 50),
        ]);

        assert_eq!(node.file_size, 150);
        assert_eq!(node.block_sizes, vec![100, 50]);
        assert_eq!(node.links.len(), 2);
        assert!(!node.is_leaf());
        assert!(FileNode::leaf(vec![1, 2, 3]).is_leaf());
    }

    #[test]
    fn test_file_nodes_have_no_named_links() {
        let node = FileNode::internal(vec![(Link::new([1u8; 32]), 10)]);
        assert!(node.named_links().is_empty());
        assert!(node.resolve_link(&["anything"]).is_none());
    }

    #[test]
    fn test_directory_resolves_single_segment() {
        let dir = DirectoryNode::new(vec![
            Link::new([1u8; 32]).with_name("a.txt"),
            Link::new([2u8; 32]).with_name("sub"),
        ]);

        let (link, consumed) = dir.resolve_link(&["sub", "deeper"]).unwrap();
        assert_eq!(link.hash, [2u8; 32]);
        assert_eq!(consumed, 1);
        assert!(dir.resolve_link(&["missing"]).is_none());
    }

    #[test]
    fn test_document_links_use_key_paths() {
        let target = [9u8; 32];
        let doc = DocumentNode::new(json!({
            "a": { "file": DocumentNode::link_value(&target) },
            "list": [ DocumentNode::link_value(&[3u8; 32]) ],
            "plain": 5,
        }));

        let mut names: Vec<String> = doc.named_links().into_iter().map(|l| l.name).collect();
        names.sort();
        assert_eq!(names, vec!["a/file".to_string(), "list/0".to_string()]);

        let (link, consumed) = doc.resolve_link(&["a", "file", "level-1"]).unwrap();
        assert_eq!(link.hash, target);
        assert_eq!(consumed, 2);

        assert!(doc.resolve_link(&["a"]).is_none());
    }

    #[test]
    fn test_link_object_with_extra_keys_is_not_a_link() {
        let doc = DocumentNode::new(json!({
            "x": { "/": to_hex(&[1u8; 32]), "other": true },
        }));
        assert!(doc.named_links().is_empty());
    }
}
