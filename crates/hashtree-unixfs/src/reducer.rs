//! Reducing the leaves of one file to a single root
//!
//! Two layouts are supported:
//! - balanced: leaves are grouped left to right into internal nodes of at
//!   most `max_links` children, level by level, until one node remains.
//!   Runs streaming: only one partial group per level is held.
//! - trickle: each node holds a run of direct leaves followed by
//!   `layer_repeat` subtrees of every smaller depth. Cheap to append to and
//!   quick to read the start of.
//!
//! ```text
//! balanced, max_links = 3, 7 leaves:
//!
//!                 root
//!          /       |      \
//!       n1         n2       n3
//!     / | \      / | \      |
//!    l1 l2 l3   l4 l5 l6    l7
//! ```

use std::collections::VecDeque;

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::codec::node_size;
use crate::importer::ImportError;
use crate::node::{FileNode, Node};
use crate::store::Store;
use crate::types::{Link, NodeDescriptor};
use crate::writer::NodeWriter;

/// File tree layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeStrategy {
    #[default]
    Balanced,
    Trickle,
}

/// A reduced subtree together with the file bytes it covers
struct Subtree {
    descriptor: NodeDescriptor,
    file_size: u64,
}

impl Subtree {
    fn from_leaf(descriptor: NodeDescriptor) -> Self {
        let file_size = descriptor.leaf_size.unwrap_or(0);
        Self {
            descriptor,
            file_size,
        }
    }

    fn into_root(self) -> NodeDescriptor {
        NodeDescriptor {
            leaf_size: Some(self.file_size),
            ..self.descriptor
        }
    }
}

/// Reduces one file's leaves under a fixed layout
pub struct Reducer<'a, S: Store> {
    writer: &'a NodeWriter<S>,
    path: &'a str,
    strategy: TreeStrategy,
    max_links: usize,
    layer_repeat: usize,
}

impl<'a, S: Store> Reducer<'a, S> {
    pub fn new(
        writer: &'a NodeWriter<S>,
        path: &'a str,
        strategy: TreeStrategy,
        max_links: usize,
        layer_repeat: usize,
    ) -> Self {
        Self {
            writer,
            path,
            strategy,
            max_links: max_links.max(2),
            layer_repeat: layer_repeat.max(1),
        }
    }

    /// Consume the ordered leaf descriptors of one file and return its root
    ///
    /// The root carries the total file bytes as `leaf_size`.
    pub async fn reduce<L>(&self, leaves: L) -> Result<NodeDescriptor, ImportError>
    where
        L: Stream<Item = Result<NodeDescriptor, ImportError>> + Unpin,
    {
        let root = match self.strategy {
            TreeStrategy::Balanced => self.balanced(leaves).await?,
            TreeStrategy::Trickle => self.trickle(leaves).await?,
        };
        Ok(root.into_root())
    }

    async fn write_internal(&self, children: Vec<Subtree>) -> Result<Subtree, ImportError> {
        let node = FileNode::internal(children.iter().map(|c| {
            (
                Link::new(c.descriptor.hash).with_size(c.descriptor.size),
                c.file_size,
            )
        }));
        let file_size = node.file_size;
        let node = Node::File(node);
        let (hash, encoded_len) = self.writer.write(&node).await?;

        Ok(Subtree {
            descriptor: NodeDescriptor {
                path: self.path.to_string(),
                hash,
                size: node_size(encoded_len, &node.links()),
                leaf_size: None,
                name: String::new(),
            },
            file_size,
        })
    }

    /// Add a subtree at `level`, flushing every level that fills up
    async fn push(
        &self,
        levels: &mut Vec<Vec<Subtree>>,
        mut level: usize,
        mut item: Subtree,
    ) -> Result<(), ImportError> {
        loop {
            if levels.len() == level {
                levels.push(Vec::new());
            }
            levels[level].push(item);
            if levels[level].len() < self.max_links {
                return Ok(());
            }
            let group = std::mem::take(&mut levels[level]);
            item = self.write_internal(group).await?;
            level += 1;
        }
    }

    /// Collapse partial levels bottom-up into one root
    async fn finish(&self, mut levels: Vec<Vec<Subtree>>) -> Result<Subtree, ImportError> {
        let mut level = 0;
        while level < levels.len() {
            let is_top = levels[level + 1..].iter().all(Vec::is_empty);
            if is_top && levels[level].len() <= 1 {
                return levels[level]
                    .pop()
                    .ok_or(ImportError::ReduceInvariant { roots: 0 });
            }
            if !levels[level].is_empty() {
                let group = std::mem::take(&mut levels[level]);
                let parent = self.write_internal(group).await?;
                self.push(&mut levels, level + 1, parent).await?;
            }
            level += 1;
        }
        Err(ImportError::ReduceInvariant { roots: 0 })
    }

    async fn balanced<L>(&self, mut leaves: L) -> Result<Subtree, ImportError>
    where
        L: Stream<Item = Result<NodeDescriptor, ImportError>> + Unpin,
    {
        let mut levels = vec![Vec::new()];
        while let Some(leaf) = leaves.next().await {
            self.push(&mut levels, 0, Subtree::from_leaf(leaf?)).await?;
        }
        self.finish(levels).await
    }

    fn direct_leaves(&self) -> usize {
        (self.max_links / 2).max(1)
    }

    fn repeat(&self) -> usize {
        self.layer_repeat.min(self.max_links - self.direct_leaves())
    }

    /// Deepest trickle node that still fits in `max_links` links
    fn max_depth(&self) -> usize {
        (self.max_links - self.direct_leaves()) / self.repeat() + 1
    }

    /// Build one trickle node of the given depth from the front of `queue`
    fn fill<'f>(
        &'f self,
        queue: &'f mut VecDeque<Subtree>,
        depth: usize,
    ) -> BoxFuture<'f, Result<Subtree, ImportError>>
    where
        S: 'f,
    {
        async move {
            let take = self.direct_leaves().min(queue.len());
            let mut children: Vec<Subtree> = queue.drain(..take).collect();

            'layers: for sub_depth in 1..depth {
                for _ in 0..self.repeat() {
                    if queue.is_empty() {
                        break 'layers;
                    }
                    let subtree = self.fill(queue, sub_depth).await?;
                    children.push(subtree);
                }
            }

            self.write_internal(children).await
        }
        .boxed()
    }

    async fn trickle<L>(&self, leaves: L) -> Result<Subtree, ImportError>
    where
        L: Stream<Item = Result<NodeDescriptor, ImportError>> + Unpin,
    {
        let mut queue = VecDeque::new();
        let mut leaves = leaves;
        while let Some(leaf) = leaves.next().await {
            queue.push_back(Subtree::from_leaf(leaf?));
        }

        if queue.len() <= 1 {
            return queue.pop_front().ok_or(ImportError::ReduceInvariant { roots: 0 });
        }

        let depth = self.max_depth();
        let mut roots = Vec::new();
        while !queue.is_empty() {
            roots.push(self.fill(&mut queue, depth).await?);
        }
        if roots.len() == 1 {
            return roots.pop().ok_or(ImportError::ReduceInvariant { roots: 0 });
        }

        let mut levels = vec![Vec::new()];
        for root in roots {
            self.push(&mut levels, 0, root).await?;
        }
        self.finish(levels).await
    }
}
