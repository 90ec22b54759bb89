//! Splitting fragment streams into chunks
//!
//! Fragments arrive with arbitrary sizes and alignment. Chunks are emitted as
//! soon as they are final, so a chunker buffers at most about one chunk
//! (fixed-size) or two maximal chunks (content-defined) plus the fragment
//! being consumed.

use std::collections::VecDeque;
use std::io;

use fastcdc::v2020::FastCDC;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// Smallest `max_chunk_size` accepted for content-defined chunking
pub const CDC_MIN_CHUNK_SIZE: usize = 1024;
/// Largest `max_chunk_size` accepted for content-defined chunking
pub const CDC_MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// How chunk boundaries are chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Every chunk is exactly `max_chunk_size` except the last
    #[default]
    Fixed,
    /// FastCDC boundaries (min = max/16, avg = max/4)
    Cdc,
}

/// Chunk a fragment stream with the given strategy
pub fn chunk_stream<S>(
    fragments: S,
    strategy: ChunkStrategy,
    max_chunk_size: usize,
) -> BoxStream<'static, io::Result<Vec<u8>>>
where
    S: Stream<Item = io::Result<Vec<u8>>> + Send + Unpin + 'static,
{
    match strategy {
        ChunkStrategy::Fixed => fixed_size(fragments, max_chunk_size).boxed(),
        ChunkStrategy::Cdc => content_defined(fragments, max_chunk_size).boxed(),
    }
}

struct FixedChunker<S> {
    fragments: S,
    buffer: Vec<u8>,
    // start of unconsumed bytes in `buffer`
    pos: usize,
    max: usize,
}

impl<S> FixedChunker<S> {
    fn buffered(&self) -> usize {
        self.buffer.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Vec<u8> {
        let chunk = self.buffer[self.pos..self.pos + len].to_vec();
        self.pos += len;
        chunk
    }

    fn append(&mut self, fragment: &[u8]) {
        if self.pos > 0 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
        self.buffer.extend_from_slice(fragment);
    }
}

/// Fixed-size chunking: `ceil(len / max)` chunks, all `max` bytes except
/// the last. Empty input yields no chunks.
pub fn fixed_size<S>(fragments: S, max_chunk_size: usize) -> impl Stream<Item = io::Result<Vec<u8>>>
where
    S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
{
    let max = max_chunk_size.max(1);
    let chunker = FixedChunker {
        fragments,
        buffer: Vec::new(),
        pos: 0,
        max,
    };

    stream::unfold(Some(chunker), |state| async move {
        let mut chunker = state?;
        loop {
            if chunker.buffered() >= chunker.max {
                let chunk = chunker.take(chunker.max);
                return Some((Ok(chunk), Some(chunker)));
            }
            match chunker.fragments.next().await {
                Some(Ok(fragment)) => chunker.append(&fragment),
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    let rest = chunker.buffered();
                    if rest == 0 {
                        return None;
                    }
                    let chunk = chunker.take(rest);
                    return Some((Ok(chunk), None));
                }
            }
        }
    })
}

struct CdcChunker<S> {
    fragments: S,
    buffer: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
    min: u32,
    avg: u32,
    max: u32,
    eof: bool,
}

impl<S> CdcChunker<S> {
    /// Move every chunk whose boundary can no longer change into `ready`.
    ///
    /// FastCDC never looks further than `max` bytes past a chunk start, so a
    /// cut found with a full window ahead of it is final. At EOF everything
    /// left is final.
    fn settle(&mut self) {
        let max = self.max as usize;
        let mut consumed = 0;
        for cut in FastCDC::new(&self.buffer, self.min, self.avg, self.max) {
            if !self.eof && cut.offset + max > self.buffer.len() {
                break;
            }
            self.ready
                .push_back(self.buffer[cut.offset..cut.offset + cut.length].to_vec());
            consumed = cut.offset + cut.length;
        }
        self.buffer.drain(..consumed);
    }
}

/// Content-defined chunking with FastCDC
///
/// Produces the same chunks as running FastCDC over the whole input at once.
pub fn content_defined<S>(
    fragments: S,
    max_chunk_size: usize,
) -> impl Stream<Item = io::Result<Vec<u8>>>
where
    S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
{
    let max = max_chunk_size.clamp(CDC_MIN_CHUNK_SIZE, CDC_MAX_CHUNK_SIZE) as u32;
    let chunker = CdcChunker {
        fragments,
        buffer: Vec::new(),
        ready: VecDeque::new(),
        min: max / 16,
        avg: max / 4,
        max,
        eof: false,
    };

    stream::unfold(Some(chunker), |state| async move {
        let mut chunker = state?;
        loop {
            if let Some(chunk) = chunker.ready.pop_front() {
                return Some((Ok(chunk), Some(chunker)));
            }
            if chunker.eof {
                if chunker.buffer.is_empty() {
                    return None;
                }
                chunker.settle();
                continue;
            }
            if chunker.buffer.len() >= 2 * chunker.max as usize {
                chunker.settle();
                if !chunker.ready.is_empty() {
                    continue;
                }
            }
            match chunker.fragments.next().await {
                Some(Ok(fragment)) => chunker.buffer.extend_from_slice(&fragment),
                Some(Err(e)) => return Some((Err(e), None)),
                None => chunker.eof = true,
            }
        }
    })
}
