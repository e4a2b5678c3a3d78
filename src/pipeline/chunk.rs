//! Partitioning: pages → chunks → batches.

use std::ops::Range;

/// A contiguous page range run under one engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based ordinal.
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Consecutive batch ranges of at most `batch_size` pages covering the chunk.
    pub fn batches(&self, batch_size: usize) -> Vec<Range<usize>> {
        split(self.start, self.end, batch_size)
    }
}

/// Split `[0, num_pages)` into chunks of `chunk_size` pages; the last may be shorter.
pub fn plan_chunks(num_pages: usize, chunk_size: usize) -> Vec<Chunk> {
    split(0, num_pages, chunk_size)
        .into_iter()
        .enumerate()
        .map(|(index, r)| Chunk {
            index,
            start: r.start,
            end: r.end,
        })
        .collect()
}

fn split(start: usize, end: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (start..end)
        .step_by(size)
        .map(|s| s..(s + size).min(end))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_every_page_once_in_order() {
        for num_pages in 0..=64 {
            for chunk_size in 1..=25 {
                let chunks = plan_chunks(num_pages, chunk_size);
                let mut next = 0;
                for (i, c) in chunks.iter().enumerate() {
                    assert_eq!(c.index, i);
                    assert_eq!(c.start, next, "gap or overlap at chunk {i}");
                    assert!(!c.is_empty());
                    next = c.end;
                }
                assert_eq!(next, num_pages);

                if let Some(last) = chunks.last() {
                    let rem = num_pages % chunk_size;
                    let expected = if rem == 0 { chunk_size } else { rem };
                    assert_eq!(last.len(), expected);
                }
            }
        }
    }

    #[test]
    fn fifty_pages_in_chunks_of_twenty() {
        let chunks = plan_chunks(50, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].range(), 40..50);
    }

    #[test]
    fn batches_stay_inside_their_chunk() {
        let c = Chunk { index: 1, start: 20, end: 27 };
        assert_eq!(c.batches(3), vec![20..23, 23..26, 26..27]);
        assert_eq!(c.batches(0), (20..27).map(|p| p..p + 1).collect::<Vec<_>>());
    }
}
