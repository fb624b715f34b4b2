//! Single-region read cache used by [`HttpRangeFile`](super::HttpRangeFile).
//!
//! Planning is kept free of I/O: [`RangeBuffer::plan`] decides which bytes
//! must come from the network for a read, and [`RangeBuffer::complete`] stitches
//! the fetched bytes together with what is already cached.
//!
//! ## Cases
//!
//! For a request `[offset, offset + size)` against a buffer `[start, end)`:
//!
//! | request vs. buffer                 | plan          | buffer afterwards                        |
//! |------------------------------------|---------------|------------------------------------------|
//! | inside                             | `NoFetch`     | unchanged                                |
//! | head inside, tail past `end`       | `FetchAfter`  | surplus after the request                |
//! | head before `start`, tail inside   | `FetchBefore` | margin before the request to old `end`   |
//! | disjoint, reaches end of file      | `FetchAround` | margin before the request plus request   |
//! | disjoint, elsewhere                | `FetchAround` | margin after the request                 |
//!
//! Reads near the end of the file look behind because archive readers scan the
//! trailer first and then walk backwards into the central directory.

/// How a read is satisfied relative to the current buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// The request lies entirely inside the buffer.
    NoFetch,
    /// The head of the request is buffered; fetch `len` bytes starting at the
    /// buffer end.
    FetchAfter { start: u64, len: u64 },
    /// The tail of the request is buffered; fetch `len` bytes ending at the
    /// buffer start.
    FetchBefore { start: u64, len: u64 },
    /// The buffer is useless; fetch a fresh span. With `look_behind` the span
    /// ends at the end of the request and the whole span is cached, otherwise
    /// it starts at the request and only the surplus is cached.
    FetchAround {
        start: u64,
        len: u64,
        look_behind: bool,
    },
}

impl FetchPlan {
    /// `(start, len)` of the network fetch this plan needs, if any.
    pub fn fetch_range(&self) -> Option<(u64, u64)> {
        match *self {
            FetchPlan::NoFetch => None,
            FetchPlan::FetchAfter { start, len }
            | FetchPlan::FetchBefore { start, len }
            | FetchPlan::FetchAround { start, len, .. } => (len > 0).then_some((start, len)),
        }
    }

    /// Short name for log output.
    pub fn label(&self) -> &'static str {
        match self {
            FetchPlan::NoFetch => "buffered",
            FetchPlan::FetchAfter { .. } => "head-buffered",
            FetchPlan::FetchBefore { .. } => "tail-buffered",
            FetchPlan::FetchAround {
                look_behind: true, ..
            } => "look-behind",
            FetchPlan::FetchAround { .. } => "look-ahead",
        }
    }
}

/// A contiguous span of cached bytes starting at `offset`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RangeBuffer {
    offset: u64,
    data: Vec<u8>,
}

impl RangeBuffer {
    pub fn new(offset: u64, data: Vec<u8>) -> Self {
        Self { offset, data }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.offset = 0;
        self.data = Vec::new();
    }

    /// Decide how to satisfy a read of `size` bytes at `offset`.
    ///
    /// `size` must be non-zero and already clamped so that
    /// `offset + size <= length`. `margin` is the look-ahead/look-behind
    /// size.
    pub fn plan(&self, offset: u64, size: u64, length: u64, margin: u64) -> FetchPlan {
        let start = self.offset;
        let end = self.end();
        let request_end = offset + size;

        if offset >= start && request_end <= end {
            FetchPlan::NoFetch
        } else if offset >= start && offset < end {
            let remaining = request_end - end;
            FetchPlan::FetchAfter {
                start: end,
                len: remaining.saturating_add(margin).min(length - end),
            }
        } else if offset < start && request_end >= start && request_end <= end {
            let fetch_start = offset.saturating_sub(margin);
            FetchPlan::FetchBefore {
                start: fetch_start,
                len: start - fetch_start,
            }
        } else if request_end >= length {
            let fetch_start = offset.saturating_sub(margin);
            FetchPlan::FetchAround {
                start: fetch_start,
                len: request_end - fetch_start,
                look_behind: true,
            }
        } else {
            FetchPlan::FetchAround {
                start: offset,
                len: size.saturating_add(margin).min(length - offset),
                look_behind: false,
            }
        }
    }

    /// Carry out `plan` for the read of `size` bytes at `offset`, given the
    /// bytes the plan asked for, and return the requested bytes.
    ///
    /// `fetched` must hold exactly the range named by
    /// [`FetchPlan::fetch_range`] (empty for [`FetchPlan::NoFetch`]).
    pub fn complete(&mut self, plan: FetchPlan, offset: u64, size: u64, fetched: Vec<u8>) -> Vec<u8> {
        let size = size as usize;
        match plan {
            FetchPlan::NoFetch => {
                let head = (offset - self.offset) as usize;
                self.data[head..head + size].to_vec()
            }
            FetchPlan::FetchAfter { start, .. } => {
                let head = (offset - self.offset) as usize;
                let mut out = self.data.split_off(head.min(self.data.len()));
                let needed = size.saturating_sub(out.len()).min(fetched.len());
                let mut rest = fetched;
                let surplus = rest.split_off(needed);
                out.extend_from_slice(&rest);
                self.offset = start + needed as u64;
                self.data = surplus;
                out
            }
            FetchPlan::FetchBefore { start, .. } => {
                debug_assert_eq!(start + fetched.len() as u64, self.offset);
                let mut data = fetched;
                data.extend_from_slice(&self.data);
                self.offset = start;
                self.data = data;
                self.slice(offset, size)
            }
            FetchPlan::FetchAround {
                start,
                look_behind: true,
                ..
            } => {
                self.offset = start;
                self.data = fetched;
                self.slice(offset, size)
            }
            FetchPlan::FetchAround { start, .. } => {
                let mut out = fetched;
                let surplus = out.split_off(size.min(out.len()));
                self.offset = start + out.len() as u64;
                self.data = surplus;
                out
            }
        }
    }

    fn slice(&self, offset: u64, size: usize) -> Vec<u8> {
        let from = ((offset - self.offset) as usize).min(self.data.len());
        let to = (from + size).min(self.data.len());
        self.data[from..to].to_vec()
    }
}
