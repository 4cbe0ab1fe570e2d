//! # Physical page-frame allocator
//!
//! One `u32` slot per frame in `[base, base + len)`. A free slot stores the
//! index of the next free slot (or [`END_OF_LIST`]); an allocated slot stores
//! [`IN_USE`]. Following the chain from `head` visits every free frame exactly
//! once, in ascending order.
//!
//! ```text
//! index:   0    1    2    3    4    5
//! slot:  [ 3 | IU | IU | 4  | 5  | EOL ]    head = 0
//! chain: 0 -> 3 -> 4 -> 5 -> EOL           (frames 1 and 2 spliced out)
//! ```
//!
//! Ascending order lets [`FrameAllocator::mark_range_in_use`] treat a run of
//! free slots as a contiguous stretch of the chain and lets
//! [`FrameAllocator::alloc_contiguous_run`] detect physical contiguity by
//! comparing a slot with its own index.
//!
//! Callers share the allocator through a `SpinLock`; nothing in here locks.

use core::fmt;
use kernel_memory_addresses::PageFrame;
use log::error;

/// Tail of the free chain.
pub const END_OF_LIST: u32 = 0xffff_ffff;

/// Slot is allocated and not on the chain.
pub const IN_USE: u32 = 0xffff_fffe;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("frames {start}..+{count:#x} are outside the frame table")]
    OutOfRange { start: PageFrame, count: u64 },
    #[error("frame {0} is not on the free chain")]
    NotOnFreeList(PageFrame),
    #[error("frame {frame} is already in use")]
    DoubleAllocation { frame: PageFrame },
    #[error("frame {frame} is already free")]
    DoubleFree { frame: PageFrame },
    #[error("free chain corrupted at frame {frame}")]
    Corrupted { frame: PageFrame },
    #[error("no free frames left")]
    Exhausted,
    #[error("no run of {count} contiguous free frames")]
    NoContiguousRun { count: u64 },
    #[error("zero-length frame range")]
    ZeroLength,
}

impl FrameError {
    /// Whether the error reveals a broken allocator invariant rather than a
    /// transient shortage. Callers must not recover from these.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DoubleAllocation { .. } | Self::DoubleFree { .. } | Self::Corrupted { .. }
        )
    }
}

pub struct FrameAllocator {
    table: &'static mut [u32],
    base: PageFrame,
    head: u32,
    free: u32,
}

impl FrameAllocator {
    /// Take over `table` and mark every frame free.
    ///
    /// # Panics
    /// If `table` is empty or has as many slots as the sentinel values.
    #[must_use]
    pub fn new(table: &'static mut [u32], base: PageFrame) -> Self {
        assert!(!table.is_empty(), "frame table must not be empty");
        assert!(
            table.len() < IN_USE as usize,
            "frame table too large for u32 indices"
        );
        #[allow(clippy::cast_possible_truncation)]
        let len = table.len() as u32;

        for (i, slot) in (1..).zip(table.iter_mut()) {
            *slot = i;
        }
        table[len as usize - 1] = END_OF_LIST;

        Self {
            table,
            base,
            head: 0,
            free: len,
        }
    }

    /// First frame covered by the table.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> PageFrame {
        self.base
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn total_frames(&self) -> u32 {
        self.table.len() as u32
    }

    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> u32 {
        self.free
    }

    /// Whether `frame` is allocated. Frames outside the table count as in use.
    #[must_use]
    pub fn is_in_use(&self, frame: PageFrame) -> bool {
        self.index_of(frame)
            .is_none_or(|i| self.table[i as usize] == IN_USE)
    }

    fn index_of(&self, frame: PageFrame) -> Option<u32> {
        let rel = frame.as_u64().checked_sub(self.base.as_u64())?;
        u32::try_from(rel).ok().filter(|&i| i < self.total_frames())
    }

    #[inline]
    fn frame_at(&self, index: u32) -> PageFrame {
        self.base + u64::from(index)
    }

    #[inline]
    fn slot(&self, index: u32) -> u32 {
        self.table[index as usize]
    }

    /// Translate `[start, start + count)` into table indices.
    fn range_indices(&self, start: PageFrame, count: u64) -> Result<(u32, u32), FrameError> {
        if count == 0 {
            return Err(FrameError::ZeroLength);
        }
        let out_of_range = FrameError::OutOfRange { start, count };
        let first = self.index_of(start).ok_or(out_of_range)?;
        let count = u32::try_from(count).map_err(|_| out_of_range)?;
        match first.checked_add(count) {
            Some(end) if end <= self.total_frames() => Ok((first, count)),
            _ => Err(out_of_range),
        }
    }

    /// Splice `[start, start + count)` out of the free chain.
    ///
    /// # Errors
    /// * [`FrameError::OutOfRange`] if the run leaves the table.
    /// * [`FrameError::DoubleAllocation`] if any frame of the run is already
    ///   in use. Nothing is modified in that case.
    /// * [`FrameError::NotOnFreeList`] / [`FrameError::Corrupted`] if the chain
    ///   does not contain the run where it should.
    pub fn mark_range_in_use(&mut self, start: PageFrame, count: u64) -> Result<(), FrameError> {
        let (first, count) = self.range_indices(start, count)?;
        self.take_run(first, count)
    }

    /// # Errors
    /// See [`FrameAllocator::mark_range_in_use`].
    pub fn mark_page_in_use(&mut self, frame: PageFrame) -> Result<(), FrameError> {
        self.mark_range_in_use(frame, 1)
    }

    fn take_run(&mut self, first: u32, count: u32) -> Result<(), FrameError> {
        let last = first + count - 1;

        if let Some(i) = (first..=last).find(|&i| self.slot(i) == IN_USE) {
            let frame = self.frame_at(i);
            error!("frame {frame} is already in use");
            return Err(FrameError::DoubleAllocation { frame });
        }

        // Find the chain predecessor of `first`.
        let mut prev = None;
        let mut i = self.head;
        while i != END_OF_LIST && i < first {
            let next = self.slot(i);
            if next == IN_USE {
                return Err(self.corrupted(i));
            }
            prev = Some(i);
            i = next;
        }
        if i != first {
            return Err(FrameError::NotOnFreeList(self.frame_at(first)));
        }

        let successor = self.slot(last);
        for slot in &mut self.table[first as usize..=last as usize] {
            *slot = IN_USE;
        }
        match prev {
            Some(p) => self.table[p as usize] = successor,
            None => self.head = successor,
        }
        self.free -= count;
        Ok(())
    }

    /// Pop the lowest free frame.
    ///
    /// # Errors
    /// [`FrameError::Exhausted`] if no frame is free, [`FrameError::Corrupted`]
    /// if the head slot is marked in use.
    pub fn alloc_one(&mut self) -> Result<PageFrame, FrameError> {
        let index = self.head;
        if index == END_OF_LIST {
            return Err(FrameError::Exhausted);
        }
        let next = self.slot(index);
        if next == IN_USE {
            return Err(self.corrupted(index));
        }
        self.table[index as usize] = IN_USE;
        self.head = next;
        self.free -= 1;
        Ok(self.frame_at(index))
    }

    /// Allocate `count` physically contiguous frames and return the first.
    ///
    /// # Errors
    /// [`FrameError::NoContiguousRun`] if the chain holds no such run.
    pub fn alloc_contiguous_run(&mut self, count: u64) -> Result<PageFrame, FrameError> {
        if count == 0 {
            return Err(FrameError::ZeroLength);
        }
        let no_run = FrameError::NoContiguousRun { count };
        let len = u32::try_from(count).map_err(|_| no_run)?;

        let mut start = self.head;
        loop {
            if start == END_OF_LIST {
                return Err(no_run);
            }
            match start.checked_add(len) {
                Some(end) if end <= self.total_frames() => {}
                _ => return Err(no_run),
            }

            // Every slot but the last must chain to its direct neighbour.
            match (start..start + len - 1).find(|&i| self.slot(i) != i + 1) {
                None => {
                    self.take_run(start, len)?;
                    return Ok(self.frame_at(start));
                }
                Some(gap) => {
                    let next = self.slot(gap);
                    if next == IN_USE {
                        return Err(self.corrupted(gap));
                    }
                    start = next;
                }
            }
        }
    }

    /// Return a single frame to the chain.
    ///
    /// # Errors
    /// See [`FrameAllocator::free_range`].
    pub fn free_page(&mut self, frame: PageFrame) -> Result<(), FrameError> {
        self.free_range(frame, 1)
    }

    /// Return `[start, start + count)` to the chain at its sorted position.
    ///
    /// # Errors
    /// * [`FrameError::OutOfRange`] if the run leaves the table.
    /// * [`FrameError::DoubleFree`] if any frame of the run is already free.
    ///   Nothing is modified in that case.
    pub fn free_range(&mut self, start: PageFrame, count: u64) -> Result<(), FrameError> {
        let (first, count) = self.range_indices(start, count)?;
        let last = first + count - 1;

        if let Some(i) = (first..=last).find(|&i| self.slot(i) != IN_USE) {
            let frame = self.frame_at(i);
            error!("frame {frame} freed twice");
            return Err(FrameError::DoubleFree { frame });
        }

        let mut prev = None;
        let mut i = self.head;
        while i != END_OF_LIST && i < first {
            let next = self.slot(i);
            if next == IN_USE {
                return Err(self.corrupted(i));
            }
            prev = Some(i);
            i = next;
        }

        for j in first..last {
            self.table[j as usize] = j + 1;
        }
        self.table[last as usize] = i;
        match prev {
            Some(p) => self.table[p as usize] = first,
            None => self.head = first,
        }
        self.free += count;
        Ok(())
    }

    /// Walk the whole chain and verify its invariants.
    ///
    /// # Errors
    /// [`FrameError::Corrupted`] naming the first offending frame.
    pub fn check_chain(&self) -> Result<(), FrameError> {
        let mut seen = 0u32;
        let mut prev: Option<u32> = None;
        let mut i = self.head;
        while i != END_OF_LIST {
            let out_of_order = prev.is_some_and(|p| i <= p);
            if i >= self.total_frames() || out_of_order || seen >= self.free {
                return Err(FrameError::Corrupted {
                    frame: self.frame_at(prev.unwrap_or(i)),
                });
            }
            let next = self.slot(i);
            if next == IN_USE {
                return Err(FrameError::Corrupted {
                    frame: self.frame_at(i),
                });
            }
            seen += 1;
            prev = Some(i);
            i = next;
        }

        let in_use = self.table.iter().filter(|&&s| s == IN_USE).count();
        if seen != self.free || in_use + seen as usize != self.table.len() {
            return Err(FrameError::Corrupted {
                frame: self.frame_at(prev.unwrap_or(0)),
            });
        }
        Ok(())
    }

    fn corrupted(&self, index: u32) -> FrameError {
        let frame = self.frame_at(index);
        error!("free chain reaches in-use frame {frame}");
        FrameError::Corrupted { frame }
    }

    /// Maximal runs of free and in-use frames in ascending order.
    #[must_use]
    pub fn runs(&self) -> Runs<'_> {
        Runs {
            alloc: self,
            next: 0,
        }
    }
}

impl fmt::Debug for FrameAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("base", &self.base)
            .field("frames", &self.table.len())
            .field("free", &self.free)
            .field("head", &self.head)
            .finish()
    }
}

/// A maximal stretch of frames sharing the same state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameRun {
    pub first: PageFrame,
    /// Inclusive.
    pub last: PageFrame,
    pub in_use: bool,
}

pub struct Runs<'a> {
    alloc: &'a FrameAllocator,
    next: u32,
}

impl Iterator for Runs<'_> {
    type Item = FrameRun;

    fn next(&mut self) -> Option<FrameRun> {
        let total = self.alloc.total_frames();
        if self.next >= total {
            return None;
        }
        let start = self.next;
        let in_use = self.alloc.slot(start) == IN_USE;
        let mut end = start + 1;
        while end < total && (self.alloc.slot(end) == IN_USE) == in_use {
            end += 1;
        }
        self.next = end;
        Some(FrameRun {
            first: self.alloc.frame_at(start),
            last: self.alloc.frame_at(end - 1),
            in_use,
        })
    }
}
