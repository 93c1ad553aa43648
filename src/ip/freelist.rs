//! Interval-set allocator over network-relative offsets.
//!
//! An [`AddressSpace`] tracks the unallocated offsets of one network as a
//! sorted list of disjoint closed intervals within `[1, limit]`. Offset 0
//! (the network address) and `limit + 1` (broadcast) are never part of the
//! space. Every offset is either in the freelist or allocated to exactly
//! one owner; the owning side of that invariant lives in the node and
//! switch documents.

use serde::{Deserialize, Serialize};

use crate::error::{LunaError, Result};

/// One closed interval of free offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: u128,
    pub end: u128,
}

/// Freelist of one network's relative offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpace {
    limit: u128,
    intervals: Vec<Interval>,
}

impl AddressSpace {
    /// A fully-free space covering `[1, limit]`.
    pub fn new(limit: u128) -> Self {
        let intervals = if limit >= 1 {
            vec![Interval { start: 1, end: limit }]
        } else {
            Vec::new()
        };
        AddressSpace { limit, intervals }
    }

    pub fn limit(&self) -> u128 {
        self.limit
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Number of offsets currently free.
    pub fn free_count(&self) -> u128 {
        self.intervals
            .iter()
            .map(|iv| iv.end - iv.start + 1)
            .sum()
    }

    pub fn is_free(&self, offset: u128) -> bool {
        self.intervals
            .iter()
            .any(|iv| iv.start <= offset && offset <= iv.end)
    }

    fn check_bounds(&self, start: u128, end: u128) -> Result<()> {
        for offset in [start, end] {
            if offset < 1 || offset > self.limit {
                return Err(LunaError::AddressOutOfRange {
                    offset,
                    limit: self.limit,
                });
            }
        }
        Ok(())
    }

    /// Remove and return the smallest free offset.
    pub fn allocate_next(&mut self) -> Result<u128> {
        let first = self.intervals.first_mut().ok_or(LunaError::AddressSpaceExhausted)?;
        let offset = first.start;
        if first.start == first.end {
            self.intervals.remove(0);
        } else {
            first.start += 1;
        }
        Ok(offset)
    }

    /// Remove `[start, end]` (or the singleton `start`) from the free set.
    ///
    /// Fails without mutating if any part of the range is already
    /// allocated, or if `end <= start` when both are given.
    pub fn allocate(&mut self, start: u128, end: Option<u128>) -> Result<()> {
        let end = match end {
            Some(e) if e <= start => {
                return Err(LunaError::Validation(format!(
                    "invalid range: end {} must be greater than start {}",
                    e, start
                )));
            }
            Some(e) => e,
            None => start,
        };
        self.check_bounds(start, end)?;

        // A contiguous free range always lies inside a single interval.
        let pos = self
            .intervals
            .iter()
            .position(|iv| iv.start <= start && end <= iv.end)
            .ok_or(LunaError::AddressAlreadyAllocated { start, end })?;

        let iv = self.intervals[pos];
        let mut replacement = Vec::with_capacity(2);
        if iv.start < start {
            replacement.push(Interval { start: iv.start, end: start - 1 });
        }
        if end < iv.end {
            replacement.push(Interval { start: end + 1, end: iv.end });
        }
        self.intervals.splice(pos..=pos, replacement);
        Ok(())
    }

    /// Return `[start, end]` (or the singleton `start`) to the free set,
    /// merging adjacent and overlapping intervals.
    ///
    /// Releasing an already-free range is a no-op; the return value tells
    /// whether any offset actually changed state.
    pub fn release(&mut self, start: u128, end: Option<u128>) -> Result<bool> {
        let end = match end {
            Some(e) if e <= start => {
                return Err(LunaError::Validation(format!(
                    "invalid range: end {} must be greater than start {}",
                    e, start
                )));
            }
            Some(e) => e,
            None => start,
        };
        self.check_bounds(start, end)?;

        let already_free: u128 = self
            .intervals
            .iter()
            .filter(|iv| iv.start <= end && start <= iv.end)
            .map(|iv| iv.end.min(end) - iv.start.max(start) + 1)
            .sum();
        let changed = already_free < end - start + 1;

        let mut merged = Interval { start, end };
        let mut result = Vec::with_capacity(self.intervals.len() + 1);
        let mut inserted = false;
        for iv in &self.intervals {
            if iv.end + 1 < merged.start {
                result.push(*iv);
            } else if merged.end < iv.start.saturating_sub(1) {
                if !inserted {
                    result.push(merged);
                    inserted = true;
                }
                result.push(*iv);
            } else {
                merged.start = merged.start.min(iv.start);
                merged.end = merged.end.max(iv.end);
            }
        }
        if !inserted {
            result.push(merged);
        }
        self.intervals = result;
        Ok(changed)
    }

    /// Grow or shrink the space to `[1, new_limit]`.
    ///
    /// Shrinking fails if any offset above the new limit is still
    /// allocated; the freelist is never truncated over live allocations.
    pub fn resize(&mut self, new_limit: u128) -> Result<()> {
        if new_limit == self.limit {
            return Ok(());
        }
        if new_limit > self.limit {
            let grow_start = self.limit + 1;
            self.limit = new_limit;
            if new_limit >= 1 {
                self.release(grow_start.max(1), if new_limit > grow_start.max(1) {
                    Some(new_limit)
                } else {
                    None
                })?;
            }
            return Ok(());
        }

        // Everything in (new_limit, limit] must be free before truncation.
        let trailing: u128 = self
            .intervals
            .iter()
            .filter(|iv| iv.end > new_limit)
            .map(|iv| iv.end - iv.start.max(new_limit + 1) + 1)
            .sum();
        if trailing != self.limit - new_limit {
            return Err(LunaError::AddressOutOfRange {
                offset: self.limit,
                limit: new_limit,
            });
        }

        self.intervals.retain_mut(|iv| {
            if iv.start > new_limit {
                return false;
            }
            if iv.end > new_limit {
                iv.end = new_limit;
            }
            true
        });
        self.limit = new_limit;
        Ok(())
    }
}
