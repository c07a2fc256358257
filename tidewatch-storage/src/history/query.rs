//! Read-only traversals over the persisted history

use embassy_sync::blocking_mutex::raw::RawMutex;
use tidewatch_core::sync::Access;
use tidewatch_core::time::CivilDate;
use tidewatch_core::traits::{BlockMemory, Clock};

use super::entry::{DailySummary, FineEntry, FINE_ENTRY_SIZE};
use super::{RingImage, HISTORY_ENTRIES};

/// Today's valid ring entries, oldest first
///
/// Starts at the write cursor, which is where the oldest entry sits once
/// the ring has wrapped, and visits every slot once.
pub struct TodayEntries<'s, K> {
    ring: &'s RingImage,
    clock: &'s K,
    today: CivilDate,
    next: usize,
    remaining: usize,
}

impl<'s, K: Clock> TodayEntries<'s, K> {
    pub(super) fn new(ring: &'s RingImage, clock: &'s K, start: usize) -> Self {
        Self {
            ring,
            clock,
            today: clock.local_now().date,
            next: start % HISTORY_ENTRIES,
            remaining: HISTORY_ENTRIES,
        }
    }
}

impl<K: Clock> Iterator for TodayEntries<'_, K> {
    type Item = FineEntry;

    fn next(&mut self) -> Option<FineEntry> {
        while self.remaining > 0 {
            let slot = self.next;
            self.next = (self.next + 1) % HISTORY_ENTRIES;
            self.remaining -= 1;

            let entry = FineEntry::from_bytes(&self.ring[slot * FINE_ENTRY_SIZE..]);
            if entry.is_valid() && self.clock.local(entry.timestamp).date == self.today {
                return Some(entry);
            }
        }
        None
    }
}

/// Valid daily summaries overlapping a time range
///
/// Holds the flash lock until dropped. Pages that fail their CRC are
/// skipped, an unreadable page ends the traversal.
pub struct DailySummaries<'s, M: RawMutex, F> {
    flash: Access<'s, M, F>,
    next: usize,
    end: usize,
    from: u32,
    to: u32,
}

impl<'s, M: RawMutex, F: BlockMemory> DailySummaries<'s, M, F> {
    pub(super) fn new(flash: Access<'s, M, F>, end: usize, from: u32, to: u32) -> Self {
        Self {
            flash,
            next: 0,
            end: end.min(F::PAGE_COUNT),
            from,
            to,
        }
    }
}

impl<M: RawMutex, F: BlockMemory> Iterator for DailySummaries<'_, M, F> {
    type Item = DailySummary;

    fn next(&mut self) -> Option<DailySummary> {
        while self.next < self.end {
            let page = self.next;
            self.next += 1;

            let Ok(bytes) = self.flash.page(page) else {
                self.next = self.end;
                return None;
            };
            let Some(summary) = DailySummary::from_bytes(bytes) else {
                continue;
            };
            if summary.overlaps(self.from, self.to) && summary.verify_crc() {
                return Some(summary);
            }
        }
        None
    }
}
