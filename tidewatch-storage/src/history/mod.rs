//! Water usage history
//!
//! Two tiers:
//!
//! - a ring of [`HISTORY_ENTRIES`] per-interval [`FineEntry`] records at
//!   [`HISTORY_BASE_ADDRESS`] on the EEPROM, mirrored in RAM
//! - append-only [`DailySummary`] pages on the NOR flash, one per local
//!   calendar day
//!
//! Nothing on the media records the cursors. The ring cursor is the first
//! invalid or out-of-order slot, the flash cursor the first erased page.
//! Both are recovered by scanning in [`HistoryStore::initialize`].
//!
//! Any storage fault latches the store disabled and reports through
//! [`DeviceStatus`]; the rest of the device keeps running.

mod entry;
mod query;

pub use entry::{
    is_erased_page, DailySummary, FineEntry, CHECKSUM_SEED, DAILY_SUMMARY_SIZE, ERASED,
    FINE_ENTRY_SIZE, HOURS_PER_DAY,
};
pub use query::{DailySummaries, TodayEntries};

use embassy_sync::blocking_mutex::raw::RawMutex;
use tidewatch_core::state::{DeviceStatus, ErrorCode};
use tidewatch_core::sync::Guarded;
use tidewatch_core::time::CivilDate;
use tidewatch_core::traits::{BlockMemory, ByteMemory, Clock, MemoryError, WriteEnable};

/// Ring capacity in entries
pub const HISTORY_ENTRIES: usize = 2048;

/// EEPROM byte address of ring slot 0
pub const HISTORY_BASE_ADDRESS: usize = 0x8000;

/// Ring size in bytes
pub const RING_BYTES: usize = HISTORY_ENTRIES * FINE_ENTRY_SIZE;

/// RAM mirror of the ring
pub type RingImage = [u8; RING_BYTES];

/// History store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HistoryError {
    /// An earlier fault stopped history writes
    Disabled,
    /// Memory operation failed
    Memory(MemoryError),
}

impl From<MemoryError> for HistoryError {
    fn from(e: MemoryError) -> Self {
        HistoryError::Memory(e)
    }
}

/// Recover the ring write cursor from entries in slot order
///
/// The cursor is the first slot that is invalid or whose timestamp does not
/// increase on the previous one. A full, fully ordered ring has wrapped
/// exactly, so the cursor is back at 0.
pub fn recover_write_index<I>(entries: I) -> usize
where
    I: IntoIterator<Item = FineEntry>,
{
    let mut previous: Option<u32> = None;
    for (index, entry) in entries.into_iter().enumerate() {
        if !entry.is_valid() || previous.is_some_and(|t| entry.timestamp <= t) {
            return index;
        }
        previous = Some(entry.timestamp);
    }
    0
}

/// Two-tier usage history
///
/// - `E`: EEPROM holding the ring
/// - `F`: flash holding the daily summaries
/// - `K`: wall clock with the local offset
pub struct HistoryStore<'a, M: RawMutex, E, F, K> {
    eeprom: &'a Guarded<M, E>,
    flash: &'a Guarded<M, F>,
    clock: K,
    status: &'a DeviceStatus,
    ring: RingImage,
    write_index: usize,
    last_timestamp: u32,
    last_total_ml: u32,
    flash_write_index: usize,
    flushed_up_to: u32,
    disabled: bool,
    initial_dump_done: bool,
}

impl<'a, M, E, F, K> HistoryStore<'a, M, E, F, K>
where
    M: RawMutex,
    E: ByteMemory,
    F: BlockMemory,
    K: Clock,
{
    pub fn new(
        eeprom: &'a Guarded<M, E>,
        flash: &'a Guarded<M, F>,
        clock: K,
        status: &'a DeviceStatus,
    ) -> Self {
        debug_assert!(HISTORY_BASE_ADDRESS + RING_BYTES <= E::CAPACITY);
        debug_assert!(HISTORY_BASE_ADDRESS % E::PAGE_SIZE == 0);
        debug_assert!(DAILY_SUMMARY_SIZE <= F::PAGE_SIZE);

        Self {
            eeprom,
            flash,
            clock,
            status,
            ring: [0xFF; RING_BYTES],
            write_index: 0,
            last_timestamp: 0,
            last_total_ml: 0,
            flash_write_index: 0,
            flushed_up_to: 0,
            disabled: false,
            initial_dump_done: false,
        }
    }

    /// Load the ring and recover both cursors
    ///
    /// On failure the store is disabled and the error code latched.
    pub async fn initialize(&mut self) -> Result<(), HistoryError> {
        let read = {
            let mut eeprom = self.eeprom.lock().await;
            eeprom.read_bytes(HISTORY_BASE_ADDRESS, &mut self.ring).await
        };
        if let Err(e) = read {
            error!("history: ring read failed: {:?}", e);
            self.disable(ErrorCode::Eeprom);
            return Err(e.into());
        }

        self.write_index = recover_write_index(self.entries());
        let mut latest = 0;
        let mut total = 0;
        for entry in self.entries().filter(FineEntry::is_valid) {
            latest = latest.max(entry.timestamp);
            total = total.max(entry.total_ml);
        }
        self.last_timestamp = latest;
        self.last_total_ml = total;
        info!(
            "history: ring cursor {}, latest {}, total {} ml",
            self.write_index, latest, total
        );

        self.scan_flash().await
    }

    /// Periodic hook, called once per interval with the meter's running total
    ///
    /// Appends one ring entry and writes the summary of a day that just
    /// ended. Does nothing while the clock is unset or the store disabled.
    pub async fn handle_interval(&mut self, total_volume_ml: u32) {
        if self.disabled || !self.clock.is_time_valid() {
            return;
        }

        if !self.initial_dump_done {
            self.initial_dump_done = true;
            if self.perform_initial_dump().await.is_err() {
                return;
            }
        }

        match self.append(total_volume_ml).await {
            Ok(Some(ended)) => {
                let _ = self.summarize_day(ended).await;
            }
            Ok(None) => {}
            Err(e) => warn!("history: append failed: {:?}", e),
        }
    }

    /// Write a ring entry for the interval ending now
    ///
    /// Skipped unless the clock moved past the last entry. Returns the local
    /// date of the previous entry when the new one falls on another day.
    pub async fn append(&mut self, total_volume_ml: u32) -> Result<Option<CivilDate>, HistoryError> {
        if self.disabled {
            return Err(HistoryError::Disabled);
        }

        let now = self.clock.utc_now();
        if now <= self.last_timestamp {
            trace!("history: no new interval at {}", now);
            return Ok(None);
        }

        let volume = total_volume_ml.saturating_sub(self.last_total_ml);
        let entry = FineEntry::new(now, total_volume_ml, volume);
        let slot = self.write_index;
        let bytes = entry.to_bytes();
        self.ring[slot * FINE_ENTRY_SIZE..(slot + 1) * FINE_ENTRY_SIZE].copy_from_slice(&bytes);

        let written = {
            let mut access = self.eeprom.lock().await;
            let mut eeprom = WriteEnable::new(&mut *access);
            eeprom
                .write_bytes(HISTORY_BASE_ADDRESS + slot * FINE_ENTRY_SIZE, &bytes)
                .await
        };

        let previous = self.last_timestamp;
        self.write_index = (slot + 1) % HISTORY_ENTRIES;
        self.last_timestamp = now;
        self.last_total_ml = total_volume_ml;

        if let Err(e) = written {
            error!("history: ring write at slot {} failed", slot);
            self.disable(ErrorCode::Eeprom);
            return Err(e.into());
        }

        let ended = self.clock.local(previous).date;
        if previous != 0 && ended != self.clock.local(now).date {
            debug!("history: day ended");
            return Ok(Some(ended));
        }
        Ok(None)
    }

    /// Roll up the ring entries of local day `date` into a flash page
    ///
    /// Returns whether a page was written. Nothing is written for a day
    /// without entries or one that starts at or before the already flushed
    /// high-water mark.
    pub async fn summarize_day(&mut self, date: CivilDate) -> Result<bool, HistoryError> {
        if self.disabled {
            return Err(HistoryError::Disabled);
        }

        let mut summary = DailySummary::new(date);
        for entry in self.entries().filter(FineEntry::is_valid) {
            let local = self.clock.local(entry.timestamp);
            if local.date == date {
                summary.add(entry.timestamp, local.hour, entry.volume_ml);
            }
        }

        if summary.is_empty() {
            return Ok(false);
        }
        if self.flushed_up_to >= summary.from_timestamp {
            debug!("history: day already flushed up to {}", self.flushed_up_to);
            return Ok(false);
        }
        if self.flash_write_index >= F::PAGE_COUNT {
            self.disable(ErrorCode::Flash);
            return Err(MemoryError::Full.into());
        }

        summary.update_crc();
        let page = self.flash_write_index;
        let written = {
            let mut flash = self.flash.lock().await;
            flash.write_page(page, &summary.to_bytes())
        };

        self.flash_write_index += 1;
        self.flushed_up_to = summary.to_timestamp;

        if let Err(e) = written {
            error!("history: summary write to page {} failed", page);
            self.disable(ErrorCode::Flash);
            return Err(e.into());
        }
        info!(
            "history: summary {}-{}-{} written to page {}",
            summary.year, summary.month, summary.day, page
        );
        Ok(true)
    }

    /// Summarize the latest ring day if the device slept past its end
    ///
    /// A clock reading earlier than the latest entry is not trusted and
    /// nothing is written.
    pub async fn perform_initial_dump(&mut self) -> Result<(), HistoryError> {
        let Some(latest) = self.latest_timestamp() else {
            return Ok(());
        };
        let now = self.clock.utc_now();
        if now < latest {
            warn!("history: clock {} behind latest entry {}", now, latest);
            return Ok(());
        }

        let latest_day = self.clock.local(latest).date;
        if latest_day != self.clock.local(now).date {
            self.summarize_day(latest_day).await?;
        }
        Ok(())
    }

    /// Invalidate every ring entry
    ///
    /// Valid entries get their checksum inverted, then the whole ring is
    /// written back and the cursor restarts at slot 0. Daily summaries
    /// already on flash are kept.
    pub async fn clear_fine_history(&mut self) -> Result<(), HistoryError> {
        if self.disabled {
            return Err(HistoryError::Disabled);
        }

        for slot in self.ring.chunks_exact_mut(FINE_ENTRY_SIZE) {
            let mut entry = FineEntry::from_bytes(slot);
            if entry.is_valid() {
                entry.checksum ^= ERASED;
                slot.copy_from_slice(&entry.to_bytes());
            }
        }

        let written = {
            let mut access = self.eeprom.lock().await;
            let mut eeprom = WriteEnable::new(&mut *access);
            eeprom
                .write_multiple_pages(HISTORY_BASE_ADDRESS / E::PAGE_SIZE, &self.ring)
                .await
        };
        self.write_index = 0;

        if let Err(e) = written {
            error!("history: clearing the ring failed");
            self.disable(ErrorCode::Eeprom);
            return Err(e.into());
        }
        info!("history: ring cleared");
        Ok(())
    }

    /// Volume used today, from the ring
    pub fn today_volume_ml(&self) -> u32 {
        self.today_entries()
            .fold(0u32, |sum, entry| sum.saturating_add(entry.volume_ml))
    }

    /// Running meter total found in the ring at boot, for the flow meter to
    /// resume from
    pub fn recovered_total_volume_ml(&self) -> u32 {
        self.last_total_ml
    }

    /// Today's valid entries, oldest first
    pub fn today_entries(&self) -> TodayEntries<'_, K> {
        TodayEntries::new(&self.ring, &self.clock, self.write_index)
    }

    /// Daily summaries whose span intersects `[from, to]`
    ///
    /// The flash stays locked until the iterator is dropped.
    pub async fn daily_summaries(&self, from: u32, to: u32) -> DailySummaries<'a, M, F> {
        let flash: &'a Guarded<M, F> = self.flash;
        DailySummaries::new(flash.lock().await, self.flash_write_index, from, to)
    }

    /// Ring slot contents in slot order
    pub fn entries(&self) -> impl Iterator<Item = FineEntry> + '_ {
        self.ring
            .chunks_exact(FINE_ENTRY_SIZE)
            .map(FineEntry::from_bytes)
    }

    /// Next ring slot to write
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Next flash page to write
    pub fn flash_write_index(&self) -> usize {
        self.flash_write_index
    }

    /// Latest timestamp already summarized to flash
    pub fn flushed_up_to(&self) -> u32 {
        self.flushed_up_to
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn latest_timestamp(&self) -> Option<u32> {
        self.entries()
            .filter(FineEntry::is_valid)
            .map(|entry| entry.timestamp)
            .max()
    }

    /// Find the first erased flash page and the flushed high-water mark
    async fn scan_flash(&mut self) -> Result<(), HistoryError> {
        let scanned = {
            let flash = self.flash.lock().await;
            scan_pages(&*flash)
        };

        match scanned {
            Ok((cursor, flushed)) => {
                self.flash_write_index = cursor;
                self.flushed_up_to = flushed;
                info!("history: flash cursor {}, flushed up to {}", cursor, flushed);
                if cursor >= F::PAGE_COUNT {
                    warn!("history: flash full");
                    self.disable(ErrorCode::Flash);
                    return Err(MemoryError::Full.into());
                }
                Ok(())
            }
            Err(e) => {
                error!("history: flash scan failed: {:?}", e);
                self.disable(ErrorCode::Flash);
                Err(e.into())
            }
        }
    }

    fn disable(&mut self, code: ErrorCode) {
        warn!("history: disabled");
        self.disabled = true;
        self.status.set_error(code);
    }
}

fn scan_pages<F: BlockMemory>(flash: &F) -> Result<(usize, u32), MemoryError> {
    let mut flushed = 0;
    for index in 0..F::PAGE_COUNT {
        let page = flash.page(index)?;
        if is_erased_page(page) {
            return Ok((index, flushed));
        }
        if let Some(summary) = DailySummary::from_bytes(page) {
            if summary.verify_crc() {
                flushed = flushed.max(summary.to_timestamp);
            }
        }
    }
    Ok((F::PAGE_COUNT, flushed))
}
