//! Persisted history records
//!
//! Both records are explicit little-endian images. The fine entry protects
//! itself with an XOR checksum, the daily summary with the STM32 word CRC.

use tidewatch_core::crc::crc32_words;
use tidewatch_core::time::CivilDate;

/// Sentinel of erased memory, never a valid field value
pub const ERASED: u32 = 0xFFFF_FFFF;

/// Mixed into the fine-entry checksum so an all-zero slot is invalid
pub const CHECKSUM_SEED: u32 = 0x89AB_CDEF;

/// Packed size of a [`FineEntry`]
pub const FINE_ENTRY_SIZE: usize = 16;

/// Packed size of a [`DailySummary`]
pub const DAILY_SUMMARY_SIZE: usize = 120;

/// Hourly buckets per summary
pub const HOURS_PER_DAY: usize = 24;

/// One measurement interval in the EEPROM ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FineEntry {
    /// End of the interval, UTC seconds
    pub timestamp: u32,
    /// Flow meter running total after the interval
    pub total_ml: u32,
    /// Volume used during the interval
    pub volume_ml: u32,
    pub checksum: u32,
}

impl FineEntry {
    /// Contents of an erased slot
    pub const ERASED: Self = Self {
        timestamp: ERASED,
        total_ml: ERASED,
        volume_ml: ERASED,
        checksum: ERASED,
    };

    /// Entry with its checksum filled in
    pub fn new(timestamp: u32, total_ml: u32, volume_ml: u32) -> Self {
        let mut entry = Self {
            timestamp,
            total_ml,
            volume_ml,
            checksum: 0,
        };
        entry.checksum = entry.calculate_checksum();
        entry
    }

    pub fn calculate_checksum(&self) -> u32 {
        self.timestamp ^ self.total_ml ^ self.volume_ml ^ CHECKSUM_SEED
    }

    /// No field is erased and the checksum matches
    pub fn is_valid(&self) -> bool {
        self.timestamp != ERASED
            && self.total_ml != ERASED
            && self.volume_ml != ERASED
            && self.checksum != ERASED
            && self.checksum == self.calculate_checksum()
    }

    pub fn to_bytes(&self) -> [u8; FINE_ENTRY_SIZE] {
        let mut bytes = [0u8; FINE_ENTRY_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip([
            self.timestamp,
            self.total_ml,
            self.volume_ml,
            self.checksum,
        ]) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Decode the first [`FINE_ENTRY_SIZE`] bytes of `bytes`
    ///
    /// Short input reads as an erased slot.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.len() < FINE_ENTRY_SIZE {
            return Self::ERASED;
        }
        Self {
            timestamp: word(bytes, 0),
            total_ml: word(bytes, 1),
            volume_ml: word(bytes, 2),
            checksum: word(bytes, 3),
        }
    }
}

/// Hourly roll-up of one local calendar day, one flash page each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DailySummary {
    pub year: i32,
    pub month: i32,
    pub day: i32,
    /// Earliest contributing entry, UTC seconds
    pub from_timestamp: u32,
    /// Latest contributing entry, UTC seconds
    pub to_timestamp: u32,
    /// Volume per local hour of the day
    pub hour_volumes_ml: [u32; HOURS_PER_DAY],
    /// CRC over every preceding word
    pub crc: u32,
}

impl DailySummary {
    /// Empty summary for `date`
    pub fn new(date: CivilDate) -> Self {
        Self {
            year: date.year,
            month: i32::from(date.month),
            day: i32::from(date.day),
            from_timestamp: ERASED,
            to_timestamp: 0,
            hour_volumes_ml: [0; HOURS_PER_DAY],
            crc: 0,
        }
    }

    /// Calendar day covered
    pub fn date(&self) -> CivilDate {
        CivilDate::new(self.year, self.month as u8, self.day as u8)
    }

    /// Whether any entry was added
    pub fn is_empty(&self) -> bool {
        self.from_timestamp == ERASED
    }

    /// Account `volume_ml` used at `timestamp` in local `hour`
    pub fn add(&mut self, timestamp: u32, hour: u8, volume_ml: u32) {
        if let Some(bucket) = self.hour_volumes_ml.get_mut(usize::from(hour)) {
            *bucket = bucket.saturating_add(volume_ml);
        }
        self.from_timestamp = self.from_timestamp.min(timestamp);
        self.to_timestamp = self.to_timestamp.max(timestamp);
    }

    /// Volume over the whole day
    pub fn total_volume_ml(&self) -> u32 {
        self.hour_volumes_ml
            .iter()
            .fold(0u32, |sum, v| sum.saturating_add(*v))
    }

    /// Whether `[from_timestamp, to_timestamp]` intersects `[from, to]`
    pub fn overlaps(&self, from: u32, to: u32) -> bool {
        self.from_timestamp <= to && self.to_timestamp >= from
    }

    pub fn calculate_crc(&self) -> u32 {
        let bytes = self.to_bytes();
        crc32_words(&bytes[..DAILY_SUMMARY_SIZE - 4])
    }

    pub fn update_crc(&mut self) {
        self.crc = self.calculate_crc();
    }

    pub fn verify_crc(&self) -> bool {
        self.crc == self.calculate_crc()
    }

    pub fn to_bytes(&self) -> [u8; DAILY_SUMMARY_SIZE] {
        let mut bytes = [0u8; DAILY_SUMMARY_SIZE];
        let header = [
            self.year as u32,
            self.month as u32,
            self.day as u32,
            self.from_timestamp,
            self.to_timestamp,
        ];
        let words = header
            .into_iter()
            .chain(self.hour_volumes_ml)
            .chain([self.crc]);
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Decode a page, `None` if it is too short to hold a summary
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < DAILY_SUMMARY_SIZE {
            return None;
        }
        let mut hour_volumes_ml = [0; HOURS_PER_DAY];
        for (hour, volume) in hour_volumes_ml.iter_mut().enumerate() {
            *volume = word(bytes, 5 + hour);
        }
        Some(Self {
            year: word(bytes, 0) as i32,
            month: word(bytes, 1) as i32,
            day: word(bytes, 2) as i32,
            from_timestamp: word(bytes, 3),
            to_timestamp: word(bytes, 4),
            hour_volumes_ml,
            crc: word(bytes, 5 + HOURS_PER_DAY),
        })
    }
}

/// Whether every word of a flash page is erased
pub fn is_erased_page(page: &[u8]) -> bool {
    page.iter().all(|b| *b == 0xFF)
}

fn word(bytes: &[u8], index: usize) -> u32 {
    let at = index * 4;
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
