//! Redundant settings store
//!
//! The record is kept in two identical copies on the byte memory: copy A
//! at page 0 and copy B at page [`CONFIG_PAGES`]. Loading prefers copy A
//! and falls back to copy B when A's CRC fails, then to factory defaults.
//!
//! A shadow image of what is believed to be on the media lets
//! [`ConfigStore::commit`] write only the pages that changed. A commit
//! interrupted between the two copies leaves them different; the CRC
//! fallback on the next boot recovers one of them, not necessarily the
//! newest.

mod record;

pub use record::{
    image_crc, image_crc_ok, image_version, ConfigImage, ConfigRecord, ProbeId,
    ADMIN_PASSWORD_LEN, BLOCKADE_ENABLED_FLAG, CONFIG_RECORD_SIZE, DAYS_PER_WEEK,
    DEFAULT_ADMIN_PASSWORD, DEFAULT_IMPULSES_PER_LITER, DEFAULT_TIMEZONE_ID, LEAK_LOGIC_LEN,
    MAX_PROBES, SSID_LEN, WIFI_PASSWORD_LEN,
};

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;
use tidewatch_core::sync::Guarded;
use tidewatch_core::traits::{ByteMemory, MemoryError, WriteEnable};

/// Pages reserved for one copy of the record
pub const CONFIG_PAGES: usize = 64;

/// First page of copy A
pub const PRIMARY_CONFIG_PAGE: usize = 0;

/// First page of copy B
pub const SECONDARY_CONFIG_PAGE: usize = CONFIG_PAGES;

/// Layout version written by this firmware
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Configuration store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Byte memory operation failed
    Memory(MemoryError),
    /// Leak-logic parameters do not fit the blob
    LeakLogic,
}

impl From<MemoryError> for ConfigError {
    fn from(e: MemoryError) -> Self {
        ConfigError::Memory(e)
    }
}

/// Where the live record came from at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadOutcome {
    /// Copy A was intact
    Primary,
    /// Copy A was corrupt, copy B was intact
    Secondary,
    /// An older layout was upgraded; it is persisted on the next commit
    Migrated,
    /// Nothing usable was found, factory defaults are live
    Defaults,
}

impl LoadOutcome {
    /// Whether the live record matches what is on the media
    pub fn is_loaded(self) -> bool {
        matches!(self, LoadOutcome::Primary | LoadOutcome::Secondary)
    }
}

/// Settings store over a shared byte memory
///
/// Consumers hold the store behind their own lock, mutate
/// [`current_mut`](Self::current_mut) and persist with
/// [`commit`](Self::commit).
pub struct ConfigStore<'a, M: RawMutex, E> {
    eeprom: &'a Guarded<M, E>,
    current: ConfigRecord,
    shadow: ConfigImage,
    full_write_pending: bool,
}

impl<'a, M, E> ConfigStore<'a, M, E>
where
    M: RawMutex,
    E: ByteMemory,
{
    /// Create a store holding factory defaults
    ///
    /// Call [`initialize`](Self::initialize) to load the persisted record.
    pub fn new(eeprom: &'a Guarded<M, E>) -> Self {
        debug_assert!(CONFIG_RECORD_SIZE < CONFIG_PAGES * E::PAGE_SIZE);
        debug_assert!((SECONDARY_CONFIG_PAGE + CONFIG_PAGES) * E::PAGE_SIZE <= E::CAPACITY);

        let mut store = Self {
            eeprom,
            current: ConfigRecord::new(),
            shadow: [0xFF; CONFIG_RECORD_SIZE],
            full_write_pending: false,
        };
        store.reset_to_default();
        store
    }

    /// Load the persisted record
    ///
    /// Never fails: anything unreadable ends in factory defaults, which
    /// are only written on the next [`commit`](Self::commit).
    pub async fn initialize(&mut self) -> LoadOutcome {
        let outcome = self.load().await;
        match outcome {
            LoadOutcome::Primary => info!("config: loaded copy A"),
            LoadOutcome::Secondary => warn!("config: copy A corrupt, loaded copy B"),
            LoadOutcome::Migrated => info!("config: migrated to version {}", CURRENT_CONFIG_VERSION),
            LoadOutcome::Defaults => warn!("config: no valid copy, using defaults"),
        }
        outcome
    }

    /// Live record
    pub fn current(&self) -> &ConfigRecord {
        &self.current
    }

    /// Live record for modification, persisted by [`commit`](Self::commit)
    pub fn current_mut(&mut self) -> &mut ConfigRecord {
        &mut self.current
    }

    /// Whether the live record differs from what is on the media
    pub fn is_dirty(&self) -> bool {
        let mut record = self.current.clone();
        record.update_crc();
        let mut image = [0u8; CONFIG_RECORD_SIZE];
        record.pack(&mut image);
        self.full_write_pending || image != self.shadow
    }

    /// Replace the live record with factory defaults
    ///
    /// Nothing is written until [`commit`](Self::commit).
    pub fn reset_to_default(&mut self) {
        self.current = ConfigRecord::new();
        self.current.update_crc();
    }

    /// Persist the live record to both copies
    ///
    /// Only pages that differ from the shadow are written, first to copy A
    /// and then the same pages to copy B. Returns the number of pages
    /// written to each copy. On failure the write protection is restored
    /// and the shadow is left as it was, so a retry rewrites every page
    /// that may be stale.
    pub async fn commit(&mut self) -> Result<usize, ConfigError> {
        self.current.update_crc();
        let mut image = [0u8; CONFIG_RECORD_SIZE];
        self.current.pack(&mut image);

        let page_size = E::PAGE_SIZE;
        let mut dirty: Vec<usize, CONFIG_PAGES> = Vec::new();
        for (index, (page, stored)) in image
            .chunks(page_size)
            .zip(self.shadow.chunks(page_size))
            .enumerate()
        {
            if self.full_write_pending || page != stored {
                dirty.push(index).map_err(|_| MemoryError::OutOfRange)?;
            }
        }

        if dirty.is_empty() {
            debug!("config: nothing to commit");
            return Ok(0);
        }

        {
            let eeprom = self.eeprom;
            let mut access = eeprom.lock().await;
            let mut memory = WriteEnable::new(&mut *access);

            for &index in &dirty {
                memory
                    .write_page(PRIMARY_CONFIG_PAGE + index, page_of(&image, index, page_size))
                    .await?;
            }
            for &index in &dirty {
                memory
                    .write_page(SECONDARY_CONFIG_PAGE + index, page_of(&image, index, page_size))
                    .await?;
            }
        }

        self.shadow = image;
        self.full_write_pending = false;
        info!("config: committed {} pages per copy", dirty.len());
        Ok(dirty.len())
    }

    async fn load(&mut self) -> LoadOutcome {
        let mut image = [0u8; CONFIG_RECORD_SIZE];
        let source = self.read_valid_copy(&mut image).await;

        let Some(source) = source else {
            self.fall_back_to_defaults();
            return LoadOutcome::Defaults;
        };

        let version = image_version(&image);
        if version == 0 || version > CURRENT_CONFIG_VERSION {
            warn!("config: unsupported version {}", version);
            self.fall_back_to_defaults();
            return LoadOutcome::Defaults;
        }

        self.current = ConfigRecord::unpack(&image);
        if version < CURRENT_CONFIG_VERSION {
            self.migrate();
            self.shadow = [0xFF; CONFIG_RECORD_SIZE];
            return LoadOutcome::Migrated;
        }

        self.shadow = image;
        self.full_write_pending = source == LoadOutcome::Secondary;
        source
    }

    /// Fill `image` from the first copy with a valid CRC
    async fn read_valid_copy(&self, image: &mut ConfigImage) -> Option<LoadOutcome> {
        let mut eeprom = self.eeprom.lock().await;

        if let Err(e) = eeprom.read_bytes(copy_address::<E>(PRIMARY_CONFIG_PAGE), image).await {
            error!("config: copy A read failed: {:?}", e);
            return None;
        }
        if image_crc_ok(image) {
            return Some(LoadOutcome::Primary);
        }

        if let Err(e) = eeprom.read_bytes(copy_address::<E>(SECONDARY_CONFIG_PAGE), image).await {
            error!("config: copy B read failed: {:?}", e);
            return None;
        }
        image_crc_ok(image).then_some(LoadOutcome::Secondary)
    }

    fn fall_back_to_defaults(&mut self) {
        self.reset_to_default();
        self.shadow = [0xFF; CONFIG_RECORD_SIZE];
        self.full_write_pending = false;
    }

    /// Upgrade an older record in place
    ///
    /// Version 1 is the only layout so far, so this only stamps the version.
    fn migrate(&mut self) {
        self.current.config_version = CURRENT_CONFIG_VERSION;
        self.current.update_crc();
    }
}

fn copy_address<E: ByteMemory>(first_page: usize) -> usize {
    first_page * E::PAGE_SIZE
}

fn page_of(image: &[u8], index: usize, page_size: usize) -> &[u8] {
    let start = index * page_size;
    &image[start..(start + page_size).min(image.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use tidewatch_core::state::{DeviceStatus, ErrorCode};
    use tidewatch_drivers::eeprom::{DmaCompletion, Eeprom, EEPROM_PAGE_SIZE_BYTES};
    use tidewatch_drivers::mock::{BusOp, MockContext, MockI2cMemory, MockPin};

    type TestEeprom<'a> =
        Eeprom<'a, NoopRawMutex, MockI2cMemory<'a, NoopRawMutex>, MockPin, MockContext>;

    const COPY_BYTES: usize = CONFIG_PAGES * EEPROM_PAGE_SIZE_BYTES;
    const RECORD_PAGES: usize = CONFIG_RECORD_SIZE.div_ceil(EEPROM_PAGE_SIZE_BYTES);

    fn eeprom<'a>(
        completion: &'a DmaCompletion<NoopRawMutex>,
        status: &'a DeviceStatus,
    ) -> Guarded<NoopRawMutex, TestEeprom<'a>> {
        let pin = MockPin::new();
        let bus = MockI2cMemory::new(completion).with_write_protect(pin.line());
        Guarded::new(
            "eeprom",
            Eeprom::new(bus, pin, MockContext::running(), completion, status),
        )
    }

    /// Page writes to (copy A, copy B) since the log was last cleared
    fn page_writes(eeprom: &mut Guarded<NoopRawMutex, TestEeprom<'_>>) -> (usize, usize) {
        let mut a = 0;
        let mut b = 0;
        for op in eeprom.get_mut().bus().ops() {
            if let BusOp::Write { address, .. } = op {
                match usize::from(*address) {
                    addr if addr < COPY_BYTES => a += 1,
                    addr if addr < 2 * COPY_BYTES => b += 1,
                    _ => {}
                }
            }
        }
        (a, b)
    }

    fn clear_ops(eeprom: &mut Guarded<NoopRawMutex, TestEeprom<'_>>) {
        eeprom.get_mut().bus_mut().clear_ops();
    }

    #[test]
    fn test_blank_memory_loads_defaults() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let eeprom = eeprom(&completion, &status);
        let mut store = ConfigStore::new(&eeprom);

        let outcome = block_on(store.initialize());
        assert_eq!(outcome, LoadOutcome::Defaults);
        assert!(!outcome.is_loaded());
        assert_eq!(store.current().impulses_per_liter, DEFAULT_IMPULSES_PER_LITER);
        assert!(store.current().verify_crc());
        assert!(store.is_dirty());
    }

    #[test]
    fn test_first_commit_writes_every_record_page() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);

        {
            let mut store = ConfigStore::new(&eeprom);
            block_on(store.initialize());
            assert_eq!(block_on(store.commit()), Ok(RECORD_PAGES));
            assert!(!store.is_dirty());
        }

        assert_eq!(page_writes(&mut eeprom), (RECORD_PAGES, RECORD_PAGES));
        let chip = eeprom.get_mut();
        assert!(chip.is_write_protected());
        assert_eq!(chip.bus().protected_writes(), 0);
        let cells = chip.bus().cells();
        assert_eq!(
            cells[..CONFIG_RECORD_SIZE],
            cells[COPY_BYTES..COPY_BYTES + CONFIG_RECORD_SIZE]
        );
    }

    #[test]
    fn test_round_trip_reset_commit_reload() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let eeprom = eeprom(&completion, &status);

        let mut store = ConfigStore::new(&eeprom);
        block_on(store.initialize());
        store.current_mut().timezone_id = 7;
        store.reset_to_default();
        block_on(store.commit()).unwrap();
        let committed = store.current().clone();
        drop(store);

        let mut reloaded = ConfigStore::new(&eeprom);
        assert_eq!(block_on(reloaded.initialize()), LoadOutcome::Primary);
        assert_eq!(reloaded.current(), &committed);
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn test_modified_record_survives_reload() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let eeprom = eeprom(&completion, &status);

        let mut store = ConfigStore::new(&eeprom);
        block_on(store.initialize());
        let record = store.current_mut();
        record.wifi_ssid.push_str("garage").unwrap();
        record.valve_type_nc = true;
        record.pair_probe(ProbeId([0xAB, 0xCD, 0xEF]));
        record.set_blockade_enabled(6, true);
        block_on(store.commit()).unwrap();
        drop(store);

        let mut reloaded = ConfigStore::new(&eeprom);
        block_on(reloaded.initialize());
        let record = reloaded.current();
        assert_eq!(record.wifi_ssid.as_str(), "garage");
        assert!(record.valve_type_nc);
        assert!(record.is_probe_paired(ProbeId([0xAB, 0xCD, 0xEF])));
        assert!(record.is_blockade_enabled(6));
    }

    #[test]
    fn test_copy_b_recovers_after_bit_flip() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);

        let committed = {
            let mut store = ConfigStore::new(&eeprom);
            block_on(store.initialize());
            store.current_mut().wifi_password.push_str("s3cret").unwrap();
            block_on(store.commit()).unwrap();
            store.current().clone()
        };

        // Single bit flip inside copy A's password field
        eeprom.get_mut().bus_mut().cells_mut()[41] ^= 0x04;

        let mut store = ConfigStore::new(&eeprom);
        assert_eq!(block_on(store.initialize()), LoadOutcome::Secondary);
        assert_eq!(store.current(), &committed);
        assert!(store.is_dirty());
    }

    #[test]
    fn test_commit_after_copy_b_load_repairs_copy_a() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);

        {
            let mut store = ConfigStore::new(&eeprom);
            block_on(store.initialize());
            block_on(store.commit()).unwrap();
        }
        eeprom.get_mut().bus_mut().cells_mut()[200] ^= 0x80;

        {
            let mut store = ConfigStore::new(&eeprom);
            block_on(store.initialize());
            clear_ops_via(&eeprom);
            assert_eq!(block_on(store.commit()), Ok(RECORD_PAGES));
            // The repair is one-shot
            assert_eq!(block_on(store.commit()), Ok(0));
        }

        let cells = eeprom.get_mut().bus().cells();
        assert_eq!(
            cells[..CONFIG_RECORD_SIZE],
            cells[COPY_BYTES..COPY_BYTES + CONFIG_RECORD_SIZE]
        );
    }

    fn clear_ops_via(eeprom: &Guarded<NoopRawMutex, TestEeprom<'_>>) {
        block_on(eeprom.lock()).bus_mut().clear_ops();
    }

    #[test]
    fn test_both_copies_corrupt_falls_back_to_defaults() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);

        {
            let mut store = ConfigStore::new(&eeprom);
            block_on(store.initialize());
            store.current_mut().timezone_id = 3;
            block_on(store.commit()).unwrap();
        }
        let cells = eeprom.get_mut().bus_mut().cells_mut();
        cells[172] ^= 1;
        cells[COPY_BYTES + 172] ^= 1;

        let mut store = ConfigStore::new(&eeprom);
        assert_eq!(block_on(store.initialize()), LoadOutcome::Defaults);
        assert_eq!(store.current().timezone_id, DEFAULT_TIMEZONE_ID);
    }

    #[test]
    fn test_single_page_change_writes_once_per_copy() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);

        let mut store = ConfigStore::new(&eeprom);
        block_on(store.initialize());
        block_on(store.commit()).unwrap();
        clear_ops_via(&eeprom);

        // Offset 104, same page as the CRC word
        store.current_mut().impulses_per_liter = 620;
        assert_eq!(block_on(store.commit()), Ok(1));
        drop(store);

        assert_eq!(page_writes(&mut eeprom), (1, 1));
        let ops = eeprom.get_mut().bus().ops().to_vec();
        assert!(ops.contains(&BusOp::Write {
            address: 0,
            len: EEPROM_PAGE_SIZE_BYTES,
            dma: true
        }));
        assert!(ops.contains(&BusOp::Write {
            address: COPY_BYTES as u16,
            len: EEPROM_PAGE_SIZE_BYTES,
            dma: true
        }));
    }

    #[test]
    fn test_unchanged_commit_writes_nothing() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);

        let mut store = ConfigStore::new(&eeprom);
        block_on(store.initialize());
        block_on(store.commit()).unwrap();
        clear_ops_via(&eeprom);

        assert_eq!(block_on(store.commit()), Ok(0));
        drop(store);
        assert_eq!(page_writes(&mut eeprom), (0, 0));
    }

    #[test]
    fn test_unsupported_version_resets() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);

        let mut record = ConfigRecord::new();
        record.config_version = CURRENT_CONFIG_VERSION + 1;
        record.timezone_id = 99;
        record.update_crc();
        let mut image = [0u8; CONFIG_RECORD_SIZE];
        record.pack(&mut image);
        eeprom.get_mut().bus_mut().cells_mut()[..CONFIG_RECORD_SIZE].copy_from_slice(&image);

        let mut store = ConfigStore::new(&eeprom);
        assert_eq!(block_on(store.initialize()), LoadOutcome::Defaults);
        assert_eq!(store.current().timezone_id, DEFAULT_TIMEZONE_ID);
        assert_eq!(store.current().config_version, CURRENT_CONFIG_VERSION);
    }

    #[test]
    fn test_version_zero_resets() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);

        let mut record = ConfigRecord::new();
        record.config_version = 0;
        record.update_crc();
        let mut image = [0u8; CONFIG_RECORD_SIZE];
        record.pack(&mut image);
        eeprom.get_mut().bus_mut().cells_mut()[..CONFIG_RECORD_SIZE].copy_from_slice(&image);

        let mut store = ConfigStore::new(&eeprom);
        assert_eq!(block_on(store.initialize()), LoadOutcome::Defaults);
    }

    #[test]
    fn test_read_failure_uses_defaults_without_fallback() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);
        eeprom.get_mut().bus_mut().fail_reads(true);

        let mut store = ConfigStore::new(&eeprom);
        assert_eq!(block_on(store.initialize()), LoadOutcome::Defaults);
        drop(store);

        // Config faults are not latched as device errors
        assert_eq!(status.error(), ErrorCode::NoError);
    }

    #[test]
    fn test_commit_failure_restores_protection() {
        let completion = DmaCompletion::new();
        let status = DeviceStatus::new();
        let mut eeprom = eeprom(&completion, &status);

        let mut store = ConfigStore::new(&eeprom);
        block_on(store.initialize());
        block_on(eeprom_fail_after(&eeprom, 3));

        assert_eq!(
            block_on(store.commit()),
            Err(ConfigError::Memory(MemoryError::Bus))
        );
        assert!(store.is_dirty());

        // A retry after the fault clears writes everything again
        block_on(eeprom.lock()).bus_mut().clear_failures();
        assert_eq!(block_on(store.commit()), Ok(RECORD_PAGES));
        drop(store);

        assert!(eeprom.get_mut().is_write_protected());
    }

    async fn eeprom_fail_after(eeprom: &Guarded<NoopRawMutex, TestEeprom<'_>>, writes: usize) {
        eeprom.lock().await.bus_mut().fail_writes_after(writes);
    }
}
