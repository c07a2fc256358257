//! Settings record and its on-media layout
//!
//! The record is packed field by field into a fixed little-endian image.
//! Field order and sizes are part of the persisted format and must not
//! change without bumping [`CURRENT_CONFIG_VERSION`](super::CURRENT_CONFIG_VERSION).

use heapless::String;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tidewatch_core::crc::crc32_words;

use super::{ConfigError, CURRENT_CONFIG_VERSION};

/// Capacity of the paired probe table
pub const MAX_PROBES: usize = 256;

/// Schedule word bit that enables the valve blockade for that weekday
pub const BLOCKADE_ENABLED_FLAG: u32 = 1 << 31;

/// Days in the weekly schedule, Monday first
pub const DAYS_PER_WEEK: usize = 7;

/// Wi-Fi SSID field size
pub const SSID_LEN: usize = 32;
/// Wi-Fi password field size
pub const WIFI_PASSWORD_LEN: usize = 64;
/// Admin password field size
pub const ADMIN_PASSWORD_LEN: usize = 32;
/// Serialized leak-logic blob size
pub const LEAK_LOGIC_LEN: usize = 64;

/// Factory calibration of the flow meter
pub const DEFAULT_IMPULSES_PER_LITER: u32 = 500;
/// Factory admin password
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin1";
/// Factory timezone (index into the timezone table of the clock service)
pub const DEFAULT_TIMEZONE_ID: u32 = 40;

const PROBE_ID_SIZE: usize = 12;

/// Byte offsets of each field in the packed image
mod offset {
    use super::*;

    pub const CRC: usize = 0;
    pub const VERSION: usize = CRC + 4;
    pub const WIFI_SSID: usize = VERSION + 4;
    pub const WIFI_PASSWORD: usize = WIFI_SSID + SSID_LEN;
    pub const IMPULSES: usize = WIFI_PASSWORD + WIFI_PASSWORD_LEN;
    pub const VALVE_NC: usize = IMPULSES + 4;
    pub const ADMIN_PASSWORD: usize = VALVE_NC + 4;
    pub const SCHEDULE: usize = ADMIN_PASSWORD + ADMIN_PASSWORD_LEN;
    pub const TIMEZONE: usize = SCHEDULE + DAYS_PER_WEEK * 4;
    pub const LEAK_LOGIC: usize = TIMEZONE + 4;
    pub const PAIRED_PROBES: usize = LEAK_LOGIC + LEAK_LOGIC_LEN;
    pub const IGNORED_PROBES: usize = PAIRED_PROBES + MAX_PROBES * PROBE_ID_SIZE;
    pub const UNUSED: usize = IGNORED_PROBES + MAX_PROBES;
    pub const END: usize = UNUSED + 4;
}

/// Size of the packed record in bytes
pub const CONFIG_RECORD_SIZE: usize = offset::END;

const _: () = assert!(CONFIG_RECORD_SIZE % 4 == 0);
const _: () = assert!(offset::IMPULSES == 104 && offset::LEAK_LOGIC == 176);

/// Packed record image as stored on the media
pub type ConfigImage = [u8; CONFIG_RECORD_SIZE];

/// 96-bit identifier of a wireless leak probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProbeId(pub [u32; 3]);

impl ProbeId {
    /// Marker for an empty table slot
    pub const INVALID: Self = Self([u32::MAX; 3]);

    /// Whether this is a real probe identifier
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Persisted device settings
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigRecord {
    /// CRC over every word after this one
    pub crc: u32,
    /// Layout version the record was written with
    pub config_version: u32,
    pub wifi_ssid: String<SSID_LEN>,
    pub wifi_password: String<WIFI_PASSWORD_LEN>,
    /// Flow meter calibration
    pub impulses_per_liter: u32,
    /// Valve is normally closed (closes when unpowered)
    pub valve_type_nc: bool,
    pub admin_password: String<ADMIN_PASSWORD_LEN>,
    /// Per weekday: blockade flag plus schedule bits used by the leak logic
    pub weekly_schedule: [u32; DAYS_PER_WEEK],
    pub timezone_id: u32,
    /// Leak-logic parameters, postcard encoded (see [`ConfigRecord::leak_logic`])
    pub leak_logic_config: [u8; LEAK_LOGIC_LEN],
    pub paired_probes: [ProbeId; MAX_PROBES],
    pub ignored_probes: [bool; MAX_PROBES],
    pub unused: u32,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigRecord {
    /// Factory defaults
    ///
    /// The CRC field is left at 0; call [`update_crc`](Self::update_crc)
    /// before comparing against a stored image.
    pub fn new() -> Self {
        let mut admin_password = String::new();
        // Fits: the default is shorter than the field
        let _ = admin_password.push_str(DEFAULT_ADMIN_PASSWORD);

        Self {
            crc: 0,
            config_version: CURRENT_CONFIG_VERSION,
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            impulses_per_liter: DEFAULT_IMPULSES_PER_LITER,
            valve_type_nc: false,
            admin_password,
            weekly_schedule: [0; DAYS_PER_WEEK],
            timezone_id: DEFAULT_TIMEZONE_ID,
            leak_logic_config: [0; LEAK_LOGIC_LEN],
            paired_probes: [ProbeId::INVALID; MAX_PROBES],
            ignored_probes: [false; MAX_PROBES],
            unused: 0,
        }
    }

    /// Serialize into the on-media layout
    pub fn pack(&self, image: &mut ConfigImage) {
        image.fill(0);
        put_u32(image, offset::CRC, self.crc);
        put_u32(image, offset::VERSION, self.config_version);
        put_str(image, offset::WIFI_SSID, SSID_LEN, &self.wifi_ssid);
        put_str(image, offset::WIFI_PASSWORD, WIFI_PASSWORD_LEN, &self.wifi_password);
        put_u32(image, offset::IMPULSES, self.impulses_per_liter);
        image[offset::VALVE_NC] = u8::from(self.valve_type_nc);
        put_str(image, offset::ADMIN_PASSWORD, ADMIN_PASSWORD_LEN, &self.admin_password);
        for (day, word) in self.weekly_schedule.iter().enumerate() {
            put_u32(image, offset::SCHEDULE + day * 4, *word);
        }
        put_u32(image, offset::TIMEZONE, self.timezone_id);
        image[offset::LEAK_LOGIC..offset::PAIRED_PROBES].copy_from_slice(&self.leak_logic_config);
        for (slot, probe) in self.paired_probes.iter().enumerate() {
            let base = offset::PAIRED_PROBES + slot * PROBE_ID_SIZE;
            for (i, word) in probe.0.iter().enumerate() {
                put_u32(image, base + i * 4, *word);
            }
        }
        for (slot, ignored) in self.ignored_probes.iter().enumerate() {
            image[offset::IGNORED_PROBES + slot] = u8::from(*ignored);
        }
        put_u32(image, offset::UNUSED, self.unused);
    }

    /// Deserialize from the on-media layout
    ///
    /// Never fails: integrity is the CRC's job. Text fields stop at the
    /// first NUL and keep only their valid UTF-8 prefix.
    pub fn unpack(image: &ConfigImage) -> Self {
        let mut weekly_schedule = [0; DAYS_PER_WEEK];
        for (day, word) in weekly_schedule.iter_mut().enumerate() {
            *word = get_u32(image, offset::SCHEDULE + day * 4);
        }

        let mut leak_logic_config = [0; LEAK_LOGIC_LEN];
        leak_logic_config.copy_from_slice(&image[offset::LEAK_LOGIC..offset::PAIRED_PROBES]);

        let mut paired_probes = [ProbeId::INVALID; MAX_PROBES];
        for (slot, probe) in paired_probes.iter_mut().enumerate() {
            let base = offset::PAIRED_PROBES + slot * PROBE_ID_SIZE;
            for (i, word) in probe.0.iter_mut().enumerate() {
                *word = get_u32(image, base + i * 4);
            }
        }

        let mut ignored_probes = [false; MAX_PROBES];
        for (slot, ignored) in ignored_probes.iter_mut().enumerate() {
            *ignored = image[offset::IGNORED_PROBES + slot] != 0;
        }

        Self {
            crc: get_u32(image, offset::CRC),
            config_version: get_u32(image, offset::VERSION),
            wifi_ssid: get_str(image, offset::WIFI_SSID),
            wifi_password: get_str(image, offset::WIFI_PASSWORD),
            impulses_per_liter: get_u32(image, offset::IMPULSES),
            valve_type_nc: image[offset::VALVE_NC] != 0,
            admin_password: get_str(image, offset::ADMIN_PASSWORD),
            weekly_schedule,
            timezone_id: get_u32(image, offset::TIMEZONE),
            leak_logic_config,
            paired_probes,
            ignored_probes,
            unused: get_u32(image, offset::UNUSED),
        }
    }

    /// CRC of the packed record, excluding the CRC word itself
    pub fn calculate_crc(&self) -> u32 {
        let mut image = [0u8; CONFIG_RECORD_SIZE];
        self.pack(&mut image);
        image_crc(&image)
    }

    /// Store the freshly calculated CRC
    pub fn update_crc(&mut self) {
        self.crc = self.calculate_crc();
    }

    /// Whether the stored CRC matches the contents
    pub fn verify_crc(&self) -> bool {
        self.crc == self.calculate_crc()
    }

    /// Pair a probe
    ///
    /// Takes the first free slot. Pairing an already paired probe is a
    /// no-op. Returns `false` when the table is full.
    pub fn pair_probe(&mut self, id: ProbeId) -> bool {
        if !id.is_valid() {
            return false;
        }
        if self.is_probe_paired(id) {
            return true;
        }
        match self.paired_probes.iter().position(|p| !p.is_valid()) {
            Some(slot) => {
                self.paired_probes[slot] = id;
                self.ignored_probes[slot] = false;
                true
            }
            None => false,
        }
    }

    /// Forget a probe, returns whether it was paired
    pub fn unpair_probe(&mut self, id: ProbeId) -> bool {
        match self.probe_slot(id) {
            Some(slot) => {
                self.paired_probes[slot] = ProbeId::INVALID;
                self.ignored_probes[slot] = false;
                true
            }
            None => false,
        }
    }

    pub fn is_probe_paired(&self, id: ProbeId) -> bool {
        self.probe_slot(id).is_some()
    }

    /// Mute or unmute alarms from a paired probe
    ///
    /// Returns `false` if the probe is not paired.
    pub fn set_probe_ignored(&mut self, id: ProbeId, ignored: bool) -> bool {
        match self.probe_slot(id) {
            Some(slot) => {
                self.ignored_probes[slot] = ignored;
                true
            }
            None => false,
        }
    }

    pub fn is_probe_ignored(&self, id: ProbeId) -> bool {
        self.probe_slot(id)
            .is_some_and(|slot| self.ignored_probes[slot])
    }

    /// Paired probes in slot order
    pub fn paired(&self) -> impl Iterator<Item = ProbeId> + '_ {
        self.paired_probes.iter().copied().filter(ProbeId::is_valid)
    }

    /// Whether the valve blockade is active on `weekday` (0 = Monday)
    pub fn is_blockade_enabled(&self, weekday: usize) -> bool {
        self.weekly_schedule
            .get(weekday)
            .is_some_and(|word| word & BLOCKADE_ENABLED_FLAG != 0)
    }

    /// Set the blockade flag for `weekday`, keeping the other schedule bits
    pub fn set_blockade_enabled(&mut self, weekday: usize, enabled: bool) {
        if let Some(word) = self.weekly_schedule.get_mut(weekday) {
            if enabled {
                *word |= BLOCKADE_ENABLED_FLAG;
            } else {
                *word &= !BLOCKADE_ENABLED_FLAG;
            }
        }
    }

    /// Decode the leak-logic parameters
    ///
    /// `None` if the blob does not hold a valid `T`.
    pub fn leak_logic<T: DeserializeOwned>(&self) -> Option<T> {
        postcard::from_bytes(&self.leak_logic_config).ok()
    }

    /// Encode the leak-logic parameters into the blob
    ///
    /// Unused blob bytes are zeroed. Fails without touching the record if
    /// the encoding does not fit.
    pub fn set_leak_logic<T: Serialize>(&mut self, value: &T) -> Result<(), ConfigError> {
        let mut blob = [0u8; LEAK_LOGIC_LEN];
        postcard::to_slice(value, &mut blob).map_err(|_| ConfigError::LeakLogic)?;
        self.leak_logic_config = blob;
        Ok(())
    }

    fn probe_slot(&self, id: ProbeId) -> Option<usize> {
        if !id.is_valid() {
            return None;
        }
        self.paired_probes.iter().position(|p| *p == id)
    }
}

/// CRC over a packed image, skipping the CRC word
pub fn image_crc(image: &ConfigImage) -> u32 {
    crc32_words(&image[offset::VERSION..])
}

/// Whether the CRC stored in a packed image matches its contents
pub fn image_crc_ok(image: &ConfigImage) -> bool {
    get_u32(image, offset::CRC) == image_crc(image)
}

/// Layout version stored in a packed image
pub fn image_version(image: &ConfigImage) -> u32 {
    get_u32(image, offset::VERSION)
}

fn put_u32(image: &mut [u8], at: usize, value: u32) {
    image[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(image: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([image[at], image[at + 1], image[at + 2], image[at + 3]])
}

fn put_str(image: &mut [u8], at: usize, len: usize, value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(len);
    image[at..at + n].copy_from_slice(&bytes[..n]);
}

fn get_str<const N: usize>(image: &[u8], at: usize) -> String<N> {
    let field = &image[at..at + N];
    let end = field.iter().position(|b| *b == 0).unwrap_or(N);
    let text = match core::str::from_utf8(&field[..end]) {
        Ok(text) => text,
        Err(e) => core::str::from_utf8(&field[..e.valid_up_to()]).unwrap_or_default(),
    };

    let mut out = String::new();
    // Cannot overflow: at most N bytes were taken
    let _ = out.push_str(text);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct LeakLogic {
        max_flow_ml_per_min: u32,
        max_duration_min: u16,
        night_mode: bool,
    }

    fn packed(record: &ConfigRecord) -> ConfigImage {
        let mut image = [0u8; CONFIG_RECORD_SIZE];
        record.pack(&mut image);
        image
    }

    #[test]
    fn test_layout_size() {
        assert_eq!(CONFIG_RECORD_SIZE, 3572);
        assert_eq!(offset::PAIRED_PROBES, 240);
        assert_eq!(offset::IGNORED_PROBES, 3312);
        assert_eq!(offset::UNUSED, 3568);
    }

    #[test]
    fn test_defaults() {
        let record = ConfigRecord::new();
        assert_eq!(record.config_version, CURRENT_CONFIG_VERSION);
        assert_eq!(record.impulses_per_liter, 500);
        assert_eq!(record.admin_password.as_str(), "admin1");
        assert_eq!(record.timezone_id, 40);
        assert!(record.wifi_ssid.is_empty());
        assert!(!record.valve_type_nc);
        assert_eq!(record.paired().count(), 0);
    }

    #[test]
    fn test_default_image_fields() {
        let image = packed(&ConfigRecord::new());

        assert_eq!(get_u32(&image, 4), 1);
        assert_eq!(get_u32(&image, 104), 500);
        assert_eq!(&image[112..118], b"admin1");
        assert_eq!(image[118], 0);
        assert_eq!(get_u32(&image, 172), 40);
        assert!(image[240..3312].iter().all(|b| *b == 0xFF));
        assert!(image[3312..3568].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_crc_excludes_own_field() {
        let mut record = ConfigRecord::new();
        let crc = record.calculate_crc();

        record.crc = 0xDEAD_BEEF;
        assert_eq!(record.calculate_crc(), crc);

        record.update_crc();
        record.update_crc();
        assert_eq!(record.crc, crc);
        assert!(record.verify_crc());
    }

    #[test]
    fn test_crc_detects_change() {
        let mut record = ConfigRecord::new();
        record.update_crc();
        record.timezone_id += 1;
        assert!(!record.verify_crc());
    }

    #[test]
    fn test_image_crc_matches_record_crc() {
        let mut record = ConfigRecord::new();
        record.update_crc();
        let image = packed(&record);
        assert!(image_crc_ok(&image));
        assert_eq!(image_version(&image), CURRENT_CONFIG_VERSION);
    }

    #[test]
    fn test_unpack_restores_every_field() {
        let mut record = ConfigRecord::new();
        record.wifi_ssid.push_str("cellar").unwrap();
        record.wifi_password.push_str("hunter2").unwrap();
        record.impulses_per_liter = 450;
        record.valve_type_nc = true;
        record.weekly_schedule[2] = 0x0000_0F0F;
        record.timezone_id = 12;
        record.leak_logic_config[0] = 7;
        record.pair_probe(ProbeId([1, 2, 3]));
        record.set_probe_ignored(ProbeId([1, 2, 3]), true);
        record.unused = 9;
        record.update_crc();

        assert_eq!(ConfigRecord::unpack(&packed(&record)), record);
    }

    #[test]
    fn test_full_length_strings() {
        let mut record = ConfigRecord::new();
        for _ in 0..SSID_LEN {
            record.wifi_ssid.push('x').unwrap();
        }
        let restored = ConfigRecord::unpack(&packed(&record));
        assert_eq!(restored.wifi_ssid.len(), SSID_LEN);
        // The neighbouring field is untouched
        assert!(restored.wifi_password.is_empty());
    }

    #[test]
    fn test_invalid_utf8_keeps_prefix() {
        let mut image = packed(&ConfigRecord::new());
        image[8..12].copy_from_slice(&[b'a', b'b', 0xC3, 0x28]);
        let record = ConfigRecord::unpack(&image);
        assert_eq!(record.wifi_ssid.as_str(), "ab");
    }

    #[test]
    fn test_probe_pairing() {
        let mut record = ConfigRecord::new();
        let probe = ProbeId([0x11, 0x22, 0x33]);

        assert!(record.pair_probe(probe));
        assert!(record.pair_probe(probe));
        assert_eq!(record.paired().count(), 1);
        assert!(record.is_probe_paired(probe));

        assert!(record.set_probe_ignored(probe, true));
        assert!(record.is_probe_ignored(probe));

        assert!(record.unpair_probe(probe));
        assert!(!record.is_probe_paired(probe));
        assert!(!record.is_probe_ignored(probe));
        assert!(!record.unpair_probe(probe));
    }

    #[test]
    fn test_probe_table_full() {
        let mut record = ConfigRecord::new();
        for i in 0..MAX_PROBES as u32 {
            assert!(record.pair_probe(ProbeId([i, 0, 0])));
        }
        assert!(!record.pair_probe(ProbeId([0, 1, 0])));

        // A freed slot is reused
        record.unpair_probe(ProbeId([5, 0, 0]));
        assert!(record.pair_probe(ProbeId([0, 1, 0])));
        assert_eq!(record.paired_probes[5], ProbeId([0, 1, 0]));
    }

    #[test]
    fn test_invalid_probe_rejected() {
        let mut record = ConfigRecord::new();
        assert!(!record.pair_probe(ProbeId::INVALID));
        assert!(!record.is_probe_paired(ProbeId::INVALID));
    }

    #[test]
    fn test_blockade_flags() {
        let mut record = ConfigRecord::new();
        record.weekly_schedule[3] = 0x55;

        record.set_blockade_enabled(3, true);
        assert!(record.is_blockade_enabled(3));
        assert_eq!(record.weekly_schedule[3], 0x55 | BLOCKADE_ENABLED_FLAG);
        assert!(!record.is_blockade_enabled(4));

        record.set_blockade_enabled(3, false);
        assert_eq!(record.weekly_schedule[3], 0x55);

        // Out of range weekdays are ignored
        record.set_blockade_enabled(DAYS_PER_WEEK, true);
        assert!(!record.is_blockade_enabled(DAYS_PER_WEEK));
    }

    #[test]
    fn test_leak_logic_round_trip() {
        let mut record = ConfigRecord::new();
        let logic = LeakLogic {
            max_flow_ml_per_min: 12_000,
            max_duration_min: 45,
            night_mode: true,
        };

        record.set_leak_logic(&logic).unwrap();
        assert_eq!(record.leak_logic::<LeakLogic>(), Some(logic));
    }

    #[test]
    fn test_leak_logic_default_blob_decodes_to_zero() {
        let record = ConfigRecord::new();
        assert_eq!(
            record.leak_logic::<LeakLogic>(),
            Some(LeakLogic {
                max_flow_ml_per_min: 0,
                max_duration_min: 0,
                night_mode: false,
            })
        );
    }

    #[test]
    fn test_leak_logic_too_large() {
        let mut record = ConfigRecord::new();
        record.leak_logic_config[0] = 1;
        let oversized = [0xFFu8; LEAK_LOGIC_LEN + 1];

        assert_eq!(
            record.set_leak_logic(&oversized.as_slice()),
            Err(ConfigError::LeakLogic)
        );
        assert_eq!(record.leak_logic_config[0], 1);
    }
}
