//! Wall-clock collaborator trait

use crate::time::CivilDateTime;

/// Source of the current time and the local timezone offset
///
/// Implemented by the RTC/NTP service. Timestamps are seconds since
/// 1970-01-01 UTC.
pub trait Clock {
    /// Whether the clock has been set (RTC backed up or NTP synced)
    fn is_time_valid(&self) -> bool;

    /// Current UTC timestamp
    fn utc_now(&self) -> u32;

    /// Offset of local time from UTC at the given instant, in seconds
    fn local_offset_seconds(&self, utc: u32) -> i32;

    /// Local-time timestamp for a UTC instant
    fn local_timestamp(&self, utc: u32) -> i64 {
        i64::from(utc) + i64::from(self.local_offset_seconds(utc))
    }

    /// Local civil time for a UTC instant
    fn local(&self, utc: u32) -> CivilDateTime {
        CivilDateTime::from_timestamp(self.local_timestamp(utc))
    }

    /// Current local civil time
    fn local_now(&self) -> CivilDateTime {
        self.local(self.utc_now())
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn is_time_valid(&self) -> bool {
        (**self).is_time_valid()
    }

    fn utc_now(&self) -> u32 {
        (**self).utc_now()
    }

    fn local_offset_seconds(&self, utc: u32) -> i32 {
        (**self).local_offset_seconds(utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::CivilDate;

    struct FixedClock {
        now: u32,
        offset: i32,
    }

    impl Clock for FixedClock {
        fn is_time_valid(&self) -> bool {
            true
        }

        fn utc_now(&self) -> u32 {
            self.now
        }

        fn local_offset_seconds(&self, _utc: u32) -> i32 {
            self.offset
        }
    }

    #[test]
    fn test_offset_moves_day() {
        // 2024-03-10 23:30 UTC
        let now = 1_710_113_400;
        let utc = FixedClock { now, offset: 0 };
        let east = FixedClock { now, offset: 3_600 };

        assert_eq!(utc.local_now().date, CivilDate::new(2024, 3, 10));
        assert_eq!(east.local_now().date, CivilDate::new(2024, 3, 11));
        assert_eq!(east.local_now().hour, 0);
    }
}
