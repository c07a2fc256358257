//! Civil date/time arithmetic
//!
//! Only what the history store needs: splitting a (local) timestamp into
//! calendar date and hour, and comparing days. Timezone rules are supplied
//! by the clock collaborator as a plain offset.

/// Seconds in one civil day
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Seconds in one hour
pub const SECONDS_PER_HOUR: i64 = 3_600;

/// Proleptic Gregorian calendar date
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CivilDate {
    /// Full year (e.g. 2024)
    pub year: i32,
    /// Month, 1-12
    pub month: u8,
    /// Day of month, 1-31
    pub day: u8,
}

impl CivilDate {
    /// Create a date without validation
    pub const fn new(year: i32, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// Date for a day count relative to 1970-01-01
    pub fn from_days(days: i64) -> Self {
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
        let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
        let year = yoe + era * 400 + i64::from(month <= 2);

        Self {
            year: year as i32,
            month,
            day,
        }
    }

    /// Days since 1970-01-01
    pub fn days_since_epoch(&self) -> i64 {
        let month = i64::from(self.month);
        let year = i64::from(self.year) - i64::from(month <= 2);
        let era = year.div_euclid(400);
        let yoe = year.rem_euclid(400);
        let mp = (month + 9) % 12;
        let doy = (153 * mp + 2) / 5 + i64::from(self.day) - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;

        era * 146_097 + doe - 719_468
    }

    /// Timestamp of this date's midnight
    pub fn start_timestamp(&self) -> i64 {
        self.days_since_epoch() * SECONDS_PER_DAY
    }
}

/// Date plus time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CivilDateTime {
    /// Calendar date
    pub date: CivilDate,
    /// Hour, 0-23
    pub hour: u8,
    /// Minute, 0-59
    pub minute: u8,
    /// Second, 0-59
    pub second: u8,
}

impl CivilDateTime {
    /// Break a timestamp (seconds since 1970-01-01 in the same zone) apart
    pub fn from_timestamp(timestamp: i64) -> Self {
        let days = timestamp.div_euclid(SECONDS_PER_DAY);
        let secs = timestamp.rem_euclid(SECONDS_PER_DAY);

        Self {
            date: CivilDate::from_days(days),
            hour: (secs / SECONDS_PER_HOUR) as u8,
            minute: ((secs % SECONDS_PER_HOUR) / 60) as u8,
            second: (secs % 60) as u8,
        }
    }

    /// Seconds since 1970-01-01 in the same zone
    pub fn timestamp(&self) -> i64 {
        self.date.start_timestamp()
            + i64::from(self.hour) * SECONDS_PER_HOUR
            + i64::from(self.minute) * 60
            + i64::from(self.second)
    }

    /// Whether both fall on the same calendar day
    pub fn same_day(&self, other: &Self) -> bool {
        self.date == other.date
    }
}
