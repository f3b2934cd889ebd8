//! Column value types that have no direct Rust scalar: DATETIME-family
//! values and BLOB payloads.

use std::fmt;
use std::str::FromStr;

/// Which temporal flavour a [`TimeValue`] carries.
///
/// Matches the four temporal column families a server can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TimeKind {
    /// TIME column (duration-of-day)
    Time = 0,
    /// DATE column
    Date = 1,
    /// DATETIME column
    #[default]
    DateTime = 2,
    /// TIMESTAMP column
    Timestamp = 3,
}

impl TimeKind {
    /// Parse a kind from its wire discriminant.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => TimeKind::Time,
            1 => TimeKind::Date,
            3 => TimeKind::Timestamp,
            _ => TimeKind::DateTime,
        }
    }
}

/// A calendar value for DATETIME/TIMESTAMP/DATE/TIME columns.
///
/// Setters validate their range and keep the previous value on rejection,
/// logging the attempt. The canonical textual form is
/// `YYYY-MM-DD HH:MM:SS` (see the `Display` impl and [`FromStr`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeValue {
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    microsecond: u32,
    kind: TimeKind,
    negative: bool,
}

/// Fixed driver-level image of a [`TimeValue`]:
/// year(u16 LE), month, day, hour, minute, second, micros(u32 LE), kind, neg.
pub const TIME_WIRE_LEN: usize = 13;

impl Default for TimeValue {
    fn default() -> Self {
        Self {
            year: 2024,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
            microsecond: 0,
            kind: TimeKind::DateTime,
            negative: false,
        }
    }
}

impl TimeValue {
    /// A fresh DATETIME value at the default calendar position.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_year(&mut self, year: u32) -> &mut Self {
        self.year = year;
        self
    }

    pub fn set_month(&mut self, month: u32) -> &mut Self {
        if (1..=12).contains(&month) {
            self.month = month;
        } else {
            tracing::error!(month, "TimeValue::set_month rejected out-of-range value");
        }
        self
    }

    pub fn set_day(&mut self, day: u32) -> &mut Self {
        if (1..=31).contains(&day) {
            self.day = day;
        } else {
            tracing::error!(day, "TimeValue::set_day rejected out-of-range value");
        }
        self
    }

    pub fn set_hour(&mut self, hour: u32) -> &mut Self {
        if hour <= 24 {
            self.hour = hour;
        } else {
            tracing::error!(hour, "TimeValue::set_hour rejected out-of-range value");
        }
        self
    }

    pub fn set_minute(&mut self, minute: u32) -> &mut Self {
        if minute <= 60 {
            self.minute = minute;
        } else {
            tracing::error!(minute, "TimeValue::set_minute rejected out-of-range value");
        }
        self
    }

    pub fn set_second(&mut self, second: u32) -> &mut Self {
        if second <= 60 {
            self.second = second;
        } else {
            tracing::error!(second, "TimeValue::set_second rejected out-of-range value");
        }
        self
    }

    pub fn set_microsecond(&mut self, microsecond: u32) -> &mut Self {
        self.microsecond = microsecond;
        self
    }

    pub fn set_kind(&mut self, kind: TimeKind) -> &mut Self {
        self.kind = kind;
        self
    }

    pub fn set_negative(&mut self, negative: bool) -> &mut Self {
        self.negative = negative;
        self
    }

    pub fn year(&self) -> u32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn second(&self) -> u32 {
        self.second
    }

    pub fn microsecond(&self) -> u32 {
        self.microsecond
    }

    pub fn kind(&self) -> TimeKind {
        self.kind
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Serialise into the fixed driver wire image.
    pub fn to_wire_bytes(&self) -> [u8; TIME_WIRE_LEN] {
        let mut out = [0u8; TIME_WIRE_LEN];
        out[0..2].copy_from_slice(&(self.year as u16).to_le_bytes());
        out[2] = self.month as u8;
        out[3] = self.day as u8;
        out[4] = self.hour as u8;
        out[5] = self.minute as u8;
        out[6] = self.second as u8;
        out[7..11].copy_from_slice(&self.microsecond.to_le_bytes());
        out[11] = self.kind as u8;
        out[12] = u8::from(self.negative);
        out
    }

    /// Rebuild from the driver wire image. Returns `None` when the buffer
    /// is too short to hold one.
    pub fn from_wire_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < TIME_WIRE_LEN {
            return None;
        }
        Some(Self {
            year: u32::from(u16::from_le_bytes([data[0], data[1]])),
            month: u32::from(data[2]),
            day: u32::from(data[3]),
            hour: u32::from(data[4]),
            minute: u32::from(data[5]),
            second: u32::from(data[6]),
            microsecond: u32::from_le_bytes([data[7], data[8], data[9], data[10]]),
            kind: TimeKind::from_u8(data[11]),
            negative: data[12] != 0,
        })
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Error parsing the canonical `YYYY-MM-DD HH:MM:SS` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeParseError {
    input: String,
}

impl fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid datetime literal: {:?}", self.input)
    }
}

impl std::error::Error for TimeParseError {}

impl FromStr for TimeValue {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn parse_fields(s: &str) -> Option<[u32; 6]> {
            let (date, time) = s.trim().split_once(' ')?;
            let mut fields = [0u32; 6];
            let mut count = 0;
            for part in date.split('-').chain(time.split(':')) {
                if count == 6 {
                    return None;
                }
                fields[count] = part.parse::<u32>().ok()?;
                count += 1;
            }
            (count == 6).then_some(fields)
        }

        let [year, month, day, hour, minute, second] =
            parse_fields(s).ok_or_else(|| TimeParseError {
                input: s.to_string(),
            })?;

        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            microsecond: 0,
            kind: TimeKind::DateTime,
            negative: false,
        })
    }
}

/// An owned binary column payload. Equality is bytewise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob {
    data: Vec<u8>,
}

impl Blob {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for Blob {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<&[u8]> for Blob {
    fn from(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }
}

impl From<String> for Blob {
    fn from(data: String) -> Self {
        Self {
            data: data.into_bytes(),
        }
    }
}

impl From<&str> for Blob {
    fn from(data: &str) -> Self {
        Self {
            data: data.as_bytes().to_vec(),
        }
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_round_trips() {
        let mut t = TimeValue::new();
        t.set_year(2024)
            .set_month(9)
            .set_day(10)
            .set_hour(0)
            .set_minute(0)
            .set_second(0);

        assert_eq!(t.to_string(), "2024-09-10 00:00:00");
        let parsed: TimeValue = t.to_string().parse().expect("canonical form parses");
        assert_eq!(parsed, t);
    }

    #[test]
    fn rejected_setters_keep_previous_value() {
        let mut t = TimeValue::new();
        t.set_month(5);
        t.set_month(13);
        assert_eq!(t.month(), 5);

        t.set_day(29);
        t.set_day(0);
        assert_eq!(t.day(), 29);

        t.set_hour(25);
        assert_eq!(t.hour(), 0);

        t.set_minute(61);
        t.set_second(61);
        assert_eq!(t.minute(), 0);
        assert_eq!(t.second(), 0);
    }

    #[test]
    fn wire_image_round_trips() {
        let mut t = TimeValue::new();
        t.set_year(1999)
            .set_month(12)
            .set_day(31)
            .set_hour(23)
            .set_minute(59)
            .set_second(58)
            .set_microsecond(123_456)
            .set_kind(TimeKind::Timestamp);

        let wire = t.to_wire_bytes();
        assert_eq!(wire.len(), TIME_WIRE_LEN);
        assert_eq!(TimeValue::from_wire_bytes(&wire), Some(t));
        assert_eq!(TimeValue::from_wire_bytes(&wire[..12]), None);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("not a datetime".parse::<TimeValue>().is_err());
        assert!("2024-09-10".parse::<TimeValue>().is_err());
        assert!("2024-09 10:00:00".parse::<TimeValue>().is_err());
    }

    #[test]
    fn blob_equality_is_bytewise() {
        let a = Blob::new(vec![1u8, 2, 3]);
        let b = Blob::from(&[1u8, 2, 3][..]);
        let c = Blob::from("abc");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Blob::new(a.as_bytes().to_vec()), a);
    }
}
