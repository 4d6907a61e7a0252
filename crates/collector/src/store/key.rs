//! Fixed-width timestamp keys.
//!
//! Keys are UTC RFC 3339 with exactly six fractional digits, e.g.
//! `2024-05-01T12:00:07.000000Z`. Every key has the same length, so byte order
//! equals chronological order and cursor seeks behave as time seeks.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};

pub const KEY_LEN: usize = 27;

const MIN_YEAR: i32 = 1970;
const MAX_YEAR: i32 = 9999;

/// Whether `t` encodes to a key of the fixed width.
pub fn is_encodable(t: &DateTime<Utc>) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&t.year())
}

pub fn encode(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Clamp a query bound into the encodable range before encoding it.
pub fn encode_bound(t: &DateTime<Utc>) -> String {
    if t.year() < MIN_YEAR {
        encode(&DateTime::<Utc>::UNIX_EPOCH)
    } else if t.year() > MAX_YEAR {
        "9999-12-31T23:59:59.999999Z".to_string()
    } else {
        encode(t)
    }
}

pub fn decode(key: &[u8]) -> Option<DateTime<Utc>> {
    let s = std::str::from_utf8(key).ok()?;
    if s.len() != KEY_LEN {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
