//! Timestamp codec for wire payloads.
//!
//! Timestamps travel as milliseconds since the Unix epoch. Older clients wrote
//! the value as a floating point number, so decoding accepts both integer and
//! fractional values and rounds to the nearest millisecond.

use chrono::{DateTime, SubsecRound, Utc};

/// Current time truncated to the millisecond precision the wire can carry.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// `#[serde(with = "...")]` adapter for `DateTime<Utc>` as epoch milliseconds.
pub mod millis {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(ts.timestamp_millis())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = f64::deserialize(deserializer)?;
        if !raw.is_finite() {
            return Err(D::Error::custom("timestamp must be a finite number"));
        }

        DateTime::from_timestamp_millis(raw.round() as i64)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {raw}")))
    }
}
