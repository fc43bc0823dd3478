// Conversions between chrono and protobuf timestamps
use chrono::{DateTime, Utc};
use prost_types::Timestamp;

/// 9999-12-31T23:59:59Z, the largest value a protobuf timestamp may carry.
pub const MAX_SECONDS: i64 = 253_402_300_799;

pub fn to_timestamp(time: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: time.timestamp(),
        nanos: time.timestamp_subsec_nanos() as i32,
    }
}

pub fn from_timestamp(ts: &Timestamp) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(ts.nanos).ok()?;
    DateTime::from_timestamp(ts.seconds, nanos)
}

pub fn now() -> Timestamp {
    to_timestamp(Utc::now())
}

/// Expiry used for records that never expire.
pub fn max_timestamp() -> Timestamp {
    Timestamp {
        seconds: MAX_SECONDS,
        nanos: 0,
    }
}

/// Ordering key; prost's `Timestamp` carries no `Ord`.
pub fn sort_key(ts: &Timestamp) -> (i64, i32) {
    (ts.seconds, ts.nanos)
}
